//! CSV export of filtered, sorted rows.
//!
//! The result is fully materialized before the boundary streams it out;
//! NULLs render as empty fields and non-primitive values are stringified
//! through the same projection the page reader uses.

use duckdb::params_from_iter;

use crate::engine::Engine;
use crate::filter::{compile_filters, where_sql};
use crate::ident::quote;
use crate::types::{Filter, SortDirection};
use crate::value::display_value;
use crate::{Error, Result};

impl Engine {
    /// Export a dataset as UTF-8 CSV bytes: header plus data rows.
    ///
    /// # Errors
    /// `NotFound` for unknown datasets, `InvalidRequest` for unknown sort
    /// columns or invalid filters.
    pub fn export_csv(
        &self,
        dataset_id: &str,
        sort_column: Option<&str>,
        sort_direction: SortDirection,
        filters: &[Filter],
    ) -> Result<Vec<u8>> {
        let inner = self.lock();
        let entry = inner.entry(dataset_id)?;
        let table_sql = quote(&entry.table);
        let columns = inner.columns(&entry.table)?;

        if let Some(col) = sort_column {
            if !columns.contains(col) {
                return Err(Error::invalid(format!("Invalid sort column: {col}")));
            }
        }

        let (clauses, params) = compile_filters(filters, &columns)?;
        let order_sql = sort_column.map_or_else(
            || "ORDER BY rowid ASC".to_string(),
            |col| {
                format!(
                    "ORDER BY {} {} NULLS LAST",
                    quote(col),
                    sort_direction.as_sql()
                )
            },
        );

        let sql = format!(
            "SELECT * FROM {table_sql} {} {order_sql}",
            where_sql(&clauses)
        );
        let mut stmt = inner.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let column_count = rows.as_ref().map_or(0, duckdb::Statement::column_count);
        let col_names: Vec<String> = (0..column_count)
            .map(|i| {
                rows.as_ref()
                    .and_then(|s| s.column_name(i).ok())
                    .map_or_else(|| "?".to_string(), String::clone)
            })
            .collect();

        let mut out = String::new();
        write_record(&mut out, col_names.iter().map(String::as_str));
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                cells.push(display_value(&row.get_ref(i)?).unwrap_or_default());
            }
            write_record(&mut out, cells.iter().map(String::as_str));
        }

        Ok(out.into_bytes())
    }
}

fn write_record<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    let mut first = true;
    for cell in cells {
        if !first {
            out.push(',');
        }
        out.push_str(&escape_csv(cell));
        first = false;
    }
    out.push('\n');
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
