//! Keyset-paginated row reads.
//!
//! Pages are located by comparing against the anchor row encoded in the
//! cursor rather than by offset, with the intrinsic `rowid` as the
//! universal tie-breaker. The declared order always places NULLs last, so
//! the predicate after a non-null anchor keeps NULL rows reachable.

use duckdb::params_from_iter;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::cursor::{self, CursorPayload};
use crate::engine::{count_query, Engine};
use crate::filter::{compile_filters, where_sql};
use crate::ident::{quote, Columns};
use crate::types::{Filter, ScalarValue, SortDirection};
use crate::{Error, Result};

const ROWID_ALIAS: &str = "__rowid__";
pub(crate) const MAX_PAGE_SIZE: i64 = 10_000;

/// Parameters of one page read.
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Echoed back to the client; pagination truth is the cursor.
    pub page: u32,
    pub page_size: i64,
    pub sort_column: Option<String>,
    pub sort_direction: SortDirection,
    pub filters: Vec<Filter>,
    pub cursor: Option<String>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 200,
            sort_column: None,
            sort_direction: SortDirection::Asc,
            filters: Vec::new(),
            cursor: None,
        }
    }
}

/// One page of rows plus pagination bookkeeping.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    pub rows: Vec<JsonMap<String, JsonValue>>,
    pub columns: Vec<String>,
    pub total_rows: i64,
    pub filtered_rows: i64,
    pub page: u32,
    pub page_size: i64,
    pub total_pages: i64,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
}

impl Engine {
    /// Fetch one keyset-paginated, filtered, sorted page.
    ///
    /// # Errors
    /// `NotFound` for unknown datasets; `InvalidRequest` for bad page
    /// sizes, unknown sort columns, invalid filters, or stale cursors.
    pub fn get_page(&self, dataset_id: &str, req: &PageRequest) -> Result<PageResponse> {
        if req.page_size < 1 || req.page_size > MAX_PAGE_SIZE {
            return Err(Error::invalid(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let inner = self.lock();
        let entry = inner.entry(dataset_id)?;
        let table_sql = quote(&entry.table);
        let columns = inner.columns(&entry.table)?;

        if let Some(col) = &req.sort_column {
            if !columns.contains(col) {
                return Err(Error::invalid(format!("Invalid sort column: {col}")));
            }
        }
        let dir = req.sort_direction;

        let (filter_clauses, filter_params) = compile_filters(&req.filters, &columns)?;
        let filtered_rows = count_query(
            &inner.conn,
            &format!(
                "SELECT COUNT(*) FROM {table_sql} {}",
                where_sql(&filter_clauses)
            ),
            &filter_params,
        )?;
        let total_rows = count_query(
            &inner.conn,
            &format!("SELECT COUNT(*) FROM {table_sql}"),
            &[],
        )?;

        let mut query_clauses = filter_clauses;
        let mut params = filter_params;
        if let Some(token) = &req.cursor {
            let (clause, mut keyset_params) =
                keyset_predicate(token, req.sort_column.as_deref(), dir, &columns)?;
            query_clauses.push(clause);
            params.append(&mut keyset_params);
        }

        let order_sql = req.sort_column.as_ref().map_or_else(
            || "ORDER BY rowid ASC".to_string(),
            |col| {
                format!(
                    "ORDER BY {} {dir} NULLS LAST, rowid {dir}",
                    quote(col),
                    dir = dir.as_sql()
                )
            },
        );

        let sql = format!(
            "SELECT *, rowid AS \"{ROWID_ALIAS}\" FROM {table_sql} {} {order_sql} LIMIT ?",
            where_sql(&query_clauses)
        );
        params.push(ScalarValue::Int(req.page_size + 1));

        let mut stmt = inner.conn.prepare(&sql)?;
        let mut rows_iter = stmt.query(params_from_iter(params.iter()))?;
        let column_count = rows_iter
            .as_ref()
            .map_or(0, duckdb::Statement::column_count);
        let col_names: Vec<String> = (0..column_count)
            .map(|i| {
                rows_iter
                    .as_ref()
                    .and_then(|s| s.column_name(i).ok())
                    .map_or_else(|| "?".to_string(), String::clone)
            })
            .collect();

        let mut rows: Vec<JsonMap<String, JsonValue>> = Vec::new();
        let mut rowids: Vec<i64> = Vec::new();
        while let Some(row) = rows_iter.next()? {
            let mut record = JsonMap::with_capacity(column_count.saturating_sub(1));
            let mut rowid = 0i64;
            for (i, col) in col_names.iter().enumerate() {
                if col == ROWID_ALIAS {
                    rowid = row.get(i)?;
                } else {
                    record.insert(col.clone(), crate::value::json_value(&row.get_ref(i)?));
                }
            }
            rows.push(record);
            rowids.push(rowid);
        }

        let has_more = rows.len() as i64 > req.page_size;
        if has_more {
            rows.truncate(req.page_size as usize);
            rowids.truncate(req.page_size as usize);
        }

        let next_cursor = if has_more && !rows.is_empty() {
            let last_row = &rows[rows.len() - 1];
            let mut payload = CursorPayload {
                v: 1,
                s: req.sort_column.clone(),
                d: dir.as_sql().to_string(),
                r: rowids[rowids.len() - 1],
                n: None,
                k: None,
            };
            if let Some(col) = &req.sort_column {
                match last_row.get(col) {
                    None | Some(JsonValue::Null) => payload.n = Some(true),
                    Some(value) => payload.k = Some(value.clone()),
                }
            }
            Some(cursor::encode(&payload)?)
        } else {
            None
        };

        let total_pages = ((filtered_rows + req.page_size - 1) / req.page_size).max(1);
        Ok(PageResponse {
            rows,
            columns: col_names.into_iter().filter(|c| c != ROWID_ALIAS).collect(),
            total_rows,
            filtered_rows,
            page: req.page,
            page_size: req.page_size,
            total_pages,
            next_cursor,
            prev_cursor: req.cursor.clone(),
        })
    }
}

/// Compile the predicate that selects rows strictly after the cursor's
/// anchor under the declared order.
fn keyset_predicate(
    token: &str,
    sort_column: Option<&str>,
    dir: SortDirection,
    columns: &Columns,
) -> Result<(String, Vec<ScalarValue>)> {
    let payload = cursor::decode(token)?;
    payload.validate(sort_column, dir.as_sql())?;
    let anchor_rowid = ScalarValue::Int(payload.r);

    let Some(col) = sort_column else {
        return Ok(("rowid > ?".to_string(), vec![anchor_rowid]));
    };
    let col_sql = quote(col);
    let cmp = if dir.is_desc() { "<" } else { ">" };

    if payload.is_null_anchor() {
        return Ok((
            format!("({col_sql} IS NULL AND rowid {cmp} ?)"),
            vec![anchor_rowid],
        ));
    }

    let key = payload
        .k
        .as_ref()
        .ok_or_else(|| Error::invalid("Cursor is missing sort key"))?;
    let info = columns.require(col)?;
    let anchor = cursor::deserialize_anchor(key, info.semantic_type)?;

    // NULLs sort last, so every NULL row still follows a non-null anchor.
    Ok((
        format!(
            "(({col_sql} {cmp} ?) OR ({col_sql} = ? AND rowid {cmp} ?) OR {col_sql} IS NULL)"
        ),
        vec![anchor.clone(), anchor, anchor_rowid],
    ))
}
