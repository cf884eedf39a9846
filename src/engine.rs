//! The embedded `DuckDB` engine handle and dataset registry.
//!
//! One process owns one `DuckDB` connection. The connection is not
//! concurrent-safe, so every engine call serializes behind the handle's
//! mutex; the registry lives under the same lock, which makes dataset
//! registration sequentially consistent with later reads of the id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use duckdb::{params_from_iter, Connection};
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::ident::{quote, Columns};
use crate::ingest::SourceFormat;
use crate::types::ScalarValue;
use crate::value::round4;
use crate::{Error, Result};

/// One registered dataset: the physical table plus display metadata.
#[derive(Debug, Clone)]
pub struct DatasetEntry {
    pub table: String,
    pub name: String,
    pub format: SourceFormat,
}

pub(crate) struct EngineInner {
    pub(crate) conn: Connection,
    pub(crate) datasets: HashMap<String, DatasetEntry>,
}

impl EngineInner {
    /// Look up a dataset entry by id.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids.
    pub(crate) fn entry(&self, dataset_id: &str) -> Result<&DatasetEntry> {
        self.datasets
            .get(dataset_id)
            .ok_or_else(|| Error::not_found(format!("Dataset not found: {dataset_id}")))
    }

    /// Column registry for a dataset's table.
    pub(crate) fn columns(&self, table: &str) -> Result<Columns> {
        Columns::from_table(&self.conn, table)
    }
}

/// Resource-bearing handle around the embedded SQL engine.
///
/// Cheap to share behind an `Arc`; all methods take `&self` and serialize
/// internally.
pub struct Engine {
    inner: Mutex<EngineInner>,
}

impl Engine {
    /// Open an in-memory engine with an empty registry.
    ///
    /// # Errors
    /// Returns an error if the embedded database cannot be opened.
    pub fn new() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            inner: Mutex::new(EngineInner {
                conn,
                datasets: HashMap::new(),
            }),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Display name of a dataset, for download filenames.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids.
    pub fn dataset_name(&self, dataset_id: &str) -> Result<String> {
        Ok(self.lock().entry(dataset_id)?.name.clone())
    }

    /// Execute user SQL against a dataset through a temporary `data` view.
    ///
    /// The view is bound and dropped inside the engine lock so no other
    /// request can observe `data` pointing at a different table. The SQL
    /// passes through unmodified; this assumes a single-tenant deployment.
    ///
    /// # Errors
    /// `NotFound` for unknown datasets; engine rejections surface as
    /// `InvalidRequest`.
    pub fn run_query(&self, dataset_id: &str, sql: &str) -> Result<QueryResponse> {
        let started = Instant::now();
        let inner = self.lock();
        let table_sql = quote(&inner.entry(dataset_id)?.table);

        inner.conn.execute_batch(&format!(
            "CREATE OR REPLACE VIEW data AS SELECT * FROM {table_sql}"
        ))?;
        let result = collect_rows(&inner.conn, sql, &[]);
        let _ = inner.conn.execute_batch("DROP VIEW IF EXISTS data");
        let (columns, rows) = result?;

        Ok(QueryResponse {
            row_count: rows.len(),
            columns,
            rows,
            execution_time: round4(started.elapsed().as_secs_f64()),
        })
    }
}

/// Result of a raw SQL execution.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub columns: Vec<String>,
    pub rows: Vec<JsonMap<String, JsonValue>>,
    pub row_count: usize,
    pub execution_time: f64,
}

/// Generate a fresh 12-hex-char dataset id.
pub(crate) fn new_dataset_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..12].to_string()
}

/// Run a parameterized query and materialize every row as a JSON object.
///
/// Statements that produce no result set come back with empty columns and
/// rows rather than failing.
pub(crate) fn collect_rows(
    conn: &Connection,
    sql: &str,
    params: &[ScalarValue],
) -> Result<(Vec<String>, Vec<JsonMap<String, JsonValue>>)> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows_iter = stmt.query(params_from_iter(params.iter()))?;

    let column_count = rows_iter
        .as_ref()
        .map_or(0, duckdb::Statement::column_count);
    let columns: Vec<String> = (0..column_count)
        .map(|i| {
            rows_iter
                .as_ref()
                .and_then(|s| s.column_name(i).ok())
                .map_or_else(|| "?".to_string(), String::clone)
        })
        .collect();

    let mut rows = Vec::new();
    while let Some(row) = rows_iter.next()? {
        let mut record = JsonMap::with_capacity(column_count);
        for (i, col) in columns.iter().enumerate() {
            record.insert(col.clone(), crate::value::json_value(&row.get_ref(i)?));
        }
        rows.push(record);
    }
    Ok((columns, rows))
}

/// Run a parameterized `SELECT COUNT(*)`-shaped query returning one i64.
pub(crate) fn count_query(conn: &Connection, sql: &str, params: &[ScalarValue]) -> Result<i64> {
    let n = conn.query_row(sql, params_from_iter(params.iter()), |row| row.get(0))?;
    Ok(n)
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::io::Write;

    use super::Engine;
    use crate::ingest::SourceFormat;

    /// Ingest an inline CSV through the real loader and return the id.
    pub(crate) fn engine_with_csv(csv: &str) -> (Engine, String) {
        let engine = Engine::new().unwrap();
        let id = load_csv(&engine, csv, "sample.csv");
        (engine, id)
    }

    pub(crate) fn load_csv(engine: &Engine, csv: &str, name: &str) -> String {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(csv.as_bytes()).unwrap();
        file.flush().unwrap();
        engine
            .load_file(file.path(), name, SourceFormat::Csv, None)
            .unwrap()
    }

    /// Create a table directly and register it, for tests that need exact
    /// cell values the CSV sniffer would rewrite.
    pub(crate) fn engine_with_table(ddl: &str, table: &str, name: &str) -> (Engine, String) {
        let engine = Engine::new().unwrap();
        let id = {
            let mut inner = engine.lock();
            inner.conn.execute_batch(ddl).unwrap();
            let id = super::new_dataset_id();
            inner.datasets.insert(
                id.clone(),
                super::DatasetEntry {
                    table: table.to_string(),
                    name: name.to_string(),
                    format: SourceFormat::Csv,
                },
            );
            id
        };
        (engine, id)
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::engine_with_csv;
    use super::*;

    #[test]
    fn test_new_dataset_id_shape() {
        let id = new_dataset_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_dataset_id());
    }

    #[test]
    fn test_unknown_dataset_is_not_found() {
        let engine = Engine::new().unwrap();
        let err = engine.run_query("nope", "SELECT 1").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("Dataset not found: nope"));
    }

    #[test]
    fn test_run_query_binds_data_view() {
        let (engine, id) = engine_with_csv("region,amount\nWest,10\nEast,20\nWest,5\n");
        let result = engine
            .run_query(&id, "SELECT COUNT(*) AS n FROM data")
            .unwrap();
        assert_eq!(result.columns, vec!["n"]);
        assert_eq!(result.rows[0]["n"], serde_json::json!(3));
        assert_eq!(result.row_count, 1);

        // The view must be gone once the call returns.
        let inner = engine.lock();
        let err = inner.conn.prepare("SELECT * FROM data").map(|_| ());
        assert!(err.is_err());
    }

    #[test]
    fn test_run_query_non_select_statement_succeeds() {
        let (engine, id) = engine_with_csv("a,b\n1,2\n");
        let result = engine
            .run_query(&id, "CREATE OR REPLACE TEMP TABLE tmp_nonselect AS SELECT 1 AS n")
            .unwrap();
        assert_eq!(result.row_count, result.rows.len());
    }

    #[test]
    fn test_run_query_bad_sql_is_invalid_request() {
        let (engine, id) = engine_with_csv("a,b\n1,2\n");
        let err = engine.run_query(&id, "SELECT definitely broken FROM").unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
