//! File ingestion: format detection, entity discovery, per-format loaders,
//! and the bounded import-session store for two-phase imports.
//!
//! CSV and Parquet load through the engine's own readers. Excel sheets and
//! SQLite tables are copied row-by-row into a typed table, since those
//! formats carry multiple entities and need discovery first.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use calamine::{open_workbook_auto, Data, Reader};
use duckdb::types::{ToSql, ToSqlOutput, Value};
use duckdb::{params, params_from_iter, Connection};
use lru::LruCache;
use serde::Serialize;

use crate::engine::{new_dataset_id, DatasetEntry, Engine};
use crate::ident::quote;
use crate::{Error, Result};

const SESSION_CAPACITY: usize = 64;
const SESSION_TTL: Duration = Duration::from_secs(3600);

/// Ingestion source format, decided by the upload suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Parquet,
    Excel,
    Sqlite,
}

impl SourceFormat {
    /// Map a filename suffix to a format. The allow-list is exactly
    /// `.csv`, `.parquet`, `.xlsx`, `.sqlite`, `.db`.
    pub fn from_filename(name: &str) -> Option<Self> {
        let suffix = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())?
            .to_lowercase();
        match suffix.as_str() {
            "csv" => Some(Self::Csv),
            "parquet" => Some(Self::Parquet),
            "xlsx" => Some(Self::Excel),
            "sqlite" | "db" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Multi-entity formats require the discover/import flow.
    pub const fn requires_selection(self) -> bool {
        matches!(self, Self::Excel | Self::Sqlite)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
            Self::Excel => "excel",
            Self::Sqlite => "sqlite",
        }
    }
}

/// One loadable unit within a file.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub name: String,
}

impl Engine {
    /// List the entities a file offers: the synthetic `data` entity for
    /// single-table formats, sheets for Excel, tables for SQLite.
    ///
    /// # Errors
    /// `InvalidRequest` when the file cannot be opened as its format.
    pub fn discover_entities(&self, path: &Path, format: SourceFormat) -> Result<Vec<Entity>> {
        match format {
            SourceFormat::Csv | SourceFormat::Parquet => Ok(vec![Entity {
                name: "data".to_string(),
            }]),
            SourceFormat::Excel => {
                let workbook = open_workbook_auto(path).map_err(|e| {
                    Error::invalid(format!("Failed to open Excel workbook: {e}"))
                })?;
                Ok(workbook
                    .sheet_names()
                    .into_iter()
                    .map(|name| Entity { name })
                    .collect())
            }
            SourceFormat::Sqlite => Ok(sqlite_tables(path)?
                .into_iter()
                .map(|name| Entity { name })
                .collect()),
        }
    }

    /// Load one file (or one entity of a multi-entity file) into a fresh
    /// table and register it under a new dataset id.
    ///
    /// # Errors
    /// `InvalidRequest` when the reader rejects the file or the entity is
    /// missing.
    pub fn load_file(
        &self,
        path: &Path,
        name: &str,
        format: SourceFormat,
        entity: Option<&str>,
    ) -> Result<String> {
        let dataset_id = new_dataset_id();
        let table = format!("ds_{dataset_id}");
        let table_sql = quote(&table);
        let path_str = path.to_string_lossy().into_owned();

        let mut inner = self.lock();
        match format {
            SourceFormat::Csv => {
                inner
                    .conn
                    .execute(
                        &format!(
                            "CREATE TABLE {table_sql} AS SELECT * FROM \
                             read_csv_auto(?, header=true, all_varchar=false)"
                        ),
                        params![path_str],
                    )
                    .map_err(|e| Error::invalid(format!("Failed to load file: {e}")))?;
            }
            SourceFormat::Parquet => {
                inner
                    .conn
                    .execute(
                        &format!("CREATE TABLE {table_sql} AS SELECT * FROM read_parquet(?)"),
                        params![path_str],
                    )
                    .map_err(|e| Error::invalid(format!("Failed to load file: {e}")))?;
            }
            SourceFormat::Excel => {
                let sheet = entity.ok_or_else(|| {
                    Error::invalid("An entity (sheet name) is required for Excel imports")
                })?;
                load_excel_sheet(&inner.conn, &table_sql, path, sheet)?;
            }
            SourceFormat::Sqlite => {
                let src_table = entity.ok_or_else(|| {
                    Error::invalid("An entity (table name) is required for SQLite imports")
                })?;
                load_sqlite_table(&inner.conn, &table_sql, path, src_table)?;
            }
        }

        inner.datasets.insert(
            dataset_id.clone(),
            DatasetEntry {
                table,
                name: name.to_string(),
                format,
            },
        );
        tracing::info!(dataset_id = %dataset_id, name, format = format.as_str(), "dataset loaded");
        Ok(dataset_id)
    }
}

/// A bind parameter for row-by-row copies.
#[derive(Debug, Clone)]
enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ToSql for CellValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Bool(b) => ToSqlOutput::Owned(Value::Boolean(*b)),
            Self::Int(i) => ToSqlOutput::Owned(Value::BigInt(*i)),
            Self::Float(f) => ToSqlOutput::Owned(Value::Double(*f)),
            Self::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
        })
    }
}

fn load_excel_sheet(conn: &Connection, table_sql: &str, path: &Path, sheet: &str) -> Result<()> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| Error::invalid(format!("Failed to open Excel workbook: {e}")))?;
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| Error::invalid(format!("Failed to read sheet '{sheet}': {e}")))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Err(Error::invalid(format!("Sheet '{sheet}' has no header row")));
    };
    let names: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let label = excel_text(cell);
            if label.is_empty() {
                format!("column_{i}")
            } else {
                label
            }
        })
        .collect();

    let data: Vec<&[Data]> = rows.collect();
    let types: Vec<&'static str> = (0..names.len())
        .map(|i| infer_excel_type(data.iter().map(|row| row.get(i).unwrap_or(&Data::Empty))))
        .collect();

    let col_defs: Vec<String> = names
        .iter()
        .zip(&types)
        .map(|(name, ty)| format!("{} {ty}", quote(name)))
        .collect();
    conn.execute_batch(&format!(
        "CREATE TABLE {table_sql} ({})",
        col_defs.join(", ")
    ))?;

    let placeholders = vec!["?"; names.len()].join(", ");
    let mut stmt = conn.prepare(&format!("INSERT INTO {table_sql} VALUES ({placeholders})"))?;
    for row in data {
        let cells: Vec<CellValue> = (0..names.len())
            .map(|i| excel_cell(row.get(i).unwrap_or(&Data::Empty)))
            .collect();
        stmt.execute(params_from_iter(cells.iter()))?;
    }
    Ok(())
}

fn excel_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn infer_excel_type<'a>(cells: impl Iterator<Item = &'a Data>) -> &'static str {
    let mut has_int = false;
    let mut has_float = false;
    let mut has_bool = false;
    let mut has_datetime = false;
    for cell in cells {
        match cell {
            Data::Int(_) => has_int = true,
            Data::Float(_) => has_float = true,
            Data::Bool(_) => has_bool = true,
            Data::DateTime(_) | Data::DateTimeIso(_) => has_datetime = true,
            Data::Empty => {}
            _ => return "VARCHAR",
        }
    }
    if has_datetime && !(has_int || has_float || has_bool) {
        "TIMESTAMP"
    } else if has_bool && !(has_int || has_float || has_datetime) {
        "BOOLEAN"
    } else if has_float {
        "DOUBLE"
    } else if has_int {
        "BIGINT"
    } else {
        "VARCHAR"
    }
}

fn excel_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Null,
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::DateTime(dt) => dt.as_datetime().map_or(CellValue::Null, |naive| {
            CellValue::Text(naive.format("%Y-%m-%d %H:%M:%S").to_string())
        }),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

fn open_sqlite(path: &Path) -> Result<rusqlite::Connection> {
    rusqlite::Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| Error::invalid(format!("Failed to open SQLite database: {e}")))
}

fn sqlite_tables(path: &Path) -> Result<Vec<String>> {
    let src = open_sqlite(path)?;
    let mut stmt = src.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

fn sqlite_decl_to_duck(decl: &str) -> &'static str {
    let upper = decl.to_uppercase();
    if upper.contains("BOOL") {
        "BOOLEAN"
    } else if upper.contains("INT") {
        "BIGINT"
    } else if ["REAL", "FLOA", "DOUB", "NUMERIC", "DECIMAL"]
        .iter()
        .any(|t| upper.contains(t))
    {
        "DOUBLE"
    } else {
        "VARCHAR"
    }
}

fn load_sqlite_table(
    conn: &Connection,
    table_sql: &str,
    path: &Path,
    src_table: &str,
) -> Result<()> {
    let src = open_sqlite(path)?;

    let mut stmt = src.prepare(&format!("PRAGMA table_info({})", quote(src_table)))?;
    let cols = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
    if cols.is_empty() {
        return Err(Error::invalid(format!(
            "Table '{src_table}' not found in SQLite database"
        )));
    }

    let types: Vec<&'static str> = cols
        .iter()
        .map(|(_, decl)| sqlite_decl_to_duck(decl))
        .collect();
    let col_defs: Vec<String> = cols
        .iter()
        .zip(&types)
        .map(|((name, _), ty)| format!("{} {ty}", quote(name)))
        .collect();
    conn.execute_batch(&format!(
        "CREATE TABLE {table_sql} ({})",
        col_defs.join(", ")
    ))?;

    let placeholders = vec!["?"; cols.len()].join(", ");
    let mut insert =
        conn.prepare(&format!("INSERT INTO {table_sql} VALUES ({placeholders})"))?;
    let mut select = src.prepare(&format!("SELECT * FROM {}", quote(src_table)))?;
    let mut rows = select.query([])?;
    while let Some(row) = rows.next()? {
        let cells: Vec<CellValue> = (0..cols.len())
            .map(|i| sqlite_cell(row.get_ref(i), types[i]))
            .collect();
        insert.execute(params_from_iter(cells.iter()))?;
    }
    Ok(())
}

fn sqlite_cell(
    value: rusqlite::Result<rusqlite::types::ValueRef<'_>>,
    target_type: &str,
) -> CellValue {
    use rusqlite::types::ValueRef;
    match value {
        Ok(ValueRef::Null) | Err(_) => CellValue::Null,
        Ok(ValueRef::Integer(i)) => {
            if target_type == "BOOLEAN" {
                CellValue::Bool(i != 0)
            } else {
                CellValue::Int(i)
            }
        }
        Ok(ValueRef::Real(f)) => CellValue::Float(f),
        Ok(ValueRef::Text(bytes)) => {
            CellValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
        Ok(ValueRef::Blob(bytes)) => CellValue::Text(format!("<{} bytes>", bytes.len())),
    }
}

/// One pending two-phase import.
#[derive(Debug, Clone)]
pub struct ImportSession {
    pub path: PathBuf,
    pub name: String,
    pub format: SourceFormat,
    pub entities: Vec<String>,
    created_at: Instant,
}

impl ImportSession {
    pub fn new(path: PathBuf, name: String, format: SourceFormat, entities: Vec<String>) -> Self {
        Self {
            path,
            name,
            format,
            entities,
            created_at: Instant::now(),
        }
    }
}

/// Bounded LRU store of import sessions with a TTL, so abandoned sessions
/// cannot grow without limit.
pub struct ImportSessions {
    cache: Mutex<LruCache<String, ImportSession>>,
    ttl: Duration,
}

impl ImportSessions {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SESSION_CAPACITY, SESSION_TTL)
    }

    /// Store a session and return its import id.
    pub fn insert(&self, session: ImportSession) -> String {
        let import_id = uuid::Uuid::new_v4().simple().to_string();
        self.lock().put(import_id.clone(), session);
        import_id
    }

    /// Fetch a live session; expired sessions are dropped on access.
    pub fn get(&self, import_id: &str) -> Option<ImportSession> {
        let mut cache = self.lock();
        let hit = cache.get(import_id).cloned();
        match hit {
            Some(session) if session.created_at.elapsed() < self.ttl => Some(session),
            Some(_) => {
                cache.pop(import_id);
                None
            }
            None => None,
        }
    }

    /// Consume a session after a successful import.
    pub fn remove(&self, import_id: &str) {
        self.lock().pop(import_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, ImportSession>> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(name: &str) -> ImportSession {
        ImportSession::new(
            PathBuf::from("/tmp/x.sqlite"),
            name.to_string(),
            SourceFormat::Sqlite,
            vec!["t".to_string()],
        )
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(SourceFormat::from_filename("a.csv"), Some(SourceFormat::Csv));
        assert_eq!(
            SourceFormat::from_filename("a.PARQUET"),
            Some(SourceFormat::Parquet)
        );
        assert_eq!(
            SourceFormat::from_filename("book.xlsx"),
            Some(SourceFormat::Excel)
        );
        assert_eq!(
            SourceFormat::from_filename("data.db"),
            Some(SourceFormat::Sqlite)
        );
        assert_eq!(SourceFormat::from_filename("notes.txt"), None);
        assert_eq!(SourceFormat::from_filename("no_suffix"), None);
    }

    #[test]
    fn test_requires_selection() {
        assert!(!SourceFormat::Csv.requires_selection());
        assert!(!SourceFormat::Parquet.requires_selection());
        assert!(SourceFormat::Excel.requires_selection());
        assert!(SourceFormat::Sqlite.requires_selection());
    }

    #[test]
    fn test_discover_single_entity_formats() {
        let engine = Engine::new().unwrap();
        let entities = engine
            .discover_entities(Path::new("/tmp/whatever.csv"), SourceFormat::Csv)
            .unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "data");
    }

    #[test]
    fn test_sqlite_discovery_and_import() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fixture.sqlite");
        {
            let src = rusqlite::Connection::open(&db_path).unwrap();
            src.execute_batch(
                "CREATE TABLE orders (id INTEGER, amount REAL, note TEXT, paid BOOLEAN); \
                 INSERT INTO orders VALUES (1, 9.5, 'first', 1), (2, 1.25, NULL, 0); \
                 CREATE TABLE customers (id INTEGER, name TEXT); \
                 INSERT INTO customers VALUES (7, 'Ada');",
            )
            .unwrap();
        }

        let engine = Engine::new().unwrap();
        let entities = engine
            .discover_entities(&db_path, SourceFormat::Sqlite)
            .unwrap();
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["customers", "orders"]);

        let id = engine
            .load_file(&db_path, "fixture_orders", SourceFormat::Sqlite, Some("orders"))
            .unwrap();
        let schema = engine.get_schema(&id).unwrap();
        assert_eq!(schema.row_count, 2);

        let result = engine
            .run_query(&id, "SELECT * FROM data ORDER BY id")
            .unwrap();
        assert_eq!(result.rows[0]["amount"], serde_json::json!(9.5));
        assert_eq!(result.rows[0]["paid"], serde_json::json!(true));
        assert_eq!(result.rows[1]["note"], serde_json::Value::Null);
    }

    #[test]
    fn test_sqlite_unknown_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fixture.sqlite");
        rusqlite::Connection::open(&db_path)
            .unwrap()
            .execute_batch("CREATE TABLE t (a INTEGER);")
            .unwrap();

        let engine = Engine::new().unwrap();
        let err = engine
            .load_file(&db_path, "x", SourceFormat::Sqlite, Some("missing"))
            .unwrap_err();
        assert!(err.to_string().contains("not found in SQLite database"));
    }

    #[test]
    fn test_parquet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        let engine = Engine::new().unwrap();
        engine
            .lock()
            .conn
            .execute_batch(&format!(
                "COPY (SELECT * FROM (VALUES (1, 'a'), (2, 'b')) t(id, g)) \
                 TO '{}' (FORMAT PARQUET)",
                path.display()
            ))
            .unwrap();

        let id = engine
            .load_file(&path, "t.parquet", SourceFormat::Parquet, None)
            .unwrap();
        assert_eq!(engine.get_schema(&id).unwrap().row_count, 2);
    }

    #[test]
    fn test_sessions_expire_and_evict() {
        let sessions = ImportSessions::new(2, Duration::from_secs(3600));
        let a = sessions.insert(session("a"));
        let b = sessions.insert(session("b"));
        let c = sessions.insert(session("c"));
        // Capacity two: the oldest entry fell out.
        assert!(sessions.get(&a).is_none());
        assert!(sessions.get(&b).is_some());
        assert!(sessions.get(&c).is_some());

        sessions.remove(&b);
        assert!(sessions.get(&b).is_none());

        let expired = ImportSessions::new(4, Duration::ZERO);
        let d = expired.insert(session("d"));
        assert!(expired.get(&d).is_none());
    }

    #[test]
    fn test_excel_type_inference() {
        let ints = [Data::Int(1), Data::Empty, Data::Int(3)];
        assert_eq!(infer_excel_type(ints.iter()), "BIGINT");

        let mixed = [Data::Int(1), Data::Float(2.5)];
        assert_eq!(infer_excel_type(mixed.iter()), "DOUBLE");

        let strings = [Data::Int(1), Data::String("x".to_string())];
        assert_eq!(infer_excel_type(strings.iter()), "VARCHAR");

        let bools = [Data::Bool(true), Data::Empty];
        assert_eq!(infer_excel_type(bools.iter()), "BOOLEAN");
    }
}
