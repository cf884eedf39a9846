//! Identifier quoting, the column registry, and value coercion.
//!
//! Every identifier — table, column, alias — passes through [`quote`]
//! before it is composed into SQL; there is no other escaping mechanism.
//! Scalar values never appear in SQL text: [`coerce`] turns them into
//! [`ScalarValue`] bind parameters or fails with a precise message.

use chrono::NaiveDate;
use duckdb::Connection;
use serde_json::Value as JsonValue;

use crate::types::{map_storage_type, ScalarValue, SemanticType};
use crate::{Error, Result};

/// Quote an identifier for `DuckDB`, doubling embedded `"`.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// One column as reported by the engine catalog.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Original name, casing and spaces preserved.
    pub name: String,
    /// Engine-native type string, e.g. `DECIMAL(18,4)`.
    pub storage_type: String,
    pub semantic_type: SemanticType,
}

/// Column registry for one table, built on demand from `PRAGMA table_info`.
#[derive(Debug, Clone, Default)]
pub struct Columns {
    cols: Vec<ColumnInfo>,
}

impl Columns {
    /// Read the registry for `table` from the engine catalog.
    ///
    /// # Errors
    /// Returns an error if the catalog query fails.
    pub fn from_table(conn: &Connection, table: &str) -> Result<Self> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let mut rows = stmt.query([])?;

        let mut cols = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let storage_type: String = row.get(2)?;
            let semantic_type = map_storage_type(&storage_type);
            cols.push(ColumnInfo {
                name,
                storage_type,
                semantic_type,
            });
        }
        Ok(Self { cols })
    }

    pub fn get(&self, name: &str) -> Option<&ColumnInfo> {
        self.cols.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Look up a column, failing with `InvalidRequest` when absent.
    ///
    /// # Errors
    /// Returns `InvalidRequest` naming the column.
    pub fn require(&self, name: &str) -> Result<&ColumnInfo> {
        self.get(name)
            .ok_or_else(|| Error::invalid(format!("Unknown column: {name}")))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnInfo> {
        self.cols.iter()
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }
}

impl<'a> IntoIterator for &'a Columns {
    type Item = &'a ColumnInfo;
    type IntoIter = std::slice::Iter<'a, ColumnInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.cols.iter()
    }
}

/// Render a JSON scalar the way it should appear inside an error message.
fn display_json(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coerce a wire value to the column's semantic type.
///
/// Null-predicate operators never call this; a JSON `null` here means the
/// client omitted a required value.
///
/// # Errors
/// Returns `InvalidRequest` naming the column, operator, and value.
pub fn coerce(
    value: &JsonValue,
    semantic_type: SemanticType,
    column: &str,
    op: &str,
) -> Result<ScalarValue> {
    if value.is_null() {
        return Err(Error::invalid(format!(
            "Filter value is required for column '{column}' and operator '{op}'"
        )));
    }

    match semantic_type {
        SemanticType::Integer => coerce_integer(value, column),
        SemanticType::Float => coerce_float(value, column),
        SemanticType::Boolean => coerce_boolean(value, column),
        SemanticType::Date => coerce_date(value, column),
        SemanticType::String => Ok(ScalarValue::Text(display_json(value))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn coerce_integer(value: &JsonValue, column: &str) -> Result<ScalarValue> {
    let parsed = match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        JsonValue::String(s) => s.trim().parse::<i64>().ok(),
        JsonValue::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };
    parsed.map(ScalarValue::Int).ok_or_else(|| {
        Error::invalid(format!(
            "Invalid integer value for column '{column}': {}",
            display_json(value)
        ))
    })
}

fn coerce_float(value: &JsonValue, column: &str) -> Result<ScalarValue> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.map(ScalarValue::Float).ok_or_else(|| {
        Error::invalid(format!(
            "Invalid float value for column '{column}': {}",
            display_json(value)
        ))
    })
}

fn coerce_boolean(value: &JsonValue, column: &str) -> Result<ScalarValue> {
    let parsed = match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "y" => Some(true),
            "0" | "false" | "f" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed.map(ScalarValue::Bool).ok_or_else(|| {
        Error::invalid(format!(
            "Invalid boolean value for column '{column}': {}",
            display_json(value)
        ))
    })
}

fn coerce_date(value: &JsonValue, column: &str) -> Result<ScalarValue> {
    match value {
        JsonValue::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(|d| ScalarValue::Text(d.format("%Y-%m-%d").to_string()))
            .map_err(|_| {
                Error::invalid(format!(
                    "Invalid date value for column '{column}': {s}. Expected YYYY-MM-DD."
                ))
            }),
        other => Err(Error::invalid(format!(
            "Invalid date value for column '{column}': {}",
            display_json(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_doubles_embedded_quotes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("has space"), "\"has space\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_columns_from_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id BIGINT, \"unit price\" DECIMAL(18,4), note VARCHAR, sold DATE, ok BOOLEAN)",
        )
        .unwrap();

        let cols = Columns::from_table(&conn, "t").unwrap();
        assert_eq!(cols.len(), 5);
        assert_eq!(cols.get("id").unwrap().semantic_type, SemanticType::Integer);
        assert_eq!(
            cols.get("unit price").unwrap().semantic_type,
            SemanticType::Float
        );
        assert_eq!(cols.get("sold").unwrap().semantic_type, SemanticType::Date);
        assert_eq!(cols.get("ok").unwrap().semantic_type, SemanticType::Boolean);
        assert!(cols.get("missing").is_none());
        assert!(cols.require("missing").is_err());
    }

    #[test]
    fn test_coerce_integer() {
        assert_eq!(
            coerce(&json!(42), SemanticType::Integer, "q", ">").unwrap(),
            ScalarValue::Int(42)
        );
        assert_eq!(
            coerce(&json!(" 7 "), SemanticType::Integer, "q", ">").unwrap(),
            ScalarValue::Int(7)
        );
        let err = coerce(&json!("abc"), SemanticType::Integer, "quantity", ">").unwrap_err();
        assert!(err
            .to_string()
            .contains("Invalid integer value for column 'quantity': abc"));
    }

    #[test]
    fn test_coerce_float_and_boolean() {
        assert_eq!(
            coerce(&json!("3.5"), SemanticType::Float, "p", ">").unwrap(),
            ScalarValue::Float(3.5)
        );
        assert_eq!(
            coerce(&json!("Yes"), SemanticType::Boolean, "b", "=").unwrap(),
            ScalarValue::Bool(true)
        );
        assert_eq!(
            coerce(&json!("0"), SemanticType::Boolean, "b", "=").unwrap(),
            ScalarValue::Bool(false)
        );
        assert!(coerce(&json!("maybe"), SemanticType::Boolean, "b", "=").is_err());
    }

    #[test]
    fn test_coerce_date() {
        assert_eq!(
            coerce(&json!("2024-02-29"), SemanticType::Date, "d", ">=").unwrap(),
            ScalarValue::Text("2024-02-29".to_string())
        );
        let err = coerce(&json!("02/29/2024"), SemanticType::Date, "d", ">=").unwrap_err();
        assert!(err.to_string().contains("Expected YYYY-MM-DD"));
    }

    #[test]
    fn test_coerce_rejects_null() {
        let err = coerce(&JsonValue::Null, SemanticType::String, "note", "=").unwrap_err();
        assert!(err
            .to_string()
            .contains("Filter value is required for column 'note' and operator '='"));
    }
}
