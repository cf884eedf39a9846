//! Wire types shared by the query compilers and the HTTP boundary.
//!
//! Requests arrive as JSON; every operator is a tagged variant constructed
//! by a validating decoder, so the SQL-composition layer only ever branches
//! on enums. Scalar values travel to `DuckDB` exclusively as bind
//! parameters via [`ScalarValue`].

use std::fmt;
use std::str::FromStr;

use duckdb::types::{ToSql, ToSqlOutput, Value};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Engine-independent type tag used by the compilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Integer,
    Float,
    Date,
    Boolean,
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Date => "date",
            Self::Boolean => "boolean",
        };
        write!(f, "{s}")
    }
}

/// Map a `DuckDB` storage type string to the simplified type system.
///
/// Parenthesised suffixes (`DECIMAL(18,4)`) are stripped; unknown storage
/// types fall back to `string`.
pub fn map_storage_type(storage_type: &str) -> SemanticType {
    let upper = storage_type.to_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim().to_string();
    match base.as_str() {
        "BOOLEAN" => SemanticType::Boolean,
        "BIGINT" | "INTEGER" | "SMALLINT" | "TINYINT" | "HUGEINT" | "UBIGINT" | "UINTEGER"
        | "USMALLINT" | "UTINYINT" => SemanticType::Integer,
        "DOUBLE" | "FLOAT" | "DECIMAL" => SemanticType::Float,
        "DATE" | "TIMESTAMP" | "TIMESTAMP WITH TIME ZONE" => SemanticType::Date,
        _ => SemanticType::String,
    }
}

/// A coerced scalar bound into generated SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ToSql for ScalarValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Bool(b) => ToSqlOutput::Owned(Value::Boolean(*b)),
            Self::Int(i) => ToSqlOutput::Owned(Value::BigInt(*i)),
            Self::Float(f) => ToSqlOutput::Owned(Value::Double(*f)),
            Self::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
        })
    }
}

/// Filter operator, constrained per semantic type by the filter compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    /// The wire spelling of the operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
        }
    }

    /// Whether the operator ignores the filter value entirely.
    pub const fn is_null_predicate(self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl FromStr for FilterOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "=" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            "contains" => Self::Contains,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "is_null" => Self::IsNull,
            "is_not_null" => Self::IsNotNull,
            _ => return Err(()),
        })
    }
}

impl<'de> Deserialize<'de> for FilterOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|()| de::Error::custom(format!("Unsupported operator '{s}'")))
    }
}

/// One filter clause from the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOp,
    #[serde(default)]
    pub value: JsonValue,
}

/// Aggregation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// SQL function name.
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }

    /// Pandas reducer name for the generated expression string.
    pub const fn pandas_name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "mean",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl<'de> Deserialize<'de> for AggOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            _ => return Err(de::Error::custom(format!("Unsupported aggregation op: {s}"))),
        })
    }
}

/// One aggregation from a table-query spec.
#[derive(Debug, Clone, Deserialize)]
pub struct Aggregation {
    pub op: AggOp,
    pub column: String,
    #[serde(rename = "as", default)]
    pub alias: Option<String>,
}

impl Aggregation {
    /// The output alias: the explicit `as` when present and non-blank,
    /// otherwise `<op>_<column>` with `*` spelled `all`.
    pub fn output_alias(&self) -> String {
        match &self.alias {
            Some(a) if !a.trim().is_empty() => a.clone(),
            _ => format!("{}_{}", self.op.as_str(), self.column.replace('*', "all")),
        }
    }
}

/// Comparison operator allowed in HAVING clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HavingOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl HavingOp {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }

    /// Python spelling for the generated pandas `query(...)` string.
    pub const fn as_python(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }
}

impl<'de> Deserialize<'de> for HavingOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "=" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            _ => return Err(de::Error::custom(format!("Unsupported HAVING operator '{s}'"))),
        })
    }
}

/// One HAVING clause from a table-query spec.
#[derive(Debug, Clone, Deserialize)]
pub struct HavingItem {
    pub metric: String,
    pub operator: HavingOp,
    #[serde(default)]
    pub value: JsonValue,
}

/// Sort direction. Anything other than `desc` sorts ascending, matching the
/// permissive treatment of the original wire contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    pub const fn is_desc(self) -> bool {
        matches!(self, Self::Desc)
    }

    pub fn from_param(s: Option<&str>) -> Self {
        if s == Some("desc") { Self::Desc } else { Self::Asc }
    }
}

impl<'de> Deserialize<'de> for SortDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_param(Some(s.as_str())))
    }
}

/// One sort item from a table-query spec.
#[derive(Debug, Clone, Deserialize)]
pub struct SortItem {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Structured table-query request: filters, grouping, aggregations,
/// having, sort, and a row limit.
#[derive(Debug, Clone, Deserialize)]
pub struct TableQuerySpec {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(rename = "groupBy", default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub having: Vec<HavingItem>,
    #[serde(default)]
    pub sort: Vec<SortItem>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

const fn default_limit() -> i64 {
    200
}

impl Default for TableQuerySpec {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            group_by: Vec::new(),
            aggregations: Vec::new(),
            having: Vec::new(),
            sort: Vec::new(),
            limit: default_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_storage_type_strips_parameters() {
        assert_eq!(map_storage_type("DECIMAL(18,4)"), SemanticType::Float);
        assert_eq!(map_storage_type("VARCHAR"), SemanticType::String);
        assert_eq!(map_storage_type("varchar"), SemanticType::String);
        assert_eq!(map_storage_type("HUGEINT"), SemanticType::Integer);
        assert_eq!(map_storage_type("TIMESTAMP"), SemanticType::Date);
        assert_eq!(map_storage_type("SOMETHING ODD"), SemanticType::String);
    }

    #[test]
    fn test_filter_op_round_trips_wire_spelling() {
        for op in [
            FilterOp::Eq,
            FilterOp::Ne,
            FilterOp::Gt,
            FilterOp::Contains,
            FilterOp::StartsWith,
            FilterOp::EndsWith,
            FilterOp::IsNull,
            FilterOp::IsNotNull,
        ] {
            assert_eq!(op.as_str().parse::<FilterOp>(), Ok(op));
        }
    }

    #[test]
    fn test_unknown_operator_is_rejected_with_message() {
        let err = serde_json::from_value::<Filter>(serde_json::json!({
            "column": "region",
            "operator": "bogus",
            "value": "West"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Unsupported operator 'bogus'"));
    }

    #[test]
    fn test_aggregation_alias_defaults() {
        let agg = Aggregation {
            op: AggOp::Count,
            column: "*".to_string(),
            alias: None,
        };
        assert_eq!(agg.output_alias(), "count_all");

        let agg = Aggregation {
            op: AggOp::Sum,
            column: "amount".to_string(),
            alias: Some("  ".to_string()),
        };
        assert_eq!(agg.output_alias(), "sum_amount");
    }

    #[test]
    fn test_sort_direction_is_lenient() {
        assert_eq!(SortDirection::from_param(Some("desc")), SortDirection::Desc);
        assert_eq!(SortDirection::from_param(Some("DESC")), SortDirection::Asc);
        assert_eq!(SortDirection::from_param(None), SortDirection::Asc);
    }

    #[test]
    fn test_table_query_spec_defaults() {
        let spec: TableQuerySpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(spec.filters.is_empty());
        assert!(spec.group_by.is_empty());
        assert_eq!(spec.limit, 200);
    }
}
