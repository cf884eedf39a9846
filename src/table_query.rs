//! Structured table queries: filters, grouping, aggregations, having,
//! sort, and limit compiled into one parameterized SELECT.
//!
//! Alongside the SQL, the compiler emits an equivalent pandas expression
//! string. That string is documentation for the client to display and
//! copy; the engine never executes it.

use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::engine::{collect_rows, Engine};
use crate::filter::{compile_filters, where_sql};
use crate::ident::{coerce, quote, Columns};
use crate::types::{
    AggOp, FilterOp, ScalarValue, SemanticType, SortDirection, TableQuerySpec,
};
use crate::{Error, Result};

const MAX_LIMIT: i64 = 10_000;

/// Result of a table query, including both generated expressions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableQueryResponse {
    pub columns: Vec<String>,
    pub rows: Vec<JsonMap<String, JsonValue>>,
    pub row_count: usize,
    pub generated_sql: String,
    pub generated_python: String,
}

impl Engine {
    /// Compile and execute a structured table-query spec.
    ///
    /// # Errors
    /// `NotFound` for unknown datasets; every validation failure is
    /// `InvalidRequest` with a message naming the offending part.
    pub fn run_table_query(
        &self,
        dataset_id: &str,
        spec: &TableQuerySpec,
    ) -> Result<TableQueryResponse> {
        if spec.limit < 1 || spec.limit > MAX_LIMIT {
            return Err(Error::invalid(format!(
                "limit must be an integer between 1 and {MAX_LIMIT}"
            )));
        }

        let inner = self.lock();
        let entry = inner.entry(dataset_id)?;
        let table_sql = quote(&entry.table);
        let columns = inner.columns(&entry.table)?;

        let (filter_clauses, filter_params) = compile_filters(&spec.filters, &columns)?;

        for col in &spec.group_by {
            if col.is_empty() {
                return Err(Error::invalid("groupBy must be an array of column names"));
            }
            if !columns.contains(col) {
                return Err(Error::invalid(format!("Invalid groupBy column: {col}")));
            }
        }

        let mut select_parts: Vec<String> =
            spec.group_by.iter().map(|c| quote(c)).collect();
        let alias_types = compile_aggregations(spec, &columns, &mut select_parts)?;
        let has_agg = !spec.aggregations.is_empty();

        let mut select_sql = if select_parts.is_empty() {
            "*".to_string()
        } else {
            select_parts.join(", ")
        };

        let group_cols = spec
            .group_by
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let group_sql = if !spec.group_by.is_empty() && has_agg {
            format!("GROUP BY {group_cols}")
        } else if !spec.group_by.is_empty() {
            // groupBy without aggregations is a DISTINCT projection.
            select_sql = group_cols.clone();
            format!("GROUP BY {group_cols}")
        } else {
            String::new()
        };

        let (having_sql, having_params) =
            compile_having(spec, has_agg, &alias_types)?;

        let order_sql = compile_order(spec, &columns, &alias_types)?;

        let sql = format!(
            "SELECT {select_sql} FROM {table_sql} {} {group_sql} {having_sql} {order_sql} LIMIT ?",
            where_sql(&filter_clauses)
        );

        let mut params = filter_params;
        params.extend(having_params);
        params.push(ScalarValue::Int(spec.limit));

        let (result_columns, rows) = collect_rows(&inner.conn, &sql, &params)?;

        Ok(TableQueryResponse {
            columns: result_columns,
            row_count: rows.len(),
            rows,
            generated_sql: sql,
            generated_python: python_repr(spec),
        })
    }
}

/// Validate aggregations, append their SELECT parts, and return the alias
/// registry (alias name and derived semantic type, in declaration order).
fn compile_aggregations(
    spec: &TableQuerySpec,
    columns: &Columns,
    select_parts: &mut Vec<String>,
) -> Result<Vec<(String, SemanticType)>> {
    let mut alias_types = Vec::with_capacity(spec.aggregations.len());

    for agg in &spec.aggregations {
        if agg.column.is_empty() {
            return Err(Error::invalid("Aggregation column is required"));
        }
        let is_star = agg.column == "*";
        if is_star && agg.op != AggOp::Count {
            return Err(Error::invalid(format!(
                "Aggregation column '*' is only valid with count, not {}",
                agg.op.as_str()
            )));
        }
        if !is_star && !columns.contains(&agg.column) {
            return Err(Error::invalid(format!(
                "Invalid aggregation column: {}",
                agg.column
            )));
        }
        if matches!(agg.op, AggOp::Sum | AggOp::Avg) {
            let semantic = columns.require(&agg.column)?.semantic_type;
            if !matches!(semantic, SemanticType::Integer | SemanticType::Float) {
                return Err(Error::invalid(format!(
                    "Aggregation {} requires numeric column: {}",
                    agg.op.as_str(),
                    agg.column
                )));
            }
        }

        let target = if is_star {
            "*".to_string()
        } else {
            quote(&agg.column)
        };
        let alias = agg.output_alias();
        select_parts.push(format!(
            "{}({target}) AS {}",
            agg.op.sql_name(),
            quote(&alias)
        ));

        let alias_type = match agg.op {
            AggOp::Count => SemanticType::Integer,
            AggOp::Avg => SemanticType::Float,
            _ if is_star => SemanticType::Float,
            _ => columns.require(&agg.column)?.semantic_type,
        };
        alias_types.push((alias, alias_type));
    }
    Ok(alias_types)
}

fn compile_having(
    spec: &TableQuerySpec,
    has_agg: bool,
    alias_types: &[(String, SemanticType)],
) -> Result<(String, Vec<ScalarValue>)> {
    if spec.having.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    if !has_agg {
        return Err(Error::invalid("HAVING requires at least one aggregation"));
    }
    if spec.group_by.is_empty() {
        return Err(Error::invalid("HAVING requires groupBy with aggregations"));
    }

    let mut clauses = Vec::with_capacity(spec.having.len());
    let mut params = Vec::with_capacity(spec.having.len());
    for item in &spec.having {
        if item.metric.is_empty() {
            return Err(Error::invalid("HAVING metric is required"));
        }
        let Some((_, metric_type)) = alias_types.iter().find(|(a, _)| *a == item.metric) else {
            return Err(Error::invalid(format!(
                "Invalid HAVING metric: {}",
                item.metric
            )));
        };
        let value = coerce(
            &item.value,
            *metric_type,
            &item.metric,
            item.operator.as_sql(),
        )?;
        clauses.push(format!("{} {} ?", quote(&item.metric), item.operator.as_sql()));
        params.push(value);
    }
    Ok((format!("HAVING {}", clauses.join(" AND ")), params))
}

fn compile_order(
    spec: &TableQuerySpec,
    columns: &Columns,
    alias_types: &[(String, SemanticType)],
) -> Result<String> {
    if spec.sort.is_empty() {
        return Ok(String::new());
    }

    let mut parts = Vec::with_capacity(spec.sort.len());
    for item in &spec.sort {
        if item.column.is_empty() {
            return Err(Error::invalid("Sort column is required"));
        }
        let known = columns.contains(&item.column)
            || alias_types.iter().any(|(a, _)| *a == item.column);
        if !known {
            return Err(Error::invalid(format!(
                "Invalid sort column: {}",
                item.column
            )));
        }
        parts.push(format!(
            "{} {} NULLS LAST",
            quote(&item.column),
            item.direction.as_sql()
        ));
    }
    Ok(format!("ORDER BY {}", parts.join(", ")))
}

/// Python repr of a string, single-quoted.
fn py_str(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t");
    format!("'{escaped}'")
}

/// Python repr of a JSON scalar.
fn py_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "None".to_string(),
        JsonValue::Bool(true) => "True".to_string(),
        JsonValue::Bool(false) => "False".to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => py_str(s),
        other => other.to_string(),
    }
}

fn py_str_list(items: &[String]) -> String {
    let rendered: Vec<String> = items.iter().map(|s| py_str(s)).collect();
    format!("[{}]", rendered.join(", "))
}

/// Build the equivalent pandas expression by structured concatenation.
fn python_repr(spec: &TableQuerySpec) -> String {
    let mut parts = vec!["df".to_string()];

    for f in &spec.filters {
        let col = py_str(&f.column);
        let val = py_value(&f.value);
        let part = match f.operator {
            FilterOp::IsNull => format!("[df[{col}].isna()]"),
            FilterOp::IsNotNull => format!("[df[{col}].notna()]"),
            FilterOp::Eq => format!("[df[{col}] == {val}]"),
            FilterOp::Ne => format!("[df[{col}] != {val}]"),
            FilterOp::Gt => format!("[df[{col}] > {val}]"),
            FilterOp::Lt => format!("[df[{col}] < {val}]"),
            FilterOp::Ge => format!("[df[{col}] >= {val}]"),
            FilterOp::Le => format!("[df[{col}] <= {val}]"),
            FilterOp::Contains => {
                format!("[df[{col}].astype(str).str.contains({val}, case=False, na=False)]")
            }
            FilterOp::StartsWith => {
                format!("[df[{col}].astype(str).str.startswith({val}, na=False)]")
            }
            FilterOp::EndsWith => {
                format!("[df[{col}].astype(str).str.endswith({val}, na=False)]")
            }
        };
        parts.push(part);
    }

    if !spec.aggregations.is_empty() {
        if spec.group_by.is_empty() {
            if let [agg] = spec.aggregations.as_slice() {
                if agg.column == "*" && agg.op == AggOp::Count {
                    parts.push(".shape[0]".to_string());
                } else {
                    parts.push(format!(
                        "[{}].{}()",
                        py_str(&agg.column),
                        agg.op.pandas_name()
                    ));
                }
            }
        } else {
            let chunks: Vec<String> = spec
                .aggregations
                .iter()
                .map(|agg| {
                    let col = if agg.column == "*" {
                        &spec.group_by[0]
                    } else {
                        &agg.column
                    };
                    format!(
                        "{}: ({}, {})",
                        py_str(&agg.output_alias()),
                        py_str(col),
                        py_str(agg.op.pandas_name())
                    )
                })
                .collect();
            parts.push(format!(
                ".groupby({}, dropna=False).agg({{{}}}).reset_index()",
                py_str_list(&spec.group_by),
                chunks.join(", ")
            ));

            if !spec.having.is_empty() {
                let query: Vec<String> = spec
                    .having
                    .iter()
                    .map(|h| {
                        format!(
                            "(`{}` {} {})",
                            h.metric,
                            h.operator.as_python(),
                            py_value(&h.value)
                        )
                    })
                    .collect();
                parts.push(format!(".query({})", py_str(&query.join(" and "))));
            }
        }
    }

    if !spec.sort.is_empty() {
        let cols: Vec<String> = spec.sort.iter().map(|s| s.column.clone()).collect();
        let ascending: Vec<String> = spec
            .sort
            .iter()
            .map(|s| {
                if s.direction == SortDirection::Desc {
                    "False".to_string()
                } else {
                    "True".to_string()
                }
            })
            .collect();
        parts.push(format!(
            ".sort_values({}, ascending=[{}])",
            py_str_list(&cols),
            ascending.join(", ")
        ));
    }

    parts.push(format!(".head({})", spec.limit));
    parts.concat()
}
