//! Filter compilation: one filter object in, a parameterized predicate
//! fragment out.

use crate::ident::{coerce, quote, Columns};
use crate::types::{Filter, FilterOp, ScalarValue, SemanticType};
use crate::{Error, Result};

/// Operators allowed per semantic type.
const fn allowed_operators(semantic_type: SemanticType) -> &'static [FilterOp] {
    use FilterOp::{
        Contains, EndsWith, Eq, Ge, Gt, IsNotNull, IsNull, Le, Lt, Ne, StartsWith,
    };
    match semantic_type {
        SemanticType::String => &[
            Eq, Ne, Contains, StartsWith, EndsWith, IsNull, IsNotNull,
        ],
        SemanticType::Integer | SemanticType::Float => {
            &[Eq, Ne, Gt, Lt, Ge, Le, IsNull, IsNotNull]
        }
        SemanticType::Date => &[Eq, Gt, Lt, Ge, Le, IsNull, IsNotNull],
        SemanticType::Boolean => &[Eq, Ne, IsNull, IsNotNull],
    }
}

/// Compile a single filter into a predicate fragment plus bind parameters.
///
/// # Errors
/// Returns `InvalidRequest` for an unknown column, an operator outside the
/// column's allowed set, or a value that fails coercion.
pub fn compile_filter(filter: &Filter, columns: &Columns) -> Result<(String, Vec<ScalarValue>)> {
    if filter.column.is_empty() {
        return Err(Error::invalid("Filter column is required"));
    }
    let Some(info) = columns.get(&filter.column) else {
        return Err(Error::invalid(format!(
            "Invalid filter column: {}",
            filter.column
        )));
    };

    let op = filter.operator;
    if !allowed_operators(info.semantic_type).contains(&op) {
        return Err(Error::invalid(format!(
            "Unsupported operator '{}' for column '{}' ({})",
            op.as_str(),
            filter.column,
            info.semantic_type
        )));
    }

    let col_sql = quote(&filter.column);
    if op.is_null_predicate() {
        let fragment = match op {
            FilterOp::IsNull => format!("{col_sql} IS NULL"),
            _ => format!("{col_sql} IS NOT NULL"),
        };
        return Ok((fragment, Vec::new()));
    }

    let value = coerce(
        &filter.value,
        info.semantic_type,
        &filter.column,
        op.as_str(),
    )?;

    let compiled = match op {
        FilterOp::Eq => (format!("{col_sql} = ?"), value),
        FilterOp::Ne => (format!("{col_sql} != ?"), value),
        FilterOp::Gt => (format!("{col_sql} > ?"), value),
        FilterOp::Lt => (format!("{col_sql} < ?"), value),
        FilterOp::Ge => (format!("{col_sql} >= ?"), value),
        FilterOp::Le => (format!("{col_sql} <= ?"), value),
        FilterOp::Contains => (
            format!("{col_sql} ILIKE ?"),
            like_pattern(&value, "%", "%"),
        ),
        FilterOp::StartsWith => (format!("{col_sql} ILIKE ?"), like_pattern(&value, "", "%")),
        FilterOp::EndsWith => (format!("{col_sql} ILIKE ?"), like_pattern(&value, "%", "")),
        FilterOp::IsNull | FilterOp::IsNotNull => unreachable!("handled above"),
    };

    Ok((compiled.0, vec![compiled.1]))
}

fn like_pattern(value: &ScalarValue, prefix: &str, suffix: &str) -> ScalarValue {
    let text = match value {
        ScalarValue::Text(s) => s.clone(),
        ScalarValue::Int(i) => i.to_string(),
        ScalarValue::Float(f) => f.to_string(),
        ScalarValue::Bool(b) => b.to_string(),
    };
    ScalarValue::Text(format!("{prefix}{text}{suffix}"))
}

/// Compile a list of filters into `AND`-able clauses plus their parameters.
///
/// # Errors
/// Fails on the first invalid filter.
pub fn compile_filters(
    filters: &[Filter],
    columns: &Columns,
) -> Result<(Vec<String>, Vec<ScalarValue>)> {
    let mut clauses = Vec::with_capacity(filters.len());
    let mut params = Vec::new();
    for filter in filters {
        let (clause, mut p) = compile_filter(filter, columns)?;
        clauses.push(clause);
        params.append(&mut p);
    }
    Ok((clauses, params))
}

/// Render compiled clauses as a `WHERE` fragment, empty when no filters.
pub fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}
