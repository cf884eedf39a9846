//! Schema reporting: per-column counts plus 8-bucket sparklines computed
//! from a bounded sample.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use duckdb::Connection;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::engine::{collect_rows, count_query, Engine};
use crate::ident::{quote, Columns};
use crate::types::SemanticType;
use crate::Result;

const SPARKLINE_BINS: usize = 8;
const SPARKLINE_SAMPLE_ROWS: i64 = 2000;

/// Schema of one dataset.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaResponse {
    pub columns: Vec<SchemaColumn>,
    pub row_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    pub null_count: i64,
    pub total_count: i64,
    pub unique_count: i64,
    pub sparkline: Vec<i64>,
}

impl Engine {
    /// Column names, types, null/unique counts, row count, and sparklines.
    ///
    /// # Errors
    /// `NotFound` for unknown datasets.
    pub fn get_schema(&self, dataset_id: &str) -> Result<SchemaResponse> {
        let inner = self.lock();
        let entry = inner.entry(dataset_id)?;
        let table_sql = quote(&entry.table);
        let columns = inner.columns(&entry.table)?;

        let row_count = count_query(
            &inner.conn,
            &format!("SELECT COUNT(*) FROM {table_sql}"),
            &[],
        )?;
        let sparklines = build_sparklines(&inner.conn, &table_sql, &columns, row_count)?;

        let mut out = Vec::with_capacity(columns.len());
        for info in &columns {
            let col_sql = quote(&info.name);
            let (null_count, unique_count) = inner.conn.query_row(
                &format!(
                    "SELECT COUNT(*) FILTER (WHERE {col_sql} IS NULL), \
                     COUNT(DISTINCT {col_sql}) FROM {table_sql}"
                ),
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )?;

            out.push(SchemaColumn {
                name: info.name.clone(),
                semantic_type: info.semantic_type,
                null_count,
                total_count: row_count,
                unique_count,
                sparkline: sparklines.get(&info.name).cloned().unwrap_or_default(),
            });
        }

        Ok(SchemaResponse {
            columns: out,
            row_count,
        })
    }
}

fn build_sparklines(
    conn: &Connection,
    table_sql: &str,
    columns: &Columns,
    row_count: i64,
) -> Result<HashMap<String, Vec<i64>>> {
    let mut sparklines: HashMap<String, Vec<i64>> = columns
        .iter()
        .map(|c| (c.name.clone(), Vec::new()))
        .collect();
    if row_count <= 0 || columns.is_empty() {
        return Ok(sparklines);
    }

    let sample_size = SPARKLINE_SAMPLE_ROWS.min(row_count);
    let sample_sql = if row_count > sample_size {
        format!("SELECT * FROM {table_sql} USING SAMPLE {sample_size} ROWS")
    } else {
        format!("SELECT * FROM {table_sql} LIMIT {sample_size}")
    };
    let (_, rows) = collect_rows(conn, &sample_sql, &[])?;
    if rows.is_empty() {
        return Ok(sparklines);
    }

    for info in columns {
        let values: Vec<&JsonValue> = rows
            .iter()
            .filter_map(|row| row.get(&info.name))
            .filter(|v| !v.is_null())
            .collect();
        sparklines.insert(info.name.clone(), compute_sparkline(&values, info.semantic_type));
    }
    Ok(sparklines)
}

fn compute_sparkline(values: &[&JsonValue], semantic_type: SemanticType) -> Vec<i64> {
    if values.is_empty() {
        return Vec::new();
    }

    match semantic_type {
        SemanticType::Integer | SemanticType::Float => {
            let numeric: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            frequencies_or_bins(&numeric)
        }
        SemanticType::Date => {
            let stamps: Vec<f64> = values
                .iter()
                .filter_map(|v| v.as_str().and_then(parse_epoch_seconds))
                .collect();
            frequencies_or_bins(&stamps)
        }
        SemanticType::Boolean => {
            let true_count = values.iter().filter(|v| v.as_bool() == Some(true)).count();
            vec![
                (values.len() - true_count) as i64,
                true_count as i64,
            ]
        }
        SemanticType::String => {
            let mut counts: HashMap<String, i64> = HashMap::new();
            for v in values {
                let key = v.as_str().map_or_else(|| v.to_string(), str::to_string);
                *counts.entry(key).or_insert(0) += 1;
            }
            if counts.len() <= SPARKLINE_BINS {
                let mut keys: Vec<&String> = counts.keys().collect();
                keys.sort();
                keys.iter().map(|k| counts[k.as_str()]).collect()
            } else {
                let mut ordered: Vec<i64> = counts.into_values().collect();
                ordered.sort_unstable_by(|a, b| b.cmp(a));
                ordered.truncate(SPARKLINE_BINS);
                ordered
            }
        }
    }
}

/// Exact frequencies when there are at most 8 distinct values, equal-width
/// bins otherwise.
fn frequencies_or_bins(values: &[f64]) -> Vec<i64> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut unique = values.to_vec();
    unique.sort_by(f64::total_cmp);
    unique.dedup();

    if unique.len() <= SPARKLINE_BINS {
        return unique
            .iter()
            .map(|&u| values.iter().filter(|&&v| v == u).count() as i64)
            .collect();
    }
    bin_numeric(values, SPARKLINE_BINS)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn bin_numeric(values: &[f64], bins: usize) -> Vec<i64> {
    let Some(lo) = values.iter().copied().min_by(f64::total_cmp) else {
        return Vec::new();
    };
    let hi = values
        .iter()
        .copied()
        .max_by(f64::total_cmp)
        .unwrap_or(lo);
    let mut out = vec![0i64; bins];
    if (hi - lo).abs() < f64::EPSILON {
        out[bins / 2] = values.len() as i64;
        return out;
    }

    let width = (hi - lo) / bins as f64;
    for v in values {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        out[idx] += 1;
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn parse_epoch_seconds(s: &str) -> Option<f64> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|dt| dt.and_utc().timestamp() as f64)
}
