//! Per-column profiling: statistics, histograms, top values, pattern
//! classes, and data-quality rates.
//!
//! Tables at or under one million rows are profiled in full; larger tables
//! are profiled over a uniform sample of that size and flagged `sampled`.

use duckdb::{params_from_iter, Connection};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::engine::{count_query, Engine};
use crate::ident::quote;
use crate::types::{ScalarValue, SemanticType};
use crate::value::{json_value, safe_number};
use crate::{Error, Result};

const PROFILE_FULL_ROW_LIMIT: i64 = 1_000_000;
const HISTOGRAM_BINS: i64 = 20;
const TOP_VALUES_LIMIT: i64 = 10;

/// A profile report is a JSON object whose stats block varies by type.
pub type ProfileReport = JsonMap<String, JsonValue>;

impl Engine {
    /// Profile a single column of a dataset.
    ///
    /// # Errors
    /// `NotFound` for unknown datasets or columns.
    pub fn profile_column(&self, dataset_id: &str, column: &str) -> Result<ProfileReport> {
        let inner = self.lock();
        let entry = inner.entry(dataset_id)?;
        let table_sql = quote(&entry.table);
        let columns = inner.columns(&entry.table)?;
        let info = columns
            .get(column)
            .ok_or_else(|| Error::not_found(format!("Column not found: {column}")))?;
        let semantic = info.semantic_type;
        let col_sql = quote(column);
        let conn = &inner.conn;

        let total_rows = count_query(conn, &format!("SELECT COUNT(*) FROM {table_sql}"), &[])?;
        let sampled = total_rows > PROFILE_FULL_ROW_LIMIT;
        let profile_size = if sampled { PROFILE_FULL_ROW_LIMIT } else { total_rows };
        let source_sql = if sampled {
            format!("(SELECT * FROM {table_sql} USING SAMPLE {profile_size} ROWS)")
        } else {
            table_sql
        };

        let base = fetch_rows(
            conn,
            &format!(
                "SELECT COUNT(*), COUNT({col_sql}), COUNT(*) - COUNT({col_sql}), \
                 COUNT(DISTINCT {col_sql}) FROM {source_sql}"
            ),
            &[],
        )?;
        let base = base.first().cloned().unwrap_or_default();
        let non_null = base.get(1).and_then(JsonValue::as_i64).unwrap_or(0);

        let mut report = ProfileReport::new();
        report.insert("column".into(), json!(column));
        report.insert("type".into(), json!(semantic));
        report.insert("totalRows".into(), json!(total_rows));
        report.insert("sampled".into(), json!(sampled));
        report.insert("sampleSize".into(), json!(profile_size));
        report.insert("nonNullCount".into(), json!(non_null));
        report.insert(
            "nullCount".into(),
            base.get(2).cloned().unwrap_or(JsonValue::Null),
        );
        report.insert(
            "uniqueCount".into(),
            base.get(3).cloned().unwrap_or(JsonValue::Null),
        );

        let mut dominant: Option<(Option<String>, i64)> = None;
        match semantic {
            SemanticType::Integer | SemanticType::Float => {
                let mut stats = numeric_stats(conn, &source_sql, &col_sql)?;
                if !stats.is_empty() {
                    let quality = numeric_quality(conn, &source_sql, &col_sql, non_null, &stats)?;
                    stats.extend(quality);
                }
                report.insert("stats".into(), JsonValue::Object(stats));
                report.insert(
                    "histogram".into(),
                    JsonValue::Array(numeric_histogram(conn, &source_sql, &col_sql)?),
                );
                dominant = dominant_value(conn, &source_sql, &col_sql)?;
            }
            SemanticType::String => {
                let top_values = top_values(conn, &source_sql, &col_sql)?;
                dominant = dominant_value(conn, &source_sql, &col_sql)?;

                let mut stats = string_length_stats(conn, &source_sql, &col_sql)?;
                if non_null > 0 {
                    stats.extend(string_quality(conn, &source_sql, &col_sql, non_null)?);
                }
                let (classes, distinct_patterns) =
                    string_patterns(conn, &source_sql, &col_sql)?;
                stats.insert("distinctPatternCount".into(), json!(distinct_patterns));
                report.insert("stats".into(), JsonValue::Object(stats));
                report.insert("patternClasses".into(), JsonValue::Array(classes));

                let mut coverage = 0.0;
                if non_null > 0 && !top_values.is_empty() {
                    let covered: i64 = top_values
                        .iter()
                        .filter_map(|v| v.get("count").and_then(JsonValue::as_i64))
                        .sum();
                    coverage = pct(covered, non_null);
                }
                report.insert("topValues".into(), JsonValue::Array(top_values));
                report.insert("top10CoveragePct".into(), json!(coverage));
                let tail = if coverage >= 70.0 {
                    "low"
                } else if coverage >= 40.0 {
                    "medium"
                } else {
                    "high"
                };
                report.insert("tailProfile".into(), json!(tail));
            }
            SemanticType::Date => {
                let bounds = fetch_rows(
                    conn,
                    &format!(
                        "SELECT MIN({col_sql}), MAX({col_sql}) FROM {source_sql} \
                         WHERE {col_sql} IS NOT NULL"
                    ),
                    &[],
                )?;
                let mut stats = JsonMap::new();
                if let Some(row) = bounds.first() {
                    if !row[0].is_null() {
                        stats.insert("min".into(), json!(display_string(&row[0])));
                        stats.insert("max".into(), json!(display_string(&row[1])));
                        stats.extend(date_gaps(conn, &source_sql, &col_sql)?);
                    }
                }
                report.insert("stats".into(), JsonValue::Object(stats));
                report.insert(
                    "histogram".into(),
                    JsonValue::Array(date_histogram(conn, &source_sql, &col_sql)?),
                );
                dominant = dominant_value(conn, &source_sql, &col_sql)?;
            }
            SemanticType::Boolean => {
                let (stats, true_count, false_count) =
                    boolean_split(conn, &source_sql, &col_sql, profile_size)?;
                report.insert("stats".into(), JsonValue::Object(stats));
                dominant = if true_count == false_count {
                    Some((None, true_count))
                } else if true_count > false_count {
                    Some((Some("true".to_string()), true_count))
                } else {
                    Some((Some("false".to_string()), false_count))
                };
            }
        }

        if let Some((value, count)) = dominant {
            if non_null > 0 && count > 0 {
                match value {
                    Some(v) => {
                        report.insert("dominantValue".into(), json!(v));
                        report.insert("dominantValueCount".into(), json!(count));
                        report.insert("dominantValueSharePct".into(), json!(pct(count, non_null)));
                    }
                    // Top two counts tied: there is no single dominant value.
                    None => {
                        report.insert("dominantValue".into(), JsonValue::Null);
                        report.insert("dominantValueCount".into(), json!(count));
                    }
                }
            }
        }

        Ok(report)
    }
}

fn fetch_rows(
    conn: &Connection,
    sql: &str,
    params: &[ScalarValue],
) -> Result<Vec<Vec<JsonValue>>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let column_count = rows.as_ref().map_or(0, duckdb::Statement::column_count);

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(column_count);
        for i in 0..column_count {
            record.push(json_value(&row.get_ref(i)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn display_string(value: &JsonValue) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

fn pct(count: i64, denom: i64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let ratio = count as f64 / denom.max(1) as f64;
    (ratio * 100.0 * 100.0).round() / 100.0
}

fn numeric_stats(
    conn: &Connection,
    source_sql: &str,
    col_sql: &str,
) -> Result<JsonMap<String, JsonValue>> {
    let rows = fetch_rows(
        conn,
        &format!(
            "SELECT MIN({col_sql}), MAX({col_sql}), \
             ROUND(AVG({col_sql})::DOUBLE, 4), \
             ROUND(MEDIAN({col_sql})::DOUBLE, 4), \
             ROUND(STDDEV({col_sql})::DOUBLE, 4), \
             ROUND(QUANTILE_CONT({col_sql}, 0.25)::DOUBLE, 4), \
             ROUND(QUANTILE_CONT({col_sql}, 0.75)::DOUBLE, 4), \
             ROUND(QUANTILE_CONT({col_sql}, 0.95)::DOUBLE, 4), \
             ROUND(QUANTILE_CONT({col_sql}, 0.99)::DOUBLE, 4) \
             FROM {source_sql} WHERE {col_sql} IS NOT NULL"
        ),
        &[],
    )?;

    let mut stats = JsonMap::new();
    let Some(row) = rows.first() else {
        return Ok(stats);
    };
    if row[0].is_null() {
        return Ok(stats);
    }
    for (key, value) in [
        "min", "max", "mean", "median", "stddev", "p25", "p75", "p95", "p99",
    ]
    .iter()
    .zip(row)
    {
        let safe = value.as_f64().map_or(JsonValue::Null, safe_number);
        stats.insert((*key).to_string(), safe);
    }
    Ok(stats)
}

fn numeric_quality(
    conn: &Connection,
    source_sql: &str,
    col_sql: &str,
    non_null: i64,
    stats: &JsonMap<String, JsonValue>,
) -> Result<JsonMap<String, JsonValue>> {
    let mut quality = JsonMap::new();
    if non_null <= 0 {
        return Ok(quality);
    }

    let counts = fetch_rows(
        conn,
        &format!(
            "SELECT COUNT(*) FILTER (WHERE {col_sql} = 0), \
             COUNT(*) FILTER (WHERE {col_sql} < 0) \
             FROM {source_sql} WHERE {col_sql} IS NOT NULL"
        ),
        &[],
    )?;
    let zero_count = counts
        .first()
        .and_then(|r| r[0].as_i64())
        .unwrap_or(0);
    let neg_count = counts
        .first()
        .and_then(|r| r[1].as_i64())
        .unwrap_or(0);

    quality.insert("zeroRatePct".into(), json!(pct(zero_count, non_null)));
    quality.insert("negativeRatePct".into(), json!(pct(neg_count, non_null)));

    let p25 = stats.get("p25").and_then(JsonValue::as_f64);
    let p75 = stats.get("p75").and_then(JsonValue::as_f64);
    let outlier_rate = if let (Some(p25), Some(p75)) = (p25, p75) {
        let iqr = p75 - p25;
        let low = p25 - 1.5 * iqr;
        let high = p75 + 1.5 * iqr;
        let outliers = count_query(
            conn,
            &format!(
                "SELECT COUNT(*) FROM {source_sql} \
                 WHERE {col_sql} IS NOT NULL AND ({col_sql} < ? OR {col_sql} > ?)"
            ),
            &[ScalarValue::Float(low), ScalarValue::Float(high)],
        )?;
        json!(pct(outliers, non_null))
    } else {
        JsonValue::Null
    };
    quality.insert("outlierRatePct".into(), outlier_rate);
    Ok(quality)
}

fn numeric_histogram(
    conn: &Connection,
    source_sql: &str,
    col_sql: &str,
) -> Result<Vec<JsonValue>> {
    let bounds = fetch_rows(
        conn,
        &format!(
            "SELECT MIN({col_sql})::DOUBLE, MAX({col_sql})::DOUBLE \
             FROM {source_sql} WHERE {col_sql} IS NOT NULL"
        ),
        &[],
    )?;
    let Some(row) = bounds.first() else {
        return Ok(Vec::new());
    };
    let (Some(lo), Some(hi)) = (row[0].as_f64(), row[1].as_f64()) else {
        return Ok(Vec::new());
    };
    if (lo - hi).abs() < f64::EPSILON {
        return Ok(Vec::new());
    }

    #[allow(clippy::cast_precision_loss)]
    let bin_width = (hi - lo) / HISTOGRAM_BINS as f64;
    let rows = fetch_rows(
        conn,
        &format!(
            "SELECT FLOOR(({col_sql}::DOUBLE - ?) / ?)::INTEGER AS bin, COUNT(*) \
             FROM {source_sql} WHERE {col_sql} IS NOT NULL \
             GROUP BY bin ORDER BY bin"
        ),
        &[ScalarValue::Float(lo), ScalarValue::Float(bin_width)],
    )?;

    // Clamp edge bins; the max value lands one past the last bin.
    let mut counts = std::collections::BTreeMap::new();
    for row in rows {
        let idx = row[0].as_i64().unwrap_or(0).clamp(0, HISTOGRAM_BINS - 1);
        let count = row[1].as_i64().unwrap_or(0);
        *counts.entry(idx).or_insert(0i64) += count;
    }

    #[allow(clippy::cast_precision_loss)]
    let histogram = counts
        .into_iter()
        .map(|(idx, count)| {
            let edge = lo + idx as f64 * bin_width;
            json!({
                "bin": idx,
                "low": crate::value::round4(edge),
                "high": crate::value::round4(edge + bin_width),
                "count": count,
            })
        })
        .collect();
    Ok(histogram)
}

fn date_histogram(conn: &Connection, source_sql: &str, col_sql: &str) -> Result<Vec<JsonValue>> {
    let rows = fetch_rows(
        conn,
        &format!(
            "SELECT DATE_TRUNC('month', {col_sql}::TIMESTAMP) AS month, COUNT(*) \
             FROM {source_sql} WHERE {col_sql} IS NOT NULL \
             GROUP BY month ORDER BY month"
        ),
        &[],
    )?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let label: String = display_string(&row[0]).chars().take(7).collect();
            json!({ "label": label, "count": row[1] })
        })
        .collect())
}

fn top_values(conn: &Connection, source_sql: &str, col_sql: &str) -> Result<Vec<JsonValue>> {
    let rows = fetch_rows(
        conn,
        &format!(
            "SELECT {col_sql}, COUNT(*) AS cnt FROM {source_sql} \
             WHERE {col_sql} IS NOT NULL GROUP BY {col_sql} \
             ORDER BY cnt DESC LIMIT {TOP_VALUES_LIMIT}"
        ),
        &[],
    )?;
    Ok(rows
        .into_iter()
        .map(|row| json!({ "value": display_string(&row[0]), "count": row[1] }))
        .collect())
}

/// The strictly most frequent non-null value; a tie between the top two
/// yields `(None, count)`.
fn dominant_value(
    conn: &Connection,
    source_sql: &str,
    col_sql: &str,
) -> Result<Option<(Option<String>, i64)>> {
    let counts = fetch_rows(
        conn,
        &format!(
            "SELECT COUNT(*) AS cnt FROM {source_sql} \
             WHERE {col_sql} IS NOT NULL GROUP BY {col_sql} \
             ORDER BY cnt DESC LIMIT 2"
        ),
        &[],
    )?;
    let Some(first) = counts.first() else {
        return Ok(None);
    };
    let top = first[0].as_i64().unwrap_or(0);
    if counts.len() > 1 && counts[1][0].as_i64() == Some(top) {
        return Ok(Some((None, top)));
    }

    let rows = fetch_rows(
        conn,
        &format!(
            "SELECT {col_sql}, COUNT(*) AS cnt FROM {source_sql} \
             WHERE {col_sql} IS NOT NULL GROUP BY {col_sql} \
             ORDER BY cnt DESC, {col_sql} ASC LIMIT 1"
        ),
        &[],
    )?;
    Ok(rows.first().map(|row| {
        (
            Some(display_string(&row[0])),
            row[1].as_i64().unwrap_or(0),
        )
    }))
}

fn date_gaps(
    conn: &Connection,
    source_sql: &str,
    col_sql: &str,
) -> Result<JsonMap<String, JsonValue>> {
    let mut out = JsonMap::new();
    let span = fetch_rows(
        conn,
        &format!(
            "SELECT DATEDIFF('day', MIN({col_sql}::DATE), MAX({col_sql}::DATE)) + 1, \
             COUNT(DISTINCT {col_sql}::DATE) \
             FROM {source_sql} WHERE {col_sql} IS NOT NULL"
        ),
        &[],
    )?;
    let Some(row) = span.first() else {
        return Ok(out);
    };
    let (Some(span_days), Some(distinct_days)) = (row[0].as_i64(), row[1].as_i64()) else {
        return Ok(out);
    };

    let gap = count_query(
        conn,
        &format!(
            "WITH ordered_days AS ( \
               SELECT DISTINCT {col_sql}::DATE AS d \
               FROM {source_sql} WHERE {col_sql} IS NOT NULL \
             ), gaps AS ( \
               SELECT DATEDIFF('day', LAG(d) OVER (ORDER BY d), d) - 1 AS gap_days \
               FROM ordered_days \
             ) \
             SELECT COALESCE(MAX(gap_days), 0) FROM gaps"
        ),
        &[],
    )?;

    out.insert(
        "missingPeriodDays".into(),
        json!((span_days - distinct_days).max(0)),
    );
    out.insert("largestGapDays".into(), json!(gap.max(0)));
    Ok(out)
}

fn string_length_stats(
    conn: &Connection,
    source_sql: &str,
    col_sql: &str,
) -> Result<JsonMap<String, JsonValue>> {
    let rows = fetch_rows(
        conn,
        &format!(
            "SELECT MIN(LENGTH({col_sql})), MAX(LENGTH({col_sql})), \
             MEDIAN(LENGTH({col_sql})) \
             FROM {source_sql} WHERE {col_sql} IS NOT NULL"
        ),
        &[],
    )?;
    let mut stats = JsonMap::new();
    if let Some(row) = rows.first() {
        if !row[0].is_null() {
            stats.insert("minLength".into(), row[0].clone());
            stats.insert("maxLength".into(), row[1].clone());
            let median = row[2].as_f64().map_or(JsonValue::Null, safe_number);
            stats.insert("medianLength".into(), median);
        }
    }
    Ok(stats)
}

fn string_quality(
    conn: &Connection,
    source_sql: &str,
    col_sql: &str,
    non_null: i64,
) -> Result<JsonMap<String, JsonValue>> {
    let blank = count_query(
        conn,
        &format!(
            "SELECT COUNT(*) FROM {source_sql} \
             WHERE {col_sql} IS NOT NULL \
             AND LENGTH(TRIM(CAST({col_sql} AS VARCHAR))) = 0"
        ),
        &[],
    )?;
    let mut out = JsonMap::new();
    out.insert("blankWhitespaceCount".into(), json!(blank));
    out.insert("blankWhitespacePct".into(), json!(pct(blank, non_null)));
    Ok(out)
}

fn string_patterns(
    conn: &Connection,
    source_sql: &str,
    col_sql: &str,
) -> Result<(Vec<JsonValue>, i64)> {
    let vals_cte = format!(
        "SELECT TRIM(CAST({col_sql} AS VARCHAR)) AS v \
         FROM {source_sql} \
         WHERE {col_sql} IS NOT NULL AND LENGTH(TRIM(CAST({col_sql} AS VARCHAR))) > 0"
    );

    let class_rows = fetch_rows(
        conn,
        &format!(
            "WITH vals AS ({vals_cte}), classes AS ( \
               SELECT CASE \
                 WHEN REGEXP_MATCHES(LOWER(v), '^[0-9a-f]{{8}}-[0-9a-f]{{4}}-[1-5][0-9a-f]{{3}}-[89ab][0-9a-f]{{3}}-[0-9a-f]{{12}}$') THEN 'uuid' \
                 WHEN REGEXP_MATCHES(v, '^[A-Za-z0-9._%+\\-]+@[A-Za-z0-9.\\-]+\\.[A-Za-z]{{2,}}$') THEN 'email' \
                 WHEN REGEXP_MATCHES(v, '^[0-9]+$') THEN 'numeric-only' \
                 WHEN REGEXP_MATCHES(v, '[0-9]') AND REGEXP_MATCHES(v, '[A-Za-z]') AND REGEXP_MATCHES(v, '^[A-Za-z0-9_\\-]+$') THEN 'code-like' \
                 ELSE 'free-text' \
               END AS cls \
               FROM vals \
             ) \
             SELECT cls, COUNT(*) AS cnt FROM classes GROUP BY cls \
             ORDER BY cnt DESC LIMIT 5"
        ),
        &[],
    )?;

    let total: i64 = class_rows
        .iter()
        .filter_map(|r| r[1].as_i64())
        .sum();
    let classes = class_rows
        .into_iter()
        .map(|row| {
            let count = row[1].as_i64().unwrap_or(0);
            json!({
                "label": display_string(&row[0]),
                "count": count,
                "sharePct": if total > 0 { json!(pct(count, total)) } else { json!(0.0) },
            })
        })
        .collect();

    let distinct_patterns = count_query(
        conn,
        &format!(
            "WITH vals AS ({vals_cte}) \
             SELECT COUNT(DISTINCT REGEXP_REPLACE(REGEXP_REPLACE(v, '[A-Za-z]', 'A', 'g'), '[0-9]', '9', 'g')) \
             FROM vals"
        ),
        &[],
    )?;

    Ok((classes, distinct_patterns))
}

fn boolean_split(
    conn: &Connection,
    source_sql: &str,
    col_sql: &str,
    profile_size: i64,
) -> Result<(JsonMap<String, JsonValue>, i64, i64)> {
    let rows = fetch_rows(
        conn,
        &format!(
            "SELECT COUNT(*) FILTER (WHERE {col_sql} = TRUE), \
             COUNT(*) FILTER (WHERE {col_sql} = FALSE), \
             COUNT(*) FILTER (WHERE {col_sql} IS NULL) \
             FROM {source_sql}"
        ),
        &[],
    )?;
    let row = rows.first().cloned().unwrap_or_default();
    let true_count = row.first().and_then(JsonValue::as_i64).unwrap_or(0);
    let false_count = row.get(1).and_then(JsonValue::as_i64).unwrap_or(0);
    let null_count = row.get(2).and_then(JsonValue::as_i64).unwrap_or(0);

    let mut stats = JsonMap::new();
    stats.insert("trueCount".into(), json!(true_count));
    stats.insert("falseCount".into(), json!(false_count));
    stats.insert("nullCount".into(), json!(null_count));
    stats.insert("trueSharePct".into(), json!(pct(true_count, profile_size)));
    stats.insert("falseSharePct".into(), json!(pct(false_count, profile_size)));
    stats.insert("nullSharePct".into(), json!(pct(null_count, profile_size)));
    Ok((stats, true_count, false_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_util::{engine_with_csv, engine_with_table};

    #[test]
    fn test_numeric_profile_orders_quantiles() {
        let mut csv = String::from("v\n");
        for i in 1..=100 {
            csv.push_str(&format!("{i}\n"));
        }
        let (engine, id) = engine_with_csv(&csv);
        let report = engine.profile_column(&id, "v").unwrap();

        assert_eq!(report["nonNullCount"], json!(100));
        assert_eq!(report["sampled"], json!(false));
        let stats = report["stats"].as_object().unwrap();
        let read = |k: &str| stats[k].as_f64().unwrap();
        assert!(read("min") <= read("p25"));
        assert!(read("p25") <= read("median"));
        assert!(read("median") <= read("p75"));
        assert!(read("p75") <= read("max"));
        assert!(stats.contains_key("zeroRatePct"));
        assert!(stats.contains_key("outlierRatePct"));

        let histogram = report["histogram"].as_array().unwrap();
        assert!(!histogram.is_empty());
        assert!(histogram.len() <= 20);
        let total: i64 = histogram
            .iter()
            .map(|b| b["count"].as_i64().unwrap())
            .sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_string_profile_sentinels() {
        let (engine, id) = engine_with_table(
            "CREATE TABLE ds_prof (v VARCHAR); \
             INSERT INTO ds_prof VALUES ('NA'),('n/a'),('NULL'),('-'),(' '),(''),('ok'),\
             ('some longer free text value');",
            "ds_prof",
            "prof.csv",
        );
        let report = engine.profile_column(&id, "v").unwrap();

        assert_eq!(report["nonNullCount"], json!(8));
        assert!(!report["topValues"].as_array().unwrap().is_empty());

        let stats = report["stats"].as_object().unwrap();
        assert!(stats["blankWhitespaceCount"].as_i64().unwrap() >= 2);
        assert!(stats["distinctPatternCount"].as_i64().unwrap() > 0);

        let classes = report["patternClasses"].as_array().unwrap();
        assert!(classes
            .iter()
            .any(|c| c["label"] == json!("free-text")));
        assert!(report["top10CoveragePct"].as_f64().is_some());
        assert!(report.contains_key("tailProfile"));
    }

    #[test]
    fn test_date_profile_gaps_and_monthly_histogram() {
        let (engine, id) =
            engine_with_csv("d\n2024-01-01\n2024-01-02\n2024-01-05\n2024-02-01\n");
        let report = engine.profile_column(&id, "d").unwrap();

        let stats = report["stats"].as_object().unwrap();
        assert_eq!(stats["min"], json!("2024-01-01"));
        assert_eq!(stats["max"], json!("2024-02-01"));
        // 32-day span with 4 distinct days.
        assert_eq!(stats["missingPeriodDays"], json!(28));
        assert_eq!(stats["largestGapDays"], json!(26));

        let histogram = report["histogram"].as_array().unwrap();
        assert_eq!(histogram.len(), 2);
        assert_eq!(histogram[0]["label"], json!("2024-01"));
        assert_eq!(histogram[0]["count"], json!(3));
        assert_eq!(histogram[1]["label"], json!("2024-02"));
    }

    #[test]
    fn test_boolean_profile_split_and_dominant() {
        let (engine, id) = engine_with_csv("id,flag\n1,true\n2,true\n3,false\n4,\n");
        let report = engine.profile_column(&id, "flag").unwrap();

        let stats = report["stats"].as_object().unwrap();
        assert_eq!(stats["trueCount"], json!(2));
        assert_eq!(stats["falseCount"], json!(1));
        assert_eq!(stats["nullCount"], json!(1));
        assert_eq!(report["dominantValue"], json!("true"));
        assert_eq!(report["dominantValueCount"], json!(2));
    }

    #[test]
    fn test_dominant_tie_is_null() {
        let (engine, id) = engine_with_csv("g\na\na\nb\nb\nc\n");
        let report = engine.profile_column(&id, "g").unwrap();
        assert_eq!(report["dominantValue"], JsonValue::Null);
        assert_eq!(report["dominantValueCount"], json!(2));
        assert!(!report.contains_key("dominantValueSharePct"));
    }

    #[test]
    fn test_unknown_column_is_not_found() {
        let (engine, id) = engine_with_csv("a\n1\n");
        let err = engine.profile_column(&id, "b").unwrap_err();
        assert!(matches!(err, crate::Error::NotFound(_)));
        assert!(err.to_string().contains("Column not found: b"));
    }
}
