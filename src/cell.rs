//! Ad-hoc code cells over a result frame.
//!
//! The cell surface is a small expression grammar instead of an embedded
//! interpreter: a chain rooted at `df` with `filter`, `select`, `sort`,
//! `head`, and the reducers `count`, `sum`, `mean`, `min`, `max`.
//!
//! ```text
//! df.filter(region == "West").select(region, amount).sort(amount, desc).head(10)
//! df.filter(note contains "error").count()
//! ```
//!
//! Comparisons are `==`, `!=`, `>`, `<`, `>=`, `<=`, plus the word
//! operators `contains` and `startswith` (case-sensitive). Columns are
//! bare identifiers or quoted strings. The frame is a defensive copy, the
//! environment is rebuilt per call, and nothing persists between cells.
//! Table results are previewed up to 1000 rows; scalar results come back
//! as `textOutput` with `rowCount = 0`.

use std::time::Instant;

use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::engine::Engine;
use crate::ident::quote;
use crate::value::safe_number;
use crate::{Error, Result};

const MAX_PREVIEW_ROWS: usize = 1000;

/// A materialized result set the cell evaluates against.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

/// Result of one cell execution.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellResponse {
    pub columns: Vec<String>,
    pub rows: Vec<JsonMap<String, JsonValue>>,
    pub row_count: usize,
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_output: Option<String>,
}

impl Engine {
    /// Run a code cell against a defensive copy of the dataset.
    ///
    /// # Errors
    /// `NotFound` for unknown datasets, `InvalidRequest` for parse or
    /// evaluation failures.
    pub fn run_cell(&self, dataset_id: &str, code: &str) -> Result<CellResponse> {
        let frame = {
            let inner = self.lock();
            let entry = inner.entry(dataset_id)?;
            load_frame(&inner.conn, &entry.table)?
        };
        execute(code, frame)
    }
}

fn load_frame(conn: &duckdb::Connection, table: &str) -> Result<Frame> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote(table)))?;
    let mut rows_iter = stmt.query([])?;
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
        let mut record = Vec::with_capacity(column_count);
        for i in 0..column_count {
            record.push(crate::value::json_value(&row.get_ref(i)?));
        }
        rows.push(record);
    }
    Ok(Frame { columns, rows })
}

/// Parse and evaluate a cell expression against a frame.
///
/// # Errors
/// `InvalidRequest` with a message naming the offending token, operation,
/// or column.
pub fn execute(code: &str, frame: Frame) -> Result<CellResponse> {
    let started = Instant::now();
    let steps = parse(code)?;
    let outcome = evaluate(frame, &steps)?;
    let elapsed_ms = (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;

    Ok(match outcome {
        Outcome::Table(frame) => {
            let Frame { columns, rows } = frame;
            let row_count = rows.len();
            let rows = rows
                .into_iter()
                .take(MAX_PREVIEW_ROWS)
                .map(|row| {
                    columns
                        .iter()
                        .cloned()
                        .zip(row)
                        .collect::<JsonMap<String, JsonValue>>()
                })
                .collect();
            CellResponse {
                columns,
                rows,
                row_count,
                execution_time: elapsed_ms,
                text_output: None,
            }
        }
        Outcome::Scalar(value) => CellResponse {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time: elapsed_ms,
            text_output: Some(render_scalar(&value)),
        },
    })
}

fn render_scalar(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => "null".to_string(),
        other => other.to_string(),
    }
}

// ── Grammar ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    StartsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReduceOp {
    Sum,
    Mean,
    Min,
    Max,
}

#[derive(Debug, Clone)]
enum Step {
    Filter {
        column: String,
        op: CmpOp,
        value: JsonValue,
    },
    Select(Vec<String>),
    Sort {
        column: String,
        desc: bool,
    },
    Head(usize),
    Count,
    Reduce {
        op: ReduceOp,
        column: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(JsonValue),
    Cmp(CmpOp),
    Dot,
    LParen,
    RParen,
    Comma,
}

fn lex(code: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = code.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' | '!' | '>' | '<' => {
                chars.next();
                let eq = chars.peek() == Some(&'=');
                if eq {
                    chars.next();
                }
                let op = match (c, eq) {
                    ('=', true) => CmpOp::Eq,
                    ('!', true) => CmpOp::Ne,
                    ('>', true) => CmpOp::Ge,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    ('<', false) => CmpOp::Lt,
                    _ => return Err(Error::invalid(format!("Unexpected character '{c}'"))),
                };
                tokens.push(Token::Cmp(op));
            }
            '\'' | '"' => {
                let open = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == open => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => return Err(Error::invalid("Unterminated string literal")),
                        },
                        Some(ch) => s.push(ch),
                        None => return Err(Error::invalid("Unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '-' | '0'..='9' => {
                let mut text = String::new();
                if c == '-' {
                    text.push(c);
                    chars.next();
                }
                let mut is_float = false;
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        text.push(d);
                        chars.next();
                    } else if d == '.' && !is_float {
                        is_float = true;
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = if is_float {
                    text.parse::<f64>().ok().map(JsonValue::from)
                } else {
                    text.parse::<i64>().ok().map(JsonValue::from)
                };
                match value {
                    Some(v) => tokens.push(Token::Num(v)),
                    None => return Err(Error::invalid(format!("Invalid number '{text}'"))),
                }
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(Error::invalid(format!("Unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            _ => Err(Error::invalid(format!("Expected {what}"))),
        }
    }

    fn column_name(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(Token::Str(name)) => Ok(name),
            _ => Err(Error::invalid("Expected a column name")),
        }
    }

    fn literal(&mut self) -> Result<JsonValue> {
        match self.next() {
            Some(Token::Str(s)) => Ok(JsonValue::from(s)),
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" | "True" => Ok(JsonValue::Bool(true)),
                "false" | "False" => Ok(JsonValue::Bool(false)),
                "null" | "None" => Ok(JsonValue::Null),
                other => Err(Error::invalid(format!("Unexpected value '{other}'"))),
            },
            _ => Err(Error::invalid("Expected a literal value")),
        }
    }
}

fn parse(code: &str) -> Result<Vec<Step>> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid("Code cell is empty"));
    }

    let mut parser = Parser {
        tokens: lex(trimmed)?,
        pos: 0,
    };
    match parser.next() {
        Some(Token::Ident(ref root)) if root == "df" => {}
        _ => return Err(Error::invalid("Code cell must start with 'df'")),
    }

    let mut steps = Vec::new();
    while let Some(token) = parser.next() {
        if token != Token::Dot {
            return Err(Error::invalid("Expected '.' between operations"));
        }
        let Some(Token::Ident(method)) = parser.next() else {
            return Err(Error::invalid("Expected an operation name after '.'"));
        };
        parser.expect(&Token::LParen, "'(' after the operation name")?;

        let step = match method.as_str() {
            "filter" => {
                let column = parser.column_name()?;
                let op = match parser.next() {
                    Some(Token::Cmp(op)) => op,
                    Some(Token::Ident(word)) => match word.as_str() {
                        "contains" => CmpOp::Contains,
                        "startswith" => CmpOp::StartsWith,
                        other => {
                            return Err(Error::invalid(format!(
                                "Unknown filter operator '{other}'"
                            )))
                        }
                    },
                    _ => return Err(Error::invalid("Expected a filter operator")),
                };
                let value = parser.literal()?;
                Step::Filter { column, op, value }
            }
            "select" => {
                let mut columns = vec![parser.column_name()?];
                while parser.peek() == Some(&Token::Comma) {
                    parser.next();
                    columns.push(parser.column_name()?);
                }
                Step::Select(columns)
            }
            "sort" => {
                let column = parser.column_name()?;
                let mut desc = false;
                if parser.peek() == Some(&Token::Comma) {
                    parser.next();
                    match parser.next() {
                        Some(Token::Ident(ref dir)) if dir == "desc" => desc = true,
                        Some(Token::Ident(ref dir)) if dir == "asc" => {}
                        _ => return Err(Error::invalid("Expected 'asc' or 'desc'")),
                    }
                }
                Step::Sort { column, desc }
            }
            "head" => {
                let count = match parser.next() {
                    Some(Token::Num(JsonValue::Number(n))) => n.as_u64(),
                    _ => None,
                };
                let Some(count) = count else {
                    return Err(Error::invalid("head expects a non-negative integer"));
                };
                Step::Head(usize::try_from(count).unwrap_or(usize::MAX))
            }
            "count" => Step::Count,
            "sum" => Step::Reduce {
                op: ReduceOp::Sum,
                column: parser.column_name()?,
            },
            "mean" => Step::Reduce {
                op: ReduceOp::Mean,
                column: parser.column_name()?,
            },
            "min" => Step::Reduce {
                op: ReduceOp::Min,
                column: parser.column_name()?,
            },
            "max" => Step::Reduce {
                op: ReduceOp::Max,
                column: parser.column_name()?,
            },
            other => return Err(Error::invalid(format!("Unknown operation: {other}"))),
        };
        parser.expect(&Token::RParen, "')' to close the operation")?;
        steps.push(step);
    }

    if steps.is_empty() {
        return Err(Error::invalid("Code cell has no operations"));
    }
    Ok(steps)
}

// ── Evaluation ───────────────────────────────────────────────────────────

enum Outcome {
    Table(Frame),
    Scalar(JsonValue),
}

fn column_index(frame: &Frame, name: &str) -> Result<usize> {
    frame
        .columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| Error::invalid(format!("Unknown column: {name}")))
}

fn evaluate(frame: Frame, steps: &[Step]) -> Result<Outcome> {
    let mut current = Outcome::Table(frame);
    for step in steps {
        let Outcome::Table(frame) = current else {
            return Err(Error::invalid(
                "No operations are allowed after a reduction",
            ));
        };
        current = apply(frame, step)?;
    }
    Ok(current)
}

fn apply(mut frame: Frame, step: &Step) -> Result<Outcome> {
    match step {
        Step::Filter { column, op, value } => {
            let idx = column_index(&frame, column)?;
            frame.rows.retain(|row| matches(&row[idx], *op, value));
            Ok(Outcome::Table(frame))
        }
        Step::Select(columns) => {
            let indices = columns
                .iter()
                .map(|c| column_index(&frame, c))
                .collect::<Result<Vec<usize>>>()?;
            let rows = frame
                .rows
                .into_iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect();
            Ok(Outcome::Table(Frame {
                columns: columns.clone(),
                rows,
            }))
        }
        Step::Sort { column, desc } => {
            let idx = column_index(&frame, column)?;
            frame.rows.sort_by(|a, b| {
                let ord = compare_cells(&a[idx], &b[idx]);
                if *desc { ord.reverse() } else { ord }
            });
            // NULLs go last regardless of direction.
            let (mut non_null, nulls): (Vec<_>, Vec<_>) = frame
                .rows
                .into_iter()
                .partition(|row| !row[idx].is_null());
            non_null.extend(nulls);
            frame.rows = non_null;
            Ok(Outcome::Table(frame))
        }
        Step::Head(n) => {
            frame.rows.truncate(*n);
            Ok(Outcome::Table(frame))
        }
        Step::Count => Ok(Outcome::Scalar(JsonValue::from(frame.rows.len()))),
        Step::Reduce { op, column } => {
            let idx = column_index(&frame, column)?;
            let values: Vec<&JsonValue> = frame
                .rows
                .iter()
                .map(|row| &row[idx])
                .filter(|v| !v.is_null())
                .collect();
            Ok(Outcome::Scalar(reduce(*op, &values)))
        }
    }
}

fn matches(cell: &JsonValue, op: CmpOp, value: &JsonValue) -> bool {
    if cell.is_null() {
        return false;
    }
    match op {
        CmpOp::Eq => cells_equal(cell, value),
        CmpOp::Ne => !cells_equal(cell, value),
        CmpOp::Gt | CmpOp::Lt | CmpOp::Ge | CmpOp::Le => {
            let ord = match (cell.as_f64(), value.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => match (cell.as_str(), value.as_str()) {
                    (Some(a), Some(b)) => Some(a.cmp(b)),
                    _ => None,
                },
            };
            ord.is_some_and(|ord| match op {
                CmpOp::Gt => ord.is_gt(),
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Ge => ord.is_ge(),
                _ => ord.is_le(),
            })
        }
        CmpOp::Contains | CmpOp::StartsWith => {
            let cell_text = cell
                .as_str()
                .map_or_else(|| cell.to_string(), str::to_string);
            let needle = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_string);
            if op == CmpOp::Contains {
                cell_text.contains(&needle)
            } else {
                cell_text.starts_with(&needle)
            }
        }
    }
}

fn cells_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn compare_cells(a: &JsonValue, b: &JsonValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

fn reduce(op: ReduceOp, values: &[&JsonValue]) -> JsonValue {
    if values.is_empty() {
        return JsonValue::Null;
    }
    let numeric: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if numeric.len() == values.len() {
        let result = match op {
            ReduceOp::Sum => numeric.iter().sum(),
            #[allow(clippy::cast_precision_loss)]
            ReduceOp::Mean => numeric.iter().sum::<f64>() / numeric.len() as f64,
            ReduceOp::Min => numeric.iter().copied().fold(f64::INFINITY, f64::min),
            ReduceOp::Max => numeric.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };
        return safe_number(result);
    }

    // Fall back to lexicographic min/max for non-numeric columns.
    let mut texts: Vec<String> = values
        .iter()
        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
        .collect();
    texts.sort();
    match op {
        ReduceOp::Min => texts.first().cloned().map_or(JsonValue::Null, JsonValue::from),
        ReduceOp::Max => texts.last().cloned().map_or(JsonValue::Null, JsonValue::from),
        _ => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_util::engine_with_csv;
    use serde_json::json;

    fn sample_frame() -> Frame {
        Frame {
            columns: vec!["region".to_string(), "amount".to_string()],
            rows: vec![
                vec![json!("West"), json!(800)],
                vec![json!("East"), json!(300)],
                vec![json!("West"), json!(400)],
                vec![JsonValue::Null, json!(5)],
            ],
        }
    }

    #[test]
    fn test_filter_select_sort_head() {
        let result = execute(
            "df.filter(region == 'West').select(region, amount).sort(amount, desc).head(1)",
            sample_frame(),
        )
        .unwrap();
        assert_eq!(result.columns, vec!["region", "amount"]);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0]["amount"], json!(800));
        assert!(result.text_output.is_none());
    }

    #[test]
    fn test_count_is_scalar_output() {
        let result = execute("df.filter(amount > 300).count()", sample_frame()).unwrap();
        assert_eq!(result.row_count, 0);
        assert!(result.rows.is_empty());
        assert_eq!(result.text_output.as_deref(), Some("2"));
    }

    #[test]
    fn test_reducers() {
        let result = execute("df.sum(amount)", sample_frame()).unwrap();
        assert_eq!(result.text_output.as_deref(), Some("1505"));

        let result = execute("df.mean(amount)", sample_frame()).unwrap();
        assert_eq!(result.text_output.as_deref(), Some("376.25"));

        let result = execute("df.min(region)", sample_frame()).unwrap();
        assert_eq!(result.text_output.as_deref(), Some("East"));
    }

    #[test]
    fn test_contains_and_quoted_columns() {
        let result = execute("df.filter('region' contains 'es').count()", sample_frame()).unwrap();
        assert_eq!(result.text_output.as_deref(), Some("2"));

        let result =
            execute("df.filter(region startswith 'W').count()", sample_frame()).unwrap();
        assert_eq!(result.text_output.as_deref(), Some("2"));
    }

    #[test]
    fn test_sort_puts_nulls_last() {
        let result = execute("df.sort(region)", sample_frame()).unwrap();
        assert_eq!(result.rows.last().unwrap()["region"], JsonValue::Null);
    }

    #[test]
    fn test_preview_truncates_but_counts_all() {
        let frame = Frame {
            columns: vec!["n".to_string()],
            rows: (0..1500).map(|i| vec![json!(i)]).collect(),
        };
        let result = execute("df.head(1400)", frame).unwrap();
        assert_eq!(result.row_count, 1400);
        assert_eq!(result.rows.len(), 1000);
    }

    #[test]
    fn test_parse_errors() {
        for (code, needle) in [
            ("", "Code cell is empty"),
            ("pd.read_csv('x')", "must start with 'df'"),
            ("df", "no operations"),
            ("df.explode(region)", "Unknown operation: explode"),
            ("df.filter(region ~ 'x')", "Unexpected character"),
            ("df.head(-1)", "non-negative integer"),
            ("df.count().head(1)", "after a reduction"),
        ] {
            let err = execute(code, sample_frame()).unwrap_err();
            assert!(
                err.to_string().contains(needle),
                "{code}: {err} missing {needle}"
            );
        }
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let err = execute("df.sum(missing)", sample_frame()).unwrap_err();
        assert!(err.to_string().contains("Unknown column: missing"));
    }

    #[test]
    fn test_cell_runs_against_a_dataset() {
        let (engine, id) = engine_with_csv("region,amount\nWest,10\nEast,20\n");
        let result = engine
            .run_cell(&id, "df.filter(amount >= 20).select(region)")
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0]["region"], json!("East"));
    }
}
