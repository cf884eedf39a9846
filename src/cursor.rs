//! Opaque keyset-pagination cursors.
//!
//! A cursor is URL-safe base64 of minified JSON with trailing `=` stripped.
//! It pins the sort contract it was created under; resuming with a
//! different sort column or direction is a stale cursor and must fail so
//! the client restarts pagination.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::{ScalarValue, SemanticType};
use crate::{Error, Result};

/// Cursor wire payload, version 1.
///
/// `r` is the anchor row's intrinsic identity (`rowid`). When a sort column
/// is present, exactly one of `n = true` (anchor value was NULL) or `k`
/// (the serialized sort-column value) is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPayload {
    pub v: u32,
    pub s: Option<String>,
    pub d: String,
    pub r: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<JsonValue>,
}

impl CursorPayload {
    /// Whether the anchor row's sort value was NULL.
    pub fn is_null_anchor(&self) -> bool {
        self.n == Some(true)
    }

    /// Check the cursor against the sort contract of the current request.
    ///
    /// # Errors
    /// Returns `InvalidRequest` on a version, sort-column, or direction
    /// mismatch.
    pub fn validate(&self, sort_column: Option<&str>, direction: &str) -> Result<()> {
        if self.v != 1 {
            return Err(Error::invalid("Invalid cursor version"));
        }
        if self.s.as_deref() != sort_column {
            return Err(Error::invalid("Cursor does not match current sort column"));
        }
        if self.d != direction {
            return Err(Error::invalid(
                "Cursor does not match current sort direction",
            ));
        }
        Ok(())
    }
}

/// Encode a payload as an unpadded URL-safe base64 token.
///
/// # Errors
/// Practically infallible; surfaces serialization failure as `InvalidRequest`.
pub fn encode(payload: &CursorPayload) -> Result<String> {
    let raw = serde_json::to_string(payload).map_err(|_| Error::invalid("Invalid cursor"))?;
    Ok(URL_SAFE.encode(raw).trim_end_matches('=').to_string())
}

/// Decode a token, re-padding to a multiple of four first.
///
/// # Errors
/// Any decoding or parsing failure surfaces as `Invalid cursor`.
pub fn decode(token: &str) -> Result<CursorPayload> {
    let padded = format!("{token}{}", "=".repeat((4 - token.len() % 4) % 4));
    let raw = URL_SAFE
        .decode(padded)
        .map_err(|_| Error::invalid("Invalid cursor"))?;
    serde_json::from_slice(&raw).map_err(|_| Error::invalid("Invalid cursor"))
}

/// Re-type a serialized anchor value for binding against the sort column.
///
/// Booleans mirror the permissive word set of value coercion; dates and
/// strings stay textual and rely on the engine's comparison casts.
///
/// # Errors
/// Returns `InvalidRequest` when the key cannot be read as the column type.
#[allow(clippy::cast_possible_truncation)]
pub fn deserialize_anchor(key: &JsonValue, semantic_type: SemanticType) -> Result<ScalarValue> {
    let invalid = || Error::invalid("Invalid cursor sort key");
    match semantic_type {
        SemanticType::Integer => match key {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .map(ScalarValue::Int)
                .ok_or_else(invalid),
            JsonValue::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ScalarValue::Int)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        SemanticType::Float => match key {
            JsonValue::Number(n) => n.as_f64().map(ScalarValue::Float).ok_or_else(invalid),
            JsonValue::String(s) => s
                .trim()
                .parse::<f64>()
                .map(ScalarValue::Float)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        SemanticType::Boolean => Ok(match key {
            JsonValue::Bool(b) => ScalarValue::Bool(*b),
            other => {
                let lowered = match other {
                    JsonValue::String(s) => s.trim().to_lowercase(),
                    v => v.to_string(),
                };
                ScalarValue::Bool(matches!(
                    lowered.as_str(),
                    "1" | "true" | "t" | "yes" | "y"
                ))
            }
        }),
        SemanticType::Date | SemanticType::String => Ok(match key {
            JsonValue::String(s) => ScalarValue::Text(s.clone()),
            other => ScalarValue::Text(other.to_string()),
        }),
    }
}
