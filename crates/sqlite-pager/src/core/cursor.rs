//! Opaque, stateless pagination tokens.
//!
//! A token is URL-safe base64 (no padding) over a compact JSON record
//! `{"f": field, "v": value, "o": operator}`. Nothing is kept server-side.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        }
    }

    /// True when the comparison selects values after the anchor in ascending order.
    pub fn is_ascending(self) -> bool {
        matches!(self, Operator::Gt | Operator::Ge)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "f")]
    pub field: String,
    #[serde(rename = "v")]
    pub value: Value,
    #[serde(rename = "o")]
    pub operator: Operator,
}

impl Cursor {
    pub fn new(field: impl Into<String>, value: Value, operator: Operator) -> Self {
        Self {
            field: field.into(),
            value,
            operator,
        }
    }

    pub fn encode(&self) -> AppResult<String> {
        if !is_scalar(&self.value) {
            return Err(AppError::InvalidRequest(format!(
                "cursor value for {} must be a scalar",
                self.field
            )));
        }
        let raw = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    pub fn decode(token: &str) -> AppResult<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim().as_bytes())
            .map_err(|e| AppError::CursorDecode(format!("not base64: {e}")))?;
        let cursor: Cursor = serde_json::from_slice(&raw)
            .map_err(|e| AppError::CursorDecode(format!("malformed record: {e}")))?;
        if cursor.field.is_empty() {
            return Err(AppError::CursorDecode("empty field".into()));
        }
        if !is_scalar(&cursor.value) {
            return Err(AppError::CursorDecode("value is not a scalar".into()));
        }
        Ok(cursor)
    }
}

pub fn encode(field: &str, value: Value, operator: Operator) -> AppResult<String> {
    Cursor::new(field, value, operator).encode()
}

pub fn decode(token: &str) -> AppResult<Cursor> {
    Cursor::decode(token)
}

pub(crate) fn is_scalar(v: &Value) -> bool {
    !matches!(v, Value::Array(_) | Value::Object(_))
}
