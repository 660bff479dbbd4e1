//! Typed view over raw parameter bytes.
//!
//! Value files are raw bytes with no framing; the declared key type decides
//! how they are read. Encodings:
//!
//! - STRING: UTF-8
//! - BOOL:   `1`/`true` or `0`/`false`; empty reads as false; written as `1`/`0`
//! - INT:    decimal `i64`, surrounding whitespace ignored
//! - FLOAT:  decimal `f64`, surrounding whitespace ignored
//! - JSON:   any JSON document; empty reads as `null`
//! - BYTES:  raw on disk, but registry defaults are base64 text

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{StoreError, StoreResult};
use crate::registry::ParamKeyType;

/// A decoded parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl ParamValue {
    pub fn key_type(&self) -> ParamKeyType {
        match self {
            ParamValue::String(_) => ParamKeyType::String,
            ParamValue::Bool(_) => ParamKeyType::Bool,
            ParamValue::Int(_) => ParamKeyType::Int,
            ParamValue::Float(_) => ParamKeyType::Float,
            ParamValue::Json(_) => ParamKeyType::Json,
            ParamValue::Bytes(_) => ParamKeyType::Bytes,
        }
    }

    /// Decode bytes read from `key`'s value file.
    pub fn decode(key: &str, key_type: ParamKeyType, bytes: &[u8]) -> StoreResult<Self> {
        if key_type == ParamKeyType::Bytes {
            return Ok(ParamValue::Bytes(bytes.to_vec()));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| StoreError::decode(key, key_type, format!("not UTF-8: {e}")))?;
        Self::parse_text(key, key_type, text)
    }

    /// Decode a registry default string.
    pub fn decode_default(key: &str, key_type: ParamKeyType, default: &str) -> StoreResult<Self> {
        if key_type == ParamKeyType::Bytes {
            return BASE64
                .decode(default)
                .map(ParamValue::Bytes)
                .map_err(|e| {
                    StoreError::decode(key, key_type, format!("default is not base64: {e}"))
                });
        }
        Self::parse_text(key, key_type, default)
    }

    fn parse_text(key: &str, key_type: ParamKeyType, text: &str) -> StoreResult<Self> {
        match key_type {
            ParamKeyType::String => Ok(ParamValue::String(text.to_string())),
            ParamKeyType::Bool => match text.trim() {
                "1" | "true" => Ok(ParamValue::Bool(true)),
                "0" | "false" | "" => Ok(ParamValue::Bool(false)),
                other => Err(StoreError::decode(key, key_type, format!("{other:?} is not a bool"))),
            },
            ParamKeyType::Int => text
                .trim()
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|e| StoreError::decode(key, key_type, e.to_string())),
            ParamKeyType::Float => text
                .trim()
                .parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|e| StoreError::decode(key, key_type, e.to_string())),
            ParamKeyType::Json => {
                if text.trim().is_empty() {
                    return Ok(ParamValue::Json(serde_json::Value::Null));
                }
                serde_json::from_str(text)
                    .map(ParamValue::Json)
                    .map_err(|e| StoreError::decode(key, key_type, e.to_string()))
            }
            ParamKeyType::Bytes => Ok(ParamValue::Bytes(text.as_bytes().to_vec())),
        }
    }

    /// Bytes to write to the value file.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ParamValue::String(s) => s.as_bytes().to_vec(),
            ParamValue::Bool(true) => b"1".to_vec(),
            ParamValue::Bool(false) => b"0".to_vec(),
            ParamValue::Int(i) => i.to_string().into_bytes(),
            ParamValue::Float(f) => f.to_string().into_bytes(),
            ParamValue::Json(v) => v.to_string().into_bytes(),
            ParamValue::Bytes(b) => b.clone(),
        }
    }
}
