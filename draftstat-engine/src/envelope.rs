//! Uniform `{ "isOk": bool, "data": ... }` response wrapper.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "isOk")]
    pub is_ok: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    pub const fn ok(data: T) -> Self {
        Self { is_ok: true, data }
    }
}

impl Envelope<String> {
    pub fn failure(message: impl Display) -> Self {
        Self {
            is_ok: false,
            data: message.to_string(),
        }
    }
}

impl Envelope<Value> {
    /// Wrap an operation result; errors become their message string.
    pub fn from_result<T: Serialize, E: Display>(result: Result<T, E>) -> Self {
        let outcome = result
            .map_err(|err| err.to_string())
            .and_then(|data| serde_json::to_value(data).map_err(|err| err.to_string()));
        match outcome {
            Ok(data) => Self::ok(data),
            Err(message) => Self {
                is_ok: false,
                data: Value::String(message),
            },
        }
    }
}
