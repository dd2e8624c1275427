//! Audit record emitted before every retry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mask written in place of credential-bearing header values.
pub const REDACTED_HEADER_VALUE: &str = "*****";

/// One retry decision, as recorded by the retry event sink.
///
/// Shape:
/// `{ "message": "...", "request": { "uri", "headers", "method", "body" }, "response": { "statusCode", "reason", "body" } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEvent {
    pub message: String,
    pub request: LoggedRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<LoggedResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedRequest {
    pub uri: String,
    /// Header name -> comma-joined values. `Authorization` is always [`REDACTED_HEADER_VALUE`].
    pub headers: BTreeMap<String, String>,
    pub method: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedResponse {
    pub status_code: u16,
    pub reason: String,
    pub body: String,
}

impl RetryEvent {
    /// `Retrying request (<n>x)` with an optional ` - reason: <phrase>` suffix.
    pub fn retry_message(attempt: u32, reason: Option<&str>) -> String {
        match reason {
            Some(reason) => format!("Retrying request ({attempt}x) - reason: {reason}"),
            None => format!("Retrying request ({attempt}x)"),
        }
    }
}
