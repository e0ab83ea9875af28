//! JSON-RPC 2.0 error envelopes synthesized by the relay.
//!
//! Successful replies are never decoded; only failures produce JSON here:
//!
//! ```text
//! {"jsonrpc":"2.0","error":{"code":-32000,"message":"Node unreachable: ..."},"id":1}
//! ```
//!
//! The relay does not parse the caller's request, so the `id` of a
//! synthesized envelope is always `1`.

use serde::Serialize;

/// Backend could not be reached or did not answer usefully.
pub const SERVER_ERROR: i32 = -32000;
/// The inbound request was not something the relay can forward.
pub const INVALID_REQUEST: i32 = -32600;
/// Fault inside the relay itself.
pub const INTERNAL_ERROR: i32 = -32603;

const SYNTHESIZED_ID: u64 = 1;

const FALLBACK: &[u8] =
    br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Proxy error"},"id":1}"#;

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub jsonrpc: &'static str,
    pub error: ErrorObject,
    pub id: u64,
}

impl ErrorEnvelope {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            error: ErrorObject {
                code,
                message: message.into(),
            },
            id: SYNTHESIZED_ID,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| FALLBACK.to_vec())
    }
}
