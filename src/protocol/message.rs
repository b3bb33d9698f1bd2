//! Logical message decoding for JSON frame payloads.
//!
//! Validation happens once here, at the parse boundary; the dispatcher
//! only ever sees a well-formed [`Incoming`] variant. The top-level value
//! must be an object carrying one of the field sets:
//!
//! - Request: `{method: string, params?: any}`
//! - Success reply: `{result: any}`
//! - Error reply: `{error: {code: int, message: string}}`
//!
//! Arrays at top level are rejected outright.

use serde_json::Value;

use super::wire_format::codes;

/// An error reply carried on the wire, or synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// JSON-RPC aligned code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl RpcError {
    /// Create a new error value.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A validation failure, addressed to the id it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFault {
    /// Id the failure is addressed to (0 = unaddressable).
    pub id: u32,
    /// Error code.
    pub code: i64,
    /// Description.
    pub message: String,
}

/// A fully-decoded JSON frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A call expecting a correlated reply.
    Request {
        /// Reply id.
        id: u32,
        /// Method name to dispatch.
        method: String,
        /// Arguments; defaults to `[]` when absent.
        params: Value,
    },
    /// A call expecting no reply (id = 0 on the wire).
    Notification {
        /// Method name to dispatch.
        method: String,
        /// Arguments; defaults to `[]` when absent.
        params: Value,
    },
    /// A successful reply to one of our requests.
    Success {
        /// Id of the completed request.
        id: u32,
        /// Result value.
        result: Value,
    },
    /// An error reply to one of our requests.
    Failure {
        /// Id of the failed request.
        id: u32,
        /// Error details.
        error: RpcError,
    },
}

impl Incoming {
    /// Decode and validate a JSON frame payload received at `id`.
    pub fn parse(id: u32, payload: &[u8]) -> Result<Self, WireFault> {
        let value: Value = serde_json::from_slice(payload).map_err(|e| WireFault {
            id,
            code: codes::PARSE,
            message: e.to_string(),
        })?;

        if value.is_array() {
            return Err(WireFault {
                id,
                code: codes::INVALID,
                message: "Messages must not be arrays".to_string(),
            });
        }

        let object = value.as_object();

        if let Some(method) = object
            .and_then(|m| m.get("method"))
            .and_then(Value::as_str)
        {
            let params = object
                .and_then(|m| m.get("params"))
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            let method = method.to_string();

            return Ok(if id == 0 {
                Incoming::Notification { method, params }
            } else {
                Incoming::Request { id, method, params }
            });
        }

        if id != 0 {
            if let Some(error) = object.and_then(|m| m.get("error")) {
                return Ok(Incoming::Failure {
                    id,
                    error: decode_error_object(error),
                });
            }
            if let Some(result) = object.and_then(|m| m.get("result")) {
                return Ok(Incoming::Success {
                    id,
                    result: result.clone(),
                });
            }
            return Err(WireFault {
                id,
                code: codes::INVALID,
                message: "Messages with IDs must contain method, error, or result".to_string(),
            });
        }

        Err(WireFault {
            id: 0,
            code: codes::INVALID,
            message: "Messages without IDs must contain method".to_string(),
        })
    }
}

/// Pull `{code, message}` out of an error reply, tolerating sloppy peers.
fn decode_error_object(error: &Value) -> RpcError {
    let code = error
        .get("code")
        .and_then(Value::as_i64)
        .unwrap_or(codes::INTERNAL);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    RpcError { code, message }
}
