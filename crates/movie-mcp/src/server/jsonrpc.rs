//! JSON-RPC 2.0 envelope types and message classification.

use std::borrow::Cow;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// `null` when the request id could not be determined.
    pub id: Value,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn error(id: Value, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
            id,
        }
    }

    /// Whether this response carries an error object.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl ProtocolError {
    /// Render as a JSON-RPC error response. Detail is attached only in development mode.
    #[must_use]
    pub fn to_response(&self, id: Value, dev_mode: bool) -> JsonRpcResponse {
        JsonRpcResponse::error(id, self.code(), self.to_string(), self.data(dev_mode))
    }
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Method call expecting a response.
    Request {
        /// Correlation id
        id: Value,
        /// Method name
        method: String,
        /// Parameters, `{}` when absent
        params: Value,
    },
    /// Method call without an id; never answered.
    Notification {
        /// Method name
        method: String,
        /// Parameters, `{}` when absent
        params: Value,
    },
    /// Client's answer to a server-initiated request.
    Response {
        /// Id of the server request being answered
        id: Value,
        /// Result member, if any
        result: Option<Value>,
        /// Error member, if any
        error: Option<Value>,
    },
}

/// Envelope rejection, with whatever id could be recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeError {
    /// Request id, `null` if unknown.
    pub id: Value,
    /// Why the envelope was rejected.
    pub error: ProtocolError,
}

impl EnvelopeError {
    fn new(id: Value, detail: impl Into<String>) -> Self {
        Self {
            id,
            error: ProtocolError::InvalidRequest {
                detail: detail.into(),
            },
        }
    }
}

/// Parse raw bytes into a classified message.
pub fn parse_message(bytes: &[u8]) -> Result<IncomingMessage, EnvelopeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| EnvelopeError {
        id: Value::Null,
        error: ProtocolError::Parse {
            detail: e.to_string(),
        },
    })?;
    classify(value)
}

/// Classify an already-parsed JSON value.
pub fn classify(value: Value) -> Result<IncomingMessage, EnvelopeError> {
    let mut object = match value {
        Value::Object(object) => object,
        Value::Array(_) => {
            return Err(EnvelopeError::new(Value::Null, "batch requests are not supported"));
        }
        _ => return Err(EnvelopeError::new(Value::Null, "message must be a JSON object")),
    };

    let id = object.remove("id");
    let id_for_error = id.clone().filter(valid_id).unwrap_or(Value::Null);

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(EnvelopeError::new(id_for_error, "'jsonrpc' must be \"2.0\""));
    }

    if let Some(id) = &id {
        if !valid_id(id) {
            return Err(EnvelopeError::new(Value::Null, "'id' must be a string, number or null"));
        }
    }

    match object.remove("method") {
        Some(Value::String(method)) => {
            let params = take_params(&mut object)
                .map_err(|d| EnvelopeError::new(id_for_error.clone(), d))?;
            Ok(match id {
                Some(id) => IncomingMessage::Request { id, method, params },
                None => IncomingMessage::Notification { method, params },
            })
        }
        Some(_) => Err(EnvelopeError::new(id_for_error, "'method' must be a string")),
        None => {
            let result = object.remove("result");
            let error = object.remove("error");
            match (id, result.is_some() || error.is_some()) {
                (Some(id), true) => Ok(IncomingMessage::Response { id, result, error }),
                _ => Err(EnvelopeError::new(id_for_error, "missing 'method'")),
            }
        }
    }
}

fn valid_id(id: &Value) -> bool {
    matches!(id, Value::String(_) | Value::Number(_) | Value::Null)
}

fn take_params(object: &mut Map<String, Value>) -> Result<Value, &'static str> {
    match object.remove("params") {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(params @ (Value::Object(_) | Value::Array(_))) => Ok(params),
        Some(_) => Err("'params' must be an object or array"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let msg = parse_message(br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert_eq!(
            msg,
            IncomingMessage::Request {
                id: json!(1),
                method: "tools/list".into(),
                params: json!({}),
            }
        );
    }

    #[test]
    fn test_parse_notification() {
        let raw = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let msg = parse_message(raw).unwrap();
        assert!(matches!(msg, IncomingMessage::Notification { .. }));
    }

    #[test]
    fn test_parse_client_response() {
        let raw = br#"{"jsonrpc":"2.0","id":"abc","result":{"action":"accept"}}"#;
        let msg = parse_message(raw).unwrap();
        assert!(matches!(msg, IncomingMessage::Response { result: Some(_), .. }));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_message(b"{not json").unwrap_err();
        assert_eq!(err.error.code(), codes::PARSE_ERROR);
        assert!(err.id.is_null());
    }

    #[test]
    fn test_invalid_envelopes() {
        for raw in [
            r#"{"id":1,"method":"ping"}"#,
            r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":1,"method":5}"#,
            r#"{"jsonrpc":"2.0","id":{"x":1},"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":"str"}"#,
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#,
            r#""hello""#,
        ] {
            let err = parse_message(raw.as_bytes()).unwrap_err();
            assert_eq!(err.error.code(), codes::INVALID_REQUEST, "{raw}");
        }
    }

    #[test]
    fn test_invalid_request_keeps_id() {
        let err = parse_message(br#"{"jsonrpc":"1.0","id":42,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.id, json!(42));
    }

    #[test]
    fn test_response_serialization() {
        let ok = serde_json::to_value(JsonRpcResponse::success(json!(1), json!({}))).unwrap();
        assert_eq!(ok, json!({ "jsonrpc": "2.0", "result": {}, "id": 1 }));

        let err = ProtocolError::MethodNotFound {
            method: "foo".into(),
        };
        let err = serde_json::to_value(err.to_response(Value::Null, false)).unwrap();
        assert_eq!(err["error"]["code"], -32601);
        assert!(err["id"].is_null());
        assert!(err.get("result").is_none());
    }
}
