//! JSON message types and presence-based classification.
//!
//! The wire uses single-letter keys: `i` (identifier), `m` (method),
//! `r` (result), `e` (error), `p` (parameters). Which keys are present
//! determines the message kind; [`decode`] resolves the ambiguity with an
//! ordered match.

use crate::error::ProtocolError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Wire key for the request/reply identifier.
pub const KEY_ID: &str = "i";
/// Wire key for the method tag.
pub const KEY_METHOD: &str = "m";
/// Wire key for a response result.
pub const KEY_RESULT: &str = "r";
/// Wire key for an error payload.
pub const KEY_ERROR: &str = "e";
/// Wire key for request/notification parameters.
pub const KEY_PARAMETERS: &str = "p";

/// Method tag of a notification.
///
/// The device mixes small integer telemetry codes with string-named events,
/// so both forms are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodKey {
    Code(i64),
    Name(String),
}

impl From<i64> for MethodKey {
    fn from(code: i64) -> Self {
        MethodKey::Code(code)
    }
}

impl From<&str> for MethodKey {
    fn from(name: &str) -> Self {
        MethodKey::Name(name.to_string())
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodKey::Code(code) => write!(f, "{code}"),
            MethodKey::Name(name) => write!(f, "{name}"),
        }
    }
}

/// Generates a short random request token.
///
/// The token space is large enough to make collisions among the handful of
/// concurrently pending requests negligible; the scheduler still checks
/// uniqueness before admission.
pub fn generate_id() -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(8);
    token
}

/// Outbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Identifier correlating this request to its eventual reply. Unique
    /// among requests currently awaiting a reply on a connection.
    #[serde(rename = "i")]
    pub id: String,

    /// Method name to invoke on the device.
    #[serde(rename = "m")]
    pub method: String,

    /// Method-specific parameters.
    #[serde(rename = "p")]
    pub parameters: Value,
}

impl Request {
    /// Builds a request with a generated identifier.
    pub fn new(method: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: generate_id(),
            method: method.into(),
            parameters,
        }
    }

    /// Replaces the generated identifier with a caller-chosen one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Inbound notification envelope, before typed decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcNotification {
    pub method: MethodKey,
    pub parameters: Value,
}

/// A classified wire message. Exactly one variant per decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    /// A request; carried for wire symmetry, the hub never sends these.
    Request(Request),
    /// Successful reply to a request.
    Response { id: String, result: Value },
    /// Failure reply to a request. The payload arrives base64-encoded and is
    /// decoded to text here.
    Error { id: String, message: String },
    /// Unsolicited telemetry push.
    Notification(RpcNotification),
}

/// Classifies a parsed JSON object into a message variant.
///
/// Precedence is an ordered match on key presence: request, response, error,
/// notification. Anything else is unclassifiable and the line is dropped by
/// the caller.
pub fn decode(value: Value) -> Result<RpcMessage, ProtocolError> {
    let Value::Object(mut map) = value else {
        return Err(ProtocolError::Unclassifiable);
    };

    let id = map.contains_key(KEY_ID);
    let method = map.contains_key(KEY_METHOD);
    let parameters = map.contains_key(KEY_PARAMETERS);
    let result = map.contains_key(KEY_RESULT);
    let error = map.contains_key(KEY_ERROR);

    if id && method && parameters {
        let request = serde_json::from_value(Value::Object(map))?;
        Ok(RpcMessage::Request(request))
    } else if id && !method && result {
        Ok(RpcMessage::Response {
            id: take_id(&mut map)?,
            result: map.remove(KEY_RESULT).unwrap_or(Value::Null),
        })
    } else if id && !method && error {
        let payload = map.remove(KEY_ERROR).unwrap_or(Value::Null);
        Ok(RpcMessage::Error {
            id: take_id(&mut map)?,
            message: base64_text(&payload, "error")?,
        })
    } else if !id && method && parameters {
        let method = serde_json::from_value(map.remove(KEY_METHOD).unwrap_or(Value::Null))?;
        Ok(RpcMessage::Notification(RpcNotification {
            method,
            parameters: map.remove(KEY_PARAMETERS).unwrap_or(Value::Null),
        }))
    } else {
        Err(ProtocolError::Unclassifiable)
    }
}

fn take_id(map: &mut Map<String, Value>) -> Result<String, ProtocolError> {
    match map.remove(KEY_ID) {
        Some(Value::String(id)) => Ok(id),
        _ => Err(ProtocolError::MalformedPayload("identifier")),
    }
}

/// Decodes a base64 string value into UTF-8 text.
pub(crate) fn base64_text(value: &Value, field: &'static str) -> Result<String, ProtocolError> {
    let encoded = value
        .as_str()
        .ok_or(ProtocolError::MalformedPayload(field))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| ProtocolError::InvalidBase64(field))?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_short_keys() {
        let request = Request::new("get_hub_info", json!({})).with_id("ab12");
        let encoded = serde_json::to_string(&request).unwrap();
        assert_eq!(encoded, r#"{"i":"ab12","m":"get_hub_info","p":{}}"#);
    }

    #[test]
    fn test_request_roundtrip() {
        let request = Request::new("get_hub_info", json!({})).with_id("ab12");
        let encoded = serde_json::to_value(&request).unwrap();
        let decoded = decode(encoded).unwrap();
        assert_eq!(decoded, RpcMessage::Request(request));
    }

    #[test]
    fn test_classify_response() {
        let decoded = decode(json!({"i": "ab12", "r": "done"})).unwrap();
        assert_eq!(
            decoded,
            RpcMessage::Response {
                id: "ab12".to_string(),
                result: json!("done"),
            }
        );
    }

    #[test]
    fn test_classify_error_decodes_payload() {
        // "oops" in base64
        let decoded = decode(json!({"i": "ab12", "e": "b29wcw=="})).unwrap();
        assert_eq!(
            decoded,
            RpcMessage::Error {
                id: "ab12".to_string(),
                message: "oops".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_notification() {
        let decoded = decode(json!({"m": 2, "p": [8.1, 73]})).unwrap();
        assert_eq!(
            decoded,
            RpcMessage::Notification(RpcNotification {
                method: MethodKey::Code(2),
                parameters: json!([8.1, 73]),
            })
        );
    }

    #[test]
    fn test_string_method_notification() {
        let decoded = decode(json!({"m": "userProgram.print", "p": {"value": "aGk="}})).unwrap();
        let RpcMessage::Notification(notification) = decoded else {
            panic!("expected notification");
        };
        assert_eq!(notification.method, MethodKey::from("userProgram.print"));
    }

    #[test]
    fn test_request_takes_precedence_over_notification() {
        let decoded = decode(json!({"i": "x1", "m": "get_hub_info", "p": {}})).unwrap();
        assert!(matches!(decoded, RpcMessage::Request(_)));
    }

    #[test]
    fn test_unclassifiable_shapes() {
        assert!(matches!(
            decode(json!({"x": 1})),
            Err(ProtocolError::Unclassifiable)
        ));
        // identifier plus method but no parameters matches nothing
        assert!(matches!(
            decode(json!({"i": "a", "m": "x", "r": 1})),
            Err(ProtocolError::Unclassifiable)
        ));
        assert!(matches!(
            decode(json!([1, 2, 3])),
            Err(ProtocolError::Unclassifiable)
        ));
    }

    #[test]
    fn test_error_with_bad_base64() {
        let result = decode(json!({"i": "a", "e": "@@@"}));
        assert!(matches!(result, Err(ProtocolError::InvalidBase64(_))));
    }

    #[test]
    fn test_non_string_identifier_rejected() {
        let result = decode(json!({"i": 7, "r": "done"}));
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_generated_ids_are_short_tokens() {
        let id = generate_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_id(), generate_id());
    }
}
