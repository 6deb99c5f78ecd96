//! Wire envelope: one JSON object per text frame.
//!
//! ```text
//! { "kind": "push" | "request" | "response",
//!   "tag": "<message-tag>",
//!   "data": { "correlationId": "<opaque>", "payload": <any> } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::correlation::CorrelationId;
use crate::error::BusError;

/// Envelope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Push,
    Request,
    Response,
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
        }
    }
}

/// The `data` object of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeData {
    pub correlation_id: CorrelationId,
    /// Missing payloads decode as `null`.
    #[serde(default)]
    pub payload: Value,
}

/// The unit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: Kind,
    pub tag: String,
    pub data: EnvelopeData,
}

impl Envelope {
    pub fn new(
        kind: Kind,
        tag: impl Into<String>,
        correlation_id: CorrelationId,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            tag: tag.into(),
            data: EnvelopeData {
                correlation_id,
                payload,
            },
        }
    }

    pub fn push(tag: impl Into<String>, correlation_id: CorrelationId, payload: Value) -> Self {
        Self::new(Kind::Push, tag, correlation_id, payload)
    }

    pub fn request(tag: impl Into<String>, correlation_id: CorrelationId, payload: Value) -> Self {
        Self::new(Kind::Request, tag, correlation_id, payload)
    }

    pub fn response(tag: impl Into<String>, correlation_id: CorrelationId, payload: Value) -> Self {
        Self::new(Kind::Response, tag, correlation_id, payload)
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.data.correlation_id
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame. Anything that is not a well-formed envelope
    /// (invalid JSON, unknown kind, missing tag or correlation id) yields
    /// `None`; the caller drops it.
    pub fn decode(frame: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(frame) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_field_names() {
        let env = Envelope::request("config", CorrelationId::from("c1"), json!({"a": 1}));
        let frame = env.encode().unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["kind"], "request");
        assert_eq!(v["tag"], "config");
        assert_eq!(v["data"]["correlationId"], "c1");
        assert_eq!(v["data"]["payload"]["a"], 1);
    }

    #[test]
    fn round_trip_each_kind() {
        let payload = json!({"nested": [1, "two", null, {"x": true}]});
        for env in [
            Envelope::push("status", CorrelationId::mint(), payload.clone()),
            Envelope::request("config", CorrelationId::mint(), payload.clone()),
            Envelope::response("config", CorrelationId::mint(), payload.clone()),
        ] {
            let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
            assert_eq!(decoded, env);
        }
    }

    #[test]
    fn missing_payload_is_null() {
        let env = Envelope::decode(r#"{"kind":"push","tag":"ping","data":{"correlationId":"x"}}"#)
            .unwrap();
        assert_eq!(env.data.payload, Value::Null);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let env = Envelope::decode(
            r#"{"__wsBus__":true,"kind":"push","tag":"ping","data":{"correlationId":"x","payload":1}}"#,
        );
        assert!(env.is_some());
    }

    #[test]
    fn malformed_frames_decode_to_none() {
        assert!(Envelope::decode("not json").is_none());
        assert!(Envelope::decode("{}").is_none());
        assert!(Envelope::decode(r#"{"kind":"shout","tag":"x","data":{"correlationId":"1"}}"#)
            .is_none());
        assert!(Envelope::decode(r#"{"kind":"request","tag":"x","data":{"payload":1}}"#).is_none());
        assert!(Envelope::decode(r#"{"kind":"request","data":{"correlationId":"1"}}"#).is_none());
    }
}
