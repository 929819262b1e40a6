//! Type-safe domain event definitions.
//!
//! This crate provides the `EventMessage` trait that every event published on
//! the stream implements. The trait associates an event type with the envelope
//! field it travels under and with the subject it is routed by.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Trait for types that can be sent as stream events.
///
/// Implementors name the envelope field their data is encoded under and expose
/// the subject identifier used as partition key. Events sharing a subject are
/// delivered in publish order.
///
/// # Example
///
/// ```
/// use event_messages::EventMessage;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct ProfileUpdated {
///     user_id: i64,
///     bio: String,
/// }
///
/// impl EventMessage for ProfileUpdated {
///     const FIELD: &'static str = "ProfileUpdated";
///
///     fn subject_id(&self) -> i64 {
///         self.user_id
///     }
/// }
/// ```
pub trait EventMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The envelope field carrying events of this kind.
    const FIELD: &'static str;

    /// The identifier events are routed by.
    fn subject_id(&self) -> i64;
}

/// Opaque, already-serialized event data.
///
/// The bytes are fixed at construction. On the wire they are carried as a
/// base64 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Serializes `value` as JSON into a new payload.
    pub fn from_json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_vec(value).map(Self)
    }

    /// Parses the payload bytes as JSON.
    pub fn to_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// Announces a change to a user account, consumed by search ingestion and the
/// social graph builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    #[serde(rename = "SubjectID")]
    pub subject_id: i64,
    #[serde(rename = "Payload")]
    pub payload: Payload,
}

impl UserEvent {
    pub fn new(subject_id: i64, payload: Payload) -> Self {
        Self {
            subject_id,
            payload,
        }
    }
}

impl EventMessage for UserEvent {
    const FIELD: &'static str = "UserEvent";

    fn subject_id(&self) -> i64 {
        self.subject_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_travels_as_base64() {
        let event = UserEvent::new(7, Payload::new(b"hello".to_vec()));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["SubjectID"], 7);
        assert_eq!(json["Payload"], "aGVsbG8=");

        let back: UserEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn payload_rejects_invalid_base64() {
        let result: Result<Payload, _> = serde_json::from_str("\"not base64!\"");
        assert!(result.is_err());
    }

    #[test]
    fn json_payload_helpers() {
        let payload = Payload::from_json(&serde_json::json!({"x": 1})).unwrap();
        let value: serde_json::Value = payload.to_json().unwrap();
        assert_eq!(value, serde_json::json!({"x": 1}));
        assert!(!payload.is_empty());
    }
}
