//! The envelope events travel in, and its wire encoding.
//!
//! An encoded envelope is a flat JSON object holding the publish timestamp and
//! the event under its kind's field:
//!
//! ```json
//! {"PublishedAt": "2024-03-01T10:00:00.123Z", "UserEvent": {"SubjectID": 1, "Payload": "eyJ4IjoxfQ=="}}
//! ```

use crate::error::{Result, StreamError};
use chrono::{DateTime, Utc};
use event_messages::EventMessage;
use serde_json::{Map, Value};

const PUBLISHED_AT: &str = "PublishedAt";

/// An event together with the time it was published.
///
/// Only the publisher stamps envelopes; consumers receive them already
/// stamped.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<E> {
    published_at: DateTime<Utc>,
    event: E,
}

impl<E: EventMessage> Envelope<E> {
    pub(crate) fn stamp(event: E) -> Self {
        Self {
            published_at: Utc::now(),
            event,
        }
    }

    /// When the publisher sent the event.
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn into_event(self) -> E {
        self.event
    }

    pub fn subject_id(&self) -> i64 {
        self.event.subject_id()
    }

    /// Partition key: the decimal form of the subject ID.
    pub fn partition_key(&self) -> String {
        self.subject_id().to_string()
    }

    /// Encodes the envelope to its wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let event = serde_json::to_value(&self.event)
            .map_err(|e| StreamError::Serialization(e.to_string()))?;
        let published_at = serde_json::to_value(self.published_at)
            .map_err(|e| StreamError::Serialization(e.to_string()))?;

        let mut fields = Map::with_capacity(2);
        fields.insert(PUBLISHED_AT.to_string(), published_at);
        fields.insert(E::FIELD.to_string(), event);

        serde_json::to_vec(&fields).map_err(|e| StreamError::Serialization(e.to_string()))
    }

    /// Decodes a wire-form envelope.
    ///
    /// Returns `Ok(None)` when the envelope is well formed but carries a
    /// different kind of event.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>> {
        let mut fields: Map<String, Value> = serde_json::from_slice(bytes)
            .map_err(|e| StreamError::Deserialization(e.to_string()))?;

        let event = match fields.remove(E::FIELD) {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => serde_json::from_value::<E>(value)
                .map_err(|e| StreamError::Deserialization(e.to_string()))?,
        };

        let published_at = fields
            .remove(PUBLISHED_AT)
            .ok_or_else(|| StreamError::Deserialization(format!("missing field '{}'", PUBLISHED_AT)))
            .and_then(|value| {
                serde_json::from_value::<DateTime<Utc>>(value)
                    .map_err(|e| StreamError::Deserialization(e.to_string()))
            })?;

        Ok(Some(Self {
            published_at,
            event,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_messages::{Payload, UserEvent};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TweetPosted {
        author: i64,
    }

    impl EventMessage for TweetPosted {
        const FIELD: &'static str = "TweetPosted";

        fn subject_id(&self) -> i64 {
            self.author
        }
    }

    fn user_event() -> UserEvent {
        UserEvent::new(1, Payload::from_json(&serde_json::json!({"x": 1})).unwrap())
    }

    #[test]
    fn decode_preserves_subject_and_payload() {
        let envelope = Envelope::stamp(user_event());
        let bytes = envelope.encode().unwrap();

        let decoded = Envelope::<UserEvent>::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded.event(), envelope.event());
        assert_eq!(decoded.published_at(), envelope.published_at());
    }

    #[test]
    fn wire_shape_is_flat() {
        let bytes = Envelope::stamp(user_event()).encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!(object["PublishedAt"].is_string());
        assert_eq!(object["UserEvent"]["SubjectID"], 1);
    }

    #[test]
    fn other_kinds_decode_to_none() {
        let bytes = Envelope::stamp(TweetPosted { author: 3 }).encode().unwrap();
        assert!(Envelope::<UserEvent>::decode(&bytes).unwrap().is_none());
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        let err = Envelope::<UserEvent>::decode(b"not json").unwrap_err();
        assert!(matches!(err, StreamError::Deserialization(_)));

        let missing_timestamp = br#"{"UserEvent": {"SubjectID": 1, "Payload": ""}}"#;
        let err = Envelope::<UserEvent>::decode(missing_timestamp).unwrap_err();
        assert!(matches!(err, StreamError::Deserialization(_)));
    }

    #[test]
    fn partition_key_is_decimal_subject() {
        let envelope = Envelope::stamp(UserEvent::new(-42, Payload::default()));
        assert_eq!(envelope.partition_key(), "-42");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use event_messages::{Payload, UserEvent};
    use proptest::prelude::*;

    proptest! {
        /// decode(encode(e)) keeps the subject and the exact payload bytes.
        #[test]
        fn prop_envelope_round_trip(
            subject in any::<i64>(),
            bytes in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let envelope = Envelope::stamp(UserEvent::new(subject, Payload::from(bytes.clone())));
            let wire = envelope.encode().unwrap();

            let decoded = Envelope::<UserEvent>::decode(&wire).unwrap().unwrap();
            prop_assert_eq!(decoded.subject_id(), subject);
            prop_assert_eq!(decoded.event().payload.as_bytes(), bytes.as_slice());
            prop_assert_eq!(decoded.published_at(), envelope.published_at());
        }
    }
}
