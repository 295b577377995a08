use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length, in bytes, of the fields making up an event identity.
pub const MAX_IDENTITY_FIELD_LEN: usize = 255;

/// Enumeration of reasons an event is refused before it reaches the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),
    #[error("field '{field}' is longer than {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },
    #[error("field '{0}' contains control characters")]
    ControlCharacters(&'static str),
}

/// An event notification handed to the aggregator by a producer.
///
/// Only `topic` and `event_id` take part in deduplication, see [`Event::identity`].
/// The producer may retransmit the same identity with a different `timestamp` or `payload`.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Event {
    pub topic: String,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl Event {
    pub fn new(topic: &str, event_id: &str, source: &str, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.to_owned(),
            event_id: event_id.to_owned(),
            timestamp: Utc::now(),
            source: source.to_owned(),
            payload,
        }
    }

    pub fn identity(&self) -> Identity<'_> {
        Identity {
            topic: &self.topic,
            event_id: &self.event_id,
        }
    }

    /// Check the event is well-formed enough to be queued.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_identity_field("topic", &self.topic)?;
        validate_identity_field("event_id", &self.event_id)?;

        if self.source.trim().is_empty() {
            return Err(ValidationError::EmptyField("source"));
        }

        Ok(())
    }
}

fn validate_identity_field(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    if value.len() > MAX_IDENTITY_FIELD_LEN {
        return Err(ValidationError::FieldTooLong {
            field,
            max: MAX_IDENTITY_FIELD_LEN,
        });
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacters(field));
    }
    Ok(())
}

/// The `(topic, event_id)` pair deciding whether two events are the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity<'a> {
    pub topic: &'a str,
    pub event_id: &'a str,
}

impl fmt::Display for Identity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_created() -> Event {
        Event::new(
            "order.created",
            "order_12345",
            "checkout",
            json!({"amount": 42}),
        )
    }

    #[test]
    fn test_valid_event() {
        assert_eq!(order_created().validate(), Ok(()));
    }

    #[test]
    fn test_identity_ignores_payload_and_timestamp() {
        let first = order_created();
        let mut retry = order_created();
        retry.payload = json!({"amount": 43});
        retry.timestamp = first.timestamp + chrono::Duration::minutes(1);

        assert_ne!(first, retry);
        assert_eq!(first.identity(), retry.identity());
        assert_eq!(first.identity().to_string(), "order.created/order_12345");
    }

    #[test]
    fn test_empty_fields_are_rejected() {
        let mut event = order_created();
        event.topic = "  ".to_owned();
        assert_eq!(event.validate(), Err(ValidationError::EmptyField("topic")));

        let mut event = order_created();
        event.event_id = "".to_owned();
        assert_eq!(
            event.validate(),
            Err(ValidationError::EmptyField("event_id"))
        );

        let mut event = order_created();
        event.source = "".to_owned();
        assert_eq!(event.validate(), Err(ValidationError::EmptyField("source")));
    }

    #[test]
    fn test_oversized_and_control_characters_are_rejected() {
        let mut event = order_created();
        event.event_id = "x".repeat(MAX_IDENTITY_FIELD_LEN + 1);
        assert_eq!(
            event.validate(),
            Err(ValidationError::FieldTooLong {
                field: "event_id",
                max: MAX_IDENTITY_FIELD_LEN
            })
        );

        let mut event = order_created();
        event.topic = "order\ncreated".to_owned();
        assert_eq!(
            event.validate(),
            Err(ValidationError::ControlCharacters("topic"))
        );
    }

    #[test]
    fn test_deserialize_defaults_payload() {
        let event: Event = serde_json::from_value(json!({
            "topic": "order.created",
            "event_id": "order_12345",
            "timestamp": "2025-10-18T10:00:00Z",
            "source": "checkout",
        }))
        .unwrap();

        assert_eq!(event.payload, json!({}));
        assert_eq!(event.timestamp.to_rfc3339(), "2025-10-18T10:00:00+00:00");
    }

    #[test]
    fn test_deserialize_rejects_bad_timestamp() {
        let result = serde_json::from_value::<Event>(json!({
            "topic": "order.created",
            "event_id": "order_12345",
            "timestamp": "not-a-timestamp",
            "source": "checkout",
            "payload": {},
        }));

        assert!(result.is_err());
    }
}
