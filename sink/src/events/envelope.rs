use chrono::Utc;
use uuid::Uuid;

use crate::events::Payload;

/// Numeric tag selecting the payload kind of an [`Event`].
///
/// Tags are part of the wire format and are never reused. A consumer seeing a tag it
/// does not know is looking at a message from a newer producer and must skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    CommitRequest,
    CommitResponse,
    CommitComplete,
}

impl EventType {
    /// Returns the wire tag for this event type.
    pub fn tag(&self) -> i32 {
        match self {
            EventType::CommitRequest => 0,
            EventType::CommitResponse => 1,
            EventType::CommitComplete => 2,
        }
    }
}

/// Self-describing wrapper around every control-channel message.
///
/// An event is immutable once constructed for sending. The type tag is derived from
/// the payload variant, so the two can never disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: Uuid,
    timestamp_ms: i64,
    payload: Payload,
}

impl Event {
    /// Creates a new event wrapping `payload`, stamped with a fresh id and the current
    /// time.
    pub fn new(payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp_ms: Utc::now().timestamp_millis(),
            payload,
        }
    }

    /// Reassembles an event from decoded parts.
    pub(crate) fn from_parts(id: Uuid, timestamp_ms: i64, payload: Payload) -> Self {
        Self {
            id,
            timestamp_ms,
            payload,
        }
    }

    /// Returns the unique id assigned at creation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the event type matching the payload variant.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Returns the creation time in epoch millis.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the event and returns the payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}
