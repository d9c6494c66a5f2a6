//! Message envelopes and identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::handler::{HandlerRef, Identity};
use crate::message::{Message, MessageKind, MessageType};

/// Namespace for event stream ids derived from handler keys.
const EVENT_STREAM_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x3c, 0x1e, 0x52, 0x8a, 0x41, 0x7f, 0x4b, 0x09, 0x9e, 0x2d, 0x6a, 0x0c, 0x8b, 0x55, 0xd3,
    0x17,
]);

/// Key of the stream that holds events recorded directly by a test.
pub(crate) const EXTERNAL_STREAM_KEY: &str = "angzarr-testkit/external";

/// Derive the event stream id for a handler.
///
/// Depends only on the identity key: two handlers with different keys never
/// share a stream, and a handler's stream id is stable across runs.
pub fn stream_id_for(identity: &Identity) -> String {
    stream_id_for_key(&identity.key)
}

pub(crate) fn stream_id_for_key(key: &str) -> String {
    uuid::Uuid::new_v5(&EVENT_STREAM_NAMESPACE, key.as_bytes()).to_string()
}

/// Identifier of an envelope, unique within a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocates strictly increasing message ids, starting at 1.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    prev: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> MessageId {
        MessageId(self.prev.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Return to the initial state; the next id is 1 again.
    pub fn reset(&self) {
        self.prev.store(0, Ordering::SeqCst);
    }
}

/// The handler (and instance) that produced a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub handler: HandlerRef,
    /// Instance id for aggregates and processes; `None` for integrations.
    pub instance_id: Option<String>,
}

impl Origin {
    pub fn new(handler: HandlerRef, instance_id: Option<String>) -> Self {
        Self {
            handler,
            instance_id,
        }
    }
}

/// Position of an event within its stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventStreamPosition {
    pub stream_id: String,
    pub offset: u64,
}

impl EventStreamPosition {
    pub fn new(stream_id: impl Into<String>, offset: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            offset,
        }
    }
}

/// The engine's carrier of a message.
///
/// Envelopes are immutable once built. Root envelopes are their own cause and
/// correlation; children inherit the parent's correlation id and name the
/// parent as their cause.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_id: MessageId,
    pub causation_id: MessageId,
    pub correlation_id: MessageId,
    pub message: Arc<dyn Message>,
    pub kind: MessageKind,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    /// Set for timeouts only.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Absent for root messages.
    pub origin: Option<Origin>,
    /// Set for events only.
    pub event_stream: Option<EventStreamPosition>,
}

impl Envelope {
    fn root(
        id: MessageId,
        message: Arc<dyn Message>,
        kind: MessageKind,
        now: DateTime<Utc>,
    ) -> Self {
        let message_type = message.message_type();
        Self {
            message_id: id,
            causation_id: id,
            correlation_id: id,
            message,
            kind,
            message_type,
            created_at: now,
            scheduled_for: None,
            origin: None,
            event_stream: None,
        }
    }

    /// A root command envelope.
    pub fn new_command(id: MessageId, message: Arc<dyn Message>, now: DateTime<Utc>) -> Self {
        Self::root(id, message, MessageKind::Command, now)
    }

    /// A root event envelope.
    pub fn new_event(
        id: MessageId,
        message: Arc<dyn Message>,
        now: DateTime<Utc>,
        stream: EventStreamPosition,
    ) -> Self {
        Self {
            event_stream: Some(stream),
            ..Self::root(id, message, MessageKind::Event, now)
        }
    }

    fn child(
        &self,
        id: MessageId,
        message: Arc<dyn Message>,
        kind: MessageKind,
        now: DateTime<Utc>,
        origin: Origin,
    ) -> Self {
        let message_type = message.message_type();
        Self {
            message_id: id,
            causation_id: self.message_id,
            correlation_id: self.correlation_id,
            message,
            kind,
            message_type,
            created_at: now,
            scheduled_for: None,
            origin: Some(origin),
            event_stream: None,
        }
    }

    /// A command caused by this envelope.
    pub fn new_child_command(
        &self,
        id: MessageId,
        message: Arc<dyn Message>,
        now: DateTime<Utc>,
        origin: Origin,
    ) -> Self {
        self.child(id, message, MessageKind::Command, now, origin)
    }

    /// An event caused by this envelope.
    pub fn new_child_event(
        &self,
        id: MessageId,
        message: Arc<dyn Message>,
        now: DateTime<Utc>,
        origin: Origin,
        stream: EventStreamPosition,
    ) -> Self {
        Self {
            event_stream: Some(stream),
            ..self.child(id, message, MessageKind::Event, now, origin)
        }
    }

    /// A timeout caused by this envelope, deliverable at `scheduled_for`.
    pub fn new_child_timeout(
        &self,
        id: MessageId,
        message: Arc<dyn Message>,
        now: DateTime<Utc>,
        scheduled_for: DateTime<Utc>,
        origin: Origin,
    ) -> Self {
        Self {
            scheduled_for: Some(scheduled_for),
            ..self.child(id, message, MessageKind::Timeout, now, origin)
        }
    }

    pub fn is_root(&self) -> bool {
        self.origin.is_none()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.event_stream.as_ref().map(|s| s.stream_id.as_str())
    }

    pub fn stream_offset(&self) -> Option<u64> {
        self.event_stream.as_ref().map(|s| s.offset)
    }

    /// Instance id of the producing aggregate or process, if any.
    pub fn origin_instance_id(&self) -> Option<&str> {
        self.origin.as_ref().and_then(|o| o.instance_id.as_deref())
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.message_type, self.message_id)
    }
}
