use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Context, HandlerError, HandlerRef};
use crate::application::ProjectionConfigurer;
use crate::envelope::Envelope;
use crate::fact::Fact;
use crate::message::Message;
use crate::observer::ObserverSet;

/// Builds a read model from events.
///
/// Projections own their checkpoints. For each event the engine reads the
/// checkpoint of the event's stream; if the event has not been applied yet
/// the handler applies it and returns the new checkpoint, which must be
/// exactly one past the event's offset.
#[async_trait]
pub trait ProjectionMessageHandler: Send + Sync + 'static {
    /// Declare identity and routes.
    fn configure(&self, c: &mut ProjectionConfigurer);

    /// Offset of the first event on `stream_id` not yet applied.
    async fn checkpoint_offset(&self, ctx: &Context, stream_id: &str)
        -> Result<u64, HandlerError>;

    /// Apply an event and return the new checkpoint offset.
    async fn handle_event(
        &self,
        ctx: &Context,
        scope: &mut ProjectionEventScope<'_>,
        event: &dyn Message,
    ) -> Result<u64, HandlerError>;

    /// Reduce the size of the read model. May run concurrently with
    /// [`handle_event`](Self::handle_event).
    async fn compact(
        &self,
        _ctx: &Context,
        _scope: &mut ProjectionCompactScope,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Callback surface for [`ProjectionMessageHandler::handle_event`].
pub struct ProjectionEventScope<'a> {
    handler: &'a HandlerRef,
    envelope: &'a Envelope,
    observers: &'a ObserverSet,
    now: DateTime<Utc>,
    stream_id: &'a str,
    offset: u64,
    checkpoint_offset: u64,
}

impl<'a> ProjectionEventScope<'a> {
    pub(crate) fn new(
        handler: &'a HandlerRef,
        envelope: &'a Envelope,
        observers: &'a ObserverSet,
        now: DateTime<Utc>,
        stream_id: &'a str,
        offset: u64,
        checkpoint_offset: u64,
    ) -> Self {
        Self {
            handler,
            envelope,
            observers,
            now,
            stream_id,
            offset,
            checkpoint_offset,
        }
    }

    pub fn stream_id(&self) -> &str {
        self.stream_id
    }

    /// Offset of the event on its stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The checkpoint read before this call.
    pub fn checkpoint_offset(&self) -> u64 {
        self.checkpoint_offset
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.envelope.created_at
    }

    /// Always true: the engine delivers each event to a projection once.
    pub fn is_primary_delivery(&self) -> bool {
        true
    }

    /// The engine's current virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.observers.notify(Fact::MessageLoggedByProjection {
            handler: self.handler.clone(),
            envelope: Some(self.envelope.clone()),
            message: message.into(),
        });
    }
}

/// Callback surface for [`ProjectionMessageHandler::compact`].
///
/// Compaction may run on another task, so logged lines are buffered and
/// published once it finishes.
#[derive(Debug)]
pub struct ProjectionCompactScope {
    now: DateTime<Utc>,
    logs: Vec<String>,
}

impl ProjectionCompactScope {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            logs: Vec::new(),
        }
    }

    /// The engine's current virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
    }

    pub(crate) fn into_logs(self) -> Vec<String> {
        self.logs
    }
}
