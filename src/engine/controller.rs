//! The protocol between the engine and its per-handler controllers.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::error::{Callback, ControllerError};
use crate::envelope::{Envelope, MessageIdGenerator};
use crate::handler::scope::ScopeCore;
use crate::handler::{Context, HandlerRef};
use crate::message::MessageKind;
use crate::observer::ObserverSet;
use crate::router::Router;

/// Engine services for one controller call.
pub(crate) struct HandleContext<'a> {
    pub ctx: &'a Context,
    pub observers: &'a ObserverSet,
    pub now: DateTime<Utc>,
    pub ids: &'a MessageIdGenerator,
    pub router: &'a Router,
    pub compact_during_handling: bool,
    pub compaction_interval: TimeDelta,
}

impl HandleContext<'_> {
    pub fn scope_core<'b>(&'b self, handler: &'b HandlerRef, envelope: &'b Envelope) -> ScopeCore<'b> {
        ScopeCore::new(
            handler,
            envelope,
            self.router,
            self.ids,
            self.observers,
            self.now,
        )
    }
}

/// Wraps one handler and owns its in-memory state.
#[async_trait]
pub(crate) trait Controller: Send + Sync {
    fn handler(&self) -> &HandlerRef;

    /// Decide whether `env` needs handling at all.
    ///
    /// Called before `HandlingBegun` is emitted; returning `false` skips the
    /// handler without any handling facts.
    async fn should_handle(
        &mut self,
        _cx: &HandleContext<'_>,
        _env: &Envelope,
    ) -> Result<bool, ControllerError> {
        Ok(true)
    }

    /// Handle `env`, returning the messages it produced.
    async fn handle(
        &mut self,
        cx: &HandleContext<'_>,
        env: &Envelope,
    ) -> Result<Vec<Envelope>, ControllerError>;

    /// Release time-based work, returning messages to dispatch.
    async fn tick(&mut self, _cx: &HandleContext<'_>) -> Result<Vec<Envelope>, ControllerError> {
        Ok(Vec::new())
    }

    /// Drop all in-memory state.
    fn reset(&mut self);

    /// The checkpoint recorded for a projection stream.
    fn projection_checkpoint(&self, _stream_id: &str) -> Option<u64> {
        None
    }
}

/// Fail unless `env` is of `kind` and an inbound route of the handler.
pub(crate) fn check_inbound(
    cb: &Callback<'_>,
    cx: &HandleContext<'_>,
    env: &Envelope,
    kind: MessageKind,
) -> Result<(), ControllerError> {
    let inbound = cx
        .router
        .direction_of(cb.handler.name(), &env.message_type)
        .is_some_and(|d| d.is_inbound());

    if env.kind != kind || !inbound {
        return Err(cb.behavior(
            Some(&env.message),
            format!(
                "the '{}' {} is not consumed by this handler",
                env.message_type, env.kind
            ),
        ));
    }
    Ok(())
}
