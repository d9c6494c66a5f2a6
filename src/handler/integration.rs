use std::panic::Location;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::scope::{ScopeCore, Violation};
use super::{Context, HandlerError};
use crate::application::IntegrationConfigurer;
use crate::envelope::{Envelope, EventStreamPosition, Origin};
use crate::fact::Fact;
use crate::message::{Message, MessageKind};

/// Wraps an external effect: commands in, events out, no state.
#[async_trait]
pub trait IntegrationMessageHandler: Send + Sync + 'static {
    /// Declare identity and routes.
    fn configure(&self, c: &mut IntegrationConfigurer);

    async fn handle_command(
        &self,
        ctx: &Context,
        scope: &mut IntegrationCommandScope<'_>,
        command: &dyn Message,
    ) -> Result<(), HandlerError>;
}

/// Callback surface for [`IntegrationMessageHandler::handle_command`].
pub struct IntegrationCommandScope<'a> {
    core: ScopeCore<'a>,
    stream_id: &'a str,
    next_offset: u64,
    produced: Vec<Envelope>,
}

pub(crate) struct IntegrationOutcome {
    pub produced: Vec<Envelope>,
    pub next_offset: u64,
    pub violation: Option<Violation>,
}

impl<'a> IntegrationCommandScope<'a> {
    pub(crate) fn new(core: ScopeCore<'a>, stream_id: &'a str, next_offset: u64) -> Self {
        Self {
            core,
            stream_id,
            next_offset,
            produced: Vec::new(),
        }
    }

    /// The engine's current virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        self.core.now
    }

    #[track_caller]
    pub fn record_event<M: Message>(&mut self, event: M) {
        let location = Location::caller();
        let event: Arc<dyn Message> = Arc::new(event);
        if !self
            .core
            .check_produced("record_event", &event, MessageKind::Event, location)
        {
            return;
        }

        let env = self.core.envelope.new_child_event(
            self.core.ids.next(),
            event,
            self.core.now,
            Origin::new(self.core.handler.clone(), None),
            EventStreamPosition::new(self.stream_id, self.next_offset),
        );
        self.next_offset += 1;
        self.produced.push(env.clone());

        self.core.emit(Fact::EventRecordedByIntegration {
            handler: self.core.handler.clone(),
            envelope: self.core.envelope.clone(),
            event_envelope: env,
        });
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.core.emit(Fact::MessageLoggedByIntegration {
            handler: self.core.handler.clone(),
            envelope: self.core.envelope.clone(),
            message: message.into(),
        });
    }

    pub(crate) fn into_outcome(self) -> IntegrationOutcome {
        IntegrationOutcome {
            produced: self.produced,
            next_offset: self.next_offset,
            violation: self.core.violation,
        }
    }
}
