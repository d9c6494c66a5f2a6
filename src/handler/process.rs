use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::Location;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::scope::{ScopeCore, Violation};
use super::{unexpected_message, Context, HandlerError};
use crate::application::ProcessConfigurer;
use crate::envelope::{Envelope, Origin};
use crate::fact::Fact;
use crate::message::{Message, MessageKind};

/// The state of one process instance.
///
/// Roots are cloned before each call and the clone is committed only when
/// the call succeeds.
pub trait ProcessRoot: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> ProcessRoot for T where T: Clone + fmt::Debug + Send + Sync + 'static {}

/// Coordinates a long-running workflow: events and timeouts in, commands and
/// timeouts out.
#[async_trait]
pub trait ProcessMessageHandler: Send + Sync + 'static {
    type Root: ProcessRoot;

    /// Declare identity and routes.
    fn configure(&self, c: &mut ProcessConfigurer);

    /// A root in its initial state.
    fn new_root(&self) -> Self::Root;

    /// The instance an event targets.
    ///
    /// `Ok(None)` ignores the event. A returned id must not be empty.
    async fn route_event_to_instance(
        &self,
        ctx: &Context,
        event: &dyn Message,
    ) -> Result<Option<String>, HandlerError>;

    async fn handle_event(
        &self,
        ctx: &Context,
        scope: &mut ProcessEventScope<'_, Self::Root>,
        event: &dyn Message,
    ) -> Result<(), HandlerError>;

    /// Handle a timeout scheduled by this process.
    ///
    /// Processes that never schedule timeouts need not implement this.
    async fn handle_timeout(
        &self,
        _ctx: &Context,
        _scope: &mut ProcessTimeoutScope<'_, Self::Root>,
        _timeout: &dyn Message,
    ) -> Result<(), HandlerError> {
        unexpected_message()
    }
}

/// Operations shared by process event and timeout scopes.
pub struct ProcessScope<'a, R: ProcessRoot> {
    core: ScopeCore<'a>,
    instance_id: String,
    root: R,
    ended: bool,
    commands: Vec<Envelope>,
    ready: Vec<Envelope>,
    pending: Vec<Envelope>,
}

/// What a process call left behind.
pub(crate) struct ProcessOutcome<R> {
    pub root: R,
    pub ended: bool,
    pub commands: Vec<Envelope>,
    pub ready: Vec<Envelope>,
    pub pending: Vec<Envelope>,
    pub violation: Option<Violation>,
}

impl<'a, R: ProcessRoot> ProcessScope<'a, R> {
    fn new(core: ScopeCore<'a>, instance_id: String, root: R) -> Self {
        Self {
            core,
            instance_id,
            root,
            ended: false,
            commands: Vec::new(),
            ready: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn root(&self) -> &R {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut R {
        &mut self.root
    }

    /// The engine's current virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        self.core.now
    }

    fn origin(&self) -> Origin {
        Origin::new(self.core.handler.clone(), Some(self.instance_id.clone()))
    }

    fn revert_ending(&mut self) {
        if !self.ended {
            return;
        }
        self.ended = false;
        self.core.emit(Fact::ProcessInstanceEndingReverted {
            handler: self.core.handler.clone(),
            instance_id: self.instance_id.clone(),
            root: format!("{:?}", self.root),
            envelope: self.core.envelope.clone(),
        });
    }

    /// Execute a command. Reverts an [`end`](Self::end) made earlier in this call.
    #[track_caller]
    pub fn execute_command<M: Message>(&mut self, command: M) {
        let location = Location::caller();
        let command: Arc<dyn Message> = Arc::new(command);
        if !self.core.check_produced(
            "execute_command",
            &command,
            MessageKind::Command,
            location,
        ) {
            return;
        }
        self.revert_ending();

        let env = self.core.envelope.new_child_command(
            self.core.ids.next(),
            command,
            self.core.now,
            self.origin(),
        );
        self.commands.push(env.clone());

        self.core.emit(Fact::CommandExecutedByProcess {
            handler: self.core.handler.clone(),
            instance_id: self.instance_id.clone(),
            root: format!("{:?}", self.root),
            envelope: self.core.envelope.clone(),
            command_envelope: env,
        });
    }

    /// Schedule a timeout for delivery at `at`.
    ///
    /// A timeout due at or before the current time is delivered in the same
    /// dispatch cycle. Reverts an [`end`](Self::end) made earlier in this call.
    #[track_caller]
    pub fn schedule_timeout<M: Message>(&mut self, timeout: M, at: DateTime<Utc>) {
        let location = Location::caller();
        let timeout: Arc<dyn Message> = Arc::new(timeout);
        if !self.core.check_produced(
            "schedule_timeout",
            &timeout,
            MessageKind::Timeout,
            location,
        ) {
            return;
        }
        self.revert_ending();

        let env = self.core.envelope.new_child_timeout(
            self.core.ids.next(),
            timeout,
            self.core.now,
            at,
            self.origin(),
        );
        if at <= self.core.now {
            self.ready.push(env.clone());
        } else {
            self.pending.push(env.clone());
        }

        self.core.emit(Fact::TimeoutScheduledByProcess {
            handler: self.core.handler.clone(),
            instance_id: self.instance_id.clone(),
            root: format!("{:?}", self.root),
            envelope: self.core.envelope.clone(),
            timeout_envelope: env,
        });
    }

    /// End the instance. Idempotent.
    ///
    /// Once the call returns, the root is discarded, pending timeouts are
    /// dropped and later messages routed to this instance are ignored.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.core.emit(Fact::ProcessInstanceEnded {
            handler: self.core.handler.clone(),
            instance_id: self.instance_id.clone(),
            root: format!("{:?}", self.root),
            envelope: self.core.envelope.clone(),
        });
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.core.emit(Fact::MessageLoggedByProcess {
            handler: self.core.handler.clone(),
            instance_id: self.instance_id.clone(),
            root: format!("{:?}", self.root),
            envelope: self.core.envelope.clone(),
            message: message.into(),
        });
    }

    pub(crate) fn into_outcome(self) -> ProcessOutcome<R> {
        ProcessOutcome {
            root: self.root,
            ended: self.ended,
            commands: self.commands,
            ready: self.ready,
            pending: self.pending,
            violation: self.core.violation,
        }
    }
}

/// Callback surface for [`ProcessMessageHandler::handle_event`].
pub struct ProcessEventScope<'a, R: ProcessRoot>(ProcessScope<'a, R>);

impl<'a, R: ProcessRoot> ProcessEventScope<'a, R> {
    pub(crate) fn new(core: ScopeCore<'a>, instance_id: String, root: R) -> Self {
        Self(ProcessScope::new(core, instance_id, root))
    }

    /// When the event was recorded.
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.0.core.envelope.created_at
    }

    pub(crate) fn into_outcome(self) -> ProcessOutcome<R> {
        self.0.into_outcome()
    }
}

impl<'a, R: ProcessRoot> Deref for ProcessEventScope<'a, R> {
    type Target = ProcessScope<'a, R>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<R: ProcessRoot> DerefMut for ProcessEventScope<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Callback surface for [`ProcessMessageHandler::handle_timeout`].
pub struct ProcessTimeoutScope<'a, R: ProcessRoot>(ProcessScope<'a, R>);

impl<'a, R: ProcessRoot> ProcessTimeoutScope<'a, R> {
    pub(crate) fn new(core: ScopeCore<'a>, instance_id: String, root: R) -> Self {
        Self(ProcessScope::new(core, instance_id, root))
    }

    /// When the timeout was due.
    pub fn scheduled_for(&self) -> DateTime<Utc> {
        let env = self.0.core.envelope;
        env.scheduled_for.unwrap_or(env.created_at)
    }

    pub(crate) fn into_outcome(self) -> ProcessOutcome<R> {
        self.0.into_outcome()
    }
}

impl<'a, R: ProcessRoot> Deref for ProcessTimeoutScope<'a, R> {
    type Target = ProcessScope<'a, R>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<R: ProcessRoot> DerefMut for ProcessTimeoutScope<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
