use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::scope::{ScopeCore, Violation};
use super::UnexpectedMessage;
use crate::application::AggregateConfigurer;
use crate::envelope::{Envelope, EventStreamPosition, Origin};
use crate::fact::Fact;
use crate::message::{Message, MessageKind};

/// The state of one aggregate instance.
///
/// The engine rebuilds a root for every command by replaying the instance's
/// history through [`AggregateRoot::apply_event`], so a root must be fully
/// determined by the events applied to it.
pub trait AggregateRoot: fmt::Debug + Send + Sync + 'static {
    /// Apply an event recorded by this aggregate.
    fn apply_event(&mut self, event: &dyn Message) -> Result<(), UnexpectedMessage>;
}

/// Handles commands for an aggregate: transactional state, events out.
///
/// Aggregate callbacks are synchronous. An aggregate makes decisions from its
/// own state only.
///
/// # Example
///
/// ```ignore
/// struct OrderAggregate;
///
/// impl AggregateMessageHandler for OrderAggregate {
///     type Root = Order;
///
///     fn configure(&self, c: &mut AggregateConfigurer) {
///         c.identity("orders", "2a4f0e38-5f2d-4c43-b5a0-2a1b3f0d6a51")
///             .handles_command::<PlaceOrder>()
///             .records_event::<OrderPlaced>();
///     }
///
///     fn new_root(&self) -> Order {
///         Order::default()
///     }
///
///     fn route_command_to_instance(&self, command: &dyn Message) -> Result<String, UnexpectedMessage> {
///         match command.downcast_ref::<PlaceOrder>() {
///             Some(c) => Ok(c.order_id.clone()),
///             None => Err(UnexpectedMessage::new()),
///         }
///     }
///
///     fn handle_command(
///         &self,
///         scope: &mut AggregateCommandScope<'_, Order>,
///         command: &dyn Message,
///     ) -> Result<(), UnexpectedMessage> {
///         let Some(c) = command.downcast_ref::<PlaceOrder>() else {
///             return Err(UnexpectedMessage::new());
///         };
///         if !scope.root().placed {
///             scope.record_event(OrderPlaced { order_id: c.order_id.clone() });
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait AggregateMessageHandler: Send + Sync + 'static {
    type Root: AggregateRoot;

    /// Declare identity and routes.
    fn configure(&self, c: &mut AggregateConfigurer);

    /// A root in its initial state.
    fn new_root(&self) -> Self::Root;

    /// The id of the instance the command targets. Must not be empty.
    fn route_command_to_instance(&self, command: &dyn Message)
        -> Result<String, UnexpectedMessage>;

    fn handle_command(
        &self,
        scope: &mut AggregateCommandScope<'_, Self::Root>,
        command: &dyn Message,
    ) -> Result<(), UnexpectedMessage>;
}

/// Callback surface for [`AggregateMessageHandler::handle_command`].
pub struct AggregateCommandScope<'a, R: AggregateRoot> {
    core: ScopeCore<'a>,
    instance_id: String,
    root: R,
    new_root: &'a dyn Fn() -> R,
    stream_id: &'a str,
    next_offset: u64,
    exists: bool,
    destroyed: bool,
    destroyed_from: Option<usize>,
    produced: Vec<Envelope>,
    apply_failure: Option<(UnexpectedMessage, Arc<dyn Message>)>,
}

/// What a command call left behind.
pub(crate) struct AggregateOutcome {
    pub produced: Vec<Envelope>,
    pub destroyed: bool,
    /// Index into `produced` of the first event after the last destroy.
    pub destroyed_from: Option<usize>,
    pub next_offset: u64,
    pub violation: Option<Violation>,
    pub apply_failure: Option<(UnexpectedMessage, Arc<dyn Message>)>,
}

impl<'a, R: AggregateRoot> AggregateCommandScope<'a, R> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        core: ScopeCore<'a>,
        instance_id: String,
        root: R,
        new_root: &'a dyn Fn() -> R,
        stream_id: &'a str,
        next_offset: u64,
        exists: bool,
    ) -> Self {
        Self {
            core,
            instance_id,
            root,
            new_root,
            stream_id,
            next_offset,
            exists,
            destroyed: false,
            destroyed_from: None,
            produced: Vec::new(),
            apply_failure: None,
        }
    }

    /// The id returned by `route_command_to_instance`.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Current state, including events recorded earlier in this call.
    pub fn root(&self) -> &R {
        &self.root
    }

    /// The engine's current virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        self.core.now
    }

    /// Record an event and apply it to the root.
    ///
    /// Recording after [`destroy`](Self::destroy) in the same call reverts
    /// the destruction.
    #[track_caller]
    pub fn record_event<M: Message>(&mut self, event: M) {
        let location = Location::caller();
        let event: Arc<dyn Message> = Arc::new(event);
        if self.apply_failure.is_some()
            || !self
                .core
                .check_produced("record_event", &event, MessageKind::Event, location)
        {
            return;
        }

        if !self.exists {
            let root = format!("{:?}", self.root);
            let fact = if self.destroyed {
                Fact::AggregateInstanceDestructionReverted {
                    handler: self.core.handler.clone(),
                    instance_id: self.instance_id.clone(),
                    root,
                    envelope: self.core.envelope.clone(),
                }
            } else {
                Fact::AggregateInstanceCreated {
                    handler: self.core.handler.clone(),
                    instance_id: self.instance_id.clone(),
                    root,
                    envelope: self.core.envelope.clone(),
                }
            };
            self.core.emit(fact);
            self.exists = true;
            self.destroyed = false;
        }

        if let Err(signal) = self.root.apply_event(&*event) {
            self.apply_failure = Some((signal, event));
            return;
        }

        let env = self.core.envelope.new_child_event(
            self.core.ids.next(),
            event,
            self.core.now,
            Origin::new(self.core.handler.clone(), Some(self.instance_id.clone())),
            EventStreamPosition::new(self.stream_id, self.next_offset),
        );
        self.next_offset += 1;
        self.produced.push(env.clone());

        self.core.emit(Fact::EventRecordedByAggregate {
            handler: self.core.handler.clone(),
            instance_id: self.instance_id.clone(),
            root: format!("{:?}", self.root),
            envelope: self.core.envelope.clone(),
            event_envelope: env,
        });
    }

    /// Destroy the instance, discarding its history.
    ///
    /// Does nothing if the instance does not exist.
    pub fn destroy(&mut self) {
        if !self.exists || self.core.violation.is_some() {
            return;
        }
        self.root = (self.new_root)();
        self.exists = false;
        self.destroyed = true;
        self.destroyed_from = Some(self.produced.len());

        self.core.emit(Fact::AggregateInstanceDestroyed {
            handler: self.core.handler.clone(),
            instance_id: self.instance_id.clone(),
            root: format!("{:?}", self.root),
            envelope: self.core.envelope.clone(),
        });
    }

    /// True if the instance exists at this point of the call.
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.core.emit(Fact::MessageLoggedByAggregate {
            handler: self.core.handler.clone(),
            instance_id: self.instance_id.clone(),
            root: format!("{:?}", self.root),
            envelope: self.core.envelope.clone(),
            message: message.into(),
        });
    }

    pub(crate) fn into_outcome(self) -> AggregateOutcome {
        AggregateOutcome {
            produced: self.produced,
            destroyed: self.destroyed,
            destroyed_from: self.destroyed_from,
            next_offset: self.next_offset,
            violation: self.core.violation,
            apply_failure: self.apply_failure,
        }
    }
}
