//! The dispatch engine.
//!
//! An [`Engine`] owns one controller per registered handler, the routing
//! table and the message id generator. [`Engine::dispatch`] feeds a root
//! message through a FIFO drain loop: every envelope is offered to its
//! consumers in registration order, and whatever they produce is appended to
//! the queue. [`Engine::tick`] releases time-based work (due timeouts and
//! projection compaction) and drains it the same way.
//!
//! Every observable step is published as a [`Fact`] to the engine's
//! observers and to the observers of the current operation.

mod aggregate;
mod controller;
mod error;
mod integration;
mod options;
mod process;
mod projection;
pub mod run;
mod timeout;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

pub use error::{
    CheckpointConflict, DispatchError, HandlerErrors, HandlerFailure, UnexpectedBehavior,
    UnexpectedMessageError,
};
pub use options::{
    EngineOptions, OperationOptions, DEFAULT_COMPACTION_INTERVAL, DEFAULT_TICK_INTERVAL,
};
pub use run::{run, run_time_scaled};

pub(crate) use aggregate::AggregateController;
pub(crate) use controller::Controller;
pub(crate) use integration::IntegrationController;
pub(crate) use process::ProcessController;
pub(crate) use projection::ProjectionController;

use controller::HandleContext;
use error::ControllerError;

use crate::application::Application;
use crate::envelope::{
    stream_id_for_key, Envelope, EventStreamPosition, MessageIdGenerator, EXTERNAL_STREAM_KEY,
};
use crate::fact::Fact;
use crate::handler::{Context, HandlerRef};
use crate::message::{Message, MessageKind, ValidationScope};
use crate::observer::ObserverSet;
use crate::router::{ConfigurationError, Router};

/// Deterministic in-memory message dispatcher.
pub struct Engine {
    router: Arc<Router>,
    controllers: Vec<Box<dyn Controller>>,
    index: HashMap<String, usize>,
    ids: MessageIdGenerator,
    /// Stream of events recorded directly by the test.
    external_stream_id: String,
    external_offset: u64,
    options: EngineOptions,
}

impl Engine {
    /// Build an engine for `app`.
    ///
    /// Fails if the application's routes are inconsistent; no engine is
    /// produced in that case.
    pub fn new(app: &Application, options: EngineOptions) -> Result<Self, ConfigurationError> {
        let router = Router::new(app.handlers())?;

        let mut controllers = Vec::with_capacity(app.registered().len());
        let mut index = HashMap::new();
        for registered in app.registered() {
            let handler = &registered.config.handler;
            index.insert(handler.name().to_string(), controllers.len());
            controllers.push((registered.factory)(handler));
        }

        debug!(
            application = %app.identity(),
            handlers = controllers.len(),
            observers = options.observers.len(),
            "Engine initialized"
        );

        Ok(Self {
            router: Arc::new(router),
            controllers,
            index,
            ids: MessageIdGenerator::new(),
            external_stream_id: stream_id_for_key(EXTERNAL_STREAM_KEY),
            external_offset: 0,
            options,
        })
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Names of all handlers, in registration order.
    pub fn handler_names(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.handler().name()).collect()
    }

    /// The checkpoint the engine confirmed for a projection's stream.
    pub fn projection_checkpoint(&self, handler: &str, stream_id: &str) -> Option<u64> {
        let index = *self.index.get(handler)?;
        self.controllers[index].projection_checkpoint(stream_id)
    }

    /// Real-time interval between ticks when driven by [`run`].
    pub fn tick_interval(&self) -> Duration {
        self.options.tick_interval
    }

    /// Dispatch a command or event and drain everything it causes.
    pub async fn dispatch<M: Message>(
        &mut self,
        message: M,
        options: OperationOptions,
    ) -> Result<(), DispatchError> {
        self.dispatch_message(Arc::new(message), options).await
    }

    /// Type-erased form of [`Engine::dispatch`].
    ///
    /// A message whose type has no route is skipped: a
    /// [`Fact::DispatchCycleSkipped`] is emitted and `Ok(())` returned.
    pub async fn dispatch_message(
        &mut self,
        message: Arc<dyn Message>,
        options: OperationOptions,
    ) -> Result<(), DispatchError> {
        let observers = self.options.observers.merged(&options.observers);
        let message_type = message.message_type();

        let Some(kind) = self.router.kind_of(&message_type) else {
            debug!(message_type = %message_type, "No route for message type, skipping dispatch");
            observers.notify(Fact::DispatchCycleSkipped {
                message,
                message_type,
                engine_time: options.now,
            });
            return Ok(());
        };

        if kind == MessageKind::Timeout {
            return Err(DispatchError::InvalidMessage {
                kind,
                message_type: message_type.to_string(),
                reason: "timeouts can only be scheduled by a process".to_string(),
            });
        }
        if let Err(err) = message.validate(&ValidationScope::new(kind)) {
            return Err(DispatchError::InvalidMessage {
                kind,
                message_type: message_type.to_string(),
                reason: err.reason().to_string(),
            });
        }

        let id = self.ids.next();
        let envelope = match kind {
            MessageKind::Event => {
                let stream =
                    EventStreamPosition::new(self.external_stream_id.clone(), self.external_offset);
                self.external_offset += 1;
                Envelope::new_event(id, message, options.now, stream)
            }
            _ => Envelope::new_command(id, message, options.now),
        };

        debug!(
            message_id = %envelope.message_id,
            message_type = %envelope.message_type,
            kind = %kind,
            "Dispatch cycle begun"
        );
        observers.notify(Fact::DispatchCycleBegun {
            envelope: envelope.clone(),
            engine_time: options.now,
            enabled: options.enabled.clone(),
        });

        let mut failures = Vec::new();
        let result = self
            .drain(
                &observers,
                &options,
                VecDeque::from([envelope.clone()]),
                &mut failures,
            )
            .await
            .and_then(|()| collect(failures));

        observers.notify(Fact::DispatchCycleCompleted {
            envelope,
            error: result.as_ref().err().map(DispatchError::shared),
        });
        result
    }

    /// Release due timeouts and run due compactions, then drain whatever
    /// they produced.
    pub async fn tick(&mut self, options: OperationOptions) -> Result<(), DispatchError> {
        let observers = self.options.observers.merged(&options.observers);

        trace!(engine_time = %options.now, "Tick cycle begun");
        observers.notify(Fact::TickCycleBegun {
            engine_time: options.now,
            enabled: options.enabled.clone(),
        });

        let mut failures = Vec::new();
        let result = match self.tick_controllers(&observers, &options, &mut failures).await {
            Ok(queue) => self
                .drain(&observers, &options, queue, &mut failures)
                .await
                .and_then(|()| collect(failures)),
            Err(fatal) => Err(fatal),
        };

        observers.notify(Fact::TickCycleCompleted {
            error: result.as_ref().err().map(DispatchError::shared),
        });
        result
    }

    /// Clear all handler state and the id generator, then run the
    /// registered resetters.
    ///
    /// Observers registered through [`EngineOptions`] stay registered.
    pub async fn reset(&mut self) {
        for controller in &mut self.controllers {
            controller.reset();
        }
        self.ids.reset();
        self.external_offset = 0;

        for resetter in &self.options.resetters {
            resetter().await;
        }
        debug!("Engine reset");
    }

    /// Controllers that receive `env`, in registration order.
    fn targets_of(&self, env: &Envelope) -> Vec<usize> {
        if env.kind == MessageKind::Timeout {
            return env
                .origin
                .as_ref()
                .and_then(|origin| self.index.get(origin.handler.name()))
                .copied()
                .into_iter()
                .collect();
        }
        self.router
            .consumers_of(&env.message_type)
            .into_iter()
            .filter_map(|handler| self.index.get(handler.name()).copied())
            .collect()
    }

    async fn tick_controllers(
        &mut self,
        observers: &ObserverSet,
        options: &OperationOptions,
        failures: &mut Vec<HandlerFailure>,
    ) -> Result<VecDeque<Envelope>, DispatchError> {
        let ctx = Context::with_cancellation(options.cancellation.clone());
        let cx = HandleContext {
            ctx: &ctx,
            observers,
            now: options.now,
            ids: &self.ids,
            router: &self.router,
            compact_during_handling: self.options.compact_during_handling,
            compaction_interval: self.options.compaction_interval,
        };

        let mut queue = VecDeque::new();
        for controller in &mut self.controllers {
            if ctx.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            let handler = controller.handler().clone();
            let skip = self
                .router
                .handler(handler.name())
                .and_then(|config| options.enabled.skip_reason(config));
            if let Some(reason) = skip {
                trace!(handler = %handler.name(), reason = %reason, "Tick skipped");
                observers.notify(Fact::TickSkipped { handler, reason });
                continue;
            }

            observers.notify(Fact::TickBegun {
                handler: handler.clone(),
            });
            match controller.tick(&cx).await {
                Ok(produced) => {
                    observers.notify(Fact::TickCompleted {
                        handler,
                        error: None,
                    });
                    queue.extend(produced);
                }
                Err(err) => {
                    warn!(handler = %handler.name(), error = %err.shared(), "Tick failed");
                    observers.notify(Fact::TickCompleted {
                        handler: handler.clone(),
                        error: Some(err.shared()),
                    });
                    record_failure(err, handler, None, failures)?;
                }
            }
        }
        Ok(queue)
    }

    /// Run the dispatch queue until it is empty.
    ///
    /// Handler errors are pushed onto `failures` and draining continues;
    /// fatal errors abort immediately.
    async fn drain(
        &mut self,
        observers: &ObserverSet,
        options: &OperationOptions,
        mut queue: VecDeque<Envelope>,
        failures: &mut Vec<HandlerFailure>,
    ) -> Result<(), DispatchError> {
        let ctx = Context::with_cancellation(options.cancellation.clone());

        while let Some(env) = queue.pop_front() {
            let targets = self.targets_of(&env);
            let cx = HandleContext {
                ctx: &ctx,
                observers,
                now: options.now,
                ids: &self.ids,
                router: &self.router,
                compact_during_handling: self.options.compact_during_handling,
                compaction_interval: self.options.compaction_interval,
            };

            trace!(
                message_id = %env.message_id,
                message_type = %env.message_type,
                consumers = targets.len(),
                "Dispatching message"
            );
            observers.notify(Fact::DispatchBegun {
                envelope: env.clone(),
            });

            for index in targets {
                if ctx.is_cancelled() {
                    return Err(DispatchError::Cancelled);
                }

                let controller = &mut self.controllers[index];
                let handler = controller.handler().clone();
                let skip = cx
                    .router
                    .handler(handler.name())
                    .and_then(|config| options.enabled.skip_reason(config));
                if let Some(reason) = skip {
                    debug!(
                        handler = %handler.name(),
                        message_id = %env.message_id,
                        reason = %reason,
                        "Handling skipped"
                    );
                    observers.notify(Fact::HandlingSkipped {
                        handler,
                        envelope: env.clone(),
                        reason,
                    });
                    continue;
                }

                let result = match controller.should_handle(&cx, &env).await {
                    Ok(false) => continue,
                    Ok(true) => {
                        observers.notify(Fact::HandlingBegun {
                            handler: handler.clone(),
                            envelope: env.clone(),
                        });
                        controller.handle(&cx, &env).await
                    }
                    Err(err) => {
                        observers.notify(Fact::HandlingBegun {
                            handler: handler.clone(),
                            envelope: env.clone(),
                        });
                        Err(err)
                    }
                };

                match result {
                    Ok(produced) => {
                        trace!(
                            handler = %handler.name(),
                            message_id = %env.message_id,
                            produced = produced.len(),
                            "Handling completed"
                        );
                        observers.notify(Fact::HandlingCompleted {
                            handler,
                            envelope: env.clone(),
                            error: None,
                        });
                        queue.extend(produced);
                    }
                    Err(err) => {
                        warn!(
                            handler = %handler.name(),
                            message_id = %env.message_id,
                            message_type = %env.message_type,
                            error = %err.shared(),
                            "Handling failed"
                        );
                        observers.notify(Fact::HandlingCompleted {
                            handler: handler.clone(),
                            envelope: env.clone(),
                            error: Some(err.shared()),
                        });
                        record_failure(err, handler, Some(&env), failures)?;
                    }
                }
            }

            observers.notify(Fact::DispatchCompleted { envelope: env });
        }
        Ok(())
    }
}

/// Push a recoverable error onto `failures`, or return a fatal one.
fn record_failure(
    err: ControllerError,
    handler: HandlerRef,
    env: Option<&Envelope>,
    failures: &mut Vec<HandlerFailure>,
) -> Result<(), DispatchError> {
    let shared = err.shared();
    if let Some(fatal) = err.into_dispatch_error() {
        return Err(fatal);
    }
    failures.push(HandlerFailure {
        handler,
        message_id: env.map(|e| e.message_id),
        message_type: env.map(|e| e.message_type),
        error: shared,
    });
    Ok(())
}

fn collect(failures: Vec<HandlerFailure>) -> Result<(), DispatchError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DispatchError::Handlers(HandlerErrors::new(failures)))
    }
}
