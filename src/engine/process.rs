//! Process controller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::controller::{check_inbound, Controller, HandleContext};
use super::error::{Callback, ControllerError, UnexpectedBehavior};
use super::timeout::TimeoutQueue;
use crate::envelope::Envelope;
use crate::fact::Fact;
use crate::handler::{
    HandlerRef, ProcessEventScope, ProcessMessageHandler, ProcessOutcome, ProcessTimeoutScope,
};
use crate::message::MessageKind;

/// Owns the roots and pending timeouts of one process.
pub(crate) struct ProcessController<H: ProcessMessageHandler> {
    handler_ref: HandlerRef,
    handler: Arc<H>,
    instances: HashMap<String, H::Root>,
    ended: HashSet<String>,
    timeouts: TimeoutQueue,
}

impl<H: ProcessMessageHandler> ProcessController<H> {
    pub fn new(handler_ref: HandlerRef, handler: Arc<H>) -> Self {
        Self {
            handler_ref,
            handler,
            instances: HashMap::new(),
            ended: HashSet::new(),
            timeouts: TimeoutQueue::default(),
        }
    }

    fn callback(&self, method: &'static str) -> Callback<'_> {
        Callback::new(&self.handler_ref, std::any::type_name::<H>(), method)
    }

    /// Resolve the target instance, or `None` if the message is dropped.
    async fn route(
        &self,
        cx: &HandleContext<'_>,
        env: &Envelope,
    ) -> Result<Option<String>, ControllerError> {
        if env.kind == MessageKind::Timeout {
            check_inbound(&self.callback("handle_timeout"), cx, env, MessageKind::Timeout)?;
            let instance_id = match &env.origin {
                Some(origin) if origin.handler == self.handler_ref => origin.instance_id.clone(),
                _ => None,
            };
            let Some(instance_id) = instance_id else {
                return Err(self.callback("handle_timeout").behavior(
                    Some(&env.message),
                    format!(
                        "the '{}' timeout was not scheduled by this handler",
                        env.message_type
                    ),
                ));
            };
            if self.ended.contains(&instance_id) {
                cx.observers
                    .notify(Fact::ProcessTimeoutRoutedToEndedInstance {
                        handler: self.handler_ref.clone(),
                        instance_id,
                        envelope: env.clone(),
                    });
                return Ok(None);
            }
            return Ok(Some(instance_id));
        }

        check_inbound(&self.callback("handle_event"), cx, env, MessageKind::Event)?;

        let routed = self
            .handler
            .route_event_to_instance(cx.ctx, &*env.message)
            .await
            .map_err(|err| {
                self.callback("route_event_to_instance")
                    .failed(err, &env.message)
            })?;

        match routed {
            None => {
                cx.observers.notify(Fact::ProcessEventIgnored {
                    handler: self.handler_ref.clone(),
                    envelope: env.clone(),
                });
                Ok(None)
            }
            Some(id) if id.is_empty() => Err(self.callback("route_event_to_instance").behavior(
                Some(&env.message),
                format!(
                    "routed a '{}' event to an empty instance ID",
                    env.message_type
                ),
            )),
            Some(id) if self.ended.contains(&id) => {
                cx.observers.notify(Fact::ProcessEventRoutedToEndedInstance {
                    handler: self.handler_ref.clone(),
                    instance_id: id,
                    envelope: env.clone(),
                });
                Ok(None)
            }
            Some(id) => Ok(Some(id)),
        }
    }

    fn load(&self, cx: &HandleContext<'_>, env: &Envelope, instance_id: &str) -> H::Root {
        if let Some(root) = self.instances.get(instance_id) {
            cx.observers.notify(Fact::ProcessInstanceLoaded {
                handler: self.handler_ref.clone(),
                instance_id: instance_id.to_string(),
                root: format!("{root:?}"),
                envelope: env.clone(),
            });
            return root.clone();
        }

        let root = self.handler.new_root();
        cx.observers.notify(Fact::ProcessInstanceNotFound {
            handler: self.handler_ref.clone(),
            instance_id: instance_id.to_string(),
            envelope: env.clone(),
        });
        cx.observers.notify(Fact::ProcessInstanceBegun {
            handler: self.handler_ref.clone(),
            instance_id: instance_id.to_string(),
            root: format!("{root:?}"),
            envelope: env.clone(),
        });
        root
    }

    fn commit(
        &mut self,
        instance_id: String,
        outcome: ProcessOutcome<H::Root>,
    ) -> Result<Vec<Envelope>, ControllerError> {
        if let Some(violation) = outcome.violation {
            return Err(ControllerError::UnexpectedBehavior(
                UnexpectedBehavior::from_violation(
                    &self.handler_ref,
                    std::any::type_name::<H>(),
                    violation,
                ),
            ));
        }

        if outcome.ended {
            debug!(
                handler = %self.handler_ref.name(),
                instance_id = %instance_id,
                "Process instance ended"
            );
            self.instances.remove(&instance_id);
            self.timeouts.remove_instance(&instance_id);
            self.ended.insert(instance_id);
            return Ok(outcome.commands);
        }

        self.instances.insert(instance_id, outcome.root);
        for timeout in outcome.pending {
            self.timeouts.insert(timeout);
        }

        let mut produced = outcome.commands;
        produced.extend(outcome.ready);
        Ok(produced)
    }
}

#[async_trait]
impl<H: ProcessMessageHandler> Controller for ProcessController<H> {
    fn handler(&self) -> &HandlerRef {
        &self.handler_ref
    }

    async fn handle(
        &mut self,
        cx: &HandleContext<'_>,
        env: &Envelope,
    ) -> Result<Vec<Envelope>, ControllerError> {
        let Some(instance_id) = self.route(cx, env).await? else {
            return Ok(Vec::new());
        };

        let root = self.load(cx, env, &instance_id);
        let handler = self.handler.clone();

        let (result, outcome, method) = if env.kind == MessageKind::Timeout {
            let mut scope = ProcessTimeoutScope::new(
                cx.scope_core(&self.handler_ref, env),
                instance_id.clone(),
                root,
            );
            let result = handler
                .handle_timeout(cx.ctx, &mut scope, &*env.message)
                .await;
            (result, scope.into_outcome(), "handle_timeout")
        } else {
            let mut scope = ProcessEventScope::new(
                cx.scope_core(&self.handler_ref, env),
                instance_id.clone(),
                root,
            );
            let result = handler.handle_event(cx.ctx, &mut scope, &*env.message).await;
            (result, scope.into_outcome(), "handle_event")
        };

        if let Err(err) = result {
            return Err(self.callback(method).failed(err, &env.message));
        }
        self.commit(instance_id, outcome)
    }

    async fn tick(&mut self, cx: &HandleContext<'_>) -> Result<Vec<Envelope>, ControllerError> {
        Ok(self.timeouts.take_due(cx.now))
    }

    fn reset(&mut self) {
        self.instances.clear();
        self.ended.clear();
        self.timeouts.clear();
    }
}
