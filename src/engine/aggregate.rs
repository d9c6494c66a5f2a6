//! Aggregate controller.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::controller::{check_inbound, Controller, HandleContext};
use super::error::{Callback, ControllerError, UnexpectedBehavior};
use crate::envelope::{stream_id_for, Envelope};
use crate::fact::Fact;
use crate::handler::{AggregateCommandScope, AggregateMessageHandler, AggregateRoot, HandlerRef};
use crate::message::MessageKind;

/// Owns the event history of every instance of one aggregate.
pub(crate) struct AggregateController<H: AggregateMessageHandler> {
    handler_ref: HandlerRef,
    handler: Arc<H>,
    stream_id: String,
    next_offset: u64,
    histories: HashMap<String, Vec<Envelope>>,
}

impl<H: AggregateMessageHandler> AggregateController<H> {
    pub fn new(handler_ref: HandlerRef, handler: Arc<H>) -> Self {
        let stream_id = stream_id_for(&handler_ref.identity);
        Self {
            handler_ref,
            handler,
            stream_id,
            next_offset: 0,
            histories: HashMap::new(),
        }
    }

    fn callback(&self, method: &'static str) -> Callback<'_> {
        Callback::new(&self.handler_ref, std::any::type_name::<H>(), method)
    }

    /// Rebuild the root of `instance_id` from its history.
    fn load(
        &self,
        cx: &HandleContext<'_>,
        env: &Envelope,
        instance_id: &str,
    ) -> Result<(H::Root, bool), ControllerError> {
        let mut root = self.handler.new_root();

        let Some(history) = self.histories.get(instance_id) else {
            cx.observers.notify(Fact::AggregateInstanceNotFound {
                handler: self.handler_ref.clone(),
                instance_id: instance_id.to_string(),
                envelope: env.clone(),
            });
            return Ok((root, false));
        };

        for event in history {
            root.apply_event(&*event.message).map_err(|signal| {
                self.callback("apply_event")
                    .on("AggregateRoot")
                    .unexpected_message(signal, &event.message)
            })?;
        }
        trace!(
            handler = %self.handler_ref.name(),
            instance_id = %instance_id,
            events = history.len(),
            "Replayed aggregate history"
        );

        cx.observers.notify(Fact::AggregateInstanceLoaded {
            handler: self.handler_ref.clone(),
            instance_id: instance_id.to_string(),
            root: format!("{root:?}"),
            envelope: env.clone(),
        });
        Ok((root, true))
    }

    fn handle_command(
        &mut self,
        cx: &HandleContext<'_>,
        env: &Envelope,
    ) -> Result<Vec<Envelope>, ControllerError> {
        check_inbound(&self.callback("handle_command"), cx, env, MessageKind::Command)?;

        let instance_id = self
            .handler
            .route_command_to_instance(&*env.message)
            .map_err(|signal| {
                self.callback("route_command_to_instance")
                    .unexpected_message(signal, &env.message)
            })?;
        if instance_id.is_empty() {
            return Err(self.callback("route_command_to_instance").behavior(
                Some(&env.message),
                format!(
                    "routed a '{}' command to an empty instance ID",
                    env.message_type
                ),
            ));
        }

        let (root, exists) = self.load(cx, env, &instance_id)?;

        let handler = self.handler.clone();
        let new_root = || handler.new_root();
        let mut scope = AggregateCommandScope::new(
            cx.scope_core(&self.handler_ref, env),
            instance_id.clone(),
            root,
            &new_root,
            &self.stream_id,
            self.next_offset,
            exists,
        );
        let result = self.handler.handle_command(&mut scope, &*env.message);
        let outcome = scope.into_outcome();

        if let Err(signal) = result {
            return Err(self
                .callback("handle_command")
                .unexpected_message(signal, &env.message));
        }
        if let Some((signal, event)) = outcome.apply_failure {
            return Err(self
                .callback("apply_event")
                .on("AggregateRoot")
                .unexpected_message(signal, &event));
        }
        if let Some(violation) = outcome.violation {
            return Err(ControllerError::UnexpectedBehavior(
                UnexpectedBehavior::from_violation(
                    &self.handler_ref,
                    std::any::type_name::<H>(),
                    violation,
                ),
            ));
        }

        self.next_offset = outcome.next_offset;

        if outcome.destroyed {
            self.histories.remove(&instance_id);
        } else if let Some(from) = outcome.destroyed_from {
            self.histories
                .insert(instance_id, outcome.produced[from..].to_vec());
        } else if !outcome.produced.is_empty() {
            self.histories
                .entry(instance_id)
                .or_default()
                .extend(outcome.produced.iter().cloned());
        }

        Ok(outcome.produced)
    }
}

#[async_trait]
impl<H: AggregateMessageHandler> Controller for AggregateController<H> {
    fn handler(&self) -> &HandlerRef {
        &self.handler_ref
    }

    async fn handle(
        &mut self,
        cx: &HandleContext<'_>,
        env: &Envelope,
    ) -> Result<Vec<Envelope>, ControllerError> {
        self.handle_command(cx, env)
    }

    fn reset(&mut self) {
        self.histories.clear();
        self.next_offset = 0;
    }
}
