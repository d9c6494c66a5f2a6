//! Integration controller.

use std::sync::Arc;

use async_trait::async_trait;

use super::controller::{check_inbound, Controller, HandleContext};
use super::error::{Callback, ControllerError, UnexpectedBehavior};
use crate::envelope::{stream_id_for, Envelope};
use crate::handler::{HandlerRef, IntegrationCommandScope, IntegrationMessageHandler};
use crate::message::MessageKind;

pub(crate) struct IntegrationController<H: IntegrationMessageHandler> {
    handler_ref: HandlerRef,
    handler: Arc<H>,
    stream_id: String,
    next_offset: u64,
}

impl<H: IntegrationMessageHandler> IntegrationController<H> {
    pub fn new(handler_ref: HandlerRef, handler: Arc<H>) -> Self {
        let stream_id = stream_id_for(&handler_ref.identity);
        Self {
            handler_ref,
            handler,
            stream_id,
            next_offset: 0,
        }
    }
}

#[async_trait]
impl<H: IntegrationMessageHandler> Controller for IntegrationController<H> {
    fn handler(&self) -> &HandlerRef {
        &self.handler_ref
    }

    async fn handle(
        &mut self,
        cx: &HandleContext<'_>,
        env: &Envelope,
    ) -> Result<Vec<Envelope>, ControllerError> {
        let implementation = std::any::type_name::<H>();
        let callback = Callback::new(&self.handler_ref, implementation, "handle_command");
        check_inbound(&callback, cx, env, MessageKind::Command)?;

        let mut scope = IntegrationCommandScope::new(
            cx.scope_core(&self.handler_ref, env),
            &self.stream_id,
            self.next_offset,
        );
        let result = self
            .handler
            .handle_command(cx.ctx, &mut scope, &*env.message)
            .await;
        let outcome = scope.into_outcome();

        if let Err(err) = result {
            return Err(callback.failed(err, &env.message));
        }
        if let Some(violation) = outcome.violation {
            return Err(ControllerError::UnexpectedBehavior(
                UnexpectedBehavior::from_violation(&self.handler_ref, implementation, violation),
            ));
        }

        self.next_offset = outcome.next_offset;
        Ok(outcome.produced)
    }

    fn reset(&mut self) {
        self.next_offset = 0;
    }
}
