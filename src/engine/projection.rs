//! Projection controller.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::controller::{check_inbound, Controller, HandleContext};
use super::error::{Callback, CheckpointConflict, ControllerError};
use crate::envelope::{Envelope, MessageId};
use crate::fact::Fact;
use crate::handler::{
    Context, HandlerRef, ProjectionCompactScope, ProjectionEventScope, ProjectionMessageHandler,
    SharedError, UnexpectedMessage,
};
use crate::message::MessageKind;
use crate::observer::ObserverSet;

/// Tracks checkpoints and compaction for one projection.
pub(crate) struct ProjectionController<H: ProjectionMessageHandler> {
    handler_ref: HandlerRef,
    handler: Arc<H>,
    /// Checkpoints confirmed by successful `handle_event` calls.
    checkpoints: HashMap<String, u64>,
    last_compaction: Option<DateTime<Utc>>,
    /// Checkpoint read by `should_handle` for the message about to be handled.
    pending: Option<(MessageId, u64)>,
}

impl<H: ProjectionMessageHandler> ProjectionController<H> {
    pub fn new(handler_ref: HandlerRef, handler: Arc<H>) -> Self {
        Self {
            handler_ref,
            handler,
            checkpoints: HashMap::new(),
            last_compaction: None,
            pending: None,
        }
    }

    fn callback(&self, method: &'static str) -> Callback<'_> {
        Callback::new(&self.handler_ref, std::any::type_name::<H>(), method)
    }

    fn stream_of<'e>(&self, env: &'e Envelope) -> Result<(&'e str, u64), ControllerError> {
        match &env.event_stream {
            Some(stream) => Ok((stream.stream_id.as_str(), stream.offset)),
            None => Err(self.callback("handle_event").behavior(
                Some(&env.message),
                format!("the '{}' event has no stream position", env.message_type),
            )),
        }
    }

    async fn read_checkpoint(
        &self,
        cx: &HandleContext<'_>,
        env: &Envelope,
        stream_id: &str,
    ) -> Result<u64, ControllerError> {
        self.handler
            .checkpoint_offset(cx.ctx, stream_id)
            .await
            .map_err(|err| self.callback("checkpoint_offset").failed(err, &env.message))
    }

    fn publish_compaction(
        &self,
        observers: &ObserverSet,
        logs: Vec<String>,
        result: &Result<(), SharedError>,
    ) {
        for message in logs {
            observers.notify(Fact::MessageLoggedByProjection {
                handler: self.handler_ref.clone(),
                envelope: None,
                message,
            });
        }
        observers.notify(Fact::ProjectionCompactionCompleted {
            handler: self.handler_ref.clone(),
            error: result.as_ref().err().cloned(),
        });
    }
}

async fn compact<H: ProjectionMessageHandler>(
    handler: Arc<H>,
    ctx: Context,
    now: DateTime<Utc>,
) -> (Result<(), SharedError>, Vec<String>) {
    let mut scope = ProjectionCompactScope::new(now);
    let result = handler.compact(&ctx, &mut scope).await;
    (result.map_err(SharedError::from), scope.into_logs())
}

#[async_trait]
impl<H: ProjectionMessageHandler> Controller for ProjectionController<H> {
    fn handler(&self) -> &HandlerRef {
        &self.handler_ref
    }

    async fn should_handle(
        &mut self,
        cx: &HandleContext<'_>,
        env: &Envelope,
    ) -> Result<bool, ControllerError> {
        check_inbound(&self.callback("handle_event"), cx, env, MessageKind::Event)?;
        let (stream_id, offset) = self.stream_of(env)?;

        let checkpoint = self.read_checkpoint(cx, env, stream_id).await?;
        if checkpoint > offset {
            trace!(
                handler = %self.handler_ref.name(),
                stream_id = %stream_id,
                offset,
                checkpoint,
                "Event already applied"
            );
            return Ok(false);
        }

        self.pending = Some((env.message_id, checkpoint));
        Ok(true)
    }

    async fn handle(
        &mut self,
        cx: &HandleContext<'_>,
        env: &Envelope,
    ) -> Result<Vec<Envelope>, ControllerError> {
        check_inbound(&self.callback("handle_event"), cx, env, MessageKind::Event)?;
        let (stream_id, offset) = self.stream_of(env)?;

        let checkpoint = match self.pending.take() {
            Some((id, checkpoint)) if id == env.message_id => checkpoint,
            _ => self.read_checkpoint(cx, env, stream_id).await?,
        };
        if checkpoint > offset {
            return Ok(Vec::new());
        }

        let compaction = if cx.compact_during_handling {
            cx.observers.notify(Fact::ProjectionCompactionBegun {
                handler: self.handler_ref.clone(),
            });
            Some(tokio::spawn(compact(
                self.handler.clone(),
                cx.ctx.clone(),
                cx.now,
            )))
        } else {
            None
        };

        let mut scope = ProjectionEventScope::new(
            &self.handler_ref,
            env,
            cx.observers,
            cx.now,
            stream_id,
            offset,
            checkpoint,
        );
        let result = self
            .handler
            .handle_event(cx.ctx, &mut scope, &*env.message)
            .await;

        let compaction_result = match compaction {
            Some(task) => {
                let (result, logs) = match task.await {
                    Ok(joined) => joined,
                    Err(join_err) => (Err(Arc::new(join_err) as SharedError), Vec::new()),
                };
                self.publish_compaction(cx.observers, logs, &result);
                result
            }
            None => Ok(()),
        };

        let new_checkpoint = result
            .map_err(|err| self.callback("handle_event").failed(err, &env.message))?;

        if new_checkpoint != offset + 1 {
            return Err(ControllerError::Handler(Arc::new(CheckpointConflict {
                handler: self.handler_ref.clone(),
                stream_id: stream_id.to_string(),
                expected: offset + 1,
                actual: new_checkpoint,
            })));
        }
        self.checkpoints.insert(stream_id.to_string(), new_checkpoint);

        compaction_result.map_err(|err| self.callback("compact").failed(err, &env.message))?;
        Ok(Vec::new())
    }

    async fn tick(&mut self, cx: &HandleContext<'_>) -> Result<Vec<Envelope>, ControllerError> {
        let due = match self.last_compaction {
            Some(last) => cx.now - last >= cx.compaction_interval,
            None => true,
        };
        if !due {
            return Ok(Vec::new());
        }
        self.last_compaction = Some(cx.now);

        debug!(handler = %self.handler_ref.name(), "Compacting projection");
        cx.observers.notify(Fact::ProjectionCompactionBegun {
            handler: self.handler_ref.clone(),
        });
        let (result, logs) = compact(self.handler.clone(), cx.ctx.clone(), cx.now).await;
        self.publish_compaction(cx.observers, logs, &result);

        if let Err(err) = result {
            if err.downcast_ref::<UnexpectedMessage>().is_some() {
                return Err(self.callback("compact").behavior(
                    None,
                    "returned an unexpected message signal, but compact() is not called with a message",
                ));
            }
            return Err(ControllerError::Handler(err));
        }
        Ok(Vec::new())
    }

    fn reset(&mut self) {
        self.checkpoints.clear();
        self.last_compaction = None;
        self.pending = None;
    }

    fn projection_checkpoint(&self, stream_id: &str) -> Option<u64> {
        self.checkpoints.get(stream_id).copied()
    }
}
