//! Test actions.

use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use tokio::sync::Mutex;

use super::adapter::dispatch_as;
use crate::engine::{DispatchError, Engine, OperationOptions};
use crate::expectation::PredicateOptions;
use crate::message::{Message, MessageKind};

/// Errors that stop a test action.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("time can not be reversed from {from} to {to}")]
    ReverseTime {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

/// What an action may touch while it runs.
pub struct ActionScope<'a> {
    pub(crate) engine: &'a Mutex<Engine>,
    pub(crate) options: OperationOptions,
    pub(crate) now: &'a mut DateTime<Utc>,
}

/// One step of a test.
#[async_trait]
pub trait Action: Send + Sync {
    /// Describes the action, e.g. "executing 'PlaceOrder' command".
    fn caption(&self) -> String;

    /// Where the action was built.
    fn location(&self) -> &'static Location<'static>;

    /// Adjust how expectations observe this action.
    fn expectation_options(&self, _options: &mut PredicateOptions) {}

    async fn run(&self, scope: &mut ActionScope<'_>) -> Result<(), ActionError>;
}

/// Execute `command` as a root command.
#[track_caller]
pub fn execute_command<M: Message>(command: M) -> Box<dyn Action> {
    Box::new(Dispatch {
        message: Arc::new(command),
        kind: MessageKind::Command,
        location: Location::caller(),
    })
}

/// Record `event` as a root event, as if it came from outside the
/// application.
#[track_caller]
pub fn record_event<M: Message>(event: M) -> Box<dyn Action> {
    Box::new(Dispatch {
        message: Arc::new(event),
        kind: MessageKind::Event,
        location: Location::caller(),
    })
}

/// Move the virtual clock forward by `delta` and tick the engine.
#[track_caller]
pub fn advance_time_by(delta: TimeDelta) -> Box<dyn Action> {
    Box::new(AdvanceTime {
        target: Target::By(delta),
        location: Location::caller(),
    })
}

/// Move the virtual clock to `time` and tick the engine.
#[track_caller]
pub fn advance_time_to(time: DateTime<Utc>) -> Box<dyn Action> {
    Box::new(AdvanceTime {
        target: Target::To(time),
        location: Location::caller(),
    })
}

/// Run user code, typically using a [`CommandExecutor`](super::CommandExecutor)
/// or [`EventRecorder`](super::EventRecorder).
///
/// Messages the code dispatches count as produced messages for the
/// action's expectation.
#[track_caller]
pub fn call<F, Fut, E>(f: F) -> Box<dyn Action>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<ActionError> + 'static,
{
    Box::new(Call {
        f: Box::new(move || -> BoxFuture<'static, Result<(), ActionError>> {
            let fut = f();
            Box::pin(async move { fut.await.map_err(Into::into) })
        }),
        location: Location::caller(),
    })
}

struct Dispatch {
    message: Arc<dyn Message>,
    kind: MessageKind,
    location: &'static Location<'static>,
}

#[async_trait]
impl Action for Dispatch {
    fn caption(&self) -> String {
        let verb = match self.kind {
            MessageKind::Command => "executing",
            _ => "recording",
        };
        format!("{verb} '{}' {}", self.message.message_type(), self.kind)
    }

    fn location(&self) -> &'static Location<'static> {
        self.location
    }

    async fn run(&self, scope: &mut ActionScope<'_>) -> Result<(), ActionError> {
        dispatch_as(
            scope.engine,
            self.message.clone(),
            self.kind,
            scope.options.clone(),
        )
        .await?;
        Ok(())
    }
}

enum Target {
    By(TimeDelta),
    To(DateTime<Utc>),
}

struct AdvanceTime {
    target: Target,
    location: &'static Location<'static>,
}

#[async_trait]
impl Action for AdvanceTime {
    fn caption(&self) -> String {
        match &self.target {
            Target::By(delta) => format!("advancing time by {delta}"),
            Target::To(time) => format!("advancing time to {}", time.to_rfc3339()),
        }
    }

    fn location(&self) -> &'static Location<'static> {
        self.location
    }

    async fn run(&self, scope: &mut ActionScope<'_>) -> Result<(), ActionError> {
        let from = *scope.now;
        let to = match &self.target {
            Target::By(delta) => from.checked_add_signed(*delta).unwrap_or(DateTime::<Utc>::MAX_UTC),
            Target::To(time) => *time,
        };
        if to < from {
            return Err(ActionError::ReverseTime { from, to });
        }

        *scope.now = to;
        let options = scope.options.clone().with_current_time(to);
        scope.engine.lock().await.tick(options).await?;
        Ok(())
    }
}

type CallFn = Box<dyn Fn() -> BoxFuture<'static, Result<(), ActionError>> + Send + Sync>;

struct Call {
    f: CallFn,
    location: &'static Location<'static>,
}

#[async_trait]
impl Action for Call {
    fn caption(&self) -> String {
        "calling user-defined function".to_string()
    }

    fn location(&self) -> &'static Location<'static> {
        self.location
    }

    fn expectation_options(&self, options: &mut PredicateOptions) {
        options.match_dispatch_cycle_started_facts = true;
    }

    async fn run(&self, _scope: &mut ActionScope<'_>) -> Result<(), ActionError> {
        (self.f)().await
    }
}
