//! Engine error types.

use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use crate::envelope::MessageId;
use crate::handler::scope::Violation;
use crate::handler::{HandlerRef, SharedError, UnexpectedMessage};
use crate::message::{Message, MessageKind, MessageType};

/// A handler broke its contract with the engine.
///
/// Raised for programmer errors: producing a message the handler does not
/// declare, producing an invalid message, routing to an empty instance id,
/// or being handed a message the handler does not consume.
#[derive(Debug, Clone, thiserror::Error)]
#[error("the {handler} message handler behaved unexpectedly in {interface}::{method}(): {description}")]
pub struct UnexpectedBehavior {
    pub handler: HandlerRef,
    pub interface: &'static str,
    pub method: &'static str,
    /// Type name of the handler implementation.
    pub implementation: &'static str,
    pub message: Option<Arc<dyn Message>>,
    pub description: String,
    /// Call site inside the handler, when known.
    pub location: Option<&'static Location<'static>>,
}

impl UnexpectedBehavior {
    pub(crate) fn new(
        handler: &HandlerRef,
        implementation: &'static str,
        method: &'static str,
        message: Option<Arc<dyn Message>>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            handler: handler.clone(),
            interface: handler.kind.interface(),
            method,
            implementation,
            message,
            description: description.into(),
            location: None,
        }
    }

    pub(crate) fn from_violation(
        handler: &HandlerRef,
        implementation: &'static str,
        violation: Violation,
    ) -> Self {
        Self {
            location: Some(violation.location),
            ..Self::new(
                handler,
                implementation,
                violation.method,
                violation.message,
                violation.description,
            )
        }
    }
}

/// A handler was called with a message it did not expect.
///
/// Wraps the [`UnexpectedMessage`] a handler returned with the handler and
/// method it came from.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "the {handler} message handler did not expect {interface}::{method}() to be called with a '{}' message",
    .message.message_type()
)]
pub struct UnexpectedMessageError {
    pub handler: HandlerRef,
    pub interface: &'static str,
    pub method: &'static str,
    pub implementation: &'static str,
    pub message: Arc<dyn Message>,
    /// Where the handler raised the signal.
    pub location: &'static Location<'static>,
}

/// A projection returned a checkpoint other than one past the event's offset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "optimistic concurrency conflict in the {handler} message handler: expected the checkpoint offset of stream {stream_id} to become {expected}, got {actual}"
)]
pub struct CheckpointConflict {
    pub handler: HandlerRef,
    pub stream_id: String,
    pub expected: u64,
    pub actual: u64,
}

/// One failed handler call.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub handler: HandlerRef,
    /// The message being handled; `None` for failures during a tick.
    pub message_id: Option<MessageId>,
    pub message_type: Option<MessageType>,
    pub error: SharedError,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message_type, &self.message_id) {
            (Some(t), Some(id)) => write!(
                f,
                "{} failed to handle '{}' #{}: {}",
                self.handler, t, id, self.error
            ),
            _ => write!(f, "{} failed to tick: {}", self.handler, self.error),
        }
    }
}

/// Errors accumulated over one dispatch or tick cycle.
#[derive(Debug, Clone)]
pub struct HandlerErrors(Vec<HandlerFailure>);

impl HandlerErrors {
    pub(crate) fn new(failures: Vec<HandlerFailure>) -> Self {
        Self(failures)
    }

    pub fn failures(&self) -> &[HandlerFailure] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HandlerErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [only] => write!(f, "{only}"),
            failures => {
                write!(f, "{} handler calls failed", failures.len())?;
                for failure in failures {
                    write!(f, "\n  - {failure}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for HandlerErrors {}

/// Result of a failed [`Engine::dispatch`] or [`Engine::tick`].
///
/// [`Engine::dispatch`]: crate::engine::Engine::dispatch
/// [`Engine::tick`]: crate::engine::Engine::tick
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// One or more handlers returned an error; the cycle ran to completion.
    #[error(transparent)]
    Handlers(HandlerErrors),

    /// A handler broke its contract; the cycle was aborted.
    #[error(transparent)]
    UnexpectedBehavior(UnexpectedBehavior),

    /// A handler did not recognise a message; the cycle was aborted.
    #[error(transparent)]
    UnexpectedMessage(UnexpectedMessageError),

    /// The dispatched message can not enter the engine.
    #[error("can not dispatch '{message_type}' as {}: {reason}", .kind.with_article())]
    InvalidMessage {
        kind: MessageKind,
        message_type: String,
        reason: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl DispatchError {
    /// True for errors that abort a cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DispatchError::UnexpectedBehavior(_)
                | DispatchError::UnexpectedMessage(_)
                | DispatchError::Cancelled
        )
    }

    pub fn as_unexpected_behavior(&self) -> Option<&UnexpectedBehavior> {
        match self {
            DispatchError::UnexpectedBehavior(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_unexpected_message(&self) -> Option<&UnexpectedMessageError> {
        match self {
            DispatchError::UnexpectedMessage(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn shared(&self) -> SharedError {
        Arc::new(self.clone())
    }
}

/// Failure of a single controller call.
#[derive(Debug, Clone)]
pub(crate) enum ControllerError {
    Handler(SharedError),
    UnexpectedBehavior(UnexpectedBehavior),
    UnexpectedMessage(UnexpectedMessageError),
}

impl ControllerError {
    pub fn shared(&self) -> SharedError {
        match self {
            ControllerError::Handler(err) => err.clone(),
            ControllerError::UnexpectedBehavior(err) => Arc::new(err.clone()),
            ControllerError::UnexpectedMessage(err) => Arc::new(err.clone()),
        }
    }

    /// Only meaningful for fatal errors.
    pub fn into_dispatch_error(self) -> Option<DispatchError> {
        match self {
            ControllerError::Handler(_) => None,
            ControllerError::UnexpectedBehavior(err) => Some(DispatchError::UnexpectedBehavior(err)),
            ControllerError::UnexpectedMessage(err) => Some(DispatchError::UnexpectedMessage(err)),
        }
    }
}

/// Identifies a handler callback for error reporting.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Callback<'a> {
    pub handler: &'a HandlerRef,
    pub implementation: &'static str,
    pub interface: &'static str,
    pub method: &'static str,
}

impl<'a> Callback<'a> {
    pub fn new(handler: &'a HandlerRef, implementation: &'static str, method: &'static str) -> Self {
        Self {
            handler,
            implementation,
            interface: handler.kind.interface(),
            method,
        }
    }

    pub fn on(self, interface: &'static str) -> Self {
        Self { interface, ..self }
    }

    pub fn unexpected_message(
        &self,
        signal: UnexpectedMessage,
        message: &Arc<dyn Message>,
    ) -> ControllerError {
        ControllerError::UnexpectedMessage(UnexpectedMessageError {
            handler: self.handler.clone(),
            interface: self.interface,
            method: self.method,
            implementation: self.implementation,
            message: message.clone(),
            location: signal.location(),
        })
    }

    /// Classify an error returned by the callback.
    pub fn failed(
        &self,
        err: impl Into<SharedError>,
        message: &Arc<dyn Message>,
    ) -> ControllerError {
        let err: SharedError = err.into();
        match err.downcast_ref::<UnexpectedMessage>() {
            Some(signal) => self.unexpected_message(*signal, message),
            None => ControllerError::Handler(err),
        }
    }

    pub fn behavior(
        &self,
        message: Option<&Arc<dyn Message>>,
        description: impl Into<String>,
    ) -> ControllerError {
        ControllerError::UnexpectedBehavior(UnexpectedBehavior {
            interface: self.interface,
            ..UnexpectedBehavior::new(
                self.handler,
                self.implementation,
                self.method,
                message.cloned(),
                description,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, HandlerKind, Identity};

    #[derive(Debug, Clone, PartialEq)]
    struct Ping;
    impl Message for Ping {}

    fn handler() -> HandlerRef {
        HandlerRef::new(Identity::new("pinger", "k"), HandlerKind::Process)
    }

    #[test]
    fn test_failed_detects_unexpected_message() {
        let h = handler();
        let cb = Callback::new(&h, "app::Pinger", "handle_event");
        let msg: Arc<dyn Message> = Arc::new(Ping);
        let err = cb.failed(Box::new(UnexpectedMessage::new()) as HandlerError, &msg);
        assert!(matches!(err, ControllerError::UnexpectedMessage(_)));
        let Some(DispatchError::UnexpectedMessage(wrapped)) = err.into_dispatch_error() else {
            panic!("expected an unexpected message error");
        };
        assert_eq!(wrapped.method, "handle_event");
        assert_eq!(wrapped.interface, "ProcessMessageHandler");
        assert!(wrapped.to_string().contains("'Ping' message"));
    }

    #[test]
    fn test_failed_keeps_handler_errors_recoverable() {
        let h = handler();
        let cb = Callback::new(&h, "app::Pinger", "handle_event");
        let msg: Arc<dyn Message> = Arc::new(Ping);
        let err = cb.failed(HandlerError::from("boom"), &msg);
        assert!(matches!(err, ControllerError::Handler(_)));
        assert_eq!(err.shared().to_string(), "boom");
    }

    #[test]
    fn test_behavior_display() {
        let h = handler();
        let err = Callback::new(&h, "app::Pinger", "route_event_to_instance")
            .behavior(None, "routed the 'Ping' event to an empty instance ID");
        assert_eq!(
            err.shared().to_string(),
            "the 'pinger' process message handler behaved unexpectedly in \
             ProcessMessageHandler::route_event_to_instance(): routed the 'Ping' event to an empty instance ID"
        );
    }

    #[test]
    fn test_handler_errors_display() {
        let failure = |name: &str| HandlerFailure {
            handler: HandlerRef::new(Identity::new(name, name), HandlerKind::Integration),
            message_id: Some(MessageId::new(3)),
            message_type: Some(MessageType::of::<Ping>()),
            error: Arc::new(CheckpointConflict {
                handler: handler(),
                stream_id: "s".into(),
                expected: 1,
                actual: 0,
            }),
        };
        let one = HandlerErrors::new(vec![failure("a")]);
        assert!(one.to_string().starts_with("'a' integration failed to handle 'Ping' #3"));
        let two = HandlerErrors::new(vec![failure("a"), failure("b")]);
        assert!(two.to_string().starts_with("2 handler calls failed"));
    }
}
