//! Handler contracts.
//!
//! Applications are built from four kinds of message handler. Each kind has
//! its own trait and its own scope type; the engine wraps each registered
//! handler in a controller of the matching kind.
//!
//! - [`AggregateMessageHandler`]: transactional state, commands in, events out
//! - [`ProcessMessageHandler`]: events and timeouts in, commands and timeouts out
//! - [`IntegrationMessageHandler`]: commands in, events out, no state
//! - [`ProjectionMessageHandler`]: events in, read model out, checkpointed

mod aggregate;
mod integration;
mod process;
mod projection;
pub(crate) mod scope;

pub use aggregate::{AggregateCommandScope, AggregateMessageHandler, AggregateRoot};
pub use integration::{IntegrationCommandScope, IntegrationMessageHandler};
pub use process::{
    ProcessEventScope, ProcessMessageHandler, ProcessRoot, ProcessScope, ProcessTimeoutScope,
};
pub use projection::{ProjectionCompactScope, ProjectionEventScope, ProjectionMessageHandler};

pub(crate) use process::ProcessOutcome;

use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Error type returned by handler callbacks.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Reference-counted error, shareable between facts and results.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Stable identity of a handler.
///
/// The name is human-readable and used in diagnostics and options; the key is
/// an opaque, stable value (typically a UUID) from which event stream ids are
/// derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub name: String,
    pub key: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() || self.key.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The four kinds of handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandlerKind {
    Aggregate,
    Process,
    Integration,
    Projection,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [
        HandlerKind::Aggregate,
        HandlerKind::Process,
        HandlerKind::Integration,
        HandlerKind::Projection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Aggregate => "aggregate",
            HandlerKind::Process => "process",
            HandlerKind::Integration => "integration",
            HandlerKind::Projection => "projection",
        }
    }

    /// Name of the trait handlers of this kind implement.
    pub fn interface(&self) -> &'static str {
        match self {
            HandlerKind::Aggregate => "AggregateMessageHandler",
            HandlerKind::Process => "ProcessMessageHandler",
            HandlerKind::Integration => "IntegrationMessageHandler",
            HandlerKind::Projection => "ProjectionMessageHandler",
        }
    }

    /// Name of the operation option that enables this kind.
    pub(crate) fn option_name(&self) -> &'static str {
        match self {
            HandlerKind::Aggregate => "enable_aggregates",
            HandlerKind::Process => "enable_processes",
            HandlerKind::Integration => "enable_integrations",
            HandlerKind::Projection => "enable_projections",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handler's identity together with its kind.
///
/// Envelopes and facts refer to handlers by value through this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerRef {
    pub identity: Identity,
    pub kind: HandlerKind,
}

impl HandlerRef {
    pub fn new(identity: Identity, kind: HandlerKind) -> Self {
        Self { identity, kind }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {}", self.identity.name, self.kind)
    }
}

/// Per-operation context passed to asynchronous handler callbacks.
///
/// Carries the cancellation signal of the current `dispatch` or `tick`.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancellation: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the operation has been cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Cancel the operation.
    pub fn cancel(&self) {
        self.cancellation.cancel()
    }
}

/// Returned by a handler that was passed a message it does not recognise.
///
/// The engine turns this into a fatal [`UnexpectedMessageError`] that names
/// the handler and method.
///
/// [`UnexpectedMessageError`]: crate::engine::UnexpectedMessageError
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("unexpected message")]
pub struct UnexpectedMessage {
    location: &'static Location<'static>,
}

impl UnexpectedMessage {
    #[track_caller]
    pub fn new() -> Self {
        Self {
            location: Location::caller(),
        }
    }

    /// Where the handler raised the signal.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl Default for UnexpectedMessage {
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for `Err(UnexpectedMessage::new().into())` in asynchronous callbacks.
#[track_caller]
pub fn unexpected_message<T>() -> Result<T, HandlerError> {
    Err(Box::new(UnexpectedMessage::new()))
}
