//! Angzarr Testkit - deterministic test harness for message-driven applications
//!
//! Runs an application's aggregates, processes, integrations and projections
//! in memory, emits a [`Fact`] for every step, and checks expectations over
//! those facts.
//!
//! - [`engine`]: the dispatcher and its per-kind controllers
//! - [`expectation`]: predicates over the fact stream and their reports
//! - [`test`]: the façade tests are written against

pub mod application;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod expectation;
pub mod fact;
pub mod handler;
pub mod message;
pub mod observer;
pub mod router;
pub mod test;
pub mod utils;

pub use application::Application;
pub use engine::{DispatchError, Engine, EngineOptions, OperationOptions};
pub use envelope::Envelope;
pub use fact::Fact;
pub use handler::{
    unexpected_message, AggregateCommandScope, AggregateMessageHandler, AggregateRoot, Context,
    HandlerError, HandlerKind, Identity, IntegrationCommandScope, IntegrationMessageHandler,
    ProcessEventScope, ProcessMessageHandler, ProcessRoot, ProcessScope, ProcessTimeoutScope,
    ProjectionCompactScope, ProjectionEventScope, ProjectionMessageHandler, UnexpectedMessage,
};
pub use message::{Message, MessageKind, MessageType, ValidationError, ValidationScope};
pub use observer::{FactBuffer, LogObserver, Observer};
pub use router::ConfigurationError;
