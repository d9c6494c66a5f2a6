//! Shared utilities.

pub mod bootstrap;

pub use bootstrap::init_tracing;
