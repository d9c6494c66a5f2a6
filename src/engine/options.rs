//! Engine-wide and per-operation options.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::application::HandlerConfig;
use crate::config::TestkitConfig;
use crate::fact::{EnabledHandlers, SkipReason};
use crate::handler::HandlerKind;
use crate::observer::{Observer, ObserverSet};

/// Default real-time interval between ticks in [`run`](crate::engine::run).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Default virtual-time interval between projection compactions.
pub const DEFAULT_COMPACTION_INTERVAL: TimeDelta = TimeDelta::hours(1);

pub(crate) type Resetter = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Options fixed for the lifetime of an [`Engine`](crate::engine::Engine).
#[derive(Clone)]
pub struct EngineOptions {
    pub(crate) observers: ObserverSet,
    pub(crate) resetters: Vec<Resetter>,
    pub(crate) compact_during_handling: bool,
    pub(crate) compaction_interval: TimeDelta,
    pub(crate) tick_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            observers: ObserverSet::new(),
            resetters: Vec::new(),
            compact_during_handling: false,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options seeded from testkit configuration.
    pub fn from_config(config: &TestkitConfig) -> Self {
        Self {
            compact_during_handling: config.compact_during_handling,
            compaction_interval: i64::try_from(config.compaction_interval_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(DEFAULT_COMPACTION_INTERVAL),
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            ..Self::default()
        }
    }

    /// Notify `observer` of every fact, for every operation. Additive.
    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn with_shared_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Run `f` whenever the engine is reset, after engine state is cleared.
    pub fn with_resetter<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.resetters
            .push(Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(f()) }));
        self
    }

    /// Run projection compaction concurrently with every projection event.
    pub fn enable_projection_compaction_during_handling(mut self, enabled: bool) -> Self {
        self.compact_during_handling = enabled;
        self
    }

    pub fn with_compaction_interval(mut self, interval: TimeDelta) -> Self {
        self.compaction_interval = interval;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("observers", &self.observers)
            .field("resetters", &self.resetters.len())
            .field("compact_during_handling", &self.compact_during_handling)
            .field("compaction_interval", &self.compaction_interval)
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

/// Options for one `dispatch` or `tick`.
///
/// The virtual time defaults to the wall-clock time at which the options were
/// built.
#[derive(Debug, Clone)]
pub struct OperationOptions {
    pub(crate) observers: ObserverSet,
    pub(crate) enabled: EnabledHandlers,
    pub(crate) now: DateTime<Utc>,
    pub(crate) cancellation: CancellationToken,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            observers: ObserverSet::new(),
            enabled: EnabledHandlers::default(),
            now: Utc::now(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_aggregates(self, enabled: bool) -> Self {
        self.enable_handler_kind(HandlerKind::Aggregate, enabled)
    }

    pub fn enable_processes(self, enabled: bool) -> Self {
        self.enable_handler_kind(HandlerKind::Process, enabled)
    }

    pub fn enable_integrations(self, enabled: bool) -> Self {
        self.enable_handler_kind(HandlerKind::Integration, enabled)
    }

    pub fn enable_projections(self, enabled: bool) -> Self {
        self.enable_handler_kind(HandlerKind::Projection, enabled)
    }

    pub fn enable_handler_kind(mut self, kind: HandlerKind, enabled: bool) -> Self {
        self.enabled.kinds.insert(kind, enabled);
        self
    }

    /// Enable or disable one handler by name, overriding its kind's setting
    /// and its own configuration.
    pub fn enable_handler(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.enabled.handlers.insert(name.into(), enabled);
        self
    }

    pub fn with_current_time(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Notify `observer` of the facts of this operation only. Additive.
    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn with_shared_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Apply the enablement in `other` on top of this one.
    pub fn merge_enabled(mut self, other: &EnabledHandlers) -> Self {
        self.enabled
            .kinds
            .extend(other.kinds.iter().map(|(k, v)| (*k, *v)));
        self.enabled
            .handlers
            .extend(other.handlers.iter().map(|(k, v)| (k.clone(), *v)));
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn enabled(&self) -> &EnabledHandlers {
        &self.enabled
    }
}

impl EnabledHandlers {
    /// Why the handler is disabled, if it is.
    ///
    /// A per-handler option wins over the handler's own configuration, which
    /// wins over the per-kind option.
    pub fn skip_reason(&self, config: &HandlerConfig) -> Option<SkipReason> {
        if let Some(enabled) = self.handlers.get(&config.handler.identity.name) {
            return (!enabled).then_some(SkipReason::HandlerDisabledByOption);
        }
        if config.disabled {
            return Some(SkipReason::HandlerDisabledByConfiguration);
        }
        if !self.kind_enabled(config.handler.kind) {
            return Some(SkipReason::HandlerKindDisabled);
        }
        None
    }
}
