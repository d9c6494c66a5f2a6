//! Fluent test façade.
//!
//! ```ignore
//! let mut test = Test::begin(StdRunner::new(), &app)?;
//! test.prepare(vec![execute_command(OpenAccount { id: "a1".into() })])
//!     .await
//!     .expect(
//!         execute_command(Deposit { id: "a1".into(), amount: 10 }),
//!         to_record_event(Deposited { id: "a1".into(), amount: 10 }),
//!     )
//!     .await;
//! ```

mod action;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

pub use action::{
    advance_time_by, advance_time_to, call, execute_command, record_event, Action, ActionError,
    ActionScope,
};
pub use adapter::{CommandExecutor, EventRecorder};
pub use runner::{RecordingRunner, StdRunner, TestingT};

use adapter::SharedOptions;

use crate::application::Application;
use crate::config::{ConfigError, TestkitConfig};
use crate::engine::{Engine, EngineOptions, OperationOptions};
use crate::expectation::{DebugRenderer, Expectation, PredicateOptions};
use crate::fact::{EnabledHandlers, Fact};
use crate::handler::HandlerKind;
use crate::observer::{LogObserver, Observer};
use crate::router::{ConfigurationError, Router};

/// Options for [`Test::begin_with`].
#[derive(Debug, Clone, Default)]
pub struct TestOptions {
    start_time: Option<DateTime<Utc>>,
    engine: EngineOptions,
    enabled: EnabledHandlers,
    verbose: bool,
}

impl TestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options seeded from testkit configuration.
    pub fn from_config(config: &TestkitConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            start_time: config.start_time()?,
            engine: EngineOptions::from_config(config),
            enabled: EnabledHandlers::default(),
            verbose: config.verbose,
        })
    }

    /// Virtual time at the start of the test. Defaults to the wall-clock
    /// time at which the test begins.
    pub fn with_start_time(mut self, time: DateTime<Utc>) -> Self {
        self.start_time = Some(time);
        self
    }

    pub fn with_engine_options(mut self, options: EngineOptions) -> Self {
        self.engine = options;
        self
    }

    /// Default enablement of a handler kind for every action.
    pub fn enable_handler_kind(mut self, kind: HandlerKind, enabled: bool) -> Self {
        self.enabled.kinds.insert(kind, enabled);
        self
    }

    /// Default enablement of one handler for every action.
    pub fn enable_handler(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.enabled.handlers.insert(name.into(), enabled);
        self
    }

    /// Log every fact through `tracing`.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Feeds facts to the expectation of the action in progress.
struct ExpectationObserver(Arc<std::sync::Mutex<Box<dyn Expectation>>>);

impl Observer for ExpectationObserver {
    fn notify(&self, fact: &Fact) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .notify(fact);
    }
}

/// A test of one application, driven through a host test runner.
pub struct Test<T: TestingT> {
    t: T,
    engine: Arc<Mutex<Engine>>,
    router: Arc<Router>,
    now: DateTime<Utc>,
    enabled: EnabledHandlers,
    current: SharedOptions,
}

impl<T: TestingT> Test<T> {
    pub fn begin(t: T, app: &Application) -> Result<Self, ConfigurationError> {
        Self::begin_with(t, app, TestOptions::default())
    }

    pub fn begin_with(
        t: T,
        app: &Application,
        options: TestOptions,
    ) -> Result<Self, ConfigurationError> {
        let mut engine_options = options.engine;
        if options.verbose {
            engine_options = engine_options.with_observer(LogObserver);
        }
        let engine = Engine::new(app, engine_options)?;
        let router = engine.router().clone();
        let now = options.start_time.unwrap_or_else(Utc::now);

        debug!(application = %app.identity(), start_time = %now, "Test begun");

        let test = Self {
            t,
            engine: Arc::new(Mutex::new(engine)),
            router,
            now,
            enabled: options.enabled,
            current: SharedOptions::default(),
        };
        test.set_current(test.operation_options());
        Ok(test)
    }

    /// The host runner.
    pub fn runner(&self) -> &T {
        &self.t
    }

    /// Current virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The engine under test.
    pub fn engine(&self) -> &Arc<Mutex<Engine>> {
        &self.engine
    }

    /// Enable the named handlers for subsequent actions.
    pub fn enable_handlers(&mut self, names: &[&str]) -> &mut Self {
        self.set_enabled(names, true)
    }

    /// Disable the named handlers for subsequent actions.
    pub fn disable_handlers(&mut self, names: &[&str]) -> &mut Self {
        self.set_enabled(names, false)
    }

    pub fn command_executor(&self) -> CommandExecutor {
        CommandExecutor {
            engine: self.engine.clone(),
            current: self.current.clone(),
        }
    }

    pub fn event_recorder(&self) -> EventRecorder {
        EventRecorder {
            engine: self.engine.clone(),
            current: self.current.clone(),
        }
    }

    /// Run `actions` to establish prior state. Fails the test on the first
    /// action that errors.
    pub async fn prepare(&mut self, actions: Vec<Box<dyn Action>>) -> &mut Self {
        for action in actions {
            self.t.helper();
            self.log_action("PREPARING", action.as_ref());
            let options = self.operation_options();
            if let Err(err) = self.run(action.as_ref(), options).await {
                self.t.log(&format!("--- ACTION FAILED ---\n{err}"));
                self.t.fail();
                break;
            }
        }
        self
    }

    /// Run `action` and check that `expectation` holds over the facts it
    /// produces. The report is logged either way; the test fails if the
    /// expectation does not hold.
    pub async fn expect(
        &mut self,
        action: Box<dyn Action>,
        mut expectation: Box<dyn Expectation>,
    ) -> &mut Self {
        self.t.helper();
        self.log_action("EXPECTING", action.as_ref());

        let mut predicate_options = PredicateOptions::new(self.router.clone());
        action.expectation_options(&mut predicate_options);
        expectation.begin(&predicate_options);

        let shared = Arc::new(std::sync::Mutex::new(expectation));
        let options = self
            .operation_options()
            .with_shared_observer(Arc::new(ExpectationObserver(shared.clone())));

        if let Err(err) = self.run(action.as_ref(), options).await {
            self.t.log(&format!("--- ACTION FAILED ---\n{err}"));
            self.t.fail();
            return self;
        }

        let mut expectation = shared.lock().unwrap_or_else(|e| e.into_inner());
        expectation.end();
        let ok = expectation.ok();
        let report = expectation.build_report(ok, &DebugRenderer);
        drop(expectation);

        debug!(ok, criteria = %report.criteria, "Expectation evaluated");
        self.t.log(&format!("--- EXPECTATION REPORT ---\n\n{report}"));
        if !ok {
            self.t.fail();
        }
        self
    }

    async fn run(
        &mut self,
        action: &dyn Action,
        options: OperationOptions,
    ) -> Result<(), ActionError> {
        self.set_current(options.clone());
        let mut now = self.now;
        let result = {
            let mut scope = ActionScope {
                engine: &self.engine,
                options,
                now: &mut now,
            };
            action.run(&mut scope).await
        };
        self.now = now;
        self.set_current(self.operation_options());
        result
    }

    fn operation_options(&self) -> OperationOptions {
        OperationOptions::new()
            .with_current_time(self.now)
            .merge_enabled(&self.enabled)
    }

    fn set_current(&self, options: OperationOptions) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = options;
    }

    fn set_enabled(&mut self, names: &[&str], enabled: bool) -> &mut Self {
        for name in names {
            self.enabled.handlers.insert((*name).to_string(), enabled);
        }
        self.set_current(self.operation_options());
        self
    }

    fn log_action(&self, stage: &str, action: &dyn Action) {
        let location = action.location();
        self.t.log(&format!(
            "--- {stage}: {} ({}:{}) ---",
            action.caption(),
            location.file(),
            location.line()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestkitConfig;

    #[test]
    fn test_options_from_config() {
        let config = TestkitConfig {
            start_time: Some("2024-01-01T00:00:00Z".into()),
            verbose: true,
            ..TestkitConfig::default()
        };
        let options = TestOptions::from_config(&config).unwrap();
        assert_eq!(
            options.start_time.map(|t| t.to_rfc3339()),
            Some("2024-01-01T00:00:00+00:00".to_string())
        );
        assert!(options.verbose);
    }

    #[test]
    fn test_options_from_config_rejects_bad_start_time() {
        let config = TestkitConfig {
            start_time: Some("yesterday".into()),
            ..TestkitConfig::default()
        };
        assert!(TestOptions::from_config(&config).is_err());
    }

    #[test]
    fn test_handler_enablement_accumulates() {
        let options = TestOptions::new()
            .enable_handler_kind(HandlerKind::Projection, false)
            .enable_handler("orders", false);
        assert_eq!(options.enabled.kinds.get(&HandlerKind::Projection), Some(&false));
        assert_eq!(options.enabled.handlers.get("orders"), Some(&false));
    }
}
