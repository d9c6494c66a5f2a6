//! User-defined expectations.

use std::panic::Location;
use std::sync::Arc;

use super::report::{Report, LOG_MESSAGES};
use super::{Expectation, PredicateOptions, Renderer};
use crate::fact::Fact;
use crate::router::Router;

type SatisfyFn = Box<dyn Fn(&mut SatisfyT<'_>) -> Result<(), Halt> + Send + Sync>;

/// Expect `f` to pass when run over the facts of the action.
///
/// `f` runs once, after the action completes, and reports problems through
/// its [`SatisfyT`].
///
/// ```ignore
/// should("record exactly two events", |t| {
///     let n = t.facts().iter().filter(|f| f.produced().is_some()).count();
///     if n != 2 {
///         t.error(format!("got {n} events"));
///     }
///     Ok(())
/// })
/// ```
pub fn should<F>(criteria: impl Into<String>, f: F) -> Box<dyn Expectation>
where
    F: Fn(&mut SatisfyT<'_>) -> Result<(), Halt> + Send + Sync + 'static,
{
    Box::new(Satisfy {
        criteria: criteria.into(),
        f: Box::new(f),
        router: None,
        facts: Vec::new(),
        outcome: Outcome::default(),
    })
}

/// Stops a user-defined expectation early.
///
/// Obtain one from [`SatisfyT::fatal`] or [`SatisfyT::skip`] and return it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halt(());

/// The runner API available to a user-defined expectation.
pub struct SatisfyT<'a> {
    facts: &'a [Fact],
    router: &'a Router,
    logs: Vec<String>,
    failed: bool,
    skipped: bool,
    location: Option<&'static Location<'static>>,
    cleanups: Vec<Box<dyn FnOnce() + 'a>>,
}

impl<'a> SatisfyT<'a> {
    /// Facts observed during the action, in order.
    pub fn facts(&self) -> &'a [Fact] {
        self.facts
    }

    pub fn router(&self) -> &'a Router {
        self.router
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
    }

    /// Log `message` and mark the expectation as failed.
    #[track_caller]
    pub fn error(&mut self, message: impl Into<String>) {
        self.log(message);
        self.fail_at(Location::caller());
    }

    /// Mark the expectation as failed.
    #[track_caller]
    pub fn fail(&mut self) {
        self.fail_at(Location::caller());
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Log `message`, mark the expectation as failed and stop.
    #[track_caller]
    pub fn fatal(&mut self, message: impl Into<String>) -> Halt {
        self.error(message);
        Halt(())
    }

    /// Log `message` and stop without failing.
    pub fn skip(&mut self, message: impl Into<String>) -> Halt {
        self.log(message);
        self.skipped = true;
        Halt(())
    }

    /// No-op. Failures are attributed to the caller of [`SatisfyT::error`],
    /// [`SatisfyT::fail`] or [`SatisfyT::fatal`]; mark helper functions
    /// `#[track_caller]` to attribute them further up.
    pub fn helper(&self) {}

    /// Register `f` to run after the expectation finishes, most recent first.
    pub fn cleanup(&mut self, f: impl FnOnce() + 'a) {
        self.cleanups.push(Box::new(f));
    }

    fn fail_at(&mut self, location: &'static Location<'static>) {
        self.failed = true;
        self.location.get_or_insert(location);
    }
}

#[derive(Debug, Default)]
struct Outcome {
    evaluated: bool,
    failed: bool,
    skipped: bool,
    logs: Vec<String>,
    location: Option<&'static Location<'static>>,
}

struct Satisfy {
    criteria: String,
    f: SatisfyFn,
    router: Option<Arc<Router>>,
    facts: Vec<Fact>,
    outcome: Outcome,
}

impl Expectation for Satisfy {
    fn caption(&self) -> String {
        self.criteria.clone()
    }

    fn begin(&mut self, options: &PredicateOptions) {
        self.router = Some(options.router.clone());
        self.facts.clear();
        self.outcome = Outcome::default();
    }

    fn notify(&mut self, fact: &Fact) {
        self.facts.push(fact.clone());
    }

    fn end(&mut self) {
        let fallback = Router::default();
        let router = self.router.as_deref().unwrap_or(&fallback);
        let mut t = SatisfyT {
            facts: &self.facts,
            router,
            logs: Vec::new(),
            failed: false,
            skipped: false,
            location: None,
            cleanups: Vec::new(),
        };

        // Either way the result is already recorded on `t`.
        let _ = (self.f)(&mut t);

        while let Some(cleanup) = t.cleanups.pop() {
            cleanup();
        }

        self.outcome = Outcome {
            evaluated: true,
            failed: t.failed,
            skipped: t.skipped,
            logs: t.logs,
            location: t.location,
        };
    }

    fn ok(&self) -> bool {
        self.outcome.evaluated && !self.outcome.failed
    }

    fn build_report(&self, tree_ok: bool, _renderer: &dyn Renderer) -> Report {
        let ok = self.ok();
        let outcome = match (ok, self.outcome.skipped) {
            (true, true) => "the user-defined assertion was skipped",
            (true, false) => "the user-defined assertion passed",
            (false, _) => "the user-defined assertion failed",
        };
        let mut report = Report::new(tree_ok, ok, self.criteria.clone()).with_outcome(outcome);

        if !ok {
            if let Some(location) = self.outcome.location {
                report = report.with_explanation(format!(
                    "failed at {}:{}",
                    location.file(),
                    location.line()
                ));
            }
        }
        if !self.outcome.logs.is_empty() && (!ok || self.outcome.skipped) {
            report.add_section(LOG_MESSAGES, self.outcome.logs.iter().cloned());
        }
        report
    }
}
