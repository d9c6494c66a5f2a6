//! Fact observers.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::fact::Fact;

/// Receives every fact the engine emits.
///
/// Observers are notified synchronously on the dispatching task and must not
/// block for observable durations.
pub trait Observer: Send + Sync {
    fn notify(&self, fact: &Fact);
}

impl<F> Observer for F
where
    F: Fn(&Fact) + Send + Sync,
{
    fn notify(&self, fact: &Fact) {
        self(fact)
    }
}

/// An ordered set of observers, notified in registration order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    /// This set followed by `other`.
    pub fn merged(&self, other: &ObserverSet) -> ObserverSet {
        let mut observers = self.observers.clone();
        observers.extend(other.observers.iter().cloned());
        ObserverSet { observers }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn notify(&self, fact: Fact) {
        for observer in &self.observers {
            observer.notify(&fact);
        }
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("len", &self.observers.len())
            .finish()
    }
}

impl FromIterator<Arc<dyn Observer>> for ObserverSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Observer>>>(iter: I) -> Self {
        Self {
            observers: iter.into_iter().collect(),
        }
    }
}

/// Collects facts in memory.
#[derive(Debug, Default)]
pub struct FactBuffer {
    facts: Mutex<Vec<Fact>>,
}

impl FactBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Fact>> {
        // A panicking observer elsewhere must not hide the facts seen so far.
        self.facts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A copy of the facts collected so far.
    pub fn facts(&self) -> Vec<Fact> {
        self.lock().clone()
    }

    /// Remove and return the collected facts.
    pub fn take(&self) -> Vec<Fact> {
        std::mem::take(&mut *self.lock())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Variant names of the collected facts, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.lock().iter().map(Fact::name).collect()
    }
}

impl Observer for FactBuffer {
    fn notify(&self, fact: &Fact) {
        self.lock().push(fact.clone());
    }
}

/// Forwards facts to `tracing`.
///
/// Errors and skipped handlers are logged at `warn`, everything else at
/// `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn notify(&self, fact: &Fact) {
        let handler = fact.handler().map(|h| h.name().to_string());
        match fact {
            Fact::HandlingCompleted { error: Some(_), .. }
            | Fact::DispatchCycleCompleted { error: Some(_), .. }
            | Fact::TickCycleCompleted { error: Some(_) }
            | Fact::TickCompleted { error: Some(_), .. }
            | Fact::ProjectionCompactionCompleted { error: Some(_), .. }
            | Fact::HandlingSkipped { .. }
            | Fact::TickSkipped { .. } => {
                warn!(fact = fact.name(), handler = ?handler, "{}", fact);
            }
            _ => {
                debug!(fact = fact.name(), handler = ?handler, "{}", fact);
            }
        }
    }
}
