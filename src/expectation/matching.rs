//! Expectations that check produced messages with a user-supplied predicate.

use super::report::Report;
use super::{Expectation, PredicateOptions, Renderer};
use crate::fact::Fact;
use crate::message::{Message, MessageKind};

/// Title of the section listing messages that did not match.
const FAILED_MATCHES: &str = "Failed Matches";

type MatchFn = Box<dyn Fn(&dyn Message) -> Result<(), String> + Send + Sync>;

/// Expect at least one executed command to satisfy `f`.
///
/// `f` returns `Err` with a reason when the message does not match.
pub fn to_execute_command_matching<F>(description: impl Into<String>, f: F) -> Box<dyn Expectation>
where
    F: Fn(&dyn Message) -> Result<(), String> + Send + Sync + 'static,
{
    Box::new(Matching::new(MessageKind::Command, Quantifier::Any, description.into(), Box::new(f)))
}

/// Expect at least one recorded event to satisfy `f`.
pub fn to_record_event_matching<F>(description: impl Into<String>, f: F) -> Box<dyn Expectation>
where
    F: Fn(&dyn Message) -> Result<(), String> + Send + Sync + 'static,
{
    Box::new(Matching::new(MessageKind::Event, Quantifier::Any, description.into(), Box::new(f)))
}

/// Expect every executed command to satisfy `f`.
///
/// Passes when no commands are executed.
pub fn to_only_execute_commands_matching<F>(
    description: impl Into<String>,
    f: F,
) -> Box<dyn Expectation>
where
    F: Fn(&dyn Message) -> Result<(), String> + Send + Sync + 'static,
{
    Box::new(Matching::new(MessageKind::Command, Quantifier::Only, description.into(), Box::new(f)))
}

/// Expect every recorded event to satisfy `f`.
///
/// Passes when no events are recorded.
pub fn to_only_record_events_matching<F>(
    description: impl Into<String>,
    f: F,
) -> Box<dyn Expectation>
where
    F: Fn(&dyn Message) -> Result<(), String> + Send + Sync + 'static,
{
    Box::new(Matching::new(MessageKind::Event, Quantifier::Only, description.into(), Box::new(f)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quantifier {
    Any,
    Only,
}

struct Matching {
    kind: MessageKind,
    quantifier: Quantifier,
    description: String,
    f: MatchFn,
    match_roots: bool,
    seen: usize,
    matched: usize,
    failures: Vec<String>,
}

impl Matching {
    fn new(kind: MessageKind, quantifier: Quantifier, description: String, f: MatchFn) -> Self {
        Self {
            kind,
            quantifier,
            description,
            f,
            match_roots: false,
            seen: 0,
            matched: 0,
            failures: Vec::new(),
        }
    }

    fn consider(&mut self, message: &dyn Message, kind: MessageKind) {
        if kind != self.kind {
            return;
        }
        self.seen += 1;
        match (self.f)(message) {
            Ok(()) => self.matched += 1,
            Err(reason) => self
                .failures
                .push(format!("{}: {reason}", message.message_type())),
        }
    }
}

impl Expectation for Matching {
    fn caption(&self) -> String {
        match self.quantifier {
            Quantifier::Any => format!(
                "{} {} that {}",
                self.kind.verb(),
                self.kind.with_article(),
                self.description
            ),
            Quantifier::Only => format!(
                "only {} {}s that {}",
                self.kind.verb(),
                self.kind,
                self.description
            ),
        }
    }

    fn begin(&mut self, options: &PredicateOptions) {
        self.match_roots = options.match_dispatch_cycle_started_facts;
        self.seen = 0;
        self.matched = 0;
        self.failures.clear();
    }

    fn notify(&mut self, fact: &Fact) {
        let envelope = match fact {
            Fact::DispatchCycleBegun { envelope, .. } if self.match_roots => envelope,
            _ => match fact.produced() {
                Some(envelope) => envelope,
                None => return,
            },
        };
        self.consider(&*envelope.message, envelope.kind);
    }

    fn end(&mut self) {}

    fn ok(&self) -> bool {
        match self.quantifier {
            Quantifier::Any => self.matched > 0,
            Quantifier::Only => self.failures.is_empty(),
        }
    }

    fn build_report(&self, tree_ok: bool, _renderer: &dyn Renderer) -> Report {
        let ok = self.ok();
        let kind = self.kind;
        let past = kind.past_tense();

        let outcome = match (self.quantifier, ok) {
            (Quantifier::Any, true) => format!("a matching {kind} was {past}"),
            (Quantifier::Any, false) if self.seen == 0 => format!("no {kind}s were {past}"),
            (Quantifier::Any, false) => format!("none of the {} {kind}s matched", self.seen),
            (Quantifier::Only, true) if self.seen == 0 => format!("no {kind}s were {past}"),
            (Quantifier::Only, true) => format!("all {} {kind}s matched", self.seen),
            (Quantifier::Only, false) => format!(
                "{} of the {} {kind}s did not match",
                self.failures.len(),
                self.seen
            ),
        };

        let mut report = Report::new(tree_ok, ok, self.caption()).with_outcome(outcome);
        if !ok {
            if self.seen == 0 {
                report.suggest(format!("verify the relevant handlers {} {kind}s", kind.verb()));
            } else if !tree_ok {
                report.add_section(FAILED_MATCHES, self.failures.iter().cloned());
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectation::testing::*;

    fn facts() -> Vec<Fact> {
        let root = command(1, PlaceOrder { id: "o1".into() });
        vec![
            cycle_begun(&root),
            event_recorded(&root, 2, OrderPlaced { id: "o1".into() }),
            event_recorded(&root, 3, OrderPlaced { id: "o2".into() }),
        ]
    }

    fn id_is(id: &'static str) -> impl Fn(&dyn Message) -> Result<(), String> + Send + Sync {
        move |m| match m.downcast_ref::<OrderPlaced>() {
            Some(e) if e.id == id => Ok(()),
            Some(e) => Err(format!("id is {}", e.id)),
            None => Err("not an OrderPlaced".into()),
        }
    }

    #[test]
    fn test_any_matches() {
        let report = evaluate(to_record_event_matching("is for o2", id_is("o2")), &facts());
        assert!(report.ok);
        assert_eq!(report.criteria, "record an event that is for o2");
    }

    #[test]
    fn test_only_reports_failed_matches() {
        let report = evaluate(to_only_record_events_matching("are for o1", id_is("o1")), &facts());
        assert!(!report.ok);
        assert_eq!(report.outcome, "1 of the 2 events did not match");
        let section = report.section(FAILED_MATCHES).expect("failed matches");
        assert_eq!(section.content, vec!["OrderPlaced: id is o2".to_string()]);
    }

    #[test]
    fn test_only_passes_vacuously() {
        let report = evaluate(
            to_only_execute_commands_matching("are valid", |_| Err("never".into())),
            &facts(),
        );
        assert!(report.ok);
        assert_eq!(report.outcome, "no commands were executed");
    }

    #[test]
    fn test_roots_considered_when_requested() {
        let root = command(1, PlaceOrder { id: "o1".into() });
        let mut expectation = to_execute_command_matching("places o1", |m| {
            m.downcast_ref::<PlaceOrder>()
                .filter(|c| c.id == "o1")
                .map(|_| ())
                .ok_or_else(|| "wrong command".to_string())
        });
        let mut options = PredicateOptions::new(router());
        options.match_dispatch_cycle_started_facts = true;
        expectation.begin(&options);
        expectation.notify(&cycle_begun(&root));
        expectation.end();
        assert!(expectation.ok());
    }
}
