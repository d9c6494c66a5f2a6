//! Expectations that a specific message, or a message of a specific type, is
//! produced.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::diff::line_diff;
use super::report::{Report, MESSAGE_DIFF, MESSAGE_TYPE_DIFF};
use super::similarity::Similarity;
use super::{Expectation, PredicateOptions, Renderer};
use crate::envelope::Envelope;
use crate::fact::{EnabledHandlers, Fact, SkipReason};
use crate::handler::HandlerRef;
use crate::message::{Message, MessageKind, MessageType};
use crate::router::Router;

const WRAPPED: &str =
    "check the message type, it may be wrapped in (or unwrapped from) a Box, Arc or Option";

/// Expect a command equal to `command` to be executed.
pub fn to_execute_command<M: Message>(command: M) -> Box<dyn Expectation> {
    Box::new(MessageExpectation::new(
        Target::Message(Arc::new(command)),
        MessageType::of::<M>(),
        MessageKind::Command,
    ))
}

/// Expect an event equal to `event` to be recorded.
pub fn to_record_event<M: Message>(event: M) -> Box<dyn Expectation> {
    Box::new(MessageExpectation::new(
        Target::Message(Arc::new(event)),
        MessageType::of::<M>(),
        MessageKind::Event,
    ))
}

/// Expect any command of type `M` to be executed.
pub fn to_execute_command_of_type<M: Message>() -> Box<dyn Expectation> {
    Box::new(MessageExpectation::new(
        Target::Type,
        MessageType::of::<M>(),
        MessageKind::Command,
    ))
}

/// Expect any event of type `M` to be recorded.
pub fn to_record_event_of_type<M: Message>() -> Box<dyn Expectation> {
    Box::new(MessageExpectation::new(
        Target::Type,
        MessageType::of::<M>(),
        MessageKind::Event,
    ))
}

enum Target {
    Message(Arc<dyn Message>),
    Type,
}

/// The closest match seen so far.
struct NearMiss {
    similarity: Similarity,
    envelope: Envelope,
    producer: Option<HandlerRef>,
}

impl NearMiss {
    fn by(&self) -> String {
        match &self.producer {
            Some(handler) => format!("by the {handler} handler"),
            None => "by the test".to_string(),
        }
    }
}

struct MessageExpectation {
    target: Target,
    expected_type: MessageType,
    kind: MessageKind,
    options: Option<PredicateOptions>,
    ok: bool,
    enabled: EnabledHandlers,
    engaged: BTreeSet<HandlerRef>,
    /// Messages of the expected kind seen.
    produced: usize,
    best: Option<NearMiss>,
    other_kind: Option<NearMiss>,
}

impl MessageExpectation {
    fn new(target: Target, expected_type: MessageType, kind: MessageKind) -> Self {
        Self {
            target,
            expected_type,
            kind,
            options: None,
            ok: false,
            enabled: EnabledHandlers::default(),
            engaged: BTreeSet::new(),
            produced: 0,
            best: None,
            other_kind: None,
        }
    }

    fn consider(&mut self, envelope: &Envelope, producer: Option<&HandlerRef>) {
        if self.ok {
            return;
        }

        let similarity = match &self.target {
            Target::Message(expected) => Similarity::of_messages(&**expected, &*envelope.message),
            Target::Type => Similarity::of_types(&self.expected_type, &envelope.message_type),
        };
        let miss = || NearMiss {
            similarity,
            envelope: envelope.clone(),
            producer: producer.cloned(),
        };

        if envelope.kind != self.kind {
            if similarity == Similarity::Equal && self.other_kind.is_none() {
                self.other_kind = Some(miss());
            }
            return;
        }

        self.produced += 1;
        if similarity == Similarity::Equal {
            self.ok = true;
        } else if similarity > Similarity::Unrelated
            && self.best.as_ref().map_or(true, |b| similarity > b.similarity)
        {
            self.best = Some(miss());
        }
    }

    fn assertion_name(&self, kind: MessageKind) -> Option<&'static str> {
        let by_type = matches!(self.target, Target::Type);
        match (kind, by_type) {
            (MessageKind::Command, false) => Some("to_execute_command()"),
            (MessageKind::Command, true) => Some("to_execute_command_of_type()"),
            (MessageKind::Event, false) => Some("to_record_event()"),
            (MessageKind::Event, true) => Some("to_record_event_of_type()"),
            (MessageKind::Timeout, _) => None,
        }
    }

    fn suggest_swap(&self, report: &mut Report, actual: MessageKind) {
        if let (Some(instead), Some(current)) =
            (self.assertion_name(actual), self.assertion_name(self.kind))
        {
            report.suggest(format!("did you mean to use {instead} instead of {current}?"));
        }
    }

    /// Explain a failure where a wrapped or unwrapped form of the expected
    /// type was produced.
    fn explain_indirect(&self, report: Report, miss: &NearMiss, tree_ok: bool) -> Report {
        let kind = self.kind;
        let mut report = report
            .with_outcome(format!(
                "{} of a similar type was {}",
                kind.with_article(),
                kind.past_tense()
            ))
            .with_explanation(format!(
                "a '{}' {kind} was {} {}",
                miss.envelope.message_type,
                kind.past_tense(),
                miss.by()
            ));
        report.suggest(WRAPPED);
        if !tree_ok {
            report.add_section(
                MESSAGE_TYPE_DIFF,
                line_diff(self.expected_type.name(), miss.envelope.message_type.name()),
            );
        }
        report
    }

    /// The declared outbound type of the expected kind that is a wrapped or
    /// unwrapped form of the expected type, closest first.
    fn closest_declared(&self, router: &Router) -> Option<MessageType> {
        router
            .produced_types(self.kind)
            .into_iter()
            .filter_map(|t| match Similarity::of_types(&self.expected_type, &t) {
                s @ Similarity::Indirect(_) => Some((s, t)),
                _ => None,
            })
            .max_by_key(|(s, _)| *s)
            .map(|(_, t)| t)
    }

    /// Explain a failure that involves no similar message.
    fn explain_absence(&self, mut report: Report, options: &PredicateOptions) -> Report {
        let router = &options.router;
        let kind = self.kind;
        let producers = router.producers_of(&self.expected_type);

        let disabled: Vec<(&HandlerRef, SkipReason)> = producers
            .iter()
            .filter_map(|handler| {
                router
                    .handler(handler.name())
                    .and_then(|config| self.enabled.skip_reason(config))
                    .map(|reason| (*handler, reason))
            })
            .collect();

        for (handler, reason) in &disabled {
            report.suggest(match reason {
                SkipReason::HandlerKindDisabled => format!(
                    "enable {}s using the {}() option",
                    handler.kind,
                    handler.kind.option_name()
                ),
                SkipReason::HandlerDisabledByOption => format!(
                    "enable the {handler} handler using the enable_handler() option"
                ),
                SkipReason::HandlerDisabledByConfiguration => format!(
                    "the {handler} handler is disabled by its configuration, enable it using the enable_handler() option"
                ),
            });
        }

        if !producers.is_empty() && disabled.len() == producers.len() {
            return report.with_explanation("the relevant handlers were disabled");
        }

        let engaged = producers.iter().any(|h| self.engaged.contains(*h));
        if !engaged {
            report.suggest("verify the relevant handlers consume the message that was dispatched");
        }
        report.suggest(format!(
            "verify the logic within the handlers that {} '{}' {}s",
            kind.verb(),
            self.expected_type,
            kind
        ));

        if self.produced == 0 {
            report.with_explanation(format!(
                "nothing produced the expected '{}' {}",
                self.expected_type, kind
            ))
        } else {
            report.with_explanation(format!(
                "none of the {} {}s that were {} resemble the expected {}",
                self.produced,
                kind,
                kind.past_tense(),
                kind
            ))
        }
    }
}

impl Expectation for MessageExpectation {
    fn caption(&self) -> String {
        let quantifier = match self.target {
            Target::Message(_) => "a specific",
            Target::Type => "any",
        };
        format!(
            "{} {} '{}' {}",
            self.kind.verb(),
            quantifier,
            self.expected_type,
            self.kind
        )
    }

    fn begin(&mut self, options: &PredicateOptions) {
        *self = Self::new(
            std::mem::replace(&mut self.target, Target::Type),
            self.expected_type,
            self.kind,
        );
        self.options = Some(options.clone());
    }

    fn notify(&mut self, fact: &Fact) {
        match fact {
            Fact::DispatchCycleBegun {
                envelope, enabled, ..
            } => {
                self.enabled = enabled.clone();
                let from_test = self
                    .options
                    .as_ref()
                    .is_some_and(|o| o.match_dispatch_cycle_started_facts);
                if from_test {
                    self.consider(envelope, None);
                }
            }
            Fact::TickCycleBegun { enabled, .. } => {
                self.enabled = enabled.clone();
            }
            Fact::HandlingBegun { handler, .. } => {
                self.engaged.insert(handler.clone());
            }
            _ => {
                if let Some(envelope) = fact.produced() {
                    self.consider(envelope, fact.handler());
                }
            }
        }
    }

    fn end(&mut self) {}

    fn ok(&self) -> bool {
        self.ok
    }

    fn build_report(&self, tree_ok: bool, renderer: &dyn Renderer) -> Report {
        let kind = self.kind;
        let report = Report::new(tree_ok, self.ok, self.caption());
        if self.ok {
            return report.with_outcome(format!("the expected {kind} was {}", kind.past_tense()));
        }

        let mut report =
            report.with_outcome(format!("the expected {kind} was not {}", kind.past_tense()));

        if let Some(miss) = &self.other_kind {
            let actual = miss.envelope.kind;
            let mut report = report
                .with_outcome(format!("a similar {actual} was {}", actual.past_tense()))
                .with_explanation(format!(
                    "the expected message was {} as {} {}",
                    actual.past_tense(),
                    actual.with_article(),
                    miss.by()
                ));
            self.suggest_swap(&mut report, actual);
            return report;
        }

        let Some(options) = &self.options else {
            return report;
        };
        let router = &options.router;

        if let Some(miss) = self
            .best
            .as_ref()
            .filter(|m| matches!(m.similarity, Similarity::Indirect(_)))
        {
            return self.explain_indirect(report, miss, tree_ok);
        }

        match router.kind_of(&self.expected_type) {
            None => {
                let explanation = match self.closest_declared(router) {
                    Some(declared) => {
                        report.suggest(WRAPPED);
                        if !tree_ok {
                            report.add_section(
                                MESSAGE_TYPE_DIFF,
                                line_diff(self.expected_type.name(), declared.name()),
                            );
                        }
                        format!(
                            "no handlers in the application route '{}' messages, the closest routed {kind} type is '{declared}'",
                            self.expected_type
                        )
                    }
                    None => {
                        report.suggest("check the message type is routed by the application");
                        format!(
                            "no handlers in the application route '{}' messages",
                            self.expected_type
                        )
                    }
                };
                return report.with_explanation(explanation);
            }
            Some(routed) if routed != kind => {
                self.suggest_swap(&mut report, routed);
                return report.with_explanation(format!(
                    "'{}' is routed as {}, not {}",
                    self.expected_type,
                    routed.with_article(),
                    kind.with_article()
                ));
            }
            Some(_) => {}
        }

        if router.producers_of(&self.expected_type).is_empty() {
            report.suggest("check the application's routing configuration");
            return report.with_explanation(format!(
                "no handlers {} '{}' {}s",
                kind.verb(),
                self.expected_type,
                kind
            ));
        }

        match (&self.target, &self.best) {
            (Target::Message(expected), Some(miss)) if miss.similarity == Similarity::SameType => {
                let mut report = report
                    .with_outcome(format!("a similar {kind} was {}", kind.past_tense()))
                    .with_explanation(format!(
                        "a similar {kind} was {} {}",
                        kind.past_tense(),
                        miss.by()
                    ));
                report.suggest("check the content of the message");
                if !tree_ok {
                    report.add_section(
                        MESSAGE_DIFF,
                        line_diff(
                            &renderer.render(&**expected),
                            &renderer.render(&*miss.envelope.message),
                        ),
                    );
                }
                report
            }
            _ => self.explain_absence(report, options),
        }
    }
}
