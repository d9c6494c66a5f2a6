//! Expectations over the fact stream.
//!
//! An [`Expectation`] observes the facts produced by one test action and
//! decides whether the application behaved as required. Failed expectations
//! produce a [`Report`] that explains what actually happened and suggests
//! where to look.
//!
//! ```ignore
//! test.expect(
//!     execute_command(PlaceOrder { id: "o1".into() }),
//!     all_of(vec![
//!         to_record_event(OrderPlaced { id: "o1".into() }),
//!         to_execute_command_of_type::<ReserveStock>(),
//!     ]),
//! )
//! .await;
//! ```

mod composite;
mod diff;
mod matching;
mod message;
mod report;
mod satisfy;
mod similarity;

use std::fmt;
use std::sync::Arc;

pub use composite::{
    all_of, any_of, none_of, to_repeatedly, try_all_of, try_any_of, try_none_of,
    EmptyCompositeError,
};
pub use diff::line_diff;
pub use matching::{
    to_execute_command_matching, to_only_execute_commands_matching,
    to_only_record_events_matching, to_record_event_matching,
};
pub use message::{
    to_execute_command, to_execute_command_of_type, to_record_event, to_record_event_of_type,
};
pub use report::{Report, ReportSection};
pub use satisfy::{should, Halt, SatisfyT};
pub use similarity::Similarity;

use crate::fact::Fact;
use crate::message::Message;
use crate::router::Router;

/// Options shared by every expectation in one test action.
#[derive(Debug, Clone)]
pub struct PredicateOptions {
    /// Routing table of the application under test.
    pub router: Arc<Router>,
    /// Treat messages dispatched by the action itself as produced messages.
    ///
    /// Set for actions that run user code, where commands and events sent
    /// through an executor or recorder are the behavior under test.
    pub match_dispatch_cycle_started_facts: bool,
}

impl PredicateOptions {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            match_dispatch_cycle_started_facts: false,
        }
    }
}

/// Renders messages for reports.
pub trait Renderer: Send + Sync {
    fn render(&self, message: &dyn Message) -> String;
}

/// Renders messages with their pretty-printed `Debug` representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugRenderer;

impl Renderer for DebugRenderer {
    fn render(&self, message: &dyn Message) -> String {
        format!("{message:#?}")
    }
}

/// A stateful predicate over the facts of one test action.
///
/// The lifecycle is `begin`, then `notify` for every fact, then `end`,
/// after which `ok` and `build_report` may be called.
pub trait Expectation: Send {
    /// Criteria as an imperative sentence, e.g. "record a specific 'X' event".
    fn caption(&self) -> String;

    fn begin(&mut self, options: &PredicateOptions);

    fn notify(&mut self, fact: &Fact);

    fn end(&mut self);

    fn ok(&self) -> bool;

    /// Build the report for this expectation.
    ///
    /// `tree_ok` is the result of the whole expectation tree; details that
    /// only help diagnose a failure are left out when it is true.
    fn build_report(&self, tree_ok: bool, renderer: &dyn Renderer) -> Report;
}

impl fmt::Debug for dyn Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("caption", &self.caption())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by expectation tests.

    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use super::{DebugRenderer, Expectation, PredicateOptions, Report};
    use crate::application::HandlerConfig;
    use crate::envelope::{Envelope, EventStreamPosition, MessageId, Origin};
    use crate::fact::{EnabledHandlers, Fact};
    use crate::handler::{HandlerKind, HandlerRef, Identity};
    use crate::message::{Message, MessageKind, MessageType};
    use crate::router::{Direction, Route, Router};

    #[derive(Debug, Clone, PartialEq)]
    pub struct OrderPlaced {
        pub id: String,
    }
    impl Message for OrderPlaced {}

    #[derive(Debug, Clone, PartialEq)]
    pub struct PlaceOrder {
        pub id: String,
    }
    impl Message for PlaceOrder {}

    #[derive(Debug, Clone, PartialEq)]
    pub struct Unrouted;
    impl Message for Unrouted {}

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    pub fn orders() -> HandlerRef {
        HandlerRef::new(Identity::new("orders", "orders-key"), HandlerKind::Aggregate)
    }

    pub fn router() -> Arc<Router> {
        let config = HandlerConfig {
            handler: orders(),
            implementation: "testing::Orders",
            routes: vec![
                Route {
                    message_type: MessageType::of::<PlaceOrder>(),
                    kind: MessageKind::Command,
                    direction: Direction::Inbound,
                },
                Route {
                    message_type: MessageType::of::<OrderPlaced>(),
                    kind: MessageKind::Event,
                    direction: Direction::Outbound,
                },
            ],
            disabled: false,
        };
        Arc::new(Router::new([&config]).unwrap())
    }

    pub fn command(id: u64, message: impl Message) -> Envelope {
        Envelope::new_command(MessageId::new(id), Arc::new(message), now())
    }

    pub fn cycle_begun(root: &Envelope) -> Fact {
        Fact::DispatchCycleBegun {
            envelope: root.clone(),
            engine_time: now(),
            enabled: EnabledHandlers::default(),
        }
    }

    pub fn event_recorded(root: &Envelope, id: u64, message: impl Message) -> Fact {
        let event = root.new_child_event(
            MessageId::new(id),
            Arc::new(message),
            now(),
            Origin::new(orders(), Some("o1".into())),
            EventStreamPosition::new("stream", id),
        );
        Fact::EventRecordedByAggregate {
            handler: orders(),
            instance_id: "o1".into(),
            root: String::new(),
            envelope: root.clone(),
            event_envelope: event,
        }
    }

    /// Run `expectation` over `facts` and build its report.
    pub fn evaluate(mut expectation: Box<dyn Expectation>, facts: &[Fact]) -> Report {
        expectation.begin(&PredicateOptions::new(router()));
        for fact in facts {
            expectation.notify(fact);
        }
        expectation.end();
        let ok = expectation.ok();
        expectation.build_report(ok, &DebugRenderer)
    }
}
