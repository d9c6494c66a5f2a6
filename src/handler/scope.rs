//! State shared by every handler scope.

use std::panic::Location;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::envelope::{Envelope, MessageIdGenerator};
use crate::fact::Fact;
use crate::handler::HandlerRef;
use crate::message::{Message, MessageKind, ValidationScope};
use crate::observer::ObserverSet;
use crate::router::{Direction, Router};

/// A contract violation observed inside a handler callback.
///
/// The controller turns this into an [`UnexpectedBehavior`] once the callback
/// returns.
///
/// [`UnexpectedBehavior`]: crate::engine::UnexpectedBehavior
#[derive(Debug, Clone)]
pub(crate) struct Violation {
    pub method: &'static str,
    pub message: Option<Arc<dyn Message>>,
    pub description: String,
    pub location: &'static Location<'static>,
}

/// Engine services available to a scope for the duration of one call.
pub(crate) struct ScopeCore<'a> {
    pub handler: &'a HandlerRef,
    pub envelope: &'a Envelope,
    pub router: &'a Router,
    pub ids: &'a MessageIdGenerator,
    pub observers: &'a ObserverSet,
    pub now: DateTime<Utc>,
    pub violation: Option<Violation>,
}

impl<'a> ScopeCore<'a> {
    pub fn new(
        handler: &'a HandlerRef,
        envelope: &'a Envelope,
        router: &'a Router,
        ids: &'a MessageIdGenerator,
        observers: &'a ObserverSet,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            handler,
            envelope,
            router,
            ids,
            observers,
            now,
            violation: None,
        }
    }

    pub fn emit(&self, fact: Fact) {
        self.observers.notify(fact);
    }

    /// Record a violation. Only the first one in a call is kept.
    pub fn violate(
        &mut self,
        method: &'static str,
        message: Option<Arc<dyn Message>>,
        description: String,
        location: &'static Location<'static>,
    ) {
        if self.violation.is_none() {
            self.violation = Some(Violation {
                method,
                message,
                description,
                location,
            });
        }
    }

    /// Check that the handler may produce `message` as `kind`.
    ///
    /// Returns false, recording a violation, if the type is not an outbound
    /// route of this handler, is routed as a different kind, or fails
    /// validation. Always false once a violation has been recorded.
    pub fn check_produced(
        &mut self,
        method: &'static str,
        message: &Arc<dyn Message>,
        kind: MessageKind,
        location: &'static Location<'static>,
    ) -> bool {
        if self.violation.is_some() {
            return false;
        }

        let message_type = message.message_type();
        let direction = self.router.direction_of(self.handler.name(), &message_type);
        if !matches!(direction, Some(Direction::Outbound) | Some(Direction::Both)) {
            self.violate(
                method,
                Some(message.clone()),
                format!(
                    "the '{}' message can not be {} as {}, it is not produced by this handler",
                    message_type,
                    kind.past_tense(),
                    kind.with_article(),
                ),
                location,
            );
            return false;
        }

        if let Some(routed) = self.router.kind_of(&message_type) {
            if routed != kind {
                self.violate(
                    method,
                    Some(message.clone()),
                    format!(
                        "the '{}' message can not be {} as {}, it is configured as {}",
                        message_type,
                        kind.past_tense(),
                        kind.with_article(),
                        routed.with_article(),
                    ),
                    location,
                );
                return false;
            }
        }

        if let Err(err) = message.validate(&ValidationScope::new(kind)) {
            self.violate(
                method,
                Some(message.clone()),
                format!(
                    "{} an invalid '{}' {}: {}",
                    kind.past_tense(),
                    message_type,
                    kind,
                    err
                ),
                location,
            );
            return false;
        }

        true
    }
}
