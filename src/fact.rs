//! The fact stream.
//!
//! The engine emits one [`Fact`] per observable step. Facts carry enough
//! context (handler, envelopes, instance id, error, skip reason) for loggers
//! and expectations to reason about a run without looking at engine state.
//!
//! Roots are captured as their `Debug` rendering at the moment of the fact, so
//! facts stay `Clone + Send` regardless of the application's root types.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::envelope::Envelope;
use crate::handler::{HandlerKind, HandlerRef, SharedError};
use crate::message::{Message, MessageType};

/// Why a handler was not invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// All handlers of this kind are disabled by operation options.
    HandlerKindDisabled,
    /// This handler is disabled by name in operation options.
    HandlerDisabledByOption,
    /// This handler disabled itself in its configuration.
    HandlerDisabledByConfiguration,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::HandlerKindDisabled => "handler kind disabled",
            SkipReason::HandlerDisabledByOption => "handler disabled by option",
            SkipReason::HandlerDisabledByConfiguration => "handler disabled by configuration",
        })
    }
}

/// Enablement in effect for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnabledHandlers {
    /// Per-kind switches. Kinds not present are enabled.
    pub kinds: BTreeMap<HandlerKind, bool>,
    /// Per-handler overrides, keyed by handler name.
    pub handlers: BTreeMap<String, bool>,
}

impl EnabledHandlers {
    pub fn kind_enabled(&self, kind: HandlerKind) -> bool {
        self.kinds.get(&kind).copied().unwrap_or(true)
    }
}

/// One observable step of the engine.
#[derive(Debug, Clone)]
pub enum Fact {
    // --- dispatch ---
    DispatchCycleBegun {
        envelope: Envelope,
        engine_time: DateTime<Utc>,
        enabled: EnabledHandlers,
    },
    DispatchCycleCompleted {
        envelope: Envelope,
        error: Option<SharedError>,
    },
    /// The message type has no route; nothing was dispatched.
    DispatchCycleSkipped {
        message: Arc<dyn Message>,
        message_type: MessageType,
        engine_time: DateTime<Utc>,
    },
    DispatchBegun {
        envelope: Envelope,
    },
    DispatchCompleted {
        envelope: Envelope,
    },
    HandlingBegun {
        handler: HandlerRef,
        envelope: Envelope,
    },
    HandlingCompleted {
        handler: HandlerRef,
        envelope: Envelope,
        error: Option<SharedError>,
    },
    HandlingSkipped {
        handler: HandlerRef,
        envelope: Envelope,
        reason: SkipReason,
    },

    // --- tick ---
    TickCycleBegun {
        engine_time: DateTime<Utc>,
        enabled: EnabledHandlers,
    },
    TickCycleCompleted {
        error: Option<SharedError>,
    },
    TickBegun {
        handler: HandlerRef,
    },
    TickCompleted {
        handler: HandlerRef,
        error: Option<SharedError>,
    },
    TickSkipped {
        handler: HandlerRef,
        reason: SkipReason,
    },

    // --- aggregate ---
    AggregateInstanceLoaded {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },
    AggregateInstanceNotFound {
        handler: HandlerRef,
        instance_id: String,
        envelope: Envelope,
    },
    AggregateInstanceCreated {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },
    AggregateInstanceDestroyed {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },
    AggregateInstanceDestructionReverted {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },
    EventRecordedByAggregate {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
        event_envelope: Envelope,
    },
    MessageLoggedByAggregate {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
        message: String,
    },

    // --- process ---
    ProcessInstanceLoaded {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },
    ProcessEventIgnored {
        handler: HandlerRef,
        envelope: Envelope,
    },
    ProcessEventRoutedToEndedInstance {
        handler: HandlerRef,
        instance_id: String,
        envelope: Envelope,
    },
    ProcessTimeoutRoutedToEndedInstance {
        handler: HandlerRef,
        instance_id: String,
        envelope: Envelope,
    },
    ProcessInstanceNotFound {
        handler: HandlerRef,
        instance_id: String,
        envelope: Envelope,
    },
    ProcessInstanceBegun {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },
    ProcessInstanceEnded {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },
    ProcessInstanceEndingReverted {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },
    CommandExecutedByProcess {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
        command_envelope: Envelope,
    },
    TimeoutScheduledByProcess {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
        timeout_envelope: Envelope,
    },
    MessageLoggedByProcess {
        handler: HandlerRef,
        instance_id: String,
        root: String,
        envelope: Envelope,
        message: String,
    },

    // --- integration ---
    EventRecordedByIntegration {
        handler: HandlerRef,
        envelope: Envelope,
        event_envelope: Envelope,
    },
    MessageLoggedByIntegration {
        handler: HandlerRef,
        envelope: Envelope,
        message: String,
    },

    // --- projection ---
    ProjectionCompactionBegun {
        handler: HandlerRef,
    },
    ProjectionCompactionCompleted {
        handler: HandlerRef,
        error: Option<SharedError>,
    },
    /// `envelope` is `None` for lines logged during compaction.
    MessageLoggedByProjection {
        handler: HandlerRef,
        envelope: Option<Envelope>,
        message: String,
    },
}

impl Fact {
    /// Variant name, e.g. `"HandlingBegun"`.
    pub fn name(&self) -> &'static str {
        match self {
            Fact::DispatchCycleBegun { .. } => "DispatchCycleBegun",
            Fact::DispatchCycleCompleted { .. } => "DispatchCycleCompleted",
            Fact::DispatchCycleSkipped { .. } => "DispatchCycleSkipped",
            Fact::DispatchBegun { .. } => "DispatchBegun",
            Fact::DispatchCompleted { .. } => "DispatchCompleted",
            Fact::HandlingBegun { .. } => "HandlingBegun",
            Fact::HandlingCompleted { .. } => "HandlingCompleted",
            Fact::HandlingSkipped { .. } => "HandlingSkipped",
            Fact::TickCycleBegun { .. } => "TickCycleBegun",
            Fact::TickCycleCompleted { .. } => "TickCycleCompleted",
            Fact::TickBegun { .. } => "TickBegun",
            Fact::TickCompleted { .. } => "TickCompleted",
            Fact::TickSkipped { .. } => "TickSkipped",
            Fact::AggregateInstanceLoaded { .. } => "AggregateInstanceLoaded",
            Fact::AggregateInstanceNotFound { .. } => "AggregateInstanceNotFound",
            Fact::AggregateInstanceCreated { .. } => "AggregateInstanceCreated",
            Fact::AggregateInstanceDestroyed { .. } => "AggregateInstanceDestroyed",
            Fact::AggregateInstanceDestructionReverted { .. } => {
                "AggregateInstanceDestructionReverted"
            }
            Fact::EventRecordedByAggregate { .. } => "EventRecordedByAggregate",
            Fact::MessageLoggedByAggregate { .. } => "MessageLoggedByAggregate",
            Fact::ProcessInstanceLoaded { .. } => "ProcessInstanceLoaded",
            Fact::ProcessEventIgnored { .. } => "ProcessEventIgnored",
            Fact::ProcessEventRoutedToEndedInstance { .. } => "ProcessEventRoutedToEndedInstance",
            Fact::ProcessTimeoutRoutedToEndedInstance { .. } => {
                "ProcessTimeoutRoutedToEndedInstance"
            }
            Fact::ProcessInstanceNotFound { .. } => "ProcessInstanceNotFound",
            Fact::ProcessInstanceBegun { .. } => "ProcessInstanceBegun",
            Fact::ProcessInstanceEnded { .. } => "ProcessInstanceEnded",
            Fact::ProcessInstanceEndingReverted { .. } => "ProcessInstanceEndingReverted",
            Fact::CommandExecutedByProcess { .. } => "CommandExecutedByProcess",
            Fact::TimeoutScheduledByProcess { .. } => "TimeoutScheduledByProcess",
            Fact::MessageLoggedByProcess { .. } => "MessageLoggedByProcess",
            Fact::EventRecordedByIntegration { .. } => "EventRecordedByIntegration",
            Fact::MessageLoggedByIntegration { .. } => "MessageLoggedByIntegration",
            Fact::ProjectionCompactionBegun { .. } => "ProjectionCompactionBegun",
            Fact::ProjectionCompactionCompleted { .. } => "ProjectionCompactionCompleted",
            Fact::MessageLoggedByProjection { .. } => "MessageLoggedByProjection",
        }
    }

    /// The handler this fact concerns, if any.
    pub fn handler(&self) -> Option<&HandlerRef> {
        match self {
            Fact::DispatchCycleBegun { .. }
            | Fact::DispatchCycleCompleted { .. }
            | Fact::DispatchCycleSkipped { .. }
            | Fact::DispatchBegun { .. }
            | Fact::DispatchCompleted { .. }
            | Fact::TickCycleBegun { .. }
            | Fact::TickCycleCompleted { .. } => None,
            Fact::HandlingBegun { handler, .. }
            | Fact::HandlingCompleted { handler, .. }
            | Fact::HandlingSkipped { handler, .. }
            | Fact::TickBegun { handler }
            | Fact::TickCompleted { handler, .. }
            | Fact::TickSkipped { handler, .. }
            | Fact::AggregateInstanceLoaded { handler, .. }
            | Fact::AggregateInstanceNotFound { handler, .. }
            | Fact::AggregateInstanceCreated { handler, .. }
            | Fact::AggregateInstanceDestroyed { handler, .. }
            | Fact::AggregateInstanceDestructionReverted { handler, .. }
            | Fact::EventRecordedByAggregate { handler, .. }
            | Fact::MessageLoggedByAggregate { handler, .. }
            | Fact::ProcessInstanceLoaded { handler, .. }
            | Fact::ProcessEventIgnored { handler, .. }
            | Fact::ProcessEventRoutedToEndedInstance { handler, .. }
            | Fact::ProcessTimeoutRoutedToEndedInstance { handler, .. }
            | Fact::ProcessInstanceNotFound { handler, .. }
            | Fact::ProcessInstanceBegun { handler, .. }
            | Fact::ProcessInstanceEnded { handler, .. }
            | Fact::ProcessInstanceEndingReverted { handler, .. }
            | Fact::CommandExecutedByProcess { handler, .. }
            | Fact::TimeoutScheduledByProcess { handler, .. }
            | Fact::MessageLoggedByProcess { handler, .. }
            | Fact::EventRecordedByIntegration { handler, .. }
            | Fact::MessageLoggedByIntegration { handler, .. }
            | Fact::ProjectionCompactionBegun { handler }
            | Fact::ProjectionCompactionCompleted { handler, .. }
            | Fact::MessageLoggedByProjection { handler, .. } => Some(handler),
        }
    }

    /// The message a handler produced, for facts that record production.
    pub fn produced(&self) -> Option<&Envelope> {
        match self {
            Fact::EventRecordedByAggregate { event_envelope, .. }
            | Fact::EventRecordedByIntegration { event_envelope, .. } => Some(event_envelope),
            Fact::CommandExecutedByProcess {
                command_envelope, ..
            } => Some(command_envelope),
            Fact::TimeoutScheduledByProcess {
                timeout_envelope, ..
            } => Some(timeout_envelope),
            _ => None,
        }
    }

    /// The text of a log fact.
    pub fn log_message(&self) -> Option<&str> {
        match self {
            Fact::MessageLoggedByAggregate { message, .. }
            | Fact::MessageLoggedByProcess { message, .. }
            | Fact::MessageLoggedByIntegration { message, .. }
            | Fact::MessageLoggedByProjection { message, .. } => Some(message),
            _ => None,
        }
    }
}

fn write_error(f: &mut fmt::Formatter<'_>, error: &Option<SharedError>) -> fmt::Result {
    match error {
        Some(err) => write!(f, ": {err}"),
        None => Ok(()),
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fact::DispatchCycleBegun { envelope, .. } => {
                write!(f, "dispatch cycle begun for {envelope}")
            }
            Fact::DispatchCycleCompleted { envelope, error } => {
                write!(f, "dispatch cycle completed for {envelope}")?;
                write_error(f, error)
            }
            Fact::DispatchCycleSkipped { message_type, .. } => {
                write!(f, "dispatch cycle skipped, {message_type} is not routed")
            }
            Fact::DispatchBegun { envelope } => write!(f, "dispatching {envelope}"),
            Fact::DispatchCompleted { envelope } => write!(f, "dispatched {envelope}"),
            Fact::HandlingBegun { handler, envelope } => {
                write!(f, "{handler} handling {envelope}")
            }
            Fact::HandlingCompleted {
                handler,
                envelope,
                error,
            } => {
                write!(f, "{handler} handled {envelope}")?;
                write_error(f, error)
            }
            Fact::HandlingSkipped {
                handler,
                envelope,
                reason,
            } => write!(f, "{handler} skipped {envelope}: {reason}"),
            Fact::TickCycleBegun { engine_time, .. } => {
                write!(f, "tick cycle begun at {}", engine_time.to_rfc3339())
            }
            Fact::TickCycleCompleted { error } => {
                f.write_str("tick cycle completed")?;
                write_error(f, error)
            }
            Fact::TickBegun { handler } => write!(f, "{handler} tick begun"),
            Fact::TickCompleted { handler, error } => {
                write!(f, "{handler} tick completed")?;
                write_error(f, error)
            }
            Fact::TickSkipped { handler, reason } => {
                write!(f, "{handler} tick skipped: {reason}")
            }
            Fact::AggregateInstanceLoaded {
                handler,
                instance_id,
                ..
            } => write!(f, "{handler} loaded instance {instance_id}"),
            Fact::AggregateInstanceNotFound {
                handler,
                instance_id,
                ..
            } => write!(f, "{handler} has no instance {instance_id}"),
            Fact::AggregateInstanceCreated {
                handler,
                instance_id,
                ..
            } => write!(f, "{handler} created instance {instance_id}"),
            Fact::AggregateInstanceDestroyed {
                handler,
                instance_id,
                ..
            } => write!(f, "{handler} destroyed instance {instance_id}"),
            Fact::AggregateInstanceDestructionReverted {
                handler,
                instance_id,
                ..
            } => write!(f, "{handler} reverted destruction of instance {instance_id}"),
            Fact::EventRecordedByAggregate {
                handler,
                instance_id,
                event_envelope,
                ..
            } => write!(f, "{handler} instance {instance_id} recorded {event_envelope}"),
            Fact::MessageLoggedByAggregate {
                handler,
                instance_id,
                message,
                ..
            } => write!(f, "{handler} instance {instance_id}: {message}"),
            Fact::ProcessInstanceLoaded {
                handler,
                instance_id,
                ..
            } => write!(f, "{handler} loaded instance {instance_id}"),
            Fact::ProcessEventIgnored { handler, envelope } => {
                write!(f, "{handler} ignored {envelope}")
            }
            Fact::ProcessEventRoutedToEndedInstance {
                handler,
                instance_id,
                envelope,
            } => write!(f, "{handler} routed {envelope} to ended instance {instance_id}"),
            Fact::ProcessTimeoutRoutedToEndedInstance {
                handler,
                instance_id,
                envelope,
            } => write!(f, "{handler} routed {envelope} to ended instance {instance_id}"),
            Fact::ProcessInstanceNotFound {
                handler,
                instance_id,
                ..
            } => write!(f, "{handler} has no instance {instance_id}"),
            Fact::ProcessInstanceBegun {
                handler,
                instance_id,
                ..
            } => write!(f, "{handler} began instance {instance_id}"),
            Fact::ProcessInstanceEnded {
                handler,
                instance_id,
                ..
            } => write!(f, "{handler} ended instance {instance_id}"),
            Fact::ProcessInstanceEndingReverted {
                handler,
                instance_id,
                ..
            } => write!(f, "{handler} reverted ending of instance {instance_id}"),
            Fact::CommandExecutedByProcess {
                handler,
                instance_id,
                command_envelope,
                ..
            } => write!(f, "{handler} instance {instance_id} executed {command_envelope}"),
            Fact::TimeoutScheduledByProcess {
                handler,
                instance_id,
                timeout_envelope,
                ..
            } => {
                write!(f, "{handler} instance {instance_id} scheduled {timeout_envelope}")?;
                if let Some(at) = timeout_envelope.scheduled_for {
                    write!(f, " for {}", at.to_rfc3339())?;
                }
                Ok(())
            }
            Fact::MessageLoggedByProcess {
                handler,
                instance_id,
                message,
                ..
            } => write!(f, "{handler} instance {instance_id}: {message}"),
            Fact::EventRecordedByIntegration {
                handler,
                event_envelope,
                ..
            } => write!(f, "{handler} recorded {event_envelope}"),
            Fact::MessageLoggedByIntegration {
                handler, message, ..
            } => write!(f, "{handler}: {message}"),
            Fact::ProjectionCompactionBegun { handler } => {
                write!(f, "{handler} compaction begun")
            }
            Fact::ProjectionCompactionCompleted { handler, error } => {
                write!(f, "{handler} compaction completed")?;
                write_error(f, error)
            }
            Fact::MessageLoggedByProjection {
                handler, message, ..
            } => write!(f, "{handler}: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageId;
    use crate::handler::Identity;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping;
    impl Message for Ping {}

    fn handler() -> HandlerRef {
        HandlerRef::new(Identity::new("pinger", "k"), HandlerKind::Integration)
    }

    #[test]
    fn test_name_and_handler() {
        let env = Envelope::new_command(MessageId::new(1), Arc::new(Ping), Utc::now());
        let fact = Fact::HandlingBegun {
            handler: handler(),
            envelope: env.clone(),
        };
        assert_eq!(fact.name(), "HandlingBegun");
        assert_eq!(fact.handler(), Some(&handler()));
        assert!(Fact::DispatchBegun { envelope: env }.handler().is_none());
    }

    #[test]
    fn test_display_includes_error() {
        let fact = Fact::TickCompleted {
            handler: handler(),
            error: Some(Arc::from(Box::<dyn std::error::Error + Send + Sync>::from(
                "boom",
            ))),
        };
        assert_eq!(fact.to_string(), "'pinger' integration tick completed: boom");
    }

    #[test]
    fn test_kind_enabled_defaults_to_true() {
        let mut enabled = EnabledHandlers::default();
        assert!(enabled.kind_enabled(HandlerKind::Projection));
        enabled.kinds.insert(HandlerKind::Projection, false);
        assert!(!enabled.kind_enabled(HandlerKind::Projection));
    }
}
