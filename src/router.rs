//! Routing table.
//!
//! Built once per engine from the application's handler configurations.
//! Answers which kind a message type is, which handlers consume it and which
//! produce it. Consumers are returned in registration order.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::application::HandlerConfig;
use crate::handler::{HandlerKind, HandlerRef};
use crate::message::{MessageKind, MessageType};

/// Direction of a route relative to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The handler consumes the type.
    Inbound,
    /// The handler produces the type.
    Outbound,
    /// Timeouts a process schedules for itself.
    Both,
}

impl Direction {
    pub fn is_inbound(&self) -> bool {
        matches!(self, Direction::Inbound | Direction::Both)
    }

    pub fn is_outbound(&self) -> bool {
        matches!(self, Direction::Outbound | Direction::Both)
    }
}

/// A message type a handler consumes or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    pub message_type: MessageType,
    pub kind: MessageKind,
    pub direction: Direction,
}

/// Rejected application configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{implementation} ({kind}) has an empty identity name or key")]
    EmptyIdentity {
        implementation: String,
        kind: HandlerKind,
    },

    #[error("handler name '{0}' is used by more than one handler")]
    DuplicateHandlerName(String),

    #[error("handler key '{key}' of '{name}' is used by more than one handler")]
    DuplicateHandlerKey { name: String, key: String },

    #[error("'{message_type}' is configured as {first} by '{first_handler}' and as {second} by '{second_handler}'")]
    ConflictingKind {
        message_type: String,
        first: MessageKind,
        first_handler: String,
        second: MessageKind,
        second_handler: String,
    },

    #[error("the '{message_type}' command is handled by both '{first}' and '{second}'")]
    ConflictingCommandHandlers {
        message_type: String,
        first: String,
        second: String,
    },

    #[error("the '{handler}' {kind} must {requirement}")]
    MissingRoutes {
        handler: String,
        kind: HandlerKind,
        requirement: &'static str,
    },
}

#[derive(Debug, Clone)]
struct HandlerEntry {
    config: HandlerConfig,
    directions: HashMap<MessageType, Direction>,
}

/// Routing table for one application.
#[derive(Debug, Clone, Default)]
pub struct Router {
    handlers: Vec<HandlerEntry>,
    by_name: HashMap<String, usize>,
    kinds: HashMap<MessageType, MessageKind>,
    consumers: HashMap<MessageType, Vec<usize>>,
    producers: HashMap<MessageType, Vec<usize>>,
}

impl Router {
    /// Build and validate a routing table.
    pub fn new<'a>(
        configs: impl IntoIterator<Item = &'a HandlerConfig>,
    ) -> Result<Self, ConfigurationError> {
        let mut router = Router::default();
        let mut keys: HashMap<String, String> = HashMap::new();
        let mut kind_owner: HashMap<MessageType, String> = HashMap::new();

        for config in configs {
            let handler = &config.handler;
            let identity = &handler.identity;
            if identity.is_empty() {
                return Err(ConfigurationError::EmptyIdentity {
                    implementation: config.implementation.to_string(),
                    kind: handler.kind,
                });
            }
            if router.by_name.contains_key(&identity.name) {
                return Err(ConfigurationError::DuplicateHandlerName(
                    identity.name.clone(),
                ));
            }
            if keys
                .insert(identity.key.clone(), identity.name.clone())
                .is_some()
            {
                return Err(ConfigurationError::DuplicateHandlerKey {
                    name: identity.name.clone(),
                    key: identity.key.clone(),
                });
            }
            check_required_routes(config)?;

            let index = router.handlers.len();
            let mut directions = HashMap::new();

            for route in &config.routes {
                match router.kinds.get(&route.message_type) {
                    Some(existing) if *existing != route.kind => {
                        return Err(ConfigurationError::ConflictingKind {
                            message_type: route.message_type.to_string(),
                            first: *existing,
                            first_handler: kind_owner
                                .get(&route.message_type)
                                .cloned()
                                .unwrap_or_default(),
                            second: route.kind,
                            second_handler: identity.name.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        router.kinds.insert(route.message_type, route.kind);
                        kind_owner.insert(route.message_type, identity.name.clone());
                    }
                }

                if route.direction.is_inbound() && route.kind != MessageKind::Timeout {
                    let consumers = router.consumers.entry(route.message_type).or_default();
                    if route.kind == MessageKind::Command {
                        if let Some(first) = consumers.first() {
                            return Err(ConfigurationError::ConflictingCommandHandlers {
                                message_type: route.message_type.to_string(),
                                first: router.handlers[*first].config.handler.identity.name.clone(),
                                second: identity.name.clone(),
                            });
                        }
                    }
                    consumers.push(index);
                }
                if route.direction.is_outbound() {
                    router
                        .producers
                        .entry(route.message_type)
                        .or_default()
                        .push(index);
                }
                directions.insert(route.message_type, route.direction);
            }

            debug!(
                handler = %identity.name,
                kind = %handler.kind,
                routes = config.routes.len(),
                "Registered handler routes"
            );

            router.by_name.insert(identity.name.clone(), index);
            router.handlers.push(HandlerEntry {
                config: config.clone(),
                directions,
            });
        }

        Ok(router)
    }

    /// The kind a message type is routed as.
    pub fn kind_of(&self, message_type: &MessageType) -> Option<MessageKind> {
        self.kinds.get(message_type).copied()
    }

    /// Handlers that consume the type, in registration order.
    ///
    /// Timeouts are never listed; they go back to the process that
    /// scheduled them.
    pub fn consumers_of(&self, message_type: &MessageType) -> Vec<&HandlerRef> {
        self.indexes_to_refs(self.consumers.get(message_type))
    }

    /// Handlers that produce the type, in registration order.
    pub fn producers_of(&self, message_type: &MessageType) -> Vec<&HandlerRef> {
        self.indexes_to_refs(self.producers.get(message_type))
    }

    fn indexes_to_refs(&self, indexes: Option<&Vec<usize>>) -> Vec<&HandlerRef> {
        indexes
            .map(|idx| {
                idx.iter()
                    .map(|i| &self.handlers[*i].config.handler)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direction of `message_type` for the named handler.
    pub fn direction_of(&self, handler: &str, message_type: &MessageType) -> Option<Direction> {
        let index = self.by_name.get(handler)?;
        self.handlers[*index].directions.get(message_type).copied()
    }

    /// Configuration of the named handler.
    pub fn handler(&self, name: &str) -> Option<&HandlerConfig> {
        self.by_name.get(name).map(|i| &self.handlers[*i].config)
    }

    /// All handler configurations, in registration order.
    pub fn handlers(&self) -> impl Iterator<Item = &HandlerConfig> {
        self.handlers.iter().map(|h| &h.config)
    }

    /// Every routed type of the given kind that some handler produces,
    /// ordered by type name.
    pub fn produced_types(&self, kind: MessageKind) -> BTreeSet<MessageType> {
        self.producers
            .keys()
            .filter(|t| self.kind_of(t) == Some(kind))
            .copied()
            .collect()
    }
}

fn check_required_routes(config: &HandlerConfig) -> Result<(), ConfigurationError> {
    let has = |kind: MessageKind, inbound: bool| {
        config.routes.iter().any(|r| {
            r.kind == kind
                && if inbound {
                    r.direction.is_inbound()
                } else {
                    r.direction.is_outbound()
                }
        })
    };

    let missing = match config.handler.kind {
        HandlerKind::Aggregate if !has(MessageKind::Command, true) => {
            Some("handle at least one command")
        }
        HandlerKind::Aggregate if !has(MessageKind::Event, false) => {
            Some("record at least one event")
        }
        HandlerKind::Process if !has(MessageKind::Event, true) => {
            Some("handle at least one event")
        }
        HandlerKind::Process
            if !has(MessageKind::Command, false) && !has(MessageKind::Timeout, false) =>
        {
            Some("execute at least one command or schedule at least one timeout")
        }
        HandlerKind::Integration if !has(MessageKind::Command, true) => {
            Some("handle at least one command")
        }
        HandlerKind::Projection if !has(MessageKind::Event, true) => {
            Some("handle at least one event")
        }
        _ => None,
    };

    match missing {
        Some(requirement) => Err(ConfigurationError::MissingRoutes {
            handler: config.handler.identity.name.clone(),
            kind: config.handler.kind,
            requirement,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Identity;
    use crate::message::Message;

    #[derive(Debug, Clone, PartialEq)]
    struct Cmd;
    impl Message for Cmd {}

    #[derive(Debug, Clone, PartialEq)]
    struct Evt;
    impl Message for Evt {}

    fn route<T: Message>(kind: MessageKind, direction: Direction) -> Route {
        Route {
            message_type: MessageType::of::<T>(),
            kind,
            direction,
        }
    }

    fn config(name: &str, kind: HandlerKind, routes: Vec<Route>) -> HandlerConfig {
        HandlerConfig {
            handler: HandlerRef::new(Identity::new(name, format!("{name}-key")), kind),
            implementation: "test::Handler",
            routes,
            disabled: false,
        }
    }

    fn aggregate(name: &str) -> HandlerConfig {
        config(
            name,
            HandlerKind::Aggregate,
            vec![
                route::<Cmd>(MessageKind::Command, Direction::Inbound),
                route::<Evt>(MessageKind::Event, Direction::Outbound),
            ],
        )
    }

    fn projection(name: &str) -> HandlerConfig {
        config(
            name,
            HandlerKind::Projection,
            vec![route::<Evt>(MessageKind::Event, Direction::Inbound)],
        )
    }

    #[test]
    fn test_routes_resolve() {
        let configs = [aggregate("agg"), projection("p1"), projection("p2")];
        let router = Router::new(&configs).unwrap();

        assert_eq!(router.kind_of(&MessageType::of::<Cmd>()), Some(MessageKind::Command));
        let consumers: Vec<_> = router
            .consumers_of(&MessageType::of::<Evt>())
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(consumers, vec!["p1", "p2"]);
        assert_eq!(
            router.direction_of("agg", &MessageType::of::<Evt>()),
            Some(Direction::Outbound)
        );
        assert_eq!(router.direction_of("p1", &MessageType::of::<Cmd>()), None);
        assert_eq!(router.producers_of(&MessageType::of::<Evt>()).len(), 1);
    }

    #[test]
    fn test_conflicting_kind_rejected() {
        let bad = config(
            "bad",
            HandlerKind::Projection,
            vec![route::<Cmd>(MessageKind::Event, Direction::Inbound)],
        );
        let err = Router::new(&[aggregate("agg"), bad]).unwrap_err();
        assert!(matches!(err, ConfigurationError::ConflictingKind { .. }));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let err = Router::new(&[projection("p"), projection("p")]).unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateHandlerName("p".into()));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut second = projection("q");
        second.handler.identity.key = "p-key".into();
        let err = Router::new(&[projection("p"), second]).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateHandlerKey { .. }));
    }

    #[test]
    fn test_command_with_two_handlers_rejected() {
        let err = Router::new(&[aggregate("a"), aggregate("b")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::ConflictingCommandHandlers { .. }
        ));
    }

    #[test]
    fn test_empty_identity_rejected() {
        let mut c = projection("p");
        c.handler.identity.key.clear();
        let err = Router::new(&[c]).unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyIdentity { .. }));
    }

    #[test]
    fn test_aggregate_without_events_rejected() {
        let c = config(
            "agg",
            HandlerKind::Aggregate,
            vec![route::<Cmd>(MessageKind::Command, Direction::Inbound)],
        );
        let err = Router::new(&[c]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "the 'agg' aggregate must record at least one event"
        );
    }
}
