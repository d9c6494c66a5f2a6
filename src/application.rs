//! Application configuration.
//!
//! An [`Application`] is the set of handlers under test, in registration
//! order. Each handler declares its identity and routes through a
//! kind-specific configurer, which only offers the routes that kind may
//! declare.

use std::fmt;
use std::sync::Arc;

use crate::engine::{
    AggregateController, Controller, IntegrationController, ProcessController,
    ProjectionController,
};
use crate::handler::{
    AggregateMessageHandler, HandlerKind, HandlerRef, Identity, IntegrationMessageHandler,
    ProcessMessageHandler, ProjectionMessageHandler,
};
use crate::message::{Message, MessageKind, MessageType};
use crate::router::{Direction, Route};

type ControllerFactory = Arc<dyn Fn(&HandlerRef) -> Box<dyn Controller> + Send + Sync>;

/// Configuration of one handler.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub handler: HandlerRef,
    /// Type name of the handler implementation.
    pub implementation: &'static str,
    pub routes: Vec<Route>,
    /// Set when the handler disabled itself during configuration.
    pub disabled: bool,
}

#[derive(Clone)]
pub(crate) struct RegisteredHandler {
    pub config: HandlerConfig,
    pub factory: ControllerFactory,
}

/// The handlers under test.
#[derive(Clone)]
pub struct Application {
    identity: Identity,
    handlers: Vec<RegisteredHandler>,
}

impl Application {
    pub fn builder(name: impl Into<String>, key: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder {
            app: Application {
                identity: Identity::new(name, key),
                handlers: Vec::new(),
            },
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Handler configurations in registration order.
    pub fn handlers(&self) -> impl Iterator<Item = &HandlerConfig> {
        self.handlers.iter().map(|h| &h.config)
    }

    pub(crate) fn registered(&self) -> &[RegisteredHandler] {
        &self.handlers
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("identity", &self.identity)
            .field("handlers", &self.handlers().collect::<Vec<_>>())
            .finish()
    }
}

/// Registers handlers with an [`Application`].
pub struct ApplicationBuilder {
    app: Application,
}

impl ApplicationBuilder {
    fn register(
        mut self,
        kind: HandlerKind,
        implementation: &'static str,
        routes: RouteSet,
        factory: ControllerFactory,
    ) -> Self {
        let identity = routes
            .identity
            .unwrap_or_else(|| Identity::new(String::new(), String::new()));
        self.app.handlers.push(RegisteredHandler {
            config: HandlerConfig {
                handler: HandlerRef::new(identity, kind),
                implementation,
                routes: routes.routes,
                disabled: routes.disabled,
            },
            factory,
        });
        self
    }

    pub fn aggregate<H: AggregateMessageHandler>(self, handler: H) -> Self {
        let mut c = AggregateConfigurer::default();
        handler.configure(&mut c);
        let handler = Arc::new(handler);
        self.register(
            HandlerKind::Aggregate,
            std::any::type_name::<H>(),
            c.inner,
            Arc::new(move |h: &HandlerRef| -> Box<dyn Controller> {
                Box::new(AggregateController::new(h.clone(), handler.clone()))
            }),
        )
    }

    pub fn process<H: ProcessMessageHandler>(self, handler: H) -> Self {
        let mut c = ProcessConfigurer::default();
        handler.configure(&mut c);
        let handler = Arc::new(handler);
        self.register(
            HandlerKind::Process,
            std::any::type_name::<H>(),
            c.inner,
            Arc::new(move |h: &HandlerRef| -> Box<dyn Controller> {
                Box::new(ProcessController::new(h.clone(), handler.clone()))
            }),
        )
    }

    pub fn integration<H: IntegrationMessageHandler>(self, handler: H) -> Self {
        let mut c = IntegrationConfigurer::default();
        handler.configure(&mut c);
        let handler = Arc::new(handler);
        self.register(
            HandlerKind::Integration,
            std::any::type_name::<H>(),
            c.inner,
            Arc::new(move |h: &HandlerRef| -> Box<dyn Controller> {
                Box::new(IntegrationController::new(h.clone(), handler.clone()))
            }),
        )
    }

    pub fn projection<H: ProjectionMessageHandler>(self, handler: H) -> Self {
        let mut c = ProjectionConfigurer::default();
        handler.configure(&mut c);
        let handler = Arc::new(handler);
        self.register(
            HandlerKind::Projection,
            std::any::type_name::<H>(),
            c.inner,
            Arc::new(move |h: &HandlerRef| -> Box<dyn Controller> {
                Box::new(ProjectionController::new(h.clone(), handler.clone()))
            }),
        )
    }

    pub fn build(self) -> Application {
        self.app
    }
}

#[derive(Debug, Default)]
struct RouteSet {
    identity: Option<Identity>,
    routes: Vec<Route>,
    disabled: bool,
}

impl RouteSet {
    fn add<T: Message>(&mut self, kind: MessageKind, direction: Direction) {
        let route = Route {
            message_type: MessageType::of::<T>(),
            kind,
            direction,
        };
        if !self.routes.contains(&route) {
            self.routes.push(route);
        }
    }
}

/// Configures an [`AggregateMessageHandler`].
#[derive(Debug, Default)]
pub struct AggregateConfigurer {
    inner: RouteSet,
}

impl AggregateConfigurer {
    pub fn identity(&mut self, name: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.inner.identity = Some(Identity::new(name, key));
        self
    }

    pub fn handles_command<T: Message>(&mut self) -> &mut Self {
        self.inner.add::<T>(MessageKind::Command, Direction::Inbound);
        self
    }

    pub fn records_event<T: Message>(&mut self) -> &mut Self {
        self.inner.add::<T>(MessageKind::Event, Direction::Outbound);
        self
    }

    /// Exclude the handler from dispatch.
    pub fn disable(&mut self) -> &mut Self {
        self.inner.disabled = true;
        self
    }
}

/// Configures a [`ProcessMessageHandler`].
#[derive(Debug, Default)]
pub struct ProcessConfigurer {
    inner: RouteSet,
}

impl ProcessConfigurer {
    pub fn identity(&mut self, name: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.inner.identity = Some(Identity::new(name, key));
        self
    }

    pub fn handles_event<T: Message>(&mut self) -> &mut Self {
        self.inner.add::<T>(MessageKind::Event, Direction::Inbound);
        self
    }

    pub fn executes_command<T: Message>(&mut self) -> &mut Self {
        self.inner.add::<T>(MessageKind::Command, Direction::Outbound);
        self
    }

    /// A timeout type the process both schedules and handles.
    pub fn schedules_timeout<T: Message>(&mut self) -> &mut Self {
        self.inner.add::<T>(MessageKind::Timeout, Direction::Both);
        self
    }

    pub fn disable(&mut self) -> &mut Self {
        self.inner.disabled = true;
        self
    }
}

/// Configures an [`IntegrationMessageHandler`].
#[derive(Debug, Default)]
pub struct IntegrationConfigurer {
    inner: RouteSet,
}

impl IntegrationConfigurer {
    pub fn identity(&mut self, name: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.inner.identity = Some(Identity::new(name, key));
        self
    }

    pub fn handles_command<T: Message>(&mut self) -> &mut Self {
        self.inner.add::<T>(MessageKind::Command, Direction::Inbound);
        self
    }

    pub fn records_event<T: Message>(&mut self) -> &mut Self {
        self.inner.add::<T>(MessageKind::Event, Direction::Outbound);
        self
    }

    pub fn disable(&mut self) -> &mut Self {
        self.inner.disabled = true;
        self
    }
}

/// Configures a [`ProjectionMessageHandler`].
#[derive(Debug, Default)]
pub struct ProjectionConfigurer {
    inner: RouteSet,
}

impl ProjectionConfigurer {
    pub fn identity(&mut self, name: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.inner.identity = Some(Identity::new(name, key));
        self
    }

    pub fn handles_event<T: Message>(&mut self) -> &mut Self {
        self.inner.add::<T>(MessageKind::Event, Direction::Inbound);
        self
    }

    pub fn disable(&mut self) -> &mut Self {
        self.inner.disabled = true;
        self
    }
}
