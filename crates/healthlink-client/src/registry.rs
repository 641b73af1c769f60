//! Event registry and dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use healthlink_core::Envelope;
use parking_lot::RwLock;

use crate::capability::{CapabilityProvider, Outcome};
use crate::connection::Connection;
use crate::link::Link;
use crate::session::SessionGuard;

/// Everything a handler gets for one inbound envelope.
pub struct EventContext {
    /// The decoded envelope.
    pub envelope: Envelope,
    /// Connection the envelope arrived on.
    pub connection: Arc<Connection>,
    /// Capability provider, `None` when the agent was started without one.
    pub provider: Option<Arc<dyn CapabilityProvider>>,
    /// Start/stop coordination for stateful capabilities.
    pub sessions: Arc<SessionGuard>,
    link: Link,
}

impl EventContext {
    pub(crate) fn new(
        envelope: Envelope,
        connection: Arc<Connection>,
        provider: Option<Arc<dyn CapabilityProvider>>,
        sessions: Arc<SessionGuard>,
        link: Link,
    ) -> Self {
        Self {
            envelope,
            connection,
            provider,
            sessions,
            link,
        }
    }

    /// Send a reply on the current connection.
    pub fn reply(&self, envelope: &Envelope) -> bool {
        self.link.send(envelope)
    }

    /// The current-connection handle.
    pub fn link(&self) -> &Link {
        &self.link
    }
}

/// Something that handles an event.
///
/// Implemented for any `Fn(EventContext) -> impl Future<Output = Outcome>`,
/// so plain async closures can be registered.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: EventContext) -> BoxFuture<'static, Outcome>;
}

impl<F, Fut> Handler for F
where
    F: Fn(EventContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    fn call(&self, ctx: EventContext) -> BoxFuture<'static, Outcome> {
        self(ctx).boxed()
    }
}

/// Event name to handler mapping.
#[derive(Default)]
pub struct EventRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`. Last registration wins.
    pub fn register<H: Handler>(&mut self, name: impl Into<String>, handler: H) {
        let _ = self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Look up the handler for `ctx.envelope` and run it.
///
/// Unknown names are warned about and otherwise ignored; `None` is returned.
pub(crate) async fn dispatch(registry: &RwLock<EventRegistry>, ctx: EventContext) -> Option<Outcome> {
    let name = ctx.envelope.name.clone();
    let handler = registry.read().get(&name);
    let Some(handler) = handler else {
        tracing::warn!(
            event = %name,
            "Event {} not handled! You can use add_event() to attach an action to a specific event.",
            name
        );
        return None;
    };
    let outcome = handler.call(ctx).await;
    tracing::debug!(event = %name, code = outcome.code(), "Event handled");
    Some(outcome)
}
