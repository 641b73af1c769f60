//! Connection manager.
//!
//! The agent owns exactly one current [`Connection`] at a time. A supervisor
//! task drives it to completion, then waits `auto_reconnect_delay` and
//! installs a fresh one, forever, until [`Agent::destroy`] is called.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use healthlink_core::{Envelope, Handshake, InstanceId, Phase};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::capability::{Capabilities, CapabilityProvider, Outcome};
use crate::config::AgentConfig;
use crate::connection::{self, CloseReason, Connection, Registration};
use crate::error::ConfigError;
use crate::handlers;
use crate::link::Link;
use crate::registry::{self, EventContext, EventRegistry, Handler};
use crate::session::SessionGuard;

/// State-machine transitions, published to [`Agent::lifecycle`] subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// A new connection attempt was created.
    Connecting { attempt: u64, instance: InstanceId },
    /// The handshake was sent.
    Open { attempt: u64 },
    /// The attempt ended.
    Closed { attempt: u64, reason: CloseReason },
    /// The next attempt is scheduled after `delay`.
    Reconnecting { attempt: u64, delay: Duration },
    /// The agent was destroyed. Nothing follows.
    Destroyed,
}

/// State shared between the handle, the supervisor and connection drivers.
pub(crate) struct Shared {
    pub(crate) config: AgentConfig,
    registry: RwLock<EventRegistry>,
    capabilities: Capabilities,
    sessions: Arc<SessionGuard>,
    link: Link,
    destroyed: CancellationToken,
    attempts: AtomicU64,
    lifecycle: broadcast::Sender<Lifecycle>,
    dispatchers: Mutex<JoinSet<()>>,
}

impl Shared {
    pub(crate) fn handshake(&self, instance: InstanceId) -> Handshake {
        Handshake::new(self.config.app_name.clone(), instance)
            .with_env(self.config.environment.clone())
    }

    pub(crate) fn emit(&self, event: Lifecycle) {
        let _ = self.lifecycle.send(event);
    }

    pub(crate) async fn dispatch(
        &self,
        envelope: Envelope,
        connection: &Arc<Connection>,
    ) -> Option<Outcome> {
        let ctx = EventContext::new(
            envelope,
            Arc::clone(connection),
            self.capabilities.get(),
            Arc::clone(&self.sessions),
            self.link.clone(),
        );
        registry::dispatch(&self.registry, ctx).await
    }

    /// Run a connection's dispatcher as a task the agent can abort on destroy.
    pub(crate) fn spawn_dispatcher<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut dispatchers = self.dispatchers.lock();
        while dispatchers.try_join_next().is_some() {}
        let _ = dispatchers.spawn(task);
    }

    /// Abort every dispatcher, including handlers still in flight, and wait
    /// for them to unwind.
    async fn stop_dispatchers(&self) {
        let mut dispatchers = std::mem::take(&mut *self.dispatchers.lock());
        dispatchers.abort_all();
        while dispatchers.join_next().await.is_some() {}
    }

    /// Create the next connection and make it current.
    ///
    /// Returns `None` if the agent was destroyed in the meantime.
    fn install_connection(&self) -> Option<(Arc<Connection>, mpsc::UnboundedReceiver<Message>)> {
        if self.destroyed.is_cancelled() {
            return None;
        }
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let instance = InstanceId::generate();
        let endpoint = self.config.endpoint(&instance);
        let (connection, outbound) = Connection::new(
            attempt,
            instance.clone(),
            endpoint,
            self.destroyed.child_token(),
        );

        if let Some(previous) = self.link.replace(Arc::clone(&connection)) {
            previous.terminate();
        }
        if self.destroyed.is_cancelled() {
            connection.set_phase(Phase::Destroyed);
            connection.terminate();
            return None;
        }

        tracing::debug!(attempt, %instance, "Connecting to collector");
        self.emit(Lifecycle::Connecting { attempt, instance });
        Some((connection, outbound))
    }
}

/// Handle to a running agent.
///
/// Dropping the handle cancels the agent without waiting for teardown; call
/// [`destroy`](Self::destroy) to release the provider and await shutdown.
pub struct Agent {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    /// Validate `config` and start connecting.
    ///
    /// The first connection is created before this returns, so events added
    /// right away are listed in its handshake. Outside a Tokio runtime this
    /// fails with [`ConfigError::NoRuntime`].
    pub fn start(
        config: AgentConfig,
        provider: Option<Arc<dyn CapabilityProvider>>,
    ) -> Result<Self, ConfigError> {
        if let Err(e) = config.validate() {
            tracing::error!("{}", e);
            return Err(e);
        }
        let Ok(runtime) = Handle::try_current() else {
            let e = ConfigError::NoRuntime;
            tracing::error!("{}", e);
            return Err(e);
        };

        let capabilities = Capabilities::new(provider);
        let link = Link::new();
        let sessions = Arc::new(SessionGuard::new(capabilities.clone(), link.clone()));
        let mut registry = EventRegistry::new();
        handlers::register_builtin(&mut registry);
        let (lifecycle, _) = broadcast::channel(64);

        let shared = Arc::new(Shared {
            config,
            registry: RwLock::new(registry),
            capabilities,
            sessions,
            link,
            destroyed: CancellationToken::new(),
            attempts: AtomicU64::new(0),
            lifecycle,
            dispatchers: Mutex::new(JoinSet::new()),
        });

        let supervisor = shared
            .install_connection()
            .map(|(connection, outbound)| {
                runtime.spawn(supervise(Arc::clone(&shared), connection, outbound))
            });

        Ok(Self {
            shared,
            supervisor: Mutex::new(supervisor),
        })
    }

    /// Register `handler` for `name`, replacing any previous handler.
    ///
    /// The collector learns about the event through the next handshake when
    /// the current connection is still connecting, or through an immediate
    /// `addEvent` notice when it is open.
    pub fn add_event<H: Handler>(&self, name: impl Into<String>, handler: H) {
        let name = name.into();
        self.shared.registry.write().register(name.clone(), handler);

        let registration = self
            .shared
            .link
            .current()
            .map(|connection| connection.announce(&name));
        match registration {
            Some(Registration::Buffered) => {
                tracing::debug!(event = %name, "Event queued for handshake");
            }
            Some(Registration::Announced) => {
                tracing::debug!(event = %name, "Event announced to collector");
            }
            Some(Registration::Dropped) | None => {
                tracing::debug!(event = %name, "Event registered while disconnected");
            }
        }
    }

    /// Current connection, for callers that need to send directly.
    pub fn transport(&self) -> Option<Arc<Connection>> {
        self.shared.link.current()
    }

    /// Phase of the current connection.
    pub fn phase(&self) -> Phase {
        if self.shared.destroyed.is_cancelled() {
            return Phase::Destroyed;
        }
        self.shared
            .link
            .current()
            .map_or(Phase::Connecting, |connection| connection.phase())
    }

    /// Subscribe to lifecycle transitions.
    pub fn lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
        self.shared.lifecycle.subscribe()
    }

    /// Session coordination shared by the built-in handlers.
    pub fn sessions(&self) -> &Arc<SessionGuard> {
        &self.shared.sessions
    }

    pub fn config(&self) -> &AgentConfig {
        &self.shared.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.is_cancelled()
    }

    /// Stop reconnecting, terminate the transport and release the provider.
    ///
    /// In-flight handlers and session timers are stopped before the provider
    /// is released, so nothing calls into it afterwards. Safe to call in any
    /// phase and more than once.
    pub async fn destroy(&self) {
        let first = !self.shared.destroyed.is_cancelled();
        self.shared.destroyed.cancel();
        if let Some(connection) = self.shared.link.current() {
            connection.set_phase(Phase::Destroyed);
            connection.terminate();
        }

        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                tracing::warn!("Agent supervisor ended abnormally: {}", e);
            }
        }
        self.shared.stop_dispatchers().await;
        self.shared.sessions.shutdown().await;

        if let Some(provider) = self.shared.capabilities.take() {
            provider.release().await;
        }

        if first {
            tracing::info!(app = %self.shared.config.app_name, "Health agent destroyed");
            self.shared.emit(Lifecycle::Destroyed);
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shared.destroyed.cancel();
        self.shared.dispatchers.lock().abort_all();
        self.shared.sessions.cancel_timers();
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("app_name", &self.shared.config.app_name)
            .field("phase", &self.phase())
            .field("events", &self.shared.registry.read().names())
            .field("link", &self.shared.link)
            .finish()
    }
}

/// Drive connections one after another until destroyed.
async fn supervise(
    shared: Arc<Shared>,
    mut connection: Arc<Connection>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let attempt = connection.attempt();
        let reason = connection::drive(Arc::clone(&shared), Arc::clone(&connection), outbound).await;
        tracing::debug!(attempt, ?reason, "Connection closed");
        shared.emit(Lifecycle::Closed { attempt, reason });

        if shared.destroyed.is_cancelled() {
            connection.set_phase(Phase::Destroyed);
            break;
        }

        let delay = shared.config.auto_reconnect_delay;
        connection.set_phase(Phase::Reconnecting);
        tracing::debug!(attempt, delay_ms = delay.as_millis(), "Reconnecting to collector");
        shared.emit(Lifecycle::Reconnecting { attempt, delay });

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shared.destroyed.cancelled() => break,
        }

        match shared.install_connection() {
            Some((next, next_outbound)) => {
                connection = next;
                outbound = next_outbound;
            }
            None => break,
        }
    }
}
