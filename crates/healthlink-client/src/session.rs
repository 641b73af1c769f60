//! Start/stop coordination for stateful capabilities.
//!
//! One guard serves every [`SessionKind`]. Each kind is either idle, running
//! (with exactly one armed auto-stop timer) or stopping. The auto-stop timer
//! and a manual stop go through the same stop sequence; whichever claims the
//! running state first performs it, the other sees "not running".

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use healthlink_core::{Envelope, SessionKind};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::capability::{Capabilities, CapabilityProvider, Outcome};
use crate::link::Link;

/// Duration used when a start command carries none, or an invalid one.
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_millis(10_000);

enum SessionState {
    Running {
        generation: u64,
        timer: CancellationToken,
    },
    Stopping,
}

/// Shared start/stop state for all session kinds.
pub struct SessionGuard {
    capabilities: Capabilities,
    link: Link,
    sessions: Mutex<HashMap<SessionKind, SessionState>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
    timers: Mutex<JoinSet<()>>,
}

impl SessionGuard {
    pub fn new(capabilities: Capabilities, link: Link) -> Self {
        Self {
            capabilities,
            link,
            sessions: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            timers: Mutex::new(JoinSet::new()),
        }
    }

    pub fn is_running(&self, kind: SessionKind) -> bool {
        matches!(
            self.sessions.lock().get(&kind),
            Some(SessionState::Running { .. })
        )
    }

    /// Start a session and arm its auto-stop timer.
    ///
    /// A start while the kind is already running is rejected; the running
    /// session and its timer are left alone.
    pub async fn start(self: &Arc<Self>, kind: SessionKind, envelope: Envelope) -> Outcome {
        let Some(provider) = self.capabilities.get() else {
            tracing::warn!(%kind, "No capability provider configured, can't start {}", kind);
            return Outcome::Failed;
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let timer = self.shutdown.child_token();
        {
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(&kind) {
                tracing::warn!(%kind, "{} is already running", kind);
                return Outcome::Failed;
            }
            let _ = sessions.insert(
                kind,
                SessionState::Running {
                    generation,
                    timer: timer.clone(),
                },
            );
        }

        if let Err(e) = provider.start(kind).await {
            tracing::warn!(%kind, "Failed to start {}: {}", kind, e);
            self.clear(kind, generation);
            return Outcome::Failed;
        }

        let duration = session_duration(&envelope);
        tracing::debug!(%kind, duration_ms = duration.as_millis(), "Session started");

        let guard = Arc::clone(self);
        {
            let mut timers = self.timers.lock();
            while timers.try_join_next().is_some() {}
            let _ = timers.spawn(async move {
                tokio::select! {
                    () = timer.cancelled() => {}
                    () = time::sleep(duration) => {
                        let _ = guard.auto_stop(kind, generation, envelope).await;
                    }
                }
            });
        }
        Outcome::Ok
    }

    /// Stop a running session and reply with its result.
    ///
    /// Returns the captured result, or [`Outcome::Failed`] when no provider is
    /// configured, nothing is running, or the provider fails.
    pub async fn stop(&self, kind: SessionKind, envelope: Envelope) -> Outcome {
        let Some(provider) = self.capabilities.get() else {
            tracing::warn!(%kind, "No capability provider configured, can't stop {}", kind);
            return Outcome::Failed;
        };

        let timer = {
            let mut sessions = self.sessions.lock();
            let timer = match sessions.get(&kind) {
                Some(SessionState::Running { timer, .. }) => timer.clone(),
                _ => {
                    tracing::warn!(%kind, "No {} is running", kind);
                    return Outcome::Failed;
                }
            };
            let _ = sessions.insert(kind, SessionState::Stopping);
            timer
        };
        timer.cancel();

        self.finish(kind, provider, envelope).await
    }

    /// Cancel every armed auto-stop timer and forget all sessions.
    ///
    /// An auto-stop that already fired is aborted, but not waited for; use
    /// [`shutdown`](Self::shutdown) for that.
    pub fn cancel_timers(&self) {
        self.shutdown.cancel();
        self.timers.lock().abort_all();
        self.sessions.lock().clear();
    }

    /// Cancel every timer and wait until no auto-stop is still running.
    pub async fn shutdown(&self) {
        self.cancel_timers();
        let mut timers = std::mem::take(&mut *self.timers.lock());
        while timers.join_next().await.is_some() {}
    }

    async fn auto_stop(&self, kind: SessionKind, generation: u64, envelope: Envelope) -> Outcome {
        {
            let mut sessions = self.sessions.lock();
            let current = matches!(
                sessions.get(&kind),
                Some(SessionState::Running { generation: g, .. }) if *g == generation
            );
            if !current {
                return Outcome::Failed;
            }
            let _ = sessions.insert(kind, SessionState::Stopping);
        }

        let Some(provider) = self.capabilities.get() else {
            let _ = self.sessions.lock().remove(&kind);
            tracing::warn!(%kind, "Capability provider released, dropping {} session", kind);
            return Outcome::Failed;
        };

        tracing::debug!(%kind, "Session duration elapsed, stopping");
        self.finish(kind, provider, envelope).await
    }

    async fn finish(
        &self,
        kind: SessionKind,
        provider: Arc<dyn CapabilityProvider>,
        mut envelope: Envelope,
    ) -> Outcome {
        let result = provider.stop(kind).await;
        let _ = self.sessions.lock().remove(&kind);

        let outcome = match result {
            Ok(value) => {
                envelope.data = Some(value.clone());
                Outcome::Captured(value)
            }
            Err(e) => {
                tracing::warn!(%kind, "Failed to stop {}: {}", kind, e);
                envelope.data = Some(json!({ "error": e.to_string() }));
                Outcome::Failed
            }
        };
        if !self.link.send(&envelope) {
            tracing::debug!(%kind, "No open connection, {} result not delivered", kind);
        }
        outcome
    }

    fn clear(&self, kind: SessionKind, generation: u64) {
        let mut sessions = self.sessions.lock();
        let current = matches!(
            sessions.get(&kind),
            Some(SessionState::Running { generation: g, .. }) if *g == generation
        );
        if current {
            let _ = sessions.remove(&kind);
        }
    }
}

/// Read `config.duration` (milliseconds, positive integer) from a start command.
pub fn session_duration(envelope: &Envelope) -> Duration {
    envelope
        .config_value("duration")
        .and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
        .map_or(DEFAULT_SESSION_DURATION, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::error::CapabilityError;
    use async_trait::async_trait;
    use healthlink_core::{CaptureKind, Handshake, InstanceId, codec};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    #[derive(Default)]
    struct CountingProvider {
        starts: AtomicUsize,
        stops: AtomicUsize,
        finished: AtomicUsize,
        fail_stop: bool,
        stop_delay: Duration,
    }

    #[async_trait]
    impl CapabilityProvider for CountingProvider {
        async fn start(&self, _kind: SessionKind) -> Result<(), CapabilityError> {
            let _ = self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self, kind: SessionKind) -> Result<Value, CapabilityError> {
            let n = self.stops.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.stop_delay.is_zero() {
                time::sleep(self.stop_delay).await;
            }
            let _ = self.finished.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                return Err(CapabilityError::Failed("profiler crashed".into()));
            }
            Ok(json!({ "kind": kind, "stop": n }))
        }

        async fn capture(&self, _kind: CaptureKind) -> Result<Value, CapabilityError> {
            Err(CapabilityError::Unsupported)
        }
    }

    struct Fixture {
        guard: Arc<SessionGuard>,
        provider: Arc<CountingProvider>,
        replies: mpsc::UnboundedReceiver<Message>,
    }

    fn fixture_with(provider: CountingProvider) -> Fixture {
        let provider = Arc::new(provider);
        let link = Link::new();
        let (connection, mut replies) = Connection::new(
            1,
            InstanceId::new("host", "1"),
            "ws://localhost:0".into(),
            CancellationToken::new(),
        );
        assert!(connection.open(Handshake::new("test", InstanceId::new("host", "1"))));
        let _handshake = replies.try_recv().unwrap();
        let _ = link.replace(connection);

        let caps = Capabilities::new(Some(provider.clone() as Arc<dyn CapabilityProvider>));
        Fixture {
            guard: Arc::new(SessionGuard::new(caps, link)),
            provider,
            replies,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(CountingProvider::default())
    }

    fn start_envelope(duration: u64) -> Envelope {
        Envelope::new("cpu_profiling_start").with_config(json!({ "duration": duration }))
    }

    fn next_reply(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<Envelope> {
        match rx.try_recv().ok()? {
            Message::Text(text) => Some(codec::decode(text.as_str())),
            _ => None,
        }
    }

    fn stops(f: &Fixture) -> usize {
        f.provider.stops.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_before_timeout_stops_once() {
        let mut f = fixture();
        let kind = SessionKind::CpuProfiling;

        assert_eq!(f.guard.start(kind, start_envelope(200)).await, Outcome::Ok);
        time::sleep(Duration::from_millis(100)).await;

        let outcome = f.guard.stop(kind, Envelope::new("cpu_profiling_stop")).await;
        assert!(matches!(outcome, Outcome::Captured(_)));
        assert_eq!(stops(&f), 1);

        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(stops(&f), 1);

        let reply = next_reply(&mut f.replies).unwrap();
        assert_eq!(reply.name, "cpu_profiling_stop");
        assert_eq!(reply.data.unwrap()["stop"], 1);
        assert!(next_reply(&mut f.replies).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_stop_fires_once_with_start_envelope() {
        let mut f = fixture();
        let kind = SessionKind::CpuProfiling;

        assert_eq!(f.guard.start(kind, start_envelope(200)).await, Outcome::Ok);
        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(stops(&f), 0);
        assert!(f.guard.is_running(kind));

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stops(&f), 1);
        assert!(!f.guard.is_running(kind));

        let reply = next_reply(&mut f.replies).unwrap();
        assert_eq!(reply.name, "cpu_profiling_start");
        assert_eq!(reply.config, Some(json!({ "duration": 200 })));
        assert!(reply.data.is_some());

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(stops(&f), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn default_duration_applies_to_invalid_values() {
        let f = fixture();
        let kind = SessionKind::HeapSampling;
        let env = Envelope::new("heap_sampling_start").with_config(json!({ "duration": -5 }));

        assert_eq!(f.guard.start(kind, env).await, Outcome::Ok);
        time::sleep(DEFAULT_SESSION_DURATION - Duration::from_millis(1)).await;
        assert_eq!(stops(&f), 0);
        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(stops(&f), 1);
    }

    #[tokio::test]
    async fn stop_without_start_fails_without_provider_call() {
        let mut f = fixture();
        let outcome = f
            .guard
            .stop(SessionKind::Coverage, Envelope::new("coverage_stop"))
            .await;
        assert_eq!(outcome.code(), 1);
        assert_eq!(stops(&f), 0);
        assert!(next_reply(&mut f.replies).is_none());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let f = fixture();
        let kind = SessionKind::CpuProfiling;
        assert_eq!(f.guard.start(kind, start_envelope(200)).await, Outcome::Ok);
        assert_eq!(f.guard.start(kind, start_envelope(200)).await, Outcome::Failed);
        assert_eq!(f.provider.starts.load(Ordering::SeqCst), 1);
        assert!(f.guard.is_running(kind));
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_are_independent() {
        let f = fixture();
        assert_eq!(
            f.guard.start(SessionKind::CpuProfiling, start_envelope(1_000)).await,
            Outcome::Ok
        );
        assert_eq!(
            f.guard.start(SessionKind::Coverage, start_envelope(1_000)).await,
            Outcome::Ok
        );
        let _ = f
            .guard
            .stop(SessionKind::Coverage, Envelope::new("coverage_stop"))
            .await;
        assert!(f.guard.is_running(SessionKind::CpuProfiling));
        assert!(!f.guard.is_running(SessionKind::Coverage));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_timers_prevents_auto_stop() {
        let f = fixture();
        assert_eq!(
            f.guard.start(SessionKind::CpuProfiling, start_envelope(200)).await,
            Outcome::Ok
        );
        f.guard.cancel_timers();
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(stops(&f), 0);
        assert!(!f.guard.is_running(SessionKind::CpuProfiling));
    }

    #[tokio::test]
    async fn no_provider_degrades_to_failure() {
        let guard = Arc::new(SessionGuard::new(Capabilities::default(), Link::new()));
        let kind = SessionKind::CpuProfiling;
        assert_eq!(guard.start(kind, start_envelope(200)).await, Outcome::Failed);
        assert_eq!(guard.stop(kind, Envelope::new("cpu_profiling_stop")).await, Outcome::Failed);
        assert!(!guard.is_running(kind));
    }

    #[tokio::test]
    async fn provider_stop_error_is_reported() {
        let mut f = fixture_with(CountingProvider {
            fail_stop: true,
            ..CountingProvider::default()
        });
        let kind = SessionKind::CpuProfiling;
        let _ = f.guard.start(kind, start_envelope(1_000)).await;
        let outcome = f.guard.stop(kind, Envelope::new("cpu_profiling_stop")).await;
        assert_eq!(outcome, Outcome::Failed);
        assert!(!f.guard.is_running(kind));

        let reply = next_reply(&mut f.replies).unwrap();
        assert_eq!(reply.data, Some(json!({ "error": "profiler crashed" })));
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(session_duration(&start_envelope(200)), Duration::from_millis(200));
        assert_eq!(session_duration(&Envelope::new("x")), DEFAULT_SESSION_DURATION);
        let zero = Envelope::new("x").with_config(json!({ "duration": 0 }));
        assert_eq!(session_duration(&zero), DEFAULT_SESSION_DURATION);
        let text = Envelope::new("x").with_config(json!({ "duration": "200" }));
        assert_eq!(session_duration(&text), DEFAULT_SESSION_DURATION);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_running_auto_stop() {
        let mut f = fixture_with(CountingProvider {
            stop_delay: Duration::from_millis(500),
            ..CountingProvider::default()
        });
        let kind = SessionKind::CpuProfiling;
        assert_eq!(f.guard.start(kind, start_envelope(200)).await, Outcome::Ok);

        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(stops(&f), 1);

        f.guard.shutdown().await;
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.provider.finished.load(Ordering::SeqCst), 0);
        assert!(!f.guard.is_running(kind));
        assert!(next_reply(&mut f.replies).is_none());
    }
}
