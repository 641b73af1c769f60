//! Built-in command handlers.

use healthlink_core::{CaptureKind, SessionKind};
use serde_json::json;

use crate::capability::Outcome;
use crate::error::CapabilityError;
use crate::registry::{EventContext, EventRegistry};

/// Register the session start/stop pairs and the one-shot captures.
pub fn register_builtin(registry: &mut EventRegistry) {
    for kind in SessionKind::ALL {
        registry.register(kind.start_event(), move |ctx: EventContext| async move {
            ctx.sessions.start(kind, ctx.envelope).await
        });
        registry.register(kind.stop_event(), move |ctx: EventContext| async move {
            ctx.sessions.stop(kind, ctx.envelope).await
        });
    }
    for kind in CaptureKind::ALL {
        registry.register(kind.as_str(), move |ctx: EventContext| capture(ctx, kind));
    }
}

/// Run a one-shot capture and reply with its result.
pub async fn capture(ctx: EventContext, kind: CaptureKind) -> Outcome {
    let Some(provider) = ctx.provider.clone() else {
        tracing::warn!(%kind, "No capability provider configured, can't capture {}", kind);
        return Outcome::Failed;
    };

    let (data, outcome) = match provider.capture(kind).await {
        Ok(value) => (value.clone(), Outcome::Captured(value)),
        Err(CapabilityError::Unsupported) => {
            tracing::warn!(%kind, "{} is not supported by this host", kind);
            (json!({ "response": "not supported" }), Outcome::Failed)
        }
        Err(e) => {
            tracing::warn!(%kind, "Failed to capture {}: {}", kind, e);
            (json!({ "error": e.to_string() }), Outcome::Failed)
        }
    };

    let reply = ctx.envelope.clone().with_data(data);
    let _ = ctx.reply(&reply);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::capability::{Capabilities, CapabilityProvider};
    use crate::connection::Connection;
    use crate::link::Link;
    use crate::session::SessionGuard;
    use async_trait::async_trait;
    use healthlink_core::{Envelope, Handshake, InstanceId, codec};
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_util::sync::CancellationToken;

    struct ReportOnly;

    #[async_trait]
    impl CapabilityProvider for ReportOnly {
        async fn start(&self, _kind: SessionKind) -> Result<(), CapabilityError> {
            Err(CapabilityError::Unsupported)
        }
        async fn stop(&self, _kind: SessionKind) -> Result<Value, CapabilityError> {
            Err(CapabilityError::Unsupported)
        }
        async fn capture(&self, kind: CaptureKind) -> Result<Value, CapabilityError> {
            match kind {
                CaptureKind::DiagnosisReport => Ok(json!({ "response": "ok" })),
                CaptureKind::HeapSnapshot => Err(CapabilityError::Failed("out of memory".into())),
                _ => Err(CapabilityError::Unsupported),
            }
        }
    }

    fn context(
        name: &str,
        provider: Option<Arc<dyn CapabilityProvider>>,
    ) -> (EventContext, mpsc::UnboundedReceiver<Message>) {
        let (connection, mut rx) = Connection::new(
            1,
            InstanceId::new("host", "1"),
            "ws://localhost:0".into(),
            CancellationToken::new(),
        );
        assert!(connection.open(Handshake::new("test", InstanceId::new("host", "1"))));
        let _handshake = rx.try_recv().unwrap();
        let link = Link::new();
        let _ = link.replace(connection.clone());
        let sessions = Arc::new(SessionGuard::new(
            Capabilities::new(provider.clone()),
            link.clone(),
        ));
        let ctx = EventContext::new(Envelope::new(name), connection, provider, sessions, link);
        (ctx, rx)
    }

    fn reply(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<Envelope> {
        match rx.try_recv().ok()? {
            Message::Text(text) => Some(codec::decode(text.as_str())),
            _ => None,
        }
    }

    #[test]
    fn registers_every_builtin() {
        let mut registry = EventRegistry::new();
        register_builtin(&mut registry);
        for name in [
            "cpu_profiling_start",
            "cpu_profiling_stop",
            "heap_sampling_start",
            "heap_sampling_stop",
            "coverage_start",
            "coverage_stop",
            "heap_snapshot",
            "diagnosis_report",
            "memory_cpu_usage",
            "dependencies",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert_eq!(registry.len(), 10);
    }

    #[tokio::test]
    async fn capture_replies_with_result() {
        let (ctx, mut rx) = context("diagnosis_report", Some(Arc::new(ReportOnly)));
        let outcome = capture(ctx, CaptureKind::DiagnosisReport).await;
        assert_eq!(outcome, Outcome::Captured(json!({ "response": "ok" })));

        let reply = reply(&mut rx).unwrap();
        assert_eq!(reply.name, "diagnosis_report");
        assert_eq!(reply.data, Some(json!({ "response": "ok" })));
    }

    #[tokio::test]
    async fn unsupported_capture_answers_not_supported() {
        let (ctx, mut rx) = context("memory_cpu_usage", Some(Arc::new(ReportOnly)));
        let outcome = capture(ctx, CaptureKind::MemoryCpuUsage).await;
        assert_eq!(outcome.code(), 1);
        let reply = reply(&mut rx).unwrap();
        assert_eq!(reply.data, Some(json!({ "response": "not supported" })));
    }

    #[tokio::test]
    async fn failed_capture_reports_error() {
        let (ctx, mut rx) = context("heap_snapshot", Some(Arc::new(ReportOnly)));
        assert_eq!(capture(ctx, CaptureKind::HeapSnapshot).await, Outcome::Failed);
        let reply = reply(&mut rx).unwrap();
        assert_eq!(reply.data, Some(json!({ "error": "out of memory" })));
    }

    #[tokio::test]
    async fn capture_without_provider_is_silent() {
        let (ctx, mut rx) = context("diagnosis_report", None);
        assert_eq!(capture(ctx, CaptureKind::DiagnosisReport).await, Outcome::Failed);
        assert!(reply(&mut rx).is_none());
    }
}
