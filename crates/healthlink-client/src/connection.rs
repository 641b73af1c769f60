//! A single transport instance and the task that drives it.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use healthlink_core::{EventAnnouncement, Envelope, Handshake, InstanceId, Phase, codec};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::agent::Shared;
use crate::error::ConnectError;
use crate::heartbeat::Heartbeat;
use crate::pending::PendingRegistrations;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended.
    Clean,
    /// No keep-alive within the heartbeat delay.
    HeartbeatTimeout,
    /// The collector refused the TCP connection.
    Refused,
    /// Transport or handshake failure.
    Error(String),
    /// Terminated locally (destroy, or superseded).
    Terminated,
}

impl CloseReason {
    /// Phase the connection lands in.
    pub fn phase(&self) -> Phase {
        match self {
            CloseReason::Clean | CloseReason::Terminated => Phase::ClosedClean,
            CloseReason::HeartbeatTimeout | CloseReason::Refused | CloseReason::Error(_) => {
                Phase::ClosedError
            }
        }
    }
}

/// What happened to an event registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
    /// Queued for the handshake.
    Buffered,
    /// Announced on the open link.
    Announced,
    /// The connection is closed; nothing was sent.
    Dropped,
}

struct State {
    phase: Phase,
    pending: PendingRegistrations,
}

/// One transport instance.
///
/// Created by the manager on start and on every reconnect. Outbound frames
/// are queued through an unbounded channel drained by the driver task, so
/// sending never blocks and the handshake is always first.
pub struct Connection {
    attempt: u64,
    instance: InstanceId,
    endpoint: String,
    state: Mutex<State>,
    outbound: mpsc::UnboundedSender<Message>,
    terminate: CancellationToken,
}

impl Connection {
    pub(crate) fn new(
        attempt: u64,
        instance: InstanceId,
        endpoint: String,
        terminate: CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let connection = Self {
            attempt,
            instance,
            endpoint,
            state: Mutex::new(State {
                phase: Phase::Connecting,
                pending: PendingRegistrations::new(),
            }),
            outbound,
            terminate,
        };
        (Arc::new(connection), rx)
    }

    /// Sequence number of this attempt, starting at 1.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Identity presented by this attempt.
    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Remote address.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn is_open(&self) -> bool {
        self.phase() == Phase::Open
    }

    /// Queue an envelope. Returns `false` unless the connection is open.
    pub fn send(&self, envelope: &Envelope) -> bool {
        let state = self.state.lock();
        if state.phase != Phase::Open {
            return false;
        }
        self.push(envelope)
    }

    /// Hard-terminate the transport. The driver observes this as a close.
    pub fn terminate(&self) {
        self.terminate.cancel();
    }

    pub(crate) async fn terminated(&self) {
        self.terminate.cancelled().await;
    }

    /// Register `name` with the collector: buffered while connecting,
    /// announced immediately once open.
    pub(crate) fn announce(&self, name: &str) -> Registration {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Connecting => {
                let _ = state.pending.push(name);
                Registration::Buffered
            }
            Phase::Open => {
                let _ = self.push(&EventAnnouncement::new(name).into_envelope());
                Registration::Announced
            }
            _ => Registration::Dropped,
        }
    }

    /// Move to `Open`, folding buffered registrations into the handshake and
    /// queueing it as the first outbound message.
    pub(crate) fn open(&self, handshake: Handshake) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Connecting || self.terminate.is_cancelled() {
            return false;
        }
        let events = state.pending.flush();
        state.phase = Phase::Open;
        self.push(&handshake.with_events(events).into_envelope())
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        let mut state = self.state.lock();
        if state.phase != Phase::Destroyed {
            state.phase = phase;
        }
    }

    fn push(&self, envelope: &Envelope) -> bool {
        match codec::encode(envelope) {
            Ok(text) => self.outbound.send(Message::Text(text.into())).is_ok(),
            Err(e) => {
                tracing::warn!(event = %envelope.name, "Dropping outbound envelope: {}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("attempt", &self.attempt)
            .field("instance", &self.instance)
            .field("endpoint", &self.endpoint)
            .field("phase", &self.phase())
            .finish()
    }
}

fn build_request(endpoint: &str, token: Option<&str>) -> Result<Request, ConnectError> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| ConnectError::Request(e.to_string()))?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(token).map_err(|e| ConnectError::Request(e.to_string()))?;
        let _ = request.headers_mut().insert("token", value);
    }
    Ok(request)
}

/// Drive `connection` from connect to close.
///
/// Returns once the transport is gone. Both halves of the socket are dropped
/// without a close handshake.
pub(crate) async fn drive(
    shared: Arc<Shared>,
    connection: Arc<Connection>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) -> CloseReason {
    let attempt = connection.attempt();
    let request = match build_request(connection.endpoint(), shared.config.token.as_deref()) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(attempt, "Can't connect to collector: {}", e);
            return CloseReason::Error(e.to_string());
        }
    };

    let ws = tokio::select! {
        () = connection.terminated() => return CloseReason::Terminated,
        result = tokio_tungstenite::connect_async(request) => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                let reason = match ConnectError::from(e) {
                    ConnectError::Refused => CloseReason::Refused,
                    other => CloseReason::Error(other.to_string()),
                };
                tracing::warn!(attempt, endpoint = %connection.endpoint(), ?reason, "Connection to collector failed");
                return reason;
            }
        },
    };
    let (mut sink, mut stream) = ws.split();

    if !connection.open(shared.handshake(connection.instance().clone())) {
        return CloseReason::Terminated;
    }
    tracing::info!(attempt, endpoint = %connection.endpoint(), "Connected to collector");
    shared.emit(crate::Lifecycle::Open { attempt });

    // The open event itself is the initial grace period.
    let mut heartbeat = Heartbeat::arm(shared.config.heartbeat_delay);

    // The loop below never awaits the sink; writes run in their own task.
    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            sink.send(message).await?;
        }
        Ok::<(), tungstenite::Error>(())
    });

    let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
    shared.spawn_dispatcher(dispatch_loop(
        Arc::clone(&shared),
        Arc::clone(&connection),
        dispatch_rx,
    ));

    let reason = loop {
        let deadline = heartbeat.deadline();
        tokio::select! {
            biased;
            () = connection.terminated() => break CloseReason::Terminated,
            () = time::sleep_until(deadline) => {
                tracing::warn!(attempt, "No heartbeat from collector, terminating connection");
                break CloseReason::HeartbeatTimeout;
            }
            written = &mut writer => {
                let reason = match written {
                    Ok(Ok(())) => CloseReason::Clean,
                    Ok(Err(e)) => CloseReason::Error(e.to_string()),
                    Err(e) => CloseReason::Error(e.to_string()),
                };
                tracing::warn!(attempt, ?reason, "Writing to collector failed");
                break reason;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = dispatch_tx.send(codec::decode(text.as_str()));
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        let _ = dispatch_tx.send(codec::decode(text));
                    }
                    Err(_) => tracing::warn!(attempt, "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(_))) => heartbeat.rearm(),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(attempt, ?frame, "Collector closed the connection");
                    break CloseReason::Clean;
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::warn!(attempt, "Connection error: {}", e);
                    break CloseReason::Error(e.to_string());
                }
                None => break CloseReason::Clean,
            },
        }
    };

    connection.set_phase(reason.phase());
    writer.abort();
    drop(dispatch_tx);
    drop(stream);
    reason
}

/// Dispatch inbound envelopes one at a time, in arrival order.
async fn dispatch_loop(
    shared: Arc<Shared>,
    connection: Arc<Connection>,
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = inbound.recv().await {
        if !connection.is_open() {
            tracing::debug!(event = %envelope.name, "Skipping event received on a closed connection");
            continue;
        }
        let _ = shared.dispatch(envelope, &connection).await;
    }
}
