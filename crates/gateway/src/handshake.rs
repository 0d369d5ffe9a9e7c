//! Connection handshake against one candidate port
//!
//! ```text
//!  Idle ──► Connecting ──► SocketOpen ──► ApiReady
//!               ▲              │
//!               │          (api wait
//!               │           times out)
//!               │              ▼
//!               └──────── WarmupRetry          any step may end in Failed
//!            (client_id + 1)
//! ```
//!
//! A socket that opens but never reports readiness is usually a gateway that
//! is still logging in, or a client id another session holds. One more try
//! with the next client id after a short pause clears both cases.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::config::MAX_WARMUP_RETRIES;
use crate::error::HandshakeError;
use crate::pacing::RetryPolicy;
use crate::transport::{ApiRequest, Transport, TransportEvent, codes};

/// Handshake progress for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Idle,
    Connecting,
    SocketOpen,
    ApiReady,
    WarmupRetry,
    Failed,
}

/// Timeout policy shared by every handshake in a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeouts {
    /// TCP connect plus server hello
    pub socket_open: Duration,
    /// Server hello to first next-id or accounts message
    pub api_ready: Duration,
    /// Pause before reconnecting with the next client id
    pub warmup_pause: Duration,
    /// Pause before resending a failed next-id request
    pub nudge_pause: Duration,
    /// Extra client ids to try on the same port, capped at 2
    pub warmup_retries: u32,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        HandshakeTimeouts {
            socket_open: Duration::from_secs(15),
            api_ready: Duration::from_secs(10),
            warmup_pause: Duration::from_millis(500),
            nudge_pause: Duration::from_millis(50),
            warmup_retries: 1,
        }
    }
}

/// A connection that completed the handshake
#[derive(Debug)]
pub struct ReadySession {
    pub port: u16,
    pub client_id: i32,
    pub server_version: i32,
    pub next_valid_id: Option<i64>,
    pub accounts: Vec<String>,
    /// Remaining events of this connection
    pub events: mpsc::Receiver<TransportEvent>,
}

enum ApiWait {
    Ready {
        next_valid_id: Option<i64>,
        accounts: Vec<String>,
    },
    TimedOut,
    Closed(String),
}

/// Drives one candidate port to `ApiReady` or `Failed`
pub struct HandshakeCoordinator {
    transport: Arc<dyn Transport>,
    timeouts: HandshakeTimeouts,
    state: HandshakeState,
    history: Vec<HandshakeState>,
}

impl HandshakeCoordinator {
    pub fn new(transport: Arc<dyn Transport>, timeouts: HandshakeTimeouts) -> Self {
        HandshakeCoordinator {
            transport,
            timeouts,
            state: HandshakeState::Idle,
            history: vec![HandshakeState::Idle],
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Every state visited by the last run, in order
    pub fn history(&self) -> &[HandshakeState] {
        &self.history
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = ?self.state, to = ?next, "Handshake transition");
        self.state = next;
        self.history.push(next);
    }

    pub async fn run(
        &mut self,
        host: &str,
        port: u16,
        base_client_id: i32,
    ) -> Result<ReadySession, HandshakeError> {
        self.state = HandshakeState::Idle;
        self.history = vec![HandshakeState::Idle];

        let extra_ids = self.timeouts.warmup_retries.min(MAX_WARMUP_RETRIES);
        let mut client_ids = Vec::new();
        let mut client_id = base_client_id;

        for attempt in 0..=extra_ids {
            if attempt > 0 {
                self.transition(HandshakeState::WarmupRetry);
                sleep(self.timeouts.warmup_pause).await;
                client_id = client_id.wrapping_add(1);
                info!(host, port, client_id, "Warm-up retry with next client id");
            }
            client_ids.push(client_id);

            self.transition(HandshakeState::Connecting);
            let (server_version, mut events) = match self.open_socket(host, port, client_id).await {
                Ok(opened) => opened,
                Err(e) => {
                    self.transport.disconnect().await;
                    self.transition(HandshakeState::Failed);
                    return Err(e);
                }
            };
            self.transition(HandshakeState::SocketOpen);

            if let Err(e) = self.start_api(client_id).await {
                self.transport.disconnect().await;
                self.transition(HandshakeState::Failed);
                return Err(HandshakeError::Transport { port, source: e });
            }

            match self.await_api_ready(&mut events).await {
                ApiWait::Ready {
                    next_valid_id,
                    accounts,
                } => {
                    self.transition(HandshakeState::ApiReady);
                    return Ok(ReadySession {
                        port,
                        client_id,
                        server_version,
                        next_valid_id,
                        accounts,
                        events,
                    });
                }
                ApiWait::TimedOut => {
                    warn!(host, port, client_id, "Socket open but API not ready");
                }
                ApiWait::Closed(reason) => {
                    warn!(host, port, client_id, %reason, "Gateway closed before API ready");
                }
            }
            self.transport.disconnect().await;
        }

        self.transition(HandshakeState::Failed);
        Err(HandshakeError::ApiNotReady { port, client_ids })
    }

    async fn open_socket(
        &self,
        host: &str,
        port: u16,
        client_id: i32,
    ) -> Result<(i32, mpsc::Receiver<TransportEvent>), HandshakeError> {
        let deadline = Instant::now() + self.timeouts.socket_open;
        let timed_out = || HandshakeError::SocketOpenTimeout {
            port,
            timeout_ms: self.timeouts.socket_open.as_millis() as u64,
        };

        let mut events = timeout_at(deadline, self.transport.connect(host, port, client_id))
            .await
            .map_err(|_| timed_out())?
            .map_err(|source| HandshakeError::Transport { port, source })?;

        loop {
            match timeout_at(deadline, events.recv()).await {
                Err(_) => return Err(timed_out()),
                Ok(Some(TransportEvent::SocketOpened { server_version, .. })) => {
                    return Ok((server_version, events));
                }
                Ok(Some(TransportEvent::Disconnected { reason })) => {
                    return Err(HandshakeError::Disconnected { port, reason });
                }
                Ok(None) => {
                    return Err(HandshakeError::Disconnected {
                        port,
                        reason: "event channel closed".into(),
                    });
                }
                Ok(Some(other)) => debug!(?other, "Event before socket open"),
            }
        }
    }

    async fn start_api(&self, client_id: i32) -> Result<(), crate::error::TransportError> {
        self.transport.send(ApiRequest::start_api(client_id)).await?;
        // The next id request doubles as a nudge; one resend if it fails
        RetryPolicy::new(1, self.timeouts.nudge_pause)
            .run(|| self.transport.send(ApiRequest::RequestIds), |_| true)
            .await
    }

    async fn await_api_ready(&self, events: &mut mpsc::Receiver<TransportEvent>) -> ApiWait {
        let wait = async {
            loop {
                match events.recv().await {
                    Some(TransportEvent::NextValidId(id)) => {
                        return ApiWait::Ready {
                            next_valid_id: Some(id),
                            accounts: Vec::new(),
                        };
                    }
                    Some(TransportEvent::ManagedAccounts(accounts)) => {
                        return ApiWait::Ready {
                            next_valid_id: None,
                            accounts,
                        };
                    }
                    Some(TransportEvent::Error { code, message, .. }) => {
                        if code == codes::CLIENT_ID_IN_USE {
                            warn!(code, %message, "Client id rejected");
                        } else {
                            debug!(code, %message, "Gateway notice during handshake");
                        }
                    }
                    Some(TransportEvent::Disconnected { reason }) => return ApiWait::Closed(reason),
                    None => return ApiWait::Closed("event channel closed".into()),
                    Some(other) => debug!(?other, "Ignoring event before API ready"),
                }
            }
        };
        timeout(self.timeouts.api_ready, wait)
            .await
            .unwrap_or(ApiWait::TimedOut)
    }
}
