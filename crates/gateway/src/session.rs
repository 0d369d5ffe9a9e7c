//! Public connection entry point
//!
//! ```text
//! sweep(candidates) ──ok──► ReadySession
//!        │ all failed
//!        ▼
//! autostart (once, errors ignored) ──► sweep(candidates) ──ok──► ReadySession
//!                                             │ all failed
//!                                             ▼
//!                                    SessionError::Unreachable
//! ```

use std::sync::Arc;

use tracing::{info, warn};

use crate::autostart::Autostart;
use crate::error::{HandshakeError, SessionError};
use crate::handshake::{HandshakeCoordinator, ReadySession};
use crate::plan::ConnectionPlan;
use crate::transport::Transport;

/// Connects to the first candidate that completes the handshake
pub struct GatewaySession {
    transport: Arc<dyn Transport>,
    autostart: Option<Arc<dyn Autostart>>,
}

impl GatewaySession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        GatewaySession {
            transport,
            autostart: None,
        }
    }

    pub fn with_autostart(mut self, autostart: Arc<dyn Autostart>) -> Self {
        self.autostart = Some(autostart);
        self
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub async fn connect(&self, plan: &ConnectionPlan) -> Result<ReadySession, SessionError> {
        if plan.candidates.is_empty() {
            return Err(SessionError::EmptyPlan);
        }
        info!(
            event = "ib_connect_plan",
            host = %plan.host,
            candidates = ?plan.candidates,
            client_id = plan.base_client_id,
            "Connecting to gateway"
        );

        let mut failures = match self.sweep(plan).await {
            Ok(ready) => return Ok(ready),
            Err(failures) => failures,
        };

        if let Some(autostart) = &self.autostart {
            warn!(
                event = "gateway_autostart_attempt",
                host = %plan.host,
                "No candidate answered, launching gateway"
            );
            if let Err(e) = autostart.start().await {
                warn!(error = %e, "Gateway autostart failed");
            }
            match self.sweep(plan).await {
                Ok(ready) => return Ok(ready),
                Err(retry_failures) => failures = retry_failures,
            }
        }

        warn!(
            event = "ib_unreachable",
            host = %plan.host,
            candidates = ?plan.candidates,
            "Gateway unreachable"
        );
        Err(SessionError::Unreachable {
            host: plan.host.clone(),
            candidates: plan.candidates.clone(),
            failures,
        })
    }

    async fn sweep(&self, plan: &ConnectionPlan) -> Result<ReadySession, Vec<HandshakeError>> {
        let mut failures = Vec::with_capacity(plan.candidates.len());
        for &port in &plan.candidates {
            let mut coordinator = HandshakeCoordinator::new(self.transport.clone(), plan.timeouts);
            match coordinator.run(&plan.host, port, plan.base_client_id).await {
                Ok(ready) => {
                    info!(
                        event = "ib_connected",
                        host = %plan.host,
                        port = ready.port,
                        client_id = ready.client_id,
                        server_version = ready.server_version,
                        "Gateway ready"
                    );
                    return Ok(ready);
                }
                Err(e) => {
                    warn!(host = %plan.host, port, error = %e, "Candidate failed");
                    failures.push(e);
                }
            }
        }
        Err(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutostartError;
    use crate::handshake::HandshakeTimeouts;
    use crate::handshake::tests::{Behaviour, FakeTransport};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn plan(candidates: &[u16]) -> ConnectionPlan {
        ConnectionPlan {
            host: "127.0.0.1".into(),
            candidates: candidates.to_vec(),
            base_client_id: 1001,
            timeouts: HandshakeTimeouts::default(),
        }
    }

    /// Records how many connects happened before it ran
    struct RecordingAutostart {
        transport: Arc<FakeTransport>,
        calls: Mutex<Vec<usize>>,
        bring_up: Option<u16>,
        fail: bool,
    }

    #[async_trait]
    impl Autostart for RecordingAutostart {
        async fn start(&self) -> Result<(), AutostartError> {
            self.calls.lock().push(self.transport.connect_count());
            if let Some(port) = self.bring_up {
                self.transport.set_client_behaviour(port, 1001, Behaviour::Ready);
            }
            if self.fail {
                return Err(AutostartError::EmptyCommand);
            }
            Ok(())
        }
    }

    fn autostart(
        transport: &Arc<FakeTransport>,
        bring_up: Option<u16>,
        fail: bool,
    ) -> Arc<RecordingAutostart> {
        Arc::new(RecordingAutostart {
            transport: transport.clone(),
            calls: Mutex::new(Vec::new()),
            bring_up,
            fail,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_ready_candidate_wins() {
        let transport = Arc::new(FakeTransport::new(&[(7497, Behaviour::Ready)]));
        let session = GatewaySession::new(transport.clone());

        let ready = session.connect(&plan(&[4002, 7497, 4003])).await.unwrap();

        assert_eq!(ready.port, 7497);
        assert_eq!(
            transport.connects.lock().as_slice(),
            &[(4002, 1001), (7497, 1001)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_candidates_tried_before_autostart_then_error() {
        let transport = Arc::new(FakeTransport::new(&[]));
        let hook = autostart(&transport, None, false);
        let session = GatewaySession::new(transport.clone()).with_autostart(hook.clone());

        let err = session.connect(&plan(&[4002, 7497, 4003])).await.unwrap_err();

        assert_eq!(hook.calls.lock().as_slice(), &[3]);
        assert_eq!(transport.connect_count(), 6);
        match err {
            SessionError::Unreachable {
                host,
                candidates,
                failures,
            } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(candidates, vec![4002, 7497, 4003]);
                assert_eq!(failures.len(), 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resweep_after_autostart_succeeds() {
        let transport = Arc::new(FakeTransport::new(&[]));
        let hook = autostart(&transport, Some(4002), false);
        let session = GatewaySession::new(transport.clone()).with_autostart(hook.clone());

        let ready = session.connect(&plan(&[4002, 7497])).await.unwrap();

        assert_eq!(ready.port, 4002);
        assert_eq!(hook.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autostart_error_swallowed() {
        let transport = Arc::new(FakeTransport::new(&[]));
        let hook = autostart(&transport, Some(7497), true);
        let session = GatewaySession::new(transport.clone()).with_autostart(hook);

        let ready = session.connect(&plan(&[4002, 7497])).await.unwrap();
        assert_eq!(ready.port, 7497);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_autostart_single_sweep() {
        let transport = Arc::new(FakeTransport::new(&[]));
        let session = GatewaySession::new(transport.clone());

        let err = session.connect(&plan(&[4002, 7497])).await.unwrap_err();
        assert!(matches!(err, SessionError::Unreachable { .. }));
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_plan_rejected() {
        let transport = Arc::new(FakeTransport::new(&[]));
        let session = GatewaySession::new(transport);
        assert_eq!(
            session.connect(&plan(&[])).await.unwrap_err(),
            SessionError::EmptyPlan
        );
    }
}
