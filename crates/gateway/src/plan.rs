//! Connection planning
//!
//! Turns configuration into an ordered, deduplicated list of ports to try.
//!
//! ```text
//! explicit port ─┐
//! gateway port  ─┤  (4002 paper / 4001 live)
//! tws port      ─┼──► dedupe (first wins) ──► ConnectionPlan.candidates
//! bridge port   ─┘  (4003)
//! ```

use crate::config::{GatewayConfigFile, TradingMode};
use crate::handshake::HandshakeTimeouts;

pub const GATEWAY_PAPER_PORT: u16 = 4002;
pub const GATEWAY_LIVE_PORT: u16 = 4001;
pub const TWS_PAPER_PORT: u16 = 7497;
pub const TWS_LIVE_PORT: u16 = 7496;
pub const BRIDGE_PORT: u16 = 4003;

const FALLBACK_HOST: &str = "127.0.0.1";

/// Everything a connection sweep needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPlan {
    pub host: String,
    /// Ports in priority order, never empty, no duplicates
    pub candidates: Vec<u16>,
    pub base_client_id: i32,
    pub timeouts: HandshakeTimeouts,
}

/// Builds a [`ConnectionPlan`] from configuration
pub struct PortCandidateResolver<'a> {
    config: &'a GatewayConfigFile,
}

impl<'a> PortCandidateResolver<'a> {
    pub fn new(config: &'a GatewayConfigFile) -> Self {
        Self { config }
    }

    /// Default ports for a trading mode: gateway first, then TWS
    pub fn default_ports(mode: TradingMode) -> [u16; 2] {
        match mode {
            TradingMode::Paper => [GATEWAY_PAPER_PORT, TWS_PAPER_PORT],
            TradingMode::Live => [GATEWAY_LIVE_PORT, TWS_LIVE_PORT],
        }
    }

    pub fn resolve(&self) -> ConnectionPlan {
        let conn = &self.config.connection;

        let mut ordered: Vec<u16> = Vec::new();
        ordered.extend(conn.port);
        if conn.candidate_ports.is_empty() {
            ordered.extend(Self::default_ports(conn.trading_mode));
        } else {
            ordered.extend(conn.candidate_ports.iter().copied());
        }
        ordered.extend(conn.bridge_port);

        let mut candidates = dedupe(ordered);
        if candidates.is_empty() {
            // Only reachable when every configured port was 0
            candidates = dedupe(Self::default_ports(conn.trading_mode).to_vec());
        }

        let host = match conn.host.trim() {
            "" => FALLBACK_HOST.to_string(),
            host => host.to_string(),
        };

        ConnectionPlan {
            host,
            candidates,
            base_client_id: conn.client_id,
            timeouts: self.config.handshake.to_timeouts(),
        }
    }
}

fn dedupe(ports: Vec<u16>) -> Vec<u16> {
    let mut seen = Vec::with_capacity(ports.len());
    for port in ports {
        if port != 0 && !seen.contains(&port) {
            seen.push(port);
        }
    }
    seen
}
