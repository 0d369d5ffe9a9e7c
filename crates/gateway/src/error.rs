//! Error types for the gateway crate

use thiserror::Error;

/// Transport-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Server version {0} is not supported")]
    UnsupportedServerVersion(i32),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Frame of {0} bytes exceeds the maximum message size")]
    FrameTooLarge(usize),

    #[error("Not connected")]
    NotConnected,

    #[error("Channel closed")]
    ChannelClosed,
}

impl TransportError {
    /// Whether resending the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Send(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Connection(e.to_string())
    }
}

/// Outcome of a failed handshake against one candidate port
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Transport error on port {port}: {source}")]
    Transport {
        port: u16,
        #[source]
        source: TransportError,
    },

    #[error("No socket acknowledgement on port {port} within {timeout_ms}ms")]
    SocketOpenTimeout { port: u16, timeout_ms: u64 },

    #[error("Gateway on port {port} closed the connection: {reason}")]
    Disconnected { port: u16, reason: String },

    #[error("API never became ready on port {port} (client ids tried: {client_ids:?})")]
    ApiNotReady { port: u16, client_ids: Vec<i32> },
}

impl HandshakeError {
    pub fn port(&self) -> u16 {
        match self {
            HandshakeError::Transport { port, .. }
            | HandshakeError::SocketOpenTimeout { port, .. }
            | HandshakeError::Disconnected { port, .. }
            | HandshakeError::ApiNotReady { port, .. } => *port,
        }
    }
}

/// Connection-level errors (all candidates)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Gateway unreachable at {host} (ports tried: {candidates:?})")]
    Unreachable {
        host: String,
        candidates: Vec<u16>,
        failures: Vec<HandshakeError>,
    },

    #[error("Connection plan has no candidate ports")]
    EmptyPlan,
}

/// Errors launching the gateway process
#[derive(Error, Debug)]
pub enum AutostartError {
    #[error("Failed to launch gateway start command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Gateway start command is empty")]
    EmptyCommand,
}
