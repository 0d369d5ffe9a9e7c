//! Transport abstraction layer
//!
//! A [`Transport`] owns one gateway connection at a time. `connect` hands
//! back the receiving end of a typed event channel fed by the transport's
//! own read task; requests go out through `send`.
//!
//! ```text
//!            send(ApiRequest)                 TCP
//!  caller ───────────────────► writer task ─────────► gateway
//!  caller ◄─────────────────── reader task ◄───────── gateway
//!         mpsc<TransportEvent>
//! ```

pub mod messages;
pub mod tws;
pub mod wire;

pub use messages::{ApiRequest, codes};
pub use tws::TwsTransport;

use async_trait::async_trait;
use depthgate_core::{DepthUpdate, TickByTick};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Everything the gateway can tell a connected client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Server accepted the connection and announced its version
    SocketOpened {
        server_version: i32,
        connection_time: String,
    },
    /// API ready signal: the next order id
    NextValidId(i64),
    /// API ready signal: accounts visible to this login
    ManagedAccounts(Vec<String>),
    /// Error or notice; `req_id` is -1 for connection-wide messages
    Error {
        req_id: i64,
        code: i32,
        message: String,
    },
    MarketDepth {
        req_id: i64,
        update: DepthUpdate,
    },
    TickByTick {
        req_id: i64,
        tick: TickByTick,
    },
    /// Connection ended; no further events follow
    Disconnected { reason: String },
}

/// Connection to a TWS-compatible gateway
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection, replacing any previous one
    async fn connect(
        &self,
        host: &str,
        port: u16,
        client_id: i32,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Queue a request; fails before the server version is known
    async fn send(&self, request: ApiRequest) -> Result<(), TransportError>;

    /// Close the current connection, if any
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}
