use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::messages::{self, ApiRequest, MAX_CLIENT_VERSION, MIN_CLIENT_VERSION};
use super::wire::{self, handshake_preamble};
use super::{Transport, TransportEvent};
use crate::error::TransportError;

const EVENT_BUFFER: usize = 4096;
const OUTBOUND_BUFFER: usize = 256;

/// TCP transport speaking the TWS API wire protocol
///
/// Infrastructure component - one socket, one reader task, one writer task.
pub struct TwsTransport {
    connection: Mutex<Option<Connection>>,
}

struct Connection {
    outbound: mpsc::Sender<Vec<u8>>,
    /// 0 until the server hello has been read
    server_version: Arc<AtomicI32>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn shutdown(self) {
        self.reader.abort();
        // Dropping `outbound` lets the writer flush and close the socket
        drop(self.outbound);
        drop(self.writer);
    }
}

impl Default for TwsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TwsTransport {
    pub fn new() -> Self {
        TwsTransport {
            connection: Mutex::new(None),
        }
    }

    /// Version announced by the server, once known
    pub fn server_version(&self) -> Option<i32> {
        let guard = self.connection.lock();
        let version = guard.as_ref()?.server_version.load(Ordering::Acquire);
        (version > 0).then_some(version)
    }
}

#[async_trait]
impl Transport for TwsTransport {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        client_id: i32,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.disconnect().await;

        debug!(host, port, client_id, "Opening gateway socket");
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(&handshake_preamble(MIN_CLIENT_VERSION, MAX_CLIENT_VERSION))
            .await?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let server_version = Arc::new(AtomicI32::new(0));

        let reader = tokio::spawn(read_loop(read_half, event_tx.clone(), server_version.clone()));
        let writer = tokio::spawn(write_loop(write_half, out_rx, event_tx));

        let previous = self.connection.lock().replace(Connection {
            outbound: out_tx,
            server_version,
            reader,
            writer,
        });
        if let Some(previous) = previous {
            previous.shutdown();
        }
        Ok(event_rx)
    }

    async fn send(&self, request: ApiRequest) -> Result<(), TransportError> {
        let (outbound, version) = {
            let guard = self.connection.lock();
            let conn = guard.as_ref().ok_or(TransportError::NotConnected)?;
            (
                conn.outbound.clone(),
                conn.server_version.load(Ordering::Acquire),
            )
        };
        if version == 0 {
            return Err(TransportError::NotConnected);
        }
        trace!(?request, "Queueing request");
        outbound
            .send(request.encode(version))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn disconnect(&self) {
        let current = self.connection.lock().take();
        if let Some(conn) = current {
            debug!("Closing gateway socket");
            conn.shutdown();
        }
    }

    fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(|c| !c.reader.is_finished())
    }
}

impl Drop for TwsTransport {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().take() {
            conn.shutdown();
        }
    }
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    events: mpsc::Sender<TransportEvent>,
    server_version: Arc<AtomicI32>,
) {
    let reason = match read_messages(&mut read_half, &events, &server_version).await {
        Ok(()) => "connection closed by gateway".to_string(),
        Err(e) => e.to_string(),
    };
    debug!(%reason, "Gateway reader stopped");
    let _ = events.send(TransportEvent::Disconnected { reason }).await;
}

async fn read_messages(
    read_half: &mut OwnedReadHalf,
    events: &mpsc::Sender<TransportEvent>,
    server_version: &AtomicI32,
) -> Result<(), TransportError> {
    let Some(hello) = wire::read_frame(read_half).await? else {
        return Ok(());
    };
    let opened = messages::decode_server_hello(&wire::split_fields(&hello))?;
    if let TransportEvent::SocketOpened { server_version: v, .. } = &opened {
        server_version.store(*v, Ordering::Release);
    }
    if events.send(opened).await.is_err() {
        return Ok(());
    }

    let version = server_version.load(Ordering::Acquire);
    while let Some(frame) = wire::read_frame(read_half).await? {
        let fields = wire::split_fields(&frame);
        match messages::decode(&fields, version) {
            Ok(Some(event)) => {
                if events.send(event).await.is_err() {
                    // Receiver gone; nobody is listening anymore
                    return Ok(());
                }
            }
            Ok(None) => trace!(msg_id = ?fields.first(), "Skipping unhandled message"),
            Err(e) => warn!(error = %e, ?fields, "Dropping malformed message"),
        }
    }
    Ok(())
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<TransportEvent>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_half.write_all(&frame).await {
            warn!(error = %e, "Gateway write failed");
            let _ = events
                .send(TransportEvent::Disconnected {
                    reason: format!("write failed: {e}"),
                })
                .await;
            return;
        }
    }
    let _ = write_half.shutdown().await;
}
