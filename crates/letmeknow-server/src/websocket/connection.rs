//! The outbound half of an accepted relay connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

/// Why a write to a client did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// The client is not draining its queue fast enough.
    #[error("outbound queue full")]
    QueueFull,
    /// The writer task has exited; the socket is gone.
    #[error("connection closed")]
    Closed,
}

/// Handle to one accepted `WebSocket`.
///
/// `id` is the opaque connection handle the registry keys on. A write never
/// touches the socket directly: frames are queued for the session's writer
/// task and fail immediately instead of waiting on a slow peer.
pub struct ClientConnection {
    /// Connection handle (UUID v7).
    pub id: String,
    /// Remote peer address.
    pub peer: SocketAddr,
    /// Accept time.
    pub connected_at: Instant,
    outbound: mpsc::Sender<Utf8Bytes>,
    failed_writes: AtomicU64,
}

impl ClientConnection {
    /// Wrap the sending side of a session's outbound queue.
    pub fn new(id: String, peer: SocketAddr, outbound: mpsc::Sender<Utf8Bytes>) -> Self {
        Self {
            id,
            peer,
            connected_at: Instant::now(),
            outbound,
            failed_writes: AtomicU64::new(0),
        }
    }

    /// Queue one text frame for the client.
    pub fn write(&self, frame: Utf8Bytes) -> Result<(), WriteError> {
        self.outbound.try_send(frame).map_err(|e| {
            let _ = self.failed_writes.fetch_add(1, Ordering::Relaxed);
            match e {
                TrySendError::Full(_) => WriteError::QueueFull,
                TrySendError::Closed(_) => WriteError::Closed,
            }
        })
    }

    /// Number of writes that failed over the connection's lifetime.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Time since the connection was accepted.
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("failed_writes", &self.failed_writes())
            .finish_non_exhaustive()
    }
}
