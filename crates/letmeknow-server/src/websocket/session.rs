//! `WebSocket` session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::connection::ClientConnection;
use super::handler::{Flow, RelayContext, handle_message};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Per-session transport settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Capacity of the outbound queue.
    pub outbound_buffer: usize,
    /// How long to wait for queued frames to be written on close.
    pub flush_timeout: Duration,
}

/// Run a `WebSocket` session for a connected client.
///
/// 1. Adds the connection to the registry
/// 2. Forwards queued outbound frames through a writer task
/// 3. Runs inbound frames through the protocol handler until it, the peer,
///    or a shutdown ends the session
/// 4. Removes the connection and lets the writer flush before closing
#[instrument(skip_all, fields(conn_id, peer = %peer))]
pub async fn run_ws_session(
    ws: WebSocket,
    peer: SocketAddr,
    ctx: Arc<RelayContext>,
    settings: SessionSettings,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let conn_id = Uuid::now_v7().to_string();
    let _ = tracing::Span::current().record("conn_id", conn_id.as_str());

    let (send_tx, mut send_rx) = mpsc::channel::<Utf8Bytes>(settings.outbound_buffer.max(1));
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), peer, send_tx));

    ctx.registry.add(connection.clone()).await;
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    ctx.registry.trace_snapshot().await;

    // Writer: drains the queue until every sender handle is gone, then closes.
    let outbound = tokio::spawn(async move {
        while let Some(text) = send_rx.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = shutdown.cancelled() => {
                info!("server shutting down, ending session");
                break;
            }
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                info!(error = %e, "read failed");
                break;
            }
            None => break,
        };

        // Binary frames are accepted when they carry UTF-8 text.
        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(s) => Utf8Bytes::from(s.to_owned()),
                Err(_) => {
                    info!(len = data.len(), "received non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        debug!(len = text.as_str().len(), "recv");
        if handle_message(text.as_str(), &connection, &ctx).await == Flow::Close {
            break;
        }
    }

    // Clean up
    let _ = ctx.registry.remove(&conn_id).await;
    info!(failed_writes = connection.failed_writes(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.connected_for().as_secs_f64());
    ctx.registry.trace_snapshot().await;

    // Dropping the last handle closes the queue; the writer flushes and sends Close.
    drop(connection);
    let _ = finish_writer(outbound, settings.flush_timeout).await;
}

/// Wait up to `flush_timeout` for the writer to drain and close, aborting it
/// otherwise. Returns whether the writer finished on its own.
async fn finish_writer(mut writer: JoinHandle<()>, flush_timeout: Duration) -> bool {
    if tokio::time::timeout(flush_timeout, &mut writer).await.is_ok() {
        return true;
    }
    warn!("outbound flush timed out, aborting writer");
    writer.abort();
    false
}
