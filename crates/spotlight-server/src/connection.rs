use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::router::MessageRouter;
use crate::session::ClientSession;

/// Heartbeat settings for one socket.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Drive one WebSocket until either side goes away or `shutdown` fires,
/// then disconnect the client from the router.
///
/// The writer forwards the session's outbound queue and sends pings; the
/// reader hands each text frame to the router and waits for it to finish
/// before reading the next, so a client's messages are handled in order.
pub async fn handle_ws_connection(
    socket: WebSocket,
    session: Arc<ClientSession>,
    mut rx: mpsc::Receiver<String>,
    router: Arc<MessageRouter>,
    heartbeat: Heartbeat,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let client_id = session.id().clone();

    let writer_session = Arc::clone(&session);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat.interval);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !writer_session.is_alive(heartbeat.timeout) {
                        tracing::info!(client_id = %writer_session.id(), "client missed heartbeats");
                        break;
                    }
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_session.id(), "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_router = Arc::clone(&router);
    let reader_session = Arc::clone(&session);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    reader_router.handle(reader_session.id(), text.as_str()).await;
                }
                WsMessage::Pong(_) => reader_session.record_pong(),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    let reader_finished = tokio::select! {
        _ = &mut writer => {
            reader.abort();
            false
        }
        _ = &mut reader => {
            writer.abort();
            true
        }
        _ = shutdown.cancelled() => {
            reader.abort();
            writer.abort();
            false
        }
    };
    // abort() only requests cancellation; a handler may still be running on
    // another worker and must be gone before the session is torn down.
    if !reader_finished {
        let _ = reader.await;
    }

    router.disconnect(&client_id).await;
}
