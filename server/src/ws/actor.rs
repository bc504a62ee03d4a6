use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::hub::ConnectionId;
use crate::state::{AppState, Keepalive};

/// Close code sent when a client stops answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// How long the writer may keep flushing after the connection is unregistered.
const CLOSE_FLUSH_GRACE: Duration = Duration::from_millis(100);

/// Run the actor-per-connection pattern for an upgraded WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel
/// - Reader loop: forwards inbound frames to the hub in arrival order
///
/// The hub keeps a clone of the channel sender and decides which connections
/// receive each outbound frame.
pub async fn run_connection(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let id = match state.hub.open(tx.clone(), peer).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(peer = %peer, error = %e, "Refusing connection");
            return;
        }
    };

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let mut ping_handle = tokio::spawn(ping_task(id, tx.clone(), pong_rx, state.keepalive));

    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            // The ping task only returns once the peer stopped answering or the
            // writer is gone; either way the connection is dead.
            _ = &mut ping_handle => {
                tracing::debug!(conn_id = %id, "Keepalive ended, dropping connection");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    state.hub.frame(id, text.as_str().to_owned());
                }
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => state.hub.frame(id, text),
                    Err(_) => {
                        tracing::debug!(
                            conn_id = %id,
                            len = data.len(),
                            "Dropping binary frame that is not UTF-8"
                        );
                    }
                },
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::debug!(conn_id = %id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                state.hub.error(id, e.to_string());
                break;
            }
            None => {
                tracing::debug!(conn_id = %id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();
    state.hub.close(id);

    // The writer drains once the hub and this actor drop their senders, which
    // lets a queued close frame reach the peer. A stalled socket gets aborted.
    drop(tx);
    if timeout(CLOSE_FLUSH_GRACE, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::debug!(conn_id = %id, peer = %peer, "WebSocket actor stopped");
}

/// Writer task: receives frames from the mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}

/// Send a ping every `keepalive.ping_interval`; close the connection if the
/// matching pong does not arrive within `keepalive.pong_timeout`.
async fn ping_task(
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    keepalive: Keepalive,
) {
    let mut ping_timer = interval(keepalive.ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died
            break;
        }

        match timeout(keepalive.pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(conn_id = %id, "Pong timeout, closing connection");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}
