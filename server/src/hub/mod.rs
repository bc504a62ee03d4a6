//! The relay hub: one task owns the [`MessageRouter`] and processes every
//! connection event in arrival order, so the registry needs no locking.
//!
//! Connection actors talk to the hub through a cloneable [`HubHandle`].

pub mod registry;
pub mod router;

use axum::extract::ws::Utf8Bytes;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};

pub use registry::{ConnectionId, ConnectionState, Identity};
pub use router::{Delivery, Dispatch, EchoPolicy, MessageRouter};

use crate::error::RelayError;
use crate::ws::protocol::PresenceNode;
use crate::ws::ConnectionSender;

/// A serialized outbound frame. Encoded once per fan-out; clones share the buffer.
pub type Frame = Utf8Bytes;

/// The transport side of one connection, as seen by the router.
pub trait ConnectionSink {
    /// Whether the underlying channel can still accept frames.
    fn is_open(&self) -> bool;

    /// Queue a frame. Returns `false` if it was dropped; never blocks.
    fn send(&self, frame: &Frame) -> bool;
}

/// Commands sent from connection actors to the hub loop.
pub enum HubCommand {
    /// A connection finished its upgrade.
    Open {
        sink: ConnectionSender,
        peer: SocketAddr,
        reply: oneshot::Sender<Result<ConnectionId, RelayError>>,
    },
    /// A text frame arrived on a connection.
    Frame { id: ConnectionId, text: String },
    /// The transport reported an error. The entry is removed by the close that follows.
    Error { id: ConnectionId, error: String },
    /// The connection is gone.
    Close { id: ConnectionId },
    /// Query the current presence snapshot.
    Presence(oneshot::Sender<Vec<PresenceNode>>),
}

/// Cloneable handle to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Spawn the hub loop on the current tokio runtime.
    pub fn spawn(echo: EchoPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_hub_loop(MessageRouter::new(echo), rx));
        Self { tx }
    }

    pub async fn open(
        &self,
        sink: ConnectionSender,
        peer: SocketAddr,
    ) -> Result<ConnectionId, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Open { sink, peer, reply })
            .map_err(|_| RelayError::HubUnavailable)?;
        rx.await.map_err(|_| RelayError::HubUnavailable)?
    }

    pub fn frame(&self, id: ConnectionId, text: String) {
        let _ = self.tx.send(HubCommand::Frame { id, text });
    }

    pub fn error(&self, id: ConnectionId, error: String) {
        let _ = self.tx.send(HubCommand::Error { id, error });
    }

    pub fn close(&self, id: ConnectionId) {
        let _ = self.tx.send(HubCommand::Close { id });
    }

    pub async fn presence(&self) -> Result<Vec<PresenceNode>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Presence(reply))
            .map_err(|_| RelayError::HubUnavailable)?;
        rx.await.map_err(|_| RelayError::HubUnavailable)
    }
}

/// Run the hub loop until every [`HubHandle`] has been dropped.
pub async fn run_hub_loop(
    mut router: MessageRouter<ConnectionSender>,
    mut rx: mpsc::UnboundedReceiver<HubCommand>,
) {
    tracing::info!(echo = ?router.echo_policy(), "Hub started");

    while let Some(cmd) = rx.recv().await {
        handle_hub_command(&mut router, cmd);
    }

    tracing::info!("Hub command channel closed, shutting down");
}

fn handle_hub_command(router: &mut MessageRouter<ConnectionSender>, cmd: HubCommand) {
    match cmd {
        HubCommand::Open { sink, peer, reply } => {
            let result = router.open(sink);
            match &result {
                Ok(id) => tracing::info!(
                    conn_id = %id,
                    peer = %peer,
                    connections = router.connection_count(),
                    "New connection"
                ),
                Err(e) => tracing::error!(peer = %peer, error = %e, "Failed to register connection"),
            }
            let _ = reply.send(result);
        }
        HubCommand::Frame { id, text } => {
            router.handle_frame(id, &text);
        }
        HubCommand::Error { id, error } => {
            tracing::warn!(conn_id = %id, error = %error, "Connection error");
        }
        HubCommand::Close { id } => {
            if router.close(id).is_some() {
                tracing::info!(
                    conn_id = %id,
                    connections = router.connection_count(),
                    "Client disconnected"
                );
            }
        }
        HubCommand::Presence(reply) => {
            let _ = reply.send(router.presence_snapshot());
        }
    }
}
