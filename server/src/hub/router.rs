//! Message routing: applies joins to the registry and picks the recipients
//! of presence snapshots, broadcasts and direct messages.

use serde::{Deserialize, Serialize};

use super::registry::{ConnectionEntry, ConnectionId, ConnectionRegistry, ConnectionState};
use super::{ConnectionSink, Frame};
use crate::error::{ProtocolError, RelayError};
use crate::ws::protocol::{ChatMessage, ChatMode, InboundMessage, OutboundMessage, PresenceNode};

/// Who besides the target user receives a copy of a direct message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EchoPolicy {
    /// Only the connection the message arrived on.
    Originator,
    /// Every connection identified as `from.userId`, the originating one included.
    #[default]
    AllInstances,
}

/// Outcome of one fan-out: frames handed to open sinks, and selected
/// recipients that were closed or whose send failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub skipped: usize,
}

impl Delivery {
    fn record(&mut self, sent: bool) {
        if sent {
            self.delivered += 1;
        } else {
            self.skipped += 1;
        }
    }
}

/// What the router did with one inbound frame.
#[derive(Debug)]
pub enum Dispatch {
    /// A join was applied and the new presence snapshot fanned out.
    Presence(Delivery),
    Broadcast(Delivery),
    Direct(Delivery),
    /// Well-formed but nothing to do (unknown kind or chat mode).
    Ignored,
    /// The sending connection is no longer registered.
    Unregistered,
    /// The frame could not be parsed and was dropped.
    Discarded(ProtocolError),
}

pub struct MessageRouter<S> {
    registry: ConnectionRegistry<S>,
    echo: EchoPolicy,
    next_id: u64,
}

impl<S: ConnectionSink> MessageRouter<S> {
    pub fn new(echo: EchoPolicy) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            echo,
            next_id: 1,
        }
    }

    pub fn echo_policy(&self) -> EchoPolicy {
        self.echo
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Lifecycle state of a connection; `None` once it has closed.
    pub fn connection_state(&self, id: ConnectionId) -> Option<&ConnectionState> {
        self.registry.get(id).map(ConnectionEntry::state)
    }

    pub fn presence_snapshot(&self) -> Vec<PresenceNode> {
        self.registry.snapshot_presence()
    }

    /// Register a newly opened connection and hand back its id.
    pub fn open(&mut self, sink: S) -> Result<ConnectionId, RelayError> {
        let id = ConnectionId::new(self.next_id);
        self.registry.register(id, sink)?;
        self.next_id += 1;
        Ok(id)
    }

    /// Remove a closed connection and fan out the updated presence.
    /// Returns `None` if the connection was not registered.
    pub fn close(&mut self, id: ConnectionId) -> Option<Delivery> {
        let entry = self.registry.unregister(id)?;
        tracing::debug!(
            conn_id = %id,
            user_id = entry.user_id().unwrap_or("-"),
            remaining = self.registry.len(),
            "Connection unregistered"
        );
        Some(self.broadcast_presence())
    }

    /// Parse and route one inbound text frame from `id`.
    pub fn handle_frame(&mut self, id: ConnectionId, frame: &str) -> Dispatch {
        let message = match InboundMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(conn_id = %id, error = %e, "Discarding inbound frame");
                return Dispatch::Discarded(e);
            }
        };

        if self.registry.get(id).is_none() {
            tracing::debug!(conn_id = %id, "Frame from unregistered connection");
            return Dispatch::Unregistered;
        }

        match message {
            InboundMessage::Join(join) => {
                let user_id = join.user_id.clone();
                let nickname = join.nickname.clone();
                match self.registry.set_identity(id, join.into()) {
                    Some(ConnectionState::Identified(previous)) => {
                        tracing::info!(
                            conn_id = %id,
                            user_id = %user_id,
                            nickname = %nickname,
                            previous_user_id = %previous.user_id,
                            "User re-joined"
                        );
                    }
                    Some(ConnectionState::Connected) => {
                        tracing::info!(
                            conn_id = %id,
                            user_id = %user_id,
                            nickname = %nickname,
                            "User joined"
                        );
                    }
                    None => return Dispatch::Unregistered,
                }
                Dispatch::Presence(self.broadcast_presence())
            }
            InboundMessage::Chat(chat) => self.route_chat(id, &chat, frame),
            InboundMessage::Unrecognized => {
                tracing::debug!(conn_id = %id, "Ignoring unrecognized message type");
                Dispatch::Ignored
            }
        }
    }

    /// Send the current presence snapshot to every open connection,
    /// identified or not.
    pub fn broadcast_presence(&self) -> Delivery {
        let nodes = self.registry.snapshot_presence();
        let frame: Frame = match (OutboundMessage::Presence { nodes: &nodes }).to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode presence snapshot");
                return Delivery::default();
            }
        };
        let delivery = self.broadcast_frame(&frame);
        tracing::debug!(
            nodes = nodes.len(),
            delivered = delivery.delivered,
            skipped = delivery.skipped,
            "Presence broadcast"
        );
        delivery
    }

    fn route_chat(&self, origin: ConnectionId, chat: &ChatMessage, raw: &str) -> Dispatch {
        let frame: Frame = raw.into();
        match chat.mode {
            ChatMode::Broadcast => Dispatch::Broadcast(self.broadcast_frame(&frame)),
            ChatMode::Direct => {
                let target = chat.to_user_id.as_deref();
                let sender = chat.sender_user_id();
                let echo = self.echo;
                let delivery = self.deliver_where(&frame, |id, entry| {
                    let user_id = entry.user_id();
                    if user_id.is_some() && user_id == target {
                        return true;
                    }
                    match echo {
                        EchoPolicy::Originator => id == origin,
                        EchoPolicy::AllInstances => user_id.is_some() && user_id == sender,
                    }
                });
                tracing::debug!(
                    conn_id = %origin,
                    to_user_id = target.unwrap_or("-"),
                    delivered = delivery.delivered,
                    skipped = delivery.skipped,
                    "Direct message routed"
                );
                Dispatch::Direct(delivery)
            }
            ChatMode::Other => {
                tracing::debug!(conn_id = %origin, "Ignoring chat with unknown mode");
                Dispatch::Ignored
            }
        }
    }

    fn broadcast_frame(&self, frame: &Frame) -> Delivery {
        let mut delivery = Delivery::default();
        let visited = self
            .registry
            .for_each_open(|_, entry| delivery.record(entry.send(frame)));
        delivery.skipped += self.registry.len() - visited;
        delivery
    }

    /// Send to every selected connection once. Selected but closed
    /// connections count as skipped.
    fn deliver_where<F>(&self, frame: &Frame, mut select: F) -> Delivery
    where
        F: FnMut(ConnectionId, &ConnectionEntry<S>) -> bool,
    {
        let mut delivery = Delivery::default();
        for (id, entry) in self.registry.iter() {
            if !select(id, entry) {
                continue;
            }
            delivery.record(entry.is_open() && entry.send(frame));
        }
        delivery
    }
}
