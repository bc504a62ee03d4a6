use std::collections::BTreeMap;
use std::fmt;

use super::{ConnectionSink, Frame};
use crate::error::RelayError;
use crate::ws::protocol::{JoinMessage, PresenceNode, DEFAULT_NICKNAME};

/// Stable identifier the hub assigns to each live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The `(userId, instanceId, nickname)` triple a connection claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub instance_id: String,
    pub nickname: String,
}

impl From<JoinMessage> for Identity {
    fn from(join: JoinMessage) -> Self {
        Self {
            user_id: join.user_id,
            instance_id: join.instance_id,
            nickname: join.nickname,
        }
    }
}

/// Where a registered connection is in its lifecycle.
/// Closed connections have no entry at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open, no join received yet.
    Connected,
    /// A join has been applied. Later joins overwrite it.
    Identified(Identity),
}

pub struct ConnectionEntry<S> {
    sink: S,
    state: ConnectionState,
}

impl<S: ConnectionSink> ConnectionEntry<S> {
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn user_id(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Identified(identity) => Some(&identity.user_id),
            ConnectionState::Connected => None,
        }
    }

    pub fn nickname(&self) -> &str {
        match &self.state {
            ConnectionState::Identified(identity) => &identity.nickname,
            ConnectionState::Connected => DEFAULT_NICKNAME,
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    pub fn send(&self, frame: &Frame) -> bool {
        self.sink.send(frame)
    }
}

/// All live connections, keyed by [`ConnectionId`].
///
/// Owned by the router and mutated only from the hub task. Ids are allocated
/// in increasing order, so iteration follows registration order.
pub struct ConnectionRegistry<S> {
    entries: BTreeMap<ConnectionId, ConnectionEntry<S>>,
}

impl<S: ConnectionSink> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionEntry<S>> {
        self.entries.get(&id)
    }

    /// Insert a fresh, unidentified entry.
    pub fn register(&mut self, id: ConnectionId, sink: S) -> Result<(), RelayError> {
        if self.entries.contains_key(&id) {
            return Err(RelayError::DuplicateConnection(id));
        }
        self.entries.insert(
            id,
            ConnectionEntry {
                sink,
                state: ConnectionState::Connected,
            },
        );
        Ok(())
    }

    /// Remove an entry. Returns `None` if the id was never registered or is already gone.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<ConnectionEntry<S>> {
        self.entries.remove(&id)
    }

    /// Apply a join. Returns the previous state, or `None` (and changes
    /// nothing) when the connection is not registered.
    pub fn set_identity(
        &mut self,
        id: ConnectionId,
        identity: Identity,
    ) -> Option<ConnectionState> {
        let entry = self.entries.get_mut(&id)?;
        Some(std::mem::replace(
            &mut entry.state,
            ConnectionState::Identified(identity),
        ))
    }

    /// Every identified entry with a non-empty `userId`, in registry order.
    pub fn snapshot_presence(&self) -> Vec<PresenceNode> {
        self.entries
            .values()
            .filter_map(|entry| match &entry.state {
                ConnectionState::Identified(identity) if identity.user_id.is_empty() => None,
                ConnectionState::Identified(identity) => Some(PresenceNode {
                    user_id: identity.user_id.clone(),
                    instance_id: identity.instance_id.clone(),
                    nickname: identity.nickname.clone(),
                }),
                ConnectionState::Connected => None,
            })
            .collect()
    }

    /// Call `f` for every entry whose sink is still open. Closed entries are
    /// skipped but stay registered until their close event arrives.
    /// Returns how many entries were visited.
    pub fn for_each_open<F>(&self, mut f: F) -> usize
    where
        F: FnMut(ConnectionId, &ConnectionEntry<S>),
    {
        let mut visited = 0;
        for (id, entry) in &self.entries {
            if entry.is_open() {
                f(*id, entry);
                visited += 1;
            }
        }
        visited
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &ConnectionEntry<S>)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }
}

impl<S: ConnectionSink> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
