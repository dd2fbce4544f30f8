use std::collections::HashMap;
use std::net::IpAddr;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::watch;
use zoneproto::session::PlayerId;

/// One authenticated connection, from identify until disconnect.
#[derive(Debug)]
pub struct Player {
    /// Identity name, trimmed, set once at identify.
    pub name: String,
    /// Display alias; empty until the client sets one.
    pub alias: String,
    /// Client protocol version recorded at identify.
    pub proto_version: i32,
    /// Current zone membership; `None` is a valid state.
    pub zone: Option<i32>,
    pub peer_ip: IpAddr,
    /// Pre-framed outbound bytes for this player's connection.
    pub write_tx: mpsc::Sender<Bytes>,
    /// Flipping this tears the connection down.
    pub disconnect_tx: watch::Sender<bool>,
}

/// The owning map of live players. Callers serialize access through one mutex.
#[derive(Debug)]
pub struct Roster {
    next_id: u32,
    players: HashMap<PlayerId, Player>,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            players: HashMap::new(),
        }
    }

    /// Register a player under a fresh id, stable for the session's lifetime.
    pub fn add(&mut self, player: Player) -> PlayerId {
        let id = PlayerId(self.next_id);
        self.next_id += 1;
        self.players.insert(id, player);
        id
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    /// Untrack a player. Removing an id that is not tracked is a no-op.
    pub fn remove(&mut self, id: PlayerId) -> Option<Player> {
        self.players.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
