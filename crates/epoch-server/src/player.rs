use epoch_events::PlayerRef;
use epoch_types::{BlockPos, Location};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// A game message for one session, independent of its wire scheme. Block
/// ids are in the world's native id space; each session translates them
/// for its client.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Chat(String),
    BlockChange { position: BlockPos, block: u8 },
    SpawnPlayer { entity_id: i32, name: String, location: Location },
    MovePlayer { entity_id: i32, location: Location },
    DespawnPlayer { entity_id: i32 },
    /// Move the receiving player.
    Teleport(Location),
    MiningProgress { entity_id: i32, position: BlockPos, stage: i8 },
    TimeUpdate(i64),
    KeepAlive,
    Kick(String),
}

/// One connected player, as the rest of the server sees it.
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    pub player: PlayerRef,
    pub location: Location,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl PlayerHandle {
    pub fn new(player: PlayerRef, location: Location, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            player,
            location,
            sender,
        }
    }

    /// Queue a message. A closed session drops it.
    pub fn send(&self, message: Outbound) {
        let _ = self.sender.send(message);
    }
}

/// Every player in play, keyed by entity id.
#[derive(Debug, Default)]
pub struct PlayerList {
    players: RwLock<HashMap<i32, PlayerHandle>>,
}

impl PlayerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a player unless the list holds `max` already or the name is
    /// taken. Capacity, name and insert are checked under one lock. The
    /// newcomer is sent a spawn for everyone already present.
    pub fn try_add(&self, handle: PlayerHandle, max: usize) -> anyhow::Result<()> {
        let mut players = self.players.write().unwrap_or_else(|e| e.into_inner());
        if players.len() >= max {
            anyhow::bail!("The server is full");
        }
        let name = &handle.player.name;
        if players
            .values()
            .any(|h| h.player.name.eq_ignore_ascii_case(name))
        {
            anyhow::bail!("{} is already playing", name);
        }
        let mut others: Vec<_> = players.values().collect();
        others.sort_by(|a, b| a.player.name.cmp(&b.player.name));
        for other in others {
            handle.send(Outbound::SpawnPlayer {
                entity_id: other.player.entity_id,
                name: other.player.name.clone(),
                location: other.location,
            });
        }
        players.insert(handle.player.entity_id, handle);
        Ok(())
    }

    /// Remove a player. Only the first call for an entity id returns the
    /// handle.
    pub fn remove(&self, entity_id: i32) -> Option<PlayerHandle> {
        self.players
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&entity_id)
    }

    pub fn get(&self, entity_id: i32) -> Option<PlayerHandle> {
        self.players
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&entity_id)
            .cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<PlayerHandle> {
        self.players
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|h| h.player.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn set_location(&self, entity_id: i32, location: Location) {
        if let Some(handle) = self
            .players
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&entity_id)
        {
            handle.location = location;
        }
    }

    pub fn count(&self) -> usize {
        self.players.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// All handles, sorted by name.
    pub fn snapshot(&self) -> Vec<PlayerHandle> {
        let mut handles: Vec<_> = self
            .players
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        handles.sort_by(|a, b| a.player.name.cmp(&b.player.name));
        handles
    }

    pub fn send_to(&self, entity_id: i32, message: Outbound) -> bool {
        match self.players.read().unwrap_or_else(|e| e.into_inner()).get(&entity_id) {
            Some(handle) => {
                handle.send(message);
                true
            }
            None => false,
        }
    }

    /// Send to every player, optionally skipping one.
    pub fn broadcast(&self, message: Outbound, except: Option<i32>) {
        let players = self.players.read().unwrap_or_else(|e| e.into_inner());
        for (id, handle) in players.iter() {
            if Some(*id) != except {
                handle.send(message.clone());
            }
        }
    }
}
