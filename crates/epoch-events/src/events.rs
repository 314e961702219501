use crate::bus::{CancellableEvent, Event};
use epoch_types::{BlockPos, Vec3d};
use epoch_version::ProtocolVersion;

/// Who triggered an event.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRef {
    pub name: String,
    pub entity_id: i32,
    pub version: ProtocolVersion,
}

/// A player placing or breaking a block. Block ids are in the world's
/// native id space.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockChangeEvent {
    pub player: PlayerRef,
    pub position: BlockPos,
    pub old_block: u8,
    pub new_block: u8,
}

impl BlockChangeEvent {
    pub fn is_break(&self) -> bool {
        self.new_block == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub player: PlayerRef,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerMoveEvent {
    pub player: PlayerRef,
    pub from: Vec3d,
    pub to: Vec3d,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerJoinEvent {
    pub player: PlayerRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerLeaveEvent {
    pub player: PlayerRef,
    pub reason: String,
}

/// Every hook the server fires. Built once at startup and shared.
#[derive(Debug)]
pub struct EventBus {
    pub block_change: CancellableEvent<BlockChangeEvent>,
    pub chat: CancellableEvent<ChatEvent>,
    pub player_move: CancellableEvent<PlayerMoveEvent>,
    pub player_join: Event<PlayerJoinEvent>,
    pub player_leave: Event<PlayerLeaveEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            block_change: CancellableEvent::new("block_change"),
            chat: CancellableEvent::new("chat"),
            player_move: CancellableEvent::new("player_move"),
            player_join: Event::new("player_join"),
            player_leave: Event::new("player_leave"),
        }
    }

    /// Total listener count across all events.
    pub fn listener_count(&self) -> usize {
        self.block_change.len()
            + self.chat.len()
            + self.player_move.len()
            + self.player_join.len()
            + self.player_leave.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
