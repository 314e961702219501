use crate::error::ProtocolError;
use epoch_version::ProtocolVersion;
use std::fmt;

/// The state of a VarInt-scheme connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Handshaking,
    Status,
    Login,
    Play,
}

impl ConnectionState {
    pub fn from_handshake_next(next: i32) -> Option<Self> {
        match next {
            1 => Some(ConnectionState::Status),
            2 => Some(ConnectionState::Login),
            _ => None,
        }
    }

    fn can_enter(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Handshaking, ConnectionState::Status)
                | (ConnectionState::Handshaking, ConnectionState::Login)
                | (ConnectionState::Login, ConnectionState::Play)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Status => "status",
            ConnectionState::Login => "login",
            ConnectionState::Play => "play",
        };
        f.write_str(name)
    }
}

/// Decode/encode context for state-scoped packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateContext {
    pub state: ConnectionState,
    pub version: ProtocolVersion,
}

/// Tracks the current state and every state the connection has left.
///
/// States are never re-entered: Handshaking -> Status, Handshaking -> Login,
/// Login -> Play.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: ConnectionState,
    departed: Vec<ConnectionState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: ConnectionState::Handshaking,
            departed: Vec::new(),
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.current
    }

    pub fn departed(&self) -> &[ConnectionState] {
        &self.departed
    }

    pub fn has_departed(&self, state: ConnectionState) -> bool {
        self.departed.contains(&state)
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<(), ProtocolError> {
        if !self.current.can_enter(next) {
            return Err(ProtocolError::IllegalTransition {
                from: self.current,
                to: next,
            });
        }
        self.departed.push(self.current);
        self.current = next;
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
