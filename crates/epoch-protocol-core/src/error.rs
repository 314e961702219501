use crate::codec::CodecError;
use crate::registry::Direction;
use crate::state::ConnectionState;
use thiserror::Error;

/// Connection-level failures. Every variant except `Closed` means the peer
/// sent or was about to receive something the protocol does not allow, and
/// the connection is torn down.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown {direction} packet 0x{id:02X} for {context}")]
    UnknownPacket {
        id: i32,
        direction: Direction,
        context: String,
    },
    #[error("Malformed packet 0x{id:02X}: {source}")]
    Malformed {
        id: i32,
        #[source]
        source: CodecError,
    },
    #[error("Packet 0x{id:02X} belongs to {state}, which this connection has already left")]
    DepartedState { id: i32, state: ConnectionState },
    #[error("Illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
    #[error("No packet id for {kind} in {context}")]
    Unregistered { kind: String, context: String },
    #[error("Frame length prefix is longer than 5 bytes")]
    VarIntTooBig,
    #[error("Negative frame length {0}")]
    NegativeLength(i32),
    #[error("Empty frame")]
    EmptyFrame,
    #[error("Frame too large: {0} > {1}")]
    FrameTooLarge(usize, usize),
    #[error("Bad compressed frame: {0}")]
    BadCompression(String),
    #[error("Shared secret must be 16 bytes, got {0}")]
    BadSecretLength(usize),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed")]
    Closed,
}

impl ProtocolError {
    /// Whether this is an orderly end of stream rather than a fault.
    pub fn is_closed(&self) -> bool {
        matches!(self, ProtocolError::Closed)
    }
}
