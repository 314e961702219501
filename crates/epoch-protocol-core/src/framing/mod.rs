//! The three framing disciplines. Each pairs a decoder that turns buffered
//! bytes into packets with an encoder that writes them back.

pub mod prefixed;
pub mod raw;
pub mod varint;

pub use prefixed::{PrefixedDecoder, PrefixedEncoder, MAX_PREFIXED_FRAME};
pub use raw::{RawDecoder, RawEncoder};
pub use varint::{
    read_frame, CompressionStage, VarIntDecoder, VarIntEncoder, MAX_VARINT_FRAME,
};

use crate::error::ProtocolError;
use bytes::BytesMut;

/// Stateful decoder for one connection's inbound stream.
pub trait PacketDecoder: Send {
    type Packet: Send + Sync;

    /// Decode the next packet from `src`.
    ///
    /// `Ok(None)` means more bytes are needed; nothing has been consumed in
    /// that case.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Packet>, ProtocolError>;
}

/// Stateful encoder for one connection's outbound stream.
pub trait PacketEncoder: Send {
    type Packet: Send + Sync;

    /// Append the complete wire form of `packet` to `dst`.
    fn encode(&mut self, packet: &Self::Packet, dst: &mut BytesMut) -> Result<(), ProtocolError>;
}
