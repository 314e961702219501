//! The VarInt-framed scheme spoken by the release line, keyed by connection
//! state.

pub mod packets;
pub mod registry;

pub use packets::*;
pub use registry::*;

use epoch_protocol_core::{Connection, VarIntDecoder, VarIntEncoder};

pub type VarIntPacketDecoder = VarIntDecoder<VarIntPacket>;
pub type VarIntPacketEncoder = VarIntEncoder<VarIntPacket>;
pub type VarIntConnection = Connection<VarIntPacketDecoder, VarIntPacketEncoder>;
