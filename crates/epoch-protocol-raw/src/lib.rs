//! The raw scheme: classic, alpha and beta packets with no length field.

pub mod packets;
pub mod registry;

pub use packets::*;
pub use registry::*;

use epoch_protocol_core::{RawDecoder, RawEncoder};

pub type RawPacketDecoder = RawDecoder<RawPacket>;
pub type RawPacketEncoder = RawEncoder<RawPacket>;
