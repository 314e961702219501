//! The length-prefixed scheme: the original prototype and the mobile line.

pub mod packets;
pub mod registry;

pub use packets::*;
pub use registry::*;

use epoch_protocol_core::{PrefixedDecoder, PrefixedEncoder};

pub type PrefixedPacketDecoder = PrefixedDecoder<PrefixedPacket>;
pub type PrefixedPacketEncoder = PrefixedEncoder<PrefixedPacket>;
