use super::{PacketDecoder, PacketEncoder};
use crate::codec::{hex_dump, CodecError};
use crate::connection::Connection;
use crate::error::ProtocolError;
use crate::registry::{Direction, Packet, PacketRegistry, VersionRange};
use bytes::{Buf, BufMut, BytesMut};
use epoch_version::ProtocolVersion;
use std::sync::Arc;
use tracing::{debug, trace};

/// `[u8 id][payload]` with no length field.
///
/// A body that runs past the buffered bytes leaves the buffer untouched.
/// Unknown ids and malformed bodies are fatal since there is no way to find
/// the next packet boundary.
pub struct RawDecoder<P: Packet<Context = ProtocolVersion>> {
    registry: Arc<PacketRegistry<VersionRange, P>>,
    direction: Direction,
    version: ProtocolVersion,
}

impl<P: Packet<Context = ProtocolVersion>> RawDecoder<P> {
    pub fn new(
        registry: Arc<PacketRegistry<VersionRange, P>>,
        direction: Direction,
        version: ProtocolVersion,
    ) -> Self {
        Self {
            registry,
            direction,
            version,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }
}

impl<P: Packet<Context = ProtocolVersion>> PacketDecoder for RawDecoder<P> {
    type Packet = P;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<P>, ProtocolError> {
        let Some(&id) = src.first() else {
            return Ok(None);
        };
        let id = id as i32;
        let Some((kind, decode)) = self.registry.decoder(self.direction, id, &self.version) else {
            debug!(
                "Unknown raw packet for {}: {}",
                self.version,
                hex_dump(src, 64)
            );
            return Err(ProtocolError::UnknownPacket {
                id,
                direction: self.direction,
                context: self.version.to_string(),
            });
        };

        let mut peek = src.clone();
        peek.advance(1);
        match decode(&mut peek, &self.version) {
            Ok(packet) => {
                let consumed = src.len() - peek.len();
                src.advance(consumed);
                trace!("Read {} ({} bytes)", kind, consumed);
                Ok(Some(packet))
            }
            Err(CodecError::NotEnoughData) => Ok(None),
            Err(source) => {
                debug!("Malformed {} for {}: {}", kind, self.version, hex_dump(src, 64));
                Err(ProtocolError::Malformed { id, source })
            }
        }
    }
}

pub struct RawEncoder<P: Packet<Context = ProtocolVersion>> {
    registry: Arc<PacketRegistry<VersionRange, P>>,
    direction: Direction,
    version: ProtocolVersion,
}

impl<P: Packet<Context = ProtocolVersion>> RawEncoder<P> {
    pub fn new(
        registry: Arc<PacketRegistry<VersionRange, P>>,
        direction: Direction,
        version: ProtocolVersion,
    ) -> Self {
        Self {
            registry,
            direction,
            version,
        }
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }
}

impl<P: Packet<Context = ProtocolVersion>> PacketEncoder for RawEncoder<P> {
    type Packet = P;

    fn encode(&mut self, packet: &P, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let kind = packet.kind();
        let id = self
            .registry
            .id_of(self.direction, kind, &self.version)
            .ok_or_else(|| ProtocolError::Unregistered {
                kind: kind.to_string(),
                context: self.version.to_string(),
            })?;
        dst.put_u8(id as u8);
        packet.encode_body(dst, &self.version)?;
        Ok(())
    }
}

impl<P: Packet<Context = ProtocolVersion>> Connection<RawDecoder<P>, RawEncoder<P>> {
    /// Switch both directions to the negotiated version.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.decoder_mut().set_version(version);
        self.encoder_mut().set_version(version);
    }
}
