use super::{PacketDecoder, PacketEncoder};
use crate::codec::hex_dump;
use crate::connection::Connection;
use crate::error::ProtocolError;
use crate::registry::{Direction, Packet, PacketRegistry, VersionRange};
use bytes::{Buf, BufMut, BytesMut};
use epoch_version::ProtocolVersion;
use std::sync::Arc;
use tracing::{debug, trace};

/// Largest accepted `[u32 length]` value.
pub const MAX_PREFIXED_FRAME: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// `[u32 BE length][u8 type][payload]`; the length counts the type byte.
///
/// Nothing is consumed until the whole frame is buffered. Unknown type ids
/// are skipped using the declared length.
pub struct PrefixedDecoder<P: Packet<Context = ProtocolVersion>> {
    registry: Arc<PacketRegistry<VersionRange, P>>,
    direction: Direction,
    version: ProtocolVersion,
}

impl<P: Packet<Context = ProtocolVersion>> PrefixedDecoder<P> {
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

impl<P: Packet<Context = ProtocolVersion>> PacketDecoder for PrefixedDecoder<P> {
    type Packet = P;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<P>, ProtocolError> {
        loop {
            if src.len() < HEADER_LEN {
                return Ok(None);
            }
            let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if len == 0 {
                return Err(ProtocolError::EmptyFrame);
            }
            if len > MAX_PREFIXED_FRAME {
                return Err(ProtocolError::FrameTooLarge(len, MAX_PREFIXED_FRAME));
            }
            if src.len() < HEADER_LEN + len {
                src.reserve(HEADER_LEN + len - src.len());
                return Ok(None);
            }

            src.advance(HEADER_LEN);
            let mut frame = src.split_to(len);
            let id = frame.get_u8() as i32;
            let Some((kind, decode)) = self.registry.decoder(self.direction, id, &self.version)
            else {
                debug!(
                    "Skipping unknown type 0x{:02X} ({} bytes) for {}",
                    id, len, self.version
                );
                continue;
            };

            return match decode(&mut frame, &self.version) {
                Ok(packet) => {
                    trace!("Read {} ({} bytes)", kind, len);
                    Ok(Some(packet))
                }
                // The frame is complete, so running short is a malformed body.
                Err(source) => {
                    debug!("Malformed {} for {}: {}", kind, self.version, hex_dump(&frame, 64));
                    Err(ProtocolError::Malformed { id, source })
                }
            };
        }
    }
}

pub struct PrefixedEncoder<P: Packet<Context = ProtocolVersion>> {
    registry: Arc<PacketRegistry<VersionRange, P>>,
    direction: Direction,
    version: ProtocolVersion,
}

impl<P: Packet<Context = ProtocolVersion>> PrefixedEncoder<P> {
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

impl<P: Packet<Context = ProtocolVersion>> PacketEncoder for PrefixedEncoder<P> {
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

        let mut body = BytesMut::new();
        body.put_u8(id as u8);
        packet.encode_body(&mut body, &self.version)?;
        if body.len() > MAX_PREFIXED_FRAME {
            return Err(ProtocolError::FrameTooLarge(body.len(), MAX_PREFIXED_FRAME));
        }

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl<P: Packet<Context = ProtocolVersion>> Connection<PrefixedDecoder<P>, PrefixedEncoder<P>> {
    /// Switch both directions to the negotiated version.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.decoder_mut().set_version(version);
        self.encoder_mut().set_version(version);
    }
}
