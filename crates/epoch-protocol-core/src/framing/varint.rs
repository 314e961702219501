use super::{PacketDecoder, PacketEncoder};
use crate::codec::{hex_dump, read_varint, write_varint};
use crate::connection::Connection;
use crate::error::ProtocolError;
use crate::registry::{Direction, Packet, PacketRegistry};
use crate::state::{ConnectionState, StateContext, StateMachine};
use bytes::{Buf, BytesMut};
use epoch_version::ProtocolVersion;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read as _, Write as _};
use std::sync::Arc;
use tracing::{debug, trace};

/// Largest frame a 3-byte VarInt prefix can announce.
pub const MAX_VARINT_FRAME: usize = 2_097_151;

/// Largest decompressed packet accepted behind a compressed frame.
const MAX_UNCOMPRESSED: usize = 8 * 1024 * 1024;

/// Split one `[VarInt length][bytes]` frame off the front of `src`.
///
/// Returns `Ok(None)` without consuming anything while the prefix or the
/// frame body is incomplete.
pub fn read_frame(src: &mut BytesMut, max: usize) -> Result<Option<BytesMut>, ProtocolError> {
    let mut length: i32 = 0;
    let mut header = 0;
    for i in 0..5 {
        let Some(&byte) = src.get(i) else {
            return Ok(None);
        };
        length |= ((byte & 0x7F) as i32) << (7 * i);
        if byte & 0x80 == 0 {
            header = i + 1;
            break;
        }
    }
    if header == 0 {
        return Err(ProtocolError::VarIntTooBig);
    }
    if length < 0 {
        return Err(ProtocolError::NegativeLength(length));
    }
    let length = length as usize;
    if length > max {
        return Err(ProtocolError::FrameTooLarge(length, max));
    }
    if src.len() < header + length {
        src.reserve(header + length - src.len());
        return Ok(None);
    }
    src.advance(header);
    Ok(Some(src.split_to(length)))
}

/// The optional zlib stage between framing and packet decoding.
///
/// Each frame carries `[VarInt uncompressed length][body]`; a zero length
/// means the body is stored as-is.
#[derive(Debug, Clone, Copy)]
pub struct CompressionStage {
    threshold: usize,
}

impl CompressionStage {
    /// A negative threshold disables compression.
    pub fn new(threshold: i32) -> Option<Self> {
        (threshold >= 0).then_some(Self {
            threshold: threshold as usize,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn decompress(&self, mut frame: BytesMut) -> Result<BytesMut, ProtocolError> {
        let data_length = read_varint(&mut frame)
            .map_err(|e| ProtocolError::BadCompression(format!("data length: {}", e)))?;
        if data_length == 0 {
            return Ok(frame);
        }
        if data_length < 0 || (data_length as usize) > MAX_UNCOMPRESSED {
            return Err(ProtocolError::BadCompression(format!(
                "declared size {} out of range",
                data_length
            )));
        }
        let data_length = data_length as usize;
        if data_length < self.threshold {
            return Err(ProtocolError::BadCompression(format!(
                "size {} is below threshold {}",
                data_length, self.threshold
            )));
        }
        let mut decompressed = vec![0u8; data_length];
        ZlibDecoder::new(&frame[..])
            .read_exact(&mut decompressed)
            .map_err(|e| ProtocolError::BadCompression(e.to_string()))?;
        Ok(BytesMut::from(&decompressed[..]))
    }

    pub fn compress(&self, packet: BytesMut) -> Result<BytesMut, ProtocolError> {
        let mut out = BytesMut::new();
        if packet.len() >= self.threshold {
            write_varint(&mut out, packet.len() as i32);
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&packet)?;
            out.extend_from_slice(&encoder.finish()?);
        } else {
            write_varint(&mut out, 0);
            out.extend_from_slice(&packet);
        }
        Ok(out)
    }
}

/// Frame extractor, optional decompression, then a state-scoped packet
/// decoder.
///
/// Unknown ids are dropped. An id that only exists in a state the
/// connection already left is fatal.
pub struct VarIntDecoder<P: Packet<Context = StateContext>> {
    registry: Arc<PacketRegistry<ConnectionState, P>>,
    direction: Direction,
    machine: StateMachine,
    version: ProtocolVersion,
    compression: Option<CompressionStage>,
}

impl<P: Packet<Context = StateContext>> VarIntDecoder<P> {
    pub fn new(
        registry: Arc<PacketRegistry<ConnectionState, P>>,
        direction: Direction,
        version: ProtocolVersion,
    ) -> Self {
        Self {
            registry,
            direction,
            machine: StateMachine::new(),
            version,
            compression: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.current()
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<(), ProtocolError> {
        self.machine.transition(next)
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn enable_compression(&mut self, threshold: i32) {
        self.compression = CompressionStage::new(threshold);
    }

    fn context(&self, state: ConnectionState) -> StateContext {
        StateContext {
            state,
            version: self.version,
        }
    }
}

impl<P: Packet<Context = StateContext>> PacketDecoder for VarIntDecoder<P> {
    type Packet = P;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<P>, ProtocolError> {
        loop {
            let Some(frame) = read_frame(src, MAX_VARINT_FRAME)? else {
                return Ok(None);
            };
            let mut frame = match &self.compression {
                Some(stage) => stage.decompress(frame)?,
                None => frame,
            };
            if frame.is_empty() {
                return Err(ProtocolError::EmptyFrame);
            }
            let id = read_varint(&mut frame)
                .map_err(|source| ProtocolError::Malformed { id: -1, source })?;

            let ctx = self.context(self.machine.current());
            if let Some((kind, decode)) = self.registry.decoder(self.direction, id, &ctx) {
                return match decode(&mut frame, &ctx) {
                    Ok(packet) => {
                        trace!("Read {} in {}", kind, ctx.state);
                        Ok(Some(packet))
                    }
                    Err(source) => {
                        debug!("Malformed {} in {}: {}", kind, ctx.state, hex_dump(&frame, 64));
                        Err(ProtocolError::Malformed { id, source })
                    }
                };
            }

            for &state in self.machine.departed() {
                if self.registry.is_known(self.direction, id, &self.context(state)) {
                    return Err(ProtocolError::DepartedState { id, state });
                }
            }
            debug!(
                "Dropping unknown packet 0x{:02X} in {} ({} bytes)",
                id,
                ctx.state,
                frame.len()
            );
        }
    }
}

pub struct VarIntEncoder<P: Packet<Context = StateContext>> {
    registry: Arc<PacketRegistry<ConnectionState, P>>,
    direction: Direction,
    state: ConnectionState,
    version: ProtocolVersion,
    compression: Option<CompressionStage>,
}

impl<P: Packet<Context = StateContext>> VarIntEncoder<P> {
    pub fn new(
        registry: Arc<PacketRegistry<ConnectionState, P>>,
        direction: Direction,
        version: ProtocolVersion,
    ) -> Self {
        Self {
            registry,
            direction,
            state: ConnectionState::Handshaking,
            version,
            compression: None,
        }
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn enable_compression(&mut self, threshold: i32) {
        self.compression = CompressionStage::new(threshold);
    }
}

impl<P: Packet<Context = StateContext>> PacketEncoder for VarIntEncoder<P> {
    type Packet = P;

    fn encode(&mut self, packet: &P, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let ctx = StateContext {
            state: self.state,
            version: self.version,
        };
        let kind = packet.kind();
        let id = self
            .registry
            .id_of(self.direction, kind, &ctx)
            .ok_or_else(|| ProtocolError::Unregistered {
                kind: kind.to_string(),
                context: format!("{} ({})", ctx.state, ctx.version),
            })?;

        let mut body = BytesMut::new();
        write_varint(&mut body, id);
        packet.encode_body(&mut body, &ctx)?;
        if let Some(stage) = &self.compression {
            body = stage.compress(body)?;
        }
        if body.len() > MAX_VARINT_FRAME {
            return Err(ProtocolError::FrameTooLarge(body.len(), MAX_VARINT_FRAME));
        }

        write_varint(dst, body.len() as i32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl<P: Packet<Context = StateContext>> Connection<VarIntDecoder<P>, VarIntEncoder<P>> {
    /// Move both directions to `next`.
    pub fn transition(&mut self, next: ConnectionState) -> Result<(), ProtocolError> {
        self.decoder_mut().transition(next)?;
        self.encoder_mut().set_state(next);
        Ok(())
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.decoder_mut().set_version(version);
        self.encoder_mut().set_version(version);
    }

    pub fn enable_compression(&mut self, threshold: i32) {
        self.decoder_mut().enable_compression(threshold);
        self.encoder_mut().enable_compression(threshold);
    }
}
