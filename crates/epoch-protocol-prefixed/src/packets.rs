use bytes::{BufMut, BytesMut};
use epoch_protocol_core::*;
use epoch_version::{ProtocolVersion, PE_0_7_0};
use strum::{Display, EnumDiscriminants};

/// Packets of the original prototype and the mobile line.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(PrefixedPacketKind), derive(Hash, Display))]
pub enum PrefixedPacket {
    // === Shared ===
    KeepAlive {
        id: i64,
    },
    Disconnect {
        reason: String,
    },

    // === Original prototype ===
    OriginalLogin {
        protocol: i32,
        username: String,
    },
    LoginAccepted {
        player_id: i32,
        x: f32,
        y: f32,
        z: f32,
    },
    LevelData {
        width: u16,
        height: u16,
        depth: u16,
        /// zlib-compressed block ids, x fastest then z then y.
        blocks: Vec<u8>,
    },
    SetBlock {
        x: i16,
        y: i16,
        z: i16,
        block: u8,
    },
    PlayerMove {
        player_id: i32,
        x: f32,
        y: f32,
        z: f32,
        yaw: f32,
        pitch: f32,
    },

    // === Mobile ===
    MobileLogin {
        username: String,
        protocol: i32,
        protocol2: i32,
    },
    LoginStatus {
        status: i32,
    },
    Ready {
        status: u8,
    },
    Message {
        message: String,
    },
    SetTime {
        time: i32,
        /// Only on the wire from pe-0.7.0.
        started: bool,
    },
    StartGame {
        seed: i32,
        generator: i32,
        game_mode: i32,
        entity_id: i32,
        x: f32,
        y: f32,
        z: f32,
    },
    AddPlayer {
        client_id: i64,
        username: String,
        entity_id: i32,
        x: f32,
        y: f32,
        z: f32,
        yaw: i8,
        pitch: i8,
    },
    RemovePlayer {
        entity_id: i32,
        client_id: i64,
    },
    MovePlayer {
        entity_id: i32,
        x: f32,
        y: f32,
        z: f32,
        yaw: f32,
        pitch: f32,
    },
    RemoveBlock {
        entity_id: i32,
        x: i32,
        z: i32,
        y: u8,
    },
    UpdateBlock {
        x: i32,
        z: i32,
        y: u8,
        block: u8,
        meta: u8,
    },
    UseItem {
        x: i32,
        y: i32,
        z: i32,
        face: i32,
        item: i16,
        meta: u8,
    },
    SetHealth {
        health: u8,
    },
    ChunkData {
        chunk_x: i32,
        chunk_z: i32,
        /// zlib-compressed column.
        data: Vec<u8>,
    },
}

impl Packet for PrefixedPacket {
    type Kind = PrefixedPacketKind;
    type Context = ProtocolVersion;

    fn kind(&self) -> PrefixedPacketKind {
        self.into()
    }

    fn encode_body(&self, buf: &mut BytesMut, version: &ProtocolVersion) -> CodecResult<()> {
        match self {
            PrefixedPacket::KeepAlive { id } => buf.put_i64(*id),
            PrefixedPacket::Disconnect { reason } => write_short_string(buf, reason),

            PrefixedPacket::OriginalLogin { protocol, username } => {
                buf.put_i32(*protocol);
                write_short_string(buf, username);
            }
            PrefixedPacket::LoginAccepted { player_id, x, y, z } => {
                buf.put_i32(*player_id);
                buf.put_f32(*x);
                buf.put_f32(*y);
                buf.put_f32(*z);
            }
            PrefixedPacket::LevelData {
                width,
                height,
                depth,
                blocks,
            } => {
                buf.put_u16(*width);
                buf.put_u16(*height);
                buf.put_u16(*depth);
                put_blob(buf, blocks);
            }
            PrefixedPacket::SetBlock { x, y, z, block } => {
                buf.put_i16(*x);
                buf.put_i16(*y);
                buf.put_i16(*z);
                buf.put_u8(*block);
            }
            PrefixedPacket::PlayerMove {
                player_id,
                x,
                y,
                z,
                yaw,
                pitch,
            } => {
                buf.put_i32(*player_id);
                buf.put_f32(*x);
                buf.put_f32(*y);
                buf.put_f32(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
            }

            PrefixedPacket::MobileLogin {
                username,
                protocol,
                protocol2,
            } => {
                write_short_string(buf, username);
                buf.put_i32(*protocol);
                buf.put_i32(*protocol2);
            }
            PrefixedPacket::LoginStatus { status } => buf.put_i32(*status),
            PrefixedPacket::Ready { status } => buf.put_u8(*status),
            PrefixedPacket::Message { message } => write_short_string(buf, message),
            PrefixedPacket::SetTime { time, started } => {
                buf.put_i32(*time);
                if version.is_at_least(&PE_0_7_0) {
                    buf.put_u8(*started as u8);
                }
            }
            PrefixedPacket::StartGame {
                seed,
                generator,
                game_mode,
                entity_id,
                x,
                y,
                z,
            } => {
                buf.put_i32(*seed);
                buf.put_i32(*generator);
                buf.put_i32(*game_mode);
                buf.put_i32(*entity_id);
                buf.put_f32(*x);
                buf.put_f32(*y);
                buf.put_f32(*z);
            }
            PrefixedPacket::AddPlayer {
                client_id,
                username,
                entity_id,
                x,
                y,
                z,
                yaw,
                pitch,
            } => {
                buf.put_i64(*client_id);
                write_short_string(buf, username);
                buf.put_i32(*entity_id);
                buf.put_f32(*x);
                buf.put_f32(*y);
                buf.put_f32(*z);
                buf.put_i8(*yaw);
                buf.put_i8(*pitch);
            }
            PrefixedPacket::RemovePlayer {
                entity_id,
                client_id,
            } => {
                buf.put_i32(*entity_id);
                buf.put_i64(*client_id);
            }
            PrefixedPacket::MovePlayer {
                entity_id,
                x,
                y,
                z,
                yaw,
                pitch,
            } => {
                buf.put_i32(*entity_id);
                buf.put_f32(*x);
                buf.put_f32(*y);
                buf.put_f32(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
            }
            PrefixedPacket::RemoveBlock { entity_id, x, z, y } => {
                buf.put_i32(*entity_id);
                buf.put_i32(*x);
                buf.put_i32(*z);
                buf.put_u8(*y);
            }
            PrefixedPacket::UpdateBlock {
                x,
                z,
                y,
                block,
                meta,
            } => {
                buf.put_i32(*x);
                buf.put_i32(*z);
                buf.put_u8(*y);
                buf.put_u8(*block);
                buf.put_u8(*meta);
            }
            PrefixedPacket::UseItem {
                x,
                y,
                z,
                face,
                item,
                meta,
            } => {
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_i32(*face);
                buf.put_i16(*item);
                buf.put_u8(*meta);
            }
            PrefixedPacket::SetHealth { health } => buf.put_u8(*health),
            PrefixedPacket::ChunkData {
                chunk_x,
                chunk_z,
                data,
            } => {
                buf.put_i32(*chunk_x);
                buf.put_i32(*chunk_z);
                put_blob(buf, data);
            }
        }
        Ok(())
    }
}

fn put_blob(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}
