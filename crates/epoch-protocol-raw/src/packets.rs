use bytes::{BufMut, BytesMut};
use epoch_protocol_core::*;
use epoch_version::{Capability, ProtocolVersion, B1_8};
use strum::{Display, EnumDiscriminants};

/// Classic level chunks always carry this many bytes.
pub const LEVEL_CHUNK_LEN: usize = 1024;

/// Every packet the raw scheme knows, across classic, alpha and beta.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(RawPacketKind), derive(Hash, Display))]
pub enum RawPacket {
    // === Classic ===
    ClassicIdentification {
        protocol: u8,
        name: String,
        /// Verification key from the client, MOTD from the server.
        key: String,
        user_type: u8,
    },
    ClassicPing,
    LevelInitialize,
    LevelDataChunk {
        length: i16,
        data: Vec<u8>,
        percent: u8,
    },
    LevelFinalize {
        x: i16,
        y: i16,
        z: i16,
    },
    ClassicSetBlockRequest {
        x: i16,
        y: i16,
        z: i16,
        /// 0 = destroy, 1 = create.
        mode: u8,
        block: u8,
    },
    ClassicSetBlock {
        x: i16,
        y: i16,
        z: i16,
        block: u8,
    },
    ClassicSpawnPlayer {
        player_id: i8,
        name: String,
        x: i16,
        y: i16,
        z: i16,
        yaw: u8,
        pitch: u8,
    },
    ClassicPosition {
        player_id: i8,
        x: i16,
        y: i16,
        z: i16,
        yaw: u8,
        pitch: u8,
    },
    ClassicDespawn {
        player_id: i8,
    },
    ClassicMessage {
        player_id: i8,
        message: String,
    },
    ClassicDisconnect {
        reason: String,
    },

    // === Alpha / Beta ===
    KeepAlive,
    /// Protocol number in `entity_id` when serverbound.
    Login {
        entity_id: i32,
        username: String,
        seed: i64,
        game_mode: i32,
        dimension: i8,
        difficulty: i8,
        world_height: u8,
        max_players: u8,
    },
    /// Username when serverbound, connection hash when clientbound.
    Handshake {
        text: String,
    },
    Chat {
        message: String,
    },
    TimeUpdate {
        time: i64,
    },
    SpawnPosition {
        x: i32,
        y: i32,
        z: i32,
    },
    UpdateHealth {
        health: i16,
        food: i16,
        saturation: f32,
    },
    Flying {
        on_ground: bool,
    },
    PlayerPosition {
        x: f64,
        y: f64,
        stance: f64,
        z: f64,
        on_ground: bool,
    },
    PlayerLook {
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    PlayerPositionLook {
        x: f64,
        y: f64,
        stance: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    PlayerDigging {
        status: i8,
        x: i32,
        y: i8,
        z: i32,
        face: i8,
    },
    BlockPlacement {
        x: i32,
        y: i8,
        z: i32,
        face: i8,
        /// -1 for an empty hand.
        item: i16,
        amount: u8,
        damage: i16,
    },
    NamedEntitySpawn {
        entity_id: i32,
        name: String,
        x: i32,
        y: i32,
        z: i32,
        yaw: i8,
        pitch: i8,
        item: i16,
    },
    DestroyEntity {
        entity_id: i32,
    },
    EntityTeleport {
        entity_id: i32,
        x: i32,
        y: i32,
        z: i32,
        yaw: i8,
        pitch: i8,
    },
    PreChunk {
        x: i32,
        z: i32,
        load: bool,
    },
    MapChunk {
        x: i32,
        y: i16,
        z: i32,
        size_x: u8,
        size_y: u8,
        size_z: u8,
        /// zlib-compressed block, metadata and light arrays.
        data: Vec<u8>,
    },
    BlockChange {
        x: i32,
        y: i8,
        z: i32,
        block: u8,
        metadata: u8,
    },
    ServerListPing,
    Disconnect {
        reason: String,
    },
}

impl Packet for RawPacket {
    type Kind = RawPacketKind;
    type Context = ProtocolVersion;

    fn kind(&self) -> RawPacketKind {
        self.into()
    }

    fn encode_body(&self, buf: &mut BytesMut, version: &ProtocolVersion) -> CodecResult<()> {
        match self {
            RawPacket::ClassicIdentification {
                protocol,
                name,
                key,
                user_type,
            } => {
                buf.put_u8(*protocol);
                write_classic_string(buf, name);
                write_classic_string(buf, key);
                buf.put_u8(*user_type);
            }
            RawPacket::ClassicPing | RawPacket::LevelInitialize => {}
            RawPacket::LevelDataChunk {
                length,
                data,
                percent,
            } => {
                if data.len() > LEVEL_CHUNK_LEN {
                    return Err(CodecError::InvalidValue(format!(
                        "level chunk of {} bytes",
                        data.len()
                    )));
                }
                buf.put_i16(*length);
                buf.put_slice(data);
                buf.put_bytes(0, LEVEL_CHUNK_LEN - data.len());
                buf.put_u8(*percent);
            }
            RawPacket::LevelFinalize { x, y, z } => {
                buf.put_i16(*x);
                buf.put_i16(*y);
                buf.put_i16(*z);
            }
            RawPacket::ClassicSetBlockRequest {
                x,
                y,
                z,
                mode,
                block,
            } => {
                buf.put_i16(*x);
                buf.put_i16(*y);
                buf.put_i16(*z);
                buf.put_u8(*mode);
                buf.put_u8(*block);
            }
            RawPacket::ClassicSetBlock { x, y, z, block } => {
                buf.put_i16(*x);
                buf.put_i16(*y);
                buf.put_i16(*z);
                buf.put_u8(*block);
            }
            RawPacket::ClassicSpawnPlayer {
                player_id,
                name,
                x,
                y,
                z,
                yaw,
                pitch,
            } => {
                buf.put_i8(*player_id);
                write_classic_string(buf, name);
                buf.put_i16(*x);
                buf.put_i16(*y);
                buf.put_i16(*z);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
            }
            RawPacket::ClassicPosition {
                player_id,
                x,
                y,
                z,
                yaw,
                pitch,
            } => {
                buf.put_i8(*player_id);
                buf.put_i16(*x);
                buf.put_i16(*y);
                buf.put_i16(*z);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
            }
            RawPacket::ClassicDespawn { player_id } => buf.put_i8(*player_id),
            RawPacket::ClassicMessage { player_id, message } => {
                buf.put_i8(*player_id);
                write_classic_string(buf, message);
            }
            RawPacket::ClassicDisconnect { reason } => write_classic_string(buf, reason),

            RawPacket::KeepAlive | RawPacket::ServerListPing => {}
            RawPacket::Login {
                entity_id,
                username,
                seed,
                game_mode,
                dimension,
                difficulty,
                world_height,
                max_players,
            } => {
                buf.put_i32(*entity_id);
                write_text(buf, username, version);
                buf.put_i64(*seed);
                if version.is_at_least(&B1_8) {
                    buf.put_i32(*game_mode);
                    buf.put_i8(*dimension);
                    buf.put_i8(*difficulty);
                    buf.put_u8(*world_height);
                    buf.put_u8(*max_players);
                } else {
                    buf.put_i8(*dimension);
                }
            }
            RawPacket::Handshake { text } => write_text(buf, text, version),
            RawPacket::Chat { message } => write_text(buf, message, version),
            RawPacket::TimeUpdate { time } => buf.put_i64(*time),
            RawPacket::SpawnPosition { x, y, z } => {
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
            }
            RawPacket::UpdateHealth {
                health,
                food,
                saturation,
            } => {
                buf.put_i16(*health);
                if Capability::Hunger.is_available_in(version) {
                    buf.put_i16(*food);
                    buf.put_f32(*saturation);
                }
            }
            RawPacket::Flying { on_ground } => buf.put_u8(*on_ground as u8),
            RawPacket::PlayerPosition {
                x,
                y,
                stance,
                z,
                on_ground,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*stance);
                buf.put_f64(*z);
                buf.put_u8(*on_ground as u8);
            }
            RawPacket::PlayerLook {
                yaw,
                pitch,
                on_ground,
            } => {
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_u8(*on_ground as u8);
            }
            RawPacket::PlayerPositionLook {
                x,
                y,
                stance,
                z,
                yaw,
                pitch,
                on_ground,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*stance);
                buf.put_f64(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_u8(*on_ground as u8);
            }
            RawPacket::PlayerDigging {
                status,
                x,
                y,
                z,
                face,
            } => {
                buf.put_i8(*status);
                buf.put_i32(*x);
                buf.put_i8(*y);
                buf.put_i32(*z);
                buf.put_i8(*face);
            }
            RawPacket::BlockPlacement {
                x,
                y,
                z,
                face,
                item,
                amount,
                damage,
            } => {
                buf.put_i32(*x);
                buf.put_i8(*y);
                buf.put_i32(*z);
                buf.put_i8(*face);
                buf.put_i16(*item);
                if *item >= 0 {
                    buf.put_u8(*amount);
                    buf.put_i16(*damage);
                }
            }
            RawPacket::NamedEntitySpawn {
                entity_id,
                name,
                x,
                y,
                z,
                yaw,
                pitch,
                item,
            } => {
                buf.put_i32(*entity_id);
                write_text(buf, name, version);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_i8(*yaw);
                buf.put_i8(*pitch);
                buf.put_i16(*item);
            }
            RawPacket::DestroyEntity { entity_id } => buf.put_i32(*entity_id),
            RawPacket::EntityTeleport {
                entity_id,
                x,
                y,
                z,
                yaw,
                pitch,
            } => {
                buf.put_i32(*entity_id);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_i8(*yaw);
                buf.put_i8(*pitch);
            }
            RawPacket::PreChunk { x, z, load } => {
                buf.put_i32(*x);
                buf.put_i32(*z);
                buf.put_u8(*load as u8);
            }
            RawPacket::MapChunk {
                x,
                y,
                z,
                size_x,
                size_y,
                size_z,
                data,
            } => {
                buf.put_i32(*x);
                buf.put_i16(*y);
                buf.put_i32(*z);
                // Sizes travel as size - 1.
                buf.put_u8(size_x.wrapping_sub(1));
                buf.put_u8(size_y.wrapping_sub(1));
                buf.put_u8(size_z.wrapping_sub(1));
                buf.put_i32(data.len() as i32);
                buf.put_slice(data);
            }
            RawPacket::BlockChange {
                x,
                y,
                z,
                block,
                metadata,
            } => {
                buf.put_i32(*x);
                buf.put_i8(*y);
                buf.put_i32(*z);
                buf.put_u8(*block);
                buf.put_u8(*metadata);
            }
            RawPacket::Disconnect { reason } => write_text(buf, reason, version),
        }
        Ok(())
    }
}

/// Alpha/beta text: u16 byte length + UTF-8 until wide strings arrive,
/// u16 char count + UTF-16BE afterwards.
pub fn read_text(buf: &mut BytesMut, version: &ProtocolVersion, max: usize) -> CodecResult<String> {
    if Capability::WideStrings.is_available_in(version) {
        read_string16(buf, max)
    } else {
        read_short_string(buf, max)
    }
}

pub fn write_text(buf: &mut BytesMut, text: &str, version: &ProtocolVersion) {
    if Capability::WideStrings.is_available_in(version) {
        write_string16(buf, text);
    } else {
        write_short_string(buf, text);
    }
}
