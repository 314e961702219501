use bytes::{BufMut, BytesMut};
use epoch_protocol_core::*;
use epoch_types::BlockPos;
use strum::{Display, EnumDiscriminants};
use uuid::Uuid;

/// Entity metadata terminator; this server never sends metadata entries.
pub const METADATA_END: u8 = 0x7F;

/// Release 1.8 packets, all states.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(VarIntPacketKind), derive(Hash, Display))]
pub enum VarIntPacket {
    // === Handshaking (serverbound) ===
    Handshake {
        protocol_version: i32,
        server_address: String,
        server_port: u16,
        next_state: i32,
    },

    // === Status ===
    StatusRequest,
    StatusResponse {
        json: String,
    },
    PingRequest {
        payload: i64,
    },
    PongResponse {
        payload: i64,
    },

    // === Login (serverbound) ===
    LoginStart {
        name: String,
    },
    EncryptionResponse {
        shared_secret: Vec<u8>,
        verify_token: Vec<u8>,
    },

    // === Login (clientbound) ===
    LoginDisconnect {
        reason: String,
    },
    EncryptionRequest {
        server_id: String,
        public_key: Vec<u8>,
        verify_token: Vec<u8>,
    },
    LoginSuccess {
        uuid: Uuid,
        username: String,
    },
    SetCompression {
        threshold: i32,
    },

    // === Play (both) ===
    KeepAlive {
        id: i32,
    },

    // === Play (clientbound) ===
    JoinGame {
        entity_id: i32,
        game_mode: u8,
        dimension: i8,
        difficulty: u8,
        max_players: u8,
        level_type: String,
        reduced_debug_info: bool,
    },
    ChatMessage {
        json: String,
        position: i8,
    },
    TimeUpdate {
        world_age: i64,
        time_of_day: i64,
    },
    SpawnPosition {
        position: BlockPos,
    },
    UpdateHealth {
        health: f32,
        food: i32,
        saturation: f32,
    },
    PlayerPositionAndLook {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        flags: u8,
    },
    SpawnPlayer {
        entity_id: i32,
        uuid: Uuid,
        x: i32,
        y: i32,
        z: i32,
        yaw: u8,
        pitch: u8,
        current_item: i16,
    },
    DestroyEntities {
        entity_ids: Vec<i32>,
    },
    EntityTeleport {
        entity_id: i32,
        x: i32,
        y: i32,
        z: i32,
        yaw: u8,
        pitch: u8,
        on_ground: bool,
    },
    ChunkData {
        chunk_x: i32,
        chunk_z: i32,
        full_chunk: bool,
        primary_bit_mask: u16,
        data: Vec<u8>,
    },
    BlockChange {
        position: BlockPos,
        block_state: i32,
    },
    BlockBreakAnimation {
        entity_id: i32,
        position: BlockPos,
        stage: i8,
    },
    Disconnect {
        reason: String,
    },

    // === Play (serverbound) ===
    ClientChat {
        message: String,
    },
    PlayerOnGround {
        on_ground: bool,
    },
    PlayerPosition {
        x: f64,
        y: f64,
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
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    PlayerDigging {
        status: u8,
        position: BlockPos,
        face: i8,
    },
    BlockPlacement {
        position: BlockPos,
        face: i8,
        /// Held item id, -1 for an empty hand.
        item: i16,
        cursor_x: u8,
        cursor_y: u8,
        cursor_z: u8,
    },
}

impl Packet for VarIntPacket {
    type Kind = VarIntPacketKind;
    type Context = StateContext;

    fn kind(&self) -> VarIntPacketKind {
        self.into()
    }

    fn encode_body(&self, buf: &mut BytesMut, _: &StateContext) -> CodecResult<()> {
        match self {
            VarIntPacket::Handshake {
                protocol_version,
                server_address,
                server_port,
                next_state,
            } => {
                write_varint(buf, *protocol_version);
                write_string(buf, server_address);
                buf.put_u16(*server_port);
                write_varint(buf, *next_state);
            }

            VarIntPacket::StatusRequest => {}
            VarIntPacket::StatusResponse { json } => write_string(buf, json),
            VarIntPacket::PingRequest { payload } | VarIntPacket::PongResponse { payload } => {
                buf.put_i64(*payload)
            }

            VarIntPacket::LoginStart { name } => write_string(buf, name),
            VarIntPacket::EncryptionResponse {
                shared_secret,
                verify_token,
            } => {
                write_byte_array(buf, shared_secret);
                write_byte_array(buf, verify_token);
            }
            VarIntPacket::LoginDisconnect { reason } => write_string(buf, reason),
            VarIntPacket::EncryptionRequest {
                server_id,
                public_key,
                verify_token,
            } => {
                write_string(buf, server_id);
                write_byte_array(buf, public_key);
                write_byte_array(buf, verify_token);
            }
            VarIntPacket::LoginSuccess { uuid, username } => {
                write_string(buf, &uuid.hyphenated().to_string());
                write_string(buf, username);
            }
            VarIntPacket::SetCompression { threshold } => write_varint(buf, *threshold),

            VarIntPacket::KeepAlive { id } => write_varint(buf, *id),

            VarIntPacket::JoinGame {
                entity_id,
                game_mode,
                dimension,
                difficulty,
                max_players,
                level_type,
                reduced_debug_info,
            } => {
                buf.put_i32(*entity_id);
                buf.put_u8(*game_mode);
                buf.put_i8(*dimension);
                buf.put_u8(*difficulty);
                buf.put_u8(*max_players);
                write_string(buf, level_type);
                buf.put_u8(*reduced_debug_info as u8);
            }
            VarIntPacket::ChatMessage { json, position } => {
                write_string(buf, json);
                buf.put_i8(*position);
            }
            VarIntPacket::TimeUpdate {
                world_age,
                time_of_day,
            } => {
                buf.put_i64(*world_age);
                buf.put_i64(*time_of_day);
            }
            VarIntPacket::SpawnPosition { position } => buf.put_u64(position.encode()),
            VarIntPacket::UpdateHealth {
                health,
                food,
                saturation,
            } => {
                buf.put_f32(*health);
                write_varint(buf, *food);
                buf.put_f32(*saturation);
            }
            VarIntPacket::PlayerPositionAndLook {
                x,
                y,
                z,
                yaw,
                pitch,
                flags,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_u8(*flags);
            }
            VarIntPacket::SpawnPlayer {
                entity_id,
                uuid,
                x,
                y,
                z,
                yaw,
                pitch,
                current_item,
            } => {
                write_varint(buf, *entity_id);
                write_uuid(buf, uuid);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
                buf.put_i16(*current_item);
                buf.put_u8(METADATA_END);
            }
            VarIntPacket::DestroyEntities { entity_ids } => {
                write_varint(buf, entity_ids.len() as i32);
                for id in entity_ids {
                    write_varint(buf, *id);
                }
            }
            VarIntPacket::EntityTeleport {
                entity_id,
                x,
                y,
                z,
                yaw,
                pitch,
                on_ground,
            } => {
                write_varint(buf, *entity_id);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
                buf.put_u8(*on_ground as u8);
            }
            VarIntPacket::ChunkData {
                chunk_x,
                chunk_z,
                full_chunk,
                primary_bit_mask,
                data,
            } => {
                buf.put_i32(*chunk_x);
                buf.put_i32(*chunk_z);
                buf.put_u8(*full_chunk as u8);
                buf.put_u16(*primary_bit_mask);
                write_byte_array(buf, data);
            }
            VarIntPacket::BlockChange {
                position,
                block_state,
            } => {
                buf.put_u64(position.encode());
                write_varint(buf, *block_state);
            }
            VarIntPacket::BlockBreakAnimation {
                entity_id,
                position,
                stage,
            } => {
                write_varint(buf, *entity_id);
                buf.put_u64(position.encode());
                buf.put_i8(*stage);
            }
            VarIntPacket::Disconnect { reason } => write_string(buf, reason),

            VarIntPacket::ClientChat { message } => write_string(buf, message),
            VarIntPacket::PlayerOnGround { on_ground } => buf.put_u8(*on_ground as u8),
            VarIntPacket::PlayerPosition { x, y, z, on_ground } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*z);
                buf.put_u8(*on_ground as u8);
            }
            VarIntPacket::PlayerLook {
                yaw,
                pitch,
                on_ground,
            } => {
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_u8(*on_ground as u8);
            }
            VarIntPacket::PlayerPositionLook {
                x,
                y,
                z,
                yaw,
                pitch,
                on_ground,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_u8(*on_ground as u8);
            }
            VarIntPacket::PlayerDigging {
                status,
                position,
                face,
            } => {
                buf.put_u8(*status);
                buf.put_u64(position.encode());
                buf.put_i8(*face);
            }
            VarIntPacket::BlockPlacement {
                position,
                face,
                item,
                cursor_x,
                cursor_y,
                cursor_z,
            } => {
                buf.put_u64(position.encode());
                buf.put_i8(*face);
                buf.put_i16(*item);
                if *item >= 0 {
                    // count, damage, no NBT
                    buf.put_u8(1);
                    buf.put_i16(0);
                    buf.put_u8(0);
                }
                buf.put_u8(*cursor_x);
                buf.put_u8(*cursor_y);
                buf.put_u8(*cursor_z);
            }
        }
        Ok(())
    }
}

// === Field helpers ===

pub fn read_byte_array(buf: &mut BytesMut, max: usize) -> CodecResult<Vec<u8>> {
    let len = read_varint(buf)?;
    if len < 0 || len as usize > max {
        return Err(CodecError::InvalidValue(format!("byte array of {} bytes", len)));
    }
    Ok(read_bytes(buf, len as usize)?.to_vec())
}

pub fn write_byte_array(buf: &mut BytesMut, data: &[u8]) {
    write_varint(buf, data.len() as i32);
    buf.put_slice(data);
}

/// Read a UUID (128 bits, big endian).
pub fn read_uuid(buf: &mut BytesMut) -> CodecResult<Uuid> {
    let bytes = read_bytes(buf, 16)?;
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&bytes);
    Ok(Uuid::from_bytes(raw))
}

pub fn write_uuid(buf: &mut BytesMut, uuid: &Uuid) {
    buf.put_slice(uuid.as_bytes());
}

pub fn read_position(buf: &mut BytesMut) -> CodecResult<BlockPos> {
    Ok(BlockPos::decode(read_u64(buf)?))
}
