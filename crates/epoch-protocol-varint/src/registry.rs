use crate::packets::*;
use bytes::BytesMut;
use epoch_protocol_core::*;
use uuid::Uuid;

pub type VarIntRegistry = PacketRegistry<ConnectionState, VarIntPacket>;

// === Packet ID constants ===

// Handshaking
pub const HANDSHAKE: i32 = 0x00;

// Status
pub const STATUS_REQUEST: i32 = 0x00;
pub const STATUS_PING: i32 = 0x01;
pub const STATUS_RESPONSE: i32 = 0x00;
pub const STATUS_PONG: i32 = 0x01;

// Login
pub const LOGIN_START: i32 = 0x00;
pub const ENCRYPTION_RESPONSE: i32 = 0x01;
pub const LOGIN_DISCONNECT: i32 = 0x00;
pub const ENCRYPTION_REQUEST: i32 = 0x01;
pub const LOGIN_SUCCESS: i32 = 0x02;
pub const SET_COMPRESSION: i32 = 0x03;

// Play, clientbound
pub const KEEP_ALIVE: i32 = 0x00;
pub const JOIN_GAME: i32 = 0x01;
pub const CHAT_MESSAGE: i32 = 0x02;
pub const TIME_UPDATE: i32 = 0x03;
pub const SPAWN_POSITION: i32 = 0x05;
pub const UPDATE_HEALTH: i32 = 0x06;
pub const PLAYER_POSITION_AND_LOOK: i32 = 0x08;
pub const SPAWN_PLAYER: i32 = 0x0C;
pub const DESTROY_ENTITIES: i32 = 0x13;
pub const ENTITY_TELEPORT: i32 = 0x18;
pub const CHUNK_DATA: i32 = 0x21;
pub const BLOCK_CHANGE: i32 = 0x23;
pub const BLOCK_BREAK_ANIMATION: i32 = 0x25;
pub const DISCONNECT: i32 = 0x40;

// Play, serverbound
pub const CLIENT_KEEP_ALIVE: i32 = 0x00;
pub const CLIENT_CHAT: i32 = 0x01;
pub const PLAYER: i32 = 0x03;
pub const PLAYER_POSITION: i32 = 0x04;
pub const PLAYER_LOOK: i32 = 0x05;
pub const PLAYER_POSITION_LOOK: i32 = 0x06;
pub const PLAYER_DIGGING: i32 = 0x07;
pub const BLOCK_PLACEMENT: i32 = 0x08;

const MAX_NAME: usize = 16;
const MAX_ADDRESS: usize = 255;
const MAX_CHAT: usize = 100;
const MAX_JSON: usize = 32767;
const MAX_KEY: usize = 1024;
const MAX_CHUNK: usize = 1 << 20;

/// Build the release registry. Ids are scoped by connection state.
pub fn build_registry() -> VarIntRegistry {
    use crate::packets::VarIntPacketKind as K;
    use epoch_protocol_core::Direction::{Clientbound as C, Serverbound as S};
    use ConnectionState::*;

    let mut r = VarIntRegistry::new("varint");

    r.register(S, HANDSHAKE, Handshaking, K::Handshake, decode_handshake);

    r.register(S, STATUS_REQUEST, Status, K::StatusRequest, |_, _| Ok(VarIntPacket::StatusRequest))
        .register(S, STATUS_PING, Status, K::PingRequest, |buf, _| {
            Ok(VarIntPacket::PingRequest { payload: read_i64(buf)? })
        })
        .register(C, STATUS_RESPONSE, Status, K::StatusResponse, |buf, _| {
            Ok(VarIntPacket::StatusResponse { json: read_string(buf, MAX_JSON)? })
        })
        .register(C, STATUS_PONG, Status, K::PongResponse, |buf, _| {
            Ok(VarIntPacket::PongResponse { payload: read_i64(buf)? })
        });

    r.register(S, LOGIN_START, Login, K::LoginStart, |buf, _| {
        Ok(VarIntPacket::LoginStart { name: read_string(buf, MAX_NAME)? })
    })
    .register(S, ENCRYPTION_RESPONSE, Login, K::EncryptionResponse, decode_encryption_response)
    .register(C, LOGIN_DISCONNECT, Login, K::LoginDisconnect, |buf, _| {
        Ok(VarIntPacket::LoginDisconnect { reason: read_string(buf, MAX_JSON)? })
    })
    .register(C, ENCRYPTION_REQUEST, Login, K::EncryptionRequest, decode_encryption_request)
    .register(C, LOGIN_SUCCESS, Login, K::LoginSuccess, decode_login_success)
    .register(C, SET_COMPRESSION, Login, K::SetCompression, |buf, _| {
        Ok(VarIntPacket::SetCompression { threshold: read_varint(buf)? })
    });

    r.register(C, KEEP_ALIVE, Play, K::KeepAlive, decode_keep_alive)
        .register(C, JOIN_GAME, Play, K::JoinGame, decode_join_game)
        .register(C, CHAT_MESSAGE, Play, K::ChatMessage, |buf, _| {
            Ok(VarIntPacket::ChatMessage {
                json: read_string(buf, MAX_JSON)?,
                position: read_i8(buf)?,
            })
        })
        .register(C, TIME_UPDATE, Play, K::TimeUpdate, |buf, _| {
            Ok(VarIntPacket::TimeUpdate {
                world_age: read_i64(buf)?,
                time_of_day: read_i64(buf)?,
            })
        })
        .register(C, SPAWN_POSITION, Play, K::SpawnPosition, |buf, _| {
            Ok(VarIntPacket::SpawnPosition { position: read_position(buf)? })
        })
        .register(C, UPDATE_HEALTH, Play, K::UpdateHealth, |buf, _| {
            Ok(VarIntPacket::UpdateHealth {
                health: read_f32(buf)?,
                food: read_varint(buf)?,
                saturation: read_f32(buf)?,
            })
        })
        .register(C, PLAYER_POSITION_AND_LOOK, Play, K::PlayerPositionAndLook, decode_position_and_look)
        .register(C, SPAWN_PLAYER, Play, K::SpawnPlayer, decode_spawn_player)
        .register(C, DESTROY_ENTITIES, Play, K::DestroyEntities, decode_destroy_entities)
        .register(C, ENTITY_TELEPORT, Play, K::EntityTeleport, decode_entity_teleport)
        .register(C, CHUNK_DATA, Play, K::ChunkData, decode_chunk_data)
        .register(C, BLOCK_CHANGE, Play, K::BlockChange, |buf, _| {
            Ok(VarIntPacket::BlockChange {
                position: read_position(buf)?,
                block_state: read_varint(buf)?,
            })
        })
        .register(C, BLOCK_BREAK_ANIMATION, Play, K::BlockBreakAnimation, |buf, _| {
            Ok(VarIntPacket::BlockBreakAnimation {
                entity_id: read_varint(buf)?,
                position: read_position(buf)?,
                stage: read_i8(buf)?,
            })
        })
        .register(C, DISCONNECT, Play, K::Disconnect, |buf, _| {
            Ok(VarIntPacket::Disconnect { reason: read_string(buf, MAX_JSON)? })
        });

    r.register(S, CLIENT_KEEP_ALIVE, Play, K::KeepAlive, decode_keep_alive)
        .register(S, CLIENT_CHAT, Play, K::ClientChat, |buf, _| {
            Ok(VarIntPacket::ClientChat { message: read_string(buf, MAX_CHAT)? })
        })
        .register(S, PLAYER, Play, K::PlayerOnGround, |buf, _| {
            Ok(VarIntPacket::PlayerOnGround { on_ground: read_bool(buf)? })
        })
        .register(S, PLAYER_POSITION, Play, K::PlayerPosition, |buf, _| {
            Ok(VarIntPacket::PlayerPosition {
                x: read_f64(buf)?,
                y: read_f64(buf)?,
                z: read_f64(buf)?,
                on_ground: read_bool(buf)?,
            })
        })
        .register(S, PLAYER_LOOK, Play, K::PlayerLook, |buf, _| {
            Ok(VarIntPacket::PlayerLook {
                yaw: read_f32(buf)?,
                pitch: read_f32(buf)?,
                on_ground: read_bool(buf)?,
            })
        })
        .register(S, PLAYER_POSITION_LOOK, Play, K::PlayerPositionLook, decode_player_position_look)
        .register(S, PLAYER_DIGGING, Play, K::PlayerDigging, |buf, _| {
            Ok(VarIntPacket::PlayerDigging {
                status: read_u8(buf)?,
                position: read_position(buf)?,
                face: read_i8(buf)?,
            })
        })
        .register(S, BLOCK_PLACEMENT, Play, K::BlockPlacement, decode_block_placement);

    r
}

// === Decode functions ===

fn decode_handshake(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    Ok(VarIntPacket::Handshake {
        protocol_version: read_varint(buf)?,
        server_address: read_string(buf, MAX_ADDRESS)?,
        server_port: read_u16(buf)?,
        next_state: read_varint(buf)?,
    })
}

fn decode_encryption_response(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    Ok(VarIntPacket::EncryptionResponse {
        shared_secret: read_byte_array(buf, MAX_KEY)?,
        verify_token: read_byte_array(buf, MAX_KEY)?,
    })
}

fn decode_encryption_request(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    Ok(VarIntPacket::EncryptionRequest {
        server_id: read_string(buf, 20)?,
        public_key: read_byte_array(buf, MAX_KEY)?,
        verify_token: read_byte_array(buf, MAX_KEY)?,
    })
}

fn decode_login_success(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    let text = read_string(buf, 36)?;
    let uuid = Uuid::parse_str(&text)
        .map_err(|e| CodecError::InvalidValue(format!("uuid {:?}: {}", text, e)))?;
    Ok(VarIntPacket::LoginSuccess {
        uuid,
        username: read_string(buf, MAX_NAME)?,
    })
}

fn decode_keep_alive(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    Ok(VarIntPacket::KeepAlive { id: read_varint(buf)? })
}

fn decode_join_game(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    Ok(VarIntPacket::JoinGame {
        entity_id: read_i32(buf)?,
        game_mode: read_u8(buf)?,
        dimension: read_i8(buf)?,
        difficulty: read_u8(buf)?,
        max_players: read_u8(buf)?,
        level_type: read_string(buf, 16)?,
        reduced_debug_info: read_bool(buf)?,
    })
}

fn decode_position_and_look(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    Ok(VarIntPacket::PlayerPositionAndLook {
        x: read_f64(buf)?,
        y: read_f64(buf)?,
        z: read_f64(buf)?,
        yaw: read_f32(buf)?,
        pitch: read_f32(buf)?,
        flags: read_u8(buf)?,
    })
}

fn decode_spawn_player(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    let packet = VarIntPacket::SpawnPlayer {
        entity_id: read_varint(buf)?,
        uuid: read_uuid(buf)?,
        x: read_i32(buf)?,
        y: read_i32(buf)?,
        z: read_i32(buf)?,
        yaw: read_u8(buf)?,
        pitch: read_u8(buf)?,
        current_item: read_i16(buf)?,
    };
    // Skip metadata entries up to the terminator.
    while read_u8(buf)? != METADATA_END {}
    Ok(packet)
}

fn decode_destroy_entities(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    let count = read_varint(buf)?;
    if count < 0 || count as usize > buf.len() {
        return Err(CodecError::InvalidValue(format!("{} entity ids", count)));
    }
    let entity_ids = (0..count)
        .map(|_| read_varint(buf))
        .collect::<CodecResult<Vec<_>>>()?;
    Ok(VarIntPacket::DestroyEntities { entity_ids })
}

fn decode_entity_teleport(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    Ok(VarIntPacket::EntityTeleport {
        entity_id: read_varint(buf)?,
        x: read_i32(buf)?,
        y: read_i32(buf)?,
        z: read_i32(buf)?,
        yaw: read_u8(buf)?,
        pitch: read_u8(buf)?,
        on_ground: read_bool(buf)?,
    })
}

fn decode_chunk_data(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    Ok(VarIntPacket::ChunkData {
        chunk_x: read_i32(buf)?,
        chunk_z: read_i32(buf)?,
        full_chunk: read_bool(buf)?,
        primary_bit_mask: read_u16(buf)?,
        data: read_byte_array(buf, MAX_CHUNK)?,
    })
}

fn decode_player_position_look(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    Ok(VarIntPacket::PlayerPositionLook {
        x: read_f64(buf)?,
        y: read_f64(buf)?,
        z: read_f64(buf)?,
        yaw: read_f32(buf)?,
        pitch: read_f32(buf)?,
        on_ground: read_bool(buf)?,
    })
}

fn decode_block_placement(buf: &mut BytesMut, _: &StateContext) -> CodecResult<VarIntPacket> {
    let position = read_position(buf)?;
    let face = read_i8(buf)?;
    let item = read_i16(buf)?;
    if item >= 0 {
        let _count = read_u8(buf)?;
        let _damage = read_i16(buf)?;
        // A single TAG_End byte means no NBT; anything richer is refused.
        if read_u8(buf)? != 0 {
            return Err(CodecError::InvalidValue("item NBT is not supported".into()));
        }
    }
    Ok(VarIntPacket::BlockPlacement {
        position,
        face,
        item,
        cursor_x: read_u8(buf)?,
        cursor_y: read_u8(buf)?,
        cursor_z: read_u8(buf)?,
    })
}
