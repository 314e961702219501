use crate::packets::*;
use bytes::BytesMut;
use epoch_protocol_core::*;
use epoch_version::{Capability, Family, ProtocolVersion, PE_0_7_0, RD_160052};

pub type PrefixedRegistry = PacketRegistry<VersionRange, PrefixedPacket>;

// === Packet ID constants ===

// Original prototype
pub const ORIGINAL_LOGIN: i32 = 0x01;
pub const ORIGINAL_LOGIN_ACCEPTED: i32 = 0x02;
pub const ORIGINAL_LEVEL_DATA: i32 = 0x03;
pub const ORIGINAL_SET_BLOCK: i32 = 0x04;
pub const ORIGINAL_PLAYER_MOVE: i32 = 0x05;
pub const ORIGINAL_KEEP_ALIVE: i32 = 0x06;
pub const ORIGINAL_DISCONNECT: i32 = 0x08;

// Mobile
pub const MOBILE_KEEP_ALIVE: i32 = 0x00;
pub const MOBILE_DISCONNECT: i32 = 0x15;
pub const MOBILE_LOGIN: i32 = 0x82;
pub const MOBILE_LOGIN_STATUS: i32 = 0x83;
pub const MOBILE_READY: i32 = 0x84;
pub const MOBILE_MESSAGE: i32 = 0x85;
pub const MOBILE_SET_TIME: i32 = 0x86;
pub const MOBILE_START_GAME: i32 = 0x87;
pub const MOBILE_ADD_PLAYER: i32 = 0x89;
pub const MOBILE_REMOVE_PLAYER: i32 = 0x8A;
pub const MOBILE_MOVE_PLAYER: i32 = 0x94;
pub const MOBILE_REMOVE_BLOCK: i32 = 0x96;
pub const MOBILE_UPDATE_BLOCK: i32 = 0x97;
pub const MOBILE_USE_ITEM: i32 = 0x98;
pub const MOBILE_CHUNK_DATA: i32 = 0x9E;
pub const MOBILE_SET_HEALTH: i32 = 0xAA;

const MAX_NAME: usize = 16;
const MAX_TEXT: usize = 256;

/// Build the length-prefixed registry. The packet set varies by family and
/// version; the framing does not.
pub fn build_registry() -> PrefixedRegistry {
    use crate::packets::PrefixedPacketKind as K;
    use epoch_protocol_core::Direction::{Clientbound as C, Serverbound as S};

    let original = VersionRange::family(Family::Original);
    let mobile = VersionRange::family(Family::Mobile);

    let mut r = PrefixedRegistry::new("prefixed");

    // Original prototype
    r.register(S, ORIGINAL_LOGIN, original.clone(), K::OriginalLogin, decode_original_login)
        .register(C, ORIGINAL_LOGIN_ACCEPTED, original.clone(), K::LoginAccepted, decode_login_accepted)
        .register(C, ORIGINAL_LEVEL_DATA, original.clone(), K::LevelData, decode_level_data)
        .register(C, ORIGINAL_DISCONNECT, original.clone(), K::Disconnect, decode_disconnect);
    for dir in [S, C] {
        r.register(dir, ORIGINAL_SET_BLOCK, original.clone(), K::SetBlock, decode_set_block)
            .register(dir, ORIGINAL_PLAYER_MOVE, original.clone(), K::PlayerMove, decode_player_move)
            // rd-132328 had no liveness check.
            .register(dir, ORIGINAL_KEEP_ALIVE, original.clone().since(RD_160052), K::KeepAlive, decode_keep_alive);
    }

    // Mobile
    r.register(S, MOBILE_LOGIN, mobile.clone(), K::MobileLogin, decode_mobile_login)
        .register(S, MOBILE_READY, mobile.clone(), K::Ready, |buf, _| {
            Ok(PrefixedPacket::Ready { status: read_u8(buf)? })
        })
        .register(S, MOBILE_REMOVE_BLOCK, mobile.clone(), K::RemoveBlock, decode_remove_block)
        .register(S, MOBILE_USE_ITEM, mobile.clone(), K::UseItem, decode_use_item)
        .register(C, MOBILE_LOGIN_STATUS, mobile.clone(), K::LoginStatus, |buf, _| {
            Ok(PrefixedPacket::LoginStatus { status: read_i32(buf)? })
        })
        .register(C, MOBILE_SET_TIME, mobile.clone(), K::SetTime, decode_set_time)
        .register(C, MOBILE_START_GAME, mobile.clone(), K::StartGame, decode_start_game)
        .register(C, MOBILE_ADD_PLAYER, mobile.clone(), K::AddPlayer, decode_add_player)
        .register(C, MOBILE_REMOVE_PLAYER, mobile.clone(), K::RemovePlayer, |buf, _| {
            Ok(PrefixedPacket::RemovePlayer {
                entity_id: read_i32(buf)?,
                client_id: read_i64(buf)?,
            })
        })
        .register(C, MOBILE_UPDATE_BLOCK, mobile.clone(), K::UpdateBlock, decode_update_block)
        .register(C, MOBILE_CHUNK_DATA, mobile.clone(), K::ChunkData, decode_chunk_data)
        .register(C, MOBILE_SET_HEALTH, mobile.clone().requires(Capability::Health), K::SetHealth, |buf, _| {
            Ok(PrefixedPacket::SetHealth { health: read_u8(buf)? })
        })
        .register(C, MOBILE_DISCONNECT, mobile.clone(), K::Disconnect, decode_disconnect);
    for dir in [S, C] {
        r.register(dir, MOBILE_KEEP_ALIVE, mobile.clone(), K::KeepAlive, decode_keep_alive)
            .register(dir, MOBILE_MESSAGE, mobile.clone(), K::Message, |buf, _| {
                Ok(PrefixedPacket::Message { message: read_short_string(buf, MAX_TEXT)? })
            })
            .register(dir, MOBILE_MOVE_PLAYER, mobile.clone(), K::MovePlayer, decode_move_player);
    }

    r
}

// === Decode functions ===

fn read_blob(buf: &mut BytesMut) -> CodecResult<Vec<u8>> {
    let len = read_u32(buf)? as usize;
    Ok(read_bytes(buf, len)?.to_vec())
}

fn decode_keep_alive(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::KeepAlive { id: read_i64(buf)? })
}

fn decode_disconnect(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::Disconnect {
        reason: read_short_string(buf, MAX_TEXT)?,
    })
}

fn decode_original_login(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::OriginalLogin {
        protocol: read_i32(buf)?,
        username: read_short_string(buf, MAX_NAME)?,
    })
}

fn decode_login_accepted(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::LoginAccepted {
        player_id: read_i32(buf)?,
        x: read_f32(buf)?,
        y: read_f32(buf)?,
        z: read_f32(buf)?,
    })
}

fn decode_level_data(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::LevelData {
        width: read_u16(buf)?,
        height: read_u16(buf)?,
        depth: read_u16(buf)?,
        blocks: read_blob(buf)?,
    })
}

fn decode_set_block(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::SetBlock {
        x: read_i16(buf)?,
        y: read_i16(buf)?,
        z: read_i16(buf)?,
        block: read_u8(buf)?,
    })
}

fn decode_player_move(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::PlayerMove {
        player_id: read_i32(buf)?,
        x: read_f32(buf)?,
        y: read_f32(buf)?,
        z: read_f32(buf)?,
        yaw: read_f32(buf)?,
        pitch: read_f32(buf)?,
    })
}

fn decode_mobile_login(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::MobileLogin {
        username: read_short_string(buf, MAX_NAME)?,
        protocol: read_i32(buf)?,
        protocol2: read_i32(buf)?,
    })
}

fn decode_set_time(buf: &mut BytesMut, version: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    let time = read_i32(buf)?;
    let started = if version.is_at_least(&PE_0_7_0) {
        read_bool(buf)?
    } else {
        true
    };
    Ok(PrefixedPacket::SetTime { time, started })
}

fn decode_start_game(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::StartGame {
        seed: read_i32(buf)?,
        generator: read_i32(buf)?,
        game_mode: read_i32(buf)?,
        entity_id: read_i32(buf)?,
        x: read_f32(buf)?,
        y: read_f32(buf)?,
        z: read_f32(buf)?,
    })
}

fn decode_add_player(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::AddPlayer {
        client_id: read_i64(buf)?,
        username: read_short_string(buf, MAX_NAME)?,
        entity_id: read_i32(buf)?,
        x: read_f32(buf)?,
        y: read_f32(buf)?,
        z: read_f32(buf)?,
        yaw: read_i8(buf)?,
        pitch: read_i8(buf)?,
    })
}

fn decode_move_player(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::MovePlayer {
        entity_id: read_i32(buf)?,
        x: read_f32(buf)?,
        y: read_f32(buf)?,
        z: read_f32(buf)?,
        yaw: read_f32(buf)?,
        pitch: read_f32(buf)?,
    })
}

fn decode_remove_block(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::RemoveBlock {
        entity_id: read_i32(buf)?,
        x: read_i32(buf)?,
        z: read_i32(buf)?,
        y: read_u8(buf)?,
    })
}

fn decode_update_block(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::UpdateBlock {
        x: read_i32(buf)?,
        z: read_i32(buf)?,
        y: read_u8(buf)?,
        block: read_u8(buf)?,
        meta: read_u8(buf)?,
    })
}

fn decode_use_item(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::UseItem {
        x: read_i32(buf)?,
        y: read_i32(buf)?,
        z: read_i32(buf)?,
        face: read_i32(buf)?,
        item: read_i16(buf)?,
        meta: read_u8(buf)?,
    })
}

fn decode_chunk_data(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<PrefixedPacket> {
    Ok(PrefixedPacket::ChunkData {
        chunk_x: read_i32(buf)?,
        chunk_z: read_i32(buf)?,
        data: read_blob(buf)?,
    })
}
