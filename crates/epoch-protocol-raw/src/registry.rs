use crate::packets::*;
use bytes::BytesMut;
use epoch_protocol_core::*;
use epoch_version::{Capability, Family, ProtocolVersion, B1_8};

pub type RawRegistry = PacketRegistry<VersionRange, RawPacket>;

// === Packet ID constants ===

// Classic
pub const CLASSIC_IDENTIFICATION: i32 = 0x00;
pub const CLASSIC_PING: i32 = 0x01;
pub const CLASSIC_LEVEL_INITIALIZE: i32 = 0x02;
pub const CLASSIC_LEVEL_DATA: i32 = 0x03;
pub const CLASSIC_LEVEL_FINALIZE: i32 = 0x04;
pub const CLASSIC_SET_BLOCK_REQUEST: i32 = 0x05;
pub const CLASSIC_SET_BLOCK: i32 = 0x06;
pub const CLASSIC_SPAWN_PLAYER: i32 = 0x07;
pub const CLASSIC_POSITION: i32 = 0x08;
pub const CLASSIC_DESPAWN: i32 = 0x0C;
pub const CLASSIC_MESSAGE: i32 = 0x0D;
pub const CLASSIC_DISCONNECT: i32 = 0x0E;

// Alpha / Beta
pub const KEEP_ALIVE: i32 = 0x00;
pub const LOGIN: i32 = 0x01;
pub const HANDSHAKE: i32 = 0x02;
pub const CHAT: i32 = 0x03;
pub const TIME_UPDATE: i32 = 0x04;
pub const SPAWN_POSITION: i32 = 0x06;
pub const UPDATE_HEALTH: i32 = 0x08;
pub const FLYING: i32 = 0x0A;
pub const PLAYER_POSITION: i32 = 0x0B;
pub const PLAYER_LOOK: i32 = 0x0C;
pub const PLAYER_POSITION_LOOK: i32 = 0x0D;
pub const PLAYER_DIGGING: i32 = 0x0E;
pub const BLOCK_PLACEMENT: i32 = 0x0F;
pub const NAMED_ENTITY_SPAWN: i32 = 0x14;
pub const DESTROY_ENTITY: i32 = 0x1D;
pub const ENTITY_TELEPORT: i32 = 0x22;
pub const PRE_CHUNK: i32 = 0x32;
pub const MAP_CHUNK: i32 = 0x33;
pub const BLOCK_CHANGE: i32 = 0x35;
pub const SERVER_LIST_PING: i32 = 0xFE;
pub const DISCONNECT: i32 = 0xFF;

const MAX_NAME: usize = 16;
const MAX_CHAT: usize = 119;
const MAX_REASON: usize = 256;
/// Upper bound on a compressed map chunk body.
const MAX_CHUNK_DATA: i32 = 1 << 20;

/// Build the registry for every raw-scheme family, both directions.
pub fn build_registry() -> RawRegistry {
    use crate::packets::RawPacketKind as K;
    use epoch_protocol_core::Direction::{Clientbound as C, Serverbound as S};

    let classic = VersionRange::family(Family::Classic);
    let legacy = VersionRange::families(&[Family::Alpha, Family::Beta]);

    let mut r = RawRegistry::new("raw");

    // Classic
    r.register(S, CLASSIC_IDENTIFICATION, classic.clone(), K::ClassicIdentification, decode_classic_identification)
        .register(C, CLASSIC_IDENTIFICATION, classic.clone(), K::ClassicIdentification, decode_classic_identification)
        .register(C, CLASSIC_PING, classic.clone(), K::ClassicPing, |_, _| Ok(RawPacket::ClassicPing))
        .register(C, CLASSIC_LEVEL_INITIALIZE, classic.clone(), K::LevelInitialize, |_, _| Ok(RawPacket::LevelInitialize))
        .register(C, CLASSIC_LEVEL_DATA, classic.clone(), K::LevelDataChunk, decode_level_data)
        .register(C, CLASSIC_LEVEL_FINALIZE, classic.clone(), K::LevelFinalize, decode_level_finalize)
        .register(S, CLASSIC_SET_BLOCK_REQUEST, classic.clone(), K::ClassicSetBlockRequest, decode_classic_set_block_request)
        .register(C, CLASSIC_SET_BLOCK, classic.clone(), K::ClassicSetBlock, decode_classic_set_block)
        .register(C, CLASSIC_SPAWN_PLAYER, classic.clone(), K::ClassicSpawnPlayer, decode_classic_spawn_player)
        .register(S, CLASSIC_POSITION, classic.clone(), K::ClassicPosition, decode_classic_position)
        .register(C, CLASSIC_POSITION, classic.clone(), K::ClassicPosition, decode_classic_position)
        .register(C, CLASSIC_DESPAWN, classic.clone(), K::ClassicDespawn, |buf, _| {
            Ok(RawPacket::ClassicDespawn { player_id: read_i8(buf)? })
        })
        .register(S, CLASSIC_MESSAGE, classic.clone().requires(Capability::Chat), K::ClassicMessage, decode_classic_message)
        .register(C, CLASSIC_MESSAGE, classic.clone().requires(Capability::Chat), K::ClassicMessage, decode_classic_message)
        .register(C, CLASSIC_DISCONNECT, classic, K::ClassicDisconnect, |buf, _| {
            Ok(RawPacket::ClassicDisconnect { reason: read_classic_string(buf)? })
        });

    // Alpha / Beta, both directions
    for dir in [S, C] {
        r.register(dir, KEEP_ALIVE, legacy.clone(), K::KeepAlive, |_, _| Ok(RawPacket::KeepAlive))
            .register(dir, LOGIN, legacy.clone(), K::Login, decode_login)
            .register(dir, HANDSHAKE, legacy.clone(), K::Handshake, |buf, v| {
                Ok(RawPacket::Handshake { text: read_text(buf, v, 64)? })
            })
            .register(dir, CHAT, legacy.clone(), K::Chat, |buf, v| {
                Ok(RawPacket::Chat { message: read_text(buf, v, MAX_CHAT)? })
            })
            .register(dir, PLAYER_POSITION_LOOK, legacy.clone(), K::PlayerPositionLook, decode_position_look)
            .register(dir, DISCONNECT, legacy.clone(), K::Disconnect, |buf, v| {
                Ok(RawPacket::Disconnect { reason: read_text(buf, v, MAX_REASON)? })
            });
    }

    // Alpha / Beta, serverbound
    r.register(S, FLYING, legacy.clone(), K::Flying, |buf, _| {
        Ok(RawPacket::Flying { on_ground: read_bool(buf)? })
    })
    .register(S, PLAYER_POSITION, legacy.clone(), K::PlayerPosition, decode_position)
    .register(S, PLAYER_LOOK, legacy.clone(), K::PlayerLook, decode_look)
    .register(S, PLAYER_DIGGING, legacy.clone(), K::PlayerDigging, decode_digging)
    .register(S, BLOCK_PLACEMENT, legacy.clone(), K::BlockPlacement, decode_block_placement)
    .register(S, SERVER_LIST_PING, legacy.clone(), K::ServerListPing, |_, _| Ok(RawPacket::ServerListPing));

    // Alpha / Beta, clientbound
    r.register(C, TIME_UPDATE, legacy.clone().requires(Capability::DayNightCycle), K::TimeUpdate, |buf, _| {
        Ok(RawPacket::TimeUpdate { time: read_i64(buf)? })
    })
    .register(C, SPAWN_POSITION, legacy.clone(), K::SpawnPosition, |buf, _| {
        Ok(RawPacket::SpawnPosition {
            x: read_i32(buf)?,
            y: read_i32(buf)?,
            z: read_i32(buf)?,
        })
    })
    .register(C, UPDATE_HEALTH, legacy.clone().requires(Capability::Health), K::UpdateHealth, decode_health)
    .register(C, NAMED_ENTITY_SPAWN, legacy.clone(), K::NamedEntitySpawn, decode_named_entity_spawn)
    .register(C, DESTROY_ENTITY, legacy.clone(), K::DestroyEntity, |buf, _| {
        Ok(RawPacket::DestroyEntity { entity_id: read_i32(buf)? })
    })
    .register(C, ENTITY_TELEPORT, legacy.clone(), K::EntityTeleport, decode_entity_teleport)
    .register(C, PRE_CHUNK, legacy.clone(), K::PreChunk, |buf, _| {
        Ok(RawPacket::PreChunk {
            x: read_i32(buf)?,
            z: read_i32(buf)?,
            load: read_bool(buf)?,
        })
    })
    .register(C, MAP_CHUNK, legacy.clone().requires(Capability::ChunkData), K::MapChunk, decode_map_chunk)
    .register(C, BLOCK_CHANGE, legacy, K::BlockChange, decode_block_change);

    r
}

// === Decode functions ===

fn decode_classic_identification(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::ClassicIdentification {
        protocol: read_u8(buf)?,
        name: read_classic_string(buf)?,
        key: read_classic_string(buf)?,
        user_type: read_u8(buf)?,
    })
}

fn decode_level_data(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    let length = read_i16(buf)?;
    let data = read_bytes(buf, LEVEL_CHUNK_LEN)?;
    let percent = read_u8(buf)?;
    if !(0..=LEVEL_CHUNK_LEN as i16).contains(&length) {
        return Err(CodecError::InvalidValue(format!("level chunk length {}", length)));
    }
    Ok(RawPacket::LevelDataChunk {
        length,
        data: data[..length as usize].to_vec(),
        percent,
    })
}

fn decode_level_finalize(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::LevelFinalize {
        x: read_i16(buf)?,
        y: read_i16(buf)?,
        z: read_i16(buf)?,
    })
}

fn decode_classic_set_block_request(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::ClassicSetBlockRequest {
        x: read_i16(buf)?,
        y: read_i16(buf)?,
        z: read_i16(buf)?,
        mode: read_u8(buf)?,
        block: read_u8(buf)?,
    })
}

fn decode_classic_set_block(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::ClassicSetBlock {
        x: read_i16(buf)?,
        y: read_i16(buf)?,
        z: read_i16(buf)?,
        block: read_u8(buf)?,
    })
}

fn decode_classic_spawn_player(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::ClassicSpawnPlayer {
        player_id: read_i8(buf)?,
        name: read_classic_string(buf)?,
        x: read_i16(buf)?,
        y: read_i16(buf)?,
        z: read_i16(buf)?,
        yaw: read_u8(buf)?,
        pitch: read_u8(buf)?,
    })
}

fn decode_classic_position(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::ClassicPosition {
        player_id: read_i8(buf)?,
        x: read_i16(buf)?,
        y: read_i16(buf)?,
        z: read_i16(buf)?,
        yaw: read_u8(buf)?,
        pitch: read_u8(buf)?,
    })
}

fn decode_classic_message(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::ClassicMessage {
        player_id: read_i8(buf)?,
        message: read_classic_string(buf)?,
    })
}

fn decode_login(buf: &mut BytesMut, version: &ProtocolVersion) -> CodecResult<RawPacket> {
    let entity_id = read_i32(buf)?;
    let username = read_text(buf, version, MAX_NAME)?;
    let seed = read_i64(buf)?;
    if version.is_at_least(&B1_8) {
        Ok(RawPacket::Login {
            entity_id,
            username,
            seed,
            game_mode: read_i32(buf)?,
            dimension: read_i8(buf)?,
            difficulty: read_i8(buf)?,
            world_height: read_u8(buf)?,
            max_players: read_u8(buf)?,
        })
    } else {
        Ok(RawPacket::Login {
            entity_id,
            username,
            seed,
            game_mode: 0,
            dimension: read_i8(buf)?,
            difficulty: 0,
            world_height: 0,
            max_players: 0,
        })
    }
}

fn decode_health(buf: &mut BytesMut, version: &ProtocolVersion) -> CodecResult<RawPacket> {
    let health = read_i16(buf)?;
    let (food, saturation) = if Capability::Hunger.is_available_in(version) {
        (read_i16(buf)?, read_f32(buf)?)
    } else {
        (0, 0.0)
    };
    Ok(RawPacket::UpdateHealth {
        health,
        food,
        saturation,
    })
}

fn decode_position(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::PlayerPosition {
        x: read_f64(buf)?,
        y: read_f64(buf)?,
        stance: read_f64(buf)?,
        z: read_f64(buf)?,
        on_ground: read_bool(buf)?,
    })
}

fn decode_look(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::PlayerLook {
        yaw: read_f32(buf)?,
        pitch: read_f32(buf)?,
        on_ground: read_bool(buf)?,
    })
}

fn decode_position_look(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::PlayerPositionLook {
        x: read_f64(buf)?,
        y: read_f64(buf)?,
        stance: read_f64(buf)?,
        z: read_f64(buf)?,
        yaw: read_f32(buf)?,
        pitch: read_f32(buf)?,
        on_ground: read_bool(buf)?,
    })
}

fn decode_digging(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::PlayerDigging {
        status: read_i8(buf)?,
        x: read_i32(buf)?,
        y: read_i8(buf)?,
        z: read_i32(buf)?,
        face: read_i8(buf)?,
    })
}

fn decode_block_placement(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    let x = read_i32(buf)?;
    let y = read_i8(buf)?;
    let z = read_i32(buf)?;
    let face = read_i8(buf)?;
    let item = read_i16(buf)?;
    let (amount, damage) = if item >= 0 {
        (read_u8(buf)?, read_i16(buf)?)
    } else {
        (0, 0)
    };
    Ok(RawPacket::BlockPlacement {
        x,
        y,
        z,
        face,
        item,
        amount,
        damage,
    })
}

fn decode_named_entity_spawn(buf: &mut BytesMut, version: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::NamedEntitySpawn {
        entity_id: read_i32(buf)?,
        name: read_text(buf, version, MAX_NAME)?,
        x: read_i32(buf)?,
        y: read_i32(buf)?,
        z: read_i32(buf)?,
        yaw: read_i8(buf)?,
        pitch: read_i8(buf)?,
        item: read_i16(buf)?,
    })
}

fn decode_entity_teleport(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::EntityTeleport {
        entity_id: read_i32(buf)?,
        x: read_i32(buf)?,
        y: read_i32(buf)?,
        z: read_i32(buf)?,
        yaw: read_i8(buf)?,
        pitch: read_i8(buf)?,
    })
}

fn decode_map_chunk(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    let x = read_i32(buf)?;
    let y = read_i16(buf)?;
    let z = read_i32(buf)?;
    let size_x = read_u8(buf)?.wrapping_add(1);
    let size_y = read_u8(buf)?.wrapping_add(1);
    let size_z = read_u8(buf)?.wrapping_add(1);
    let len = read_i32(buf)?;
    if !(0..=MAX_CHUNK_DATA).contains(&len) {
        return Err(CodecError::InvalidValue(format!("map chunk length {}", len)));
    }
    let data = read_bytes(buf, len as usize)?.to_vec();
    Ok(RawPacket::MapChunk {
        x,
        y,
        z,
        size_x,
        size_y,
        size_z,
        data,
    })
}

fn decode_block_change(buf: &mut BytesMut, _: &ProtocolVersion) -> CodecResult<RawPacket> {
    Ok(RawPacket::BlockChange {
        x: read_i32(buf)?,
        y: read_i8(buf)?,
        z: read_i32(buf)?,
        block: read_u8(buf)?,
        metadata: read_u8(buf)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use epoch_version::*;
    use std::sync::Arc;

    fn codec(version: ProtocolVersion) -> (RawEncoder<RawPacket>, RawDecoder<RawPacket>) {
        let registry = Arc::new(build_registry());
        (
            RawEncoder::new(registry.clone(), Direction::Clientbound, version),
            RawDecoder::new(registry, Direction::Clientbound, version),
        )
    }

    fn roundtrip(packet: RawPacket, version: ProtocolVersion) -> RawPacket {
        let (mut encoder, mut decoder) = codec(version);
        let mut buf = BytesMut::new();
        encoder.encode(&packet, &mut buf).unwrap();
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "{:?} left {} bytes", packet, buf.len());
        decoded
    }

    #[test]
    fn test_roundtrip_per_family() {
        let chat = RawPacket::Chat {
            message: "hello §a world".into(),
        };
        // Narrow and wide string eras.
        assert_eq!(roundtrip(chat.clone(), A1_2_5), chat);
        assert_eq!(roundtrip(chat.clone(), B1_7), chat);

        let classic = RawPacket::ClassicSpawnPlayer {
            player_id: -1,
            name: "Notch".into(),
            x: 64 * 32,
            y: 34 * 32,
            z: 64 * 32,
            yaw: 128,
            pitch: 0,
        };
        assert_eq!(roundtrip(classic.clone(), C0_30), classic);

        let chunk = RawPacket::MapChunk {
            x: 16,
            y: 0,
            z: -32,
            size_x: 16,
            size_y: 128,
            size_z: 16,
            data: vec![0x78, 0x9c, 1, 2, 3],
        };
        assert_eq!(roundtrip(chunk.clone(), B1_0), chunk);
    }

    #[test]
    fn test_login_shape_depends_on_version() {
        let login = RawPacket::Login {
            entity_id: 5,
            username: "steve".into(),
            seed: 99,
            game_mode: 1,
            dimension: 0,
            difficulty: 2,
            world_height: 128,
            max_players: 20,
        };
        assert_eq!(roundtrip(login.clone(), B1_8), login);

        let (mut encoder, _) = codec(B1_7);
        let mut buf = BytesMut::new();
        encoder.encode(&login, &mut buf).unwrap();
        // id + entity + string16("steve") + seed + dimension
        assert_eq!(buf.len(), 1 + 4 + 2 + 10 + 8 + 1);
    }

    #[test]
    fn test_health_gains_food_with_hunger() {
        let health = RawPacket::UpdateHealth {
            health: 20,
            food: 18,
            saturation: 5.0,
        };
        assert_eq!(roundtrip(health.clone(), B1_8), health);
        let trimmed = roundtrip(health, B1_7);
        assert_eq!(
            trimmed,
            RawPacket::UpdateHealth {
                health: 20,
                food: 0,
                saturation: 0.0
            }
        );
    }

    #[test]
    fn test_capability_gated_packets() {
        let registry = build_registry();
        let c = Direction::Clientbound;
        assert!(!registry.is_known(c, UPDATE_HEALTH, &A1_1_0));
        assert!(registry.is_known(c, UPDATE_HEALTH, &A1_2_0));
        assert!(registry.is_known(c, TIME_UPDATE, &A1_0_15));
        assert!(!registry.is_known(c, CLASSIC_DISCONNECT, &B1_0));
        assert!(!registry.is_known(c, MAP_CHUNK, &C0_30));
    }

    #[test]
    fn test_two_concatenated_packets() {
        let (mut encoder, mut decoder) = codec(B1_4);
        let first = RawPacket::TimeUpdate { time: 6000 };
        let second = RawPacket::BlockChange {
            x: 1,
            y: 64,
            z: -1,
            block: 4,
            metadata: 0,
        };
        let mut buf = BytesMut::new();
        encoder.encode(&first, &mut buf).unwrap();
        encoder.encode(&second, &mut buf).unwrap();
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_partial_classic_level_chunk() {
        let (mut encoder, mut decoder) = codec(C0_30);
        let packet = RawPacket::LevelDataChunk {
            length: 3,
            data: vec![1, 2, 3],
            percent: 50,
        };
        let mut full = BytesMut::new();
        encoder.encode(&packet, &mut full).unwrap();
        assert_eq!(full.len(), 1 + 2 + LEVEL_CHUNK_LEN + 1);

        let mut partial = BytesMut::from(&full[..600]);
        assert_eq!(decoder.decode(&mut partial).unwrap(), None);
        assert_eq!(partial.len(), 600);
        partial.extend_from_slice(&full[600..]);
        assert_eq!(decoder.decode(&mut partial).unwrap(), Some(packet));
    }

    #[test]
    fn test_unknown_raw_id_closes() {
        let (_, mut decoder) = codec(B1_7);
        let mut buf = BytesMut::from(&[0x99u8, 0, 0][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtocolError::UnknownPacket { id: 0x99, .. })
        ));
    }

    #[test]
    fn test_serverbound_placement_with_empty_hand() {
        let registry = Arc::new(build_registry());
        let mut encoder = RawEncoder::new(registry.clone(), Direction::Serverbound, B1_3);
        let mut decoder = RawDecoder::new(registry, Direction::Serverbound, B1_3);
        let place = RawPacket::BlockPlacement {
            x: 10,
            y: 60,
            z: 10,
            face: 1,
            item: -1,
            amount: 0,
            damage: 0,
        };
        let mut buf = BytesMut::new();
        encoder.encode(&place, &mut buf).unwrap();
        assert_eq!(buf.len(), 1 + 4 + 1 + 4 + 1 + 2);
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(place));
    }
}
