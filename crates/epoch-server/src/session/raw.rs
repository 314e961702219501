//! Raw-scheme sessions: classic, alpha and beta clients share one port and
//! are told apart by their first packet.

use super::{Joined, Renderer};
use crate::context::ServerContext;
use crate::player::Outbound;
use crate::session;
use anyhow::{anyhow, bail};
use epoch_events::PlayerRef;
use epoch_protocol_core::{Connection, Direction};
use epoch_protocol_raw::*;
use epoch_types::{
    angle_to_degrees, degrees_to_angle, from_fixed_point, to_fixed_point, BlockPos, ChunkPos,
    Location, Vec3d,
};
use epoch_version::{Capability, Family, ProtocolVersion, B1_4, B1_8, C0_30};
use epoch_world::serialize::{beta_map_chunk, classic_level, classic_level_chunks};
use epoch_world::{CHUNK_WIDTH, WORLD_HEIGHT};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info};

type RawConnection = Connection<RawPacketDecoder, RawPacketEncoder>;

/// Classic player id meaning "you".
const SELF_ID: i8 = -1;
/// Classic positions are at eye level: 1.59375 blocks, in 1/32 units.
const CLASSIC_EYE: i32 = 51;
/// Alpha/beta stance sits this far above the feet.
const STANCE: f64 = 1.62;
const CLASSIC_CHAT_WIDTH: usize = 64;
const LEGACY_CHAT_WIDTH: usize = 100;
const CLASSIC_OP: u8 = 0x64;

/// Who is logging in, once negotiation has settled the version.
struct Login {
    name: String,
    version: ProtocolVersion,
}

pub async fn handle_connection(stream: TcpStream, ctx: Arc<ServerContext>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let mut conn = RawConnection::new(
        stream,
        RawPacketDecoder::new(ctx.raw_registry.clone(), Direction::Serverbound, B1_8),
        RawPacketEncoder::new(ctx.raw_registry.clone(), Direction::Clientbound, B1_8),
    );

    let result = match negotiate(&mut conn, &ctx).await {
        Ok(Some(login)) => play(conn, &ctx, login).await,
        Ok(None) => {
            conn.close().await;
            Ok(())
        }
        Err(e) => {
            conn.close().await;
            Err(e)
        }
    };
    if let Err(e) = result {
        debug!("Connection {} ended: {:#}", peer, e);
    }
}

/// Sniff the first packet and settle the client's version.
async fn negotiate(conn: &mut RawConnection, ctx: &ServerContext) -> anyhow::Result<Option<Login>> {
    let first = conn.peek(1).await?[0] as i32;
    match first {
        CLASSIC_IDENTIFICATION => {
            let protocol = conn.peek(2).await?[1] as i32;
            let Some(version) = ctx.catalog.from_number(protocol, &[Family::Classic]) else {
                conn.set_version(C0_30);
                let reason = format!("Unsupported classic protocol {}", protocol);
                conn.write_packet(&RawPacket::ClassicDisconnect {
                    reason: reason.clone(),
                })
                .await?;
                bail!(reason);
            };
            conn.set_version(version);
            let RawPacket::ClassicIdentification { name, .. } = conn.read_packet().await? else {
                bail!("Expected classic identification");
            };
            Ok(Some(Login { name, version }))
        }
        HANDSHAKE => {
            // A UTF-16 name starts with a zero high byte; a UTF-8 one never does.
            let wide = conn.peek(4).await?[3] == 0;
            conn.set_version(if wide { B1_8 } else { B1_4 });
            let RawPacket::Handshake { text } = conn.read_packet().await? else {
                bail!("Expected handshake");
            };
            debug!("Handshake from {} (wide strings: {})", text, wide);
            // Offline mode.
            conn.write_packet(&RawPacket::Handshake { text: "-".into() })
                .await?;

            let head = conn.peek(5).await?;
            if head[0] as i32 != LOGIN {
                bail!("Expected login request, got 0x{:02X}", head[0]);
            }
            let protocol = i32::from_be_bytes([head[1], head[2], head[3], head[4]]);
            let families: &[Family] = if wide {
                &[Family::Beta, Family::Alpha]
            } else {
                &[Family::Alpha, Family::Beta]
            };
            let version = ctx
                .catalog
                .from_number(protocol, families)
                .filter(|v| Capability::WideStrings.is_available_in(v) == wide);
            let Some(version) = version else {
                let reason = format!("Unsupported protocol {}", protocol);
                conn.write_packet(&RawPacket::Disconnect {
                    reason: reason.clone(),
                })
                .await?;
                bail!(reason);
            };
            conn.set_version(version);

            let RawPacket::Login { username, .. } = conn.read_packet().await? else {
                bail!("Expected login request");
            };
            Ok(Some(Login {
                name: username,
                version,
            }))
        }
        SERVER_LIST_PING => {
            conn.read_packet().await?;
            let reason = format!(
                "{}\u{a7}{}\u{a7}{}",
                ctx.config.motd,
                ctx.players.count(),
                ctx.config.max_players
            );
            conn.write_packet(&RawPacket::Disconnect { reason }).await?;
            Ok(None)
        }
        other => Err(anyhow!("Unexpected first byte 0x{:02X}", other)),
    }
}

async fn play(mut conn: RawConnection, ctx: &Arc<ServerContext>, login: Login) -> anyhow::Result<()> {
    let version = login.version;
    let classic = version.family() == Family::Classic;
    let joined = match session::join(ctx, &login.name, version) {
        Ok(joined) => joined,
        Err(e) => {
            let reason = e.to_string();
            let packet = if classic {
                RawPacket::ClassicDisconnect { reason }
            } else {
                RawPacket::Disconnect { reason }
            };
            conn.write_packet(&packet).await?;
            conn.close().await;
            return Err(e);
        }
    };

    let sent = if classic {
        send_classic_world(&mut conn, ctx, &joined).await
    } else {
        send_legacy_world(&mut conn, ctx, &joined).await
    };
    if let Err(e) = sent {
        session::leave(ctx, joined.player.entity_id, "Lost connection");
        return Err(e);
    }

    let (reader, writer) = conn.into_split()?;
    if classic {
        let render: Renderer<RawPacket> = render_classic;
        session::run_play(ctx, reader, writer, joined, render, |player, packet| {
            handle_classic(ctx, player, packet)
        })
        .await
    } else {
        let render: Renderer<RawPacket> = render_legacy;
        let mut digging = None;
        session::run_play(ctx, reader, writer, joined, render, |player, packet| {
            handle_legacy(ctx, player, packet, &mut digging)
        })
        .await
    }
}

// === Classic ===

fn classic_id(entity_id: i32) -> i8 {
    entity_id.rem_euclid(127) as i8
}

/// Fixed-point eye position and angles.
fn classic_coords(location: &Location) -> (i16, i16, i16, u8, u8) {
    let p = location.position;
    (
        to_fixed_point(p.x) as i16,
        (to_fixed_point(p.y) + CLASSIC_EYE) as i16,
        to_fixed_point(p.z) as i16,
        degrees_to_angle(location.yaw),
        degrees_to_angle(location.pitch),
    )
}

fn classic_position(player_id: i8, location: &Location) -> RawPacket {
    let (x, y, z, yaw, pitch) = classic_coords(location);
    RawPacket::ClassicPosition {
        player_id,
        x,
        y,
        z,
        yaw,
        pitch,
    }
}

fn classic_spawn(player_id: i8, name: String, location: &Location) -> RawPacket {
    let (x, y, z, yaw, pitch) = classic_coords(location);
    RawPacket::ClassicSpawnPlayer {
        player_id,
        name,
        x,
        y,
        z,
        yaw,
        pitch,
    }
}

async fn send_classic_world(
    conn: &mut RawConnection,
    ctx: &ServerContext,
    joined: &Joined,
) -> anyhow::Result<()> {
    let version = joined.player.version;
    let op = ctx.commands.is_op(&joined.player.name);
    conn.write_packet(&RawPacket::ClassicIdentification {
        protocol: version.raw_number() as u8,
        name: "Epoch".into(),
        key: ctx.config.motd.clone(),
        user_type: if op { CLASSIC_OP } else { 0 },
    })
    .await?;
    conn.write_packet(&RawPacket::LevelInitialize).await?;

    let mut level = ctx.world.level_blocks();
    ctx.translator
        .translate_array(&mut level, &ctx.native_version(), &version);
    let compressed = classic_level(&level)?;
    for (length, data, percent) in classic_level_chunks(&compressed) {
        conn.write_packet(&RawPacket::LevelDataChunk {
            length: length as i16,
            data,
            percent,
        })
        .await?;
    }

    let size = ctx.world.size_blocks() as i16;
    conn.write_packet(&RawPacket::LevelFinalize {
        x: size,
        y: WORLD_HEIGHT as i16,
        z: size,
    })
    .await?;

    conn.write_packet(&classic_spawn(
        SELF_ID,
        joined.player.name.clone(),
        &joined.location,
    ))
    .await?;
    info!("Sent {} level bytes to {}", compressed.len(), joined.player.name);
    Ok(())
}

fn render_classic(ctx: &ServerContext, player: &PlayerRef, message: Outbound) -> Vec<RawPacket> {
    let version = player.version;
    let entities = ctx.supports(Capability::EntitySpawning, &version);
    match message {
        Outbound::Chat(text) if ctx.supports(Capability::Chat, &version) => {
            session::wrap(&text, CLASSIC_CHAT_WIDTH)
                .into_iter()
                .map(|message| RawPacket::ClassicMessage {
                    player_id: 0,
                    message,
                })
                .collect()
        }
        Outbound::BlockChange { position, block } => vec![RawPacket::ClassicSetBlock {
            x: position.x as i16,
            y: position.y as i16,
            z: position.z as i16,
            block: ctx.block_for(block, &version),
        }],
        Outbound::SpawnPlayer {
            entity_id,
            name,
            location,
        } if entities => vec![classic_spawn(classic_id(entity_id), name, &location)],
        Outbound::MovePlayer {
            entity_id,
            location,
        } if entities => vec![classic_position(classic_id(entity_id), &location)],
        Outbound::DespawnPlayer { entity_id } if entities => vec![RawPacket::ClassicDespawn {
            player_id: classic_id(entity_id),
        }],
        Outbound::Teleport(location) => vec![classic_position(SELF_ID, &location)],
        Outbound::KeepAlive => vec![RawPacket::ClassicPing],
        Outbound::Kick(reason) => vec![RawPacket::ClassicDisconnect { reason }],
        _ => Vec::new(),
    }
}

fn handle_classic(ctx: &ServerContext, player: &PlayerRef, packet: RawPacket) -> ControlFlow<String> {
    match packet {
        RawPacket::ClassicSetBlockRequest {
            x,
            y,
            z,
            mode,
            block,
        } => {
            let position = BlockPos::new(x as i32, y as i32, z as i32);
            if mode == 0 {
                session::break_block(ctx, player, position);
            } else {
                session::place_block(ctx, player, position, block);
            }
        }
        RawPacket::ClassicPosition {
            x,
            y,
            z,
            yaw,
            pitch,
            ..
        } => {
            let position = Vec3d::new(
                from_fixed_point(x as i32),
                from_fixed_point(y as i32 - CLASSIC_EYE),
                from_fixed_point(z as i32),
            );
            let location = Location::new(position, angle_to_degrees(yaw), angle_to_degrees(pitch));
            session::move_to(ctx, player, location);
        }
        RawPacket::ClassicMessage { message, .. } => session::chat(ctx, player, &message),
        other => debug!("Ignoring {:?} from {}", other, player.name),
    }
    ControlFlow::Continue(())
}

// === Alpha / Beta ===

async fn send_legacy_world(
    conn: &mut RawConnection,
    ctx: &ServerContext,
    joined: &Joined,
) -> anyhow::Result<()> {
    let version = joined.player.version;
    conn.write_packet(&RawPacket::Login {
        entity_id: joined.player.entity_id,
        username: String::new(),
        seed: 0,
        game_mode: 0,
        dimension: 0,
        difficulty: 1,
        world_height: WORLD_HEIGHT as u8,
        max_players: ctx.config.max_players.min(u8::MAX as usize) as u8,
    })
    .await?;

    let spawn = joined.location.position.block_pos();
    conn.write_packet(&RawPacket::SpawnPosition {
        x: spawn.x,
        y: spawn.y,
        z: spawn.z,
    })
    .await?;

    let native = ctx.native_version();
    for cx in 0..ctx.world.size_chunks() {
        for cz in 0..ctx.world.size_chunks() {
            let Some(chunk) = ctx.world.chunk(ChunkPos::new(cx, cz)) else {
                continue;
            };
            let mut blocks = chunk.blocks().to_vec();
            ctx.translator.translate_array(&mut blocks, &native, &version);
            conn.write_packet(&RawPacket::PreChunk {
                x: cx,
                z: cz,
                load: true,
            })
            .await?;
            conn.write_packet(&RawPacket::MapChunk {
                x: cx * CHUNK_WIDTH as i32,
                y: 0,
                z: cz * CHUNK_WIDTH as i32,
                size_x: CHUNK_WIDTH as u8,
                size_y: WORLD_HEIGHT as u8,
                size_z: CHUNK_WIDTH as u8,
                data: beta_map_chunk(&blocks)?,
            })
            .await?;
        }
    }

    if ctx.supports(Capability::DayNightCycle, &version) {
        conn.write_packet(&RawPacket::TimeUpdate {
            time: ctx.world_time(),
        })
        .await?;
    }
    if ctx.supports(Capability::Health, &version) {
        conn.write_packet(&RawPacket::UpdateHealth {
            health: 20,
            food: 20,
            saturation: 5.0,
        })
        .await?;
    }
    conn.write_packet(&legacy_position(&joined.location)).await?;
    Ok(())
}

fn legacy_position(location: &Location) -> RawPacket {
    let p = location.position;
    RawPacket::PlayerPositionLook {
        x: p.x,
        y: p.y,
        stance: p.y + STANCE,
        z: p.z,
        yaw: location.yaw,
        pitch: location.pitch,
        on_ground: true,
    }
}

fn render_legacy(ctx: &ServerContext, player: &PlayerRef, message: Outbound) -> Vec<RawPacket> {
    let version = player.version;
    let entities = ctx.supports(Capability::EntitySpawning, &version);
    match message {
        Outbound::Chat(text) => session::wrap(&text, LEGACY_CHAT_WIDTH)
            .into_iter()
            .map(|message| RawPacket::Chat { message })
            .collect(),
        Outbound::BlockChange { position, block } => vec![RawPacket::BlockChange {
            x: position.x,
            y: position.y as i8,
            z: position.z,
            block: ctx.block_for(block, &version),
            metadata: 0,
        }],
        Outbound::SpawnPlayer {
            entity_id,
            name,
            location,
        } if entities => vec![RawPacket::NamedEntitySpawn {
            entity_id,
            name,
            x: to_fixed_point(location.position.x),
            y: to_fixed_point(location.position.y),
            z: to_fixed_point(location.position.z),
            yaw: degrees_to_angle(location.yaw) as i8,
            pitch: degrees_to_angle(location.pitch) as i8,
            item: 0,
        }],
        Outbound::MovePlayer {
            entity_id,
            location,
        } if entities => vec![RawPacket::EntityTeleport {
            entity_id,
            x: to_fixed_point(location.position.x),
            y: to_fixed_point(location.position.y),
            z: to_fixed_point(location.position.z),
            yaw: degrees_to_angle(location.yaw) as i8,
            pitch: degrees_to_angle(location.pitch) as i8,
        }],
        Outbound::DespawnPlayer { entity_id } if entities => {
            vec![RawPacket::DestroyEntity { entity_id }]
        }
        Outbound::Teleport(location) => vec![legacy_position(&location)],
        Outbound::TimeUpdate(time) if ctx.supports(Capability::DayNightCycle, &version) => {
            vec![RawPacket::TimeUpdate { time }]
        }
        Outbound::KeepAlive => vec![RawPacket::KeepAlive],
        Outbound::Kick(reason) => vec![RawPacket::Disconnect { reason }],
        _ => Vec::new(),
    }
}

/// Digging status that means the block is gone: alpha reports a separate
/// "broken" step, beta finishes on "stopped".
fn finished_digging(version: &ProtocolVersion) -> i8 {
    if version.family() == Family::Alpha {
        3
    } else {
        2
    }
}

fn handle_legacy(
    ctx: &ServerContext,
    player: &PlayerRef,
    packet: RawPacket,
    digging: &mut Option<BlockPos>,
) -> ControlFlow<String> {
    let current = || {
        ctx.players
            .get(player.entity_id)
            .map(|h| h.location)
            .unwrap_or_else(|| Location::new(ctx.world.spawn(), 0.0, 0.0))
    };
    match packet {
        RawPacket::KeepAlive | RawPacket::Flying { .. } => {}
        RawPacket::Chat { message } => session::chat(ctx, player, &message),
        RawPacket::PlayerPosition { x, y, z, .. } => {
            let mut to = current();
            to.position = Vec3d::new(x, y, z);
            session::move_to(ctx, player, to);
        }
        RawPacket::PlayerLook { yaw, pitch, .. } => {
            let mut to = current();
            to.yaw = yaw;
            to.pitch = pitch;
            session::move_to(ctx, player, to);
        }
        RawPacket::PlayerPositionLook {
            x,
            y,
            z,
            yaw,
            pitch,
            ..
        } => {
            session::move_to(ctx, player, Location::new(Vec3d::new(x, y, z), yaw, pitch));
        }
        RawPacket::PlayerDigging {
            status, x, y, z, ..
        } => {
            let position = BlockPos::new(x, y as i32, z);
            if status == 0 {
                *digging = Some(position);
            } else if status == finished_digging(&player.version) {
                if digging.take() == Some(position) || player.version.family() == Family::Alpha {
                    session::break_block(ctx, player, position);
                }
            }
        }
        RawPacket::BlockPlacement {
            x,
            y,
            z,
            face,
            item,
            ..
        } => {
            // Face -1 is "use item in hand", not a placement.
            if face >= 0 && (1..=255).contains(&item) {
                let target = BlockPos::new(x, y as i32, z).offset(face as u8);
                session::place_block(ctx, player, target, item as u8);
            }
        }
        RawPacket::Disconnect { reason } => return ControlFlow::Break(reason),
        other => debug!("Ignoring {:?} from {}", other, player.name),
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{context, drain, finished, loopback, read_until};
    use epoch_data::blocks::{COBBLESTONE, GRASS};
    use epoch_version::{A1_2_5, C0_0_16A};
    use epoch_world::generator::SURFACE_Y;

    fn player(ctx: &ServerContext, name: &str, version: ProtocolVersion) -> Joined {
        session::join(ctx, name, version).unwrap()
    }

    #[test]
    fn test_classic_id_range() {
        assert_eq!(classic_id(1), 1);
        assert_eq!(classic_id(127), 0);
        assert_eq!(classic_id(300), 46);
    }

    #[test]
    fn test_classic_position_round_trip() {
        let location = Location::new(Vec3d::new(10.5, 33.0, 4.25), 90.0, 0.0);
        let RawPacket::ClassicPosition { x, y, z, yaw, .. } = classic_position(3, &location) else {
            panic!("not a position");
        };
        assert_eq!((x, y, z), (336, 33 * 32 + CLASSIC_EYE as i16, 136));
        assert_eq!(yaw, 64);
    }

    #[test]
    fn test_render_classic_gates_chat() {
        let ctx = context();
        let old = player(&ctx, "Old", C0_0_16A);
        let rendered = render_classic(&ctx, &old.player, Outbound::Chat("x".repeat(70)));
        assert_eq!(rendered.len(), 2);

        let mut config = crate::config::ServerConfig::default();
        config.capabilities.insert("chat".into(), "c0.30".into());
        let strict = ServerContext::new(config).unwrap();
        assert!(render_classic(&strict, &old.player, Outbound::Chat("hi".into())).is_empty());
    }

    #[test]
    fn test_render_translates_blocks_per_recipient() {
        let ctx = context();
        let beta = player(&ctx, "Beta", B1_8);
        let alpha = player(&ctx, "Alpha", A1_2_5);
        let position = BlockPos::new(1, 40, 1);
        // Beta sandstone (24) is sand (12) to alpha.
        let message = Outbound::BlockChange { position, block: 24 };
        let to_beta = render_legacy(&ctx, &beta.player, message.clone());
        let to_alpha = render_legacy(&ctx, &alpha.player, message);
        assert!(matches!(to_beta[0], RawPacket::BlockChange { block: 24, .. }));
        assert!(matches!(to_alpha[0], RawPacket::BlockChange { block: 12, .. }));
    }

    #[test]
    fn test_render_legacy_time_and_entities() {
        let ctx = context();
        let beta = player(&ctx, "Beta", B1_8);
        assert_eq!(
            render_legacy(&ctx, &beta.player, Outbound::TimeUpdate(6000)),
            vec![RawPacket::TimeUpdate { time: 6000 }]
        );
        assert!(render_legacy(
            &ctx,
            &beta.player,
            Outbound::MiningProgress {
                entity_id: 1,
                position: BlockPos::new(0, 0, 0),
                stage: 3
            }
        )
        .is_empty());
        let spawn = render_legacy(
            &ctx,
            &beta.player,
            Outbound::SpawnPlayer {
                entity_id: 9,
                name: "Other".into(),
                location: Location::new(Vec3d::new(1.0, 2.0, 3.0), 0.0, 0.0),
            },
        );
        assert!(matches!(
            &spawn[0],
            RawPacket::NamedEntitySpawn { entity_id: 9, x: 32, y: 64, z: 96, .. }
        ));
    }

    #[test]
    fn test_classic_set_block_request() {
        let ctx = context();
        let mut classic = player(&ctx, "Classic", C0_30);
        drain(&mut classic.outbound);
        let (x, y, z) = (2i16, SURFACE_Y as i16, 2i16);
        let flow = handle_classic(
            &ctx,
            &classic.player,
            RawPacket::ClassicSetBlockRequest {
                x,
                y,
                z,
                mode: 0,
                block: 1,
            },
        );
        assert!(flow.is_continue());
        let position = BlockPos::new(2, SURFACE_Y as i32, 2);
        assert_eq!(ctx.world.get_block(position), 0);

        handle_classic(
            &ctx,
            &classic.player,
            RawPacket::ClassicSetBlockRequest {
                x,
                y,
                z,
                mode: 1,
                block: COBBLESTONE,
            },
        );
        assert_eq!(ctx.world.get_block(position), COBBLESTONE);
    }

    #[test]
    fn test_legacy_digging_and_placement() {
        let ctx = context();
        let beta = player(&ctx, "Beta", B1_8);
        let mut digging = None;
        let (x, y, z) = (5, SURFACE_Y as i8, 5);
        let position = BlockPos::new(5, SURFACE_Y as i32, 5);

        // Finishing without starting does nothing on beta.
        let finish = RawPacket::PlayerDigging {
            status: 2,
            x,
            y,
            z,
            face: 1,
        };
        handle_legacy(&ctx, &beta.player, finish.clone(), &mut digging);
        assert_eq!(ctx.world.get_block(position), GRASS);

        let start = RawPacket::PlayerDigging {
            status: 0,
            x,
            y,
            z,
            face: 1,
        };
        handle_legacy(&ctx, &beta.player, start, &mut digging);
        handle_legacy(&ctx, &beta.player, finish, &mut digging);
        assert_eq!(ctx.world.get_block(position), 0);

        // Place cobblestone on top of the dirt below.
        let place = RawPacket::BlockPlacement {
            x,
            y: y - 1,
            z,
            face: 1,
            item: COBBLESTONE as i16,
            amount: 1,
            damage: 0,
        };
        handle_legacy(&ctx, &beta.player, place, &mut digging);
        assert_eq!(ctx.world.get_block(position), COBBLESTONE);

        let quit = handle_legacy(
            &ctx,
            &beta.player,
            RawPacket::Disconnect {
                reason: "Quitting".into(),
            },
            &mut digging,
        );
        assert_eq!(quit, ControlFlow::Break("Quitting".to_string()));
    }

    #[test]
    fn test_legacy_look_keeps_position() {
        let ctx = context();
        let beta = player(&ctx, "Beta", B1_8);
        let start = beta.location;
        handle_legacy(
            &ctx,
            &beta.player,
            RawPacket::PlayerLook {
                yaw: 45.0,
                pitch: 10.0,
                on_ground: true,
            },
            &mut None,
        );
        let now = ctx.players.get(beta.player.entity_id).unwrap().location;
        assert_eq!(now.position, start.position);
        assert_eq!(now.yaw, 45.0);
    }

    #[tokio::test]
    async fn test_beta_login_over_socket() {
        let ctx = Arc::new(context());
        let (stream, server) = loopback(&ctx, handle_connection).await;
        let mut client = RawConnection::new(
            stream,
            RawPacketDecoder::new(ctx.raw_registry.clone(), Direction::Clientbound, B1_8),
            RawPacketEncoder::new(ctx.raw_registry.clone(), Direction::Serverbound, B1_8),
        );

        client
            .write_packet(&RawPacket::Handshake { text: "Steve".into() })
            .await
            .unwrap();
        assert_eq!(
            client.read_packet().await.unwrap(),
            RawPacket::Handshake { text: "-".into() }
        );
        client
            .write_packet(&RawPacket::Login {
                entity_id: B1_8.raw_number(),
                username: "Steve".into(),
                seed: 0,
                game_mode: 0,
                dimension: 0,
                difficulty: 0,
                world_height: 0,
                max_players: 0,
            })
            .await
            .unwrap();
        let RawPacket::Login { entity_id, .. } = client.read_packet().await.unwrap() else {
            panic!("expected login reply");
        };
        let steve = ctx.players.find_by_name("Steve").unwrap();
        assert_eq!(steve.player.entity_id, entity_id);
        assert_eq!(steve.player.version, B1_8);

        let mut chunks = 0;
        read_until(&mut client, |packet| {
            if matches!(packet, RawPacket::MapChunk { .. }) {
                chunks += 1;
            }
            matches!(packet, RawPacket::PlayerPositionLook { .. })
        })
        .await;
        assert_eq!(chunks, 4);

        let position = BlockPos::new(3, SURFACE_Y as i32, 3);
        for status in [0, 2] {
            client
                .write_packet(&RawPacket::PlayerDigging {
                    status,
                    x: 3,
                    y: SURFACE_Y as i8,
                    z: 3,
                    face: 1,
                })
                .await
                .unwrap();
        }
        let change = read_until(&mut client, |packet| {
            matches!(packet, RawPacket::BlockChange { .. })
        })
        .await;
        assert_eq!(
            change,
            RawPacket::BlockChange {
                x: 3,
                y: SURFACE_Y as i8,
                z: 3,
                block: 0,
                metadata: 0
            }
        );
        assert_eq!(ctx.world.get_block(position), 0);

        client.close().await;
        finished(server).await;
        assert_eq!(ctx.players.count(), 0);
    }
}
