//! Length-prefixed sessions: the prototype and mobile clients.

use super::{Joined, Renderer};
use crate::context::ServerContext;
use crate::player::Outbound;
use crate::session;
use anyhow::{anyhow, bail};
use epoch_events::PlayerRef;
use epoch_protocol_core::{Connection, Direction, MAX_PREFIXED_FRAME};
use epoch_protocol_prefixed::*;
use epoch_types::{degrees_to_angle, BlockPos, ChunkPos, Location, Vec3d};
use epoch_version::{Capability, Family, ProtocolVersion, RD_160052};
use epoch_world::serialize::{mobile_column, original_level};
use epoch_world::WORLD_HEIGHT;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::debug;

type PrefixedConnection = Connection<PrefixedPacketDecoder, PrefixedPacketEncoder>;

/// Offset of the type byte, after the u32 length.
const TYPE_OFFSET: usize = 4;
const MOBILE_FLAT_GENERATOR: i32 = 1;

pub async fn handle_connection(stream: TcpStream, ctx: Arc<ServerContext>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let mut conn = PrefixedConnection::new(
        stream,
        PrefixedPacketDecoder::new(ctx.prefixed_registry.clone(), Direction::Serverbound, RD_160052),
        PrefixedPacketEncoder::new(ctx.prefixed_registry.clone(), Direction::Clientbound, RD_160052),
    );

    let result = match negotiate(&mut conn, &ctx).await {
        Ok((name, version)) => play(conn, &ctx, name, version).await,
        Err(e) => {
            conn.close().await;
            Err(e)
        }
    };
    if let Err(e) = result {
        debug!("Connection {} ended: {:#}", peer, e);
    }
}

/// Read the protocol number out of the login frame before decoding it.
async fn negotiate(
    conn: &mut PrefixedConnection,
    ctx: &ServerContext,
) -> anyhow::Result<(String, ProtocolVersion)> {
    let head = conn.peek(TYPE_OFFSET + 1).await?;
    let frame_len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
    if frame_len > MAX_PREFIXED_FRAME {
        bail!("Login frame of {} bytes is too large", frame_len);
    }
    // Everything peeked below must lie inside this frame.
    let frame_end = TYPE_OFFSET + frame_len;
    let kind = head[TYPE_OFFSET] as i32;
    let (protocol, family) = match kind {
        // [type][i32 protocol][name]
        ORIGINAL_LOGIN => {
            if frame_end < TYPE_OFFSET + 5 {
                bail!("Truncated login frame");
            }
            let head = conn.peek(TYPE_OFFSET + 5).await?;
            let protocol = i32::from_be_bytes([head[5], head[6], head[7], head[8]]);
            (protocol, Family::Original)
        }
        // [type][u16 name length][name][i32 protocol][i32 protocol]
        MOBILE_LOGIN => {
            if frame_end < TYPE_OFFSET + 3 {
                bail!("Truncated login frame");
            }
            let head = conn.peek(TYPE_OFFSET + 3).await?;
            let name_len = u16::from_be_bytes([head[5], head[6]]) as usize;
            let at = TYPE_OFFSET + 3 + name_len;
            if at + 4 > frame_end {
                bail!("Login name of {} bytes overruns its frame", name_len);
            }
            let head = conn.peek(at + 4).await?;
            let protocol = i32::from_be_bytes([head[at], head[at + 1], head[at + 2], head[at + 3]]);
            (protocol, Family::Mobile)
        }
        other => bail!("Unexpected first packet type 0x{:02X}", other),
    };

    let version = ctx
        .catalog
        .from_number(protocol, &[family])
        .ok_or_else(|| anyhow!("Unsupported {} protocol {}", family, protocol))?;
    conn.set_version(version);

    let name = match conn.read_packet().await? {
        PrefixedPacket::OriginalLogin { username, .. } => username,
        PrefixedPacket::MobileLogin { username, .. } => username,
        other => bail!("Expected login, got {:?}", other),
    };
    Ok((name, version))
}

async fn play(
    mut conn: PrefixedConnection,
    ctx: &Arc<ServerContext>,
    name: String,
    version: ProtocolVersion,
) -> anyhow::Result<()> {
    let mobile = version.family() == Family::Mobile;
    let joined = match session::join(ctx, &name, version) {
        Ok(joined) => joined,
        Err(e) => {
            if mobile {
                // Anything non-zero is a refusal.
                conn.write_packet(&PrefixedPacket::LoginStatus { status: 1 })
                    .await?;
            }
            conn.write_packet(&PrefixedPacket::Disconnect {
                reason: e.to_string(),
            })
            .await?;
            conn.close().await;
            return Err(e);
        }
    };

    let sent = if mobile {
        send_mobile_world(&mut conn, ctx, &joined).await
    } else {
        send_original_world(&mut conn, ctx, &joined).await
    };
    if let Err(e) = sent {
        session::leave(ctx, joined.player.entity_id, "Lost connection");
        return Err(e);
    }

    let (reader, writer) = conn.into_split()?;
    if mobile {
        let render: Renderer<PrefixedPacket> = render_mobile;
        session::run_play(ctx, reader, writer, joined, render, |player, packet| {
            handle_mobile(ctx, player, packet)
        })
        .await
    } else {
        let render: Renderer<PrefixedPacket> = render_original;
        session::run_play(ctx, reader, writer, joined, render, |player, packet| {
            handle_original(ctx, player, packet)
        })
        .await
    }
}

// === Prototype ===

async fn send_original_world(
    conn: &mut PrefixedConnection,
    ctx: &ServerContext,
    joined: &Joined,
) -> anyhow::Result<()> {
    let spawn = joined.location.position;
    conn.write_packet(&PrefixedPacket::LoginAccepted {
        player_id: joined.player.entity_id,
        x: spawn.x as f32,
        y: spawn.y as f32,
        z: spawn.z as f32,
    })
    .await?;

    let mut level = ctx.world.level_blocks();
    ctx.translator
        .translate_array(&mut level, &ctx.native_version(), &joined.player.version);
    let size = ctx.world.size_blocks() as u16;
    conn.write_packet(&PrefixedPacket::LevelData {
        width: size,
        height: WORLD_HEIGHT as u16,
        depth: size,
        blocks: original_level(&level)?,
    })
    .await?;
    Ok(())
}

fn original_move(player_id: i32, location: &Location) -> PrefixedPacket {
    let p = location.position;
    PrefixedPacket::PlayerMove {
        player_id,
        x: p.x as f32,
        y: p.y as f32,
        z: p.z as f32,
        yaw: location.yaw,
        pitch: location.pitch,
    }
}

fn render_original(ctx: &ServerContext, player: &PlayerRef, message: Outbound) -> Vec<PrefixedPacket> {
    let version = player.version;
    match message {
        Outbound::BlockChange { position, block } => vec![PrefixedPacket::SetBlock {
            x: position.x as i16,
            y: position.y as i16,
            z: position.z as i16,
            block: ctx.block_for(block, &version),
        }],
        // The prototype never sees other players.
        Outbound::Teleport(location) => vec![original_move(player.entity_id, &location)],
        // The first prototype has no keep-alive.
        Outbound::KeepAlive if version.is_at_least(&RD_160052) => vec![PrefixedPacket::KeepAlive {
            id: ctx.world_time(),
        }],
        Outbound::Kick(reason) => vec![PrefixedPacket::Disconnect { reason }],
        _ => Vec::new(),
    }
}

fn handle_original(
    ctx: &ServerContext,
    player: &PlayerRef,
    packet: PrefixedPacket,
) -> ControlFlow<String> {
    match packet {
        PrefixedPacket::SetBlock { x, y, z, block } => {
            let position = BlockPos::new(x as i32, y as i32, z as i32);
            if block == 0 {
                session::break_block(ctx, player, position);
            } else {
                session::place_block(ctx, player, position, block);
            }
        }
        PrefixedPacket::PlayerMove {
            x,
            y,
            z,
            yaw,
            pitch,
            ..
        } => {
            let position = Vec3d::new(x as f64, y as f64, z as f64);
            session::move_to(ctx, player, Location::new(position, yaw, pitch));
        }
        PrefixedPacket::KeepAlive { .. } => {}
        other => debug!("Ignoring {:?} from {}", other, player.name),
    }
    ControlFlow::Continue(())
}

// === Mobile ===

async fn send_mobile_world(
    conn: &mut PrefixedConnection,
    ctx: &ServerContext,
    joined: &Joined,
) -> anyhow::Result<()> {
    let version = joined.player.version;
    let spawn = joined.location.position;
    conn.write_packet(&PrefixedPacket::LoginStatus { status: 0 })
        .await?;
    conn.write_packet(&PrefixedPacket::StartGame {
        seed: 0,
        generator: MOBILE_FLAT_GENERATOR,
        game_mode: 0,
        entity_id: joined.player.entity_id,
        x: spawn.x as f32,
        y: spawn.y as f32,
        z: spawn.z as f32,
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
            conn.write_packet(&PrefixedPacket::ChunkData {
                chunk_x: cx,
                chunk_z: cz,
                data: mobile_column(&blocks)?,
            })
            .await?;
        }
    }

    if ctx.supports(Capability::DayNightCycle, &version) {
        conn.write_packet(&PrefixedPacket::SetTime {
            time: ctx.world_time() as i32,
            started: true,
        })
        .await?;
    }
    if ctx.supports(Capability::Health, &version) {
        conn.write_packet(&PrefixedPacket::SetHealth { health: 20 })
            .await?;
    }
    Ok(())
}

fn mobile_move(entity_id: i32, location: &Location) -> PrefixedPacket {
    let p = location.position;
    PrefixedPacket::MovePlayer {
        entity_id,
        x: p.x as f32,
        y: p.y as f32,
        z: p.z as f32,
        yaw: location.yaw,
        pitch: location.pitch,
    }
}

fn render_mobile(ctx: &ServerContext, player: &PlayerRef, message: Outbound) -> Vec<PrefixedPacket> {
    let version = player.version;
    let entities = ctx.supports(Capability::EntitySpawning, &version);
    match message {
        Outbound::Chat(message) if ctx.supports(Capability::Chat, &version) => {
            vec![PrefixedPacket::Message { message }]
        }
        Outbound::BlockChange { position, block } => vec![PrefixedPacket::UpdateBlock {
            x: position.x,
            z: position.z,
            y: position.y as u8,
            block: ctx.block_for(block, &version),
            meta: 0,
        }],
        Outbound::SpawnPlayer {
            entity_id,
            name,
            location,
        } if entities => vec![PrefixedPacket::AddPlayer {
            client_id: entity_id as i64,
            username: name,
            entity_id,
            x: location.position.x as f32,
            y: location.position.y as f32,
            z: location.position.z as f32,
            yaw: degrees_to_angle(location.yaw) as i8,
            pitch: degrees_to_angle(location.pitch) as i8,
        }],
        Outbound::MovePlayer {
            entity_id,
            location,
        } if entities => vec![mobile_move(entity_id, &location)],
        Outbound::DespawnPlayer { entity_id } if entities => vec![PrefixedPacket::RemovePlayer {
            entity_id,
            client_id: entity_id as i64,
        }],
        Outbound::Teleport(location) => vec![mobile_move(player.entity_id, &location)],
        Outbound::TimeUpdate(time) if ctx.supports(Capability::DayNightCycle, &version) => {
            vec![PrefixedPacket::SetTime {
                time: time as i32,
                started: true,
            }]
        }
        Outbound::KeepAlive => vec![PrefixedPacket::KeepAlive {
            id: ctx.world_time(),
        }],
        Outbound::Kick(reason) => vec![PrefixedPacket::Disconnect { reason }],
        _ => Vec::new(),
    }
}

fn handle_mobile(ctx: &ServerContext, player: &PlayerRef, packet: PrefixedPacket) -> ControlFlow<String> {
    match packet {
        PrefixedPacket::KeepAlive { .. } | PrefixedPacket::Ready { .. } => {}
        PrefixedPacket::Message { message } => session::chat(ctx, player, &message),
        PrefixedPacket::MovePlayer {
            x,
            y,
            z,
            yaw,
            pitch,
            ..
        } => {
            let position = Vec3d::new(x as f64, y as f64, z as f64);
            session::move_to(ctx, player, Location::new(position, yaw, pitch));
        }
        PrefixedPacket::RemoveBlock { x, z, y, .. } => {
            session::break_block(ctx, player, BlockPos::new(x, y as i32, z));
        }
        PrefixedPacket::UseItem {
            x,
            y,
            z,
            face,
            item,
            ..
        } => {
            if (0..=5).contains(&face) && (1..=255).contains(&item) {
                let target = BlockPos::new(x, y, z).offset(face as u8);
                session::place_block(ctx, player, target, item as u8);
            }
        }
        other => debug!("Ignoring {:?} from {}", other, player.name),
    }
    ControlFlow::Continue(())
}
