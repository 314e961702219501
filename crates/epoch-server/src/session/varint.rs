//! Release sessions: handshake, status, login with optional encryption and
//! compression, then play.

use super::{Joined, Renderer};
use crate::context::ServerContext;
use crate::keys;
use crate::player::Outbound;
use crate::session;
use anyhow::{anyhow, bail};
use epoch_events::PlayerRef;
use epoch_protocol_core::{ConnectionState, Direction};
use epoch_protocol_varint::*;
use epoch_types::{
    degrees_to_angle, offline_uuid, to_fixed_point, BlockPos, ChunkPos, Location, Vec3d,
};
use epoch_version::{Capability, Family, ProtocolVersion, R1_8};
use epoch_world::serialize::release_chunk;
use serde_json::json;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info};

const LEVEL_TYPE: &str = "flat";
const SURVIVAL: u8 = 0;
const OVERWORLD: i8 = 0;
const EASY: u8 = 1;
const CHAT_BOX: i8 = 0;

const DIG_STARTED: u8 = 0;
const DIG_CANCELLED: u8 = 1;
const DIG_FINISHED: u8 = 2;

pub async fn handle_connection(stream: TcpStream, ctx: Arc<ServerContext>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let mut conn = VarIntConnection::new(
        stream,
        VarIntPacketDecoder::new(ctx.varint_registry.clone(), Direction::Serverbound, R1_8),
        VarIntPacketEncoder::new(ctx.varint_registry.clone(), Direction::Clientbound, R1_8),
    );

    let result = match handshake(&mut conn, &ctx).await {
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

/// Serve the status exchange, or log the client in. Returns the joined
/// player once the connection is in the play state.
async fn handshake(
    conn: &mut VarIntConnection,
    ctx: &Arc<ServerContext>,
) -> anyhow::Result<Option<Joined>> {
    let (protocol, next) = match conn.read_packet().await? {
        VarIntPacket::Handshake {
            protocol_version,
            next_state,
            ..
        } => (protocol_version, next_state),
        other => bail!("Expected handshake, got {:?}", other),
    };
    let next = ConnectionState::from_handshake_next(next)
        .ok_or_else(|| anyhow!("Invalid next state {}", next))?;
    let version = ctx.catalog.from_number(protocol, &[Family::Release]);
    if let Some(version) = version {
        conn.set_version(version);
    }
    conn.transition(next)?;

    match next {
        ConnectionState::Status => {
            status(conn, ctx, protocol).await?;
            Ok(None)
        }
        _ => login(conn, ctx, protocol, version).await,
    }
}

/// The server list exchange. Clients of any protocol may ask.
async fn status(conn: &mut VarIntConnection, ctx: &ServerContext, protocol: i32) -> anyhow::Result<()> {
    match conn.read_packet().await? {
        VarIntPacket::StatusRequest => {}
        other => bail!("Expected status request, got {:?}", other),
    }
    let shown = ctx.catalog.latest(Family::Release).unwrap_or(R1_8);
    debug!("Status request from protocol {}", protocol);
    let response = json!({
        "version": { "name": shown.name(), "protocol": shown.raw_number() },
        "players": {
            "max": ctx.config.max_players,
            "online": ctx.players.count(),
        },
        "description": { "text": ctx.config.motd },
    });
    conn.write_packet(&VarIntPacket::StatusResponse {
        json: response.to_string(),
    })
    .await?;

    match conn.read_packet().await? {
        VarIntPacket::PingRequest { payload } => {
            conn.write_packet(&VarIntPacket::PongResponse { payload })
                .await?;
        }
        other => bail!("Expected ping, got {:?}", other),
    }
    Ok(())
}

fn text(message: &str) -> String {
    json!({ "text": message }).to_string()
}

async fn login(
    conn: &mut VarIntConnection,
    ctx: &Arc<ServerContext>,
    protocol: i32,
    version: Option<ProtocolVersion>,
) -> anyhow::Result<Option<Joined>> {
    let name = match conn.read_packet().await? {
        VarIntPacket::LoginStart { name } => name,
        other => bail!("Expected login start, got {:?}", other),
    };
    let Some(version) = version else {
        let reason = format!("Unsupported protocol {}", protocol);
        conn.write_packet(&VarIntPacket::LoginDisconnect {
            reason: text(&reason),
        })
        .await?;
        bail!("{} ({})", reason, name);
    };

    if let Some(server_keys) = ctx
        .keys
        .as_ref()
        .filter(|_| ctx.supports(Capability::Encryption, &version))
    {
        let token = keys::verify_token();
        conn.write_packet(&VarIntPacket::EncryptionRequest {
            server_id: String::new(),
            public_key: server_keys.public_der().to_vec(),
            verify_token: token.to_vec(),
        })
        .await?;
        let (secret, response_token) = match conn.read_packet().await? {
            VarIntPacket::EncryptionResponse {
                shared_secret,
                verify_token,
            } => (shared_secret, verify_token),
            other => bail!("Expected encryption response, got {:?}", other),
        };
        let secret = server_keys.finish_exchange(&secret, &response_token, &token)?;
        conn.enable_encryption(&secret)?;
        debug!("Encryption enabled for {}", name);
    }

    let threshold = ctx.config.compression_threshold;
    if threshold >= 0 && ctx.supports(Capability::Compression, &version) {
        conn.write_packet(&VarIntPacket::SetCompression { threshold })
            .await?;
        conn.enable_compression(threshold);
    }

    let joined = match session::join(ctx, &name, version) {
        Ok(joined) => joined,
        Err(e) => {
            conn.write_packet(&VarIntPacket::LoginDisconnect {
                reason: text(&e.to_string()),
            })
            .await?;
            return Err(e);
        }
    };
    let entity_id = joined.player.entity_id;
    let admitted = async {
        conn.write_packet(&VarIntPacket::LoginSuccess {
            uuid: offline_uuid(&name),
            username: name.clone(),
        })
        .await?;
        conn.transition(ConnectionState::Play)?;
        anyhow::Ok(())
    }
    .await;
    if let Err(e) = admitted {
        session::leave(ctx, entity_id, "Lost connection");
        return Err(e);
    }
    info!("{} logged in with {}", name, version);
    Ok(Some(joined))
}

async fn play(mut conn: VarIntConnection, ctx: &Arc<ServerContext>, joined: Joined) -> anyhow::Result<()> {
    if let Err(e) = send_world(&mut conn, ctx, &joined).await {
        session::leave(ctx, joined.player.entity_id, "Lost connection");
        return Err(e);
    }
    let (reader, writer) = conn.into_split()?;
    let render: Renderer<VarIntPacket> = render_play;
    let mut digging = None;
    session::run_play(ctx, reader, writer, joined, render, |player, packet| {
        handle_play(ctx, player, packet, &mut digging)
    })
    .await
}

async fn send_world(conn: &mut VarIntConnection, ctx: &ServerContext, joined: &Joined) -> anyhow::Result<()> {
    let version = joined.player.version;
    conn.write_packet(&VarIntPacket::JoinGame {
        entity_id: joined.player.entity_id,
        game_mode: SURVIVAL,
        dimension: OVERWORLD,
        difficulty: EASY,
        max_players: ctx.config.max_players.min(u8::MAX as usize) as u8,
        level_type: LEVEL_TYPE.to_string(),
        reduced_debug_info: false,
    })
    .await?;
    conn.write_packet(&VarIntPacket::SpawnPosition {
        position: ctx.world.spawn().block_pos(),
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
            let (primary_bit_mask, data) = release_chunk(&blocks);
            conn.write_packet(&VarIntPacket::ChunkData {
                chunk_x: cx,
                chunk_z: cz,
                full_chunk: true,
                primary_bit_mask,
                data,
            })
            .await?;
        }
    }

    if ctx.supports(Capability::Health, &version) {
        conn.write_packet(&VarIntPacket::UpdateHealth {
            health: 20.0,
            food: 20,
            saturation: 5.0,
        })
        .await?;
    }
    conn.write_packet(&position_and_look(&joined.location)).await?;
    if ctx.supports(Capability::DayNightCycle, &version) {
        let time = ctx.world_time();
        conn.write_packet(&VarIntPacket::TimeUpdate {
            world_age: time,
            time_of_day: time,
        })
        .await?;
    }
    Ok(())
}

fn position_and_look(location: &Location) -> VarIntPacket {
    let p = location.position;
    VarIntPacket::PlayerPositionAndLook {
        x: p.x,
        y: p.y,
        z: p.z,
        yaw: location.yaw,
        pitch: location.pitch,
        // All absolute.
        flags: 0,
    }
}

fn block_state(block: u8) -> i32 {
    (block as i32) << 4
}

fn render_play(ctx: &ServerContext, player: &PlayerRef, message: Outbound) -> Vec<VarIntPacket> {
    let version = player.version;
    match message {
        Outbound::Chat(message) => vec![VarIntPacket::ChatMessage {
            json: text(&message),
            position: CHAT_BOX,
        }],
        Outbound::BlockChange { position, block } => vec![VarIntPacket::BlockChange {
            position,
            block_state: block_state(ctx.block_for(block, &version)),
        }],
        Outbound::SpawnPlayer {
            entity_id,
            name,
            location,
        } => vec![VarIntPacket::SpawnPlayer {
            entity_id,
            uuid: offline_uuid(&name),
            x: to_fixed_point(location.position.x),
            y: to_fixed_point(location.position.y),
            z: to_fixed_point(location.position.z),
            yaw: degrees_to_angle(location.yaw),
            pitch: degrees_to_angle(location.pitch),
            current_item: 0,
        }],
        Outbound::MovePlayer {
            entity_id,
            location,
        } => vec![VarIntPacket::EntityTeleport {
            entity_id,
            x: to_fixed_point(location.position.x),
            y: to_fixed_point(location.position.y),
            z: to_fixed_point(location.position.z),
            yaw: degrees_to_angle(location.yaw),
            pitch: degrees_to_angle(location.pitch),
            on_ground: true,
        }],
        Outbound::DespawnPlayer { entity_id } => vec![VarIntPacket::DestroyEntities {
            entity_ids: vec![entity_id],
        }],
        Outbound::Teleport(location) => vec![position_and_look(&location)],
        Outbound::MiningProgress {
            entity_id,
            position,
            stage,
        } if ctx.supports(Capability::MiningProgress, &version) => {
            vec![VarIntPacket::BlockBreakAnimation {
                entity_id,
                position,
                stage,
            }]
        }
        Outbound::TimeUpdate(time) if ctx.supports(Capability::DayNightCycle, &version) => {
            vec![VarIntPacket::TimeUpdate {
                world_age: time,
                time_of_day: time,
            }]
        }
        Outbound::KeepAlive => vec![VarIntPacket::KeepAlive {
            id: ctx.world_time() as i32,
        }],
        Outbound::Kick(reason) => vec![VarIntPacket::Disconnect {
            reason: text(&reason),
        }],
        _ => Vec::new(),
    }
}

fn handle_play(
    ctx: &ServerContext,
    player: &PlayerRef,
    packet: VarIntPacket,
    digging: &mut Option<BlockPos>,
) -> ControlFlow<String> {
    let current = || {
        ctx.players
            .get(player.entity_id)
            .map(|h| h.location)
            .unwrap_or_else(|| Location::new(ctx.world.spawn(), 0.0, 0.0))
    };
    match packet {
        VarIntPacket::KeepAlive { .. } | VarIntPacket::PlayerOnGround { .. } => {}
        VarIntPacket::ClientChat { message } => session::chat(ctx, player, &message),
        VarIntPacket::PlayerPosition { x, y, z, .. } => {
            let mut to = current();
            to.position = Vec3d::new(x, y, z);
            session::move_to(ctx, player, to);
        }
        VarIntPacket::PlayerLook { yaw, pitch, .. } => {
            let mut to = current();
            to.yaw = yaw;
            to.pitch = pitch;
            session::move_to(ctx, player, to);
        }
        VarIntPacket::PlayerPositionLook {
            x,
            y,
            z,
            yaw,
            pitch,
            ..
        } => {
            session::move_to(ctx, player, Location::new(Vec3d::new(x, y, z), yaw, pitch));
        }
        VarIntPacket::PlayerDigging {
            status, position, ..
        } => match status {
            DIG_STARTED => {
                *digging = Some(position);
                session::mining_progress(ctx, player, position, 0);
            }
            DIG_CANCELLED => {
                *digging = None;
                session::mining_progress(ctx, player, position, -1);
            }
            DIG_FINISHED => {
                session::mining_progress(ctx, player, position, -1);
                if digging.take() == Some(position) {
                    session::break_block(ctx, player, position);
                }
            }
            _ => {}
        },
        VarIntPacket::BlockPlacement {
            position,
            face,
            item,
            ..
        } => {
            // Face -1 is "use the held item", not a placement.
            if (0..=5).contains(&face) && (1..=255).contains(&item) {
                session::place_block(ctx, player, position.offset(face as u8), item as u8);
            }
        }
        other => debug!("Ignoring {:?} from {}", other, player.name),
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{context, drain, finished, loopback, read_until};
    use epoch_data::blocks::{COBBLESTONE, GRASS};
    use epoch_version::{B1_8, C0_30};
    use epoch_world::generator::SURFACE_Y;

    #[test]
    fn test_render_spawn_and_chat() {
        let ctx = context();
        let release = session::join(&ctx, "Modern", R1_8).unwrap();
        let location = Location::new(Vec3d::new(1.5, 33.0, -2.0), 90.0, 0.0);
        let rendered = render_play(
            &ctx,
            &release.player,
            Outbound::SpawnPlayer {
                entity_id: 9,
                name: "Old".into(),
                location,
            },
        );
        assert_eq!(
            rendered,
            vec![VarIntPacket::SpawnPlayer {
                entity_id: 9,
                uuid: offline_uuid("Old"),
                x: 48,
                y: 1056,
                z: -64,
                yaw: 64,
                pitch: 0,
                current_item: 0,
            }]
        );

        let chat = render_play(&ctx, &release.player, Outbound::Chat("hi \"you\"".into()));
        let VarIntPacket::ChatMessage { json, .. } = &chat[0] else {
            panic!("expected chat, got {:?}", chat);
        };
        let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(parsed["text"], "hi \"you\"");
    }

    #[test]
    fn test_block_change_uses_block_state() {
        let ctx = context();
        let release = session::join(&ctx, "Modern", R1_8).unwrap();
        let rendered = render_play(
            &ctx,
            &release.player,
            Outbound::BlockChange {
                position: BlockPos::new(0, 0, 0),
                block: GRASS,
            },
        );
        assert_eq!(
            rendered,
            vec![VarIntPacket::BlockChange {
                position: BlockPos::new(0, 0, 0),
                block_state: (GRASS as i32) << 4,
            }]
        );
    }

    #[test]
    fn test_digging_shows_progress_to_others() {
        let ctx = context();
        let release = session::join(&ctx, "Modern", R1_8).unwrap();
        let mut other = session::join(&ctx, "Other", R1_8).unwrap();
        drain(&mut other.outbound);

        let position = BlockPos::new(2, SURFACE_Y as i32, 2);
        let mut digging = None;
        let dig = |status| VarIntPacket::PlayerDigging {
            status,
            position,
            face: 1,
        };
        handle_play(&ctx, &release.player, dig(DIG_STARTED), &mut digging);
        let seen: Vec<_> = drain(&mut other.outbound)
            .into_iter()
            .flat_map(|m| render_play(&ctx, &other.player, m))
            .collect();
        assert_eq!(
            seen,
            vec![VarIntPacket::BlockBreakAnimation {
                entity_id: release.player.entity_id,
                position,
                stage: 0,
            }]
        );

        handle_play(&ctx, &release.player, dig(DIG_FINISHED), &mut digging);
        assert_eq!(ctx.world.get_block(position), 0);
        // Older clients never get the crack animation.
        assert!(!ctx.supports(Capability::MiningProgress, &B1_8));
    }

    #[test]
    fn test_finish_without_start_is_ignored() {
        let ctx = context();
        let release = session::join(&ctx, "Modern", R1_8).unwrap();
        let position = BlockPos::new(2, SURFACE_Y as i32, 2);
        let mut digging = None;
        handle_play(
            &ctx,
            &release.player,
            VarIntPacket::PlayerDigging {
                status: DIG_FINISHED,
                position,
                face: 1,
            },
            &mut digging,
        );
        assert_eq!(ctx.world.get_block(position), GRASS);
    }

    #[test]
    fn test_placement() {
        let ctx = context();
        let release = session::join(&ctx, "Modern", R1_8).unwrap();
        let mut digging = None;
        let below = BlockPos::new(4, SURFACE_Y as i32, 4);
        let place = |face, item| VarIntPacket::BlockPlacement {
            position: below,
            face,
            item,
            cursor_x: 8,
            cursor_y: 16,
            cursor_z: 8,
        };
        handle_play(&ctx, &release.player, place(-1, COBBLESTONE as i16), &mut digging);
        handle_play(&ctx, &release.player, place(1, -1), &mut digging);
        assert_eq!(ctx.world.get_block(below.offset(1)), 0);

        handle_play(&ctx, &release.player, place(1, COBBLESTONE as i16), &mut digging);
        assert_eq!(ctx.world.get_block(below.offset(1)), COBBLESTONE);
    }

    #[test]
    fn test_look_keeps_position_and_cross_era_move() {
        let ctx = context();
        let release = session::join(&ctx, "Modern", R1_8).unwrap();
        let mut classic = session::join(&ctx, "Classic", C0_30).unwrap();
        drain(&mut classic.outbound);
        let mut digging = None;
        handle_play(
            &ctx,
            &release.player,
            VarIntPacket::PlayerLook {
                yaw: 180.0,
                pitch: 10.0,
                on_ground: true,
            },
            &mut digging,
        );
        let now = ctx.players.get(release.player.entity_id).unwrap().location;
        assert_eq!(now.position, release.location.position);
        assert_eq!(now.yaw, 180.0);
        assert!(matches!(
            drain(&mut classic.outbound).as_slice(),
            [Outbound::MovePlayer { entity_id, .. }] if *entity_id == release.player.entity_id
        ));
    }

    async fn connect(ctx: &Arc<ServerContext>, next_state: i32) -> (VarIntConnection, tokio::task::JoinHandle<()>) {
        let (stream, server) = loopback(ctx, handle_connection).await;
        let mut client = VarIntConnection::new(
            stream,
            VarIntPacketDecoder::new(ctx.varint_registry.clone(), Direction::Clientbound, R1_8),
            VarIntPacketEncoder::new(ctx.varint_registry.clone(), Direction::Serverbound, R1_8),
        );
        client
            .write_packet(&VarIntPacket::Handshake {
                protocol_version: R1_8.raw_number(),
                server_address: "localhost".into(),
                server_port: 25567,
                next_state,
            })
            .await
            .unwrap();
        let next = ConnectionState::from_handshake_next(next_state).unwrap();
        client.transition(next).unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_status_over_socket() {
        let ctx = Arc::new(context());
        let (mut client, server) = connect(&ctx, 1).await;
        client.write_packet(&VarIntPacket::StatusRequest).await.unwrap();
        let VarIntPacket::StatusResponse { json } = client.read_packet().await.unwrap() else {
            panic!("expected status response");
        };
        let status: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(status["players"]["max"], 3);
        assert_eq!(status["version"]["protocol"], R1_8.raw_number());

        client
            .write_packet(&VarIntPacket::PingRequest { payload: 42 })
            .await
            .unwrap();
        assert_eq!(
            client.read_packet().await.unwrap(),
            VarIntPacket::PongResponse { payload: 42 }
        );
        finished(server).await;
    }

    #[tokio::test]
    async fn test_release_login_over_socket() {
        let ctx = Arc::new(context());
        let (mut client, server) = connect(&ctx, 2).await;
        client
            .write_packet(&VarIntPacket::LoginStart {
                name: "Modern".into(),
            })
            .await
            .unwrap();

        let VarIntPacket::SetCompression { threshold } = client.read_packet().await.unwrap() else {
            panic!("expected set compression");
        };
        assert_eq!(threshold, ctx.config.compression_threshold);
        client.enable_compression(threshold);
        let VarIntPacket::LoginSuccess { uuid, username } = client.read_packet().await.unwrap()
        else {
            panic!("expected login success");
        };
        assert_eq!(username, "Modern");
        assert_eq!(uuid, offline_uuid("Modern"));
        client.transition(ConnectionState::Play).unwrap();

        let mut chunks = 0;
        read_until(&mut client, |packet| {
            if matches!(packet, VarIntPacket::ChunkData { .. }) {
                chunks += 1;
            }
            matches!(packet, VarIntPacket::PlayerPositionAndLook { .. })
        })
        .await;
        assert_eq!(chunks, 4);

        let position = BlockPos::new(2, SURFACE_Y as i32, 2);
        for status in [DIG_STARTED, DIG_FINISHED] {
            client
                .write_packet(&VarIntPacket::PlayerDigging {
                    status,
                    position,
                    face: 1,
                })
                .await
                .unwrap();
        }
        let change = read_until(&mut client, |packet| {
            matches!(packet, VarIntPacket::BlockChange { .. })
        })
        .await;
        assert_eq!(
            change,
            VarIntPacket::BlockChange {
                position,
                block_state: 0
            }
        );
        assert_eq!(ctx.world.get_block(position), 0);

        client.close().await;
        finished(server).await;
        assert_eq!(ctx.players.count(), 0);
    }
}
