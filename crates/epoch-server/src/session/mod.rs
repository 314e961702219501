//! Per-scheme client sessions and the game actions they share.
//!
//! A session decodes its client's packets into the calls below and renders
//! [`Outbound`] messages back into its own packet set.

pub mod prefixed;
pub mod raw;
pub mod varint;

use crate::context::ServerContext;
use crate::player::{Outbound, PlayerHandle};
use epoch_data::blocks::{block_name, is_unbreakable};
use epoch_events::{
    BlockChangeEvent, ChatEvent, PlayerJoinEvent, PlayerLeaveEvent, PlayerMoveEvent, PlayerRef,
};
use epoch_protocol_core::{ConnectionReader, ConnectionWriter, PacketDecoder, PacketEncoder};
use epoch_types::{BlockPos, Location};
use epoch_version::{ProtocolVersion, B1_8};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

const MAX_NAME_LEN: usize = 16;

/// A player that made it into the game.
pub struct Joined {
    pub player: PlayerRef,
    pub location: Location,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

/// Turns one game message into the packets a session's client understands.
pub type Renderer<P> = fn(&ServerContext, &PlayerRef, Outbound) -> Vec<P>;

/// Drive a split connection until the client leaves.
///
/// Outbound messages are rendered and written by a separate task; inbound
/// packets go to `handle` in arrival order. `handle` breaks with a leave
/// reason when the client says goodbye.
pub async fn run_play<D, E, H>(
    ctx: &Arc<ServerContext>,
    mut reader: ConnectionReader<D>,
    writer: ConnectionWriter<E>,
    joined: Joined,
    render: Renderer<E::Packet>,
    mut handle: H,
) -> anyhow::Result<()>
where
    D: PacketDecoder,
    E: PacketEncoder + 'static,
    E::Packet: 'static,
    H: FnMut(&PlayerRef, D::Packet) -> ControlFlow<String>,
{
    let Joined {
        player, outbound, ..
    } = joined;
    let writer_handle = tokio::spawn(write_loop(
        ctx.clone(),
        player.clone(),
        writer,
        outbound,
        render,
    ));

    let result = loop {
        match reader.read_packet().await {
            Ok(packet) => {
                if let ControlFlow::Break(reason) = handle(&player, packet) {
                    break Ok(reason);
                }
            }
            Err(e) if e.is_closed() => break Ok("Disconnected".to_string()),
            Err(e) => break Err(e),
        }
    };

    let reason = match &result {
        Ok(reason) => reason.clone(),
        Err(e) => e.to_string(),
    };
    leave(ctx, player.entity_id, &reason);
    writer_handle.abort();
    result.map(|_| ()).map_err(Into::into)
}

async fn write_loop<E: PacketEncoder>(
    ctx: Arc<ServerContext>,
    player: PlayerRef,
    mut writer: ConnectionWriter<E>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    render: Renderer<E::Packet>,
) {
    while let Some(message) = outbound.recv().await {
        let last = matches!(message, Outbound::Kick(_));
        for packet in render(&ctx, &player, message) {
            if let Err(e) = writer.write_packet(&packet).await {
                debug!("Writer error for {}: {}", player.name, e);
                return;
            }
        }
        if last {
            break;
        }
    }
    writer.close().await;
}

/// Split text into pieces of at most `width` characters.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(width.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Admit a player: assign an entity id, introduce them to everyone already
/// online and the other way round. The error text is fit to show the client.
pub fn join(ctx: &ServerContext, name: &str, version: ProtocolVersion) -> anyhow::Result<Joined> {
    if name.is_empty()
        || name.len() > MAX_NAME_LEN
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        anyhow::bail!("Invalid name");
    }
    let player = PlayerRef {
        name: name.to_string(),
        entity_id: ctx.next_entity_id(),
        version,
    };
    let location = Location::new(ctx.world.spawn(), 0.0, 0.0);
    let (tx, rx) = mpsc::unbounded_channel();
    ctx.players.try_add(
        PlayerHandle::new(player.clone(), location, tx),
        ctx.config.max_players,
    )?;
    ctx.players.broadcast(
        Outbound::SpawnPlayer {
            entity_id: player.entity_id,
            name: player.name.clone(),
            location,
        },
        Some(player.entity_id),
    );
    ctx.players
        .broadcast(Outbound::Chat(format!("{} joined the game", player.name)), None);

    info!("{} joined ({}, eid {})", player.name, version, player.entity_id);
    ctx.events.player_join.fire(&PlayerJoinEvent {
        player: player.clone(),
    });

    Ok(Joined {
        player,
        location,
        outbound: rx,
    })
}

/// Tear a player down. Only the first call for an entity id does anything.
pub fn leave(ctx: &ServerContext, entity_id: i32, reason: &str) {
    let Some(handle) = ctx.players.remove(entity_id) else {
        return;
    };
    let player = handle.player;
    info!("{} left ({})", player.name, reason);
    ctx.players
        .broadcast(Outbound::DespawnPlayer { entity_id }, None);
    ctx.players
        .broadcast(Outbound::Chat(format!("{} left the game", player.name)), None);
    ctx.events.player_leave.fire(&PlayerLeaveEvent {
        player,
        reason: reason.to_string(),
    });
}

/// Disconnect a player with a message. Returns false if no such player.
pub fn kick(ctx: &ServerContext, entity_id: i32, reason: &str) -> bool {
    let Some(handle) = ctx.players.get(entity_id) else {
        return false;
    };
    handle.send(Outbound::Kick(reason.to_string()));
    leave(ctx, entity_id, reason);
    true
}

/// A chat line from a client. Lines starting with `/` are commands.
pub fn chat(ctx: &ServerContext, player: &PlayerRef, message: &str) {
    let message = message.trim();
    if message.is_empty() {
        return;
    }
    if let Some(line) = message.strip_prefix('/') {
        let entity_id = player.entity_id;
        let mut reply = |text: &str| {
            ctx.players.send_to(entity_id, Outbound::Chat(text.to_string()));
        };
        info!("{} issued /{}", player.name, line);
        if !ctx.commands.dispatch(line, &player.name, false, &mut reply) {
            let label = line.split_whitespace().next().unwrap_or_default();
            reply(&format!("Unknown command: /{}", label));
        }
        return;
    }

    let event = ChatEvent {
        player: player.clone(),
        message: message.to_string(),
    };
    if ctx.events.chat.invoke(&event).is_cancelled() {
        return;
    }
    info!("<{}> {}", player.name, message);
    ctx.players
        .broadcast(Outbound::Chat(format!("<{}> {}", player.name, message)), None);
}

/// Replace the block at `position` with air.
pub fn break_block(ctx: &ServerContext, player: &PlayerRef, position: BlockPos) -> bool {
    change_block(ctx, player, position, 0)
}

/// Place a block given in the client's id space.
pub fn place_block(
    ctx: &ServerContext,
    player: &PlayerRef,
    position: BlockPos,
    client_block: u8,
) -> bool {
    let block = ctx.block_from(client_block, &player.version);
    if block == 0 {
        debug!(
            "{} placed block {} with no counterpart in {}",
            player.name,
            client_block,
            ctx.native_version()
        );
        resync(ctx, player, position);
        return false;
    }
    if ctx.world.get_block(position) != 0 {
        resync(ctx, player, position);
        return false;
    }
    change_block(ctx, player, position, block)
}

fn change_block(ctx: &ServerContext, player: &PlayerRef, position: BlockPos, block: u8) -> bool {
    if !ctx.world.contains(position) {
        return false;
    }
    let old_block = ctx.world.get_block(position);
    if block == 0 && is_unbreakable(ctx.block_for(old_block, &B1_8)) {
        resync(ctx, player, position);
        return false;
    }

    let event = BlockChangeEvent {
        player: player.clone(),
        position,
        old_block,
        new_block: block,
    };
    if ctx.events.block_change.invoke(&event).is_cancelled() {
        resync(ctx, player, position);
        return false;
    }

    match ctx.world.set_block(position, block) {
        Ok(_) => {
            debug!(
                "{} set {} from {} to {}",
                player.name,
                position,
                block_label(ctx, old_block),
                block_label(ctx, block)
            );
            ctx.players
                .broadcast(Outbound::BlockChange { position, block }, None);
            true
        }
        Err(e) => {
            debug!("Block change from {} rejected: {}", player.name, e);
            false
        }
    }
}

/// Name of a world block, for logs.
fn block_label(ctx: &ServerContext, block: u8) -> String {
    match block_name(ctx.block_for(block, &B1_8)) {
        Some(name) => name.to_string(),
        None => format!("#{}", block),
    }
}

/// Put the client's view of one block back in line with the world.
fn resync(ctx: &ServerContext, player: &PlayerRef, position: BlockPos) {
    if ctx.world.contains(position) {
        ctx.players.send_to(
            player.entity_id,
            Outbound::BlockChange {
                position,
                block: ctx.world.get_block(position),
            },
        );
    }
}

/// A movement update. A cancelled move snaps the client back.
pub fn move_to(ctx: &ServerContext, player: &PlayerRef, to: Location) -> bool {
    let Some(handle) = ctx.players.get(player.entity_id) else {
        return false;
    };
    let from = handle.location;
    if from == to {
        return true;
    }
    let event = PlayerMoveEvent {
        player: player.clone(),
        from: from.position,
        to: to.position,
    };
    if ctx.events.player_move.invoke(&event).is_cancelled() {
        handle.send(Outbound::Teleport(from));
        return false;
    }
    ctx.players.set_location(player.entity_id, to);
    ctx.players.broadcast(
        Outbound::MovePlayer {
            entity_id: player.entity_id,
            location: to,
        },
        Some(player.entity_id),
    );
    true
}

/// Crack animation for a block being dug. A negative stage clears it.
pub fn mining_progress(ctx: &ServerContext, player: &PlayerRef, position: BlockPos, stage: i8) {
    ctx.players.broadcast(
        Outbound::MiningProgress {
            entity_id: player.entity_id,
            position,
            stage,
        },
        Some(player.entity_id),
    );
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use epoch_data::blocks::{BEDROCK, COBBLESTONE, GRASS, STONE};
    use epoch_events::EventResult;
    use epoch_types::Vec3d;
    use epoch_version::{C0_30, RD_160052};
    use epoch_world::generator::SURFACE_Y;
    use epoch_protocol_core::Connection;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const SOCKET_WAIT: Duration = Duration::from_secs(10);

    pub(crate) fn context() -> ServerContext {
        let mut config = ServerConfig::default();
        config.world.size_chunks = 2;
        config.max_players = 3;
        ServerContext::new(config).unwrap()
    }

    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    /// Accept one loopback connection and hand it to a session handler.
    /// Returns the client end and the running session.
    pub(crate) async fn loopback<F, Fut>(
        ctx: &Arc<ServerContext>,
        handler: F,
    ) -> (TcpStream, JoinHandle<()>)
    where
        F: FnOnce(TcpStream, Arc<ServerContext>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, tokio::spawn(handler(server, ctx.clone())))
    }

    /// Read packets until one matches, failing on a stall.
    pub(crate) async fn read_until<D, E, F>(conn: &mut Connection<D, E>, mut wanted: F) -> D::Packet
    where
        D: PacketDecoder,
        E: PacketEncoder,
        F: FnMut(&D::Packet) -> bool,
    {
        let read = async {
            loop {
                let packet = conn.read_packet().await.unwrap();
                if wanted(&packet) {
                    return packet;
                }
            }
        };
        timeout(SOCKET_WAIT, read).await.expect("no matching packet")
    }

    /// Wait for a session task to end after its client hung up.
    pub(crate) async fn finished(session: JoinHandle<()>) {
        timeout(SOCKET_WAIT, session)
            .await
            .expect("session did not end")
            .unwrap();
    }

    fn surface() -> BlockPos {
        BlockPos::new(3, SURFACE_Y as i32, 3)
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("abcdef", 4), vec!["abcd", "ef"]);
        assert_eq!(wrap("", 4), Vec::<String>::new());
        assert_eq!(wrap("§éé", 2), vec!["§é", "é"]);
    }

    #[test]
    fn test_join_introduces_players() {
        let ctx = context();
        let mut alice = join(&ctx, "Alice", B1_8).unwrap();
        drain(&mut alice.outbound);
        let mut bob = join(&ctx, "Bob", C0_30).unwrap();

        let to_bob = drain(&mut bob.outbound);
        assert!(matches!(&to_bob[0], Outbound::SpawnPlayer { name, .. } if name == "Alice"));
        let to_alice = drain(&mut alice.outbound);
        assert!(matches!(&to_alice[0], Outbound::SpawnPlayer { name, .. } if name == "Bob"));
        assert_eq!(to_alice[1], Outbound::Chat("Bob joined the game".into()));
        assert_ne!(alice.player.entity_id, bob.player.entity_id);
    }

    #[test]
    fn test_join_rejections() {
        let ctx = context();
        let _a = join(&ctx, "Alice", B1_8).unwrap();
        assert!(join(&ctx, "alice", B1_8).is_err());
        assert!(join(&ctx, "", B1_8).is_err());
        assert!(join(&ctx, "no spaces", B1_8).is_err());
        let _b = join(&ctx, "Bob", B1_8).unwrap();
        let _c = join(&ctx, "Carol", B1_8).unwrap();
        let full = join(&ctx, "Dave", B1_8).err().unwrap();
        assert!(full.to_string().contains("full"));
    }

    #[test]
    fn test_concurrent_joins_respect_capacity() {
        for _ in 0..20 {
            let ctx = context();
            let admitted = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..8)
                    .map(|i| {
                        let ctx = &ctx;
                        scope.spawn(move || join(ctx, &format!("Player{}", i), B1_8).is_ok())
                    })
                    .collect();
                workers
                    .into_iter()
                    .filter_map(|w| w.join().ok())
                    .filter(|ok| *ok)
                    .count()
            });
            assert_eq!(admitted, 3);
            assert_eq!(ctx.players.count(), 3);
        }
    }

    #[test]
    fn test_block_label() {
        let ctx = context();
        assert_eq!(block_label(&ctx, GRASS), "grass");
        assert_eq!(block_label(&ctx, 0), "air");
        assert_eq!(block_label(&ctx, 250), "#250");
    }

    #[test]
    fn test_leave_runs_once() {
        let ctx = context();
        let leaves = Arc::new(AtomicUsize::new(0));
        let l = leaves.clone();
        ctx.events.player_leave.register("test", move |_| {
            l.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let alice = join(&ctx, "Alice", B1_8).unwrap();
        let mut bob = join(&ctx, "Bob", B1_8).unwrap();
        drain(&mut bob.outbound);

        leave(&ctx, alice.player.entity_id, "Quit");
        leave(&ctx, alice.player.entity_id, "Quit");
        assert_eq!(leaves.load(Ordering::SeqCst), 1);
        let to_bob = drain(&mut bob.outbound);
        assert_eq!(
            to_bob[0],
            Outbound::DespawnPlayer {
                entity_id: alice.player.entity_id
            }
        );
        assert_eq!(to_bob.len(), 2);
    }

    #[test]
    fn test_kick() {
        let ctx = context();
        let mut alice = join(&ctx, "Alice", B1_8).unwrap();
        drain(&mut alice.outbound);
        assert!(kick(&ctx, alice.player.entity_id, "Bye"));
        assert_eq!(drain(&mut alice.outbound), vec![Outbound::Kick("Bye".into())]);
        assert_eq!(ctx.players.count(), 0);
        assert!(!kick(&ctx, alice.player.entity_id, "Bye"));
    }

    #[test]
    fn test_chat_and_cancel() {
        let ctx = context();
        let mut alice = join(&ctx, "Alice", B1_8).unwrap();
        drain(&mut alice.outbound);

        chat(&ctx, &alice.player, "hello");
        assert_eq!(
            drain(&mut alice.outbound),
            vec![Outbound::Chat("<Alice> hello".into())]
        );

        ctx.events.chat.register("filter", |e| {
            Ok(if e.message.contains("spam") {
                EventResult::Cancel
            } else {
                EventResult::Continue
            })
        });
        chat(&ctx, &alice.player, "buy spam");
        assert!(drain(&mut alice.outbound).is_empty());
    }

    #[test]
    fn test_chat_commands_reply_to_sender() {
        let ctx = context();
        ctx.commands.register("ping", "Pong", |inv| {
            inv.reply("pong");
            Ok(())
        });
        let mut alice = join(&ctx, "Alice", B1_8).unwrap();
        let mut bob = join(&ctx, "Bob", B1_8).unwrap();
        drain(&mut alice.outbound);
        drain(&mut bob.outbound);

        chat(&ctx, &alice.player, "/ping");
        chat(&ctx, &alice.player, "/nope now");
        assert_eq!(
            drain(&mut alice.outbound),
            vec![
                Outbound::Chat("pong".into()),
                Outbound::Chat("Unknown command: /nope".into())
            ]
        );
        assert!(drain(&mut bob.outbound).is_empty());
    }

    #[test]
    fn test_break_and_place() {
        let ctx = context();
        let mut alice = join(&ctx, "Alice", B1_8).unwrap();
        drain(&mut alice.outbound);

        assert!(break_block(&ctx, &alice.player, surface()));
        assert_eq!(ctx.world.get_block(surface()), 0);
        assert!(place_block(&ctx, &alice.player, surface(), COBBLESTONE));
        assert_eq!(ctx.world.get_block(surface()), COBBLESTONE);
        let sent = drain(&mut alice.outbound);
        assert_eq!(
            sent,
            vec![
                Outbound::BlockChange {
                    position: surface(),
                    block: 0
                },
                Outbound::BlockChange {
                    position: surface(),
                    block: COBBLESTONE
                },
            ]
        );

        // Occupied.
        assert!(!place_block(&ctx, &alice.player, surface(), STONE));
        assert_eq!(ctx.world.get_block(surface()), COBBLESTONE);
    }

    #[test]
    fn test_place_translates_from_client() {
        let ctx = context();
        let proto = join(&ctx, "Proto", RD_160052).unwrap();
        let above = BlockPos::new(3, SURFACE_Y as i32 + 1, 3);
        // Prototype grass is beta grass.
        assert!(place_block(&ctx, &proto.player, above, GRASS));
        assert_eq!(ctx.world.get_block(above), GRASS);
    }

    #[test]
    fn test_bedrock_and_bounds() {
        let ctx = context();
        let mut alice = join(&ctx, "Alice", B1_8).unwrap();
        drain(&mut alice.outbound);
        let bottom = BlockPos::new(0, 0, 0);
        assert!(!break_block(&ctx, &alice.player, bottom));
        assert_eq!(ctx.world.get_block(bottom), BEDROCK);
        assert_eq!(
            drain(&mut alice.outbound),
            vec![Outbound::BlockChange {
                position: bottom,
                block: BEDROCK
            }]
        );
        assert!(!break_block(&ctx, &alice.player, BlockPos::new(-5, 10, 0)));
    }

    #[test]
    fn test_cancelled_block_change_resyncs() {
        let ctx = context();
        ctx.events
            .block_change
            .register("protect", |e| Ok(if e.is_break() { EventResult::Cancel } else { EventResult::Continue }));
        let mut alice = join(&ctx, "Alice", B1_8).unwrap();
        drain(&mut alice.outbound);
        assert!(!break_block(&ctx, &alice.player, surface()));
        assert_eq!(ctx.world.get_block(surface()), GRASS);
        assert_eq!(
            drain(&mut alice.outbound),
            vec![Outbound::BlockChange {
                position: surface(),
                block: GRASS
            }]
        );
    }

    #[test]
    fn test_move_broadcast_and_cancel() {
        let ctx = context();
        let mut alice = join(&ctx, "Alice", B1_8).unwrap();
        let mut bob = join(&ctx, "Bob", B1_8).unwrap();
        drain(&mut alice.outbound);
        drain(&mut bob.outbound);

        let to = Location::new(Vec3d::new(4.0, 33.0, 4.0), 90.0, 0.0);
        assert!(move_to(&ctx, &alice.player, to));
        assert_eq!(
            drain(&mut bob.outbound),
            vec![Outbound::MovePlayer {
                entity_id: alice.player.entity_id,
                location: to
            }]
        );
        assert!(drain(&mut alice.outbound).is_empty());

        ctx.events.player_move.register("fence", |e| {
            Ok(if e.to.x > 10.0 { EventResult::Cancel } else { EventResult::Continue })
        });
        let far = Location::new(Vec3d::new(20.0, 33.0, 4.0), 0.0, 0.0);
        assert!(!move_to(&ctx, &alice.player, far));
        assert_eq!(drain(&mut alice.outbound), vec![Outbound::Teleport(to)]);
        assert_eq!(ctx.players.get(alice.player.entity_id).unwrap().location, to);
    }
}
