mod commands;
mod config;
mod context;
mod keys;
mod player;
mod session;

use config::ServerConfig;
use context::ServerContext;
use player::Outbound;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

/// World ticks per second of wall time.
const TICKS_PER_SECOND: i64 = 20;
/// Time given to session writers to flush kick messages on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Epoch server...");

    let config = ServerConfig::load(Path::new("config/server.toml"))?;
    info!(
        "Config loaded: bind={}, ports raw={} prefixed={} varint={}, max_players={}, encryption={}",
        config.bind,
        config.raw_port,
        config.prefixed_port,
        config.varint_port,
        config.max_players,
        config.encryption
    );

    let ctx = Arc::new(ServerContext::new(config)?);
    commands::register_builtins(&ctx);

    let bind = ctx.config.bind.clone();
    let raw = TcpListener::bind((bind.as_str(), ctx.config.raw_port)).await?;
    info!("Raw scheme (classic/alpha/beta) on {}", raw.local_addr()?);
    let prefixed = TcpListener::bind((bind.as_str(), ctx.config.prefixed_port)).await?;
    info!("Length-prefixed scheme (prototype/mobile) on {}", prefixed.local_addr()?);
    let varint = TcpListener::bind((bind.as_str(), ctx.config.varint_port)).await?;
    info!("VarInt scheme (release) on {}", varint.local_addr()?);

    tokio::spawn(run_console(ctx.clone()));
    tokio::spawn(run_ticker(ctx.clone()));

    let mut shutdown = ctx.shutdown_signal();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = shutdown.changed() => {
            info!("Shutdown requested");
        }
        _ = accept_loop(raw, ctx.clone(), session::raw::handle_connection) => {
            error!("Raw accept loop exited unexpectedly");
        }
        _ = accept_loop(prefixed, ctx.clone(), session::prefixed::handle_connection) => {
            error!("Prefixed accept loop exited unexpectedly");
        }
        _ = accept_loop(varint, ctx.clone(), session::varint::handle_connection) => {
            error!("VarInt accept loop exited unexpectedly");
        }
    }

    for handle in ctx.players.snapshot() {
        session::kick(&ctx, handle.player.entity_id, "Server closed");
    }
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    info!("Server shut down cleanly");
    Ok(())
}

async fn accept_loop<F, Fut>(listener: TcpListener, ctx: Arc<ServerContext>, handler: F)
where
    F: Fn(TcpStream, Arc<ServerContext>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("New connection from {}", peer);
                tokio::spawn(handler(socket, ctx.clone()));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Read operator commands from stdin until it closes.
async fn run_console(ctx: Arc<ServerContext>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let mut reply = |text: &str| info!("{}", text);
                if !ctx.commands.dispatch(line, "CONSOLE", true, &mut reply) {
                    info!("Unknown command. Type \"help\" for help.");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Console read failed: {}", e);
                break;
            }
        }
    }
}

/// Once a second: advance world time and ping every client.
async fn run_ticker(ctx: Arc<ServerContext>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let time = ctx.advance_time(TICKS_PER_SECOND);
        ctx.players.broadcast(Outbound::TimeUpdate(time), None);
        ctx.players.broadcast(Outbound::KeepAlive, None);
    }
}
