use crate::context::ServerContext;
use crate::player::Outbound;
use crate::session;
use epoch_commands::{Invocation, Permission};
use epoch_version::Family;
use std::sync::{Arc, Weak};
use strum::IntoEnumIterator;
use tracing::info;

/// Handlers hold a weak reference; the registry lives inside the context.
fn upgrade(ctx: &Weak<ServerContext>) -> anyhow::Result<Arc<ServerContext>> {
    ctx.upgrade()
        .ok_or_else(|| anyhow::anyhow!("Server is shutting down"))
}

fn usage(inv: &mut Invocation<'_>, text: &str) -> anyhow::Result<()> {
    inv.reply(&format!("Usage: {}", text));
    Ok(())
}

pub fn register_builtins(ctx: &Arc<ServerContext>) {
    let commands = &ctx.commands;

    let weak = Arc::downgrade(ctx);
    commands.register("help", "List commands", move |inv| {
        let ctx = upgrade(&weak)?;
        for (name, description, permission) in ctx.commands.commands() {
            let marker = if permission == Permission::Operator { " (op)" } else { "" };
            inv.reply(&format!("/{} - {}{}", name, description, marker));
        }
        Ok(())
    });

    let weak = Arc::downgrade(ctx);
    commands.register("list", "Show who is online", move |inv| {
        let ctx = upgrade(&weak)?;
        let players = ctx.players.snapshot();
        inv.reply(&format!(
            "Online ({}/{}):",
            players.len(),
            ctx.config.max_players
        ));
        for handle in players {
            inv.reply(&format!("{} ({})", handle.player.name, handle.player.version.name()));
        }
        Ok(())
    });

    let weak = Arc::downgrade(ctx);
    commands.register("say", "Broadcast a message", move |inv| {
        let ctx = upgrade(&weak)?;
        let message = inv.rest(0);
        if message.is_empty() {
            return usage(inv, "/say <message>");
        }
        info!("[{}] {}", inv.sender, message);
        ctx.players
            .broadcast(Outbound::Chat(format!("[{}] {}", inv.sender, message)), None);
        Ok(())
    });

    let weak = Arc::downgrade(ctx);
    commands.register("versions", "Show the supported client versions", move |inv| {
        let ctx = upgrade(&weak)?;
        for family in Family::iter() {
            let versions: Vec<String> = ctx
                .catalog
                .family_versions(family)
                .map(|v| format!("{} ({})", v.name(), v.raw_number()))
                .collect();
            if !versions.is_empty() {
                inv.reply(&format!("{}: {}", family, versions.join(", ")));
            }
        }
        Ok(())
    });

    let weak = Arc::downgrade(ctx);
    commands.register_op("kick", "Disconnect a player", move |inv| {
        let ctx = upgrade(&weak)?;
        let Some(name) = inv.args.first().copied() else {
            return usage(inv, "/kick <player> [reason]");
        };
        let reason = match inv.rest(1) {
            r if r.is_empty() => "Kicked by an operator".to_string(),
            r => r,
        };
        match ctx.players.find_by_name(name) {
            Some(handle) => {
                session::kick(&ctx, handle.player.entity_id, &reason);
                inv.reply(&format!("Kicked {}", handle.player.name));
            }
            None => inv.reply(&format!("{} is not online", name)),
        }
        Ok(())
    });

    let weak = Arc::downgrade(ctx);
    commands.register_op("op", "Make a player an operator", move |inv| {
        let ctx = upgrade(&weak)?;
        let Some(name) = inv.args.first().copied() else {
            return usage(inv, "/op <player>");
        };
        if ctx.commands.op(name) {
            info!("{} made {} an operator", inv.sender, name);
            inv.reply(&format!("{} is now an operator", name));
        } else {
            inv.reply(&format!("{} is already an operator", name));
        }
        Ok(())
    });

    let weak = Arc::downgrade(ctx);
    commands.register_op("deop", "Revoke operator status", move |inv| {
        let ctx = upgrade(&weak)?;
        let Some(name) = inv.args.first().copied() else {
            return usage(inv, "/deop <player>");
        };
        if ctx.commands.deop(name) {
            info!("{} revoked operator status from {}", inv.sender, name);
            inv.reply(&format!("{} is no longer an operator", name));
        } else {
            inv.reply(&format!("{} is not an operator", name));
        }
        Ok(())
    });

    let weak = Arc::downgrade(ctx);
    commands.register_op("stop", "Shut the server down", move |inv| {
        let ctx = upgrade(&weak)?;
        info!("{} stopped the server", inv.sender);
        inv.reply("Stopping the server");
        ctx.request_shutdown();
        Ok(())
    });
}
