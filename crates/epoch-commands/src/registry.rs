use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub const PERMISSION_DENIED: &str = "You don't have permission to use this command.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Everyone,
    Operator,
}

/// One command call, as seen by its handler.
pub struct Invocation<'a> {
    pub sender: &'a str,
    pub is_console: bool,
    /// The command name as typed.
    pub label: &'a str,
    pub args: Vec<&'a str>,
    reply: &'a mut dyn FnMut(&str),
}

impl Invocation<'_> {
    pub fn reply(&mut self, message: &str) {
        (self.reply)(message)
    }

    /// Arguments from `index` on, joined back with single spaces.
    pub fn rest(&self, index: usize) -> String {
        self.args.get(index..).map(|a| a.join(" ")).unwrap_or_default()
    }
}

type Handler = Arc<dyn Fn(&mut Invocation<'_>) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct CommandEntry {
    name: String,
    description: String,
    permission: Permission,
    handler: Handler,
}

/// Name-keyed command table plus the operator list.
///
/// Both are behind their own lock; handlers run with no lock held, so a
/// handler may register commands or change operators.
pub struct CommandRegistry {
    commands: RwLock<BTreeMap<String, CommandEntry>>,
    operators: RwLock<HashSet<String>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(BTreeMap::new()),
            operators: RwLock::new(HashSet::new()),
        }
    }

    pub fn register<F>(&self, name: &str, description: &str, handler: F)
    where
        F: Fn(&mut Invocation<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(name, description, Permission::Everyone, Arc::new(handler));
    }

    /// Register a command only operators and the console may run.
    pub fn register_op<F>(&self, name: &str, description: &str, handler: F)
    where
        F: Fn(&mut Invocation<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(name, description, Permission::Operator, Arc::new(handler));
    }

    fn insert(&self, name: &str, description: &str, permission: Permission, handler: Handler) {
        let key = name.to_lowercase();
        let entry = CommandEntry {
            name: name.to_string(),
            description: description.to_string(),
            permission,
            handler,
        };
        let mut commands = self.commands.write().unwrap_or_else(|e| e.into_inner());
        if commands.insert(key, entry).is_some() {
            warn!("Command '{}' replaced", name);
        }
    }

    /// Run one command line. Returns whether a command by that name exists,
    /// even if the sender was refused or the handler failed.
    pub fn dispatch(
        &self,
        line: &str,
        sender: &str,
        is_console: bool,
        reply: &mut dyn FnMut(&str),
    ) -> bool {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);
        let mut parts = line.split_whitespace();
        let Some(label) = parts.next() else {
            return false;
        };

        let entry = {
            let commands = self.commands.read().unwrap_or_else(|e| e.into_inner());
            match commands.get(&label.to_lowercase()) {
                Some(entry) => entry.clone(),
                None => return false,
            }
        };

        if entry.permission == Permission::Operator && !is_console && !self.is_op(sender) {
            info!("{} was denied /{}", sender, entry.name);
            reply(PERMISSION_DENIED);
            return true;
        }

        let mut invocation = Invocation {
            sender,
            is_console,
            label,
            args: parts.collect(),
            reply,
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            (entry.handler)(&mut invocation)
        })) {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!(
                "Internal error: {}",
                panic_message(&*payload)
            )),
        };
        if let Err(e) = outcome {
            warn!("/{} from {} failed: {:#}", entry.name, sender, e);
            invocation.reply(&format!("Error: {}", e));
        }
        true
    }

    /// `(name, description, permission)` for every command, sorted by name.
    pub fn commands(&self) -> Vec<(String, String, Permission)> {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|e| (e.name.clone(), e.description.clone(), e.permission))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&name.to_lowercase())
    }

    pub fn op(&self, name: &str) -> bool {
        self.operators
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_lowercase())
    }

    pub fn deop(&self, name: &str) -> bool {
        self.operators
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&name.to_lowercase())
    }

    pub fn is_op(&self, name: &str) -> bool {
        self.operators
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&name.to_lowercase())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown cause"
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn collect() -> (Arc<Mutex<Vec<String>>>, impl FnMut(&str)) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        (lines, move |line: &str| sink.lock().unwrap().push(line.to_string()))
    }

    fn kick_registry() -> (CommandRegistry, Arc<Mutex<Vec<String>>>) {
        let kicked = Arc::new(Mutex::new(Vec::new()));
        let registry = CommandRegistry::new();
        let k = kicked.clone();
        registry.register_op("kick", "Kick a player", move |inv| {
            let Some(target) = inv.args.first() else {
                anyhow::bail!("usage: /kick <player>");
            };
            k.lock().unwrap().push(target.to_string());
            Ok(())
        });
        (registry, kicked)
    }

    #[test]
    fn test_op_command_from_non_op() {
        let (registry, kicked) = kick_registry();
        let (lines, mut reply) = collect();
        assert!(registry.dispatch("kick Notch", "Steve", false, &mut reply));
        assert!(kicked.lock().unwrap().is_empty());
        assert!(lines.lock().unwrap()[0].contains("permission"));
    }

    #[test]
    fn test_op_command_from_console_and_op() {
        let (registry, kicked) = kick_registry();
        let (lines, mut reply) = collect();
        assert!(registry.dispatch("kick Notch", "CONSOLE", true, &mut reply));
        assert_eq!(*kicked.lock().unwrap(), vec!["Notch"]);

        registry.op("Steve");
        assert!(registry.dispatch("/kick Herobrine", "steve", false, &mut reply));
        assert_eq!(kicked.lock().unwrap().len(), 2);
        assert!(lines.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_and_empty() {
        let (registry, _) = kick_registry();
        let (lines, mut reply) = collect();
        assert!(!registry.dispatch("fly", "Steve", false, &mut reply));
        assert!(!registry.dispatch("   ", "Steve", false, &mut reply));
        assert!(lines.lock().unwrap().is_empty());
    }

    #[test]
    fn test_case_insensitive_and_replacement() {
        let registry = CommandRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        registry.register("Spawn", "old", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let h = hits.clone();
        registry.register("spawn", "new", move |_| {
            h.fetch_add(100, Ordering::SeqCst);
            Ok(())
        });
        let (_, mut reply) = collect();
        assert!(registry.dispatch("SPAWN", "Steve", false, &mut reply));
        assert_eq!(hits.load(Ordering::SeqCst), 100);
        let commands = registry.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].1, "new");
    }

    #[test]
    fn test_handler_error_is_reported() {
        let (registry, _) = kick_registry();
        let (lines, mut reply) = collect();
        assert!(registry.dispatch("kick", "CONSOLE", true, &mut reply));
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("usage"));
    }

    #[test]
    fn test_handler_panic_is_reported() {
        let registry = CommandRegistry::new();
        registry.register("boom", "Index an empty list", |inv| {
            let empty: Vec<&str> = Vec::new();
            inv.reply(empty[0]);
            Ok(())
        });
        registry.register("oops", "Panic with a message", |_| panic!("bad state {}", 3));
        let (lines, mut reply) = collect();

        assert!(registry.dispatch("boom", "Steve", false, &mut reply));
        assert!(registry.dispatch("oops", "CONSOLE", true, &mut reply));
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Error: Internal error: index out of bounds"));
        assert_eq!(lines[1], "Error: Internal error: bad state 3");
    }

    #[test]
    fn test_registry_usable_after_panic() {
        let (registry, kicked) = kick_registry();
        registry.register("boom", "Always panics", |_| panic!("boom"));
        let (_, mut reply) = collect();
        registry.dispatch("boom", "CONSOLE", true, &mut reply);
        registry.op("Steve");
        assert!(registry.dispatch("kick Alex", "Steve", false, &mut reply));
        assert_eq!(*kicked.lock().unwrap(), vec!["Alex"]);
    }

    #[test]
    fn test_handler_can_change_operators() {
        let registry = Arc::new(CommandRegistry::new());
        let r = registry.clone();
        registry.register_op("op", "Grant operator", move |inv| {
            for name in &inv.args {
                r.op(name);
            }
            Ok(())
        });
        let (_, mut reply) = collect();
        assert!(registry.dispatch("op Alex", "CONSOLE", true, &mut reply));
        assert!(registry.is_op("alex"));
        assert!(registry.deop("ALEX"));
        assert!(!registry.is_op("Alex"));
    }

    #[test]
    fn test_rest_joins_arguments() {
        let registry = CommandRegistry::new();
        let said = Arc::new(Mutex::new(String::new()));
        let s = said.clone();
        registry.register("say", "Broadcast", move |inv| {
            *s.lock().unwrap() = inv.rest(0);
            Ok(())
        });
        let (_, mut reply) = collect();
        registry.dispatch("say  hello   there ", "Steve", false, &mut reply);
        assert_eq!(*said.lock().unwrap(), "hello there");
    }
}
