use crate::config::ServerConfig;
use crate::keys::ServerKeys;
use crate::player::PlayerList;
use epoch_commands::CommandRegistry;
use epoch_data::BlockTranslator;
use epoch_events::EventBus;
use epoch_protocol_prefixed::PrefixedRegistry;
use epoch_protocol_raw::RawRegistry;
use epoch_protocol_varint::VarIntRegistry;
use epoch_version::{Capability, CapabilityMatrix, ProtocolVersion, VersionCatalog};
use epoch_world::{FlatWorld, WorldStore};
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Process-wide state shared by every connection. Built once at startup.
pub struct ServerContext {
    pub config: ServerConfig,
    pub catalog: VersionCatalog,
    pub capabilities: CapabilityMatrix,
    pub translator: BlockTranslator,
    pub world: Arc<dyn WorldStore>,
    pub events: EventBus,
    pub commands: CommandRegistry,
    pub players: PlayerList,
    pub keys: Option<ServerKeys>,
    pub raw_registry: Arc<RawRegistry>,
    pub prefixed_registry: Arc<PrefixedRegistry>,
    pub varint_registry: Arc<VarIntRegistry>,
    next_eid: AtomicI32,
    time: AtomicI64,
    shutdown: watch::Sender<bool>,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let catalog = VersionCatalog::standard();
        let capabilities = CapabilityMatrix::with_overrides(&catalog, &config.capabilities)?;

        let translator = match &config.translation_file {
            Some(path) => {
                info!("Loading block tables from {}", path.display());
                BlockTranslator::load(path)?
            }
            None => BlockTranslator::bundled()?,
        };

        let native = config.native_version(&catalog)?;
        let world = Arc::new(FlatWorld::new(&translator, native, config.world.size_chunks));
        info!(
            "World generated (flat, {}x{} chunks, {} ids)",
            world.size_chunks(),
            world.size_chunks(),
            native
        );

        let keys = if config.encryption {
            info!("Generating RSA key pair");
            Some(ServerKeys::generate()?)
        } else {
            None
        };

        let commands = CommandRegistry::new();
        for name in &config.operators {
            commands.op(name);
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            catalog,
            capabilities,
            translator,
            world,
            events: EventBus::new(),
            commands,
            players: PlayerList::new(),
            keys,
            raw_registry: Arc::new(epoch_protocol_raw::build_registry()),
            prefixed_registry: Arc::new(epoch_protocol_prefixed::build_registry()),
            varint_registry: Arc::new(epoch_protocol_varint::build_registry()),
            next_eid: AtomicI32::new(1),
            time: AtomicI64::new(0),
            shutdown,
        })
    }

    pub fn native_version(&self) -> ProtocolVersion {
        self.world.native_version()
    }

    /// Whether a client may be sent something gated by `capability`.
    ///
    /// Configured thresholds can only hold a feature back; the codecs keep
    /// the built-in packet sets.
    pub fn supports(&self, capability: Capability, version: &ProtocolVersion) -> bool {
        self.capabilities.supports(capability, version) && capability.is_available_in(version)
    }

    /// World block id -> the client's id space.
    pub fn block_for(&self, id: u8, client: &ProtocolVersion) -> u8 {
        self.translator.translate(id, &self.native_version(), client)
    }

    /// The client's block id -> world id space.
    pub fn block_from(&self, id: u8, client: &ProtocolVersion) -> u8 {
        self.translator.translate(id, client, &self.native_version())
    }

    pub fn next_entity_id(&self) -> i32 {
        self.next_eid.fetch_add(1, Ordering::Relaxed)
    }

    pub fn world_time(&self) -> i64 {
        self.time.load(Ordering::Relaxed)
    }

    /// Advance world time. Returns the new time.
    pub fn advance_time(&self, ticks: i64) -> i64 {
        self.time.fetch_add(ticks, Ordering::Relaxed) + ticks
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epoch_version::{B1_8, C0_30, RD_132328, RD_160052};
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let ctx = ServerContext::new(ServerConfig::default()).unwrap();
        assert_eq!(ctx.native_version(), B1_8);
        assert!(ctx.keys.is_none());
        assert_eq!(ctx.next_entity_id(), 1);
        assert_eq!(ctx.next_entity_id(), 2);
        assert_eq!(ctx.advance_time(20), 20);
        assert_eq!(ctx.world_time(), 20);
    }

    #[test]
    fn test_block_translation_against_native() {
        let ctx = ServerContext::new(ServerConfig::default()).unwrap();
        // Beta stone is cobblestone to the prototype.
        assert_eq!(ctx.block_for(1, &RD_160052), 4);
        assert_eq!(ctx.block_for(1, &C0_30), 1);
        assert_eq!(ctx.block_from(4, &RD_132328), 4);
        assert_eq!(ctx.block_for(1, &B1_8), 1);
    }

    #[test]
    fn test_capability_override_holds_back() {
        let mut config = ServerConfig::default();
        config.capabilities = HashMap::from([
            ("chat".to_string(), "a1.0.15".to_string()),
            ("day_night_cycle".to_string(), "c0.0.16a_02".to_string()),
        ]);
        let ctx = ServerContext::new(config).unwrap();
        assert!(!ctx.supports(Capability::Chat, &C0_30));
        assert!(ctx.supports(Capability::Chat, &B1_8));
        // Moving a threshold earlier does not reach past the wire format.
        assert!(!ctx.supports(Capability::DayNightCycle, &C0_30));
    }

    #[test]
    fn test_unknown_capability_fails_startup() {
        let mut config = ServerConfig::default();
        config.capabilities = HashMap::from([("flight".to_string(), "b1.8".to_string())]);
        assert!(ServerContext::new(config).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let ctx = ServerContext::new(ServerConfig::default()).unwrap();
        let mut rx = ctx.shutdown_signal();
        ctx.request_shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
