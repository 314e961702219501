use epoch_version::{Family, ProtocolVersion, VersionCatalog};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Classic, alpha and beta clients.
    #[serde(default = "default_raw_port")]
    pub raw_port: u16,
    /// Prototype and mobile clients.
    #[serde(default = "default_prefixed_port")]
    pub prefixed_port: u16,
    /// Release clients.
    #[serde(default = "default_varint_port")]
    pub varint_port: u16,
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    #[serde(default = "default_motd")]
    pub motd: String,
    /// Ask release clients for an encrypted session.
    #[serde(default)]
    pub encryption: bool,
    /// Release packets at or above this size are zlib-compressed. Negative
    /// disables compression.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: i32,
    #[serde(default)]
    pub world: WorldConfig,
    /// Replacement for the bundled block translation tables.
    #[serde(default)]
    pub translation_file: Option<PathBuf>,
    /// Names granted operator at startup.
    #[serde(default)]
    pub operators: Vec<String>,
    /// Capability name -> version name that introduces it.
    #[serde(default)]
    pub capabilities: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct WorldConfig {
    /// Family whose block ids the world is stored in.
    #[serde(default = "default_world_family")]
    pub family: String,
    /// Side length of the square world, in chunks.
    #[serde(default = "default_size_chunks")]
    pub size_chunks: i32,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_raw_port() -> u16 {
    25565
}

fn default_prefixed_port() -> u16 {
    25566
}

fn default_varint_port() -> u16 {
    25567
}

fn default_max_players() -> usize {
    20
}

fn default_motd() -> String {
    "An Epoch Server".into()
}

fn default_compression_threshold() -> i32 {
    256
}

fn default_world_family() -> String {
    "beta".into()
}

fn default_size_chunks() -> i32 {
    8
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            family: default_world_family(),
            size_chunks: default_size_chunks(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            raw_port: default_raw_port(),
            prefixed_port: default_prefixed_port(),
            varint_port: default_varint_port(),
            max_players: default_max_players(),
            motd: default_motd(),
            encryption: false,
            compression_threshold: default_compression_threshold(),
            world: WorldConfig::default(),
            translation_file: None,
            operators: Vec::new(),
            capabilities: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ServerConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// The newest version of the configured world family. World block ids
    /// live in its id space.
    pub fn native_version(&self, catalog: &VersionCatalog) -> anyhow::Result<ProtocolVersion> {
        let family: Family = self
            .world
            .family
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown world family '{}'", self.world.family))?;
        catalog
            .latest(family)
            .ok_or_else(|| anyhow::anyhow!("No versions in family {}", family))
    }
}
