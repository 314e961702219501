use crate::catalog::*;
use std::collections::HashMap;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// A protocol feature gated by the version that introduced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    BlockPlacement,
    BlockBreaking,
    PositionUpdates,
    Chat,
    EntitySpawning,
    ChunkData,
    Inventory,
    BlockMetadata,
    DayNightCycle,
    Health,
    /// UTF-16 strings on the raw wire.
    WideStrings,
    /// Food and saturation fields in the raw health packet.
    Hunger,
    MiningProgress,
    Compression,
    Encryption,
}

impl Capability {
    /// The built-in introduction threshold.
    pub fn threshold(self) -> ProtocolVersion {
        match self {
            Capability::BlockPlacement
            | Capability::BlockBreaking
            | Capability::PositionUpdates => RD_132328,
            Capability::Chat | Capability::EntitySpawning => C0_0_16A,
            Capability::ChunkData
            | Capability::Inventory
            | Capability::BlockMetadata
            | Capability::DayNightCycle => A1_0_15,
            Capability::Health => A1_2_0,
            Capability::WideStrings => B1_5,
            Capability::Hunger => B1_8,
            Capability::MiningProgress | Capability::Compression | Capability::Encryption => R1_8,
        }
    }

    pub fn is_available_in(self, version: &ProtocolVersion) -> bool {
        version.is_at_least(&self.threshold())
    }
}

/// The thresholds in force for this process.
///
/// Starts from [`Capability::threshold`] and can be overridden from
/// configuration; read-only once the server is running.
#[derive(Debug, Clone)]
pub struct CapabilityMatrix {
    thresholds: HashMap<Capability, ProtocolVersion>,
}

impl CapabilityMatrix {
    pub fn new() -> Self {
        Self {
            thresholds: Capability::iter().map(|c| (c, c.threshold())).collect(),
        }
    }

    /// Build a matrix from `capability name -> version name` overrides.
    pub fn with_overrides(
        catalog: &VersionCatalog,
        overrides: &HashMap<String, String>,
    ) -> Result<Self, CatalogError> {
        let mut matrix = Self::new();
        for (name, version_name) in overrides {
            let capability: Capability = name
                .parse()
                .map_err(|_| CatalogError::UnknownCapability(name.clone()))?;
            let version = catalog.by_name(version_name)?;
            tracing::debug!("Capability {} now starts at {}", capability, version);
            matrix.thresholds.insert(capability, version);
        }
        Ok(matrix)
    }

    pub fn threshold(&self, capability: Capability) -> ProtocolVersion {
        self.thresholds
            .get(&capability)
            .copied()
            .unwrap_or_else(|| capability.threshold())
    }

    pub fn supports(&self, capability: Capability, version: &ProtocolVersion) -> bool {
        version.is_at_least(&self.threshold(capability))
    }

    /// Every capability the given version has, in declaration order.
    pub fn available_in(&self, version: &ProtocolVersion) -> Vec<Capability> {
        Capability::iter()
            .filter(|c| self.supports(*c, version))
            .collect()
    }
}

impl Default for CapabilityMatrix {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_capability_exhaustively() {
        let catalog = VersionCatalog::standard();
        for capability in Capability::iter() {
            let threshold = capability.threshold();
            assert!(
                catalog.iter().any(|v| *v == threshold),
                "{} threshold is not a catalog entry",
                capability
            );
            for version in catalog.iter() {
                let expected = version.chronological_order() >= threshold.chronological_order();
                assert_eq!(
                    capability.is_available_in(version),
                    expected,
                    "{} in {}",
                    capability,
                    version
                );
            }
            assert!(capability.is_available_in(&catalog.newest()));
            if let Some(before) = catalog.previous(&threshold) {
                assert!(!capability.is_available_in(&before), "{} in {}", capability, before);
            }
        }
    }

    #[test]
    fn test_capabilities_are_monotonic() {
        let catalog = VersionCatalog::standard();
        let matrix = CapabilityMatrix::new();
        let all: Vec<_> = catalog.iter().copied().collect();
        for pair in all.windows(2) {
            let older = matrix.available_in(&pair[0]);
            let newer = matrix.available_in(&pair[1]);
            for c in older {
                assert!(newer.contains(&c), "{} lost between {} and {}", c, pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn test_spot_checks() {
        assert!(Capability::Chat.is_available_in(&C0_30));
        assert!(!Capability::Chat.is_available_in(&RD_160052));
        assert!(Capability::Health.is_available_in(&PE_0_6_1));
        assert!(!Capability::Health.is_available_in(&A1_1_0));
        // Raw 17 (b1.8) is "bigger" than raw 13 (pe-0.6.1), but release order decides.
        assert!(Capability::Hunger.is_available_in(&PE_0_6_1));
        assert!(!Capability::Compression.is_available_in(&PE_0_7_0));
    }

    #[test]
    fn test_capability_names() {
        assert_eq!(Capability::DayNightCycle.to_string(), "day_night_cycle");
        assert_eq!(
            "mining_progress".parse::<Capability>().unwrap(),
            Capability::MiningProgress
        );
    }

    #[test]
    fn test_overrides() {
        let catalog = VersionCatalog::standard();
        let mut overrides = HashMap::new();
        overrides.insert("chat".to_string(), "c0.0.20a".to_string());
        let matrix = CapabilityMatrix::with_overrides(&catalog, &overrides).unwrap();
        assert_eq!(matrix.threshold(Capability::Chat), C0_0_20A);
        assert!(!matrix.supports(Capability::Chat, &C0_0_16A));
        assert!(matrix.supports(Capability::Chat, &C0_0_20A));
        // Untouched capabilities keep the built-in threshold.
        assert_eq!(matrix.threshold(Capability::Health), A1_2_0);
    }

    #[test]
    fn test_bad_overrides() {
        let catalog = VersionCatalog::standard();
        let mut overrides = HashMap::new();
        overrides.insert("teleportation".to_string(), "b1.0".to_string());
        assert!(matches!(
            CapabilityMatrix::with_overrides(&catalog, &overrides),
            Err(CatalogError::UnknownCapability(_))
        ));

        let mut overrides = HashMap::new();
        overrides.insert("chat".to_string(), "b9.9".to_string());
        assert!(matches!(
            CapabilityMatrix::with_overrides(&catalog, &overrides),
            Err(CatalogError::UnknownVersion(_))
        ));
    }
}
