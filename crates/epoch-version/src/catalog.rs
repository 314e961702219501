use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// A mutually incompatible protocol lineage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Family {
    Original,
    Classic,
    Alpha,
    Beta,
    Mobile,
    Release,
}

impl Family {
    /// The framing discipline every version of this family speaks.
    pub fn scheme(self) -> WireScheme {
        match self {
            Family::Classic | Family::Alpha | Family::Beta => WireScheme::Raw,
            Family::Original | Family::Mobile => WireScheme::LengthPrefixed,
            Family::Release => WireScheme::VarInt,
        }
    }
}

/// The three structurally different wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum WireScheme {
    /// `[id][payload]`, payload length implied by the packet type.
    Raw,
    /// `[u32 length][u8 type][payload]`.
    LengthPrefixed,
    /// `[VarInt length][VarInt id][payload]`.
    VarInt,
}

/// One entry of the version catalog.
///
/// Raw numbers are reused across families, so "newer than" questions must go
/// through [`ProtocolVersion::is_at_least`], which compares release order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    name: &'static str,
    family: Family,
    raw: i32,
    order: u16,
}

impl ProtocolVersion {
    pub const fn new(name: &'static str, family: Family, raw: i32, order: u16) -> Self {
        Self {
            name,
            family,
            raw,
            order,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// The version integer as it appears on the wire.
    pub fn raw_number(&self) -> i32 {
        self.raw
    }

    pub fn chronological_order(&self) -> u16 {
        self.order
    }

    pub fn scheme(&self) -> WireScheme {
        self.family.scheme()
    }

    /// True if `self` was released at the same time as or after `other`.
    pub fn is_at_least(&self, other: &ProtocolVersion) -> bool {
        self.order >= other.order
    }

    /// Look up a raw number in the standard catalog. See [`VersionCatalog::from_number`].
    pub fn from_number(raw: i32, families: &[Family]) -> Option<ProtocolVersion> {
        VersionCatalog::standard().from_number(raw, families)
    }
}

impl PartialOrd for ProtocolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProtocolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.cmp(&other.order)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} #{})", self.name, self.family, self.raw)
    }
}

// === Catalog entries, in release order ===

pub const RD_132328: ProtocolVersion = ProtocolVersion::new("rd-132328", Family::Original, 1, 0);
pub const RD_160052: ProtocolVersion = ProtocolVersion::new("rd-160052", Family::Original, 2, 1);

pub const C0_0_16A: ProtocolVersion = ProtocolVersion::new("c0.0.16a_02", Family::Classic, 3, 2);
pub const C0_0_20A: ProtocolVersion = ProtocolVersion::new("c0.0.20a", Family::Classic, 4, 3);
pub const C0_0_23A: ProtocolVersion = ProtocolVersion::new("c0.0.23a", Family::Classic, 5, 4);
pub const C0_28: ProtocolVersion = ProtocolVersion::new("c0.28", Family::Classic, 6, 5);
pub const C0_30: ProtocolVersion = ProtocolVersion::new("c0.30", Family::Classic, 7, 6);

pub const A1_0_15: ProtocolVersion = ProtocolVersion::new("a1.0.15", Family::Alpha, 13, 7);
pub const A1_0_16: ProtocolVersion = ProtocolVersion::new("a1.0.16", Family::Alpha, 14, 8);
pub const A1_0_17: ProtocolVersion = ProtocolVersion::new("a1.0.17", Family::Alpha, 1, 9);
pub const A1_1_0: ProtocolVersion = ProtocolVersion::new("a1.1.0", Family::Alpha, 2, 10);
pub const A1_2_0: ProtocolVersion = ProtocolVersion::new("a1.2.0", Family::Alpha, 3, 11);
pub const A1_2_2: ProtocolVersion = ProtocolVersion::new("a1.2.2", Family::Alpha, 4, 12);
pub const A1_2_3: ProtocolVersion = ProtocolVersion::new("a1.2.3", Family::Alpha, 5, 13);
pub const A1_2_5: ProtocolVersion = ProtocolVersion::new("a1.2.5", Family::Alpha, 6, 14);

pub const B1_0: ProtocolVersion = ProtocolVersion::new("b1.0", Family::Beta, 7, 15);
pub const B1_1_02: ProtocolVersion = ProtocolVersion::new("b1.1_02", Family::Beta, 8, 16);
pub const B1_3: ProtocolVersion = ProtocolVersion::new("b1.3", Family::Beta, 9, 17);
pub const B1_4: ProtocolVersion = ProtocolVersion::new("b1.4", Family::Beta, 10, 18);
pub const B1_5: ProtocolVersion = ProtocolVersion::new("b1.5", Family::Beta, 11, 19);
pub const B1_6: ProtocolVersion = ProtocolVersion::new("b1.6", Family::Beta, 13, 20);
pub const B1_7: ProtocolVersion = ProtocolVersion::new("b1.7", Family::Beta, 14, 21);
pub const B1_8: ProtocolVersion = ProtocolVersion::new("b1.8", Family::Beta, 17, 22);

pub const PE_0_6_1: ProtocolVersion = ProtocolVersion::new("pe-0.6.1", Family::Mobile, 13, 23);
pub const PE_0_7_0: ProtocolVersion = ProtocolVersion::new("pe-0.7.0", Family::Mobile, 14, 24);

pub const R1_8: ProtocolVersion = ProtocolVersion::new("1.8", Family::Release, 47, 25);

static STANDARD: [ProtocolVersion; 26] = [
    RD_132328, RD_160052, C0_0_16A, C0_0_20A, C0_0_23A, C0_28, C0_30, A1_0_15, A1_0_16, A1_0_17,
    A1_1_0, A1_2_0, A1_2_2, A1_2_3, A1_2_5, B1_0, B1_1_02, B1_3, B1_4, B1_5, B1_6, B1_7, B1_8,
    PE_0_6_1, PE_0_7_0, R1_8,
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Unknown protocol version '{0}'")]
    UnknownVersion(String),
    #[error("Unknown family '{0}'")]
    UnknownFamily(String),
    #[error("Unknown capability '{0}'")]
    UnknownCapability(String),
}

/// The ordered set of supported protocol versions.
///
/// Declaration order is release order; lookups that have to break ties walk
/// the catalog front to back.
#[derive(Debug, Clone, Copy)]
pub struct VersionCatalog {
    versions: &'static [ProtocolVersion],
}

impl VersionCatalog {
    pub fn standard() -> Self {
        Self {
            versions: &STANDARD,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static ProtocolVersion> {
        self.versions.iter()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Resolve a wire-level version number.
    ///
    /// Families are tried in the order the caller gives them; within one family
    /// the first catalog entry wins. With no families at all, the first entry in
    /// catalog order with a matching raw number is returned.
    pub fn from_number(&self, raw: i32, families: &[Family]) -> Option<ProtocolVersion> {
        if families.is_empty() {
            return self.versions.iter().find(|v| v.raw == raw).copied();
        }
        families.iter().find_map(|family| {
            self.versions
                .iter()
                .find(|v| v.family == *family && v.raw == raw)
                .copied()
        })
    }

    pub fn by_name(&self, name: &str) -> Result<ProtocolVersion, CatalogError> {
        self.versions
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
            .copied()
            .ok_or_else(|| CatalogError::UnknownVersion(name.to_string()))
    }

    pub fn family_versions(&self, family: Family) -> impl Iterator<Item = &'static ProtocolVersion> {
        self.versions.iter().filter(move |v| v.family == family)
    }

    pub fn earliest(&self, family: Family) -> Option<ProtocolVersion> {
        self.family_versions(family).next().copied()
    }

    pub fn latest(&self, family: Family) -> Option<ProtocolVersion> {
        self.family_versions(family).last().copied()
    }

    /// The newest version in the whole catalog.
    pub fn newest(&self) -> ProtocolVersion {
        self.versions
            .iter()
            .max()
            .copied()
            .unwrap_or(R1_8)
    }

    /// The closest entry released strictly before `version`.
    pub fn previous(&self, version: &ProtocolVersion) -> Option<ProtocolVersion> {
        self.versions
            .iter()
            .filter(|v| v.order < version.order)
            .max()
            .copied()
    }
}

impl Default for VersionCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
