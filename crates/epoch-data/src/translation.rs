use epoch_version::{Family, ProtocolVersion};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::{debug, error};

use crate::blocks::AIR;

/// The table file shipped with the server.
pub const BUNDLED_TABLES: &str = include_str!("../data/blocks.toml");

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Failed to parse translation tables: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to read translation tables: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unknown family '{0}' in translation tables")]
    UnknownFamily(String),
    #[error("Invalid block id '{0}' in {1} -> {2} table")]
    InvalidBlockId(String, Family, Family),
    #[error("Inverted identity range [{0}, {1}] in {2} -> {3} table")]
    InvertedRange(u8, u8, Family, Family),
    #[error("Table {0} -> {0} is implicit and must not be declared")]
    IdentityTable(Family),
    #[error("Duplicate translation table {0} -> {1}")]
    DuplicateTable(Family, Family),
    #[error("Missing translation table {0} -> {1}")]
    MissingTable(Family, Family),
}

#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default, rename = "table")]
    tables: Vec<TableSection>,
}

#[derive(Debug, Deserialize)]
struct TableSection {
    from: String,
    to: String,
    #[serde(default)]
    identity: Vec<[u8; 2]>,
    #[serde(default)]
    map: HashMap<String, u8>,
}

/// Source id -> destination id for one ordered family pair.
/// Unlisted ids translate to air.
#[derive(Clone)]
pub struct TranslationTable {
    from: Family,
    to: Family,
    ids: [u8; 256],
    explicit: usize,
}

impl TranslationTable {
    pub fn new(from: Family, to: Family) -> Self {
        Self {
            from,
            to,
            ids: [AIR; 256],
            explicit: 0,
        }
    }

    pub fn insert(&mut self, source: u8, destination: u8) {
        self.ids[source as usize] = destination;
        self.explicit += 1;
    }

    pub fn get(&self, source: u8) -> u8 {
        self.ids[source as usize]
    }

    pub fn from(&self) -> Family {
        self.from
    }

    pub fn to(&self) -> Family {
        self.to
    }

    /// Number of entries written while loading (overlaps counted once per write).
    pub fn explicit_entries(&self) -> usize {
        self.explicit
    }

    fn apply(&self, ids: &mut [u8]) {
        for id in ids.iter_mut() {
            *id = self.ids[*id as usize];
        }
    }
}

impl std::fmt::Debug for TranslationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationTable")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("explicit", &self.explicit)
            .finish()
    }
}

/// Converts block ids between families.
///
/// Construction guarantees a table for every ordered pair of distinct
/// families, so lookups never have to fall back.
#[derive(Debug, Clone)]
pub struct BlockTranslator {
    tables: HashMap<(Family, Family), TranslationTable>,
}

impl BlockTranslator {
    /// Load the tables shipped with the crate.
    pub fn bundled() -> Result<Self, TranslationError> {
        Self::from_toml_str(BUNDLED_TABLES)
    }

    pub fn load(path: &Path) -> Result<Self, TranslationError> {
        let contents = std::fs::read_to_string(path)?;
        let translator = Self::from_toml_str(&contents)?;
        debug!("Loaded {} translation tables from {}", translator.tables.len(), path.display());
        Ok(translator)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, TranslationError> {
        let file: TableFile = toml::from_str(contents)?;
        let mut tables = HashMap::new();

        for section in file.tables {
            let table = build_table(&section)?;
            let key = (table.from, table.to);
            if tables.insert(key, table).is_some() {
                return Err(TranslationError::DuplicateTable(key.0, key.1));
            }
        }

        for from in Family::iter() {
            for to in Family::iter() {
                if from != to && !tables.contains_key(&(from, to)) {
                    return Err(TranslationError::MissingTable(from, to));
                }
            }
        }

        Ok(Self { tables })
    }

    pub fn table(&self, from: Family, to: Family) -> Option<&TranslationTable> {
        self.tables.get(&(from, to))
    }

    /// Translate one block id. Same-family pairs pass through untouched.
    pub fn translate(&self, id: u8, from: &ProtocolVersion, to: &ProtocolVersion) -> u8 {
        if from.family() == to.family() {
            return id;
        }
        match self.lookup(from.family(), to.family()) {
            Some(table) => table.get(id),
            None => AIR,
        }
    }

    /// Translate a whole buffer in place; a no-op when the families match.
    pub fn translate_array(&self, ids: &mut [u8], from: &ProtocolVersion, to: &ProtocolVersion) {
        if from.family() == to.family() {
            return;
        }
        match self.lookup(from.family(), to.family()) {
            Some(table) => table.apply(ids),
            None => ids.fill(AIR),
        }
    }

    /// Table for a pair of distinct families. A miss means construction let
    /// an incomplete set through; release builds fall back to air.
    fn lookup(&self, from: Family, to: Family) -> Option<&TranslationTable> {
        let table = self.tables.get(&(from, to));
        debug_assert!(table.is_some(), "No translation table for {} -> {}", from, to);
        if table.is_none() {
            error!("No translation table for {} -> {}", from, to);
        }
        table
    }
}

fn parse_family(name: &str) -> Result<Family, TranslationError> {
    name.parse()
        .map_err(|_| TranslationError::UnknownFamily(name.to_string()))
}

fn build_table(section: &TableSection) -> Result<TranslationTable, TranslationError> {
    let from = parse_family(&section.from)?;
    let to = parse_family(&section.to)?;
    if from == to {
        return Err(TranslationError::IdentityTable(from));
    }

    let mut table = TranslationTable::new(from, to);
    for [lo, hi] in &section.identity {
        if lo > hi {
            return Err(TranslationError::InvertedRange(*lo, *hi, from, to));
        }
        for id in *lo..=*hi {
            table.insert(id, id);
        }
    }
    for (source, destination) in &section.map {
        let source: u8 = source
            .trim()
            .parse()
            .map_err(|_| TranslationError::InvalidBlockId(source.clone(), from, to))?;
        table.insert(source, *destination);
    }
    Ok(table)
}
