//! Legacy numeric block ids shared by most families.

pub const AIR: u8 = 0;
pub const STONE: u8 = 1;
pub const GRASS: u8 = 2;
pub const DIRT: u8 = 3;
pub const COBBLESTONE: u8 = 4;
pub const PLANKS: u8 = 5;
pub const BEDROCK: u8 = 7;
pub const WATER: u8 = 9;
pub const SAND: u8 = 12;
pub const GRAVEL: u8 = 13;
pub const LOG: u8 = 17;
pub const LEAVES: u8 = 18;
pub const GLASS: u8 = 20;
pub const WOOL: u8 = 35;
pub const OBSIDIAN: u8 = 49;

/// Human-readable name for the ids above.
pub fn block_name(id: u8) -> Option<&'static str> {
    Some(match id {
        AIR => "air",
        STONE => "stone",
        GRASS => "grass",
        DIRT => "dirt",
        COBBLESTONE => "cobblestone",
        PLANKS => "planks",
        BEDROCK => "bedrock",
        WATER => "water",
        SAND => "sand",
        GRAVEL => "gravel",
        LOG => "log",
        LEAVES => "leaves",
        GLASS => "glass",
        WOOL => "wool",
        OBSIDIAN => "obsidian",
        _ => return None,
    })
}

/// Blocks a player cannot break or replace.
pub fn is_unbreakable(id: u8) -> bool {
    id == BEDROCK
}
