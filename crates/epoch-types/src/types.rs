use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A block position in the world (x, y, z integers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Encode as a 64-bit long (1.8 layout).
    /// x: 26 bits, y: 12 bits, z: 26 bits
    pub fn encode(&self) -> u64 {
        ((self.x as u64 & 0x3FFFFFF) << 38)
            | ((self.y as u64 & 0xFFF) << 26)
            | (self.z as u64 & 0x3FFFFFF)
    }

    pub fn decode(val: u64) -> Self {
        let mut x = (val >> 38) as i32;
        let mut y = ((val >> 26) & 0xFFF) as i32;
        let mut z = (val & 0x3FFFFFF) as i32;
        if x >= 1 << 25 {
            x -= 1 << 26;
        }
        if y >= 1 << 11 {
            y -= 1 << 12;
        }
        if z >= 1 << 25 {
            z -= 1 << 26;
        }
        Self { x, y, z }
    }

    pub fn chunk_pos(&self) -> ChunkPos {
        ChunkPos {
            x: self.x >> 4,
            z: self.z >> 4,
        }
    }

    /// The neighbouring position on the given face (0=-y, 1=+y, 2=-z, 3=+z, 4=-x, 5=+x).
    pub fn offset(&self, face: u8) -> BlockPos {
        match face {
            0 => BlockPos::new(self.x, self.y - 1, self.z),
            1 => BlockPos::new(self.x, self.y + 1, self.z),
            2 => BlockPos::new(self.x, self.y, self.z - 1),
            3 => BlockPos::new(self.x, self.y, self.z + 1),
            4 => BlockPos::new(self.x - 1, self.y, self.z),
            5 => BlockPos::new(self.x + 1, self.y, self.z),
            _ => *self,
        }
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A chunk position (x, z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

/// A 3D position with double precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3d {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn block_pos(&self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }

    pub fn distance_squared(&self, other: &Vec3d) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

/// A player's location and look direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub position: Vec3d,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    pub fn new(position: Vec3d, yaw: f32, pitch: f32) -> Self {
        Self {
            position,
            yaw,
            pitch,
        }
    }
}

/// Convert a block coordinate to the 1/32 fixed-point form used by older protocols.
pub fn to_fixed_point(value: f64) -> i32 {
    (value * 32.0).floor() as i32
}

pub fn from_fixed_point(value: i32) -> f64 {
    value as f64 / 32.0
}

/// Convert degrees to a protocol angle (256ths of a turn).
pub fn degrees_to_angle(degrees: f32) -> u8 {
    ((degrees / 360.0) * 256.0) as i32 as u8
}

pub fn angle_to_degrees(angle: u8) -> f32 {
    angle as f32 * 360.0 / 256.0
}

/// Generate a stable offline-mode UUID from a player name.
pub fn offline_uuid(name: &str) -> Uuid {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let input = format!("OfflinePlayer:{}", name);
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    let h1 = hasher.finish();
    input.len().hash(&mut hasher);
    let h2 = hasher.finish();
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&h1.to_be_bytes());
    bytes[8..].copy_from_slice(&h2.to_be_bytes());
    bytes[6] = (bytes[6] & 0x0f) | 0x30;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}
