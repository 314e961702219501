use crate::chunk::{Chunk, CHUNK_WIDTH, WORLD_HEIGHT};
use crate::generator::{generate_flat_chunk, SURFACE_Y};
use epoch_data::BlockTranslator;
use epoch_types::{BlockPos, ChunkPos, Vec3d};
use epoch_version::ProtocolVersion;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("position {0} is outside the world")]
    OutOfBounds(BlockPos),
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

/// What the server needs from world storage. Ids are always in the id
/// space of [`WorldStore::native_version`].
pub trait WorldStore: Send + Sync {
    fn native_version(&self) -> ProtocolVersion;

    /// Side length of the square world, in chunks. Chunks span
    /// `0..size_chunks` on both axes.
    fn size_chunks(&self) -> i32;

    fn spawn(&self) -> Vec3d;

    fn get_block(&self, pos: BlockPos) -> u8;

    /// Replace a block. Returns the old id.
    fn set_block(&self, pos: BlockPos, id: u8) -> Result<u8, WorldError>;

    /// A snapshot of one column, or `None` outside the world.
    fn chunk(&self, pos: ChunkPos) -> Option<Chunk>;

    /// Side length in blocks.
    fn size_blocks(&self) -> usize {
        self.size_chunks() as usize * CHUNK_WIDTH
    }

    fn contains(&self, pos: BlockPos) -> bool {
        let size = self.size_blocks() as i32;
        (0..size).contains(&pos.x)
            && (0..WORLD_HEIGHT as i32).contains(&pos.y)
            && (0..size).contains(&pos.z)
    }

    /// The whole world as one array, X fastest, then Z, then Y. This is
    /// the layout of the classic and prototype level streams.
    fn level_blocks(&self) -> Vec<u8> {
        let size = self.size_blocks();
        let mut out = vec![0u8; size * size * WORLD_HEIGHT];
        for cx in 0..self.size_chunks() {
            for cz in 0..self.size_chunks() {
                let Some(chunk) = self.chunk(ChunkPos::new(cx, cz)) else {
                    continue;
                };
                for lx in 0..CHUNK_WIDTH {
                    for lz in 0..CHUNK_WIDTH {
                        let x = cx as usize * CHUNK_WIDTH + lx;
                        let z = cz as usize * CHUNK_WIDTH + lz;
                        for y in 0..WORLD_HEIGHT {
                            out[(y * size + z) * size + x] = chunk.get_block(lx, y, lz);
                        }
                    }
                }
            }
        }
        out
    }
}

/// An in-memory flat world. Columns are generated on first touch and kept
/// until the process exits.
pub struct FlatWorld {
    native: ProtocolVersion,
    size_chunks: i32,
    template: Chunk,
    chunks: RwLock<HashMap<ChunkPos, Chunk>>,
}

impl FlatWorld {
    pub fn new(translator: &BlockTranslator, native: ProtocolVersion, size_chunks: i32) -> Self {
        Self {
            native,
            size_chunks: size_chunks.max(1),
            template: generate_flat_chunk(translator, &native),
            chunks: RwLock::new(HashMap::new()),
        }
    }

    fn in_range(&self, pos: ChunkPos) -> bool {
        (0..self.size_chunks).contains(&pos.x) && (0..self.size_chunks).contains(&pos.z)
    }
}

impl WorldStore for FlatWorld {
    fn native_version(&self) -> ProtocolVersion {
        self.native
    }

    fn size_chunks(&self) -> i32 {
        self.size_chunks
    }

    fn spawn(&self) -> Vec3d {
        let center = self.size_blocks() as f64 / 2.0;
        Vec3d::new(center + 0.5, (SURFACE_Y + 1) as f64, center + 0.5)
    }

    fn get_block(&self, pos: BlockPos) -> u8 {
        if !self.contains(pos) {
            return 0;
        }
        let chunk_pos = pos.chunk_pos();
        let (lx, lz) = (pos.x.rem_euclid(16) as usize, pos.z.rem_euclid(16) as usize);
        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        chunks
            .get(&chunk_pos)
            .unwrap_or(&self.template)
            .get_block(lx, pos.y as usize, lz)
    }

    fn set_block(&self, pos: BlockPos, id: u8) -> Result<u8, WorldError> {
        if !self.contains(pos) {
            return Err(WorldError::OutOfBounds(pos));
        }
        let chunk_pos = pos.chunk_pos();
        let (lx, lz) = (pos.x.rem_euclid(16) as usize, pos.z.rem_euclid(16) as usize);
        let mut chunks = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        let chunk = chunks.entry(chunk_pos).or_insert_with(|| {
            debug!("Materialized chunk {:?}", chunk_pos);
            self.template.clone()
        });
        Ok(chunk.set_block(lx, pos.y as usize, lz, id))
    }

    fn chunk(&self, pos: ChunkPos) -> Option<Chunk> {
        if !self.in_range(pos) {
            return None;
        }
        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        Some(chunks.get(&pos).unwrap_or(&self.template).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epoch_data::blocks::{BEDROCK, COBBLESTONE, GRASS};
    use epoch_version::B1_8;

    fn world() -> FlatWorld {
        FlatWorld::new(&BlockTranslator::bundled().unwrap(), B1_8, 2)
    }

    #[test]
    fn test_get_and_set() {
        let world = world();
        let pos = BlockPos::new(20, SURFACE_Y as i32, 3);
        assert_eq!(world.get_block(pos), GRASS);
        assert_eq!(world.set_block(pos, COBBLESTONE).unwrap(), GRASS);
        assert_eq!(world.get_block(pos), COBBLESTONE);
        // The neighbour column is untouched.
        assert_eq!(world.get_block(BlockPos::new(3, SURFACE_Y as i32, 3)), GRASS);
        let chunk = world.chunk(ChunkPos::new(1, 0)).unwrap();
        assert_eq!(chunk.get_block(4, SURFACE_Y, 3), COBBLESTONE);
    }

    #[test]
    fn test_bounds() {
        let world = world();
        assert_eq!(world.get_block(BlockPos::new(-1, 0, 0)), 0);
        assert_eq!(world.get_block(BlockPos::new(0, 0, 0)), BEDROCK);
        assert!(matches!(
            world.set_block(BlockPos::new(32, 10, 0), 1),
            Err(WorldError::OutOfBounds(_))
        ));
        assert!(world.set_block(BlockPos::new(0, 128, 0), 1).is_err());
        assert!(world.chunk(ChunkPos::new(2, 0)).is_none());
    }

    #[test]
    fn test_level_blocks_layout() {
        let world = world();
        world.set_block(BlockPos::new(5, 40, 7), COBBLESTONE).unwrap();
        let level = world.level_blocks();
        let size = world.size_blocks();
        assert_eq!(level.len(), size * size * WORLD_HEIGHT);
        assert_eq!(level[(40 * size + 7) * size + 5], COBBLESTONE);
        assert_eq!(level[0], BEDROCK);
        assert_eq!(level[(SURFACE_Y * size) * size], GRASS);
    }

    #[test]
    fn test_spawn_is_above_surface() {
        let world = world();
        let spawn = world.spawn();
        assert_eq!(spawn.y, 33.0);
        assert_eq!(world.get_block(spawn.block_pos()), 0);
    }
}
