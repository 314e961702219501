/// Blocks along each horizontal side of a chunk column.
pub const CHUNK_WIDTH: usize = 16;
/// Height of every column, in blocks.
pub const WORLD_HEIGHT: usize = 128;
pub const CHUNK_VOLUME: usize = CHUNK_WIDTH * CHUNK_WIDTH * WORLD_HEIGHT;
/// Sections of 16 blocks stacked in one column.
pub const SECTION_COUNT: usize = WORLD_HEIGHT / 16;

/// Index into a column. Y runs fastest, then Z, then X, which is the order
/// the alpha/beta map chunk and the mobile column both expect.
pub fn index(x: usize, y: usize, z: usize) -> usize {
    y + z * WORLD_HEIGHT + x * WORLD_HEIGHT * CHUNK_WIDTH
}

/// A 16x128x16 column of block ids in the world's native id space.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    blocks: Vec<u8>,
}

impl Chunk {
    /// An all-air column.
    pub fn new() -> Self {
        Self {
            blocks: vec![0; CHUNK_VOLUME],
        }
    }

    pub fn get_block(&self, x: usize, y: usize, z: usize) -> u8 {
        self.blocks[index(x, y, z)]
    }

    /// Set a block. Returns the old id.
    pub fn set_block(&mut self, x: usize, y: usize, z: usize, id: u8) -> u8 {
        std::mem::replace(&mut self.blocks[index(x, y, z)], id)
    }

    /// Fill one horizontal layer.
    pub fn fill_layer(&mut self, y: usize, id: u8) {
        for x in 0..CHUNK_WIDTH {
            for z in 0..CHUNK_WIDTH {
                self.blocks[index(x, y, z)] = id;
            }
        }
    }

    pub fn blocks(&self) -> &[u8] {
        &self.blocks
    }

    /// Y of the highest non-air block in a column.
    pub fn highest_block(&self, x: usize, z: usize) -> Option<usize> {
        let start = index(x, 0, z);
        self.blocks[start..start + WORLD_HEIGHT]
            .iter()
            .rposition(|&id| id != 0)
    }

    pub fn section_is_empty(&self, section: usize) -> bool {
        (0..CHUNK_WIDTH).all(|x| {
            (0..CHUNK_WIDTH).all(|z| {
                let start = index(x, section * 16, z);
                self.blocks[start..start + 16].iter().all(|&id| id == 0)
            })
        })
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}
