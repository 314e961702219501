use crate::chunk::Chunk;
use epoch_data::blocks::{BEDROCK, DIRT, GRASS, STONE};
use epoch_data::BlockTranslator;
use epoch_version::{ProtocolVersion, B1_8};

/// Y of the grass layer in a flat world.
pub const SURFACE_Y: usize = 32;

/// Generate a flat column, expressed in `native`'s id space.
///
/// Layer layout:
///   y = 0: bedrock
///   y = 1..=28: stone
///   y = 29..=31: dirt
///   y = 32: grass
pub fn generate_flat_chunk(translator: &BlockTranslator, native: &ProtocolVersion) -> Chunk {
    let mut layers = [0u8; SURFACE_Y + 1];
    layers[0] = BEDROCK;
    layers[1..=28].fill(STONE);
    layers[29..=31].fill(DIRT);
    layers[SURFACE_Y] = GRASS;
    // The layer ids are beta ids.
    translator.translate_array(&mut layers, &B1_8, native);

    let mut chunk = Chunk::new();
    for (y, &id) in layers.iter().enumerate() {
        chunk.fill_layer(y, id);
    }
    chunk
}
