//! Per-era encodings of world data. Every function takes block ids already
//! translated into the recipient's id space.

use crate::chunk::{index, CHUNK_VOLUME, CHUNK_WIDTH, SECTION_COUNT};
use crate::store::WorldError;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;

/// Payload bytes carried by one classic level data packet.
pub const LEVEL_CHUNK_LEN: usize = 1024;

const NIBBLES: usize = CHUNK_VOLUME / 2;

fn zlib(parts: &[&[u8]]) -> Result<Vec<u8>, WorldError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    for part in parts {
        encoder.write_all(part)?;
    }
    Ok(encoder.finish()?)
}

/// Classic level stream: gzip of a big-endian i32 block count followed by
/// the blocks (X fastest, then Z, then Y).
pub fn classic_level(level: &[u8]) -> Result<Vec<u8>, WorldError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&(level.len() as i32).to_be_bytes())?;
    encoder.write_all(level)?;
    Ok(encoder.finish()?)
}

/// Split a compressed classic level into `(length, padded chunk, percent)`
/// pieces for the level data packets.
pub fn classic_level_chunks(compressed: &[u8]) -> Vec<(u16, Vec<u8>, u8)> {
    let total = compressed.len().max(1);
    let mut sent = 0;
    compressed
        .chunks(LEVEL_CHUNK_LEN)
        .map(|piece| {
            sent += piece.len();
            let mut data = piece.to_vec();
            data.resize(LEVEL_CHUNK_LEN, 0);
            (piece.len() as u16, data, (sent * 100 / total) as u8)
        })
        .collect()
}

/// Prototype level stream: zlib of the blocks in level order.
pub fn original_level(level: &[u8]) -> Result<Vec<u8>, WorldError> {
    zlib(&[level])
}

/// Alpha/beta map chunk body for a full column: block ids, metadata
/// nibbles, block light, then sky light.
pub fn beta_map_chunk(blocks: &[u8]) -> Result<Vec<u8>, WorldError> {
    let metadata = vec![0u8; NIBBLES];
    let block_light = vec![0u8; NIBBLES];
    let sky_light = vec![0xFFu8; NIBBLES];
    zlib(&[blocks, &metadata, &block_light, &sky_light])
}

/// Mobile column: zlib of the raw column in storage order.
pub fn mobile_column(blocks: &[u8]) -> Result<Vec<u8>, WorldError> {
    zlib(&[blocks])
}

/// 1.8 chunk data for a full column with sky light. Returns the section
/// bitmask and the uncompressed payload.
///
/// Layout: per present section 4096 little-endian u16 block states
/// (`id << 4 | meta`), then per section 2048 bytes of block light, then per
/// section 2048 bytes of sky light, then 256 biome bytes.
pub fn release_chunk(blocks: &[u8]) -> (u16, Vec<u8>) {
    let mut mask = 0u16;
    for section in 0..SECTION_COUNT {
        let base = section * 16;
        let present = (0..CHUNK_WIDTH).any(|x| {
            (0..CHUNK_WIDTH).any(|z| {
                let start = index(x, base, z);
                blocks[start..start + 16].iter().any(|&id| id != 0)
            })
        });
        if present {
            mask |= 1 << section;
        }
    }

    let sections = mask.count_ones() as usize;
    let mut data = Vec::with_capacity(sections * (8192 + 4096) + 256);
    for section in (0..SECTION_COUNT).filter(|s| mask & (1 << s) != 0) {
        for y in 0..16 {
            for z in 0..CHUNK_WIDTH {
                for x in 0..CHUNK_WIDTH {
                    let state = (blocks[index(x, section * 16 + y, z)] as u16) << 4;
                    data.extend_from_slice(&state.to_le_bytes());
                }
            }
        }
    }
    data.resize(data.len() + sections * 2048, 0x00);
    data.resize(data.len() + sections * 2048, 0xFF);
    // Plains everywhere.
    data.resize(data.len() + 256, 1);
    (mask, data)
}
