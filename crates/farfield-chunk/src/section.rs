use farfield_world::{SECTION_HEIGHT, TILE_WIDTH};

use crate::block::Block;

pub const SECTION_VOLUME: usize = TILE_WIDTH * SECTION_HEIGHT * TILE_WIDTH;
/// Biomes are stored on a 4×4×4 grid per section.
pub const BIOMES_PER_SECTION: usize = 64;

/// A 16×16×16 slice of a tile, stored y-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    blocks: Vec<Block>,
}

impl Section {
    #[inline]
    pub fn idx(x: usize, y: usize, z: usize) -> usize {
        (y * TILE_WIDTH + z) * TILE_WIDTH + x
    }

    pub fn filled(block: Block) -> Self {
        Self {
            blocks: vec![block; SECTION_VOLUME],
        }
    }

    /// Pads or truncates to a full section.
    pub fn from_blocks(mut blocks: Vec<Block>) -> Self {
        blocks.resize(SECTION_VOLUME, Block::AIR);
        Self { blocks }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> Block {
        self.blocks[Self::idx(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, b: Block) {
        let i = Self::idx(x, y, z);
        self.blocks[i] = b;
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_all_air(&self) -> bool {
        self.blocks.iter().all(|b| b.is_air())
    }
}

impl Default for Section {
    fn default() -> Self {
        Self::filled(Block::AIR)
    }
}
