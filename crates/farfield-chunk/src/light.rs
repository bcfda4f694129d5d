use farfield_world::{SECTION_HEIGHT, TILE_WIDTH};

const LAYER: usize = TILE_WIDTH * TILE_WIDTH;
const SECTION_CELLS: usize = LAYER * SECTION_HEIGHT;

/// One light level (0..=15) per cell of a tile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LightStorage {
    min_y: i32,
    height: usize,
    levels: Vec<u8>,
}

impl LightStorage {
    pub fn new(min_y: i32, height: usize) -> Self {
        Self::filled(min_y, height, 0)
    }

    pub fn filled(min_y: i32, height: usize, level: u8) -> Self {
        Self {
            min_y,
            height,
            levels: vec![level; height * LAYER],
        }
    }

    #[inline]
    fn idx(&self, x: usize, y: i32, z: usize) -> Option<usize> {
        let ly = y - self.min_y;
        if ly < 0 || ly as usize >= self.height || x >= TILE_WIDTH || z >= TILE_WIDTH {
            return None;
        }
        Some(ly as usize * LAYER + z * TILE_WIDTH + x)
    }

    /// Zero outside the tile's vertical range.
    #[inline]
    pub fn get(&self, x: usize, y: i32, z: usize) -> u8 {
        self.idx(x, y, z).map(|i| self.levels[i]).unwrap_or(0)
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: i32, z: usize, level: u8) {
        if let Some(i) = self.idx(x, y, z) {
            self.levels[i] = level;
        }
    }

    pub fn section_count(&self) -> usize {
        self.height / SECTION_HEIGHT
    }

    pub fn fill_section(&mut self, section: usize, level: u8) {
        let start = section * SECTION_CELLS;
        if let Some(cells) = self.levels.get_mut(start..start + SECTION_CELLS) {
            cells.fill(level);
        }
    }

    /// Loads one section from 4-bit packed data (index `y*256 + z*16 + x`, even index in the low nibble).
    pub fn set_section_nibbles(&mut self, section: usize, packed: &[u8]) -> bool {
        if packed.len() != SECTION_CELLS / 2 {
            return false;
        }
        let start = section * SECTION_CELLS;
        let Some(cells) = self.levels.get_mut(start..start + SECTION_CELLS) else {
            return false;
        };
        for (i, cell) in cells.iter_mut().enumerate() {
            let byte = packed[i >> 1];
            *cell = if i & 1 == 0 { byte & 0x0F } else { byte >> 4 };
        }
        true
    }

    pub fn section_nibbles(&self, section: usize) -> Vec<u8> {
        let start = section * SECTION_CELLS;
        let mut out = vec![0u8; SECTION_CELLS / 2];
        if let Some(cells) = self.levels.get(start..start + SECTION_CELLS) {
            for (i, &v) in cells.iter().enumerate() {
                let v = v & 0x0F;
                out[i >> 1] |= if i & 1 == 0 { v } else { v << 4 };
            }
        }
        out
    }

    pub fn is_uniform(&self, section: usize, level: u8) -> bool {
        let start = section * SECTION_CELLS;
        self.levels
            .get(start..start + SECTION_CELLS)
            .is_some_and(|c| c.iter().all(|&v| v == level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibble_layout_low_first() {
        let mut l = LightStorage::new(-16, 32);
        let mut packed = vec![0u8; 2048];
        packed[0] = 0xA3;
        assert!(l.set_section_nibbles(1, &packed));
        assert_eq!(l.get(0, 0, 0), 3);
        assert_eq!(l.get(1, 0, 0), 10);
        assert_eq!(l.get(0, -16, 0), 0);
        assert_eq!(l.section_nibbles(1), packed);
        assert!(!l.set_section_nibbles(0, &packed[..100]));
    }

    #[test]
    fn out_of_range_reads_zero() {
        let l = LightStorage::filled(0, 16, 15);
        assert_eq!(l.get(3, 15, 3), 15);
        assert_eq!(l.get(3, 16, 3), 0);
        assert_eq!(l.get(3, -1, 3), 0);
    }
}
