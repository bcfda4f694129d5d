use farfield_world::{SECTION_HEIGHT, Stage, StructureStart, TILE_WIDTH, TilePos};
use hashbrown::HashMap;

use crate::block::{Biome, Block};
use crate::light::LightStorage;
use crate::section::{BIOMES_PER_SECTION, Section};

const COLUMNS: usize = TILE_WIDTH * TILE_WIDTH;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeightmapKind {
    WorldSurface,
    MotionBlocking,
    OceanFloor,
}

impl HeightmapKind {
    pub const ALL: [HeightmapKind; 3] = [
        HeightmapKind::WorldSurface,
        HeightmapKind::MotionBlocking,
        HeightmapKind::OceanFloor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HeightmapKind::WorldSurface => "WORLD_SURFACE",
            HeightmapKind::MotionBlocking => "MOTION_BLOCKING",
            HeightmapKind::OceanFloor => "OCEAN_FLOOR",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    #[inline]
    fn counts(self, b: Block) -> bool {
        match self {
            HeightmapKind::WorldSurface => !b.is_air(),
            HeightmapKind::MotionBlocking => b.is_motion_blocking(),
            HeightmapKind::OceanFloor => b.is_solid(),
        }
    }
}

/// Where a tile came from when it entered a request's working set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileOrigin {
    Synthesized,
    Persisted,
    Cached,
}

/// One column group of terrain and everything generated for it so far.
#[derive(Clone, Debug)]
pub struct Tile {
    pub pos: TilePos,
    stage: Stage,
    pub min_y: i32,
    pub height: usize,
    pub sections: Vec<Option<Section>>,
    /// 4×4×4 grid per section, `None` until the biome stage ran.
    pub biomes: Option<Vec<Biome>>,
    /// Absolute y of the first free cell above the column, per kind.
    pub heightmaps: HashMap<HeightmapKind, Vec<i32>>,
    pub block_light: Option<LightStorage>,
    pub sky_light: Option<LightStorage>,
    light_correct: bool,
    pub structure_starts: Vec<StructureStart>,
    pub structure_refs: Vec<TilePos>,
    pub origin: TileOrigin,
}

impl Tile {
    pub fn empty(pos: TilePos, min_y: i32, height: usize) -> Self {
        let count = height / SECTION_HEIGHT;
        Self {
            pos,
            stage: Stage::Empty,
            min_y,
            height,
            sections: vec![None; count],
            biomes: None,
            heightmaps: HashMap::new(),
            block_light: None,
            sky_light: None,
            light_correct: false,
            structure_starts: Vec::new(),
            structure_refs: Vec::new(),
            origin: TileOrigin::Synthesized,
        }
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Raises the stage; returns false and leaves it untouched if `stage` is not later.
    pub fn advance_to(&mut self, stage: Stage) -> bool {
        if stage > self.stage {
            self.stage = stage;
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn is_at_least(&self, stage: Stage) -> bool {
        self.stage >= stage
    }

    #[inline]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    #[inline]
    pub fn max_y(&self) -> i32 {
        self.min_y + self.height as i32
    }

    /// Section index and in-section y for an absolute y.
    #[inline]
    pub fn locate_y(&self, y: i32) -> Option<(usize, usize)> {
        let ly = y - self.min_y;
        if ly < 0 || ly as usize >= self.height {
            return None;
        }
        let ly = ly as usize;
        Some((ly / SECTION_HEIGHT, ly % SECTION_HEIGHT))
    }

    pub fn block(&self, x: usize, y: i32, z: usize) -> Block {
        match self.locate_y(y) {
            Some((si, sy)) => self.sections[si]
                .as_ref()
                .map(|s| s.get(x, sy, z))
                .unwrap_or(Block::AIR),
            None => Block::AIR,
        }
    }

    pub fn set_block(&mut self, x: usize, y: i32, z: usize, b: Block) {
        let Some((si, sy)) = self.locate_y(y) else {
            return;
        };
        let slot = &mut self.sections[si];
        if let Some(s) = slot.as_mut() {
            s.set(x, sy, z, b);
        } else if !b.is_air() {
            let mut s = Section::default();
            s.set(x, sy, z, b);
            *slot = Some(s);
        }
    }

    pub fn has_blocks(&self) -> bool {
        self.sections.iter().flatten().any(|s| !s.is_all_air())
    }

    pub fn set_biomes(&mut self, biomes: Vec<Biome>) {
        let mut biomes = biomes;
        biomes.resize(self.section_count() * BIOMES_PER_SECTION, Biome::default());
        self.biomes = Some(biomes);
    }

    /// Biome at block coordinates, plains when biomes are absent.
    pub fn biome_at(&self, x: usize, y: i32, z: usize) -> Biome {
        let Some(biomes) = &self.biomes else {
            return Biome::default();
        };
        let Some((si, sy)) = self.locate_y(y) else {
            return Biome::default();
        };
        let i = si * BIOMES_PER_SECTION + ((sy >> 2) * 4 + (z >> 2)) * 4 + (x >> 2);
        biomes.get(i).copied().unwrap_or_default()
    }

    pub fn heightmap(&self, kind: HeightmapKind) -> Option<&[i32]> {
        self.heightmaps.get(&kind).map(|v| v.as_slice())
    }

    pub fn has_heightmaps(&self) -> bool {
        HeightmapKind::ALL
            .iter()
            .all(|k| self.heightmaps.get(k).is_some_and(|v| v.len() == COLUMNS))
    }

    /// Surface height of a column according to `kind`, falling back to a scan.
    pub fn surface_y(&self, kind: HeightmapKind, x: usize, z: usize) -> i32 {
        if let Some(hm) = self.heightmap(kind) {
            if let Some(&h) = hm.get(z * TILE_WIDTH + x) {
                return h;
            }
        }
        self.scan_column(kind, x, z)
    }

    fn scan_column(&self, kind: HeightmapKind, x: usize, z: usize) -> i32 {
        for (si, section) in self.sections.iter().enumerate().rev() {
            let Some(section) = section else {
                continue;
            };
            for sy in (0..SECTION_HEIGHT).rev() {
                if kind.counts(section.get(x, sy, z)) {
                    return self.min_y + (si * SECTION_HEIGHT + sy) as i32 + 1;
                }
            }
        }
        self.min_y
    }

    pub fn recalc_heightmaps(&mut self) {
        for kind in HeightmapKind::ALL {
            let mut values = Vec::with_capacity(COLUMNS);
            for z in 0..TILE_WIDTH {
                for x in 0..TILE_WIDTH {
                    values.push(self.scan_column(kind, x, z));
                }
            }
            self.heightmaps.insert(kind, values);
        }
    }

    /// Returns true if the maps were missing and got rebuilt.
    pub fn recalc_heightmaps_if_needed(&mut self) -> bool {
        if self.has_heightmaps() {
            return false;
        }
        self.recalc_heightmaps();
        true
    }

    #[inline]
    pub fn is_light_correct(&self) -> bool {
        self.light_correct
    }

    #[inline]
    pub fn set_light_correct(&mut self, correct: bool) {
        self.light_correct = correct;
    }

    pub fn has_light(&self) -> bool {
        self.block_light.is_some() && self.sky_light.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> Tile {
        Tile::empty(TilePos::new(0, 0), -16, 48)
    }

    #[test]
    fn stage_never_regresses() {
        let mut t = tile();
        assert!(t.advance_to(Stage::Noise));
        assert!(!t.advance_to(Stage::Biomes));
        assert!(!t.advance_to(Stage::Noise));
        assert_eq!(t.stage(), Stage::Noise);
    }

    #[test]
    fn blocks_address_absolute_y() {
        let mut t = tile();
        assert_eq!(t.section_count(), 3);
        t.set_block(1, -16, 2, Block::BEDROCK);
        t.set_block(1, 31, 2, Block::STONE);
        t.set_block(1, 32, 2, Block::STONE);
        assert_eq!(t.block(1, -16, 2), Block::BEDROCK);
        assert_eq!(t.block(1, 31, 2), Block::STONE);
        assert_eq!(t.block(1, 32, 2), Block::AIR);
        assert!(t.sections[1].is_none());
        t.set_block(0, 0, 0, Block::AIR);
        assert!(t.sections[1].is_none());
    }

    #[test]
    fn heightmaps_track_top_blocks() {
        let mut t = tile();
        assert!(!t.has_heightmaps());
        t.set_block(3, 4, 5, Block::STONE);
        t.set_block(3, 5, 5, Block::WATER);
        assert!(t.recalc_heightmaps_if_needed());
        assert!(!t.recalc_heightmaps_if_needed());
        assert_eq!(t.surface_y(HeightmapKind::WorldSurface, 3, 5), 6);
        assert_eq!(t.surface_y(HeightmapKind::OceanFloor, 3, 5), 5);
        assert_eq!(t.surface_y(HeightmapKind::WorldSurface, 0, 0), -16);
    }

    #[test]
    fn biome_lookup_uses_quarter_resolution() {
        let mut t = tile();
        let mut b = vec![Biome::Plains; 3 * 64];
        b[64 + 5] = Biome::Desert; // section 1, cell (1, 0, 1)
        t.set_biomes(b);
        assert_eq!(t.biome_at(4, 0, 4), Biome::Desert);
        assert_eq!(t.biome_at(7, 3, 7), Biome::Desert);
        assert_eq!(t.biome_at(8, 0, 4), Biome::Plains);
    }
}
