use farfield_chunk::{Tile, Window};
use farfield_io::TileSourceResolver;
use farfield_world::{Level, TilePos};
use hashbrown::HashMap;

use crate::tile_cache::TileCache;

/// Offsets of the four odd-window passes, in run order.
const PASS_OFFSETS: [(i32, i32); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

/// One run of the stage chain over a window of the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pass {
    pub index: usize,
    pub window_origin: TilePos,
    pub side: usize,
}

/// How an even `width` region is covered by windows. Libraries that need
/// odd windows get four passes of side `(width - 1) + 2 * border`, each
/// shifted by one tile; the interiors tile the region and overlap only
/// where an earlier pass already did the work.
#[derive(Clone, Debug)]
pub struct WindowPlan {
    region_min: TilePos,
    width: usize,
    border: usize,
    passes: Vec<Pass>,
}

impl WindowPlan {
    pub fn new(region_min: TilePos, width: usize, border: usize, even_windows: bool) -> Self {
        let b = border as i32;
        let passes = if even_windows {
            vec![Pass {
                index: 0,
                window_origin: region_min.offset(-b, -b),
                side: width + 2 * border,
            }]
        } else {
            let inner = width.saturating_sub(1);
            PASS_OFFSETS
                .iter()
                .enumerate()
                .map(|(index, &(dx, dz))| {
                    let min = region_min.offset(dx, dz);
                    Pass {
                        index,
                        window_origin: min.offset(-b, -b),
                        side: inner + 2 * border,
                    }
                })
                .collect()
        };
        Self {
            region_min,
            width,
            border,
            passes,
        }
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn region_min(&self) -> TilePos {
        self.region_min
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn border(&self) -> usize {
        self.border
    }

    #[inline]
    pub fn in_region(&self, pos: TilePos) -> bool {
        self.region_min.square_contains(self.width, pos)
    }

    pub fn region_positions(&self) -> impl Iterator<Item = TilePos> {
        self.region_min.square(self.width)
    }

    /// Every position any pass window touches.
    pub fn all_positions(&self) -> impl Iterator<Item = TilePos> {
        let b = self.border as i32;
        self.region_min
            .offset(-b, -b)
            .square(self.width + 2 * self.border)
    }
}

/// Per-request tile store that hands out windows and takes them back.
/// Region tiles come from the session cache, then storage; border tiles
/// are always synthesized empty.
pub struct WindowAssembler<'a> {
    level: &'a Level,
    resolver: &'a TileSourceResolver,
    cache: &'a TileCache,
    plan: &'a WindowPlan,
    store: HashMap<TilePos, Tile>,
}

impl<'a> WindowAssembler<'a> {
    pub fn new(
        level: &'a Level,
        resolver: &'a TileSourceResolver,
        cache: &'a TileCache,
        plan: &'a WindowPlan,
    ) -> Self {
        Self {
            level,
            resolver,
            cache,
            plan,
            store: HashMap::new(),
        }
    }

    /// Resolves every tile the plan touches, reading storage in one batch.
    pub fn prefetch(&mut self) {
        let mut misses = Vec::new();
        for pos in self.plan.region_positions() {
            if self.store.contains_key(&pos) {
                continue;
            }
            match self.cache.get(self.level, pos) {
                Some(tile) => {
                    self.store.insert(pos, tile);
                }
                None => misses.push(pos),
            }
        }
        for tile in self.resolver.resolve_all(&misses) {
            self.store.insert(tile.pos, tile);
        }
        for pos in self.plan.all_positions() {
            if !self.store.contains_key(&pos) {
                self.store.insert(pos, self.resolver.synthesize(pos));
            }
        }
    }

    /// The request's tile at `pos`, resolving it on first use.
    pub fn resolve(&mut self, pos: TilePos) -> &mut Tile {
        let Self {
            level,
            resolver,
            cache,
            plan,
            store,
        } = self;
        store.entry(pos).or_insert_with(|| {
            if plan.in_region(pos) {
                cache
                    .get(*level, pos)
                    .unwrap_or_else(|| resolver.resolve_or_create(pos))
            } else {
                resolver.synthesize(pos)
            }
        })
    }

    /// Moves the pass's tiles out of the store into a fresh window.
    pub fn window_for(&mut self, pass: &Pass) -> Window {
        let mut window = Window::new(pass.window_origin, pass.side);
        let positions: Vec<TilePos> = window.positions().collect();
        for pos in positions {
            self.resolve(pos);
            if let Some(tile) = self.store.remove(&pos) {
                if let Err(tile) = window.put(tile) {
                    self.store.insert(tile.pos, tile);
                }
            }
        }
        window
    }

    pub fn restore(&mut self, mut window: Window) {
        for tile in window.drain() {
            self.store.insert(tile.pos, tile);
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn get(&self, pos: TilePos) -> Option<&Tile> {
        self.store.get(&pos)
    }

    /// Region tiles first, then the border, each in position order.
    pub fn into_tiles(self) -> (Vec<Tile>, Vec<Tile>) {
        let plan = self.plan;
        let (mut region, mut border): (Vec<Tile>, Vec<Tile>) =
            self.store.into_values().partition(|t| plan.in_region(t.pos));
        region.sort_by_key(|t| t.pos);
        border.sort_by_key(|t| t.pos);
        (region, border)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use farfield_chunk::{Block, Cutout, TileOrigin};
    use farfield_io::{MemoryStorage, encode_tile};
    use farfield_world::{GeneratorParams, LogOnce, Stage, TerrainParams};

    fn level() -> Level {
        Level::new("asm", 9, 0, 32, true, TerrainParams::default())
    }

    #[test]
    fn four_passes_cover_even_region() {
        let plan = WindowPlan::new(TilePos::new(0, 0), 4, 0, false);
        assert_eq!(plan.passes().len(), 4);
        let origins: Vec<_> = plan.passes().iter().map(|p| p.window_origin).collect();
        assert_eq!(
            origins,
            vec![
                TilePos::new(0, 0),
                TilePos::new(1, 0),
                TilePos::new(0, 1),
                TilePos::new(1, 1)
            ]
        );
        assert!(plan.passes().iter().all(|p| p.side == 3));
        for pos in plan.region_positions() {
            assert!(
                plan.passes()
                    .iter()
                    .any(|p| Window::new(p.window_origin, p.side).cutout(0).contains(pos))
            );
        }
    }

    #[test]
    fn bordered_plan_widens_windows() {
        let plan = WindowPlan::new(TilePos::new(10, -4), 2, 2, false);
        let p = plan.passes()[3];
        assert_eq!(p.window_origin, TilePos::new(9, -5));
        assert_eq!(p.side, 5);
        let interior = Window::new(p.window_origin, p.side).cutout(plan.border());
        assert_eq!(interior, Cutout::new(TilePos::new(11, -3), 1));
        assert_eq!(plan.all_positions().count(), 36);

        let single = WindowPlan::new(TilePos::new(0, 0), 4, 1, true);
        assert_eq!(single.passes().len(), 1);
        assert_eq!(single.passes()[0].side, 6);
    }

    #[test]
    fn assembler_reads_region_and_synthesizes_border() {
        let lvl = level();
        let store = Arc::new(MemoryStorage::new());
        let mut persisted = Tile::empty(TilePos::new(1, 1), lvl.min_y, lvl.height);
        persisted.set_block(0, 0, 0, Block::STONE);
        persisted.advance_to(Stage::Full);
        store.insert(TilePos::new(1, 1), encode_tile(&persisted).unwrap());
        // outside the region: must not be read
        let mut outside = Tile::empty(TilePos::new(-1, 0), lvl.min_y, lvl.height);
        outside.advance_to(Stage::Full);
        store.insert(TilePos::new(-1, 0), encode_tile(&outside).unwrap());

        let params = GeneratorParams {
            min_persisted_stage: Stage::Biomes,
            ..GeneratorParams::default()
        };
        let resolver = TileSourceResolver::new(store, &lvl, &params, Arc::new(LogOnce::new()));
        let cache = TileCache::new(16);
        let plan = WindowPlan::new(TilePos::new(0, 0), 2, 1, false);
        let mut asm = WindowAssembler::new(&lvl, &resolver, &cache, &plan);
        asm.prefetch();
        assert_eq!(asm.len(), 16);
        assert_eq!(asm.get(TilePos::new(1, 1)).unwrap().origin, TileOrigin::Persisted);
        assert_eq!(asm.get(TilePos::new(-1, 0)).unwrap().stage(), Stage::Empty);

        let pass = plan.passes()[0];
        let window = asm.window_for(&pass);
        assert!(window.is_complete());
        assert_eq!(asm.len(), 16 - 9);
        asm.restore(window);
        assert_eq!(asm.len(), 16);

        let (region, border) = asm.into_tiles();
        assert_eq!(region.len(), 4);
        assert_eq!(border.len(), 12);
    }
}
