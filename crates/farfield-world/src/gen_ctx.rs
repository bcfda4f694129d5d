use std::sync::Arc;

use fastnoise_lite::FastNoiseLite;
use hashbrown::HashMap;
use serde::Serialize;

use crate::config::TerrainParams;
use crate::level::{Level, LevelId};
use crate::tile_pos::TilePos;

const STRUCTURE_CACHE_CAP: usize = 1024;

/// A structure anchored in one tile that may extend into its neighbours.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StructureStart {
    pub tile: TilePos,
    pub center_x: i32,
    pub center_z: i32,
    pub radius: i32,
    pub height: i32,
}

/// Per-thread generation context: noise sources plus a memo of structure placements.
pub struct GenCtx {
    pub level_id: LevelId,
    pub params_rev: u32,
    pub seed: i32,
    pub params: Arc<TerrainParams>,
    pub height: FastNoiseLite,
    pub detail: FastNoiseLite,
    pub temperature: FastNoiseLite,
    pub moisture: FastNoiseLite,
    pub structure_starts: HashMap<TilePos, Option<StructureStart>>,
}

impl GenCtx {
    /// False once the level's params changed or the context belongs to another level.
    #[inline]
    pub fn matches(&self, level: &Level) -> bool {
        self.level_id == level.id() && self.params_rev == level.params_rev()
    }

    pub fn clear_caches(&mut self) {
        self.structure_starts.clear();
    }

    /// Memoized structure placement for `pos`, computed with `f` on a miss.
    pub fn structure_start_with(
        &mut self,
        pos: TilePos,
        f: impl FnOnce(&mut GenCtx, TilePos) -> Option<StructureStart>,
    ) -> Option<StructureStart> {
        if let Some(hit) = self.structure_starts.get(&pos) {
            return *hit;
        }
        let start = f(self, pos);
        if self.structure_starts.len() >= STRUCTURE_CACHE_CAP {
            self.structure_starts.clear();
        }
        self.structure_starts.insert(pos, start);
        start
    }
}
