use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use farfield_chunk::{Tile, TileOrigin};
use farfield_world::{Level, LevelId, TilePos};
use hashbrown::HashMap;

type Key = (LevelId, TilePos);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct Entry {
    rev: u32,
    tile: Tile,
}

/// Session-wide LRU of tiles produced by earlier requests.
pub struct TileCache {
    entries: RwLock<HashMap<Key, Entry>>,
    order: Mutex<VecDeque<Key>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TileCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A copy of the cached tile, unless it was built under older terrain params.
    pub fn get(&self, level: &Level, pos: TilePos) -> Option<Tile> {
        let key = (level.id(), pos);
        let found = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.get(&key).map(|e| {
                if e.rev == level.params_rev() {
                    let mut t = e.tile.clone();
                    t.origin = TileOrigin::Cached;
                    Some(t)
                } else {
                    None
                }
            })
        };
        match found {
            Some(Some(tile)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.touch(&key);
                return Some(tile);
            }
            Some(None) => self.remove_entry(&key),
            None => {}
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores a snapshot. An entry already further along at the same
    /// revision is kept instead. Returns true if `tile` was stored.
    pub fn insert(&self, level: &Level, tile: Tile) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let key = (level.id(), tile.pos);
        let rev = level.params_rev();
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(old) = entries.get(&key) {
                if old.rev == rev && old.tile.stage() > tile.stage() {
                    return false;
                }
            }
            entries.insert(key, Entry { rev, tile });
        }
        self.remove_from_order(&key);
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(key);
        self.enforce_capacity();
        true
    }

    pub fn clear(&self) {
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let len = entries.len() as u64;
            entries.clear();
            len
        };
        if removed > 0 {
            self.evictions.fetch_add(removed, Ordering::Relaxed);
        }
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn stats(&self) -> TileCacheStats {
        TileCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.read().map(|m| m.len()).unwrap_or(0),
        }
    }

    fn remove_entry(&self, key: &Key) {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if removed.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.remove_from_order(key);
    }

    fn touch(&self, key: &Key) {
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = order.iter().position(|k| k == key) {
            if let Some(entry) = order.remove(pos) {
                order.push_back(entry);
            }
        }
    }

    fn remove_from_order(&self, key: &Key) {
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
        }
    }

    fn enforce_capacity(&self) {
        let mut victims: Vec<Key> = Vec::new();
        {
            let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
            while order.len() > self.capacity {
                if let Some(old) = order.pop_front() {
                    victims.push(old);
                }
            }
        }
        if victims.is_empty() {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for key in victims {
            if entries.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farfield_world::{Stage, TerrainParams};

    fn level() -> Level {
        Level::new("cache", 3, 0, 32, true, TerrainParams::default())
    }

    fn tile(lvl: &Level, x: i32, stage: Stage) -> Tile {
        let mut t = Tile::empty(TilePos::new(x, 0), lvl.min_y, lvl.height);
        t.advance_to(stage);
        t
    }

    #[test]
    fn never_regresses_a_cached_tile() {
        let lvl = level();
        let cache = TileCache::new(8);
        assert!(cache.insert(&lvl, tile(&lvl, 0, Stage::Features)));
        assert!(!cache.insert(&lvl, tile(&lvl, 0, Stage::Biomes)));
        let got = cache.get(&lvl, TilePos::new(0, 0)).unwrap();
        assert_eq!(got.stage(), Stage::Features);
        assert_eq!(got.origin, TileOrigin::Cached);
    }

    #[test]
    fn evicts_least_recently_used() {
        let lvl = level();
        let cache = TileCache::new(2);
        cache.insert(&lvl, tile(&lvl, 0, Stage::Noise));
        cache.insert(&lvl, tile(&lvl, 1, Stage::Noise));
        assert!(cache.get(&lvl, TilePos::new(0, 0)).is_some());
        cache.insert(&lvl, tile(&lvl, 2, Stage::Noise));
        assert!(cache.get(&lvl, TilePos::new(1, 0)).is_none());
        assert!(cache.get(&lvl, TilePos::new(0, 0)).is_some());
        let s = cache.stats();
        assert_eq!(s.entries, 2);
        assert_eq!(s.evictions, 1);
        assert_eq!(s.hits, 2);
        assert_eq!(s.misses, 1);
    }

    #[test]
    fn stale_revision_is_dropped() {
        let lvl = level();
        let cache = TileCache::new(4);
        cache.insert(&lvl, tile(&lvl, 0, Stage::Full));
        lvl.update_terrain_params(TerrainParams {
            sea_level: 70,
            ..TerrainParams::default()
        });
        assert!(cache.get(&lvl, TilePos::new(0, 0)).is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}
