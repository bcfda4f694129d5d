use std::sync::Arc;

use farfield_chunk::Tile;
use farfield_world::{GeneratorParams, Level, LogOnce, ParallelReads, TilePos};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::LOG_TARGET;
use crate::parser::{ParseOptions, parse_tile};
use crate::storage::TileStorage;

/// Loads persisted tiles or synthesizes empty ones in their place.
pub struct TileSourceResolver {
    storage: Arc<dyn TileStorage>,
    io_pool: Option<ThreadPool>,
    opts: ParseOptions,
    log_once: Arc<LogOnce>,
}

impl TileSourceResolver {
    pub fn new(
        storage: Arc<dyn TileStorage>,
        level: &Level,
        params: &GeneratorParams,
        log_once: Arc<LogOnce>,
    ) -> Self {
        let parallel = match params.parallel_reads {
            ParallelReads::Always => true,
            ParallelReads::Never => false,
            ParallelReads::Auto => storage.supports_parallel_reads(),
        };
        let io_pool = if parallel {
            match ThreadPoolBuilder::new()
                .num_threads(params.read_threads)
                .thread_name(|i| format!("farfield-io-{i}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    log::warn!(
                        target: LOG_TARGET,
                        "could not start read pool ({e}); reading tiles synchronously"
                    );
                    None
                }
            }
        } else {
            None
        };
        Self {
            storage,
            io_pool,
            opts: ParseOptions::new(level, params),
            log_once,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.io_pool.is_some()
    }

    pub fn options(&self) -> &ParseOptions {
        &self.opts
    }

    pub fn synthesize(&self, pos: TilePos) -> Tile {
        Tile::empty(pos, self.opts.min_y, self.opts.height)
    }

    /// Never fails: unreadable, rejected, or missing records become empty tiles.
    pub fn resolve_or_create(&self, pos: TilePos) -> Tile {
        let bytes = match self.storage.read(pos) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return self.synthesize(pos),
            Err(e) => {
                self.log_once
                    .warn(LOG_TARGET, &format!("tile read failed: {e}"));
                return self.synthesize(pos);
            }
        };
        match parse_tile(&bytes, pos, &self.opts, &self.log_once) {
            Ok(Some(tile)) => tile,
            Ok(None) => self.synthesize(pos),
            Err(e) => {
                self.log_once
                    .warn(LOG_TARGET, &format!("could not parse tile record: {e}"));
                self.synthesize(pos)
            }
        }
    }

    /// Resolves every position, fanning out on the read pool when one is running.
    /// Output order matches `positions`.
    pub fn resolve_all(&self, positions: &[TilePos]) -> Vec<Tile> {
        match &self.io_pool {
            Some(pool) if positions.len() > 1 => pool.install(|| {
                positions
                    .par_iter()
                    .map(|&p| self.resolve_or_create(p))
                    .collect()
            }),
            _ => positions
                .iter()
                .map(|&p| self.resolve_or_create(p))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_tile;
    use crate::storage::MemoryStorage;
    use farfield_chunk::{Block, TileOrigin};
    use farfield_world::{Stage, TerrainParams};

    fn level() -> Level {
        Level::new("test", 1, 0, 32, true, TerrainParams::default())
    }

    fn persisted(level: &Level, pos: TilePos, stage: Stage) -> Vec<u8> {
        let mut t = Tile::empty(pos, level.min_y, level.height);
        t.set_block(0, 0, 0, Block::STONE);
        t.advance_to(stage);
        encode_tile(&t).unwrap()
    }

    fn resolver(store: Arc<MemoryStorage>, reads: ParallelReads) -> TileSourceResolver {
        let params = GeneratorParams {
            parallel_reads: reads,
            read_threads: 2,
            min_persisted_stage: Stage::Biomes,
            ..GeneratorParams::default()
        };
        TileSourceResolver::new(store, &level(), &params, Arc::new(LogOnce::new()))
    }

    #[test]
    fn loads_persisted_and_synthesizes_the_rest() {
        let lvl = level();
        let store = Arc::new(MemoryStorage::new());
        store.insert(TilePos::new(0, 0), persisted(&lvl, TilePos::new(0, 0), Stage::Full));
        store.insert(TilePos::new(1, 0), persisted(&lvl, TilePos::new(1, 0), Stage::StructureStart));
        store.insert(TilePos::new(0, 1), b"not nbt".to_vec());
        let positions = [
            TilePos::new(0, 0),
            TilePos::new(1, 0),
            TilePos::new(0, 1),
            TilePos::new(1, 1),
        ];
        for reads in [ParallelReads::Never, ParallelReads::Always] {
            let r = resolver(Arc::clone(&store), reads);
            assert_eq!(r.is_parallel(), reads == ParallelReads::Always);
            let tiles = r.resolve_all(&positions);
            let got: Vec<_> = tiles.iter().map(|t| t.pos).collect();
            assert_eq!(got, positions);
            assert_eq!(tiles[0].origin, TileOrigin::Persisted);
            assert_eq!(tiles[0].stage(), Stage::Full);
            for t in &tiles[1..] {
                assert_eq!(t.origin, TileOrigin::Synthesized);
                assert_eq!(t.stage(), Stage::Empty);
            }
        }
    }

    #[test]
    fn auto_follows_storage_capability() {
        let store = Arc::new(MemoryStorage::new().with_parallel_reads(true));
        assert!(resolver(store, ParallelReads::Auto).is_parallel());
        let store = Arc::new(MemoryStorage::new());
        assert!(!resolver(store, ParallelReads::Auto).is_parallel());
    }
}
