use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use farfield_world::{GeneratorParams, LogOnce};

use crate::LOG_TARGET;
use crate::engine::UpdateIgnoreSet;
use crate::thread_ctx::ThreadContextPool;
use crate::tile_cache::TileCache;
use crate::worker::WorkerRegistry;

/// Generator settings that can change while requests are running.
#[derive(Debug)]
pub struct SharedConfig {
    enabled: AtomicBool,
    params: RwLock<Arc<GeneratorParams>>,
}

impl SharedConfig {
    pub fn new(params: GeneratorParams) -> Self {
        Self {
            enabled: AtomicBool::new(params.enabled),
            params: RwLock::new(Arc::new(params)),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn params(&self) -> Arc<GeneratorParams> {
        let guard = self.params.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// Replaces the snapshot; the enabled flag follows the new settings.
    pub fn update(&self, params: GeneratorParams) {
        self.set_enabled(params.enabled);
        let mut guard = self.params.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(params);
    }
}

/// Everything shared by the requests of one generator instance. Dropping
/// the queue or calling `teardown` clears it; nothing here is global.
pub struct Session {
    config: SharedConfig,
    log_once: Arc<LogOnce>,
    contexts: ThreadContextPool,
    tiles: TileCache,
    workers: Arc<WorkerRegistry>,
    ignore_updates: UpdateIgnoreSet,
}

impl Session {
    pub fn new(params: GeneratorParams) -> Arc<Self> {
        let capacity = params.tile_cache_capacity;
        Arc::new(Self {
            config: SharedConfig::new(params),
            log_once: Arc::new(LogOnce::new()),
            contexts: ThreadContextPool::new(),
            tiles: TileCache::new(capacity),
            workers: Arc::new(WorkerRegistry::new()),
            ignore_updates: UpdateIgnoreSet::new(),
        })
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn log_once(&self) -> &Arc<LogOnce> {
        &self.log_once
    }

    pub fn contexts(&self) -> &ThreadContextPool {
        &self.contexts
    }

    pub fn tiles(&self) -> &TileCache {
        &self.tiles
    }

    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.workers
    }

    pub fn ignore_updates(&self) -> &UpdateIgnoreSet {
        &self.ignore_updates
    }

    pub fn teardown(&self) {
        let stats = self.tiles.stats();
        log::debug!(
            target: LOG_TARGET,
            "session teardown: {} cached tiles ({} hits, {} misses), {} contexts",
            stats.entries,
            stats.hits,
            stats.misses,
            self.contexts.len()
        );
        self.log_once.clear();
        self.contexts.clear();
        self.tiles.clear();
        self.ignore_updates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farfield_chunk::Tile;
    use farfield_world::{Level, TerrainParams, TilePos};

    #[test]
    fn teardown_clears_session_state() {
        let session = Session::new(GeneratorParams::default());
        let lvl = Level::new("s", 1, 0, 32, true, TerrainParams::default());
        session.log_once().first("boom");
        session
            .tiles()
            .insert(&lvl, Tile::empty(TilePos::new(0, 0), 0, 32));
        session.ignore_updates().hold(TilePos::new(0, 0));
        session.teardown();
        assert!(session.log_once().is_empty());
        assert_eq!(session.tiles().stats().entries, 0);
        assert!(!session.ignore_updates().contains(TilePos::new(0, 0)));
    }

    #[test]
    fn shared_config_tracks_enabled() {
        let cfg = SharedConfig::new(GeneratorParams::default());
        assert!(cfg.is_enabled());
        cfg.set_enabled(false);
        assert!(!cfg.is_enabled());
        cfg.update(GeneratorParams {
            request_timeout: std::time::Duration::from_secs(5),
            ..GeneratorParams::default()
        });
        assert!(cfg.is_enabled());
        assert_eq!(cfg.params().request_timeout.as_secs(), 5);
    }
}
