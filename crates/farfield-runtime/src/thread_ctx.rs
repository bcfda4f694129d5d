use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

use farfield_chunk::GenerationLibrary;
use farfield_world::{GenCtx, Level};
use hashbrown::HashMap;

/// Per-thread generation contexts. A worker gets back the context it used
/// last, rebuilt only when the level or its terrain params changed.
#[derive(Default)]
pub struct ThreadContextPool {
    contexts: Mutex<HashMap<ThreadId, GenCtx>>,
    built: AtomicU64,
    reused: AtomicU64,
}

impl ThreadContextPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire<'pool>(
        &'pool self,
        level: &Level,
        library: &dyn GenerationLibrary,
    ) -> ThreadCtx<'pool> {
        let thread = thread::current().id();
        let cached = self
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&thread);
        let ctx = match cached {
            Some(ctx) if ctx.matches(level) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                ctx
            }
            _ => {
                self.built.fetch_add(1, Ordering::Relaxed);
                library.make_context(level)
            }
        };
        ThreadCtx {
            ctx: Some(ctx),
            thread,
            pool: self,
        }
    }

    /// (built, reused)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.built.load(Ordering::Relaxed),
            self.reused.load(Ordering::Relaxed),
        )
    }

    pub fn len(&self) -> usize {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn release(&self, thread: ThreadId, ctx: GenCtx) {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(thread, ctx);
    }
}

pub struct ThreadCtx<'pool> {
    ctx: Option<GenCtx>,
    thread: ThreadId,
    pool: &'pool ThreadContextPool,
}

impl<'pool> Deref for ThreadCtx<'pool> {
    type Target = GenCtx;

    fn deref(&self) -> &Self::Target {
        self.ctx.as_ref().expect("GenCtx already released")
    }
}

impl<'pool> DerefMut for ThreadCtx<'pool> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx.as_mut().expect("GenCtx already released")
    }
}

impl<'pool> Drop for ThreadCtx<'pool> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(self.thread, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farfield_chunk::NoiseGenerator;
    use farfield_world::TerrainParams;

    #[test]
    fn reuses_per_thread_and_rebuilds_on_change() {
        let pool = ThreadContextPool::new();
        let lib = NoiseGenerator;
        let a = Level::new("a", 1, 0, 64, true, TerrainParams::default());
        let b = Level::new("b", 2, 0, 64, true, TerrainParams::default());
        drop(pool.acquire(&a, &lib));
        drop(pool.acquire(&a, &lib));
        assert_eq!(pool.stats(), (1, 1));
        drop(pool.acquire(&b, &lib));
        assert_eq!(pool.stats(), (2, 1));
        assert_eq!(pool.len(), 1);

        b.update_terrain_params(TerrainParams {
            tree_probability: 0.5,
            ..TerrainParams::default()
        });
        let ctx = pool.acquire(&b, &lib);
        assert!(ctx.matches(&b));
        drop(ctx);
        assert_eq!(pool.stats(), (3, 1));
    }

    #[test]
    fn threads_do_not_share() {
        let pool = ThreadContextPool::new();
        let lvl = Level::new("a", 1, 0, 64, true, TerrainParams::default());
        drop(pool.acquire(&lvl, &NoiseGenerator));
        std::thread::scope(|s| {
            s.spawn(|| drop(pool.acquire(&lvl, &NoiseGenerator)));
        });
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats(), (2, 0));
    }
}
