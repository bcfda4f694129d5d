use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use farfield_world::TilePos;
use hashbrown::HashMap;

use crate::LOG_TARGET;
use crate::error::GenError;
use crate::request::RequestId;

/// Cooperative interrupt flag shared between a request and whoever may cancel it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Last time a request reached a checkpoint.
#[derive(Debug)]
pub struct Progress {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn touch(&self) {
        self.last_ms.fetch_max(self.now_ms(), Ordering::AcqRel);
    }

    pub fn stalled_for(&self) -> Duration {
        let last = self.last_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// What one generation worker is doing right now.
#[derive(Clone, Debug)]
pub struct WorkerActivity {
    pub thread_name: String,
    pub request: RequestId,
    pub phase: String,
    pub tile: Option<TilePos>,
    pub since: Instant,
}

/// Published per-thread activity, dumped when a request stalls. Stacks of
/// other threads cannot be captured, so this is what the dump reports.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    activities: Mutex<HashMap<ThreadId, WorkerActivity>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<ThreadId, WorkerActivity>) -> R) -> R {
        let mut map = self
            .activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut map)
    }

    pub fn enter(&self, request: RequestId) {
        let current = thread::current();
        let activity = WorkerActivity {
            thread_name: current.name().unwrap_or("<unnamed>").to_owned(),
            request,
            phase: "starting".to_owned(),
            tile: None,
            since: Instant::now(),
        };
        self.with(|m| m.insert(current.id(), activity));
    }

    pub fn leave(&self) {
        let id = thread::current().id();
        self.with(|m| m.remove(&id));
    }

    pub fn update(&self, phase: &str, tile: Option<TilePos>) {
        let id = thread::current().id();
        self.with(|m| {
            if let Some(a) = m.get_mut(&id) {
                if a.phase != phase {
                    a.phase.clear();
                    a.phase.push_str(phase);
                    a.since = Instant::now();
                }
                a.tile = tile;
            }
        });
    }

    pub fn snapshot(&self) -> Vec<WorkerActivity> {
        let mut out: Vec<_> = self.with(|m| m.values().cloned().collect());
        out.sort_by(|a, b| a.thread_name.cmp(&b.thread_name));
        out
    }

    pub fn active_count(&self) -> usize {
        self.with(|m| m.len())
    }

    pub fn dump_stacks(&self, reason: &str) {
        let activities = self.snapshot();
        log::warn!(
            target: LOG_TARGET,
            "{reason}; {} generation workers busy",
            activities.len()
        );
        for a in &activities {
            let tile = a.tile.map(|t| t.to_string()).unwrap_or_else(|| "-".into());
            log::warn!(
                target: LOG_TARGET,
                "  {}: request #{} in {} for {:?} (tile {tile})",
                a.thread_name,
                a.request,
                a.phase,
                a.since.elapsed()
            );
        }
        log::debug!(
            target: LOG_TARGET,
            "watchdog stack:\n{}",
            Backtrace::force_capture()
        );
    }
}

/// Explicit per-request context threaded through the pipeline: interrupt
/// checks, progress stamps and activity publishing.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    request: RequestId,
    cancel: CancelToken,
    progress: Arc<Progress>,
    registry: Option<Arc<WorkerRegistry>>,
}

impl WorkerContext {
    pub fn new(
        request: RequestId,
        cancel: CancelToken,
        progress: Arc<Progress>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            request,
            cancel,
            progress,
            registry: Some(registry),
        }
    }

    /// A context outside any worker pool; never cancelled.
    pub fn detached() -> Self {
        Self {
            request: 0,
            cancel: CancelToken::new(),
            progress: Arc::new(Progress::new()),
            registry: None,
        }
    }

    #[inline]
    pub fn request(&self) -> RequestId {
        self.request
    }

    /// True when running on a generation worker, where blocking on the
    /// simulation's own pools must be avoided.
    #[inline]
    pub fn is_generation_worker(&self) -> bool {
        self.registry.is_some()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn check_cancelled(&self) -> Result<(), GenError> {
        if self.cancel.is_cancelled() {
            Err(GenError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Interrupt check that also records forward progress.
    pub fn checkpoint(&self) -> Result<(), GenError> {
        self.check_cancelled()?;
        self.progress.touch();
        Ok(())
    }

    pub fn set_phase(&self, phase: &str, tile: Option<TilePos>) {
        if let Some(r) = &self.registry {
            r.update(phase, tile);
        }
    }
}
