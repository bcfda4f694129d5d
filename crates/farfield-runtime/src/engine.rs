use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use farfield_chunk::{GenerationLibrary, LibraryFault, Tile, Window};
use farfield_lighting::LightingEngine;
use farfield_world::{GenCtx, Level, MIN_DELIVERY_STAGE, Stage, StageChain, TilePos};
use hashbrown::HashMap;
use thiserror::Error;

use crate::ENGINE_LOG_TARGET;
use crate::error::{GenError, panic_message};
use crate::request::{RequestSummary, ResultSink};
use crate::session::Session;
use crate::worker::WorkerContext;

const AWAIT_SLICE: Duration = Duration::from_millis(25);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine executor has shut down")]
    Shutdown,
    #[error("engine generation failed: {0}")]
    Failed(String),
    #[error("engine rejected the request: {0}")]
    Rejected(String),
}

impl EngineError {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, EngineError::Shutdown)
    }
}

/// Result of a generation scheduled on the engine; resolves exactly once.
pub type TileFuture = Receiver<Result<Tile, EngineError>>;

/// The live simulation's tile manager. Not thread-safe: every call must be
/// made from the engine's executor thread.
pub trait SimulationEngine: Send + Sync {
    /// Keeps `pos` resident and generating up to `stage` until removed.
    fn add_ticket(&self, pos: TilePos, stage: Stage);
    fn remove_ticket(&self, pos: TilePos, stage: Stage);
    fn schedule_generation(&self, pos: TilePos, stage: Stage) -> TileFuture;

    fn supports_parallel_generation(&self) -> bool {
        false
    }
}

type Task = Box<dyn FnOnce() + Send>;

/// The engine's single designated thread. Work is posted as tasks and
/// awaited through channels.
pub struct EngineExecutor {
    tx: Mutex<Option<Sender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread: ThreadId,
}

impl EngineExecutor {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<Task>();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    if let Err(p) = catch_unwind(AssertUnwindSafe(task)) {
                        log::error!(
                            target: ENGINE_LOG_TARGET,
                            "engine task panicked: {}",
                            panic_message(p.as_ref())
                        );
                    }
                }
            })?;
        let thread = handle.thread().id();
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            thread,
        })
    }

    #[inline]
    pub fn is_executor_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    pub fn execute(&self, f: impl FnOnce() + Send + 'static) -> Result<(), EngineError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(Box::new(f)).map_err(|_| EngineError::Shutdown),
            None => Err(EngineError::Shutdown),
        }
    }

    /// Runs `f` on the executor; the receiver yields its result.
    pub fn submit<R: Send + 'static>(
        &self,
        f: impl FnOnce() -> R + Send + 'static,
    ) -> Receiver<Result<R, EngineError>> {
        let (tx, rx) = bounded(1);
        let reply = tx.clone();
        let posted = self.execute(move || {
            let r = catch_unwind(AssertUnwindSafe(f))
                .map_err(|p| EngineError::Failed(panic_message(p.as_ref())));
            let _ = reply.send(r);
        });
        if let Err(e) = posted {
            let _ = tx.send(Err(e));
        }
        rx
    }

    pub fn shutdown(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(h) = handle {
            if h.thread().id() != thread::current().id() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for EngineExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Tiles the host should not treat as edited: the engine is writing them
/// on our behalf. Entries outlive their ticket by a grace period.
#[derive(Debug, Default)]
pub struct UpdateIgnoreSet {
    entries: Mutex<HashMap<TilePos, Option<Instant>>>,
}

impl UpdateIgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self, pos: TilePos) {
        self.lock().insert(pos, None);
    }

    pub fn release_after(&self, pos: TilePos, grace: Duration) {
        let mut entries = self.lock();
        if grace.is_zero() {
            entries.remove(&pos);
        } else {
            entries.insert(pos, Some(Instant::now() + grace));
        }
    }

    pub fn contains(&self, pos: TilePos) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, until| until.is_none_or(|t| t > now));
        entries.contains_key(&pos)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TilePos, Option<Instant>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Produces tiles by asking the simulation engine to generate them itself.
pub struct DelegatedGenerator {
    engine: Arc<dyn SimulationEngine>,
    executor: Arc<EngineExecutor>,
    lighting: Arc<dyn LightingEngine>,
    session: Arc<Session>,
}

impl DelegatedGenerator {
    pub fn new(
        engine: Arc<dyn SimulationEngine>,
        executor: Arc<EngineExecutor>,
        lighting: Arc<dyn LightingEngine>,
        session: Arc<Session>,
    ) -> Self {
        Self {
            engine,
            executor,
            lighting,
            session,
        }
    }

    pub fn generate(
        &self,
        level: &Level,
        region_min: TilePos,
        width: usize,
        target: Stage,
        worker: &WorkerContext,
        sink: &ResultSink,
    ) -> Result<RequestSummary, GenError> {
        if !self.engine.supports_parallel_generation() {
            self.session.log_once().warn(
                ENGINE_LOG_TARGET,
                "simulation engine generates tiles serially; delegated generation will be slow",
            );
        }
        let stage = target.max(MIN_DELIVERY_STAGE);
        let positions: Vec<TilePos> = region_min.square(width).collect();
        let _tickets = TicketGuard::new(self, positions.clone(), stage);

        worker.set_phase("engine tickets", None);
        let engine = Arc::clone(&self.engine);
        let scheduled = self.executor.submit(move || {
            for &p in &positions {
                engine.add_ticket(p, stage);
            }
            positions
                .iter()
                .map(|&p| engine.schedule_generation(p, stage))
                .collect::<Vec<_>>()
        });
        let futures = await_future(&scheduled, worker)??;
        worker.checkpoint()?;

        let mut tiles = Vec::with_capacity(futures.len());
        for fut in &futures {
            if worker.is_generation_worker() && fut.is_empty() {
                self.session.log_once().warn(
                    ENGINE_LOG_TARGET,
                    "engine future was not completed synchronously on a generation worker; waiting for it",
                );
            }
            let tile = await_future(fut, worker)??;
            worker.set_phase("engine await", Some(tile.pos));
            worker.checkpoint()?;
            tiles.push(tile);
        }

        worker.set_phase("lighting", None);
        for t in &mut tiles {
            if t.stage() != Stage::Empty {
                t.recalc_heightmaps_if_needed();
            }
        }
        if self.session.config().params().fast_lighting {
            for t in tiles.iter_mut().filter(|t| t.stage() != Stage::Empty) {
                t.set_light_correct(true);
            }
        } else {
            self.lighting.bake_lighting(&mut tiles, level.max_sky_light());
        }

        let mut summary = RequestSummary {
            passes: 1,
            ..RequestSummary::default()
        };
        for t in tiles {
            if t.is_at_least(MIN_DELIVERY_STAGE) {
                summary.delivered += 1;
                sink(t);
            }
        }
        Ok(summary)
    }
}

/// Waits on an engine future while honouring interrupts.
fn await_future<T>(
    rx: &Receiver<Result<T, EngineError>>,
    worker: &WorkerContext,
) -> Result<Result<T, EngineError>, GenError> {
    loop {
        worker.check_cancelled()?;
        match rx.recv_timeout(AWAIT_SLICE) {
            Ok(r) => return Ok(r),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(Err(EngineError::Shutdown)),
        }
    }
}

/// Releases tickets on the executor however the request ends.
struct TicketGuard<'a> {
    owner: &'a DelegatedGenerator,
    positions: Vec<TilePos>,
    stage: Stage,
}

impl<'a> TicketGuard<'a> {
    fn new(owner: &'a DelegatedGenerator, positions: Vec<TilePos>, stage: Stage) -> Self {
        for &p in &positions {
            owner.session.ignore_updates().hold(p);
        }
        Self {
            owner,
            positions,
            stage,
        }
    }
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        let positions = std::mem::take(&mut self.positions);
        let grace = self.owner.session.config().params().update_ignore;
        for &p in &positions {
            self.owner.session.ignore_updates().release_after(p, grace);
        }
        let engine = Arc::clone(&self.owner.engine);
        let stage = self.stage;
        let removed = self.owner.executor.execute(move || {
            for p in positions {
                engine.remove_ticket(p, stage);
            }
        });
        if let Err(e) = removed {
            log::debug!(target: ENGINE_LOG_TARGET, "could not release tickets: {e}");
        }
    }
}

/// Engine used when no host simulation is attached: generates tiles with
/// the bundled library and keeps them resident while ticketed.
pub struct LocalEngine {
    level: Arc<Level>,
    library: Arc<dyn GenerationLibrary>,
    chain: StageChain,
    parallel: bool,
    state: Mutex<LocalState>,
}

#[derive(Default)]
struct LocalState {
    tickets: HashMap<TilePos, usize>,
    loaded: HashMap<TilePos, Tile>,
    ctx: Option<GenCtx>,
}

impl LocalEngine {
    pub fn new(level: Arc<Level>, library: Arc<dyn GenerationLibrary>) -> Self {
        Self {
            level,
            library,
            chain: StageChain::default(),
            parallel: false,
            state: Mutex::new(LocalState::default()),
        }
    }

    pub fn with_parallel_generation(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn ticket_count(&self) -> usize {
        self.lock().tickets.values().sum()
    }

    pub fn loaded_count(&self) -> usize {
        self.lock().loaded.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generate(&self, state: &mut LocalState, pos: TilePos, stage: Stage) -> Result<Tile, EngineError> {
        let mut tile = match state.loaded.remove(&pos) {
            Some(t) => t,
            None => Tile::empty(pos, self.level.min_y, self.level.height),
        };
        if !tile.is_at_least(stage) {
            let ctx = match state.ctx.take() {
                Some(ctx) if ctx.matches(&self.level) => ctx,
                _ => self.library.make_context(&self.level),
            };
            let ctx = state.ctx.insert(ctx);
            let context = Window::new(pos, 1);
            for def in self.chain.through(stage) {
                if tile.is_at_least(def.stage) {
                    continue;
                }
                let stage_id = def.stage;
                let r = catch_unwind(AssertUnwindSafe(|| {
                    self.library.run_stage(stage_id, ctx, &context, &mut tile)
                }))
                .unwrap_or_else(|p| Err(LibraryFault::Panicked(panic_message(p.as_ref()))));
                if let Err(fault) = r {
                    state.loaded.insert(pos, tile);
                    return Err(EngineError::Failed(fault.to_string()));
                }
                tile.advance_to(stage_id);
                tile.set_light_correct(false);
            }
            if stage > Stage::Features {
                tile.advance_to(stage);
            }
        }
        let out = tile.clone();
        state.loaded.insert(pos, tile);
        Ok(out)
    }
}

impl SimulationEngine for LocalEngine {
    fn add_ticket(&self, pos: TilePos, _stage: Stage) {
        *self.lock().tickets.entry(pos).or_insert(0) += 1;
    }

    fn remove_ticket(&self, pos: TilePos, _stage: Stage) {
        let mut state = self.lock();
        let gone = match state.tickets.get_mut(&pos) {
            Some(n) if *n > 1 => {
                *n -= 1;
                false
            }
            Some(_) => true,
            None => false,
        };
        if gone {
            state.tickets.remove(&pos);
            state.loaded.remove(&pos);
        }
    }

    fn schedule_generation(&self, pos: TilePos, stage: Stage) -> TileFuture {
        let (tx, rx) = bounded(1);
        let mut state = self.lock();
        let r = if state.tickets.contains_key(&pos) {
            self.generate(&mut state, pos, stage)
        } else {
            Err(EngineError::Rejected(format!("tile {pos} has no ticket")))
        };
        let _ = tx.send(r);
        rx
    }

    fn supports_parallel_generation(&self) -> bool {
        self.parallel
    }
}

impl Drop for LocalEngine {
    fn drop(&mut self) {
        let state = self.lock();
        if !state.tickets.is_empty() {
            log::warn!(
                target: ENGINE_LOG_TARGET,
                "local engine dropped with {} ticketed tiles",
                state.tickets.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farfield_chunk::NoiseGenerator;
    use farfield_world::TerrainParams;

    fn level() -> Arc<Level> {
        Arc::new(Level::new("engine", 5, -64, 384, true, TerrainParams::default()))
    }

    #[test]
    fn executor_runs_tasks_on_its_thread() {
        let exec = Arc::new(EngineExecutor::spawn("test-engine").unwrap());
        let probe = Arc::clone(&exec);
        let rx = exec.submit(move || probe.is_executor_thread());
        assert_eq!(rx.recv().unwrap(), Ok(true));
        assert!(!exec.is_executor_thread());
        let rx = exec.submit(|| -> u32 { panic!("engine blew up") });
        assert!(matches!(rx.recv().unwrap(), Err(EngineError::Failed(_))));
        exec.shutdown();
        assert_eq!(exec.execute(|| {}), Err(EngineError::Shutdown));
        let rx = exec.submit(|| 1);
        assert_eq!(rx.recv().unwrap(), Err(EngineError::Shutdown));
    }

    #[test]
    fn ignore_set_expires_after_grace() {
        let set = UpdateIgnoreSet::new();
        let p = TilePos::new(3, 4);
        set.hold(p);
        assert!(set.contains(p));
        set.release_after(p, Duration::from_millis(10));
        assert!(set.contains(p));
        thread::sleep(Duration::from_millis(20));
        assert!(!set.contains(p));
        assert!(set.is_empty());
    }

    #[test]
    fn local_engine_requires_tickets() {
        let engine = LocalEngine::new(level(), Arc::new(NoiseGenerator));
        let p = TilePos::new(0, 0);
        let r = engine.schedule_generation(p, Stage::Surface).recv().unwrap();
        assert!(matches!(r, Err(EngineError::Rejected(_))));

        engine.add_ticket(p, Stage::Surface);
        let tile = engine.schedule_generation(p, Stage::Surface).recv().unwrap().unwrap();
        assert_eq!(tile.stage(), Stage::Surface);
        assert!(tile.has_blocks());
        assert_eq!(engine.loaded_count(), 1);

        engine.remove_ticket(p, Stage::Surface);
        assert_eq!(engine.ticket_count(), 0);
        assert_eq!(engine.loaded_count(), 0);
    }
}
