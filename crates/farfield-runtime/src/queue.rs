use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Sender, unbounded};
use farfield_chunk::{GenerationLibrary, NoiseGenerator};
use farfield_io::{MemoryStorage, TileSourceResolver, TileStorage};
use farfield_lighting::{FloodLightEngine, LightingEngine};
use farfield_world::{GeneratorParams, Level, MIN_DELIVERY_STAGE, Stage, StageChain, TilePos};
use hashbrown::HashMap;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::LOG_TARGET;
use crate::assembler::{WindowAssembler, WindowPlan};
use crate::breaker::CircuitBreaker;
use crate::engine::{DelegatedGenerator, EngineExecutor, SimulationEngine};
use crate::error::{GenError, panic_message};
use crate::request::{CompletionHandle, GenerationMode, RequestId, RequestSummary, ResultSink};
use crate::runner::{LightPolicy, StageRunner};
use crate::session::Session;
use crate::worker::{WorkerContext, WorkerRegistry};

struct Job {
    id: RequestId,
    region_min: TilePos,
    width: usize,
    target: Stage,
    mode: GenerationMode,
    sink: ResultSink,
    handle: CompletionHandle,
}

struct InFlight {
    handle: CompletionHandle,
    region_min: TilePos,
    width: usize,
}

impl InFlight {
    fn overlaps(&self, min: TilePos, width: usize) -> bool {
        let (w0, w1) = (self.width as i32, width as i32);
        self.region_min.x < min.x + w1
            && min.x < self.region_min.x + w0
            && self.region_min.z < min.z + w1
            && min.z < self.region_min.z + w0
    }
}

/// Everything a worker needs to turn a job into delivered tiles.
struct Core {
    level: Arc<Level>,
    session: Arc<Session>,
    runner: StageRunner,
    resolver: TileSourceResolver,
    delegated: Option<DelegatedGenerator>,
}

impl Core {
    fn process(&self, job: &Job) -> Result<RequestSummary, GenError> {
        let worker = WorkerContext::new(
            job.id,
            job.handle.cancel_token(),
            job.handle.progress(),
            Arc::clone(self.session.workers()),
        );
        let _activity = Activity::enter(self.session.workers(), job.id);
        worker.checkpoint()?;
        if !self.session.config().is_enabled() {
            return Err(GenError::Disabled);
        }
        match job.mode {
            GenerationMode::Standalone => self.run_standalone(job, &worker),
            GenerationMode::EngineDelegated => match &self.delegated {
                Some(d) => d.generate(
                    &self.level,
                    job.region_min,
                    job.width,
                    job.target,
                    &worker,
                    &job.sink,
                ),
                None => Err(GenError::InvalidRequest(
                    "no simulation engine attached".into(),
                )),
            },
        }
    }

    fn run_standalone(&self, job: &Job, worker: &WorkerContext) -> Result<RequestSummary, GenError> {
        let library = self.runner.library();
        let plan = WindowPlan::new(
            job.region_min,
            job.width,
            self.runner.chain().max_border(),
            library.accepts_even_windows(),
        );
        worker.set_phase("assemble", None);
        let mut asm = WindowAssembler::new(&self.level, &self.resolver, self.session.tiles(), &plan);
        asm.prefetch();
        worker.checkpoint()?;

        let light = LightPolicy {
            max_sky_light: self.level.max_sky_light(),
            fast: self.session.config().params().fast_lighting,
        };
        let mut summary = RequestSummary::default();
        let mut outcome = Ok(());
        {
            let mut ctx = self.session.contexts().acquire(&self.level, library.as_ref());
            for pass in plan.passes() {
                let mut window = asm.window_for(pass);
                let r = self.runner.run(
                    &mut window,
                    job.target,
                    &mut ctx,
                    worker,
                    self.session.log_once(),
                    light,
                );
                asm.restore(window);
                match r {
                    Ok(s) => {
                        summary.absorb(&s);
                        summary.passes += 1;
                    }
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
        }

        // border tiles never consulted storage, so they stay out of the cache
        let (region, _border) = asm.into_tiles();
        for t in &region {
            if t.stage() != Stage::Empty {
                self.session.tiles().insert(&self.level, t.clone());
            }
        }
        outcome?;
        worker.checkpoint()?;

        worker.set_phase("deliver", None);
        for t in region {
            if t.is_at_least(MIN_DELIVERY_STAGE) {
                summary.delivered += 1;
                (job.sink)(t);
            }
        }
        Ok(summary)
    }
}

struct Activity<'a>(&'a WorkerRegistry);

impl<'a> Activity<'a> {
    fn enter(registry: &'a WorkerRegistry, request: RequestId) -> Self {
        registry.enter(request);
        Self(registry)
    }
}

impl Drop for Activity<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

pub struct GenerationQueueBuilder {
    level: Arc<Level>,
    params: GeneratorParams,
    library: Arc<dyn GenerationLibrary>,
    lighting: Arc<dyn LightingEngine>,
    storage: Arc<dyn TileStorage>,
    engine: Option<Arc<dyn SimulationEngine>>,
}

impl GenerationQueueBuilder {
    pub fn new(level: Arc<Level>, params: GeneratorParams) -> Self {
        Self {
            level,
            params,
            library: Arc::new(NoiseGenerator),
            lighting: Arc::new(FloodLightEngine),
            storage: Arc::new(MemoryStorage::new()),
            engine: None,
        }
    }

    pub fn library(mut self, library: Arc<dyn GenerationLibrary>) -> Self {
        self.library = library;
        self
    }

    pub fn lighting(mut self, lighting: Arc<dyn LightingEngine>) -> Self {
        self.lighting = lighting;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn TileStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn engine(mut self, engine: Arc<dyn SimulationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> Result<Arc<GenerationQueue>, GenError> {
        let params = self.params;
        let session = Session::new(params.clone());
        let resolver = TileSourceResolver::new(
            self.storage,
            &self.level,
            &params,
            Arc::clone(session.log_once()),
        );
        let runner = StageRunner::new(
            self.library,
            Arc::clone(&self.lighting),
            StageChain::new(params.structure_reference_border),
        );
        let delegated = match self.engine {
            Some(engine) => {
                let executor = EngineExecutor::spawn("farfield-engine")
                    .map_err(|e| GenError::Unexpected(format!("engine executor: {e}")))?;
                Some(DelegatedGenerator::new(
                    engine,
                    Arc::new(executor),
                    self.lighting,
                    Arc::clone(&session),
                ))
            }
            None => None,
        };
        let core = Arc::new(Core {
            level: self.level,
            session: Arc::clone(&session),
            runner,
            resolver,
            delegated,
        });

        let workers = params.worker_threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("farfield-gen-{i}"))
            .build()
            .map_err(|e| GenError::Unexpected(format!("generation pool: {e}")))?;
        let (job_tx, job_rx) = unbounded::<Job>();
        let queued = Arc::new(AtomicUsize::new(0));
        let inflight = Arc::new(AtomicUsize::new(0));
        for _ in 0..workers {
            let rx = job_rx.clone();
            let core = Arc::clone(&core);
            let queued = Arc::clone(&queued);
            let inflight = Arc::clone(&inflight);
            pool.spawn(move || {
                while let Ok(job) = rx.recv() {
                    queued.fetch_sub(1, Ordering::Relaxed);
                    if job.handle.is_done() {
                        continue;
                    }
                    inflight.fetch_add(1, Ordering::Relaxed);
                    let r = catch_unwind(AssertUnwindSafe(|| core.process(&job))).unwrap_or_else(|p| {
                        Err(GenError::Unexpected(format!(
                            "generation task panicked: {}",
                            panic_message(p.as_ref())
                        )))
                    });
                    if let Ok(s) = &r {
                        log::debug!(
                            target: LOG_TARGET,
                            "request #{} done: {} delivered, {} stage runs, {} skipped, {} faults",
                            job.id,
                            s.delivered,
                            s.stage_runs,
                            s.skipped,
                            s.faults
                        );
                    }
                    job.handle.complete(r.map_err(GenError::wrap));
                    inflight.fetch_sub(1, Ordering::Relaxed);
                }
            });
        }

        let breaker = CircuitBreaker::new(params.exception_threshold, params.exception_reset);
        Ok(Arc::new(GenerationQueue {
            core,
            breaker,
            pool,
            job_tx: Mutex::new(Some(job_tx)),
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queued,
            inflight,
            closed: AtomicBool::new(false),
            workers,
        }))
    }
}

/// Accepts generation requests and runs them on a fixed worker pool. Call
/// [`GenerationQueue::update_all_futures`] periodically (the [`crate::Watchdog`]
/// does) to collect faults and cancel stalled requests.
pub struct GenerationQueue {
    core: Arc<Core>,
    breaker: CircuitBreaker,
    pool: ThreadPool,
    job_tx: Mutex<Option<Sender<Job>>>,
    active: Mutex<HashMap<RequestId, InFlight>>,
    next_id: AtomicU64,
    queued: Arc<AtomicUsize>,
    inflight: Arc<AtomicUsize>,
    closed: AtomicBool,
    workers: usize,
}

impl GenerationQueue {
    pub fn builder(level: Arc<Level>, params: GeneratorParams) -> GenerationQueueBuilder {
        GenerationQueueBuilder::new(level, params)
    }

    pub fn level(&self) -> &Arc<Level> {
        &self.core.level
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.core.session
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Requests not yet removed by maintenance.
    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    /// (queued, running)
    pub fn queue_debug_counts(&self) -> (usize, usize) {
        (
            self.queued.load(Ordering::Relaxed),
            self.inflight.load(Ordering::Relaxed),
        )
    }

    /// Queues generation of the `width` x `width` tiles starting at `origin`.
    /// Invalid requests come back as already-failed handles.
    pub fn submit(
        &self,
        origin: TilePos,
        width: usize,
        target: Stage,
        mode: GenerationMode,
        sink: ResultSink,
    ) -> CompletionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.pool.current_thread_index().is_some() {
            return CompletionHandle::failed(
                id,
                GenError::InvalidRequest("submit called from a generation worker".into()),
            );
        }
        if width == 0 || width % 2 != 0 {
            return CompletionHandle::failed(
                id,
                GenError::InvalidRequest(format!("width must be even and positive, got {width}")),
            );
        }
        if self.is_closed() {
            return CompletionHandle::failed(id, GenError::Shutdown);
        }
        if !self.core.session.config().is_enabled() {
            return CompletionHandle::failed(id, GenError::Disabled);
        }
        if mode == GenerationMode::EngineDelegated && self.core.delegated.is_none() {
            return CompletionHandle::failed(
                id,
                GenError::InvalidRequest("no simulation engine attached".into()),
            );
        }

        let handle = CompletionHandle::new(id);
        {
            let mut active = self.active();
            for (other, entry) in active.iter() {
                if entry.overlaps(origin, width) {
                    log::debug!(
                        target: LOG_TARGET,
                        "request #{id} at {origin} overlaps in-flight request #{other}; both will run"
                    );
                }
            }
            active.insert(
                id,
                InFlight {
                    handle: handle.clone(),
                    region_min: origin,
                    width,
                },
            );
        }
        log::debug!(
            target: LOG_TARGET,
            "request #{id}: {width}x{width} tiles at {origin} up to {} ({mode})",
            target
        );
        let job = Job {
            id,
            region_min: origin,
            width,
            target,
            mode,
            sink,
            handle: handle.clone(),
        };
        self.queued.fetch_add(1, Ordering::Relaxed);
        let sent = match self.job_tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };
        if !sent {
            self.queued.fetch_sub(1, Ordering::Relaxed);
            self.active().remove(&id);
            handle.complete(Err(GenError::Shutdown));
        }
        handle
    }

    /// Maintenance pass: drops finished requests, logs and counts their
    /// failures, trips the circuit breaker, and cancels stalled requests.
    pub fn update_all_futures(&self) {
        self.breaker.maybe_reset();
        let timeout = self.core.session.config().params().request_timeout;
        let mut tripped = false;
        let mut stalled = Vec::new();
        self.active().retain(|&id, entry| {
            let h = &entry.handle;
            if h.is_done() {
                if let Some(e) = h.error() {
                    if !h.is_cancelled() && !e.is_shutdown() {
                        log::error!(
                            target: LOG_TARGET,
                            "generation request #{id} at {} failed: {e} ({:?})",
                            entry.region_min,
                            e.root_cause()
                        );
                        if e.counts_toward_breaker() && self.breaker.record_fault() {
                            tripped = true;
                        }
                    }
                }
                return false;
            }
            let idle = h.progress().stalled_for();
            if idle > timeout {
                stalled.push((id, entry.region_min, idle));
                h.cancel_with(GenError::TimedOut(idle));
                return false;
            }
            true
        });

        if !stalled.is_empty() {
            for (id, at, idle) in &stalled {
                log::warn!(
                    target: LOG_TARGET,
                    "generation request #{id} at {at} made no progress for {idle:?}; cancelled"
                );
            }
            self.core
                .session
                .workers()
                .dump_stacks("generation request timed out");
        }
        if tripped {
            self.core.session.config().set_enabled(false);
            log::error!(
                target: LOG_TARGET,
                "more than {} generation failures within {:?}; distant terrain generation disabled",
                self.breaker.threshold(),
                self.core.session.config().params().exception_reset
            );
        }
    }

    /// Cancels everything in flight, stops the workers and tears down the session.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.job_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let cancelled: Vec<InFlight> = self.active().drain().map(|(_, e)| e).collect();
        for entry in &cancelled {
            entry.handle.cancel_with(GenError::Shutdown);
        }
        log::info!(
            target: LOG_TARGET,
            "generation queue closed; {} requests cancelled",
            cancelled.len()
        );
        self.core.session.teardown();
    }

    fn active(&self) -> MutexGuard<'_, HashMap<RequestId, InFlight>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for GenerationQueue {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farfield_world::TerrainParams;

    fn queue(workers: usize) -> Arc<GenerationQueue> {
        let level = Arc::new(Level::new("q", 4, -16, 160, true, TerrainParams::default()));
        let params = GeneratorParams {
            worker_threads: workers,
            ..GeneratorParams::default()
        };
        GenerationQueue::builder(level, params).build().unwrap()
    }

    fn discard() -> ResultSink {
        Arc::new(|_| {})
    }

    #[test]
    fn rejects_odd_and_zero_widths() {
        let q = queue(1);
        for w in [0, 3] {
            let h = q.submit(TilePos::new(0, 0), w, Stage::Surface, GenerationMode::Standalone, discard());
            assert!(matches!(h.join(), Err(GenError::InvalidRequest(_))));
        }
        assert_eq!(q.active_count(), 0);
    }

    #[test]
    fn delegated_without_engine_is_invalid() {
        let q = queue(1);
        let h = q.submit(TilePos::new(0, 0), 2, Stage::Surface, GenerationMode::EngineDelegated, discard());
        assert!(matches!(h.join(), Err(GenError::InvalidRequest(_))));
    }

    #[test]
    fn submit_from_worker_is_rejected() {
        let q = queue(1);
        let inner = Arc::clone(&q);
        let (tx, rx) = crossbeam_channel::bounded(1);
        let sink: ResultSink = Arc::new(move |_| {
            let h = inner.submit(TilePos::new(9, 9), 2, Stage::Biomes, GenerationMode::Standalone, Arc::new(|_| {}));
            let _ = tx.try_send(h.join());
        });
        q.submit(TilePos::new(0, 0), 2, Stage::Biomes, GenerationMode::Standalone, sink)
            .join()
            .unwrap();
        let nested = rx.recv().unwrap();
        assert!(matches!(nested, Err(GenError::InvalidRequest(_))));
        q.close();
    }

    #[test]
    fn disabled_and_closed_queues_refuse_work() {
        let q = queue(1);
        q.session().config().set_enabled(false);
        let h = q.submit(TilePos::new(0, 0), 2, Stage::Biomes, GenerationMode::Standalone, discard());
        assert!(matches!(h.join(), Err(GenError::Disabled)));
        q.session().config().set_enabled(true);
        q.close();
        let h = q.submit(TilePos::new(0, 0), 2, Stage::Biomes, GenerationMode::Standalone, discard());
        assert!(matches!(h.join(), Err(GenError::Shutdown)));
    }

    #[test]
    fn overlap_check() {
        let a = InFlight {
            handle: CompletionHandle::new(1),
            region_min: TilePos::new(0, 0),
            width: 4,
        };
        assert!(a.overlaps(TilePos::new(3, 3), 2));
        assert!(!a.overlaps(TilePos::new(4, 0), 2));
        assert!(!a.overlaps(TilePos::new(-2, -2), 2));
    }
}
