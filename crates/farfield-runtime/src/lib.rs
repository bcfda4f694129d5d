//! Batched off-thread terrain generation: request queue, window assembly,
//! stage runner, engine-delegated backend, and the maintenance watchdog.
#![forbid(unsafe_code)]

mod assembler;
mod breaker;
mod engine;
mod error;
mod queue;
mod request;
mod runner;
mod session;
mod thread_ctx;
mod tile_cache;
mod watchdog;
mod worker;

pub use assembler::{Pass, WindowAssembler, WindowPlan};
pub use breaker::CircuitBreaker;
pub use engine::{
    DelegatedGenerator, EngineError, EngineExecutor, LocalEngine, SimulationEngine, TileFuture,
    UpdateIgnoreSet,
};
pub use error::{GenError, panic_message};
pub use queue::{GenerationQueue, GenerationQueueBuilder};
pub use request::{CompletionHandle, GenerationMode, RequestId, RequestSummary, ResultSink};
pub use runner::{LightPolicy, StageRunner};
pub use session::{Session, SharedConfig};
pub use thread_ctx::{ThreadContextPool, ThreadCtx};
pub use tile_cache::{TileCache, TileCacheStats};
pub use watchdog::Watchdog;
pub use worker::{CancelToken, Progress, WorkerActivity, WorkerContext, WorkerRegistry};

/// Log target for request lifecycle, faults, the circuit breaker and timeouts.
pub const LOG_TARGET: &str = "worldgen";
/// Log target for the engine-delegated backend.
pub const ENGINE_LOG_TARGET: &str = "worldgen::engine";
