use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use farfield_chunk::{GenerationLibrary, LibraryFault, Window};
use farfield_lighting::LightingEngine;
use farfield_world::{GenCtx, LogOnce, Stage, StageChain};

use crate::LOG_TARGET;
use crate::error::{GenError, panic_message};
use crate::request::RequestSummary;
use crate::worker::WorkerContext;

/// How a run finishes its window's lighting. Taken from the current config
/// at the start of each request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightPolicy {
    pub max_sky_light: u8,
    /// Mark tiles light-correct without baking.
    pub fast: bool,
}

/// Drives the stage chain over one window, then finalizes lighting.
pub struct StageRunner {
    library: Arc<dyn GenerationLibrary>,
    lighting: Arc<dyn LightingEngine>,
    chain: StageChain,
}

impl StageRunner {
    pub fn new(
        library: Arc<dyn GenerationLibrary>,
        lighting: Arc<dyn LightingEngine>,
        chain: StageChain,
    ) -> Self {
        Self {
            library,
            lighting,
            chain,
        }
    }

    pub fn chain(&self) -> &StageChain {
        &self.chain
    }

    pub fn library(&self) -> &Arc<dyn GenerationLibrary> {
        &self.library
    }

    /// Advances the window's tiles through `target`. Lighting runs whether
    /// or not the stages finished; an interrupt is returned afterwards.
    pub fn run(
        &self,
        window: &mut Window,
        target: Stage,
        ctx: &mut GenCtx,
        worker: &WorkerContext,
        log_once: &LogOnce,
        light: LightPolicy,
    ) -> Result<RequestSummary, GenError> {
        let mut summary = RequestSummary::default();
        let staged = self.run_stages(window, target, ctx, worker, log_once, &mut summary);
        self.finalize(window, target, worker, light);
        staged.map(|()| summary)
    }

    fn run_stages(
        &self,
        window: &mut Window,
        target: Stage,
        ctx: &mut GenCtx,
        worker: &WorkerContext,
        log_once: &LogOnce,
        summary: &mut RequestSummary,
    ) -> Result<(), GenError> {
        for def in self.chain.through(target) {
            worker.checkpoint()?;
            let stage = def.stage;
            let cutout = window.cutout(self.chain.trim_for(def));
            for pos in cutout.positions() {
                worker.checkpoint()?;
                let Some(mut tile) = window.take(pos) else {
                    continue;
                };
                if tile.is_at_least(stage) {
                    summary.skipped += 1;
                    if let Err(tile) = window.put(tile) {
                        log::error!(target: LOG_TARGET, "tile {} no longer fits its window", tile.pos);
                    }
                    continue;
                }
                worker.set_phase(stage.name(), Some(pos));
                let view: &Window = window;
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    self.library.run_stage(stage, ctx, view, &mut tile)
                }))
                .unwrap_or_else(|p| Err(LibraryFault::Panicked(panic_message(p.as_ref()))));
                match outcome {
                    Ok(()) => {
                        tile.advance_to(stage);
                        summary.stage_runs += 1;
                    }
                    Err(fault) => {
                        summary.faults += 1;
                        log_once.warn(
                            LOG_TARGET,
                            &format!("{} stage failed, continuing with partial tile: {fault}", stage.name()),
                        );
                        log::debug!(target: LOG_TARGET, "{} failed at tile {pos}: {fault}", stage.name());
                    }
                }
                tile.set_light_correct(false);
                if let Err(tile) = window.put(tile) {
                    log::error!(target: LOG_TARGET, "tile {} no longer fits its window", tile.pos);
                }
            }
        }
        Ok(())
    }

    fn finalize(&self, window: &mut Window, target: Stage, worker: &WorkerContext, light: LightPolicy) {
        worker.set_phase("lighting", None);
        let mut tiles = window.drain();
        for t in tiles.iter_mut().filter(|t| t.stage() != Stage::Empty) {
            t.recalc_heightmaps_if_needed();
        }
        if light.fast {
            for t in tiles.iter_mut().filter(|t| t.stage() != Stage::Empty) {
                t.set_light_correct(true);
            }
        } else {
            self.lighting.bake_lighting(&mut tiles, light.max_sky_light);
        }
        if target >= Stage::Light {
            for t in tiles.iter_mut() {
                if t.is_at_least(Stage::Features) && t.is_light_correct() {
                    t.advance_to(target);
                }
            }
        }
        for t in window.refill(tiles) {
            log::error!(target: LOG_TARGET, "dropped tile {} while finalizing", t.pos);
        }
    }
}
