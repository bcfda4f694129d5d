use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use fastnoise_lite::{FastNoiseLite, NoiseType};
use hashbrown::HashMap;

use crate::config::{GenerationConfig, TerrainParams};
use crate::gen_ctx::GenCtx;
use crate::{MAX_LIGHT, SECTION_HEIGHT};

pub type LevelId = u64;

static NEXT_LEVEL_ID: AtomicU64 = AtomicU64::new(1);

/// A dimension being generated: its vertical extent, seed and terrain parameters.
pub struct Level {
    id: LevelId,
    pub name: String,
    pub seed: i32,
    pub min_y: i32,
    pub height: usize,
    pub has_sky_light: bool,
    terrain_params: Arc<RwLock<Arc<TerrainParams>>>,
    params_rev: AtomicU32,
}

impl Level {
    pub fn new(
        name: impl Into<String>,
        seed: i32,
        min_y: i32,
        height: usize,
        has_sky_light: bool,
        params: TerrainParams,
    ) -> Self {
        Self {
            id: NEXT_LEVEL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            seed,
            min_y,
            height,
            has_sky_light,
            terrain_params: Arc::new(RwLock::new(Arc::new(params))),
            params_rev: AtomicU32::new(0),
        }
    }

    pub fn from_config(cfg: &GenerationConfig) -> Self {
        let lvl = &cfg.level;
        Self::new(
            lvl.name.clone(),
            lvl.seed,
            lvl.min_y,
            lvl.height,
            lvl.has_sky_light,
            cfg.terrain_params(),
        )
    }

    #[inline]
    pub fn id(&self) -> LevelId {
        self.id
    }

    #[inline]
    pub fn section_count(&self) -> usize {
        self.height / SECTION_HEIGHT
    }

    /// One past the highest buildable y.
    #[inline]
    pub fn max_y(&self) -> i32 {
        self.min_y + self.height as i32
    }

    #[inline]
    pub fn max_sky_light(&self) -> u8 {
        if self.has_sky_light { MAX_LIGHT } else { 0 }
    }

    pub fn params(&self) -> Arc<TerrainParams> {
        let guard = self
            .terrain_params
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// Bumped every time terrain params are replaced.
    #[inline]
    pub fn params_rev(&self) -> u32 {
        self.params_rev.load(Ordering::Acquire)
    }

    pub fn make_gen_ctx(&self) -> GenCtx {
        let params = self.params();
        let mut height = FastNoiseLite::with_seed(self.seed);
        height.set_noise_type(Some(NoiseType::OpenSimplex2));
        height.set_frequency(Some(params.height_frequency));
        let mut detail = FastNoiseLite::with_seed(self.seed ^ 99_173);
        detail.set_noise_type(Some(NoiseType::OpenSimplex2));
        detail.set_frequency(Some(params.detail_frequency));
        let mut temperature = FastNoiseLite::with_seed(self.seed ^ 0x1203_5F31);
        temperature.set_noise_type(Some(NoiseType::OpenSimplex2));
        temperature.set_frequency(Some(params.climate_frequency));
        let mut moisture = FastNoiseLite::with_seed(((self.seed as u32) ^ 0x92E3_A1B2u32) as i32);
        moisture.set_noise_type(Some(NoiseType::OpenSimplex2));
        moisture.set_frequency(Some(params.climate_frequency));
        GenCtx {
            level_id: self.id,
            params_rev: self.params_rev(),
            seed: self.seed,
            params,
            height,
            detail,
            temperature,
            moisture,
            structure_starts: HashMap::new(),
        }
    }

    pub fn update_terrain_params(&self, params: TerrainParams) {
        let mut guard = self
            .terrain_params
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(params);
        self.params_rev.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Level")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("min_y", &self.min_y)
            .field("height", &self.height)
            .field("has_sky_light", &self.has_sky_light)
            .field("params_rev", &self.params_rev())
            .finish()
    }
}
