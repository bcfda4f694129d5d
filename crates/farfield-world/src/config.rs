use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::SECTION_HEIGHT;
use crate::stage::Stage;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub generator: Generator,
    #[serde(default)]
    pub level: LevelSettings,
    #[serde(default)]
    pub terrain: Terrain,
    #[serde(default)]
    pub logging: Logging,
}

impl GenerationConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: GenerationConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        let lvl = &self.level;
        if lvl.height == 0 || lvl.height % SECTION_HEIGHT != 0 {
            return Err(format!(
                "level height {} must be a positive multiple of {SECTION_HEIGHT}",
                lvl.height
            )
            .into());
        }
        if lvl.min_y.rem_euclid(SECTION_HEIGHT as i32) != 0 {
            return Err(
                format!("level min_y {} must be a multiple of {SECTION_HEIGHT}", lvl.min_y).into(),
            );
        }
        let t = &self.terrain;
        if t.min_height > t.max_height {
            return Err(format!(
                "terrain min_height {} exceeds max_height {}",
                t.min_height, t.max_height
            )
            .into());
        }
        if t.trunk_min > t.trunk_max {
            return Err("terrain trunk_min exceeds trunk_max".into());
        }
        if self.generator.exception_threshold == 0 {
            return Err("generator exception_threshold must be at least 1".into());
        }
        Ok(())
    }

    pub fn generator_params(&self) -> GeneratorParams {
        GeneratorParams::from_config(&self.generator)
    }

    pub fn terrain_params(&self) -> TerrainParams {
        TerrainParams::from_config(&self.terrain)
    }
}

pub fn load_config_from_path(path: &Path) -> Result<GenerationConfig, Box<dyn Error>> {
    let s = fs::read_to_string(path)?;
    GenerationConfig::from_toml_str(&s)
}

// --- [generator] ---

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParallelReads {
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Generator {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 0 picks half the available cores.
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_exception_threshold")]
    pub exception_threshold: u32,
    #[serde(default = "default_exception_reset_ms")]
    pub exception_reset_ms: u64,
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    #[serde(default)]
    pub structure_reference_border: usize,
    #[serde(default)]
    pub fast_lighting: bool,
    #[serde(default = "default_pull_lighting")]
    pub pull_lighting_for_pregenerated: bool,
    #[serde(default)]
    pub assume_pre_existing_finished: bool,
    #[serde(default = "default_min_persisted_stage")]
    pub min_persisted_stage: Stage,
    #[serde(default)]
    pub parallel_reads: ParallelReads,
    #[serde(default = "default_read_threads")]
    pub read_threads: usize,
    #[serde(default = "default_tile_cache_capacity")]
    pub tile_cache_capacity: usize,
    #[serde(default = "default_update_ignore_ms")]
    pub update_ignore_ms: u64,
}
fn default_enabled() -> bool {
    true
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_exception_threshold() -> u32 {
    20
}
fn default_exception_reset_ms() -> u64 {
    1_000
}
fn default_watchdog_interval_ms() -> u64 {
    1_000
}
fn default_pull_lighting() -> bool {
    true
}
fn default_min_persisted_stage() -> Stage {
    Stage::Full
}
fn default_read_threads() -> usize {
    4
}
fn default_tile_cache_capacity() -> usize {
    4_096
}
fn default_update_ignore_ms() -> u64 {
    5_000
}
impl Default for Generator {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            worker_threads: 0,
            request_timeout_secs: default_request_timeout_secs(),
            exception_threshold: default_exception_threshold(),
            exception_reset_ms: default_exception_reset_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            structure_reference_border: 0,
            fast_lighting: false,
            pull_lighting_for_pregenerated: default_pull_lighting(),
            assume_pre_existing_finished: false,
            min_persisted_stage: default_min_persisted_stage(),
            parallel_reads: ParallelReads::Auto,
            read_threads: default_read_threads(),
            tile_cache_capacity: default_tile_cache_capacity(),
            update_ignore_ms: default_update_ignore_ms(),
        }
    }
}

/// Resolved `[generator]` settings.
#[derive(Clone, Debug)]
pub struct GeneratorParams {
    pub enabled: bool,
    pub worker_threads: usize,
    pub request_timeout: Duration,
    pub exception_threshold: u32,
    pub exception_reset: Duration,
    pub watchdog_interval: Duration,
    pub structure_reference_border: usize,
    pub fast_lighting: bool,
    pub pull_lighting_for_pregenerated: bool,
    pub assume_pre_existing_finished: bool,
    pub min_persisted_stage: Stage,
    pub parallel_reads: ParallelReads,
    pub read_threads: usize,
    pub tile_cache_capacity: usize,
    pub update_ignore: Duration,
}

impl GeneratorParams {
    pub fn from_config(cfg: &Generator) -> Self {
        let worker_threads = if cfg.worker_threads > 0 {
            cfg.worker_threads
        } else {
            thread::available_parallelism()
                .map(|n| n.get() / 2)
                .unwrap_or(2)
                .max(1)
        };
        Self {
            enabled: cfg.enabled,
            worker_threads,
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
            exception_threshold: cfg.exception_threshold,
            exception_reset: Duration::from_millis(cfg.exception_reset_ms),
            watchdog_interval: Duration::from_millis(cfg.watchdog_interval_ms.max(1)),
            structure_reference_border: cfg.structure_reference_border,
            fast_lighting: cfg.fast_lighting,
            pull_lighting_for_pregenerated: cfg.pull_lighting_for_pregenerated,
            assume_pre_existing_finished: cfg.assume_pre_existing_finished,
            min_persisted_stage: cfg.min_persisted_stage,
            parallel_reads: cfg.parallel_reads,
            read_threads: cfg.read_threads.max(1),
            tile_cache_capacity: cfg.tile_cache_capacity,
            update_ignore: Duration::from_millis(cfg.update_ignore_ms),
        }
    }
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self::from_config(&Generator::default())
    }
}

// --- [level] ---

#[derive(Clone, Debug, Deserialize)]
pub struct LevelSettings {
    #[serde(default = "default_level_name")]
    pub name: String,
    #[serde(default = "default_seed")]
    pub seed: i32,
    #[serde(default = "default_min_y")]
    pub min_y: i32,
    #[serde(default = "default_height")]
    pub height: usize,
    #[serde(default = "default_has_sky_light")]
    pub has_sky_light: bool,
}
fn default_level_name() -> String {
    "overworld".into()
}
fn default_seed() -> i32 {
    1337
}
fn default_min_y() -> i32 {
    -64
}
fn default_height() -> usize {
    384
}
fn default_has_sky_light() -> bool {
    true
}
impl Default for LevelSettings {
    fn default() -> Self {
        Self {
            name: default_level_name(),
            seed: default_seed(),
            min_y: default_min_y(),
            height: default_height(),
            has_sky_light: default_has_sky_light(),
        }
    }
}

// --- [terrain] ---

#[derive(Clone, Debug, Deserialize)]
pub struct Terrain {
    #[serde(default = "default_height_freq")]
    pub height_frequency: f32,
    #[serde(default = "default_detail_freq")]
    pub detail_frequency: f32,
    #[serde(default = "default_min_height")]
    pub min_height: i32,
    #[serde(default = "default_max_height")]
    pub max_height: i32,
    #[serde(default = "default_sea_level")]
    pub sea_level: i32,
    #[serde(default = "default_topsoil")]
    pub topsoil_thickness: i32,
    #[serde(default = "default_climate_freq")]
    pub climate_frequency: f32,
    #[serde(default = "default_tree_prob")]
    pub tree_probability: f32,
    #[serde(default = "default_trunk_min")]
    pub trunk_min: i32,
    #[serde(default = "default_trunk_max")]
    pub trunk_max: i32,
    #[serde(default = "default_tower_chance")]
    pub tower_chance: f32,
    #[serde(default = "default_tower_radius")]
    pub tower_radius: i32,
    #[serde(default = "default_tower_height")]
    pub tower_height: i32,
    #[serde(default = "default_reference_radius")]
    pub reference_radius: i32,
}
fn default_height_freq() -> f32 {
    0.008
}
fn default_detail_freq() -> f32 {
    0.05
}
fn default_min_height() -> i32 {
    40
}
fn default_max_height() -> i32 {
    140
}
fn default_sea_level() -> i32 {
    63
}
fn default_topsoil() -> i32 {
    3
}
fn default_climate_freq() -> f32 {
    0.004
}
fn default_tree_prob() -> f32 {
    0.02
}
fn default_trunk_min() -> i32 {
    4
}
fn default_trunk_max() -> i32 {
    6
}
fn default_tower_chance() -> f32 {
    0.03
}
fn default_tower_radius() -> i32 {
    5
}
fn default_tower_height() -> i32 {
    32
}
fn default_reference_radius() -> i32 {
    1
}
impl Default for Terrain {
    fn default() -> Self {
        Self {
            height_frequency: default_height_freq(),
            detail_frequency: default_detail_freq(),
            min_height: default_min_height(),
            max_height: default_max_height(),
            sea_level: default_sea_level(),
            topsoil_thickness: default_topsoil(),
            climate_frequency: default_climate_freq(),
            tree_probability: default_tree_prob(),
            trunk_min: default_trunk_min(),
            trunk_max: default_trunk_max(),
            tower_chance: default_tower_chance(),
            tower_radius: default_tower_radius(),
            tower_height: default_tower_height(),
            reference_radius: default_reference_radius(),
        }
    }
}

/// Resolved `[terrain]` parameters read by the bundled generator.
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainParams {
    pub height_frequency: f32,
    pub detail_frequency: f32,
    pub min_height: i32,
    pub max_height: i32,
    pub sea_level: i32,
    pub topsoil_thickness: i32,
    pub climate_frequency: f32,
    pub tree_probability: f32,
    pub trunk_min: i32,
    pub trunk_max: i32,
    pub tower_chance: f32,
    pub tower_radius: i32,
    pub tower_height: i32,
    pub reference_radius: i32,
}

impl TerrainParams {
    pub fn from_config(cfg: &Terrain) -> Self {
        Self {
            height_frequency: cfg.height_frequency,
            detail_frequency: cfg.detail_frequency,
            min_height: cfg.min_height,
            max_height: cfg.max_height,
            sea_level: cfg.sea_level,
            topsoil_thickness: cfg.topsoil_thickness.max(0),
            climate_frequency: cfg.climate_frequency,
            tree_probability: cfg.tree_probability.clamp(0.0, 1.0),
            trunk_min: cfg.trunk_min.max(1),
            trunk_max: cfg.trunk_max.max(cfg.trunk_min.max(1)),
            tower_chance: cfg.tower_chance.clamp(0.0, 1.0),
            tower_radius: cfg.tower_radius.max(1),
            tower_height: cfg.tower_height.max(1),
            reference_radius: cfg.reference_radius.max(0),
        }
    }
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self::from_config(&Terrain::default())
    }
}

// --- [logging] ---

#[derive(Clone, Debug, Deserialize)]
pub struct Logging {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Mirror log output to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}
