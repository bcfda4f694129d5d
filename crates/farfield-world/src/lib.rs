//! Tile addressing, generation stages, level identity and generator config.
#![forbid(unsafe_code)]

pub mod config;
mod gen_ctx;
mod level;
mod log_once;
mod stage;
mod tile_pos;

pub use config::{
    GenerationConfig, GeneratorParams, ParallelReads, TerrainParams, load_config_from_path,
};
pub use gen_ctx::{GenCtx, StructureStart};
pub use level::{Level, LevelId};
pub use log_once::LogOnce;
pub use stage::{MIN_DELIVERY_STAGE, Stage, StageChain, StageDef};
pub use tile_pos::TilePos;

/// Horizontal size of a tile in blocks.
pub const TILE_WIDTH: usize = 16;
/// Height of one vertical slice (section) of a tile in blocks.
pub const SECTION_HEIGHT: usize = 16;
/// Highest light level a cell can hold.
pub const MAX_LIGHT: u8 = 15;
