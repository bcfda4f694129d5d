//! Tile buffers, the bordered window grid, and the generation library seam.
#![forbid(unsafe_code)]

mod block;
pub mod generator;
mod library;
mod light;
mod section;
mod tile;
mod window;

pub use block::{Biome, Block};
pub use generator::NoiseGenerator;
pub use library::{GenerationLibrary, LibraryFault};
pub use light::LightStorage;
pub use section::{BIOMES_PER_SECTION, SECTION_VOLUME, Section};
pub use tile::{HeightmapKind, Tile, TileOrigin};
pub use window::{Cutout, Window};
