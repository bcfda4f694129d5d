//! Persisted tile records: storage backends, the record parser and encoder,
//! and the resolver that loads or synthesizes tiles for a window.
#![forbid(unsafe_code)]

mod error;
pub mod palette;
mod parser;
mod record;
mod resolver;
mod storage;

pub use error::DecodeError;
pub use parser::{ParseOptions, parse_tile};
pub use record::{SectionRecord, TileRecord, encode_tile};
pub use resolver::TileSourceResolver;
pub use storage::{DirStorage, MemoryStorage, TileStorage};

/// Log target for persistence reads and decode faults.
pub const LOG_TARGET: &str = "worldgen::chunk_load";
