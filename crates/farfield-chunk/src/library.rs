use farfield_world::{GenCtx, Level, Stage};
use thiserror::Error;

use crate::tile::Tile;
use crate::window::Window;

/// A stage invocation that failed inside the generation library.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LibraryFault {
    /// Race on one of the library's internal caches.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("{0}")]
    Other(String),
    #[error("stage panicked: {0}")]
    Panicked(String),
}

/// Per-stage terrain routines. The window is read-only context; `tile` is the
/// only thing a call may mutate and has been taken out of the window.
pub trait GenerationLibrary: Send + Sync {
    fn make_context(&self, level: &Level) -> GenCtx {
        level.make_gen_ctx()
    }

    fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut GenCtx,
        window: &Window,
        tile: &mut Tile,
    ) -> Result<(), LibraryFault>;

    /// True if stages work on even-sided windows, allowing a single pass per request.
    fn accepts_even_windows(&self) -> bool {
        false
    }
}
