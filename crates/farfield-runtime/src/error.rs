use std::any::Any;
use std::time::Duration;

use farfield_chunk::LibraryFault;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Clone, Debug, Error)]
pub enum GenError {
    #[error("request interrupted")]
    Interrupted,
    #[error("generation pool is shutting down")]
    Shutdown,
    #[error("terrain generation is disabled")]
    Disabled,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request made no progress for {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Library(#[from] LibraryFault),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("unexpected failure: {0}")]
    Unexpected(String),
    #[error("completion failed: {0}")]
    Completion(Box<GenError>),
}

impl GenError {
    /// Strips any number of `Completion` wrappers.
    pub fn root_cause(&self) -> &GenError {
        let mut e = self;
        while let GenError::Completion(inner) = e {
            e = inner;
        }
        e
    }

    /// Interrupts and shutdown signals. These are dropped silently.
    pub fn is_shutdown(&self) -> bool {
        match self.root_cause() {
            GenError::Interrupted | GenError::Shutdown => true,
            GenError::Engine(e) => e.is_shutdown(),
            _ => false,
        }
    }

    pub fn counts_toward_breaker(&self) -> bool {
        if self.is_shutdown() {
            return false;
        }
        !matches!(
            self.root_cause(),
            GenError::TimedOut(_) | GenError::Disabled | GenError::InvalidRequest(_)
        )
    }

    pub fn wrap(self) -> GenError {
        GenError::Completion(Box::new(self))
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_completions() {
        let e = GenError::Interrupted.wrap().wrap();
        assert!(matches!(e.root_cause(), GenError::Interrupted));
        assert!(e.is_shutdown());
        assert!(!e.counts_toward_breaker());
    }

    #[test]
    fn classification() {
        assert!(GenError::Unexpected("boom".into()).counts_toward_breaker());
        assert!(GenError::Library(LibraryFault::Other("x".into())).counts_toward_breaker());
        assert!(!GenError::TimedOut(Duration::from_secs(1)).counts_toward_breaker());
        assert!(GenError::Engine(EngineError::Shutdown).is_shutdown());
        assert!(!GenError::Engine(EngineError::Failed("bad".into())).is_shutdown());
    }

    #[test]
    fn panic_payloads_become_text() {
        let r = std::panic::catch_unwind(|| panic!("kaput {}", 7));
        assert_eq!(panic_message(r.unwrap_err().as_ref()), "kaput 7");
    }
}
