use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use farfield_chunk::Tile;

use crate::error::GenError;
use crate::worker::{CancelToken, Progress};

pub type RequestId = u64;

/// Callback receiving every delivered tile, in no particular order.
pub type ResultSink = Arc<dyn Fn(Tile) + Send + Sync>;

/// Which backend produces the tiles of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GenerationMode {
    /// The stage runner drives the chain over assembled windows.
    #[default]
    Standalone,
    /// The simulation engine generates tiles under temporary tickets.
    EngineDelegated,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GenerationMode::Standalone => "standalone",
            GenerationMode::EngineDelegated => "delegated",
        })
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standalone" | "runner" => Ok(GenerationMode::Standalone),
            "delegated" | "engine" | "engine-delegated" => Ok(GenerationMode::EngineDelegated),
            other => Err(format!("unknown generation mode '{other}'")),
        }
    }
}

/// Counters reported by a finished request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestSummary {
    pub delivered: usize,
    /// Successful stage invocations.
    pub stage_runs: usize,
    /// Tiles passed over because they were already at or past a stage.
    pub skipped: usize,
    pub faults: usize,
    pub passes: usize,
}

impl RequestSummary {
    pub fn absorb(&mut self, other: &RequestSummary) {
        self.delivered += other.delivered;
        self.stage_runs += other.stage_runs;
        self.skipped += other.skipped;
        self.faults += other.faults;
        self.passes += other.passes;
    }
}

struct HandleInner {
    id: RequestId,
    started: Instant,
    result: Mutex<Option<Result<RequestSummary, GenError>>>,
    done: Condvar,
    cancel: CancelToken,
    progress: Arc<Progress>,
}

/// Caller's view of one submitted request. The first completion wins;
/// cancelling resolves the handle immediately even if the worker is
/// still unwinding.
#[derive(Clone)]
pub struct CompletionHandle {
    inner: Arc<HandleInner>,
}

impl CompletionHandle {
    pub(crate) fn new(id: RequestId) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                started: Instant::now(),
                result: Mutex::new(None),
                done: Condvar::new(),
                cancel: CancelToken::new(),
                progress: Arc::new(Progress::new()),
            }),
        }
    }

    pub(crate) fn failed(id: RequestId, err: GenError) -> Self {
        let h = Self::new(id);
        h.complete(Err(err));
        h
    }

    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    pub fn age(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn cancel(&self) -> bool {
        self.cancel_with(GenError::Interrupted)
    }

    /// Signals the worker and resolves the handle with `err`. Returns false
    /// if the request had already finished.
    pub fn cancel_with(&self, err: GenError) -> bool {
        self.inner.cancel.cancel();
        self.complete(Err(err))
    }

    pub fn is_done(&self) -> bool {
        self.lock().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Blocks until the request resolves.
    pub fn join(&self) -> Result<RequestSummary, GenError> {
        let mut slot = self.lock();
        loop {
            if let Some(r) = slot.as_ref() {
                return r.clone();
            }
            slot = self
                .inner
                .done
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn join_timeout(&self, timeout: Duration) -> Option<Result<RequestSummary, GenError>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if let Some(r) = slot.as_ref() {
                return Some(r.clone());
            }
            let left = deadline.checked_duration_since(Instant::now())?;
            slot = self
                .inner
                .done
                .wait_timeout(slot, left)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    pub(crate) fn complete(&self, r: Result<RequestSummary, GenError>) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(r);
        drop(slot);
        self.inner.done.notify_all();
        true
    }

    pub(crate) fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    pub(crate) fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.inner.progress)
    }

    /// The failure this request resolved with, if any.
    pub(crate) fn error(&self) -> Option<GenError> {
        match self.lock().as_ref() {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Result<RequestSummary, GenError>>> {
        self.inner
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("id", &self.inner.id)
            .field("done", &self.is_done())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_completion_wins() {
        let h = CompletionHandle::new(1);
        assert!(!h.is_done());
        assert!(h.complete(Ok(RequestSummary::default())));
        assert!(!h.cancel());
        assert!(h.join().is_ok());
        assert!(h.error().is_none());
    }

    #[test]
    fn cancel_resolves_waiters() {
        let h = CompletionHandle::new(2);
        let waiter = {
            let h = h.clone();
            thread::spawn(move || h.join())
        };
        thread::sleep(Duration::from_millis(10));
        assert!(h.cancel());
        assert!(h.is_cancelled());
        let r = waiter.join().unwrap();
        assert!(matches!(r, Err(GenError::Interrupted)));
        assert!(!h.complete(Ok(RequestSummary::default())));
    }

    #[test]
    fn join_timeout_expires() {
        let h = CompletionHandle::new(3);
        assert!(h.join_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn mode_parses() {
        assert_eq!("delegated".parse::<GenerationMode>(), Ok(GenerationMode::EngineDelegated));
        assert_eq!("Standalone".parse::<GenerationMode>(), Ok(GenerationMode::Standalone));
        assert!("sideways".parse::<GenerationMode>().is_err());
        assert_eq!(GenerationMode::EngineDelegated.to_string(), "delegated");
    }
}
