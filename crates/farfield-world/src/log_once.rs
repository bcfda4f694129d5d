use std::sync::{Mutex, PoisonError};

use hashbrown::HashSet;

/// Session-scoped "log this only the first time" filter.
#[derive(Debug, Default)]
pub struct LogOnce {
    seen: Mutex<HashSet<String>>,
}

impl LogOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `key` is offered.
    pub fn first(&self, key: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.contains(key) {
            return false;
        }
        seen.insert(key.to_owned())
    }

    pub fn warn(&self, target: &str, msg: &str) -> bool {
        let fresh = self.first(msg);
        if fresh {
            log::warn!(target: target, "{msg}");
        }
        fresh
    }

    pub fn error(&self, target: &str, msg: &str) -> bool {
        let fresh = self.first(msg);
        if fresh {
            log::error!(target: target, "{msg}");
        }
        fresh
    }

    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_key_fires_once() {
        let once = LogOnce::new();
        assert!(once.first("a"));
        assert!(!once.first("a"));
        assert!(once.warn("worldgen", "b"));
        assert!(!once.warn("worldgen", "b"));
        assert_eq!(once.len(), 2);
        once.clear();
        assert!(once.first("a"));
    }
}
