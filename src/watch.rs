use std::error::Error;
use std::path::Path;
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use farfield_runtime::GenerationQueue;
use farfield_world::load_config_from_path;
use log::info;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Editors write a file in several steps; events closer than this collapse
/// into one reload.
const SETTLE: Duration = Duration::from_millis(200);

/// Watches one config file. Dropping it stops the watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    events: Receiver<()>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> notify::Result<Self> {
        let (tx, events) = unbounded();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    match event.kind {
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any => {
                            let _ = tx.send(());
                        }
                        _ => {}
                    }
                }
            })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Blocks until the file changed and the burst of events settled.
    /// Returns false once the watcher is gone.
    pub fn wait_for_change(&self) -> bool {
        if self.events.recv().is_err() {
            return false;
        }
        while self.events.recv_timeout(SETTLE).is_ok() {}
        true
    }
}

/// Re-reads the config and swaps in its terrain and generator settings.
/// Thread contexts built from the old terrain are rebuilt on next use.
pub fn reload(path: &Path, queue: &GenerationQueue) -> Result<(), Box<dyn Error>> {
    let cfg = load_config_from_path(path)?;
    queue.level().update_terrain_params(cfg.terrain_params());
    queue.session().config().update(cfg.generator_params());
    info!(
        "reloaded {} (terrain rev {})",
        path.display(),
        queue.level().params_rev()
    );
    Ok(())
}
