use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};

use crate::LOG_TARGET;
use crate::queue::GenerationQueue;

/// Background thread running queue maintenance on a fixed interval. Holds
/// the queue weakly and exits once it is gone or the watchdog is dropped.
pub struct Watchdog {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn spawn(queue: &Arc<GenerationQueue>) -> std::io::Result<Self> {
        let interval = queue.session().config().params().watchdog_interval;
        Self::with_interval(queue, interval)
    }

    pub fn with_interval(queue: &Arc<GenerationQueue>, interval: Duration) -> std::io::Result<Self> {
        let weak: Weak<GenerationQueue> = Arc::downgrade(queue);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);
        let handle = thread::Builder::new()
            .name("farfield-watchdog".into())
            .spawn(move || {
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let Some(queue) = weak.upgrade() else { break };
                            if queue.is_closed() {
                                break;
                            }
                            queue.update_all_futures();
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
                log::debug!(target: LOG_TARGET, "watchdog stopped");
            })?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(h) = self.handle.take() {
            if h.thread().id() != thread::current().id() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
