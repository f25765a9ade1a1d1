// Memory watchdog
// Samples resident memory of one live instance and signals over-limit

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::MemoryLimit;
use crate::port::MemoryProbe;

/// Events emitted by an attached watchdog task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// Periodic under-limit observation
    Sample { pid: u32, rss: u64 },
    /// First sample above the limit; the watchdog detaches after this.
    /// Termination policy stays with the supervisor - the watchdog
    /// never kills anything itself.
    MemoryExceeded { pid: u32, rss: u64, limit: MemoryLimit },
}

/// Periodic RSS sampler for one instance
pub struct MemoryWatchdog {
    probe: Arc<dyn MemoryProbe>,
    interval: Duration,
}

impl MemoryWatchdog {
    pub fn new(probe: Arc<dyn MemoryProbe>, interval: Duration) -> Self {
        Self { probe, interval }
    }

    /// Begin sampling `pid` against `limit`.
    ///
    /// The task detaches on its own when the probe stops observing the
    /// pid or after the first over-limit event; the supervisor also
    /// aborts it once the instance is reaped, so a stray sample can
    /// never land on a reaped process.
    pub fn attach(
        &self,
        pid: u32,
        limit: MemoryLimit,
        events: mpsc::Sender<WatchdogEvent>,
    ) -> JoinHandle<()> {
        let probe = Arc::clone(&self.probe);
        let interval = self.interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match probe.rss_bytes(pid).await {
                    None => {
                        debug!(pid, "watchdog detaching: process gone");
                        break;
                    }
                    Some(rss) if rss > limit.bytes() => {
                        warn!(pid, rss, limit = limit.bytes(), "memory limit exceeded");
                        let _ = events.send(WatchdogEvent::MemoryExceeded { pid, rss, limit }).await;
                        break;
                    }
                    Some(rss) => {
                        // Best effort; a full queue just drops the sample.
                        let _ = events.try_send(WatchdogEvent::Sample { pid, rss });
                    }
                }
            }
        })
    }
}
