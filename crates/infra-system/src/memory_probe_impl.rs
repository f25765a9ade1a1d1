// Memory probe implementation
// Per-process RSS via sysinfo

use std::sync::Mutex;

use async_trait::async_trait;
use sysinfo::{Pid, System};
use tracing::trace;

use cronvisor_core::port::MemoryProbe;

/// RSS probe backed by sysinfo.
///
/// One `System` is shared behind a mutex; refreshes are scoped to the
/// probed pid, so sampling stays cheap even at short intervals.
pub struct SysinfoMemoryProbe {
    system: Mutex<System>,
}

impl SysinfoMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryProbe for SysinfoMemoryProbe {
    async fn rss_bytes(&self, pid: u32) -> Option<u64> {
        let mut system = self.system.lock().unwrap();
        let pid = Pid::from_u32(pid);
        if !system.refresh_process(pid) {
            return None;
        }
        let rss = system.process(pid).map(|p| p.memory());
        trace!(pid = pid.as_u32(), rss, "rss sampled");
        rss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn own_process_has_nonzero_rss() {
        let probe = SysinfoMemoryProbe::new();
        let rss = probe.rss_bytes(std::process::id()).await;
        assert!(rss.unwrap() > 0);
    }

    #[tokio::test]
    async fn unknown_pid_reads_none() {
        let probe = SysinfoMemoryProbe::new();
        // Linux pid_max style upper bound; certainly not a live process.
        assert_eq!(probe.rss_bytes(4_194_300).await, None);
    }
}
