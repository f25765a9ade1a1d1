// Memory probe port
// Resident-memory sampling for the watchdog

use async_trait::async_trait;

/// Per-process resident memory probe.
///
/// Implementations:
/// - SysinfoMemoryProbe (infra-system): reads RSS via sysinfo
/// - MockMemoryProbe (tests): scripted sample sequences
#[async_trait]
pub trait MemoryProbe: Send + Sync {
    /// Resident set size in bytes, or `None` once the process is gone.
    async fn rss_bytes(&self, pid: u32) -> Option<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Mock probe returning a scripted sequence of samples.
    ///
    /// Once the sequence is exhausted the last entry repeats, so a probe
    /// built with `fixed` keeps reporting the same RSS forever.
    pub struct MockMemoryProbe {
        samples: Mutex<VecDeque<Option<u64>>>,
        last: Mutex<Option<u64>>,
    }

    impl MockMemoryProbe {
        pub fn fixed(rss: u64) -> Self {
            Self::sequence(vec![Some(rss)])
        }

        pub fn sequence(samples: Vec<Option<u64>>) -> Self {
            Self {
                samples: Mutex::new(samples.into()),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl MemoryProbe for MockMemoryProbe {
        async fn rss_bytes(&self, _pid: u32) -> Option<u64> {
            let mut samples = self.samples.lock().unwrap();
            match samples.pop_front() {
                Some(sample) => {
                    if samples.is_empty() {
                        samples.push_back(sample);
                    }
                    *self.last.lock().unwrap() = sample;
                    sample
                }
                None => *self.last.lock().unwrap(),
            }
        }
    }
}
