// Log sink port
// One serialized, immediately-flushed append target

use async_trait::async_trait;

/// Append-only line sink.
///
/// Each call appends exactly one line and flushes before returning, so a
/// record is durable before the next one is written. Implementations
/// serialize concurrent appenders internally (single-writer discipline).
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, line: &str) -> std::io::Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// In-memory sink collecting appended lines
    #[derive(Default)]
    pub struct MemorySink {
        lines: Mutex<Vec<String>>,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogSink for MemorySink {
        async fn append(&self, line: &str) -> std::io::Result<()> {
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }
}
