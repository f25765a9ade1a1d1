// File log sink
// Append-mode file with serialized, immediately-flushed writes

use std::path::Path;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use cronvisor_core::port::LogSink;

/// Append-only file sink.
///
/// The mutex gives single-writer discipline per sink; each append writes
/// one line and flushes before releasing, so a record is durable before
/// the next one lands and interleaved writers can never tear a line.
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    /// Open (creating parent directories and the file as needed).
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl LogSink for FileSink {
    async fn append(&self, line: &str) -> std::io::Result<()> {
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }
}
