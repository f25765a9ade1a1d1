// Log multiplexer
// Splits child stdout/stderr into lines and fans them into ordered sinks

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::application::constants::LOG_CHANNEL_CAPACITY;
use crate::domain::{LogRecord, StreamTag};
use crate::port::{LogSink, OutputStream, TimeProvider};

/// The three sinks fed by one instance's capture
#[derive(Clone)]
pub struct LogSinks {
    pub out: Arc<dyn LogSink>,
    pub err: Arc<dyn LogSink>,
    pub combined: Arc<dyn LogSink>,
}

/// Ordered two-stream log capture.
///
/// Two reader tasks split the byte streams into lines and feed a single
/// writer task over one channel. The writer stamps arrival time, builds
/// the [`LogRecord`], and appends to the stream-specific sink and the
/// combined sink. Having exactly one writer gives the combined sink true
/// arrival order and monotonic timestamps for free.
pub struct LogMultiplexer;

impl LogMultiplexer {
    /// Attach to an instance's piped output.
    ///
    /// The returned handle resolves once both streams hit EOF and every
    /// captured line has been flushed.
    pub fn attach(
        stdout: OutputStream,
        stderr: OutputStream,
        sinks: LogSinks,
        time: Arc<dyn TimeProvider>,
    ) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel::<(StreamTag, String)>(LOG_CHANNEL_CAPACITY);
        tokio::spawn(read_lines(stdout, StreamTag::Stdout, tx.clone()));
        tokio::spawn(read_lines(stderr, StreamTag::Stderr, tx));
        tokio::spawn(write_records(rx, sinks, time))
    }
}

async fn read_lines(stream: OutputStream, tag: StreamTag, tx: mpsc::Sender<(StreamTag, String)>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send((tag, line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(stream = %tag, error = %e, "log stream read failed");
                break;
            }
        }
    }
}

async fn write_records(
    mut rx: mpsc::Receiver<(StreamTag, String)>,
    sinks: LogSinks,
    time: Arc<dyn TimeProvider>,
) {
    while let Some((tag, line)) = rx.recv().await {
        let record = LogRecord::new(time.now_millis(), tag, line);
        let stream_sink = match record.stream {
            StreamTag::Stdout => &sinks.out,
            StreamTag::Stderr => &sinks.err,
        };
        if let Err(e) = stream_sink.append(&record.format_stream()).await {
            warn!(stream = %record.stream, error = %e, "stream sink append failed");
        }
        if let Err(e) = sinks.combined.append(&record.format_combined()).await {
            warn!(error = %e, "combined sink append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::log_sink::mocks::MemorySink;
    use crate::port::SystemTimeProvider;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    struct Capture {
        out: Arc<MemorySink>,
        err: Arc<MemorySink>,
        combined: Arc<MemorySink>,
        task: JoinHandle<()>,
        stdout: tokio::io::DuplexStream,
        stderr: tokio::io::DuplexStream,
    }

    fn capture() -> Capture {
        let out = Arc::new(MemorySink::new());
        let err = Arc::new(MemorySink::new());
        let combined = Arc::new(MemorySink::new());
        let sinks = LogSinks {
            out: out.clone(),
            err: err.clone(),
            combined: combined.clone(),
        };
        let (stdout_r, stdout_w) = tokio::io::duplex(4096);
        let (stderr_r, stderr_w) = tokio::io::duplex(4096);
        let task = LogMultiplexer::attach(
            Box::new(stdout_r),
            Box::new(stderr_r),
            sinks,
            Arc::new(SystemTimeProvider),
        );
        Capture {
            out,
            err,
            combined,
            task,
            stdout: stdout_w,
            stderr: stderr_w,
        }
    }

    fn bodies(lines: Vec<String>) -> Vec<String> {
        // Strip the timestamp prefix; keep "[tag] line" or "line".
        lines
            .into_iter()
            .map(|l| l.splitn(2, ' ').nth(1).unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn interleaved_streams_keep_arrival_order() {
        let mut cap = capture();
        // A (stdout), C (stderr), B (stdout), D (stderr), spaced so
        // arrival order is unambiguous.
        cap.stdout.write_all(b"A\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cap.stderr.write_all(b"C\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cap.stdout.write_all(b"B\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cap.stderr.write_all(b"D\n").await.unwrap();

        drop(cap.stdout);
        drop(cap.stderr);
        cap.task.await.unwrap();

        assert_eq!(bodies(cap.out.lines()), vec!["A", "B"]);
        assert_eq!(bodies(cap.err.lines()), vec!["C", "D"]);
        assert_eq!(
            bodies(cap.combined.lines()),
            vec!["[stdout] A", "[stderr] C", "[stdout] B", "[stderr] D"]
        );
    }

    #[tokio::test]
    async fn combined_timestamps_are_monotonic() {
        let mut cap = capture();
        for i in 0..5 {
            cap.stdout
                .write_all(format!("line-{}\n", i).as_bytes())
                .await
                .unwrap();
        }
        drop(cap.stdout);
        drop(cap.stderr);
        cap.task.await.unwrap();

        let stamps: Vec<String> = cap
            .combined
            .lines()
            .into_iter()
            .map(|l| l.split(' ').next().unwrap().to_string())
            .collect();
        assert_eq!(stamps.len(), 5);
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }

    #[tokio::test]
    async fn partial_last_line_without_newline_is_captured() {
        let mut cap = capture();
        cap.stdout.write_all(b"done").await.unwrap();
        drop(cap.stdout);
        drop(cap.stderr);
        cap.task.await.unwrap();
        assert_eq!(bodies(cap.out.lines()), vec!["done"]);
    }
}
