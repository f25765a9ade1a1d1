// Log capture through real pipes into real files

use std::sync::Arc;
use std::time::Duration;

use cronvisor_core::application::{LogSinks, RegistryConfig, RestartBackoff, SupervisorRegistry};
use cronvisor_core::domain::JobConfig;
use cronvisor_core::port::memory_probe::mocks::MockMemoryProbe;
use cronvisor_core::port::SystemTimeProvider;
use cronvisor_infra_system::{FileSink, TokioProcessLauncher};

fn sh_job(name: &str, script: &str) -> JobConfig {
    JobConfig {
        name: Some(name.to_string()),
        script: Some("-c".to_string()),
        interpreter: Some("/bin/sh".to_string()),
        args: vec![script.to_string()],
        ..JobConfig::default()
    }
}

fn registry() -> SupervisorRegistry {
    SupervisorRegistry::new(
        Arc::new(TokioProcessLauncher::new()),
        Arc::new(MockMemoryProbe::fixed(0)),
        Arc::new(SystemTimeProvider),
        RegistryConfig {
            watchdog_interval: Duration::from_millis(50),
            backoff: RestartBackoff::default(),
        },
    )
}

/// Lines with the timestamp prefix stripped
fn bodies(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|l| l.splitn(2, ' ').nth(1).unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn streams_split_into_the_right_files_in_arrival_order() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("echoer-out.log");
    let err_path = dir.path().join("echoer-error.log");
    let combined_path = dir.path().join("echoer.log");
    let sinks = LogSinks {
        out: Arc::new(FileSink::open(&out_path).await.unwrap()),
        err: Arc::new(FileSink::open(&err_path).await.unwrap()),
        combined: Arc::new(FileSink::open(&combined_path).await.unwrap()),
    };

    let registry = registry();
    // A, C, B, D interleaved across streams, spaced to pin arrival order.
    let script = "echo A; sleep 0.2; echo C 1>&2; sleep 0.2; echo B; sleep 0.2; echo D 1>&2";
    registry.register(sh_job("echoer", script), sinks).unwrap();

    let summary = registry.start("echoer").await.unwrap().done.await.unwrap();
    assert_eq!(summary.status, cronvisor_core::domain::ExitStatus::Code(0));

    let out = tokio::fs::read_to_string(&out_path).await.unwrap();
    let err = tokio::fs::read_to_string(&err_path).await.unwrap();
    let combined = tokio::fs::read_to_string(&combined_path).await.unwrap();

    assert_eq!(bodies(&out), vec!["A", "B"]);
    assert_eq!(bodies(&err), vec!["C", "D"]);
    assert_eq!(
        bodies(&combined),
        vec!["[stdout] A", "[stderr] C", "[stdout] B", "[stderr] D"]
    );
}

#[tokio::test]
async fn logs_append_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let combined_path = dir.path().join("repeat.log");
    let sinks = LogSinks {
        out: Arc::new(FileSink::open(&dir.path().join("repeat-out.log")).await.unwrap()),
        err: Arc::new(FileSink::open(&dir.path().join("repeat-error.log")).await.unwrap()),
        combined: Arc::new(FileSink::open(&combined_path).await.unwrap()),
    };

    let registry = registry();
    registry
        .register(sh_job("repeat", "echo run"), sinks)
        .unwrap();

    registry.start("repeat").await.unwrap().done.await.unwrap();
    registry.start("repeat").await.unwrap().done.await.unwrap();

    let combined = tokio::fs::read_to_string(&combined_path).await.unwrap();
    assert_eq!(bodies(&combined), vec!["[stdout] run", "[stdout] run"]);
}

#[tokio::test]
async fn captured_lines_are_flushed_while_the_job_still_runs() {
    let dir = tempfile::tempdir().unwrap();
    let combined_path = dir.path().join("live.log");
    let sinks = LogSinks {
        out: Arc::new(FileSink::open(&dir.path().join("live-out.log")).await.unwrap()),
        err: Arc::new(FileSink::open(&dir.path().join("live-error.log")).await.unwrap()),
        combined: Arc::new(FileSink::open(&combined_path).await.unwrap()),
    };

    let registry = registry();
    registry
        .register(sh_job("live", "echo early; sleep 30"), sinks)
        .unwrap();
    let ack = registry.start("live").await.unwrap();

    // The line must be durable long before the process exits.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let combined = tokio::fs::read_to_string(&combined_path).await.unwrap();
    assert_eq!(bodies(&combined), vec!["[stdout] early"]);

    registry.stop("live").await.unwrap();
    ack.done.await.unwrap();
}
