// End-to-end lifecycle against real /bin/sh children

use std::sync::Arc;
use std::time::Duration;

use cronvisor_core::application::{LogSinks, RegistryConfig, RestartBackoff, SupervisorRegistry};
use cronvisor_core::domain::{ExitReason, ExitStatus, JobConfig, StatePhase};
use cronvisor_core::error::AppError;
use cronvisor_core::port::memory_probe::mocks::MockMemoryProbe;
use cronvisor_core::port::{MemoryProbe, SystemTimeProvider};
use cronvisor_infra_system::{FileSink, SysinfoMemoryProbe, TokioProcessLauncher};

fn sh_job(name: &str, script: &str) -> JobConfig {
    JobConfig {
        name: Some(name.to_string()),
        script: Some("-c".to_string()),
        interpreter: Some("/bin/sh".to_string()),
        args: vec![script.to_string()],
        kill_timeout_ms: 2000,
        ..JobConfig::default()
    }
}

async fn file_sinks(dir: &tempfile::TempDir, name: &str) -> LogSinks {
    LogSinks {
        out: Arc::new(
            FileSink::open(&dir.path().join(format!("{}-out.log", name)))
                .await
                .unwrap(),
        ),
        err: Arc::new(
            FileSink::open(&dir.path().join(format!("{}-error.log", name)))
                .await
                .unwrap(),
        ),
        combined: Arc::new(
            FileSink::open(&dir.path().join(format!("{}.log", name)))
                .await
                .unwrap(),
        ),
    }
}

fn registry_with_probe(probe: Arc<dyn MemoryProbe>) -> SupervisorRegistry {
    SupervisorRegistry::new(
        Arc::new(TokioProcessLauncher::new()),
        probe,
        Arc::new(SystemTimeProvider),
        RegistryConfig {
            watchdog_interval: Duration::from_millis(20),
            backoff: RestartBackoff {
                base: Duration::from_millis(20),
                factor: 2.0,
                max: Duration::from_millis(100),
            },
        },
    )
}

fn registry() -> SupervisorRegistry {
    registry_with_probe(Arc::new(SysinfoMemoryProbe::new()))
}

#[tokio::test]
async fn completed_job_reports_code_zero() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let sinks = file_sinks(&dir, "ok").await;
    registry.register(sh_job("ok", "exit 0"), sinks).unwrap();

    let ack = registry.start("ok").await.unwrap();
    let summary = ack.done.await.unwrap();
    assert_eq!(summary.reason, ExitReason::Completed);
    assert_eq!(summary.status, ExitStatus::Code(0));

    let snapshot = registry.status("ok").unwrap();
    assert_eq!(snapshot.state.phase(), StatePhase::Exited);
}

#[tokio::test]
async fn crashed_job_mirrors_its_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let sinks = file_sinks(&dir, "bad").await;
    registry.register(sh_job("bad", "exit 7"), sinks).unwrap();

    let summary = registry.start("bad").await.unwrap().done.await.unwrap();
    assert_eq!(summary.reason, ExitReason::Crashed);
    assert_eq!(summary.status, ExitStatus::Code(7));
}

#[tokio::test]
async fn stop_terminates_a_sleeping_job() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let sinks = file_sinks(&dir, "sleeper").await;
    registry
        .register(sh_job("sleeper", "sleep 30"), sinks)
        .unwrap();

    let ack = registry.start("sleeper").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    registry.stop("sleeper").await.unwrap();

    let summary = ack.done.await.unwrap();
    assert_eq!(summary.reason, ExitReason::StoppedByOperator);
    assert_eq!(summary.status, ExitStatus::Signal(15));
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let sinks = file_sinks(&dir, "solo").await;
    registry.register(sh_job("solo", "sleep 30"), sinks).unwrap();

    let ack = registry.start("solo").await.unwrap();
    let err = registry.start("solo").await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyRunning(_)));

    registry.stop("solo").await.unwrap();
    ack.done.await.unwrap();
}

#[tokio::test]
async fn memory_limit_kills_without_relaunch() {
    let dir = tempfile::tempdir().unwrap();
    // Scripted probe: a real sleep process "uses" 600M against a 500M cap.
    let registry = registry_with_probe(Arc::new(MockMemoryProbe::fixed(600 << 20)));
    let sinks = file_sinks(&dir, "hog").await;

    let mut job = sh_job("hog", "sleep 30");
    job.max_memory = Some("500M".to_string());
    registry.register(job, sinks).unwrap();

    let ack = registry.start("hog").await.unwrap();
    let summary = ack.done.await.unwrap();
    assert_eq!(summary.reason, ExitReason::MemoryExceeded);
    assert_eq!(summary.status, ExitStatus::Signal(15));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = registry.status("hog").unwrap();
    assert_eq!(snapshot.state.phase(), StatePhase::Exited);
    assert!(snapshot.peak_rss.unwrap() >= 600 << 20);
}

#[tokio::test]
async fn autorestart_respawns_a_crashing_job() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let sinks = file_sinks(&dir, "flaky").await;

    // Crashes until the marker file appears, then succeeds.
    let marker = dir.path().join("marker");
    let script = format!(
        "if [ -e {} ]; then exit 0; else touch {}; exit 1; fi",
        marker.display(),
        marker.display()
    );
    let mut job = sh_job("flaky", &script);
    job.autorestart = true;
    job.max_restarts = Some(3);
    registry.register(job, sinks).unwrap();

    let summary = registry.start("flaky").await.unwrap().done.await.unwrap();
    assert_eq!(summary.reason, ExitReason::Completed);

    let snapshot = registry.status("flaky").unwrap();
    assert_eq!(snapshot.restarts, 1);
}

#[tokio::test]
async fn shutdown_stops_live_instances_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let sinks = file_sinks(&dir, "svc").await;
    registry.register(sh_job("svc", "sleep 30"), sinks).unwrap();

    let ack = registry.start("svc").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    registry.shutdown(Duration::from_secs(5)).await;
    let summary = ack.done.await.unwrap();
    assert_eq!(summary.reason, ExitReason::StoppedByOperator);
}
