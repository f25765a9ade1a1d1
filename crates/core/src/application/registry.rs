// Supervisor registry
// Owns the job-name-to-state mapping; no process-wide singleton

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::backoff::RestartBackoff;
use crate::application::constants::DEFAULT_WATCHDOG_INTERVAL;
use crate::application::multiplexer::LogSinks;
use crate::application::shutdown::{shutdown_channel, ShutdownSender};
use crate::application::supervisor::{Command, JobSupervisor, StartAck, SupervisorParams};
use crate::domain::{ConfigError, JobConfig, JobSnapshot, JobSpec};
use crate::error::{AppError, Result};
use crate::port::{MemoryProbe, ProcessLauncher, TimeProvider};

/// Registry-wide supervision settings
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    pub watchdog_interval: Duration,
    pub backoff: RestartBackoff,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            backoff: RestartBackoff::default(),
        }
    }
}

/// Live entry for one registered job
struct JobHandle {
    spec: Arc<JobSpec>,
    cmd_tx: mpsc::Sender<Command>,
    snapshot_rx: tokio::sync::watch::Receiver<JobSnapshot>,
    join: Option<JoinHandle<()>>,
}

/// Owner of every job's spec and live state.
///
/// Mutation takes the write lock; status and list queries run
/// concurrently under the read lock and read watch channels only.
pub struct SupervisorRegistry {
    jobs: RwLock<HashMap<String, JobHandle>>,
    launcher: Arc<dyn ProcessLauncher>,
    probe: Arc<dyn MemoryProbe>,
    time: Arc<dyn TimeProvider>,
    config: RegistryConfig,
    shutdown: ShutdownSender,
}

impl SupervisorRegistry {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        probe: Arc<dyn MemoryProbe>,
        time: Arc<dyn TimeProvider>,
        config: RegistryConfig,
    ) -> Self {
        let (shutdown, _) = shutdown_channel();
        Self {
            jobs: RwLock::new(HashMap::new()),
            launcher,
            probe,
            time,
            config,
            shutdown,
        }
    }

    /// Validate and register one job, spawning its supervisor task.
    ///
    /// A `ConfigError` is fatal only for this registration; previously
    /// registered jobs keep running.
    pub fn register(&self, config: JobConfig, sinks: LogSinks) -> Result<Arc<JobSpec>> {
        self.register_spec(config.validate()?, sinks)
    }

    /// Register an already-validated spec (the daemon validates first so
    /// it can open the sink files at the spec's paths).
    pub fn register_spec(&self, spec: JobSpec, sinks: LogSinks) -> Result<Arc<JobSpec>> {
        let spec = Arc::new(spec);

        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&spec.name) {
            return Err(AppError::Config(ConfigError::InvalidValue {
                field: "name",
                reason: format!("duplicate job name {:?}", spec.name),
            }));
        }

        let (cmd_tx, snapshot_rx, join) = JobSupervisor::spawn(
            SupervisorParams {
                spec: Arc::clone(&spec),
                launcher: Arc::clone(&self.launcher),
                probe: Arc::clone(&self.probe),
                sinks,
                time: Arc::clone(&self.time),
                watchdog_interval: self.config.watchdog_interval,
                backoff: self.config.backoff,
            },
            self.shutdown.subscribe(),
        );

        info!(
            job = %spec.name,
            repeating = spec.is_repeating(),
            "job registered"
        );
        jobs.insert(
            spec.name.clone(),
            JobHandle {
                spec: Arc::clone(&spec),
                cmd_tx,
                snapshot_rx,
                join: Some(join),
            },
        );
        Ok(spec)
    }

    /// Explicit start (one-shot trigger or ahead-of-schedule launch).
    pub async fn start(&self, name: &str) -> Result<StartAck> {
        let cmd_tx = self.command_sender(name)?;
        let (reply, rx) = oneshot::channel();
        cmd_tx
            .send(Command::Start { reply })
            .await
            .map_err(|_| AppError::Stopped(name.to_string()))?;
        rx.await.map_err(|_| AppError::Stopped(name.to_string()))?
    }

    /// Stop the job's live instance (graceful, then forced).
    pub async fn stop(&self, name: &str) -> Result<()> {
        let cmd_tx = self.command_sender(name)?;
        let (reply, rx) = oneshot::channel();
        cmd_tx
            .send(Command::Stop { reply })
            .await
            .map_err(|_| AppError::Stopped(name.to_string()))?;
        rx.await.map_err(|_| AppError::Stopped(name.to_string()))?
    }

    /// Stop if running, then start.
    pub async fn restart(&self, name: &str) -> Result<StartAck> {
        match self.stop(name).await {
            Ok(()) | Err(AppError::InvalidState(_)) => {}
            Err(e) => return Err(e),
        }
        self.start(name).await
    }

    pub fn status(&self, name: &str) -> Result<JobSnapshot> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(name)
            .map(|h| h.snapshot_rx.borrow().clone())
            .ok_or_else(|| AppError::NotFound(name.to_string()))
    }

    /// Snapshots of every registered job, sorted by name.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().unwrap();
        let mut all: Vec<JobSnapshot> = jobs
            .values()
            .map(|h| h.snapshot_rx.borrow().clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn spec(&self, name: &str) -> Result<Arc<JobSpec>> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(name)
            .map(|h| Arc::clone(&h.spec))
            .ok_or_else(|| AppError::NotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().unwrap().is_empty()
    }

    /// Signal every supervisor task and wait for them to finish.
    ///
    /// Timer loops halt without consuming pending fires; live instances
    /// get graceful termination bounded by their grace period.
    pub async fn shutdown(&self, join_timeout: Duration) {
        self.shutdown.shutdown();
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut jobs = self.jobs.write().unwrap();
            jobs.iter_mut()
                .filter_map(|(name, h)| h.join.take().map(|j| (name.clone(), j)))
                .collect()
        };
        for (name, join) in handles {
            if tokio::time::timeout(join_timeout, join).await.is_err() {
                warn!(job = %name, "supervisor did not stop within timeout");
            }
        }
        info!("registry shut down");
    }

    fn command_sender(&self, name: &str) -> Result<mpsc::Sender<Command>> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(name)
            .map(|h| h.cmd_tx.clone())
            .ok_or_else(|| AppError::NotFound(name.to_string()))
    }
}
