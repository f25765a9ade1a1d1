// Supervisor state machine
// One owning task per job: cron timer, commands, instance lifecycle

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::backoff::RestartBackoff;
use crate::application::constants::{
    COMMAND_QUEUE_CAPACITY, LOG_DRAIN_TIMEOUT, WATCHDOG_EVENT_CAPACITY,
};
use crate::application::multiplexer::{LogMultiplexer, LogSinks};
use crate::application::shutdown::ShutdownToken;
use crate::application::watchdog::{MemoryWatchdog, WatchdogEvent};
use crate::domain::{
    ExitReason, ExitStatus, ExitSummary, JobSnapshot, JobSpec, ProcessInstance, ScheduleState,
    SupervisorState,
};
use crate::error::{AppError, Result};
use crate::port::{ProcessHandle, ProcessLauncher, MemoryProbe, Termination, TimeProvider};

/// Operator commands accepted by a job's supervisor task
pub enum Command {
    Start {
        reply: oneshot::Sender<Result<StartAck>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Acknowledgement for a successful start command
#[derive(Debug)]
pub struct StartAck {
    pub pid: u32,
    /// Resolves with the cycle's terminal summary (after any autorestart
    /// respawns); used by one-shot foreground invocations.
    pub done: oneshot::Receiver<ExitSummary>,
}

/// Everything a supervisor task needs, injected by the registry
pub struct SupervisorParams {
    pub spec: Arc<JobSpec>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub probe: Arc<dyn MemoryProbe>,
    pub sinks: LogSinks,
    pub time: Arc<dyn TimeProvider>,
    pub watchdog_interval: Duration,
    pub backoff: RestartBackoff,
}

/// Exclusive claim on the authoritative "instance closed" transition.
///
/// Natural exit, watchdog termination, and operator stop race for this;
/// exactly one wins, so an instance gets exactly one terminal reason.
struct ExitClaim(std::sync::Mutex<Option<ExitReason>>);

impl ExitClaim {
    fn new() -> Self {
        Self(std::sync::Mutex::new(None))
    }

    /// True when this caller won the claim.
    fn claim(&self, reason: ExitReason) -> bool {
        let mut slot = self.0.lock().unwrap();
        if slot.is_none() {
            *slot = Some(reason);
            true
        } else {
            false
        }
    }

    fn reason(&self) -> Option<ExitReason> {
        *self.0.lock().unwrap()
    }
}

enum Wake {
    Shutdown,
    Command(Option<Command>),
    Fire,
}

enum InstanceWake {
    Exited(ExitStatus),
    Watchdog(WatchdogEvent),
    WatchdogClosed,
    Command(Option<Command>),
    Shutdown,
}

enum CycleEnd {
    /// Return to the schedule (or stay Exited for one-shot jobs)
    Waiting,
    /// Shutdown observed while the instance was live or backing off
    Shutdown,
}

/// Per-job supervisor task.
///
/// Owns the job's state exclusively; the rest of the system talks to it
/// through the command channel and reads it through the snapshot watch.
pub struct JobSupervisor {
    spec: Arc<JobSpec>,
    launcher: Arc<dyn ProcessLauncher>,
    probe: Arc<dyn MemoryProbe>,
    sinks: LogSinks,
    time: Arc<dyn TimeProvider>,
    watchdog_interval: Duration,
    backoff: RestartBackoff,

    state: SupervisorState,
    schedule: Option<ScheduleState>,
    restarts: u32,
    peak_rss: Option<u64>,
    last_exit: Option<ExitSummary>,
    last_error: Option<String>,

    snapshot_tx: watch::Sender<JobSnapshot>,
    cmd_rx: mpsc::Receiver<Command>,
    shutdown: ShutdownToken,
}

impl JobSupervisor {
    /// Spawn the owning task for one job.
    pub fn spawn(
        params: SupervisorParams,
        shutdown: ShutdownToken,
    ) -> (
        mpsc::Sender<Command>,
        watch::Receiver<JobSnapshot>,
        JoinHandle<()>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(JobSnapshot::new(&params.spec.name));

        let schedule = params
            .spec
            .cron
            .as_ref()
            .map(|cron| ScheduleState::new(cron, params.time.now_utc()));

        let supervisor = Self {
            spec: params.spec,
            launcher: params.launcher,
            probe: params.probe,
            sinks: params.sinks,
            time: params.time,
            watchdog_interval: params.watchdog_interval,
            backoff: params.backoff,
            state: SupervisorState::Idle,
            schedule,
            restarts: 0,
            peak_rss: None,
            last_exit: None,
            last_error: None,
            snapshot_tx,
            cmd_rx,
            shutdown,
        };

        let join = tokio::spawn(supervisor.run());
        (cmd_tx, snapshot_rx, join)
    }

    async fn run(mut self) {
        info!(
            job = %self.spec.name,
            cron = self.spec.cron.as_ref().map(|c| c.expr().to_string()),
            "supervisor started"
        );
        self.enter_waiting();

        loop {
            // Biased: a shutdown observed alongside a due fire must win,
            // so no in-flight fire event gets consumed during teardown.
            let wake = tokio::select! {
                biased;
                _ = self.shutdown.wait() => Wake::Shutdown,
                cmd = self.cmd_rx.recv() => Wake::Command(cmd),
                _ = Self::sleep_until_fire(&self.schedule, self.time.as_ref()) => Wake::Fire,
            };

            match wake {
                Wake::Shutdown | Wake::Command(None) => break,
                Wake::Command(Some(Command::Stop { reply })) => {
                    let _ = reply.send(Err(AppError::InvalidState(format!(
                        "job {} is not running",
                        self.spec.name
                    ))));
                }
                Wake::Command(Some(Command::Start { reply })) => {
                    if let CycleEnd::Shutdown = self.run_cycle(Some(reply)).await {
                        break;
                    }
                    self.enter_waiting();
                }
                Wake::Fire => {
                    let now = self.time.now_utc();
                    let fired = match (self.schedule.as_mut(), self.spec.cron.as_ref()) {
                        (Some(state), Some(cron)) => state.tick(cron, now),
                        _ => false,
                    };
                    if fired {
                        info!(job = %self.spec.name, "cron fire");
                        if let CycleEnd::Shutdown = self.run_cycle(None).await {
                            break;
                        }
                    }
                    self.enter_waiting();
                }
            }
        }
        info!(job = %self.spec.name, "supervisor stopped");
    }

    /// Sleep until the next computed fire time; forever for one-shot jobs.
    async fn sleep_until_fire(schedule: &Option<ScheduleState>, time: &dyn TimeProvider) {
        match schedule.as_ref().and_then(|s| s.next_fire_at()) {
            Some(due) => {
                let delta = (due - time.now_utc())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tokio::time::sleep(delta).await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// One launch cycle: spawn, supervise to the terminal state, and run
    /// the autorestart loop while it applies.
    async fn run_cycle(
        &mut self,
        mut reply: Option<oneshot::Sender<Result<StartAck>>>,
    ) -> CycleEnd {
        self.restarts = 0;
        let mut done_tx: Option<oneshot::Sender<ExitSummary>> = None;
        let mut attempt: u32 = 0;
        let mut outcome = CycleEnd::Waiting;

        let last = loop {
            let mut handle = match self.launcher.spawn(&self.spec).await {
                Ok(handle) => handle,
                Err(e) => {
                    // The job stays schedulable; the failure is surfaced
                    // through status and awaits the next trigger.
                    warn!(job = %self.spec.name, error = %e, "launch failed");
                    self.last_error = Some(e.to_string());
                    if let Some(r) = reply.take() {
                        let _ = r.send(Err(AppError::Launch(e)));
                    }
                    self.publish();
                    break None;
                }
            };

            if let Some(r) = reply.take() {
                let (tx, rx) = oneshot::channel();
                done_tx = Some(tx);
                let _ = r.send(Ok(StartAck {
                    pid: handle.pid(),
                    done: rx,
                }));
            }

            self.last_error = None;
            let summary = self.supervise_instance(&mut handle).await;

            match summary.reason {
                ExitReason::StoppedByOperator => {
                    if self.shutdown.is_shutdown() {
                        outcome = CycleEnd::Shutdown;
                    }
                    break Some(summary);
                }
                ExitReason::Crashed if self.spec.autorestart => {
                    if let Some(max) = self.spec.max_restarts {
                        if attempt >= max {
                            warn!(
                                job = %self.spec.name,
                                restarts = attempt,
                                "respawn limit reached; waiting for next trigger"
                            );
                            break Some(summary);
                        }
                    }
                    let delay = self.backoff.delay(&self.spec.name, attempt);
                    attempt += 1;
                    self.restarts = attempt;
                    info!(
                        job = %self.spec.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "respawning after crash"
                    );
                    self.publish();
                    match self.backoff_pause(delay).await {
                        BackoffOutcome::Respawn => continue,
                        BackoffOutcome::Cancelled => break Some(summary),
                        BackoffOutcome::Shutdown => {
                            outcome = CycleEnd::Shutdown;
                            break Some(summary);
                        }
                    }
                }
                // Completed, plain Crashed, and MemoryExceeded all wait
                // for the next cron fire (or explicit start).
                _ => break Some(summary),
            }
        };

        if let (Some(tx), Some(summary)) = (done_tx, last) {
            let _ = tx.send(summary);
        }
        outcome
    }

    /// Cancellable backoff sleep between crash respawns.
    async fn backoff_pause(&mut self, delay: Duration) -> BackoffOutcome {
        loop {
            let wake = tokio::select! {
                _ = self.shutdown.wait() => Wake::Shutdown,
                cmd = self.cmd_rx.recv() => Wake::Command(cmd),
                _ = tokio::time::sleep(delay) => Wake::Fire,
            };
            match wake {
                Wake::Fire => return BackoffOutcome::Respawn,
                Wake::Shutdown | Wake::Command(None) => return BackoffOutcome::Shutdown,
                Wake::Command(Some(Command::Stop { reply })) => {
                    info!(job = %self.spec.name, "respawn cancelled by stop");
                    let _ = reply.send(Ok(()));
                    return BackoffOutcome::Cancelled;
                }
                Wake::Command(Some(Command::Start { reply })) => {
                    // An explicit start overrides the remaining delay.
                    let _ = reply.send(Err(AppError::InvalidState(format!(
                        "job {} is already respawning",
                        self.spec.name
                    ))));
                }
            }
        }
    }

    /// Drive one live instance to its terminal state.
    async fn supervise_instance(&mut self, handle: &mut Box<dyn ProcessHandle>) -> ExitSummary {
        let pid = handle.pid();
        let started_at = self.time.now_millis();
        let mut instance = ProcessInstance::new(pid, started_at);
        self.peak_rss = None;

        match self.state.launch(pid, started_at) {
            Ok(next) => self.set_state(next),
            Err(e) => error!(job = %self.spec.name, error = %e, "state machine violation"),
        }
        info!(job = %self.spec.name, pid, "instance started");

        let log_task = handle
            .take_output()
            .map(|(out, err)| LogMultiplexer::attach(out, err, self.sinks.clone(), self.time.clone()));

        let (wd_tx, mut wd_rx) = mpsc::channel(WATCHDOG_EVENT_CAPACITY);
        let wd_task = self.spec.max_memory.map(|limit| {
            MemoryWatchdog::new(self.probe.clone(), self.watchdog_interval).attach(
                pid, limit, wd_tx.clone(),
            )
        });
        // Keeps the channel open when no watchdog is configured, so the
        // select arm parks instead of spinning on a closed receiver.
        let _wd_keepalive = wd_tx;
        let mut wd_open = true;

        let claim = ExitClaim::new();
        let grace = self.spec.kill_timeout;

        let summary = loop {
            let wake = tokio::select! {
                exit = handle.wait() => InstanceWake::Exited(match exit {
                    Ok(status) => status,
                    Err(e) => {
                        error!(job = %self.spec.name, pid, error = %e, "wait failed");
                        ExitStatus::Code(-1)
                    }
                }),
                event = wd_rx.recv(), if wd_open => match event {
                    Some(event) => InstanceWake::Watchdog(event),
                    None => InstanceWake::WatchdogClosed,
                },
                cmd = self.cmd_rx.recv() => InstanceWake::Command(cmd),
                _ = self.shutdown.wait() => InstanceWake::Shutdown,
            };

            match wake {
                InstanceWake::Exited(status) => {
                    let at = self.time.now_millis();
                    let natural = ExitSummary::natural(status, at);
                    claim.claim(natural.reason);
                    // A lost race means a kill path already owns the
                    // reason; keep its classification.
                    let reason = claim.reason().unwrap_or(natural.reason);
                    break ExitSummary { status, reason, at };
                }
                InstanceWake::Watchdog(WatchdogEvent::Sample { rss, .. }) => {
                    instance.record_sample(rss);
                    self.peak_rss = instance.peak_rss;
                    self.publish();
                }
                InstanceWake::Watchdog(WatchdogEvent::MemoryExceeded { rss, limit, .. }) => {
                    instance.record_sample(rss);
                    self.peak_rss = instance.peak_rss;
                    if claim.claim(ExitReason::MemoryExceeded) {
                        warn!(
                            job = %self.spec.name,
                            pid,
                            rss,
                            limit = limit.bytes(),
                            "terminating: memory limit exceeded"
                        );
                        let status = self.kill_instance(handle, grace).await;
                        break ExitSummary {
                            status,
                            reason: ExitReason::MemoryExceeded,
                            at: self.time.now_millis(),
                        };
                    }
                }
                InstanceWake::WatchdogClosed => wd_open = false,
                InstanceWake::Command(Some(Command::Start { reply })) => {
                    let _ = reply.send(Err(AppError::AlreadyRunning(self.spec.name.clone())));
                }
                InstanceWake::Command(Some(Command::Stop { reply })) => {
                    if claim.claim(ExitReason::StoppedByOperator) {
                        info!(job = %self.spec.name, pid, "stop requested");
                        let status = self.kill_instance(handle, grace).await;
                        let _ = reply.send(Ok(()));
                        break ExitSummary {
                            status,
                            reason: ExitReason::StoppedByOperator,
                            at: self.time.now_millis(),
                        };
                    }
                    let _ = reply.send(Ok(()));
                }
                InstanceWake::Command(None) | InstanceWake::Shutdown => {
                    if claim.claim(ExitReason::StoppedByOperator) {
                        info!(job = %self.spec.name, pid, "shutdown: terminating instance");
                        let status = self.kill_instance(handle, grace).await;
                        break ExitSummary {
                            status,
                            reason: ExitReason::StoppedByOperator,
                            at: self.time.now_millis(),
                        };
                    }
                }
            }
        };

        if let Some(task) = wd_task {
            task.abort();
        }
        if let Some(task) = log_task {
            if tokio::time::timeout(LOG_DRAIN_TIMEOUT, task).await.is_err() {
                warn!(job = %self.spec.name, pid, "log drain timed out");
            }
        }

        instance.exit = Some(summary.status);
        self.last_exit = Some(summary);
        match self.state.exited(&summary) {
            Ok(next) => self.set_state(next),
            Err(e) => error!(job = %self.spec.name, error = %e, "state machine violation"),
        }
        info!(
            job = %self.spec.name,
            pid,
            status = %summary.status,
            reason = %summary.reason,
            "instance exited"
        );
        summary
    }

    /// Graceful-then-forced termination with the grace period.
    async fn kill_instance(
        &mut self,
        handle: &mut Box<dyn ProcessHandle>,
        grace: Duration,
    ) -> ExitStatus {
        match self.state.terminating() {
            Ok(next) => self.set_state(next),
            Err(e) => error!(job = %self.spec.name, error = %e, "state machine violation"),
        }
        match handle.terminate(grace).await {
            Ok((Termination::Graceful, status)) => status,
            Ok((Termination::Forced, status)) => {
                warn!(
                    job = %self.spec.name,
                    grace_ms = grace.as_millis() as u64,
                    "graceful stop timed out; forced kill"
                );
                status
            }
            Err(e) => {
                error!(job = %self.spec.name, error = %e, "terminate failed");
                ExitStatus::Code(-1)
            }
        }
    }

    fn enter_waiting(&mut self) {
        // A finished job stays Exited until its next trigger; the
        // transition out of Exited happens at the cron fire (or explicit
        // start), never as post-exit bookkeeping. The snapshot's
        // next_fire_at keeps carrying the schedule meanwhile.
        if matches!(self.state, SupervisorState::Exited { .. }) {
            self.publish();
            return;
        }
        let next = self
            .schedule
            .as_ref()
            .and_then(|s| s.next_fire_at())
            .map(|t| t.timestamp_millis());
        self.set_state(SupervisorState::waiting(next));
    }

    fn set_state(&mut self, next: SupervisorState) {
        self.state = next;
        self.publish();
    }

    fn publish(&self) {
        let snapshot = JobSnapshot {
            name: self.spec.name.clone(),
            state: self.state.clone(),
            next_fire_at: self
                .schedule
                .as_ref()
                .and_then(|s| s.next_fire_at())
                .map(|t| t.timestamp_millis()),
            restarts: self.restarts,
            peak_rss: self.peak_rss,
            last_exit: self.last_exit,
            last_error: self.last_error.clone(),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }
}

enum BackoffOutcome {
    Respawn,
    Cancelled,
    Shutdown,
}
