// Subprocess launcher implementation
// Spawns isolated child processes with piped stdio

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{info, warn};

use cronvisor_core::domain::{ExitStatus, JobSpec};
use cronvisor_core::port::{
    LaunchError, OutputStream, ProcessHandle, ProcessLauncher, Termination,
};

/// Process launcher backed by tokio::process
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Build the command: `interpreter script args...` when an
    /// interpreter is configured, otherwise the script directly.
    fn command(spec: &JobSpec) -> Command {
        let mut cmd = match &spec.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&spec.script);
                cmd
            }
            None => Command::new(&spec.script),
        };
        cmd.args(&spec.args);
        // The child sees exactly the configured environment on top of
        // the daemon's own.
        cmd.envs(&spec.env);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for TokioProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn spawn(&self, spec: &JobSpec) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        let mut child = Self::command(spec)
            .spawn()
            .map_err(|e| LaunchError::Spawn(e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| LaunchError::Spawn("child exited before pid was read".to_string()))?;

        let stdout: OutputStream = Box::new(
            child
                .stdout
                .take()
                .ok_or_else(|| LaunchError::Spawn("stdout pipe missing".to_string()))?,
        );
        let stderr: OutputStream = Box::new(
            child
                .stderr
                .take()
                .ok_or_else(|| LaunchError::Spawn("stderr pipe missing".to_string()))?,
        );

        info!(job = %spec.name, pid, script = %spec.script.display(), "spawned");
        Ok(Box::new(TokioProcessHandle {
            pid,
            child,
            output: Some((stdout, stderr)),
        }))
    }
}

/// Handle for one spawned child
pub struct TokioProcessHandle {
    pid: u32,
    child: Child,
    output: Option<(OutputStream, OutputStream)>,
}

impl TokioProcessHandle {
    fn map_status(status: std::process::ExitStatus) -> ExitStatus {
        if let Some(code) = status.code() {
            return ExitStatus::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Code(-1)
    }

    /// Ask the child to stop. SIGTERM on unix; elsewhere this degrades
    /// to an immediate kill.
    fn request_stop(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM)
                .map_err(|e| std::io::Error::other(format!("SIGTERM failed: {}", e)))
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }
}

#[async_trait]
impl ProcessHandle for TokioProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn take_output(&mut self) -> Option<(OutputStream, OutputStream)> {
        self.output.take()
    }

    async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        Ok(Self::map_status(status))
    }

    async fn terminate(
        &mut self,
        grace: Duration,
    ) -> std::io::Result<(Termination, ExitStatus)> {
        self.request_stop()?;
        match timeout(grace, self.child.wait()).await {
            Ok(status) => Ok((Termination::Graceful, Self::map_status(status?))),
            Err(_) => {
                warn!(pid = self.pid, grace_ms = grace.as_millis() as u64, "escalating to SIGKILL");
                // A start_kill error means the child beat us to the exit;
                // wait() below still yields its status either way.
                let _ = self.child.start_kill();
                let status = self.child.wait().await?;
                Ok((Termination::Forced, Self::map_status(status)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronvisor_core::domain::JobConfig;
    use tokio::io::AsyncReadExt;

    fn sh_spec(name: &str, script: &str) -> JobSpec {
        JobConfig {
            name: Some(name.to_string()),
            script: Some("-c".to_string()),
            interpreter: Some("/bin/sh".to_string()),
            args: vec![script.to_string()],
            ..JobConfig::default()
        }
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn completed_child_reports_code_zero() {
        let launcher = TokioProcessLauncher::new();
        let mut handle = launcher.spawn(&sh_spec("ok", "exit 0")).await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), ExitStatus::Code(0));
    }

    #[tokio::test]
    async fn crashed_child_reports_its_code() {
        let launcher = TokioProcessLauncher::new();
        let mut handle = launcher.spawn(&sh_spec("bad", "exit 3")).await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), ExitStatus::Code(3));
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let launcher = TokioProcessLauncher::new();
        let spec = JobConfig {
            name: Some("ghost".to_string()),
            script: Some("/nonexistent/cronvisor-test-binary".to_string()),
            ..JobConfig::default()
        }
        .validate()
        .unwrap();
        assert!(matches!(
            launcher.spawn(&spec).await,
            Err(LaunchError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn stdout_is_piped() {
        let launcher = TokioProcessLauncher::new();
        let mut handle = launcher.spawn(&sh_spec("echo", "echo hello")).await.unwrap();
        let (mut stdout, _stderr) = handle.take_output().unwrap();
        handle.wait().await.unwrap();
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_ignoring_child_is_force_killed() {
        let launcher = TokioProcessLauncher::new();
        let mut handle = launcher
            .spawn(&sh_spec("stubborn", "trap '' TERM; sleep 30"))
            .await
            .unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let (termination, status) = handle
            .terminate(Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(termination, Termination::Forced);
        assert_eq!(status, ExitStatus::Signal(9));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cooperative_child_stops_gracefully() {
        let launcher = TokioProcessLauncher::new();
        let mut handle = launcher.spawn(&sh_spec("meek", "sleep 30")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let (termination, status) = handle.terminate(Duration::from_secs(2)).await.unwrap();
        assert_eq!(termination, Termination::Graceful);
        assert_eq!(status, ExitStatus::Signal(15));
    }

    #[tokio::test]
    async fn env_reaches_the_child() {
        let launcher = TokioProcessLauncher::new();
        let mut spec = sh_spec("env", "printf '%s' \"$CRONVISOR_TEST_VALUE\"");
        spec.env
            .insert("CRONVISOR_TEST_VALUE".to_string(), "present".to_string());
        let mut handle = launcher.spawn(&spec).await.unwrap();
        let (mut stdout, _stderr) = handle.take_output().unwrap();
        handle.wait().await.unwrap();
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "present");
    }
}
