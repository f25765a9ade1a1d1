// Process Launcher Port
// Abstraction for spawning and controlling one external job process

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::domain::{ExitStatus, JobSpec};

/// Piped child output stream
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// How a termination request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Process exited within the grace period after the stop request
    Graceful,
    /// Grace period elapsed; the process was force-killed
    Forced,
}

/// Launch errors
#[derive(Error, Debug, Clone)]
pub enum LaunchError {
    /// Executable or interpreter could not be started; carries the OS error
    #[error("Spawn failed: {0}")]
    Spawn(String),

    /// An instance of the same job is still live
    #[error("Already running with pid {0}")]
    AlreadyRunning(u32),
}

/// Handle to one spawned instance.
///
/// Implementations:
/// - TokioProcessHandle (infra-system): a real child process
/// - MockHandle (tests): scripted exits over channels
#[async_trait]
pub trait ProcessHandle: Send {
    fn pid(&self) -> u32;

    /// Take the piped stdout/stderr readers; yields `Some` exactly once.
    fn take_output(&mut self) -> Option<(OutputStream, OutputStream)>;

    /// Suspend until the process exits naturally or is killed.
    ///
    /// Must be cancel safe: dropping the future and calling again (or
    /// calling [`ProcessHandle::terminate`]) must not lose the child.
    async fn wait(&mut self) -> std::io::Result<ExitStatus>;

    /// Graceful stop request, bounded wait, then forced kill.
    ///
    /// Returns how the process ended plus its exit status. A `Forced`
    /// outcome means the grace period elapsed without an exit.
    async fn terminate(&mut self, grace: Duration)
        -> std::io::Result<(Termination, ExitStatus)>;
}

/// Process launcher port
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn one instance of the job.
    ///
    /// # Errors
    /// - `LaunchError::Spawn` when the executable or interpreter cannot
    ///   be started
    /// - `LaunchError::AlreadyRunning` when the caller still holds a
    ///   live instance for the same spec
    async fn spawn(&self, spec: &JobSpec) -> Result<Box<dyn ProcessHandle>, LaunchError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    /// Test-side controller for one [`MockHandle`]
    pub struct MockController {
        exit_tx: mpsc::Sender<ExitStatus>,
        /// Write end mirrored to the handle's stdout reader
        pub stdout: DuplexStream,
        /// Write end mirrored to the handle's stderr reader
        pub stderr: DuplexStream,
    }

    impl MockController {
        /// Let the mock process exit naturally with `status`.
        ///
        /// Consumes the controller so the output streams hit EOF, the
        /// way a real exit closes the child's pipes.
        pub async fn exit(self, status: ExitStatus) {
            let _ = self.exit_tx.send(status).await;
        }
    }

    /// Scripted process handle driven from the test body
    pub struct MockHandle {
        pid: u32,
        exit_rx: mpsc::Receiver<ExitStatus>,
        exited: Option<ExitStatus>,
        termination: Termination,
        output: Option<(OutputStream, OutputStream)>,
    }

    impl MockHandle {
        /// Build a handle plus the controller that drives it.
        pub fn scripted(pid: u32) -> (Self, MockController) {
            let (exit_tx, exit_rx) = mpsc::channel(1);
            let (stdout_theirs, stdout_ours) = tokio::io::duplex(4096);
            let (stderr_theirs, stderr_ours) = tokio::io::duplex(4096);
            let handle = Self {
                pid,
                exit_rx,
                exited: None,
                termination: Termination::Graceful,
                output: Some((Box::new(stdout_theirs), Box::new(stderr_theirs))),
            };
            let controller = MockController {
                exit_tx,
                stdout: stdout_ours,
                stderr: stderr_ours,
            };
            (handle, controller)
        }

        /// Make `terminate` report a forced kill (grace period overrun).
        pub fn with_forced_termination(mut self) -> Self {
            self.termination = Termination::Forced;
            self
        }
    }

    #[async_trait]
    impl ProcessHandle for MockHandle {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn take_output(&mut self) -> Option<(OutputStream, OutputStream)> {
            self.output.take()
        }

        async fn wait(&mut self) -> std::io::Result<ExitStatus> {
            if let Some(status) = self.exited {
                return Ok(status);
            }
            // A dropped controller reads as a clean exit.
            let status = self.exit_rx.recv().await.unwrap_or(ExitStatus::Code(0));
            self.exited = Some(status);
            Ok(status)
        }

        async fn terminate(
            &mut self,
            _grace: Duration,
        ) -> std::io::Result<(Termination, ExitStatus)> {
            if let Some(status) = self.exited {
                return Ok((Termination::Graceful, status));
            }
            // Exit already queued by the controller wins over the kill.
            if let Ok(status) = self.exit_rx.try_recv() {
                self.exited = Some(status);
                return Ok((Termination::Graceful, status));
            }
            let status = match self.termination {
                Termination::Graceful => ExitStatus::Signal(15),
                Termination::Forced => ExitStatus::Signal(9),
            };
            self.exited = Some(status);
            Ok((self.termination, status))
        }
    }

    /// Mock launcher handing out pre-scripted handles in order
    pub struct MockLauncher {
        handles: Mutex<VecDeque<MockHandle>>,
        failures: Mutex<VecDeque<String>>,
        spawn_count: AtomicUsize,
    }

    impl MockLauncher {
        pub fn new() -> Self {
            Self {
                handles: Mutex::new(VecDeque::new()),
                failures: Mutex::new(VecDeque::new()),
                spawn_count: AtomicUsize::new(0),
            }
        }

        pub fn push_handle(&self, handle: MockHandle) {
            self.handles.lock().unwrap().push_back(handle);
        }

        /// Queue a spawn failure ahead of any queued handles.
        pub fn push_failure(&self, message: impl Into<String>) {
            self.failures.lock().unwrap().push_back(message.into());
        }

        pub fn spawn_count(&self) -> usize {
            self.spawn_count.load(Ordering::SeqCst)
        }
    }

    impl Default for MockLauncher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessLauncher for MockLauncher {
        async fn spawn(&self, _spec: &JobSpec) -> Result<Box<dyn ProcessHandle>, LaunchError> {
            self.spawn_count.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = self.failures.lock().unwrap().pop_front() {
                return Err(LaunchError::Spawn(message));
            }
            self.handles
                .lock()
                .unwrap()
                .pop_front()
                .map(|h| Box::new(h) as Box<dyn ProcessHandle>)
                .ok_or_else(|| LaunchError::Spawn("no scripted handle".to_string()))
        }
    }
}
