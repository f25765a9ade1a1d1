// Application Layer - Supervision services built on domain + ports

pub mod backoff;
pub mod constants;
pub mod multiplexer;
pub mod registry;
pub mod shutdown;
pub mod supervisor;
pub mod watchdog;

pub use backoff::RestartBackoff;
pub use multiplexer::{LogMultiplexer, LogSinks};
pub use registry::{RegistryConfig, SupervisorRegistry};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use supervisor::{Command, JobSupervisor, StartAck, SupervisorParams};
pub use watchdog::{MemoryWatchdog, WatchdogEvent};
