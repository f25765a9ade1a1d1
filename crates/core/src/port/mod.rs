// Port Layer - Interfaces for external dependencies

pub mod log_sink;
pub mod memory_probe;
pub mod process_launcher;
pub mod time_provider;

// Re-exports
pub use log_sink::LogSink;
pub use memory_probe::MemoryProbe;
pub use process_launcher::{
    LaunchError, OutputStream, ProcessHandle, ProcessLauncher, Termination,
};
pub use time_provider::{SystemTimeProvider, TimeProvider};
