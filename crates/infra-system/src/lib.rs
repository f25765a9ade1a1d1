// Cronvisor Infrastructure - System Adapters
// Implements: ProcessLauncher, MemoryProbe, LogSink

pub mod file_sink;
pub mod memory_probe_impl;
pub mod subprocess_launcher;

pub use file_sink::FileSink;
pub use memory_probe_impl::SysinfoMemoryProbe;
pub use subprocess_launcher::TokioProcessLauncher;
