// Supervision constants (no magic values)

use std::time::Duration;

/// Watchdog sampling interval when config does not override it (1s)
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// Base delay for the crash-respawn backoff (1s)
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Growth factor for the crash-respawn backoff
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Cap for the crash-respawn backoff (30s)
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Command queue depth per job
pub const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Watchdog event queue depth per instance
pub const WATCHDOG_EVENT_CAPACITY: usize = 8;

/// Log fan-in queue depth per instance
pub const LOG_CHANNEL_CAPACITY: usize = 1024;

/// How long to wait for log drain after an instance is reaped (2s)
pub const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
