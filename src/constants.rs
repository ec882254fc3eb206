//! Constants and default values for logvisor.
//!
//! Centralizes sizes, timings and names shared by the relay, the supervisor
//! and the CLI.

use std::time::Duration;

// ============================================================================
// Syslog Relay
// ============================================================================

/// Number of parsed messages that may wait between the listener and the collector.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 2048;

/// Largest frame accepted from a stream connection or a datagram.
/// Longer stream lines are truncated to this size.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default interface the syslog listener binds to.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Environment variable through which the task learns the relay address.
pub const SYSLOG_ADDR_ENV: &str = "LOGVISOR_SYSLOG_ADDR";

/// Highest valid `<PRI>` value (facility 23, severity 7).
pub const MAX_PRIORITY: u8 = 191;

/// Facility used by the forwarder when none is given (`user`).
pub const DEFAULT_FACILITY: u8 = 1;

// ============================================================================
// Port Allocation
// ============================================================================

/// Default inclusive lower bound for listener ports.
pub const DEFAULT_PORT_LOWER_BOUND: u16 = 10000;

/// Default inclusive upper bound for listener ports.
pub const DEFAULT_PORT_UPPER_BOUND: u16 = 14000;

// ============================================================================
// Process Management Timing
// ============================================================================

/// Time a task gets between the graceful signal and SIGKILL when driven by the CLI.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Polling interval while waiting for a task to exit.
pub const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Shell Execution Constants
// ============================================================================

/// Default shell used for executing task command strings.
pub const DEFAULT_SHELL: &str = "sh";

/// Shell argument flag for executing command strings.
pub const SHELL_COMMAND_FLAG: &str = "-c";

/// Default task file looked up by `logvisor run`.
pub const DEFAULT_CONFIG_FILE: &str = "logvisor.yaml";
