//! Logvisor supervises a single task process on Unix-like systems and relays
//! everything it logs over syslog. The task is started in its own process
//! group so that a forced cleanup reaches every descendant, and a listener
//! bound inside a configured port range parses incoming syslog frames and
//! routes them by severity to a stdout and a stderr sink.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared constants and defaults.
pub mod constants;

/// Error handling.
pub mod error;

/// Sink management for relayed task output.
pub mod logs;

/// Listener port allocation.
pub mod ports;

/// Task process handle and signalling.
pub mod process;

/// Supervisor wiring the relay and the task process together.
pub mod supervisor;

/// Embedded syslog relay.
pub mod syslog;
