//! Error handling for logvisor.
use nix::errno::Errno;
use thiserror::Error;

/// Defines all possible errors raised while supervising a task.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The syslog server was launched before an execution context was supplied.
    #[error("execution context must be set before launching the syslog server")]
    ContextNotSet,

    /// No port inside the configured range could be bound.
    #[error("no available port in range {lower}-{upper}")]
    PortUnavailable {
        /// Inclusive lower bound of the exhausted range.
        lower: u16,
        /// Inclusive upper bound of the exhausted range.
        upper: u16,
    },

    /// A syslog relay is already serving for this supervisor.
    #[error("syslog server already running at {0}")]
    SyslogAlreadyRunning(String),

    /// The task process has already been started.
    #[error("task '{0}' has already been started")]
    AlreadyStarted(String),

    /// An operation required a task process but none was started.
    #[error("task '{0}' has not been started")]
    NotStarted(String),

    /// Error spawning the task process.
    #[error("Failed to start task '{task}': {source}")]
    TaskStartError {
        /// The task name that failed to start.
        task: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Delivering the graceful shutdown signal failed.
    #[error("executor.shutdown error: {0}")]
    ShutdownFailed(#[source] Errno),

    /// Killing the task process (or its group) failed.
    #[error("failed to clean up task process: {0}")]
    CleanupFailed(#[source] std::io::Error),

    /// Waiting on the task process failed.
    #[error("failed to wait on task process: {0}")]
    WaitError(#[source] std::io::Error),

    /// Generic I/O failure (thread spawn, socket setup).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference points at an unset environment variable.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A value failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Error type for a single syslog frame that could not be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The frame contained no bytes after trimming.
    #[error("empty syslog frame")]
    Empty,

    /// The frame does not start with a `<PRI>` tag.
    #[error("syslog frame has no priority tag")]
    MissingPriority,

    /// The `<PRI>` tag is not a number between 0 and 191.
    #[error("invalid syslog priority '{0}'")]
    InvalidPriority(String),
}

/// Error type for the client side forwarder.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The address is not of the form `<network>://<host:port>`.
    #[error("invalid syslog address '{0}'")]
    InvalidAddress(String),

    /// Socket connect or write failure.
    #[error("syslog forward failed: {0}")]
    Io(#[from] std::io::Error),
}
