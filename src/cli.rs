//! Command-line interface for logvisor.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::{
    config::{ExecutionContext, OverflowPolicy, Transport},
    constants::DEFAULT_CONFIG_FILE,
    syslog::Severity,
};

/// `--log-level` value: `off`, `error`, `warn`, `info`, `debug`, `trace` or `0`-`5`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    pub fn filter(self) -> LevelFilter {
        self.0
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<LevelFilter>()
            .map(LogLevelArg)
            .map_err(|_| format!("invalid log level '{value}'"))
    }
}

/// Command-line interface for logvisor.
#[derive(Parser, Debug)]
#[command(name = "logvisor", version, author)]
#[command(about = "Supervise a task process and relay its syslog output", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options for `logvisor run`. Flags override the task file.
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Path to the task file (used only if it exists).
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Task name used in diagnostics.
    #[arg(long)]
    pub name: Option<String>,

    /// Inclusive listener port range, `LOW-HIGH`.
    #[arg(long, value_name = "LOW-HIGH")]
    pub port_range: Option<ExecutionContext>,

    /// Listener transport.
    #[arg(long)]
    pub transport: Option<Transport>,

    /// Capacity of the listener to collector channel.
    #[arg(long)]
    pub buffer: Option<usize>,

    /// What to do when the channel is full (`block` or `drop_newest`).
    #[arg(long)]
    pub overflow: Option<OverflowPolicy>,

    /// Graceful shutdown signal (default SIGINT).
    #[arg(long, value_name = "SIGNAL")]
    pub kill_signal: Option<String>,

    /// Grace period before SIGKILL, `<number>[ms|s|m|h]`.
    #[arg(long, value_name = "DURATION")]
    pub kill_timeout: Option<String>,

    /// Run the task in logvisor's own process group.
    #[arg(long)]
    pub no_process_group: bool,

    /// File receiving non-error task messages.
    #[arg(long, value_name = "PATH")]
    pub stdout_log: Option<String>,

    /// File receiving error task messages.
    #[arg(long, value_name = "PATH")]
    pub stderr_log: Option<String>,

    /// Command line to run (overrides `command` in the task file).
    #[arg(last = true, value_name = "COMMAND")]
    pub task: Vec<String>,
}

/// Available commands for logvisor.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a task under supervision until it exits.
    Run(RunArgs),

    /// Read lines from stdin and forward each as a syslog frame.
    Forward {
        /// Relay address (`tcp://host:port` or `udp://host:port`).
        #[arg(long, env = "LOGVISOR_SYSLOG_ADDR")]
        address: String,

        /// Severity stamped on every line.
        #[arg(long, default_value = "info")]
        severity: Severity,

        /// Facility code (0-23).
        #[arg(long, default_value_t = 1)]
        facility: u8,
    },
}

/// Parses command-line arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
