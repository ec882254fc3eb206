//! Configuration management for logvisor.
use nix::sys::signal::Signal;
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fs,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{
    constants::{
        DEFAULT_BIND_ADDRESS, DEFAULT_CHANNEL_CAPACITY, DEFAULT_KILL_TIMEOUT,
        DEFAULT_PORT_LOWER_BOUND, DEFAULT_PORT_UPPER_BOUND,
    },
    error::ConfigError,
    process::TaskCommand,
};

const ENV_VAR_PATTERN: &str = r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?";

/// Port range the syslog listener may bind inside. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    port_lower_bound: u16,
    port_upper_bound: u16,
}

impl ExecutionContext {
    /// Creates a context, rejecting zero bounds and inverted ranges.
    pub fn new(port_lower_bound: u16, port_upper_bound: u16) -> Result<Self, ConfigError> {
        if port_lower_bound == 0 || port_upper_bound == 0 {
            return Err(ConfigError::Invalid(format!(
                "port bounds must be positive (got {port_lower_bound}-{port_upper_bound})"
            )));
        }
        if port_lower_bound > port_upper_bound {
            return Err(ConfigError::Invalid(format!(
                "port lower bound {port_lower_bound} exceeds upper bound {port_upper_bound}"
            )));
        }
        Ok(Self {
            port_lower_bound,
            port_upper_bound,
        })
    }

    /// Inclusive lower bound.
    pub fn port_lower_bound(&self) -> u16 {
        self.port_lower_bound
    }

    /// Inclusive upper bound.
    pub fn port_upper_bound(&self) -> u16 {
        self.port_upper_bound
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            port_lower_bound: DEFAULT_PORT_LOWER_BOUND,
            port_upper_bound: DEFAULT_PORT_UPPER_BOUND,
        }
    }
}

impl FromStr for ExecutionContext {
    type Err = ConfigError;

    /// Parses `LOW-HIGH`, or a single port.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |raw: &str| {
            raw.trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid(format!("invalid port range '{s}'")))
        };
        match s.split_once('-') {
            Some((lower, upper)) => Self::new(parse(lower)?, parse(upper)?),
            None => {
                let port = parse(s)?;
                Self::new(port, port)
            }
        }
    }
}

/// Network transport of the syslog listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, EnumString, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Transport {
    /// Newline-delimited frames over TCP streams.
    #[default]
    Tcp,
    /// One frame per UDP datagram.
    Udp,
}

/// What the listener does when the channel to the collector is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, EnumString, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverflowPolicy {
    /// Block the producer until the collector makes room. Never loses messages.
    #[default]
    Block,
    /// Discard the incoming message and keep reading.
    DropNewest,
}

/// Settings for one syslog relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogConfig {
    /// Listener transport.
    pub transport: Transport,
    /// Interface the listener binds to.
    pub bind_address: IpAddr,
    /// Capacity of the listener to collector channel.
    pub capacity: usize,
    /// Behaviour on a full channel.
    pub overflow: OverflowPolicy,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            bind_address: IpAddr::from([127, 0, 0, 1]),
            capacity: DEFAULT_CHANNEL_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Represents the structure of a task file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TaskConfig {
    /// Task name used in diagnostics.
    pub name: Option<String>,
    /// Command line, executed through `sh -c`.
    pub command: Option<String>,
    /// Graceful shutdown signal (e.g. `SIGTERM`). Defaults to `SIGINT`.
    pub kill_signal: Option<String>,
    /// Grace period before SIGKILL, as `<number>[s|m|h]`.
    pub kill_timeout: Option<String>,
    /// Whether the task runs in its own process group. Defaults to `true`.
    pub process_group: Option<bool>,
    /// Extra environment variables for the task.
    pub env: Option<HashMap<String, String>>,
    /// Working directory of the task.
    pub working_dir: Option<String>,
    /// Listener port range.
    pub ports: Option<PortsConfig>,
    /// Syslog relay settings.
    pub syslog: Option<SyslogSection>,
    /// File receiving non-error messages. Defaults to logvisor's stdout.
    pub stdout_log: Option<String>,
    /// File receiving error messages. Defaults to logvisor's stderr.
    pub stderr_log: Option<String>,
    /// Directory relative paths are resolved from.
    #[serde(skip)]
    pub project_dir: Option<PathBuf>,
}

/// Port range section of the task file.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PortsConfig {
    pub lower: u16,
    pub upper: u16,
}

/// Syslog section of the task file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyslogSection {
    pub transport: Option<Transport>,
    pub bind: Option<String>,
    pub capacity: Option<usize>,
    pub overflow: Option<OverflowPolicy>,
}

impl TaskConfig {
    /// Task name, falling back to `task`.
    pub fn task_name(&self) -> &str {
        self.name.as_deref().unwrap_or("task")
    }

    /// Builds the execution context from the `ports` section or the defaults.
    pub fn execution_context(&self) -> Result<ExecutionContext, ConfigError> {
        match self.ports {
            Some(ports) => ExecutionContext::new(ports.lower, ports.upper),
            None => Ok(ExecutionContext::default()),
        }
    }

    /// Builds relay settings from the `syslog` section or the defaults.
    pub fn syslog_config(&self) -> Result<SyslogConfig, ConfigError> {
        let section = self.syslog.clone().unwrap_or_default();
        let bind = section.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS);
        let bind_address = bind
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::Invalid(format!("invalid bind address '{bind}'")))?;
        let capacity = section.capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        if capacity == 0 {
            return Err(ConfigError::Invalid(
                "syslog channel capacity must be positive".into(),
            ));
        }

        Ok(SyslogConfig {
            transport: section.transport.unwrap_or_default(),
            bind_address,
            capacity,
            overflow: section.overflow.unwrap_or_default(),
        })
    }

    /// Parsed graceful shutdown signal, if configured.
    pub fn kill_signal(&self) -> Result<Option<Signal>, ConfigError> {
        self.kill_signal.as_deref().map(parse_signal).transpose()
    }

    /// Grace period between the shutdown signal and SIGKILL.
    pub fn kill_timeout(&self) -> Result<Duration, ConfigError> {
        self.kill_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map(|timeout| timeout.unwrap_or(DEFAULT_KILL_TIMEOUT))
    }

    /// Whether the task gets its own process group.
    pub fn process_group(&self) -> bool {
        self.process_group.unwrap_or(true)
    }

    /// Resolves a path from the task file against the project directory.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        match &self.project_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Builds the command description for the task.
    pub fn task_command(&self) -> Result<TaskCommand, ConfigError> {
        let command = self
            .command
            .as_deref()
            .filter(|command| !command.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("no command configured".into()))?;

        let mut task = TaskCommand::shell(command);
        if let Some(vars) = &self.env {
            for (key, value) in vars {
                task = task.env(key, value);
            }
        }
        if let Some(dir) = &self.working_dir {
            task = task.current_dir(self.resolve_path(dir));
        }
        if let Some(signal) = self.kill_signal()? {
            task = task.kill_signal(signal);
        }
        Ok(task)
    }
}

/// Parses a signal name (`SIGTERM`, `term`) or number (`15`).
pub fn parse_signal(raw: &str) -> Result<Signal, ConfigError> {
    let value = raw.trim();
    if let Ok(number) = value.parse::<i32>() {
        return Signal::try_from(number)
            .map_err(|_| ConfigError::Invalid(format!("unknown signal number {number}")));
    }

    let upper = value.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| ConfigError::Invalid(format!("unknown signal '{raw}'")))
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::Invalid("Duration value cannot be empty".into()));
    }

    if let Some(millis) = value.strip_suffix("ms") {
        let amount: u64 = millis
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("Invalid duration value: '{raw}'")))?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("Invalid duration value: '{raw}'")))?;

    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Expands `$VAR` and `${VAR}` references from the environment.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(ENV_VAR_PATTERN).map_err(|e| ConfigError::Invalid(e.to_string()))?;

    if let Some(missing) = re
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .find(|name| env::var(name).is_err())
    {
        return Err(ConfigError::MissingEnvVar(missing));
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });
    Ok(result.to_string())
}

/// Loads and parses a task file, expanding environment variables.
pub fn load_config(config_path: &Path) -> Result<TaskConfig, ConfigError> {
    let content = fs::read_to_string(config_path).map_err(|e| {
        ConfigError::Read(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content)?;
    let mut config: TaskConfig = serde_yaml::from_str(&expanded)?;

    let base_path = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    config.project_dir = Some(base_path);

    config.execution_context()?;
    config.syslog_config()?;
    config.kill_timeout()?;
    config.kill_signal()?;
    Ok(config)
}
