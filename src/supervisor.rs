//! Supervisor for one task process and its embedded syslog relay.
use std::{
    process::ExitStatus,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    config::{ExecutionContext, SyslogConfig},
    constants::{PROCESS_POLL_INTERVAL, SYSLOG_ADDR_ENV},
    error::SupervisorError,
    process::{ProcessState, TaskCommand, TaskProcess},
    syslog::{Collector, CollectorStats, Sink, SinkErrorHandler, SyslogRelay, SyslogServerState},
};

/// Owns one task's lifecycle: relay launch, process launch, shutdown and cleanup.
///
/// All operations take `&mut self`, so signalling the process is serialized
/// by whoever owns the supervisor.
pub struct Supervisor {
    name: String,
    command: TaskCommand,
    context: Option<ExecutionContext>,
    syslog: SyslogConfig,
    process_group: bool,
    process: Option<TaskProcess>,
    relay: Option<SyslogRelay>,
}

impl Supervisor {
    /// Creates a supervisor for `command`. Nothing is started yet.
    pub fn new(name: impl Into<String>, command: TaskCommand) -> Self {
        Self {
            name: name.into(),
            command,
            context: None,
            syslog: SyslogConfig::default(),
            process_group: false,
            process: None,
            relay: None,
        }
    }

    /// Overrides the relay settings.
    pub fn with_syslog_config(mut self, config: SyslogConfig) -> Self {
        self.syslog = config;
        self
    }

    /// Supplies the execution context. Required before [`launch_syslog_server`](Self::launch_syslog_server).
    pub fn set_context(&mut self, context: ExecutionContext) {
        self.context = Some(context);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state of the task process.
    pub fn state(&self) -> ProcessState {
        self.process
            .as_ref()
            .map_or(ProcessState::Unstarted, TaskProcess::state)
    }

    /// PID of the task, once launched.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(TaskProcess::id)
    }

    /// Address of the running relay, if any.
    pub fn syslog_state(&self) -> Option<&SyslogServerState> {
        self.relay.as_ref().map(SyslogRelay::state)
    }

    /// Starts the syslog relay writing to the given sinks, with the default
    /// sink error policy.
    pub fn launch_syslog_server(
        &mut self,
        stdout: Sink,
        stderr: Sink,
    ) -> Result<SyslogServerState, SupervisorError> {
        self.start_relay(Collector::new(stdout, stderr))
    }

    /// Like [`launch_syslog_server`](Self::launch_syslog_server) with a custom
    /// sink error policy.
    pub fn launch_syslog_server_with(
        &mut self,
        stdout: Sink,
        stderr: Sink,
        on_error: impl SinkErrorHandler + 'static,
    ) -> Result<SyslogServerState, SupervisorError> {
        self.start_relay(Collector::new(stdout, stderr).with_error_handler(on_error))
    }

    fn start_relay(&mut self, collector: Collector) -> Result<SyslogServerState, SupervisorError> {
        let context = self.context.ok_or(SupervisorError::ContextNotSet)?;
        if let Some(relay) = &self.relay {
            return Err(SupervisorError::SyslogAlreadyRunning(
                relay.state().address().to_string(),
            ));
        }

        let relay = SyslogRelay::launch(&context, &self.syslog, collector)?;
        let state = relay.state().clone();
        info!("Syslog relay for '{}' listening on {state}", self.name);
        self.relay = Some(relay);
        Ok(state)
    }

    /// Requests that the task start in a new process group. Must precede [`launch`](Self::launch).
    pub fn create_process_group(&mut self) -> Result<(), SupervisorError> {
        if self.process.is_some() {
            return Err(SupervisorError::AlreadyStarted(self.name.clone()));
        }
        self.process_group = true;
        Ok(())
    }

    /// Spawns the task. The relay address, when a relay runs, is exported as
    /// `LOGVISOR_SYSLOG_ADDR`.
    pub fn launch(&mut self) -> Result<u32, SupervisorError> {
        if self.process.is_some() {
            return Err(SupervisorError::AlreadyStarted(self.name.clone()));
        }

        let mut cmd = self.command.to_command();
        if let Some(relay) = &self.relay {
            cmd.env(SYSLOG_ADDR_ENV, relay.state().address());
        }
        debug!("Launching task '{}': {cmd:?}", self.name);

        let process = TaskProcess::spawn(cmd, self.process_group).map_err(|source| {
            SupervisorError::TaskStartError {
                task: self.name.clone(),
                source,
            }
        })?;
        let pid = process.id();
        info!("Task '{}' started with PID {pid}", self.name);
        self.process = Some(process);
        Ok(pid)
    }

    /// Sends the command's kill signal (default `SIGINT`). Success if the task already exited.
    pub fn graceful_shutdown(&mut self) -> Result<(), SupervisorError> {
        let signal = self.command.shutdown_signal();
        self.process_mut()?.graceful_shutdown(signal)
    }

    /// SIGKILLs the task (its whole group in process-group mode) and reaps it.
    pub fn force_cleanup(&mut self) -> Result<(), SupervisorError> {
        self.process_mut()?.force_cleanup()
    }

    /// Escalating stop: graceful signal, wait up to `timeout`, then force cleanup.
    pub fn shutdown(&mut self, timeout: Duration) -> Result<ExitStatus, SupervisorError> {
        let name = self.name.clone();
        let signal = self.command.shutdown_signal();
        let process = self.process_mut()?;

        if let Err(err) = process.graceful_shutdown(signal) {
            warn!("Graceful shutdown of '{name}' failed, escalating: {err}");
            process.force_cleanup()?;
            return process.wait();
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if process.try_wait()?.is_some() {
                break;
            }
            thread::sleep(PROCESS_POLL_INTERVAL);
        }

        if process.try_wait()?.is_none() {
            warn!("Task '{name}' did not exit within {timeout:?}; sending SIGKILL");
        }
        process.force_cleanup()?;
        process.wait()
    }

    /// Blocks until the task exits.
    pub fn wait(&mut self) -> Result<ExitStatus, SupervisorError> {
        self.process_mut()?.wait()
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        self.process_mut()?.try_wait()
    }

    /// Stops the relay, drains pending messages and returns the collector totals.
    pub fn stop_syslog_server(&mut self) -> Option<CollectorStats> {
        let relay = self.relay.take()?;
        let stats = relay.stop();
        debug!(
            "Syslog relay for '{}' stopped: {} stdout, {} stderr, {} dropped",
            self.name, stats.stdout_messages, stats.stderr_messages, stats.dropped_messages
        );
        Some(stats)
    }

    fn process_mut(&mut self) -> Result<&mut TaskProcess, SupervisorError> {
        let name = &self.name;
        self.process
            .as_mut()
            .ok_or_else(|| SupervisorError::NotStarted(name.clone()))
    }
}
