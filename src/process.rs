//! Task process handle: process-group launch, graceful shutdown and forced cleanup.
use std::{
    collections::BTreeMap,
    ffi::OsString,
    io,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Child, Command, ExitStatus},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, info, warn};

use crate::{
    constants::{DEFAULT_SHELL, SHELL_COMMAND_FLAG},
    error::SupervisorError,
};

/// Signal sent on graceful shutdown when the command does not name one.
pub const DEFAULT_SHUTDOWN_SIGNAL: Signal = Signal::SIGINT;

/// Description of the task invocation. Construction details (user, limits,
/// isolation) are the caller's business; this only carries what is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCommand {
    program: OsString,
    args: Vec<OsString>,
    env: BTreeMap<OsString, OsString>,
    current_dir: Option<PathBuf>,
    kill_signal: Option<Signal>,
}

impl TaskCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
            kill_signal: None,
        }
    }

    /// Runs `command` through `sh -c`.
    pub fn shell(command: &str) -> Self {
        Self::new(DEFAULT_SHELL).arg(SHELL_COMMAND_FLAG).arg(command)
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Signal used for graceful shutdown instead of `SIGINT`.
    pub fn kill_signal(mut self, signal: Signal) -> Self {
        self.kill_signal = Some(signal);
        self
    }

    /// Graceful shutdown signal: the configured one, else `SIGINT`.
    pub fn shutdown_signal(&self) -> Signal {
        self.kill_signal.unwrap_or(DEFAULT_SHUTDOWN_SIGNAL)
    }

    /// Builds the `std::process::Command` for spawning.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Lifecycle of one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ProcessState {
    Unstarted,
    Running,
    ShuttingDown,
    Terminated,
}

/// Exclusively owned handle to a running task.
///
/// `process_group` is fixed at spawn: when set, the child leads a group whose
/// id equals its pid, and every signal goes to that group.
#[derive(Debug)]
pub struct TaskProcess {
    child: Child,
    pid: Pid,
    process_group: bool,
    state: ProcessState,
    exit_status: Option<ExitStatus>,
    group_killed: bool,
}

impl TaskProcess {
    /// Spawns `cmd`, placing the child in a new process group when `process_group` is set.
    pub fn spawn(mut cmd: Command, process_group: bool) -> io::Result<Self> {
        if process_group {
            // setpgid(0, 0) in the child before exec.
            cmd.process_group(0);
        }
        let child = cmd.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        debug!("Task started with PID {pid} (process group: {process_group})");

        Ok(Self {
            child,
            pid,
            process_group,
            state: ProcessState::Running,
            exit_status: None,
            group_killed: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn process_group(&self) -> bool {
        self.process_group
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Exit status, once reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Reaps the leader if it has exited, without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        match self.child.try_wait().map_err(SupervisorError::WaitError)? {
            Some(status) => {
                self.mark_terminated(status);
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Blocks until the leader exits.
    pub fn wait(&mut self) -> Result<ExitStatus, SupervisorError> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let status = self.child.wait().map_err(SupervisorError::WaitError)?;
        self.mark_terminated(status);
        Ok(status)
    }

    /// Delivers `signal` to the task (its group in process-group mode).
    ///
    /// A task that already exited counts as shut down.
    pub fn graceful_shutdown(&mut self, signal: Signal) -> Result<(), SupervisorError> {
        if self.try_wait()?.is_some() {
            debug!("Task {} already exited; nothing to signal", self.pid);
            return Ok(());
        }

        let result = if self.process_group {
            signal::killpg(self.pid, signal)
        } else {
            signal::kill(self.pid, signal)
        };

        match result {
            Ok(()) => {
                info!("Sent {signal} to task {}", self.pid);
                self.state = ProcessState::ShuttingDown;
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!("Task {} vanished before {signal} was delivered", self.pid);
                Ok(())
            }
            Err(errno) => Err(SupervisorError::ShutdownFailed(errno)),
        }
    }

    /// Kills the task unconditionally and reaps it.
    ///
    /// In process-group mode the whole group gets SIGKILL, even when the leader
    /// is already gone, so descendants left in the group die too. Safe to call
    /// repeatedly and after [`graceful_shutdown`](Self::graceful_shutdown).
    pub fn force_cleanup(&mut self) -> Result<(), SupervisorError> {
        if self.process_group {
            self.kill_group()?;
        } else if self.exit_status.is_none() {
            self.kill_leader()?;
        }

        if self.exit_status.is_none() {
            self.wait()?;
        }
        Ok(())
    }

    fn kill_group(&mut self) -> Result<(), SupervisorError> {
        if self.group_killed {
            return Ok(());
        }
        match signal::killpg(self.pid, Signal::SIGKILL) {
            Ok(()) => debug!("Sent SIGKILL to process group {}", self.pid),
            Err(Errno::ESRCH) => debug!("Process group {} already empty", self.pid),
            Err(errno) => {
                return Err(SupervisorError::CleanupFailed(io::Error::from_raw_os_error(
                    errno as i32,
                )));
            }
        }
        self.group_killed = true;
        Ok(())
    }

    fn kill_leader(&mut self) -> Result<(), SupervisorError> {
        match self.child.kill() {
            Ok(()) => {
                debug!("Sent SIGKILL to task {}", self.pid);
                Ok(())
            }
            Err(err) if is_already_gone(&err) => Ok(()),
            Err(err) => Err(SupervisorError::CleanupFailed(err)),
        }
    }

    fn mark_terminated(&mut self, status: ExitStatus) {
        if self.exit_status.is_none() {
            debug!("Task {} exited with {status}", self.pid);
        }
        self.exit_status = Some(status);
        self.state = ProcessState::Terminated;
    }
}

/// Errors meaning the process no longer exists.
fn is_already_gone(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH) || err.kind() == io::ErrorKind::InvalidInput
}

impl Drop for TaskProcess {
    // A reaped leader can still leave descendants running in its group.
    fn drop(&mut self) {
        let leftovers = self.exit_status.is_none() || (self.process_group && !self.group_killed);
        if leftovers
            && let Err(err) = self.force_cleanup()
        {
            warn!("Failed to clean up task {} on drop: {err}", self.pid);
        }
    }
}
