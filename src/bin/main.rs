use std::{
    error::Error,
    io::{self, BufRead},
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use logvisor::{
    cli::{Cli, Commands, RunArgs, parse_args},
    config::{TaskConfig, load_config, parse_duration, parse_signal},
    constants::{DEFAULT_CONFIG_FILE, PROCESS_POLL_INTERVAL},
    logs::open_sink,
    process::TaskCommand,
    supervisor::Supervisor,
    syslog::{Forwarder, LogStream, Severity},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    match args.command {
        Commands::Run(run) => {
            let code = run_task(run)?;
            std::process::exit(code);
        }
        Commands::Forward {
            address,
            severity,
            facility,
        } => forward_stdin(&address, severity, facility)?,
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::default().add_directive(level.filter().into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Task stdout may be relayed to our stdout; keep diagnostics on stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_task_config(path: &str) -> Result<TaskConfig, Box<dyn Error>> {
    let candidate = Path::new(path);
    if candidate.exists() {
        info!("Loading task file {}", candidate.display());
        return Ok(load_config(candidate)?);
    }
    if path != DEFAULT_CONFIG_FILE {
        return Err(format!("task file '{path}' not found").into());
    }
    debug!("No task file at {path}; using command-line settings only");
    Ok(TaskConfig::default())
}

fn run_task(args: RunArgs) -> Result<i32, Box<dyn Error>> {
    let config = load_task_config(&args.config)?;

    let name = args
        .name
        .clone()
        .unwrap_or_else(|| config.task_name().to_string());
    let context = match args.port_range {
        Some(context) => context,
        None => config.execution_context()?,
    };

    let mut syslog = config.syslog_config()?;
    if let Some(transport) = args.transport {
        syslog.transport = transport;
    }
    if let Some(capacity) = args.buffer {
        syslog.capacity = capacity.max(1);
    }
    if let Some(overflow) = args.overflow {
        syslog.overflow = overflow;
    }

    let kill_timeout = match args.kill_timeout.as_deref() {
        Some(raw) => parse_duration(raw)?,
        None => config.kill_timeout()?,
    };
    let command = build_command(&args, &config)?;
    let process_group = !args.no_process_group && config.process_group();

    let stdout_path = sink_path(args.stdout_log.as_deref(), config.stdout_log.as_deref(), &config);
    let stderr_path = sink_path(args.stderr_log.as_deref(), config.stderr_log.as_deref(), &config);
    let stdout = open_sink(stdout_path.as_deref(), LogStream::Stdout)?;
    let stderr = open_sink(stderr_path.as_deref(), LogStream::Stderr)?;

    let mut supervisor = Supervisor::new(name.clone(), command).with_syslog_config(syslog);
    supervisor.set_context(context);
    supervisor.launch_syslog_server(stdout, stderr)?;
    if process_group {
        supervisor.create_process_group()?;
    }

    let stop_requested = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&stop_requested);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    }

    supervisor.launch()?;

    let status = loop {
        if let Some(status) = supervisor.try_wait()? {
            break status;
        }
        if stop_requested.load(Ordering::SeqCst) {
            info!("Shutdown requested; stopping task '{name}' (grace {kill_timeout:?})");
            break supervisor.shutdown(kill_timeout)?;
        }
        thread::sleep(PROCESS_POLL_INTERVAL);
    };
    info!("Task '{name}' exited with {status}");

    // Reap anything the task left behind in its group.
    if let Err(err) = supervisor.force_cleanup() {
        warn!("Failed to clean up leftovers of task '{name}': {err}");
    }

    if let Some(stats) = supervisor.stop_syslog_server() {
        debug!(
            "Relayed {} messages for '{name}' ({} dropped, {} write errors)",
            stats.received(),
            stats.dropped_messages,
            stats.write_errors
        );
    }

    Ok(exit_code(status))
}

fn build_command(args: &RunArgs, config: &TaskConfig) -> Result<TaskCommand, Box<dyn Error>> {
    let mut command = match args.task.split_first() {
        Some((program, rest)) => {
            let mut command = TaskCommand::new(program).args(rest);
            if let Some(vars) = &config.env {
                for (key, value) in vars {
                    command = command.env(key, value);
                }
            }
            if let Some(dir) = &config.working_dir {
                command = command.current_dir(config.resolve_path(dir));
            }
            if let Some(signal) = config.kill_signal()? {
                command = command.kill_signal(signal);
            }
            command
        }
        None => config.task_command()?,
    };

    if let Some(raw) = args.kill_signal.as_deref() {
        command = command.kill_signal(parse_signal(raw)?);
    }
    Ok(command)
}

fn sink_path(flag: Option<&str>, file: Option<&str>, config: &TaskConfig) -> Option<PathBuf> {
    match (flag, file) {
        (Some(path), _) => Some(PathBuf::from(path)),
        (None, Some(path)) => Some(config.resolve_path(path)),
        (None, None) => None,
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn forward_stdin(address: &str, severity: Severity, facility: u8) -> Result<(), Box<dyn Error>> {
    let mut forwarder = Forwarder::connect(address)?.with_facility(facility);
    let stdin = io::stdin();

    for line in stdin.lock().split(b'\n') {
        let line = line?;
        let line = line.strip_suffix(b"\r").unwrap_or(&line);
        forwarder.send(severity, line)?;
    }
    forwarder.flush()?;
    Ok(())
}
