#[path = "common/mod.rs"]
mod common;

use std::{thread, time::Duration};

use common::{is_process_alive, wait_for_pid_file, wait_for_process_exit};
use logvisor::{
    error::SupervisorError,
    process::{ProcessState, TaskCommand},
    supervisor::Supervisor,
};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use tempfile::tempdir;

fn spawn_with_background_child(process_group: bool) -> (Supervisor, u32, u32, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let pid_file = dir.path().join("descendant.pid");
    let script = format!("sleep 60 & echo $! > '{}'; wait", pid_file.display());

    let mut supervisor = Supervisor::new("tree", TaskCommand::shell(&script));
    if process_group {
        supervisor.create_process_group().unwrap();
    }
    let leader = supervisor.launch().unwrap();
    let descendant = wait_for_pid_file(&pid_file);
    assert!(is_process_alive(descendant));

    (supervisor, leader, descendant, dir)
}

#[test]
fn force_cleanup_kills_the_whole_group() {
    let (mut supervisor, leader, descendant, _dir) = spawn_with_background_child(true);

    supervisor.force_cleanup().unwrap();

    assert_eq!(supervisor.state(), ProcessState::Terminated);
    assert!(!is_process_alive(leader));
    wait_for_process_exit(descendant);
}

#[test]
fn force_cleanup_is_idempotent() {
    let (mut supervisor, _leader, descendant, _dir) = spawn_with_background_child(true);

    supervisor.force_cleanup().unwrap();
    supervisor.force_cleanup().unwrap();
    wait_for_process_exit(descendant);
    supervisor.force_cleanup().unwrap();
}

#[test]
fn without_a_group_descendants_survive_cleanup() {
    let (mut supervisor, leader, descendant, _dir) = spawn_with_background_child(false);

    supervisor.force_cleanup().unwrap();

    assert!(!is_process_alive(leader));
    thread::sleep(Duration::from_millis(200));
    assert!(is_process_alive(descendant));

    kill(Pid::from_raw(descendant as i32), Signal::SIGKILL).unwrap();
    wait_for_process_exit(descendant);
}

#[test]
fn dropping_a_reaped_group_leader_kills_descendants() {
    let dir = tempdir().unwrap();
    let pid_file = dir.path().join("descendant.pid");
    let script = format!("sleep 60 & echo $! > '{}'", pid_file.display());

    let mut supervisor = Supervisor::new("orphaning", TaskCommand::shell(&script));
    supervisor.create_process_group().unwrap();
    supervisor.launch().unwrap();
    let descendant = wait_for_pid_file(&pid_file);

    assert!(supervisor.wait().unwrap().success());
    assert!(is_process_alive(descendant));

    drop(supervisor);
    wait_for_process_exit(descendant);
}

#[test]
fn graceful_shutdown_signals_the_group() {
    let dir = tempdir().unwrap();
    let pid_file = dir.path().join("descendant.pid");
    let script = format!("sleep 60 & echo $! > '{}'; wait", pid_file.display());
    let command = TaskCommand::shell(&script).kill_signal(Signal::SIGTERM);

    let mut supervisor = Supervisor::new("graceful", command);
    supervisor.create_process_group().unwrap();
    supervisor.launch().unwrap();
    let descendant = wait_for_pid_file(&pid_file);

    supervisor.graceful_shutdown().unwrap();
    assert_eq!(supervisor.state(), ProcessState::ShuttingDown);

    let status = supervisor.wait().unwrap();
    assert!(!status.success());
    wait_for_process_exit(descendant);
}

#[test]
fn graceful_shutdown_after_exit_succeeds() {
    let mut supervisor = Supervisor::new("short", TaskCommand::shell("exit 0"));
    supervisor.create_process_group().unwrap();
    supervisor.launch().unwrap();
    assert!(supervisor.wait().unwrap().success());

    supervisor.graceful_shutdown().unwrap();
    supervisor.force_cleanup().unwrap();
    assert_eq!(supervisor.state(), ProcessState::Terminated);
}

#[test]
fn shutdown_escalates_for_stubborn_tasks() {
    let command = TaskCommand::shell("trap '' INT; sleep 60 & wait; sleep 60");
    let mut supervisor = Supervisor::new("stubborn", command);
    supervisor.create_process_group().unwrap();
    let pid = supervisor.launch().unwrap();
    thread::sleep(Duration::from_millis(100));

    let status = supervisor.shutdown(Duration::from_millis(300)).unwrap();

    assert!(!status.success());
    assert!(!is_process_alive(pid));
}

#[test]
fn create_process_group_after_launch_is_rejected() {
    let mut supervisor = Supervisor::new("late", TaskCommand::new("sleep").arg("5"));
    supervisor.launch().unwrap();

    let result = supervisor.create_process_group();

    assert!(matches!(result, Err(SupervisorError::AlreadyStarted(_))));
    supervisor.force_cleanup().unwrap();
}
