#[path = "common/mod.rs"]
mod common;

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::tempdir;

const BIN: &str = env!("CARGO_BIN_EXE_logvisor");

#[test]
fn run_relays_task_output_to_log_files() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let out_log = dir.join("logs/task.out");
    let err_log = dir.join("logs/task.err");

    cargo_bin_cmd!("logvisor")
        .current_dir(dir)
        .env("LOGVISOR_BIN", BIN)
        .arg("run")
        .arg("--port-range")
        .arg("20000-29999")
        .arg("--stdout-log")
        .arg(&out_log)
        .arg("--stderr-log")
        .arg(&err_log)
        .arg("--")
        .arg("sh")
        .arg("-c")
        .arg(
            "printf 'one\\ntwo\\n' | \"$LOGVISOR_BIN\" forward; \
             echo broken | \"$LOGVISOR_BIN\" forward --severity err",
        )
        .assert()
        .success();

    assert_eq!(fs::read_to_string(&out_log).unwrap(), "one\ntwo\n");
    assert_eq!(fs::read_to_string(&err_log).unwrap(), "broken\n");
}

#[test]
fn run_reads_the_task_file() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = dir.join("logvisor.yaml");
    fs::write(
        &config,
        r#"
name: from-file
command: 'echo configured | $LOGVISOR_BIN forward --severity warning'
ports:
  lower: 20000
  upper: 29999
syslog:
  transport: udp
stdout_log: out/task.log
"#,
    )
    .unwrap();

    cargo_bin_cmd!("logvisor")
        .current_dir(dir)
        .env("LOGVISOR_BIN", BIN)
        .arg("run")
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    common::wait_until("udp line in the log file", || {
        fs::read_to_string(dir.join("out/task.log")).is_ok_and(|c| c == "configured\n")
    });
}

#[test]
fn run_propagates_the_task_exit_code() {
    cargo_bin_cmd!("logvisor")
        .args(["run", "--port-range", "20000-29999", "--", "sh", "-c", "exit 3"])
        .assert()
        .code(3);
}

#[test]
fn run_fails_when_the_task_cannot_start() {
    cargo_bin_cmd!("logvisor")
        .args([
            "run",
            "--name",
            "ghost",
            "--port-range",
            "20000-29999",
            "--",
            "/definitely/not/a/binary",
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains("ghost"));
}

#[test]
fn run_rejects_missing_task_file() {
    let temp = tempdir().expect("failed to create tempdir");

    cargo_bin_cmd!("logvisor")
        .current_dir(temp.path())
        .args(["run", "--config", "nope.yaml"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("not found"));
}

#[test]
fn forward_rejects_invalid_address() {
    cargo_bin_cmd!("logvisor")
        .env_remove("LOGVISOR_SYSLOG_ADDR")
        .args(["forward", "--address", "carrier-pigeon://nowhere"])
        .write_stdin("hello\n")
        .assert()
        .failure()
        .stderr(predicates::str::contains("carrier-pigeon://nowhere"));
}
