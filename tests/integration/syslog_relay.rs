#[path = "common/mod.rs"]
mod common;

use std::{
    io::{self, Write},
    net::{TcpStream, UdpSocket},
    sync::mpsc,
    thread,
    time::Duration,
};

use common::{SharedBuf, single_free_port, wait_until, wide_context};
use logvisor::{
    config::{OverflowPolicy, SyslogConfig, Transport},
    error::SupervisorError,
    process::TaskCommand,
    supervisor::Supervisor,
    syslog::{Forwarder, Severity},
};

/// Sink that takes a while per write, so the relay falls behind its senders.
struct SlowSink(SharedBuf);

impl Write for SlowSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        thread::sleep(Duration::from_millis(2));
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn relay_supervisor(config: SyslogConfig) -> (Supervisor, SharedBuf, SharedBuf) {
    let supervisor = Supervisor::new("relay-test", TaskCommand::new("true")).with_syslog_config(config);
    (supervisor, SharedBuf::default(), SharedBuf::default())
}

#[test]
fn launch_without_context_fails() {
    let (mut supervisor, out, err) = relay_supervisor(SyslogConfig::default());

    let result = supervisor.launch_syslog_server(Box::new(out), Box::new(err));

    assert!(matches!(result, Err(SupervisorError::ContextNotSet)));
    assert!(supervisor.syslog_state().is_none());
    assert!(supervisor.stop_syslog_server().is_none());
}

#[test]
fn address_reports_the_single_port_in_range() {
    let (port, context) = single_free_port(false);
    let (mut supervisor, out, err) = relay_supervisor(SyslogConfig::default());
    supervisor.set_context(context);

    let state = supervisor
        .launch_syslog_server(Box::new(out), Box::new(err))
        .unwrap();

    assert_eq!(state.address(), format!("tcp://127.0.0.1:{port}"));
    assert_eq!(state.socket_addr().port(), port);
    supervisor.stop_syslog_server().unwrap();
}

#[test]
fn occupied_range_reports_port_unavailable() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();
    let (mut supervisor, out, err) = relay_supervisor(SyslogConfig::default());
    supervisor.set_context(logvisor::config::ExecutionContext::new(port, port).unwrap());

    let result = supervisor.launch_syslog_server(Box::new(out), Box::new(err));

    match result {
        Err(SupervisorError::PortUnavailable { lower, upper }) => {
            assert_eq!((lower, upper), (port, port));
        }
        other => panic!("expected PortUnavailable, got {other:?}"),
    }
}

#[test]
fn second_launch_is_rejected() {
    let (mut supervisor, out, err) = relay_supervisor(SyslogConfig::default());
    supervisor.set_context(wide_context());
    supervisor
        .launch_syslog_server(Box::new(out.clone()), Box::new(err.clone()))
        .unwrap();

    let again = supervisor.launch_syslog_server(Box::new(out), Box::new(err));

    assert!(matches!(again, Err(SupervisorError::SyslogAlreadyRunning(_))));
    supervisor.stop_syslog_server().unwrap();
}

#[test]
fn tcp_frames_are_routed_by_severity() {
    let (mut supervisor, out, err) = relay_supervisor(SyslogConfig::default());
    supervisor.set_context(wide_context());
    let state = supervisor
        .launch_syslog_server(Box::new(out.clone()), Box::new(err.clone()))
        .unwrap();

    let mut forwarder = Forwarder::connect(state.address()).unwrap();
    forwarder.send(Severity::Error, b"first failure").unwrap();
    forwarder.send(Severity::Warning, b"just a warning").unwrap();
    forwarder.send(Severity::Informational, b"hello").unwrap();
    forwarder.send(Severity::Error, b"second failure").unwrap();
    forwarder.flush().unwrap();
    drop(forwarder);

    wait_until("relayed output", || {
        out.contents().lines().count() == 2 && err.contents().lines().count() == 2
    });
    let stats = supervisor.stop_syslog_server().unwrap();

    assert_eq!(err.contents(), "first failure\nsecond failure\n");
    assert_eq!(out.contents(), "just a warning\nhello\n");
    assert_eq!(stats.stdout_messages, 2);
    assert_eq!(stats.stderr_messages, 2);
    assert_eq!(stats.dropped_messages, 0);
}

#[test]
fn udp_datagrams_are_relayed() {
    let config = SyslogConfig {
        transport: Transport::Udp,
        ..SyslogConfig::default()
    };
    let (mut supervisor, out, err) = relay_supervisor(config);
    supervisor.set_context(wide_context());
    let state = supervisor
        .launch_syslog_server(Box::new(out.clone()), Box::new(err.clone()))
        .unwrap();
    assert!(state.address().starts_with("udp://127.0.0.1:"));

    let mut forwarder = Forwarder::connect(state.address()).unwrap();
    forwarder.send(Severity::Notice, b"over udp").unwrap();
    forwarder.send(Severity::Error, b"udp failure").unwrap();

    wait_until("relayed datagrams", || {
        out.contents() == "over udp\n" && err.contents() == "udp failure\n"
    });
    supervisor.stop_syslog_server().unwrap();
}

#[test]
fn malformed_frames_do_not_stop_the_connection() {
    let (mut supervisor, out, err) = relay_supervisor(SyslogConfig::default());
    supervisor.set_context(wide_context());
    let state = supervisor
        .launch_syslog_server(Box::new(out.clone()), Box::new(err.clone()))
        .unwrap();

    let mut stream = TcpStream::connect(state.socket_addr()).unwrap();
    stream
        .write_all(b"no priority here\n<999>out of range\n\n<11>still relayed\n")
        .unwrap();
    stream
        .write_all(b"<14>Oct 11 22:14:15 myhost app[42]: bsd style\n")
        .unwrap();

    wait_until("frames after the malformed ones", || {
        err.contents() == "still relayed\n" && out.contents() == "bsd style\n"
    });
    drop(stream);
    supervisor.stop_syslog_server().unwrap();
}

#[test]
fn concurrent_connections_are_all_collected() {
    let (mut supervisor, out, err) = relay_supervisor(SyslogConfig::default());
    supervisor.set_context(wide_context());
    let state = supervisor
        .launch_syslog_server(Box::new(out.clone()), Box::new(err.clone()))
        .unwrap();

    let writers: Vec<_> = (0..4)
        .map(|id| {
            let address = state.address().to_string();
            std::thread::spawn(move || {
                let mut forwarder = Forwarder::connect(&address).unwrap();
                for n in 0..25 {
                    forwarder
                        .send(
                            Severity::Informational,
                            format!("writer {id} line {n}").as_bytes(),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    wait_until("all lines from every writer", || {
        out.contents().lines().count() == 100
    });
    let stats = supervisor.stop_syslog_server().unwrap();

    assert_eq!(stats.stdout_messages, 100);
    assert!(err.contents().is_empty());
    // Each line is written whole, never interleaved with another connection's.
    for line in out.contents().lines() {
        assert!(line.starts_with("writer "), "mangled line: {line:?}");
        assert!(line.contains(" line "), "mangled line: {line:?}");
    }
}

#[test]
fn task_output_reaches_the_sinks_through_the_environment() {
    let bin = env!("CARGO_BIN_EXE_logvisor");
    let script = format!(
        "echo hello | '{bin}' forward && echo boom | '{bin}' forward --severity err"
    );
    let mut supervisor = Supervisor::new("echo-task", TaskCommand::shell(&script))
        .with_syslog_config(SyslogConfig {
            overflow: OverflowPolicy::Block,
            ..SyslogConfig::default()
        });
    supervisor.set_context(wide_context());
    let (out, err) = (SharedBuf::default(), SharedBuf::default());
    supervisor
        .launch_syslog_server(Box::new(out.clone()), Box::new(err.clone()))
        .unwrap();
    supervisor.create_process_group().unwrap();
    supervisor.launch().unwrap();

    let status = supervisor.wait().unwrap();
    assert!(status.success());

    wait_until("task messages", || {
        out.contents() == "hello\n" && err.contents() == "boom\n"
    });
    supervisor.stop_syslog_server().unwrap();
}

#[test]
fn frames_queued_at_stop_are_still_delivered() {
    let (mut supervisor, out, err) = relay_supervisor(SyslogConfig::default());
    supervisor.set_context(wide_context());
    let state = supervisor
        .launch_syslog_server(Box::new(out.clone()), Box::new(err.clone()))
        .unwrap();

    let mut forwarder = Forwarder::connect(state.address()).unwrap();
    for n in 0..500 {
        forwarder
            .send(Severity::Notice, format!("queued {n}").as_bytes())
            .unwrap();
    }
    forwarder.flush().unwrap();
    drop(forwarder);

    let stats = supervisor.stop_syslog_server().unwrap();

    assert_eq!(stats.stdout_messages, 500);
    let contents = out.contents();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 500);
    assert_eq!(lines[0], "queued 0");
    assert_eq!(lines[499], "queued 499");
    assert!(err.contents().is_empty());
}

#[test]
fn udp_stop_returns_while_the_socket_is_flooded() {
    let config = SyslogConfig {
        transport: Transport::Udp,
        capacity: 1,
        overflow: OverflowPolicy::Block,
        ..SyslogConfig::default()
    };
    let (mut supervisor, out, err) = relay_supervisor(config);
    supervisor.set_context(wide_context());
    let state = supervisor
        .launch_syslog_server(Box::new(SlowSink(out.clone())), Box::new(SlowSink(err)))
        .unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    for n in 0..20_000 {
        // Datagrams beyond the receive buffer are dropped by the kernel, wake-up included.
        let _ = client.send_to(format!("<14>flood {n}").as_bytes(), state.socket_addr());
    }

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = done_tx.send(supervisor.stop_syslog_server());
    });
    let stats = done_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("stopping a flooded relay must not hang")
        .unwrap();

    assert!(stats.stdout_messages > 0);
    assert_eq!(stats.stdout_messages as usize, out.contents().lines().count());
}
