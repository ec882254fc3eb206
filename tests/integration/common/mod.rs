#![allow(dead_code)]

use std::{
    fs,
    io::{self, Write},
    net::{TcpListener, UdpSocket},
    path::Path,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use logvisor::config::ExecutionContext;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

/// In-memory sink that can be inspected while the collector still owns a clone.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Context covering a single port that was free a moment ago.
pub fn single_free_port(udp: bool) -> (u16, ExecutionContext) {
    let port = if udp {
        UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    } else {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    };
    (port, ExecutionContext::new(port, port).unwrap())
}

/// A wide range so concurrent tests rarely contend for the same port.
pub fn wide_context() -> ExecutionContext {
    ExecutionContext::new(20000, 29999).unwrap()
}

pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if condition() {
            return;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for {what}");
        }

        thread::sleep(Duration::from_millis(25));
    }
}

pub fn wait_for_pid_file(path: &Path) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && let Ok(pid) = content.trim().parse::<u32>()
        {
            return pid;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for PID in {:?}", path);
        }

        thread::sleep(Duration::from_millis(50));
    }
}

/// A zombie counts as dead: it was killed and only waits for its new parent to reap it.
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::everything(),
    );
    match system.process(pid) {
        Some(process) => !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        None => false,
    }
}

pub fn wait_for_process_exit(pid: u32) {
    wait_until(&format!("PID {pid} to exit"), || !is_process_alive(pid));
}
