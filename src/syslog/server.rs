//! Syslog listener: accepts streams or datagrams and enqueues parsed messages.
use std::{
    collections::HashMap,
    io::{self, BufRead, BufReader},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, trace, warn};

use super::{channel::LogSender, message};
use crate::{config::Transport, constants::MAX_FRAME_SIZE, ports::Listener};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);
/// Upper bound on how long a blocked `accept`/`recv_from` goes without checking the stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Datagrams still queued after a stop request are relayed for at most this long.
const DATAGRAM_DRAIN_LIMIT: Duration = Duration::from_secs(5);
/// How long open connections get to deliver buffered frames once stop is requested.
const CONNECTION_DRAIN_GRACE: Duration = Duration::from_millis(250);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Connection {
    stream: TcpStream,
    handle: Option<JoinHandle<()>>,
}

type ConnectionMap = Arc<Mutex<HashMap<u64, Connection>>>;

/// Running syslog server. Stopping it (or dropping it) closes the listener,
/// closes open connections and joins every server thread.
pub struct ServerHandle {
    local_addr: SocketAddr,
    transport: Transport,
    stop: Arc<AtomicBool>,
    connections: ConnectionMap,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Starts serving `listener` on a new thread, feeding `sender`.
    pub fn start(listener: Listener, sender: LogSender) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let transport = listener.transport();
        let stop = Arc::new(AtomicBool::new(false));
        let connections: ConnectionMap = Arc::new(Mutex::new(HashMap::new()));
        poll_stop_flag(&listener)?;

        let thread = {
            let stop = Arc::clone(&stop);
            let connections = Arc::clone(&connections);
            thread::Builder::new()
                .name("syslog-server".into())
                .spawn(move || match listener {
                    Listener::Tcp(listener) => accept_loop(listener, sender, stop, connections),
                    Listener::Udp(socket) => recv_loop(socket, sender, stop),
                })?
        };

        debug!("Syslog server listening on {transport}://{local_addr}");
        Ok(Self {
            local_addr,
            transport,
            stop,
            connections,
            thread: Some(thread),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Listener transport.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Stops the server and waits for its threads to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);

        if self.transport == Transport::Udp
            && let Err(err) = self.wake()
        {
            debug!(
                "Failed to wake syslog server on {}://{}: {err}; waiting for its next poll",
                self.transport, self.local_addr
            );
        }
        if thread.join().is_err() {
            warn!("Syslog server thread panicked");
        }

        self.close_connections();
        debug!("Syslog server on {}://{} stopped", self.transport, self.local_addr);
    }

    /// Sends the empty datagram that ends a pending `recv_from` early. The
    /// receive loop polls the stop flag anyway, so a lost datagram only costs
    /// one poll interval.
    fn wake(&self) -> io::Result<()> {
        let target = SocketAddr::new(reachable_ip(self.local_addr.ip()), self.local_addr.port());
        let bind_ip = match target {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind((bind_ip, 0))?;
        socket.send_to(&[], target).map(drop)
    }

    fn close_connections(&self) {
        let deadline = Instant::now() + CONNECTION_DRAIN_GRACE;
        while Instant::now() < deadline && !lock(&self.connections).is_empty() {
            thread::sleep(DRAIN_POLL_INTERVAL);
        }

        let remaining: Vec<Connection> = lock(&self.connections).drain().map(|(_, c)| c).collect();
        for mut connection in remaining {
            let _ = connection.stream.shutdown(Shutdown::Both);
            if let Some(handle) = connection.handle.take()
                && handle.join().is_err()
            {
                warn!("Syslog connection thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(connections: &ConnectionMap) -> std::sync::MutexGuard<'_, HashMap<u64, Connection>> {
    connections
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Makes the listener return to its loop at least every `STOP_POLL_INTERVAL`.
fn poll_stop_flag(listener: &Listener) -> io::Result<()> {
    match listener {
        Listener::Tcp(listener) => listener.set_nonblocking(true),
        Listener::Udp(socket) => socket.set_read_timeout(Some(STOP_POLL_INTERVAL)),
    }
}

fn reachable_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        other => other,
    }
}

/// Polls the non-blocking listener until stopped. The flag is read before each
/// `accept`, so every connection queued ahead of the stop request is still served.
fn accept_loop(
    listener: TcpListener,
    sender: LogSender,
    stop: Arc<AtomicBool>,
    connections: ConnectionMap,
) {
    let mut next_id = 0u64;

    loop {
        let stopping = stop.load(Ordering::SeqCst);
        match listener.accept() {
            Ok((stream, peer)) => {
                register_connection(stream, peer, next_id, &sender, &connections);
                next_id += 1;
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if stopping {
                    break;
                }
                thread::sleep(STOP_POLL_INTERVAL);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) if stopping => {
                debug!("Stopped draining syslog connections: {err}");
                break;
            }
            Err(err) => {
                warn!("Syslog server failed to accept connection: {err}");
                thread::sleep(ACCEPT_ERROR_BACKOFF);
            }
        }
    }
}

fn register_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    sender: &LogSender,
    connections: &ConnectionMap,
) {
    if let Err(err) = stream.set_nonblocking(false) {
        warn!("Dropping syslog connection from {peer}: {err}");
        return;
    }
    let registry_stream = match stream.try_clone() {
        Ok(clone) => clone,
        Err(err) => {
            warn!("Failed to register syslog connection from {peer}: {err}");
            return;
        }
    };

    // Hold the registry lock across the spawn so the reader cannot remove its
    // entry before it is inserted.
    let mut registry = lock(connections);
    let conn_sender = sender.clone();
    let conn_registry = Arc::clone(connections);
    let spawned = thread::Builder::new()
        .name(format!("syslog-conn-{peer}"))
        .spawn(move || {
            serve_connection(stream, peer, conn_sender);
            lock(&conn_registry).remove(&id);
        });

    match spawned {
        Ok(handle) => {
            trace!("Accepted syslog connection {id} from {peer}");
            registry.insert(
                id,
                Connection {
                    stream: registry_stream,
                    handle: Some(handle),
                },
            );
        }
        Err(err) => warn!("Failed to spawn reader for syslog connection from {peer}: {err}"),
    }
}

fn serve_connection(stream: TcpStream, peer: SocketAddr, sender: LogSender) {
    let mut reader = BufReader::new(stream);
    let mut frame = Vec::with_capacity(256);

    loop {
        frame.clear();
        match read_frame(&mut reader, &mut frame) {
            Ok(0) => break,
            Ok(_) => {
                if !deliver(&sender, &frame, peer) {
                    break;
                }
            }
            Err(err) => {
                debug!("Syslog connection from {peer} closed with error: {err}");
                break;
            }
        }
    }
    trace!("Syslog connection from {peer} finished");
}

/// Receives until stopped. The socket has a read timeout, so a stop request is
/// seen even when the wake-up datagram never arrives. After the request the
/// socket turns non-blocking and queued datagrams are relayed until it runs
/// dry, the wake-up shows up, or `DATAGRAM_DRAIN_LIMIT` passes.
fn recv_loop(socket: UdpSocket, sender: LogSender, stop: Arc<AtomicBool>) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let mut drain_deadline: Option<Instant> = None;

    loop {
        match drain_deadline {
            None if stop.load(Ordering::SeqCst) => {
                drain_deadline = Some(Instant::now() + DATAGRAM_DRAIN_LIMIT);
                if let Err(err) = socket.set_nonblocking(true) {
                    warn!("Failed to drain queued syslog datagrams: {err}");
                    break;
                }
            }
            Some(deadline) if Instant::now() >= deadline => {
                warn!("Syslog datagrams still queued after {DATAGRAM_DRAIN_LIMIT:?}; dropping them");
                break;
            }
            _ => {}
        }
        let draining = drain_deadline.is_some();

        match socket.recv_from(&mut buf) {
            Ok((0, _)) if draining => break,
            Ok((len, peer)) => {
                if !deliver(&sender, &buf[..len], peer) {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                if draining {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                if draining {
                    break;
                }
                debug!("Syslog datagram receive failed: {err}");
                thread::sleep(ACCEPT_ERROR_BACKOFF);
            }
        }
    }
}

/// Reads one newline-terminated frame, keeping at most `MAX_FRAME_SIZE` bytes of it.
/// Returns the number of bytes consumed from the stream; `0` means EOF.
fn read_frame<R: BufRead>(reader: &mut R, frame: &mut Vec<u8>) -> io::Result<usize> {
    let mut consumed = 0;
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if available.is_empty() {
            return Ok(consumed);
        }

        let (used, done) = match available.iter().position(|b| *b == b'\n') {
            Some(idx) => (idx + 1, true),
            None => (available.len(), false),
        };
        let room = MAX_FRAME_SIZE.saturating_sub(frame.len());
        frame.extend_from_slice(&available[..used.min(room)]);
        reader.consume(used);
        consumed += used;

        if done {
            return Ok(consumed);
        }
    }
}

/// Parses and enqueues one frame. Returns `false` when the collector is gone.
fn deliver(sender: &LogSender, frame: &[u8], peer: SocketAddr) -> bool {
    if frame.iter().all(u8::is_ascii_whitespace) {
        return true;
    }
    match message::parse(frame) {
        Ok(message) => sender.send(message),
        Err(err) => {
            debug!("Discarding malformed syslog frame from {peer}: {err}");
            true
        }
    }
}
