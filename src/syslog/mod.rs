//! Embedded syslog relay: listener, bounded channel and collector for one task.
//!
//! A relay binds a listener inside the task's port range, parses every
//! frame it receives into a [`SyslogMessage`] and hands it through a bounded
//! channel to a single [`Collector`] thread, which writes error-severity
//! messages to the stderr sink and everything else to the stdout sink.

mod channel;
mod collector;
mod forwarder;
mod message;
mod server;

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::JoinHandle,
};

use tracing::{debug, warn};

pub use channel::{LogSender, channel};
pub use collector::{
    Collector, CollectorStats, LogStream, Sink, SinkErrorHandler, WarnOnSinkError,
};
pub use forwarder::Forwarder;
pub use message::{Severity, SyslogMessage, parse};
pub use server::ServerHandle;

use crate::{
    config::{ExecutionContext, SyslogConfig, Transport},
    error::SupervisorError,
    ports,
};

/// Where a running relay accepts log traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogServerState {
    address: String,
    transport: Transport,
    socket_addr: SocketAddr,
}

impl SyslogServerState {
    fn new(transport: Transport, socket_addr: SocketAddr) -> Self {
        Self {
            address: format!("{transport}://{socket_addr}"),
            transport,
            socket_addr,
        }
    }

    /// `"<network>://<host:port>"`, the only handshake a forwarder needs.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.socket_addr
    }
}

impl fmt::Display for SyslogServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// A listener thread and a collector thread wired through one bounded channel.
pub struct SyslogRelay {
    state: SyslogServerState,
    server: Option<ServerHandle>,
    collector: Option<JoinHandle<CollectorStats>>,
    dropped: Arc<AtomicU64>,
}

impl SyslogRelay {
    /// Allocates a port, then starts the server and the collector.
    ///
    /// Returns once both threads are running. Nothing stays open on failure.
    pub fn launch(
        context: &ExecutionContext,
        config: &SyslogConfig,
        collector: Collector,
    ) -> Result<Self, SupervisorError> {
        let listener = ports::allocate(
            config.transport,
            config.bind_address,
            context.port_lower_bound(),
            context.port_upper_bound(),
        )?;
        let state = SyslogServerState::new(listener.transport(), listener.local_addr()?);
        debug!("Launching syslog server on addr: {state}");

        let (sender, rx) = channel(config.capacity, config.overflow);
        let dropped = sender.dropped_counter();
        let server = ServerHandle::start(listener, sender)?;
        let collector = match collector.spawn(rx) {
            Ok(handle) => handle,
            Err(err) => {
                server.stop();
                return Err(SupervisorError::Io(err));
            }
        };

        Ok(Self {
            state,
            server: Some(server),
            collector: Some(collector),
            dropped,
        })
    }

    pub fn state(&self) -> &SyslogServerState {
        &self.state
    }

    /// Stops the listener, lets the collector drain the channel and returns its totals.
    pub fn stop(mut self) -> CollectorStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> CollectorStats {
        if let Some(server) = self.server.take() {
            server.stop();
        }

        let mut stats = match self.collector.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                warn!("Log collector for {} panicked", self.state);
                CollectorStats::default()
            }
            None => CollectorStats::default(),
        };
        stats.dropped_messages = self.dropped.load(Ordering::Relaxed);
        stats
    }
}

impl Drop for SyslogRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}
