//! Listener port allocation inside a bounded range.
use std::{
    fmt, io,
    net::{IpAddr, SocketAddr, TcpListener, UdpSocket},
};

use tracing::{debug, trace};

use crate::{config::Transport, error::SupervisorError};

/// A bound listener socket for the syslog server.
#[derive(Debug)]
pub enum Listener {
    /// Stream listener, newline-delimited frames per connection.
    Tcp(TcpListener),
    /// Datagram socket, one frame per datagram.
    Udp(UdpSocket),
}

impl Listener {
    /// Address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr(),
            Listener::Udp(socket) => socket.local_addr(),
        }
    }

    /// Transport of this listener.
    pub fn transport(&self) -> Transport {
        match self {
            Listener::Tcp(_) => Transport::Tcp,
            Listener::Udp(_) => Transport::Udp,
        }
    }

    /// Scheme-qualified address (`tcp://127.0.0.1:10000`) handed to the task.
    pub fn url(&self) -> io::Result<String> {
        Ok(format!("{}://{}", self.transport(), self.local_addr()?))
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_addr() {
            Ok(addr) => write!(f, "{}://{}", self.transport(), addr),
            Err(_) => write!(f, "{}://<unbound>", self.transport()),
        }
    }
}

/// Binds the first free port in `[lower, upper]` on `bind`.
///
/// Ports are tried in ascending order. A socket that fails to bind is never
/// created, so nothing is left open when the range is exhausted.
pub fn allocate(
    transport: Transport,
    bind: IpAddr,
    lower: u16,
    upper: u16,
) -> Result<Listener, SupervisorError> {
    if lower == 0 || lower > upper {
        debug!("Refusing to allocate from invalid port range {lower}-{upper}");
        return Err(SupervisorError::PortUnavailable { lower, upper });
    }

    for port in lower..=upper {
        let addr = SocketAddr::new(bind, port);
        let bound = match transport {
            Transport::Tcp => TcpListener::bind(addr).map(Listener::Tcp),
            Transport::Udp => UdpSocket::bind(addr).map(Listener::Udp),
        };

        match bound {
            Ok(listener) => {
                debug!("Bound {transport} listener on {addr}");
                return Ok(listener);
            }
            Err(err) => {
                trace!("Port {port} unavailable for {transport}: {err}");
            }
        }
    }

    Err(SupervisorError::PortUnavailable { lower, upper })
}
