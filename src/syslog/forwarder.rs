//! Client side of the relay: sends priority-tagged frames to a relay address.
use std::{
    io::{self, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket},
};

use tracing::debug;

use super::Severity;
use crate::{config::Transport, constants::MAX_PRIORITY, error::ForwardError};

enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// Connection to a syslog relay at `"<network>://<host:port>"`.
pub struct Forwarder {
    connection: Connection,
    facility: u8,
    frame: Vec<u8>,
}

impl Forwarder {
    /// Connects to `address`, e.g. `tcp://127.0.0.1:10000`.
    pub fn connect(address: &str) -> Result<Self, ForwardError> {
        let invalid = || ForwardError::InvalidAddress(address.to_string());
        let (scheme, target) = address.split_once("://").ok_or_else(invalid)?;
        let transport: Transport = scheme.parse().map_err(|_| invalid())?;
        let target: SocketAddr = target
            .to_socket_addrs()
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)?;

        let connection = match transport {
            Transport::Tcp => Connection::Tcp(TcpStream::connect(target)?),
            Transport::Udp => {
                let bind: SocketAddr = if target.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                let socket = UdpSocket::bind(bind)?;
                socket.connect(target)?;
                Connection::Udp(socket)
            }
        };
        debug!("Forwarding syslog frames to {address}");

        Ok(Self {
            connection,
            facility: crate::constants::DEFAULT_FACILITY,
            frame: Vec::new(),
        })
    }

    /// Sets the facility code stamped on every frame (clamped to 0-23).
    pub fn with_facility(mut self, facility: u8) -> Self {
        self.facility = facility.min(MAX_PRIORITY >> 3);
        self
    }

    /// Sends one message as `<PRI>message\n`.
    pub fn send(&mut self, severity: Severity, message: &[u8]) -> Result<(), ForwardError> {
        let priority = (self.facility << 3) | severity.code();
        self.frame.clear();
        write!(self.frame, "<{priority}>")?;
        self.frame
            .extend(message.iter().copied().filter(|b| *b != b'\n'));
        self.frame.push(b'\n');

        match &mut self.connection {
            Connection::Tcp(stream) => stream.write_all(&self.frame)?,
            Connection::Udp(socket) => {
                socket.send(&self.frame)?;
            }
        }
        Ok(())
    }

    /// Flushes buffered stream data.
    pub fn flush(&mut self) -> io::Result<()> {
        match &mut self.connection {
            Connection::Tcp(stream) => stream.flush(),
            Connection::Udp(_) => Ok(()),
        }
    }
}
