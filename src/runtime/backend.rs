//! Outbound connections to the envelope backend.
//!
//! The connect itself is synchronous and bounded by a timeout; the event
//! loop stalls for at most that long. The resulting socket is switched to
//! non-blocking mode and registered before it is handed back.

use crate::runtime::connection::{Connection, Role};
use mio::net::TcpStream;
use mio::{Registry, Token};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// Opens backend connections on demand.
#[derive(Debug, Clone)]
pub struct BackendConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl BackendConnector {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Connect, make the socket non-blocking and register it under `token`.
    pub fn connect(&self, registry: &Registry, token: Token) -> io::Result<Connection> {
        let stream = self.connect_std()?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let mut conn = Connection::new(TcpStream::from_std(stream), Role::Backend, token);
        conn.register(registry)?;

        info!(backend = %peer, token = token.0, "Connected to backend");
        Ok(conn)
    }

    /// Try each resolved address in turn.
    fn connect_std(&self) -> io::Result<std::net::TcpStream> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port).to_socket_addrs()?.collect();

        let mut last_err = None;
        for addr in addrs {
            match std::net::TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(backend = %addr, error = %e, "Backend address failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}:{}", self.host, self.port),
            )
        }))
    }
}
