//! Single-threaded mio event loop.
//!
//! Readiness-based model: poll reports which sockets are ready, then the
//! bridge performs non-blocking reads and writes until `WouldBlock`. All
//! sockets are edge-triggered. The listener, the waker, and both legs of
//! every session share one `Poll`.

use crate::config::Config;
use crate::gateway::Bridge;
use crate::runtime::token::{LISTENER, WAKER};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Requests a running [`EventLoop`] to close every session and return.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            error!(error = %e, "Failed to wake event loop");
        }
    }
}

pub struct EventLoop {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    bridge: Bridge,
}

impl EventLoop {
    /// Bind the listener and set up the poller. Nothing is accepted until
    /// [`run`](Self::run) is called.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let poll = Poll::new()?;

        let mut listener = TcpListener::from_std(create_listener(config.listen, config.backlog)?);
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        info!(
            addr = %local_addr,
            max_connections = config.max_connections,
            "Listening for WebSocket clients"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(config.event_capacity),
            listener,
            local_addr,
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
            bridge: Bridge::new(config),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Run until shut down. Only a failing poller is fatal.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            let timeout = self.bridge.poll_timeout(Instant::now());
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Poll failed");
                    return Err(e);
                }
            }

            for event in self.events.iter() {
                match event.token() {
                    LISTENER => accept_clients(&self.listener, &self.poll, &mut self.bridge),
                    WAKER => {}
                    token => self.bridge.handle_event(
                        self.poll.registry(),
                        token,
                        event.is_readable() || event.is_read_closed() || event.is_error(),
                        event.is_writable(),
                    ),
                }
            }

            if self.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested");
                self.bridge.close_all(self.poll.registry());
                return Ok(());
            }

            self.bridge.sweep_stalled(self.poll.registry(), Instant::now());
        }
    }
}

/// Accept until the listener would block.
fn accept_clients(listener: &TcpListener, poll: &Poll, bridge: &mut Bridge) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                }
                match bridge.open_session(poll.registry(), stream) {
                    Ok(Some(id)) => debug!(
                        session = id,
                        peer = %peer_addr,
                        active = bridge.len(),
                        "Client connected"
                    ),
                    Ok(None) => warn!(peer = %peer_addr, "Connection limit reached"),
                    Err(e) => warn!(peer = %peer_addr, error = %e, "Failed to register client"),
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Accept error");
                return;
            }
        }
    }
}

fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
