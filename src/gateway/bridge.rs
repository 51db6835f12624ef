//! Session table and per-leg event handling.
//!
//! The bridge owns every session. Any session-fatal error on either leg
//! closes and deregisters both legs before the next event is dispatched.

use super::session::Session;
use super::translate;
use super::GatewayError;
use crate::config::Config;
use crate::protocols::envelope::Decoded as EnvelopeDecoded;
use crate::protocols::websocket::frame::{self, Decoded as FrameDecoded, Frame, OpCode};
use crate::protocols::websocket::handshake;
use crate::runtime::backend::BackendConnector;
use crate::runtime::connection::{Connection, ReadOutcome, Role};
use crate::runtime::token::{session_of, token_for};
use bytes::Buf;
use mio::net::TcpStream;
use mio::{Registry, Token};
use slab::Slab;
use std::collections::BTreeSet;
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Pairs client sockets with backend sockets and moves messages between them.
pub struct Bridge {
    sessions: Slab<Session>,
    /// Sessions with an incomplete frame or envelope on either leg.
    stalled: BTreeSet<usize>,
    connector: BackendConnector,
    max_sessions: usize,
    max_message_size: usize,
    max_pending_write: usize,
    partial_timeout: Duration,
}

impl Bridge {
    pub fn new(config: &Config) -> Self {
        Self {
            sessions: Slab::with_capacity(config.max_connections),
            stalled: BTreeSet::new(),
            connector: BackendConnector::new(
                config.backend_host.clone(),
                config.backend_port,
                config.connect_timeout,
            ),
            max_sessions: config.max_connections,
            max_message_size: config.max_message_size,
            max_pending_write: config.max_pending_write,
            partial_timeout: config.partial_timeout,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Start a session for a freshly accepted client.
    ///
    /// Returns `None` when the session table is full; the stream is dropped.
    pub fn open_session(
        &mut self,
        registry: &Registry,
        stream: TcpStream,
    ) -> io::Result<Option<usize>> {
        if self.sessions.len() >= self.max_sessions {
            return Ok(None);
        }

        let entry = self.sessions.vacant_entry();
        let id = entry.key();
        let mut client = Connection::new(stream, Role::Client, token_for(id, Role::Client));
        client.register(registry)?;
        entry.insert(Session::new(client));
        Ok(Some(id))
    }

    /// Dispatch one readiness event.
    ///
    /// Events for sessions already closed in this batch are ignored. A slot
    /// reused by a newer session may see a spurious event; reads then report
    /// `WouldBlock` and nothing happens.
    pub fn handle_event(
        &mut self,
        registry: &Registry,
        token: Token,
        readable: bool,
        writable: bool,
    ) {
        let (id, role) = session_of(token);
        if !self.sessions.contains(id) {
            return;
        }

        let result = match role {
            Role::Client => self.on_client_event(registry, id, readable, writable),
            Role::Backend => self.on_backend_event(registry, id, readable, writable),
        };

        if let Err(e) = result {
            self.fail_session(registry, id, &e);
        }
    }

    /// Close and deregister both legs of a session.
    pub fn close_session(&mut self, registry: &Registry, id: usize) {
        self.stalled.remove(&id);
        if let Some(mut session) = self.sessions.try_remove(id) {
            session.deregister(registry);
            debug!(session = id, "Session closed");
        }
    }

    /// Close every session.
    pub fn close_all(&mut self, registry: &Registry) {
        let count = self.sessions.len();
        self.stalled.clear();
        for mut session in self.sessions.drain() {
            session.deregister(registry);
        }
        info!(count, "Closed all sessions");
    }

    /// How long the poller may wait before the next stall deadline.
    ///
    /// `None` when nothing is waiting on an incomplete unit.
    pub fn poll_timeout(&self, now: Instant) -> Option<Duration> {
        self.stalled
            .iter()
            .filter_map(|&id| self.sessions.get(id))
            .filter_map(|session| self.next_deadline(session))
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Tear down sessions whose incomplete frame or envelope has stalled.
    ///
    /// Only sessions holding partial data are visited.
    pub fn sweep_stalled(&mut self, registry: &Registry, now: Instant) {
        let timeout = self.partial_timeout;
        let expired: Vec<(usize, Role)> = self
            .stalled
            .iter()
            .filter_map(|&id| {
                let session = self.sessions.get(id)?;
                let client_expired = session
                    .client
                    .stall_deadline(timeout)
                    .is_some_and(|deadline| deadline <= now);
                let backend_expired = session
                    .backend
                    .as_ref()
                    .and_then(|backend| backend.stall_deadline(timeout))
                    .is_some_and(|deadline| deadline <= now);

                if client_expired {
                    Some((id, Role::Client))
                } else if backend_expired {
                    Some((id, Role::Backend))
                } else {
                    None
                }
            })
            .collect();

        for (id, role) in expired {
            self.fail_session(registry, id, &GatewayError::Timeout(role));
        }
    }

    fn next_deadline(&self, session: &Session) -> Option<Instant> {
        let client = session.client.stall_deadline(self.partial_timeout);
        let backend = session
            .backend
            .as_ref()
            .and_then(|backend| backend.stall_deadline(self.partial_timeout));
        client.into_iter().chain(backend).min()
    }

    /// Keep `stalled` in step with the session's partial-data state.
    fn refresh_stall(&mut self, id: usize) {
        let pending = self
            .sessions
            .get(id)
            .is_some_and(|session| self.next_deadline(session).is_some());
        if pending {
            self.stalled.insert(id);
        } else {
            self.stalled.remove(&id);
        }
    }

    fn fail_session(&mut self, registry: &Registry, id: usize, err: &GatewayError) {
        if err.is_clean_close() {
            debug!(session = id, reason = %err, "Closing session");
        } else {
            warn!(session = id, error = %err, "Closing session");
        }
        self.close_session(registry, id);
    }

    fn on_client_event(
        &mut self,
        registry: &Registry,
        id: usize,
        readable: bool,
        writable: bool,
    ) -> Result<(), GatewayError> {
        if writable {
            flush_leg(&mut self.sessions[id].client, registry, self.max_pending_write)?;
        }
        if !readable {
            return Ok(());
        }

        loop {
            match self.sessions[id].client.read_chunk()? {
                ReadOutcome::Eof => return Err(GatewayError::PeerClosed(Role::Client)),
                ReadOutcome::WouldBlock => return Ok(()),
                ReadOutcome::Data(n) => {
                    trace!(session = id, len = n, "Client bytes");
                    self.process_client_input(registry, id)?;
                }
            }
        }
    }

    fn process_client_input(
        &mut self,
        registry: &Registry,
        id: usize,
    ) -> Result<(), GatewayError> {
        let session = &mut self.sessions[id];
        if !session.handshake_done {
            let upgrade = handshake::parse_request(session.client.inbound())?;
            session.client.inbound_mut().advance(upgrade.consumed);
            session.client.queue(handshake::response(&upgrade.key).as_bytes());
            session.client.flush(registry)?;
            session.handshake_done = true;
            info!(session = id, "WebSocket handshake completed");
        }

        loop {
            let session = &mut self.sessions[id];
            let decoded = frame::decode(session.client.inbound_mut(), self.max_message_size)?;
            let frame = match decoded {
                FrameDecoded::NeedMoreData => break,
                FrameDecoded::Close => {
                    session.client.queue(&frame::encode(OpCode::Close, &[]));
                    if let Err(e) = session.client.flush(registry) {
                        trace!(session = id, error = %e, "Close reply not sent");
                    }
                    return Err(GatewayError::CloseRequested);
                }
                FrameDecoded::Frame(frame) => frame,
            };
            self.on_frame(registry, id, frame)?;
        }

        let client = &mut self.sessions[id].client;
        let partial = !client.inbound().is_empty();
        client.track_partial(partial, Instant::now());
        self.refresh_stall(id);
        Ok(())
    }

    fn on_frame(
        &mut self,
        registry: &Registry,
        id: usize,
        frame: Frame,
    ) -> Result<(), GatewayError> {
        if !frame.masked {
            trace!(session = id, opcode = ?frame.opcode, "Unmasked client frame");
        }
        match frame.opcode {
            OpCode::Ping => {
                let client = &mut self.sessions[id].client;
                client.queue(&frame::encode(OpCode::Pong, &frame.payload));
                return flush_leg(client, registry, self.max_pending_write);
            }
            OpCode::Pong => {
                trace!(session = id, "Pong received");
                return Ok(());
            }
            _ => {}
        }

        let message = self.sessions[id]
            .assembler
            .push(frame, self.max_message_size)?;

        match message {
            None => Ok(()),
            Some((OpCode::Text, payload)) => self.forward_to_backend(registry, id, &payload),
            Some((opcode, payload)) => {
                warn!(
                    session = id,
                    ?opcode,
                    len = payload.len(),
                    "Dropping non-text message"
                );
                Ok(())
            }
        }
    }

    fn forward_to_backend(
        &mut self,
        registry: &Registry,
        id: usize,
        payload: &[u8],
    ) -> Result<(), GatewayError> {
        let (msg_type, wire) = match translate::client_to_backend(payload) {
            Ok(translated) => translated,
            Err(e) => {
                warn!(session = id, error = %e, "Dropping client message");
                return Ok(());
            }
        };

        let session = &mut self.sessions[id];
        if session.backend.is_none() {
            match self.connector.connect(registry, token_for(id, Role::Backend)) {
                Ok(conn) => session.backend = Some(conn),
                Err(e) => {
                    error!(
                        session = id,
                        msg_type,
                        error = %e,
                        "Backend connect failed, dropping message"
                    );
                    return Ok(());
                }
            }
        }

        if let Some(backend) = session.backend.as_mut() {
            backend.queue(&wire);
            flush_leg(backend, registry, self.max_pending_write)?;
            debug!(
                session = id,
                msg_type,
                len = payload.len(),
                "Forwarded message to backend"
            );
        }
        Ok(())
    }

    fn on_backend_event(
        &mut self,
        registry: &Registry,
        id: usize,
        readable: bool,
        writable: bool,
    ) -> Result<(), GatewayError> {
        if writable {
            if let Some(backend) = self.sessions[id].backend.as_mut() {
                flush_leg(backend, registry, self.max_pending_write)?;
            }
        }
        if !readable {
            return Ok(());
        }

        loop {
            let outcome = match self.sessions[id].backend.as_mut() {
                Some(backend) => backend.read_chunk()?,
                None => return Ok(()),
            };
            match outcome {
                ReadOutcome::Eof => return Err(GatewayError::PeerClosed(Role::Backend)),
                ReadOutcome::WouldBlock => return Ok(()),
                ReadOutcome::Data(n) => {
                    trace!(session = id, len = n, "Backend bytes");
                    self.process_backend_input(registry, id)?;
                }
            }
        }
    }

    fn process_backend_input(
        &mut self,
        registry: &Registry,
        id: usize,
    ) -> Result<(), GatewayError> {
        let Session {
            client,
            backend,
            decoder,
            ..
        } = &mut self.sessions[id];
        let Some(backend) = backend.as_mut() else {
            return Ok(());
        };

        loop {
            match decoder.decode(backend.inbound_mut()) {
                Ok(EnvelopeDecoded::NeedMoreData) => break,
                Ok(EnvelopeDecoded::Envelope(envelope)) => {
                    let msg_type = envelope.msg_type;
                    let len = envelope.body.len();
                    match translate::backend_to_client(envelope) {
                        Ok(ws_frame) => {
                            client.queue(&ws_frame);
                            debug!(session = id, msg_type, len, "Forwarded message to client");
                        }
                        Err(e) => {
                            warn!(
                                session = id,
                                msg_type,
                                error = %e,
                                "Dropping backend message"
                            )
                        }
                    }
                }
                Err(e) => warn!(session = id, error = %e, "Dropping backend message"),
            }
        }

        let partial = !backend.inbound().is_empty() || decoder.is_discarding();
        backend.track_partial(partial, Instant::now());
        let flushed = flush_leg(client, registry, self.max_pending_write);
        self.refresh_stall(id);
        flushed
    }
}

/// Flush one leg and enforce the pending-output ceiling.
fn flush_leg(
    conn: &mut Connection,
    registry: &Registry,
    limit: usize,
) -> Result<(), GatewayError> {
    conn.flush(registry)?;
    if conn.pending_write() > limit {
        return Err(GatewayError::WriteBacklog(conn.role()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::envelope;
    use crate::protocols::websocket::frame::encode_masked;
    use mio::Poll;
    use serde_json::{json, Value};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream as StdStream};

    const MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

    struct Harness {
        poll: Poll,
        bridge: Bridge,
        backend_listener: TcpListener,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(|_| {})
        }

        fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
            let backend_listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let mut config = Config::for_tests(backend_listener.local_addr().unwrap().port());
            tweak(&mut config);
            Self {
                poll: Poll::new().unwrap(),
                bridge: Bridge::new(&config),
                backend_listener,
            }
        }

        /// Accept a client into a new session and complete its handshake.
        fn connect_client(&mut self) -> (usize, StdStream) {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let mut peer = StdStream::connect(listener.local_addr().unwrap()).unwrap();
            peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let (accepted, _) = listener.accept().unwrap();
            accepted.set_nonblocking(true).unwrap();

            let id = self
                .bridge
                .open_session(self.poll.registry(), TcpStream::from_std(accepted))
                .unwrap()
                .unwrap();

            peer.write_all(handshake::request("dGhlIHNhbXBsZSBub25jZQ==").as_bytes())
                .unwrap();
            self.pump_until(id, Role::Client, |b| b.sessions[id].handshake_done);

            let mut response = vec![0u8; handshake::response("dGhlIHNhbXBsZSBub25jZQ==").len()];
            peer.read_exact(&mut response).unwrap();
            assert!(response.starts_with(b"HTTP/1.1 101"));
            (id, peer)
        }

        /// Deliver readable events on one leg until `done` holds.
        fn pump_until(&mut self, id: usize, role: Role, done: impl Fn(&Bridge) -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !done(&self.bridge) {
                assert!(Instant::now() < deadline, "condition not reached");
                self.bridge
                    .handle_event(self.poll.registry(), token_for(id, role), true, false);
                std::thread::sleep(Duration::from_millis(2));
            }
        }

        /// Deliver readable events on one leg until `peer` has bytes to read.
        fn pump_until_readable(&mut self, id: usize, role: Role, peer: &StdStream) {
            peer.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut probe = [0u8; 1];
            while !matches!(peer.peek(&mut probe), Ok(n) if n > 0) {
                assert!(Instant::now() < deadline, "peer never became readable");
                self.bridge
                    .handle_event(self.poll.registry(), token_for(id, role), true, false);
            }
            peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        }

        fn accept_backend(&self) -> StdStream {
            let (stream, _) = self.backend_listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            stream
        }
    }

    fn read_envelope(stream: &mut StdStream) -> (u16, Vec<u8>) {
        let mut header = [0u8; envelope::HEADER_SIZE];
        stream.read_exact(&mut header).unwrap();
        let msg_type = u16::from_be_bytes([header[0], header[1]]);
        let len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).unwrap();
        (msg_type, body)
    }

    fn read_text_frame(stream: &mut StdStream) -> Value {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).unwrap();
        assert_eq!(header[0], 0x81);
        assert_eq!(header[1] & 0x80, 0, "server frames are unmasked");
        let mut payload = vec![0u8; (header[1] & 0x7F) as usize];
        stream.read_exact(&mut payload).unwrap();
        serde_json::from_slice(&payload).unwrap()
    }

    fn assert_closed(stream: &mut StdStream) {
        let mut buf = [0u8; 64];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return,
                Err(e) => panic!("expected close, got {e}"),
            }
        }
    }

    #[test]
    fn test_forward_opens_backend_lazily() {
        let mut h = Harness::new();
        let (id, mut client) = h.connect_client();
        assert!(h.bridge.sessions[id].backend.is_none());

        let body = br#"{"type":201,"foo":"bar"}"#;
        client
            .write_all(&encode_masked(OpCode::Text, true, body, MASK))
            .unwrap();
        h.pump_until(id, Role::Client, |b| b.sessions[id].backend.is_some());

        let mut backend = h.accept_backend();
        let (msg_type, received) = read_envelope(&mut backend);
        assert_eq!(msg_type, 201);
        assert_eq!(received, body);

        backend
            .write_all(&envelope::encode(809, br#"{"ok":true}"#))
            .unwrap();
        h.pump_until_readable(id, Role::Backend, &client);
        assert_eq!(read_text_frame(&mut client), json!({"ok": true, "type": 809}));
    }

    #[test]
    fn test_backend_eof_closes_both_legs() {
        let mut h = Harness::new();
        let (id, mut client) = h.connect_client();

        client
            .write_all(&encode_masked(OpCode::Text, true, br#"{"type":1}"#, MASK))
            .unwrap();
        h.pump_until(id, Role::Client, |b| b.sessions[id].backend.is_some());
        let backend = h.accept_backend();

        drop(backend);
        h.pump_until(id, Role::Backend, |b| !b.sessions.contains(id));

        assert_eq!(h.bridge.len(), 0);
        assert_closed(&mut client);
    }

    #[test]
    fn test_close_frame_closes_both_legs() {
        let mut h = Harness::new();
        let (id, mut client) = h.connect_client();

        client
            .write_all(&encode_masked(OpCode::Text, true, br#"{"type":1}"#, MASK))
            .unwrap();
        h.pump_until(id, Role::Client, |b| b.sessions[id].backend.is_some());
        let mut backend = h.accept_backend();
        read_envelope(&mut backend);

        client
            .write_all(&encode_masked(OpCode::Close, true, &[], MASK))
            .unwrap();
        h.pump_until(id, Role::Client, |b| !b.sessions.contains(id));

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0x88, 0x00]);
        assert_closed(&mut client);
        assert_closed(&mut backend);
    }

    #[test]
    fn test_bad_messages_are_dropped() {
        let mut h = Harness::new();
        let (id, mut client) = h.connect_client();

        let dropped: [&[u8]; 3] = [br#"{"foo":1}"#, b"not json", br#"{"type":"x"}"#];
        for body in dropped {
            client
                .write_all(&encode_masked(OpCode::Text, true, body, MASK))
                .unwrap();
        }
        client
            .write_all(&encode_masked(OpCode::Text, true, br#"{"type":7}"#, MASK))
            .unwrap();
        h.pump_until(id, Role::Client, |b| b.sessions[id].backend.is_some());

        let mut backend = h.accept_backend();
        let (msg_type, _) = read_envelope(&mut backend);
        assert_eq!(msg_type, 7);
        assert_eq!(h.bridge.len(), 1);
    }

    #[test]
    fn test_malformed_backend_message_keeps_session() {
        let mut h = Harness::new();
        let (id, mut client) = h.connect_client();

        client
            .write_all(&encode_masked(OpCode::Text, true, br#"{"type":1}"#, MASK))
            .unwrap();
        h.pump_until(id, Role::Client, |b| b.sessions[id].backend.is_some());
        let mut backend = h.accept_backend();
        read_envelope(&mut backend);

        backend.write_all(&envelope::encode(2, b"garbage")).unwrap();
        backend.write_all(&envelope::encode(3, b"[]")).unwrap();
        backend
            .write_all(&envelope::encode(4, br#"{"n":4}"#))
            .unwrap();

        h.pump_until_readable(id, Role::Backend, &client);
        assert_eq!(read_text_frame(&mut client), json!({"n": 4, "type": 4}));
        assert_eq!(h.bridge.len(), 1);
    }

    #[test]
    fn test_ping_gets_pong() {
        let mut h = Harness::new();
        let (id, mut client) = h.connect_client();

        client
            .write_all(&encode_masked(OpCode::Ping, true, b"hb", MASK))
            .unwrap();
        h.pump_until_readable(id, Role::Client, &client);

        let mut pong = [0u8; 4];
        client.read_exact(&mut pong).unwrap();
        assert_eq!(pong, [0x8A, 0x02, b'h', b'b']);
        assert!(h.bridge.sessions[id].backend.is_none());
    }

    #[test]
    fn test_missing_key_fails_handshake() {
        let mut h = Harness::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut peer = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let id = h
            .bridge
            .open_session(h.poll.registry(), TcpStream::from_std(accepted))
            .unwrap()
            .unwrap();

        peer.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        h.pump_until(id, Role::Client, |b| !b.sessions.contains(id));
        assert_closed(&mut peer);
    }

    #[test]
    fn test_stalled_partial_frame_times_out() {
        let mut h = Harness::with_config(|c| c.partial_timeout = Duration::from_millis(50));
        let (id, mut client) = h.connect_client();

        let frame = encode_masked(OpCode::Text, true, br#"{"type":1}"#, MASK);
        client.write_all(&frame[..5]).unwrap();
        h.pump_until(id, Role::Client, |b| !b.sessions[id].client.inbound().is_empty());

        let now = Instant::now();
        assert!(h.bridge.poll_timeout(now).is_some());
        h.bridge.sweep_stalled(h.poll.registry(), now);
        assert_eq!(h.bridge.len(), 1);

        h.bridge.sweep_stalled(h.poll.registry(), now + Duration::from_millis(60));
        assert_eq!(h.bridge.len(), 0);
        assert!(h.bridge.stalled.is_empty());
        assert_closed(&mut client);
    }

    #[test]
    fn test_completed_frame_clears_stall() {
        let mut h = Harness::new();
        let (id, mut client) = h.connect_client();
        assert!(h.bridge.stalled.is_empty());
        assert_eq!(h.bridge.poll_timeout(Instant::now()), None);

        let frame = encode_masked(OpCode::Text, true, br#"{"type":1}"#, MASK);
        client.write_all(&frame[..3]).unwrap();
        h.pump_until(id, Role::Client, |b| b.stalled.contains(&id));
        assert!(h.bridge.poll_timeout(Instant::now()).is_some());

        client.write_all(&frame[3..]).unwrap();
        h.pump_until(id, Role::Client, |b| b.sessions[id].backend.is_some());
        assert!(h.bridge.stalled.is_empty());
        assert_eq!(h.bridge.poll_timeout(Instant::now()), None);

        let mut backend = h.accept_backend();
        assert_eq!(read_envelope(&mut backend).0, 1);
    }

    #[test]
    fn test_binary_message_dropped_session_kept() {
        let mut h = Harness::new();
        let (id, mut client) = h.connect_client();

        client
            .write_all(&encode_masked(OpCode::Binary, true, &[0x01, 0x02, 0x03], MASK))
            .unwrap();
        client
            .write_all(&encode_masked(OpCode::Text, true, br#"{"type":9}"#, MASK))
            .unwrap();
        h.pump_until(id, Role::Client, |b| b.sessions[id].backend.is_some());

        let mut backend = h.accept_backend();
        let (msg_type, body) = read_envelope(&mut backend);
        assert_eq!(msg_type, 9);
        assert_eq!(body, br#"{"type":9}"#);
        assert_eq!(h.bridge.len(), 1);
    }

    #[test]
    fn test_ping_between_fragments() {
        let mut h = Harness::new();
        let (id, mut client) = h.connect_client();

        client
            .write_all(&encode_masked(OpCode::Text, false, br#"{"type":"#, MASK))
            .unwrap();
        client
            .write_all(&encode_masked(OpCode::Ping, true, b"p", MASK))
            .unwrap();
        client
            .write_all(&encode_masked(OpCode::Continuation, true, b"3}", MASK))
            .unwrap();
        h.pump_until(id, Role::Client, |b| b.sessions[id].backend.is_some());

        let mut pong = [0u8; 3];
        client.read_exact(&mut pong).unwrap();
        assert_eq!(pong, [0x8A, 0x01, b'p']);

        let mut backend = h.accept_backend();
        let (msg_type, body) = read_envelope(&mut backend);
        assert_eq!(msg_type, 3);
        assert_eq!(body, br#"{"type":3}"#);
        assert_eq!(h.bridge.len(), 1);
    }

    #[test]
    fn test_session_limit() {
        let mut h = Harness::with_config(|c| c.max_connections = 1);
        let _first = h.connect_client();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _peer = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let second = h
            .bridge
            .open_session(h.poll.registry(), TcpStream::from_std(accepted))
            .unwrap();
        assert_eq!(second, None);
    }
}
