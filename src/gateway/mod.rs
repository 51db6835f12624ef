//! Gateway bridge between WebSocket clients and the envelope backend.
//!
//! - `bridge`: session table, per-leg event handling, coupled teardown
//! - `session`: one client plus its lazily opened backend connection
//! - `translate`: moving the message type between JSON body and header

mod bridge;
mod session;
mod translate;

pub use bridge::Bridge;

use crate::protocols::websocket::frame::FrameError;
use crate::protocols::websocket::handshake::HandshakeError;
use crate::runtime::connection::Role;
use std::io;
use thiserror::Error;

/// Conditions that end a whole session, both legs at once.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(#[from] HandshakeError),
    #[error("frame protocol error: {0}")]
    FrameProtocol(#[from] FrameError),
    #[error("{0} peer closed the connection")]
    PeerClosed(Role),
    #[error("client sent a close frame")]
    CloseRequested,
    #[error("timed out waiting for the rest of a {0} message")]
    Timeout(Role),
    #[error("{0} write backlog exceeded")]
    WriteBacklog(Role),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl GatewayError {
    /// Ordinary closes are not worth a warning.
    pub fn is_clean_close(&self) -> bool {
        matches!(
            self,
            GatewayError::PeerClosed(_) | GatewayError::CloseRequested
        )
    }
}
