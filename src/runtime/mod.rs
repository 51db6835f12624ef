//! Networking runtime: one mio poller driving every socket.
//!
//! - `event_loop`: listener, waker and event dispatch
//! - `connection`: per-socket buffers and non-blocking I/O
//! - `backend`: bounded outbound connects to the envelope backend
//! - `token`: mapping between poll tokens and session legs

pub mod backend;
pub mod connection;
pub mod event_loop;
pub mod token;

use crate::config::Config;

/// Bind and serve until the process exits.
pub fn run(config: &Config) -> std::io::Result<()> {
    event_loop::EventLoop::bind(config)?.run()
}
