//! HTTP upgrade handshake.
//!
//! The request is expected to arrive in a single read. Only the
//! `Sec-WebSocket-Key` header is consulted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &str = "sec-websocket-key";

/// A parsed upgrade request.
#[derive(Debug, PartialEq, Eq)]
pub struct Upgrade {
    pub key: String,
    /// Bytes of the input taken by the request, including the blank line.
    pub consumed: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("empty upgrade request")]
    Empty,
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
}

/// Parse an upgrade request out of one chunk of bytes.
///
/// If the chunk has no terminating blank line the whole chunk is taken as
/// the request.
pub fn parse_request(input: &[u8]) -> Result<Upgrade, HandshakeError> {
    if input.is_empty() {
        return Err(HandshakeError::Empty);
    }

    let consumed = find_header_end(input).unwrap_or(input.len());
    let request = String::from_utf8_lossy(&input[..consumed]);

    let key = request
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(KEY_HEADER))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or(HandshakeError::MissingKey)?;

    Ok(Upgrade {
        key: key.to_string(),
        consumed,
    })
}

/// Compute `base64(sha1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Build the `101 Switching Protocols` response for a client key.
pub fn response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(key)
    )
}

/// Position just past the first `\r\n\r\n`.
fn find_header_end(input: &[u8]) -> Option<usize> {
    input
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

#[cfg(test)]
pub(crate) fn request(key: &str) -> String {
    format!(
        "GET /ws HTTP/1.1\r\n\
         Host: localhost:8080\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}
