//! Binary envelope protocol spoken by the backend.
//!
//! Every message on a backend-facing TCP connection is framed as:
//!
//! ```text
//! +----------------+------------------+----------------------+
//! | type: u16 (BE) | length: u32 (BE) | body: length bytes   |
//! +----------------+------------------+----------------------+
//! ```
//!
//! The body is a UTF-8 JSON object. Declared lengths above
//! [`MAX_BODY_SIZE`] are rejected before any of the body is buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;
use thiserror::Error;

/// Size of the fixed envelope header.
pub const HEADER_SIZE: usize = 6;

/// Largest body the protocol allows (2 MB).
pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// One decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub msg_type: u16,
    /// Raw body bytes as they appeared on the wire.
    pub body: Bytes,
    /// The body parsed as JSON.
    pub json: Value,
}

/// Outcome of a decode attempt that did not fail.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    Envelope(Envelope),
    /// The buffer holds only part of an envelope. Nothing was consumed.
    NeedMoreData,
}

/// Envelope decoding errors. Neither leaves the stream misaligned.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload too large: {len} > {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("malformed body for message type {msg_type}: {source}")]
    MalformedBody {
        msg_type: u16,
        #[source]
        source: serde_json::Error,
    },
}

/// Encode `body` behind a header carrying `msg_type` and the body length.
///
/// The caller guarantees `body.len()` fits in a u32.
pub fn encode(msg_type: u16, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_u16(msg_type);
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(body);
    buf
}

/// Incremental envelope decoder for one connection.
///
/// The accumulated bytes live in the connection; the decoder only keeps
/// the count of bytes still to be skipped after an oversized header.
#[derive(Debug, Default)]
pub struct EnvelopeDecoder {
    discard: usize,
}

impl EnvelopeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the remainder of an oversized envelope is being skipped.
    pub fn is_discarding(&self) -> bool {
        self.discard > 0
    }

    /// Decode at most one envelope from the front of `buf`.
    ///
    /// A complete envelope is removed from `buf`. Call repeatedly until
    /// `NeedMoreData`, since one read can carry several envelopes.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded, EnvelopeError> {
        if self.discard > 0 {
            let skip = self.discard.min(buf.len());
            buf.advance(skip);
            self.discard -= skip;
            if self.discard > 0 {
                return Ok(Decoded::NeedMoreData);
            }
        }

        if buf.len() < HEADER_SIZE {
            return Ok(Decoded::NeedMoreData);
        }

        let msg_type = u16::from_be_bytes([buf[0], buf[1]]);
        let len = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;

        if len > MAX_BODY_SIZE {
            buf.advance(HEADER_SIZE);
            let skip = len.min(buf.len());
            buf.advance(skip);
            self.discard = len - skip;
            return Err(EnvelopeError::PayloadTooLarge {
                len,
                max: MAX_BODY_SIZE,
            });
        }

        if buf.len() < HEADER_SIZE + len {
            return Ok(Decoded::NeedMoreData);
        }

        buf.advance(HEADER_SIZE);
        let body = buf.split_to(len).freeze();
        let json = serde_json::from_slice(&body)
            .map_err(|source| EnvelopeError::MalformedBody { msg_type, source })?;

        Ok(Decoded::Envelope(Envelope {
            msg_type,
            body,
            json,
        }))
    }
}
