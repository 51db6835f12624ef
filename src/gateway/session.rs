//! A client connection paired with its (lazily opened) backend connection.

use crate::protocols::envelope::EnvelopeDecoder;
use crate::protocols::websocket::frame::{Frame, FrameError, OpCode};
use crate::runtime::connection::Connection;
use bytes::{Bytes, BytesMut};
use mio::Registry;

/// The unit of pairing and teardown.
#[derive(Debug)]
pub struct Session {
    pub client: Connection,
    /// `None` until the first message needs forwarding.
    pub backend: Option<Connection>,
    pub handshake_done: bool,
    /// Envelope reassembly state for the backend leg.
    pub decoder: EnvelopeDecoder,
    pub assembler: MessageAssembler,
}

impl Session {
    pub fn new(client: Connection) -> Self {
        Self {
            client,
            backend: None,
            handshake_done: false,
            decoder: EnvelopeDecoder::new(),
            assembler: MessageAssembler::default(),
        }
    }

    /// Deregister both legs. Sockets close when the session is dropped.
    pub fn deregister(&mut self, registry: &Registry) {
        self.client.deregister(registry);
        if let Some(backend) = self.backend.as_mut() {
            backend.deregister(registry);
        }
    }
}

/// Joins fragmented data frames into whole messages.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    in_progress: Option<(OpCode, BytesMut)>,
}

impl MessageAssembler {
    /// Feed a Text, Binary or Continuation frame.
    ///
    /// Returns the message opcode and payload once the final fragment has
    /// arrived. `max_size` bounds the assembled message.
    pub fn push(
        &mut self,
        frame: Frame,
        max_size: usize,
    ) -> Result<Option<(OpCode, Bytes)>, FrameError> {
        match (frame.opcode, self.in_progress.as_mut()) {
            (OpCode::Continuation, None) => Err(FrameError::UnexpectedContinuation),
            (OpCode::Continuation, Some((_, buf))) => {
                let len = buf.len() + frame.payload.len();
                if len > max_size {
                    return Err(FrameError::PayloadTooLarge {
                        len: len as u64,
                        max: max_size,
                    });
                }
                buf.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                Ok(self
                    .in_progress
                    .take()
                    .map(|(opcode, buf)| (opcode, buf.freeze())))
            }
            (_, Some(_)) => Err(FrameError::InterleavedMessage),
            (opcode, None) if frame.fin => Ok(Some((opcode, frame.payload))),
            (opcode, None) => {
                self.in_progress = Some((opcode, BytesMut::from(&frame.payload[..])));
                Ok(None)
            }
        }
    }
}
