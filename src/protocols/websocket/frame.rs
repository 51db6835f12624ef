//! WebSocket frame encoding and decoding.
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |            (16/64)            |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Masking-key (0 or 4 bytes, present when MASK is set)      |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```
//!
//! Server frames are always sent unmasked. Client frames may be masked or
//! not; both are accepted.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Control frames carry at most this many payload bytes.
const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// One decoded frame, payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub payload: Bytes,
}

/// Outcome of a decode attempt that did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// Header or payload incomplete. Nothing was consumed.
    NeedMoreData,
    /// The peer sent a Close frame (reported as soon as the opcode is seen).
    Close,
}

/// Violations that make the frame stream unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("reserved bits set: {0:#04x}")]
    ReservedBits(u8),
    #[error("fragmented control frame")]
    FragmentedControl,
    #[error("control frame payload too long: {0}")]
    ControlTooLong(u64),
    #[error("frame payload too large: {len} > {max}")]
    PayloadTooLarge { len: u64, max: usize },
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,
    #[error("new data frame while a fragmented message is in progress")]
    InterleavedMessage,
}

/// Decode at most one frame from the front of `buf`.
///
/// A complete frame is removed from `buf`; `NeedMoreData` leaves it
/// untouched. Payloads longer than `max_payload` are rejected, which also
/// covers 64-bit lengths that do not fit in memory.
pub fn decode(buf: &mut BytesMut, max_payload: usize) -> Result<Decoded, FrameError> {
    if buf.is_empty() {
        return Ok(Decoded::NeedMoreData);
    }

    let byte0 = buf[0];
    let raw_opcode = byte0 & 0x0F;
    let opcode = OpCode::from_u8(raw_opcode).ok_or(FrameError::UnknownOpcode(raw_opcode))?;
    if opcode == OpCode::Close {
        return Ok(Decoded::Close);
    }
    if byte0 & 0x70 != 0 {
        return Err(FrameError::ReservedBits(byte0 & 0x70));
    }
    let fin = byte0 & 0x80 != 0;

    if buf.len() < 2 {
        return Ok(Decoded::NeedMoreData);
    }

    let masked = buf[1] & 0x80 != 0;
    let (len, mut header_len) = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(Decoded::NeedMoreData);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(Decoded::NeedMoreData);
            }
            let mut ext = [0u8; 8];
            ext.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(ext), 10)
        }
        n => (n as u64, 2),
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControl);
        }
        if len > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlTooLong(len));
        }
    }
    if len > max_payload as u64 {
        return Err(FrameError::PayloadTooLarge {
            len,
            max: max_payload,
        });
    }
    let len = len as usize;

    let mut mask = [0u8; 4];
    if masked {
        if buf.len() < header_len + 4 {
            return Ok(Decoded::NeedMoreData);
        }
        mask.copy_from_slice(&buf[header_len..header_len + 4]);
        header_len += 4;
    }

    if buf.len() < header_len + len {
        return Ok(Decoded::NeedMoreData);
    }

    buf.advance(header_len);
    let mut payload = buf.split_to(len);
    if masked {
        apply_mask(&mut payload, mask);
    }

    Ok(Decoded::Frame(Frame {
        fin,
        opcode,
        masked,
        payload: payload.freeze(),
    }))
}

/// XOR `data` in place with the 4-byte masking key.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Encode an unmasked, final text frame.
pub fn encode_text(payload: &[u8]) -> BytesMut {
    encode(OpCode::Text, payload)
}

/// Encode an unmasked, final frame with the given opcode.
pub fn encode(opcode: OpCode, payload: &[u8]) -> BytesMut {
    let len = payload.len();
    let mut buf = BytesMut::with_capacity(10 + len);
    buf.put_u8(0x80 | opcode.as_u8());
    if len < 126 {
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(127);
        buf.put_u64(len as u64);
    }
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
pub(crate) fn encode_masked(opcode: OpCode, fin: bool, payload: &[u8], mask: [u8; 4]) -> BytesMut {
    let mut frame = encode(opcode, payload);
    if !fin {
        frame[0] &= 0x7F;
    }
    frame[1] |= 0x80;
    let header_len = frame.len() - payload.len();
    let mut masked = BytesMut::with_capacity(frame.len() + 4);
    masked.extend_from_slice(&frame[..header_len]);
    masked.extend_from_slice(&mask);
    let mut body = payload.to_vec();
    apply_mask(&mut body, mask);
    masked.extend_from_slice(&body);
    masked
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 16 * 1024 * 1024;

    fn expect_frame(buf: &mut BytesMut) -> Frame {
        match decode(buf, MAX) {
            Ok(Decoded::Frame(frame)) => frame,
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_encode_short_text() {
        let frame = encode_text(b"hi");
        assert_eq!(&frame[..], &[0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_encode_extended_lengths() {
        let medium = encode_text(&[b'a'; 300]);
        assert_eq!(&medium[..4], &[0x81, 126, 0x01, 0x2C]);
        assert_eq!(medium.len(), 4 + 300);

        let large = encode_text(&vec![b'a'; 70_000]);
        assert_eq!(large[1], 127);
        assert_eq!(&large[2..10], &70_000u64.to_be_bytes());
        assert_eq!(large.len(), 10 + 70_000);
    }

    #[test]
    fn test_decode_unmasked_roundtrip() {
        for size in [0usize, 125, 126, 65_535, 65_536] {
            let payload = vec![b'z'; size];
            let mut buf = encode_text(&payload);
            let frame = expect_frame(&mut buf);
            assert!(frame.fin);
            assert_eq!(frame.opcode, OpCode::Text);
            assert!(!frame.masked);
            assert_eq!(frame.payload.len(), size);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_masking() {
        let mut buf = BytesMut::from(&[0x81, 0x82, 0x12, 0x34, 0x56, 0x78, 0x41, 0x42][..]);
        let frame = expect_frame(&mut buf);
        assert!(frame.masked);
        assert_eq!(&frame.payload[..], &[0x53, 0x76]);

        let mut buf = encode_masked(OpCode::Text, true, b"hello", [1, 2, 3, 4]);
        assert_eq!(&expect_frame(&mut buf).payload[..], b"hello");
    }

    #[test]
    fn test_partial_delivery() {
        let payload = vec![b'q'; 300];
        let wire = encode_masked(OpCode::Text, true, &payload, [9, 8, 7, 6]);

        for split in 1..wire.len() {
            let mut buf = BytesMut::from(&wire[..split]);
            assert_eq!(decode(&mut buf, MAX), Ok(Decoded::NeedMoreData));
            assert_eq!(buf.len(), split, "consumed bytes at split {split}");
            buf.extend_from_slice(&wire[split..]);
            assert_eq!(&expect_frame(&mut buf).payload[..], &payload[..]);
        }
    }

    #[test]
    fn test_close_reported_before_complete() {
        let mut buf = BytesMut::from(&[0x88][..]);
        assert_eq!(decode(&mut buf, MAX), Ok(Decoded::Close));
    }

    #[test]
    fn test_ping_is_consumed() {
        let mut buf = encode_masked(OpCode::Ping, true, b"beat", [1, 1, 1, 1]);
        buf.extend_from_slice(&encode_masked(OpCode::Text, true, b"{}", [2, 2, 2, 2]));

        let ping = expect_frame(&mut buf);
        assert_eq!(ping.opcode, OpCode::Ping);
        assert_eq!(&ping.payload[..], b"beat");

        let text = expect_frame(&mut buf);
        assert_eq!(text.opcode, OpCode::Text);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_protocol_errors() {
        let mut unknown = BytesMut::from(&[0x83, 0x00][..]);
        assert_eq!(decode(&mut unknown, MAX), Err(FrameError::UnknownOpcode(3)));

        let mut rsv = BytesMut::from(&[0xC1, 0x00][..]);
        assert_eq!(decode(&mut rsv, MAX), Err(FrameError::ReservedBits(0x40)));

        let mut fragmented_ping = BytesMut::from(&[0x09, 0x00][..]);
        assert_eq!(decode(&mut fragmented_ping, MAX), Err(FrameError::FragmentedControl));

        let mut long_ping = BytesMut::from(&[0x89, 126, 0x00, 0x7E][..]);
        assert_eq!(decode(&mut long_ping, MAX), Err(FrameError::ControlTooLong(126)));
    }

    #[test]
    fn test_oversized_length_rejected_without_payload() {
        let mut buf = BytesMut::from(&[0x81, 127][..]);
        buf.extend_from_slice(&(1u64 << 40).to_be_bytes());
        assert_eq!(
            decode(&mut buf, MAX),
            Err(FrameError::PayloadTooLarge {
                len: 1 << 40,
                max: MAX
            })
        );

        let mut buf = encode_text(&[0u8; 200]);
        assert!(matches!(
            decode(&mut buf, 100),
            Err(FrameError::PayloadTooLarge { len: 200, max: 100 })
        ));
    }
}
