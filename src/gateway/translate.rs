//! Translation between WebSocket text payloads and backend envelopes.
//!
//! On the client side the message type travels inside the JSON body as a
//! `type` field; on the backend side it travels in the envelope header.

use crate::protocols::envelope::{self, Envelope, MAX_BODY_SIZE};
use crate::protocols::websocket::frame;
use bytes::BytesMut;
use serde_json::Value;
use thiserror::Error;

/// Reasons a single message is dropped. The session stays open.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("message body is not a JSON object")]
    NotAnObject,
    #[error("message is missing a 'type' field")]
    MissingType,
    #[error("message 'type' is not a 16-bit unsigned integer: {0}")]
    InvalidType(Value),
    #[error("message body too large: {len} > {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Wrap a client text payload in an envelope.
///
/// The payload is forwarded byte for byte; only its `type` field is read.
/// Returns the message type alongside the encoded envelope.
pub fn client_to_backend(payload: &[u8]) -> Result<(u16, BytesMut), TranslateError> {
    if payload.len() > MAX_BODY_SIZE {
        return Err(TranslateError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_BODY_SIZE,
        });
    }

    let value: Value = serde_json::from_slice(payload)?;
    let object = value.as_object().ok_or(TranslateError::NotAnObject)?;
    let raw_type = object.get("type").ok_or(TranslateError::MissingType)?;
    let msg_type = raw_type
        .as_u64()
        .and_then(|t| u16::try_from(t).ok())
        .ok_or_else(|| TranslateError::InvalidType(raw_type.clone()))?;

    Ok((msg_type, envelope::encode(msg_type, payload)))
}

/// Turn a backend envelope into a WebSocket text frame.
///
/// The envelope type is written into the body's `type` field, replacing any
/// value already there. Other fields are left as they are.
pub fn backend_to_client(envelope: Envelope) -> Result<BytesMut, TranslateError> {
    let mut value = envelope.json;
    let object = value.as_object_mut().ok_or(TranslateError::NotAnObject)?;
    object.insert("type".to_string(), Value::from(envelope.msg_type));

    let text = serde_json::to_vec(&value)?;
    Ok(frame::encode_text(&text))
}
