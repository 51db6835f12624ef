//! Wire protocol implementations.
//!
//! - `envelope`: length-prefixed binary protocol on the backend leg
//! - `websocket`: handshake and framing on the client leg

pub mod envelope;
pub mod websocket;
