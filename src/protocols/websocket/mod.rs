//! WebSocket protocol engine.
//!
//! - `handshake`: HTTP upgrade request parsing and the `101` response
//! - `frame`: frame decoding (with unmasking) and unmasked frame encoding

pub mod frame;
pub mod handshake;
