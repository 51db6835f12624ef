//! Readiness token layout.
//!
//! Each session owns two tokens derived from its slab key: one for the
//! client socket and one for the backend socket. Going from a ready token to
//! its session, and from a session to either token, is arithmetic only.

use crate::runtime::connection::Role;
use mio::Token;

/// The listening socket.
pub const LISTENER: Token = Token(usize::MAX);

/// The shutdown waker.
pub const WAKER: Token = Token(usize::MAX - 1);

/// Token for one leg of a session.
pub fn token_for(session: usize, role: Role) -> Token {
    let leg = match role {
        Role::Client => 0,
        Role::Backend => 1,
    };
    Token((session << 1) | leg)
}

/// Session key and leg for a connection token.
pub fn session_of(token: Token) -> (usize, Role) {
    let role = if token.0 & 1 == 0 {
        Role::Client
    } else {
        Role::Backend
    };
    (token.0 >> 1, role)
}
