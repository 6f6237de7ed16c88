//! Event source tagging for readiness dispatch.
//!
//! Every registration carries a `mio::Token` that comes back with each
//! readiness event. Rather than an opaque pointer, the token encodes
//! which source the event refers to: the listening socket or a specific
//! connection's slab key.

use mio::Token;

/// The socket a readiness event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The listening socket became ready to accept.
    Listener,
    /// A client connection, identified by its slab key.
    Connection(usize),
}

/// Token reserved for the listener. Connection slab keys start at 0 and
/// grow upward, so the top of the usize range can never collide.
const LISTENER_TOKEN: Token = Token(usize::MAX);

impl Source {
    /// The token to register this source under.
    pub fn token(self) -> Token {
        match self {
            Source::Listener => LISTENER_TOKEN,
            Source::Connection(id) => Token(id),
        }
    }
}

impl From<Token> for Source {
    fn from(token: Token) -> Self {
        if token == LISTENER_TOKEN {
            Source::Listener
        } else {
            Source::Connection(token.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_round_trip() {
        for id in [0usize, 1, 42, usize::MAX - 1] {
            let token = Source::Connection(id).token();
            assert_eq!(Source::from(token), Source::Connection(id));
        }
    }

    #[test]
    fn test_listener_is_distinct() {
        let token = Source::Listener.token();
        assert_eq!(Source::from(token), Source::Listener);
        assert_ne!(token, Source::Connection(0).token());
    }
}
