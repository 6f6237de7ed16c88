//! Connection state machine and ownership table.
//!
//! Each connection is either reading (no pending output, read-only
//! interest) or draining (unsent echo bytes queued, read+write
//! interest). The table is the sole owner of every connection; entries
//! are created on accept and removed only through the event loop's
//! teardown path.

#![allow(dead_code)] // Accessors not exercised outside tests

use crate::runtime::buffer::OutputBuffer;
use mio::net::TcpStream;
use mio::Interest;
use slab::Slab;

/// Current state of a connection.
///
/// Invariant: `Draining` if and only if the output buffer holds unsent
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No pending output; registered for read readiness only.
    Reading,
    /// Unsent echo bytes queued; registered for read and write readiness.
    Draining,
}

/// A single accepted client connection.
#[derive(Debug)]
pub struct Connection {
    /// The non-blocking client stream.
    pub stream: TcpStream,
    /// Echo bytes not yet written back to the peer.
    pub outbuf: OutputBuffer,
    /// Current state.
    pub state: ConnState,
}

impl Connection {
    /// Create a new connection in initial reading state.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            outbuf: OutputBuffer::new(),
            state: ConnState::Reading,
        }
    }

    /// Readiness interest matching the current state.
    pub fn interest(&self) -> Interest {
        match self.state {
            ConnState::Reading => Interest::READABLE,
            ConnState::Draining => Interest::READABLE | Interest::WRITABLE,
        }
    }

    /// Queue unwritten echo bytes and transition to draining.
    pub fn start_draining(&mut self, unwritten: &[u8]) {
        self.outbuf.append(unwritten);
        self.state = ConnState::Draining;
    }

    /// Transition back to reading once the output buffer is empty.
    pub fn start_reading(&mut self) {
        debug_assert!(self.outbuf.is_empty(), "pending output would be dropped");
        self.state = ConnState::Reading;
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove; slab keys double as the
/// multiplexer tokens. Grows without a fixed cap.
#[derive(Default)]
pub struct ConnectionTable {
    connections: Slab<Connection>,
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            connections: Slab::new(),
        }
    }

    /// Insert a new connection, returning its key.
    pub fn insert(&mut self, conn: Connection) -> usize {
        self.connections.insert(conn)
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Check if a connection exists.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Remove a connection, returning it if it was still present.
    ///
    /// Safe to call repeatedly with the same key; the second and later
    /// calls return `None`.
    pub fn try_remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl std::ops::Index<usize> for ConnectionTable {
    type Output = Connection;

    fn index(&self, id: usize) -> &Connection {
        &self.connections[id]
    }
}

impl std::ops::IndexMut<usize> for ConnectionTable {
    fn index_mut(&mut self, id: usize) -> &mut Connection {
        &mut self.connections[id]
    }
}
