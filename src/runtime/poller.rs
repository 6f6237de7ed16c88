//! Readiness multiplexer.
//!
//! Thin wrapper over `mio::Poll` (epoll on Linux, kqueue on macOS)
//! exposing register/reregister/deregister and a blocking wait. The
//! wait retries interrupted syscalls internally, so callers never see
//! a spurious failure from signal delivery.

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use std::io;

pub struct Poller {
    poll: Poll,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        Ok(Self { poll: Poll::new()? })
    }

    /// Register a socket for readiness notification under `token`.
    pub fn register<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().register(source, token, interest)
    }

    /// Change the interest mask of an already-registered socket.
    pub fn reregister<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().reregister(source, token, interest)
    }

    /// Remove a socket from the readiness set.
    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Block until at least one registered socket has a pending event.
    ///
    /// A single event may combine multiple conditions (e.g. readable and
    /// peer-closed at once); callers must handle every combination.
    pub fn wait(&mut self, events: &mut Events) -> io::Result<()> {
        loop {
            match self.poll.poll(events, None) {
                Ok(()) => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::token::Source as Tag;
    use mio::net::TcpListener;

    #[test]
    fn test_wait_reports_listener_readiness() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let addr = std_listener.local_addr().unwrap();

        let mut poller = Poller::new().unwrap();
        let mut listener = TcpListener::from_std(std_listener);
        poller
            .register(&mut listener, Tag::Listener.token(), Interest::READABLE)
            .unwrap();

        // A pending inbound connection makes the listener read-ready
        let _client = std::net::TcpStream::connect(addr).unwrap();

        let mut events = Events::with_capacity(8);
        poller.wait(&mut events).unwrap();

        let tokens: Vec<_> = events.iter().map(|e| Tag::from(e.token())).collect();
        assert!(tokens.contains(&Tag::Listener));

        poller.deregister(&mut listener).unwrap();
    }
}
