//! Poll-based event loop implementation.
//!
//! One thread, one multiplexer, any number of connections. Each event
//! batch is dispatched in order: listener events drain the accept
//! queue, connection events drive the per-connection state machine
//! (read/echo, drain pending output, or tear down). Every socket
//! operation is non-blocking; the only suspension point is the wait.

use crate::config::Config;
use crate::runtime::connection::{ConnState, Connection, ConnectionTable};
use crate::runtime::poller::Poller;
use crate::runtime::token::Source;
use crate::runtime::{bind_listener, listen_addr};
use mio::net::TcpListener;
use mio::{Events, Interest};
use std::io::{self, Read, Write};
use tracing::{debug, error, info, warn};

/// Run the poll-based server.
pub fn run(config: Config) -> io::Result<()> {
    let addr = listen_addr(&config)?;
    let listener = bind_listener(addr, config.backlog, true)?;
    info!(addr = %addr, "Poll runtime started");
    serve(listener, &config)
}

/// Drive the event loop forever over an already-bound, non-blocking
/// listener.
fn serve(listener: std::net::TcpListener, config: &Config) -> io::Result<()> {
    let mut poller = Poller::new()?;
    let mut events = Events::with_capacity(config.event_batch_size);
    let mut listener = TcpListener::from_std(listener);
    poller.register(&mut listener, Source::Listener.token(), Interest::READABLE)?;

    let mut connections = ConnectionTable::new();
    let mut scratch = vec![0u8; config.read_buffer_size];

    loop {
        poller.wait(&mut events)?;

        for event in events.iter() {
            match Source::from(event.token()) {
                Source::Listener => {
                    accept_pending(&listener, &poller, &mut connections);
                }
                Source::Connection(conn_id) => {
                    dispatch(conn_id, event, &poller, &mut connections, &mut scratch);
                }
            }
        }
    }
}

/// Drain the accept queue until it reports would-block.
///
/// A fatal accept error aborts only this batch; the listener stays
/// registered and keeps operating on the next wait cycle.
fn accept_pending(listener: &TcpListener, poller: &Poller, connections: &mut ConnectionTable) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                let conn_id = connections.insert(Connection::new(stream));

                // Re-borrow after insert
                let conn = &mut connections[conn_id];
                let token = Source::Connection(conn_id).token();
                let interest = conn.interest();
                if let Err(e) = poller.register(&mut conn.stream, token, interest) {
                    // A connection unreachable from the multiplexer would
                    // leak; tear it straight back down.
                    warn!(conn_id, error = %e, "Failed to register connection");
                    connections.try_remove(conn_id);
                    continue;
                }

                debug!(conn_id, peer = %peer_addr, active = connections.len(), "Accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Accept error");
                break;
            }
        }
    }
}

/// Drive one connection's readiness event through its handlers.
fn dispatch(
    conn_id: usize,
    event: &mio::event::Event,
    poller: &Poller,
    connections: &mut ConnectionTable,
    scratch: &mut [u8],
) {
    // The connection may have been torn down earlier in this batch and
    // its slot not yet reused; drop the stale event.
    if !connections.contains(conn_id) {
        return;
    }

    // Hangup or socket error closes unconditionally. Pending output is
    // discarded: echo delivery is best-effort past peer disconnect.
    if event.is_error() || event.is_read_closed() {
        debug!(conn_id, "Peer hung up");
        close_connection(poller, connections, conn_id);
        return;
    }

    // Drain queued output before reading anything new, so echoed bytes
    // keep their arrival order.
    let mut resume_reads = false;
    if event.is_writable() {
        match on_writable(conn_id, poller, connections) {
            Ok(drained) => resume_reads = drained,
            Err(e) => {
                debug!(conn_id, error = %e, "Connection error");
                close_connection(poller, connections, conn_id);
                return;
            }
        }
    }

    // Readiness is edge-style: input that arrived while reads were
    // suspended for a drain must be picked up now, not on a future
    // event that will never fire.
    if event.is_readable() || resume_reads {
        if let Err(e) = on_readable(conn_id, poller, connections, scratch) {
            debug!(conn_id, error = %e, "Connection error");
            close_connection(poller, connections, conn_id);
        }
    }
}

/// Read-ready: read and echo until the socket runs dry.
///
/// Bytes are written straight back; only the remainder a blocked write
/// could not take is queued, flipping the connection to draining. The
/// read loop stops as soon as a write is pending so the queue grows by
/// at most one scratch chunk per transition.
fn on_readable(
    conn_id: usize,
    poller: &Poller,
    connections: &mut ConnectionTable,
    scratch: &mut [u8],
) -> io::Result<()> {
    let conn = connections
        .get_mut(conn_id)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

    // Never read while a write is pending; the queued bytes go out first.
    if conn.state == ConnState::Draining {
        return Ok(());
    }

    loop {
        let n = match conn.stream.read(scratch) {
            Ok(0) => {
                // Orderly shutdown of the peer's sending half
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer closed"));
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let mut written = 0;
        while written < n {
            match conn.stream.write(&scratch[written..n]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(m) => written += m,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    conn.start_draining(&scratch[written..n]);
                    debug!(conn_id, queued = conn.outbuf.len(), "Write blocked, queueing remainder");
                    let token = Source::Connection(conn_id).token();
                    let interest = conn.interest();
                    poller.reregister(&mut conn.stream, token, interest)?;
                    return Ok(());
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Write-ready: drain the output buffer in FIFO order.
///
/// Returns `true` once the buffer fully empties, signalling the
/// dispatcher to resume reads.
fn on_writable(
    conn_id: usize,
    poller: &Poller,
    connections: &mut ConnectionTable,
) -> io::Result<bool> {
    let conn = connections
        .get_mut(conn_id)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

    if conn.state != ConnState::Draining {
        return Ok(false);
    }

    while !conn.outbuf.is_empty() {
        match conn.stream.write(conn.outbuf.pending()) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(m) => conn.outbuf.consume(m),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    // Fully drained: the buffer released its allocation on the last
    // consume; revert to read-only interest.
    conn.start_reading();
    let token = Source::Connection(conn_id).token();
    let interest = conn.interest();
    poller.reregister(&mut conn.stream, token, interest)?;
    Ok(true)
}

/// Tear a connection down: deregister, close, release, remove.
///
/// Idempotent — the sole path by which a connection leaves the table.
/// Dropping the removed connection closes its socket and frees its
/// buffer.
fn close_connection(poller: &Poller, connections: &mut ConnectionTable, conn_id: usize) {
    if let Some(mut conn) = connections.try_remove(conn_id) {
        let _ = poller.deregister(&mut conn.stream);
        debug!(conn_id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Shutdown, SocketAddr, TcpStream};
    use std::thread;
    use std::time::Duration;

    /// Bind an ephemeral port and run `serve` on a background thread.
    fn start_server() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Config::default();
        thread::spawn(move || {
            let _ = serve(listener, &config);
        });
        addr
    }

    #[test]
    fn test_echo_round_trip() {
        let addr = start_server();
        let mut stream = TcpStream::connect(addr).unwrap();

        stream.write_all(b"hello").unwrap();

        let mut received = [0u8; 5];
        stream.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"hello");
    }

    #[test]
    fn test_slow_consumer_gets_everything_back() {
        let addr = start_server();
        let stream = TcpStream::connect(addr).unwrap();

        // 1 MB with a pattern that would expose reordering or loss
        let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        // Send everything without reading a byte back; the server must
        // absorb what the kernel buffers cannot.
        let mut writer = stream.try_clone().unwrap();
        let sender = thread::spawn(move || {
            writer.write_all(&payload).unwrap();
        });

        // Let the server hit a blocked write and start queueing
        thread::sleep(Duration::from_millis(100));

        let mut reader = stream;
        let mut received = vec![0u8; expected.len()];
        reader.read_exact(&mut received).unwrap();
        sender.join().unwrap();

        assert_eq!(received, expected);
    }

    #[test]
    fn test_abrupt_disconnect_leaves_other_clients_intact() {
        let addr = start_server();

        let mut survivor = TcpStream::connect(addr).unwrap();
        survivor.write_all(b"first").unwrap();
        let mut received = [0u8; 5];
        survivor.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"first");

        // Another client resets mid-send (linger 0 turns close into RST)
        let mut aborter = TcpStream::connect(addr).unwrap();
        aborter.write_all(b"doomed bytes").unwrap();
        let raw = socket2::Socket::from(aborter);
        raw.set_linger(Some(Duration::from_secs(0))).unwrap();
        drop(raw);

        thread::sleep(Duration::from_millis(50));

        // The surviving connection still echoes
        survivor.write_all(b"second").unwrap();
        let mut received = [0u8; 6];
        survivor.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"second");
    }

    #[test]
    fn test_concurrent_clients_receive_only_their_own_bytes() {
        let addr = start_server();

        let handles: Vec<_> = (0..100u8)
            .map(|i| {
                thread::spawn(move || {
                    let mut stream = TcpStream::connect(addr).unwrap();
                    let pattern = [i; 100];
                    stream.write_all(&pattern).unwrap();

                    let mut received = [0u8; 100];
                    stream.read_exact(&mut received).unwrap();
                    assert_eq!(received, pattern);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_eof_without_data_closes_cleanly() {
        let addr = start_server();
        let mut stream = TcpStream::connect(addr).unwrap();

        // Orderly EOF, zero bytes sent
        stream.shutdown(Shutdown::Write).unwrap();

        // No echo payload; the server tears down and we see EOF back
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_open_close_cycling() {
        let addr = start_server();

        for i in 0..200u32 {
            let mut stream = TcpStream::connect(addr).unwrap();
            let msg = i.to_be_bytes();
            stream.write_all(&msg).unwrap();
            let mut received = [0u8; 4];
            stream.read_exact(&mut received).unwrap();
            assert_eq!(received, msg);
        }

        // Still serving after the churn
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"still here").unwrap();
        let mut received = [0u8; 10];
        stream.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"still here");
    }

    #[test]
    fn test_close_connection_is_idempotent() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(std_listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = std_listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        let poller = Poller::new().unwrap();
        let mut connections = ConnectionTable::new();
        let conn_id =
            connections.insert(Connection::new(mio::net::TcpStream::from_std(accepted)));
        let conn = &mut connections[conn_id];
        let interest = conn.interest();
        poller
            .register(
                &mut conn.stream,
                Source::Connection(conn_id).token(),
                interest,
            )
            .unwrap();

        close_connection(&poller, &mut connections, conn_id);
        assert!(connections.is_empty());

        // Second teardown of the same id is a no-op
        close_connection(&poller, &mut connections, conn_id);
        assert!(connections.is_empty());

        drop(client);
    }
}
