//! Blocking thread-per-connection echo runtime.
//!
//! The trivial alternative to the event loop: a blocking accept loop
//! hands every client to its own OS thread, which reads and writes back
//! until EOF or error. No multiplexing, no output buffering — the
//! kernel's blocking writes provide the backpressure.

use crate::config::Config;
use crate::runtime::{bind_listener, listen_addr};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{debug, error, info};

/// Run the threaded server.
pub fn run(config: Config) -> io::Result<()> {
    let addr = listen_addr(&config)?;
    let listener = bind_listener(addr, config.backlog, false)?;
    info!(addr = %addr, "Threaded runtime started");
    serve(listener, config.read_buffer_size)
}

/// Accept forever, spawning one echo thread per client.
fn serve(listener: TcpListener, buffer_size: usize) -> io::Result<()> {
    let mut next_id: u64 = 0;

    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                let conn_id = next_id;
                next_id += 1;
                debug!(conn_id, peer = %peer_addr, "Accepted connection");

                thread::Builder::new()
                    .name(format!("conn-{conn_id}"))
                    .spawn(move || {
                        if let Err(e) = echo_loop(stream, buffer_size) {
                            debug!(conn_id, error = %e, "Connection error");
                        }
                        debug!(conn_id, "Connection closed");
                    })?;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Accept failed");
                return Err(e);
            }
        }
    }
}

/// Echo until the peer closes or an I/O error ends the connection.
fn echo_loop(mut stream: TcpStream, buffer_size: usize) -> io::Result<()> {
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(()), // orderly EOF
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        stream.write_all(&buf[..n])?;
    }
}
