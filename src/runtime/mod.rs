//! Echo runtimes.
//!
//! Two backends behind one listener setup path:
//! - `poll`: single-threaded readiness-driven event loop (epoll/kqueue via mio)
//! - `threaded`: blocking I/O, one OS thread per connection
//!
//! Shared abstractions:
//! - `OutputBuffer`: per-connection pending-output queue
//! - `Connection`/`ConnectionTable`: connection state machine and ownership
//! - `Poller`: readiness multiplexer wrapper
//! - `Source`: typed event tags for dispatch

mod buffer;
mod connection;
mod poll;
mod poller;
mod threaded;
mod token;

use crate::config::Config;
use std::io;
use std::net::SocketAddr;

/// Run the readiness-driven event loop runtime.
pub fn run_poll(config: Config) -> io::Result<()> {
    poll::run(config)
}

/// Run the blocking thread-per-connection runtime.
pub fn run_threaded(config: Config) -> io::Result<()> {
    threaded::run(config)
}

/// Resolve the configured listen address.
fn listen_addr(config: &Config) -> io::Result<SocketAddr> {
    format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Create a bound, listening TCP socket with SO_REUSEADDR.
fn bind_listener(
    addr: SocketAddr,
    backlog: u32,
    nonblocking: bool,
) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    if nonblocking {
        socket.set_nonblocking(true)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;

    Ok(socket.into())
}
