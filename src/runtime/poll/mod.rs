//! Readiness-driven event loop backend.
//!
//! Non-blocking I/O multiplexed through mio (epoll on Linux, kqueue on
//! macOS): the loop waits for readiness, then performs read/write
//! syscalls that never block.

mod event_loop;

use crate::config::Config;

/// Run the server using the poll backend.
pub fn run(config: Config) -> std::io::Result<()> {
    event_loop::run(config)
}
