//! echoplex: a TCP echo server
//!
//! Two interchangeable runtimes:
//! - Poll: single-threaded readiness-driven event loop (epoll/kqueue via mio)
//! - Threaded: blocking I/O with one OS thread per connection
//!
//! Features:
//! - Byte-exact FIFO echo with no framing or transformation
//! - Backpressure absorption via per-connection output buffering
//! - Configuration via CLI arguments or TOML file

mod config;
mod runtime;

use config::{Config, RuntimeType};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        runtime = ?config.runtime,
        backlog = config.backlog,
        read_buffer_size = config.read_buffer_size,
        "Starting echoplex server"
    );

    match config.runtime {
        RuntimeType::Poll => run_poll(config),
        RuntimeType::Threaded => run_threaded(config),
    }
}

/// Run with the readiness-driven event loop (epoll on Linux, kqueue on macOS)
fn run_poll(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using poll runtime (epoll/kqueue)");
    runtime::run_poll(config)?;
    Ok(())
}

/// Run with blocking I/O, one thread per connection
fn run_threaded(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using threaded runtime (blocking I/O)");
    runtime::run_threaded(config)?;
    Ok(())
}
