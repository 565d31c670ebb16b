//! Serve command - runs the HTTP server until SIGINT or SIGTERM.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ember_config::EmberConfig;
use ember_server::{InMemoryDirectory, Server, ServerConfig, ShutdownHandle};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

use crate::logging;

/// Command-line values that take precedence over the loaded configuration.
#[derive(Debug, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub doc_root: Option<PathBuf>,
    pub threads: Option<usize>,
}

pub fn run(project_dir: &Path, overrides: &Overrides) -> Result<()> {
    let mut config =
        EmberConfig::load_from_dir(project_dir).context("Failed to load configuration")?;
    let bind_addr = apply_overrides(&mut config, overrides)?;
    config.validate().context("Invalid configuration")?;

    // Keep the guard alive so buffered log lines are flushed on exit.
    let _log_guard = logging::init(&config.log)?;

    let directory = match &config.directory.users_file {
        Some(path) => InMemoryDirectory::from_toml_file(path)
            .with_context(|| format!("Failed to load users from {}", path.display()))?,
        None => InMemoryDirectory::new(),
    };

    let server = Server::new(server_config(&config, bind_addr), Arc::new(directory))
        .context("Failed to create server")?;
    forward_signals(server.shutdown_handle())?;

    println!();
    println!("ember - event-driven HTTP server");
    println!();
    println!("  Listening on:   {}", server.local_addr());
    println!("  Document root:  {}", config.http.doc_root.display());
    println!("  Workers:        {}", config.workers.threads);
    println!();
    println!("Server is ready. Press Ctrl+C to stop.");
    println!();

    server.run().context("Server error during operation")?;

    println!();
    println!("Server stopped gracefully.");
    Ok(())
}

/// Applies command-line overrides and returns the address to bind.
fn apply_overrides(config: &mut EmberConfig, overrides: &Overrides) -> Result<SocketAddr> {
    let mut bind_addr = parse_address(&config.server.bind_address)?;
    if let Some(port) = overrides.port {
        bind_addr.set_port(port);
        config.server.bind_address = bind_addr.to_string();
    }
    if let Some(doc_root) = &overrides.doc_root {
        config.http.doc_root.clone_from(doc_root);
    }
    if let Some(threads) = overrides.threads {
        config.workers.threads = threads;
    }
    Ok(bind_addr)
}

fn server_config(config: &EmberConfig, bind_addr: SocketAddr) -> ServerConfig {
    ServerConfig::new(bind_addr)
        .with_max_connections(config.server.max_connections)
        .with_threads(config.workers.threads)
        .with_max_pending(config.workers.max_pending)
        .with_tick_interval(Duration::from_secs(config.timer.tick_secs))
        .with_idle_ticks(config.timer.idle_ticks)
        .with_grace_ticks(config.timer.grace_ticks)
        .with_doc_root(&config.http.doc_root)
        .with_default_document(config.http.default_document.as_str())
        .with_read_buffer_size(config.http.read_buffer_size)
        .with_write_buffer_size(config.http.write_buffer_size)
}

/// Turns the first SIGINT or SIGTERM into a server shutdown.
fn forward_signals(shutdown: ShutdownHandle) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
    thread::Builder::new()
        .name("ember-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "received signal, shutting down");
                shutdown.shutdown();
            }
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

/// Parses an address string into a `SocketAddr`.
///
/// Accepts:
/// - Port only: "9006" -> "0.0.0.0:9006"
/// - Full address: "127.0.0.1:9006"
/// - IPv6: `[::1]:9006`
fn parse_address(address: &str) -> Result<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(port) = address.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }

    bail!(
        "Invalid address '{address}'. Use a port (e.g., '9006') or full address (e.g., '127.0.0.1:9006')"
    );
}
