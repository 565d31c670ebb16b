//! # ember-server: event-driven HTTP/1.1 server core
//!
//! One reactor thread multiplexes every socket through `mio`; a fixed pool of
//! worker threads parses requests and assembles responses; a timer heap reaps
//! idle and closed connections in two phases so nothing is freed while it
//! may still be referenced.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           ember-server                           │
//! │  ┌──────────┐   ┌──────────────┐   ┌─────────────┐               │
//! │  │ Listener │ → │   Reactor    │ → │ Worker pool │ → parse/route │
//! │  │  (TCP)   │   │ (mio poll)   │ ← │ completions │               │
//! │  └──────────┘   └──────────────┘   └─────────────┘               │
//! │                   │         │                                    │
//! │           ┌───────┴──┐  ┌───┴──────────┐                         │
//! │           │  Table   │  │ Timer queue  │  (weak handles only)    │
//! │           └──────────┘  └──────────────┘                         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use ember_server::{InMemoryDirectory, Server, ServerConfig};
//!
//! let config = ServerConfig::new(([0, 0, 0, 0], 9006)).with_doc_root("./resources");
//! let server = Server::new(config, Arc::new(InMemoryDirectory::new()))?;
//! let shutdown = server.shutdown_handle();
//! server.run()?;
//! ```

mod config;
pub mod connection;
pub mod directory;
mod error;
pub mod handler;
pub mod http;
mod server;
pub mod signal;
pub mod sync;
pub mod table;
#[cfg(test)]
mod tests;
pub mod timer;
pub mod work_queue;
pub mod worker_pool;

pub use config::ServerConfig;
pub use connection::{ConnLimits, HttpConn};
pub use directory::{InMemoryDirectory, UserDirectory};
pub use error::{ServerError, ServerResult};
pub use server::Server;
pub use signal::{ShutdownHandle, Signal, SignalSender};
pub use table::{ConnHandle, ConnectionTable};
pub use timer::{Expired, TimerId, TimerQueue};
pub use worker_pool::{Handler, WorkerPool, WorkerPoolConfig};
