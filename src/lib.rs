//! # multikv - An In-Memory, Multi-Database Key-Value Server
//!
//! multikv speaks a subset of the RESP protocol and keeps a fixed number of
//! independent logical databases in memory. Each client connection selects
//! one database (database 0 by default) and runs commands against it.
//!
//! ## Features
//!
//! - **Redis-Compatible Framing**: RESP arrays of bulk strings and inline commands
//! - **Multiple Databases**: `SELECT` and `MOVE` across a fixed set of databases
//! - **O(1) RANDOMKEY**: dense key vector with swap-delete per database
//! - **Async I/O**: Built on Tokio, one task per connection, TCP or Unix sockets
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              multikv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌─────────────┐                  │
//! │                     │RequestReader│    │SessionTable │                  │
//! │                     │   (RESP)    │    │ conn -> db  │                  │
//! │                     └─────────────┘    └──────┬──────┘                  │
//! │                                               ▼                         │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │                  Registry                    │    │
//! │                     │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │                     │  │ DB 0   │ │ DB 1   │ │ DB 2   │ │ ...N   │ │    │
//! │                     │  │RwLock  │ │RwLock  │ │RwLock  │ │        │ │    │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     └──────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use multikv::config::Config;
//! use multikv::server::Server;
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::parse();
//!     let listener = Server::bind(&config).await?;
//!     let server = Server::from_config(&config);
//!
//!     server
//!         .run(listener, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`, `ECHO message`, `QUIT`
//! - `SET key value`, `GET key`, `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `INCR key` / `INCRBY key increment`
//! - `DECR key` / `DECRBY key decrement`
//! - `SELECT index`, `MOVE key index`
//! - `RANDOMKEY`, `DBSIZE`, `FLUSHDB`, `FLUSHALL`
//!
//! ## Module Overview
//!
//! - [`protocol`]: request decoding and reply encoding
//! - [`storage`]: per-database storage engine and the database registry
//! - [`session`]: which database each connection has selected
//! - [`commands`]: command dispatch and implementations
//! - [`connection`]: per-client connection loop
//! - [`server`]: listener, accept loop and graceful shutdown
//! - [`config`]: command-line configuration
//!
//! ## Design Highlights
//!
//! ### Per-Database Locking
//!
//! Every database has its own `RwLock`, so clients working on different
//! databases never contend. Counter updates happen under one write lock,
//! and `MOVE` holds both databases' locks (taken in index order) for the
//! whole transfer.
//!
//! ### Binary-Safe Values
//!
//! Keys and values are `bytes::Bytes`. Array-framed requests honour each
//! field's declared length, so values may contain spaces, CR/LF or NUL.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionSettings, ConnectionStats};
pub use protocol::{ParseError, RequestReader, RespValue};
pub use server::Server;
pub use session::{ConnectionId, SessionTable};
pub use storage::{Registry, StorageEngine};

/// The default port multikv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host multikv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// The default listen address, `DEFAULT_HOST:DEFAULT_PORT`
pub fn default_address() -> String {
    format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT)
}

/// Default highest database index (databases 0 through 16)
pub const DEFAULT_DB_NUM: usize = 16;

/// Version of multikv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
