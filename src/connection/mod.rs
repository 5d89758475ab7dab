//! Connection Handler Module
//!
//! This module manages individual client connections to multikv.
//! Each client connection is handled by its own async task.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               TCP / Unix Listener (server.rs)               │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept() + ConnectionId
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌──────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │RequestReader │──>│ Execute cmd │──>│ Send reply  │       │
//! │  └──────────────┘   └─────────────┘   └─────────────┘       │
//! │         ▲                                                   │
//! │         └── read deadline, shutdown signal                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Generic streams**: anything `AsyncRead + AsyncWrite`
//! - **Pipelining**: several requests in one packet are answered in order
//! - **Deadlines**: optional idle-read and per-reply write timeouts
//! - **Graceful shutdown**: idle connections close when the server stops
//! - **Statistics**: Tracks connection and command metrics
//!
//! ## Example
//!
//! ```ignore
//! use multikv::connection::{handle_connection, ConnectionSettings, ConnectionStats};
//! use multikv::commands::CommandHandler;
//! use multikv::session::SessionTable;
//! use multikv::storage::Registry;
//! use std::sync::Arc;
//!
//! let sessions = Arc::new(SessionTable::new(Arc::new(Registry::new(15))));
//! let handler = CommandHandler::new(Arc::clone(&sessions));
//! let stats = Arc::new(ConnectionStats::new());
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(
//!     stream,
//!     addr.to_string(),
//!     sessions.next_id(),
//!     handler.clone(),
//!     ConnectionSettings::default(),
//!     Arc::clone(&stats),
//!     shutdown_rx.clone(),
//! ));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionSettings, ConnectionStats,
};
