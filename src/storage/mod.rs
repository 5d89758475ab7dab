//! Storage Module
//!
//! In-memory state for multikv: the per-database storage engine and the
//! registry that holds every database.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── Registry ───────────────────────────┐
//! │  ┌──────────────┐ ┌──────────────┐        ┌──────────────┐      │
//! │  │ DB 0         │ │ DB 1         │  ...   │ DB N         │      │
//! │  │ StorageEngine│ │ StorageEngine│        │ StorageEngine│      │
//! │  │ RwLock       │ │ RwLock       │        │ RwLock       │      │
//! │  └──────────────┘ └──────────────┘        └──────────────┘      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Per-database RwLock**: many readers, one writer, no cross-database contention
//! - **O(1) RANDOMKEY**: a dense key vector with swap-delete
//! - **Atomic MOVE**: both databases locked in index order
//! - **Volatile**: nothing is persisted; state is lost on restart
//!
//! ## Example
//!
//! ```
//! use multikv::storage::Registry;
//! use bytes::Bytes;
//!
//! let registry = Registry::new(15);
//! let db0 = registry.lookup("0").unwrap();
//! let db1 = registry.lookup("1").unwrap();
//!
//! db0.set(Bytes::from("name"), Bytes::from("Ariz"));
//! assert!(db0.move_to(&db1, b"name"));
//! assert_eq!(db1.get(b"name"), Some(Bytes::from("Ariz")));
//! ```

pub mod engine;
pub mod registry;

// Re-export commonly used types
pub use engine::{CounterError, StorageEngine, StorageError};
pub use registry::Registry;
