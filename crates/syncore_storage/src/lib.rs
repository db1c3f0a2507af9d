//! # Syncore Storage
//!
//! Key-value storage trait and implementations for Syncore.
//!
//! This crate provides the lowest-level persistence abstraction for the
//! sync engine. Stores are **opaque string stores** - they do not interpret
//! the values they hold.
//!
//! ## Design Principles
//!
//! - Stores are simple key-value maps (get, set, remove)
//! - A `set` replaces the whole value as one logical unit
//! - No knowledge of snapshot layouts or payload encodings
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - For persistent storage, one file per key
//!
//! ## Example
//!
//! ```rust
//! use syncore_storage::{KeyValueStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! store.set("syncState", "{}").unwrap();
//! assert_eq!(store.get("syncState").unwrap().as_deref(), Some("{}"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{validate_key, KeyValueStore};
