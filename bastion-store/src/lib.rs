//! Bastion Storage Layer
//!
//! Durable, crash-safe record of open positions and trading statistics.
//!
//! # Architecture
//!
//! - **StateStore trait**: Load/commit of the state document (port)
//! - **File store**: Atomic JSON file with rotating backups (production)
//! - **In-memory store**: Same contract without a filesystem (tests)
//! - **StateBook**: Live copy of the document, changed only after a commit
//!
//! # Usage
//!
//! ```rust
//! use bastion_store::{MemoryStateStore, StateBook};
//! use std::sync::Arc;
//!
//! let book = StateBook::open(Arc::new(MemoryStateStore::new())).unwrap();
//! assert!(book.snapshot().positions.is_empty());
//! ```

#![warn(clippy::all)]

// Modules
mod book;
mod document;
mod error;
mod file;
mod memory;
mod repository;

// Re-exports
pub use book::StateBook;
pub use document::{StateDocument, CURRENT_VERSION};
pub use error::{StoreError, StoreResult};
pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use repository::StateStore;
