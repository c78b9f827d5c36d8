//! In-memory state store
//!
//! Used for testing and dry runs without a state file.
//! Thread-safe using RwLock for concurrent access.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::document::StateDocument;
use crate::error::{StoreError, StoreResult};
use crate::repository::StateStore;

/// In-memory store for testing
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    document: RwLock<Option<StateDocument>>,
    commits: AtomicUsize,
    fail_next_commit: AtomicBool,
}

impl MemoryStateStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `document` (simulates a previous run)
    pub fn with_document(document: StateDocument) -> Self {
        Self {
            document: RwLock::new(Some(document)),
            ..Self::default()
        }
    }

    /// Number of successful commits
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Last committed document, if any
    pub fn committed(&self) -> Option<StateDocument> {
        self.document.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Make the next commit fail with an IO error
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> StoreResult<StateDocument> {
        Ok(self.committed().unwrap_or_default())
    }

    fn commit(&self, document: &StateDocument) -> StoreResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        *self.document.write().unwrap_or_else(PoisonError::into_inner) = Some(document.clone());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
