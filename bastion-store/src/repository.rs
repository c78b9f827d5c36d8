//! State store trait (Port)
//!
//! Implementations: `FileStateStore` (production) and `MemoryStateStore`
//! (tests). Writes are synchronous: a transition counts as committed only
//! once `commit` has returned.

use crate::document::StateDocument;
use crate::error::StoreResult;

/// Durable storage for the account's state document
pub trait StateStore: Send + Sync {
    /// Load the last committed document.
    ///
    /// Missing or unreadable state yields the default empty document.
    fn load(&self) -> StoreResult<StateDocument>;

    /// Durably replace the stored document.
    fn commit(&self, document: &StateDocument) -> StoreResult<()>;
}
