//! Pluggable key-value persistence.
//!
//! Records are addressed by `(item_type, name)` and grouped under a parent
//! key so that, for example, every claim of an installation or every result
//! of a claim can be listed without scanning. The claim store layers typed
//! records and encryption on top of this trait.

pub mod memory;
pub mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::error::Result;

pub const ITEM_TYPE_INSTALLATION: &str = "installations";
pub const ITEM_TYPE_CLAIM: &str = "claims";
pub const ITEM_TYPE_RESULT: &str = "results";
pub const ITEM_TYPE_OUTPUT: &str = "outputs";

/// A grouped key-value backend.
///
/// Implementations must be safe to share between threads. Saving a name
/// that already exists replaces its data but keeps its position in the
/// group listing.
pub trait Store: Send + Sync {
    fn save(&self, item_type: &str, group: &str, name: &str, data: &[u8]) -> Result<()>;

    /// Like [`save`](Store::save), but fails with `CnabError::AlreadyExists`
    /// when the name is taken. The check and the write happen atomically.
    fn insert(&self, item_type: &str, group: &str, name: &str, data: &[u8]) -> Result<()>;

    /// Returns `CnabError::NotFound` when the record does not exist.
    fn read(&self, item_type: &str, name: &str) -> Result<Vec<u8>>;

    /// Names in `group`, in the order they were first saved.
    fn list(&self, item_type: &str, group: &str) -> Result<Vec<String>>;

    /// Returns `CnabError::NotFound` when the record does not exist.
    fn delete(&self, item_type: &str, name: &str) -> Result<()>;

    fn count(&self, item_type: &str, group: &str) -> Result<usize> {
        Ok(self.list(item_type, group)?.len())
    }
}
