pub mod bundle;
pub mod claim;
pub mod claim_store;
pub mod error;
pub mod schema;
pub mod store;
pub mod timestamp;

pub use bundle::{Bundle, InvocationImage};
pub use claim::{Claim, ClaimResult, Installation, Output, Parameters, Status};
pub use claim_store::{ClaimStore, EncryptionHandler};
pub use error::{AggregateError, CnabError, Result};
pub use store::{MemoryStore, RedbStore, Store};
