pub mod action;
pub mod resolve;

pub use action::ActionRunner;
pub use resolve::{resolve_operation, CredentialSet};
