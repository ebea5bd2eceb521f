//! ResourceStore: generic transactional CRUD over every catalog type.

mod store;
mod validation;
pub use store::ResourceStore;
pub use validation::{merge_patch, ResourceValidator};
