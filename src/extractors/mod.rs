pub mod auth;

pub use auth::{Caller, ROLES_HEADER, TENANT_ID_HEADER};
