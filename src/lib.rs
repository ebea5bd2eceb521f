//! Resource store: schema-driven, transactional storage of typed resources on
//! PostgreSQL, with a reference graph, parent/child containment, intent hooks
//! and an optional REST surface.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod hooks;
pub mod metadata;
pub mod migration;
pub mod model;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sharing;
pub mod sql;
pub mod state;

pub use auth::{AuthContext, RequestContext};
pub use config::{load_catalog, parse_catalog, resolve, CatalogConfig, ResourceSchema, SchemaRegistry};
pub use db::ensure_database_exists;
pub use error::{ConfigError, StoreError};
pub use hooks::{load_hooks, CommandHook, HookContext, HookError, HookRegistry, IntentHook};
pub use migration::apply_migrations;
pub use model::{Filter, ListSpec, Reference, Resource};
pub use routes::{app, common_routes, resource_routes};
pub use service::ResourceStore;
pub use settings::Settings;
pub use state::AppState;
