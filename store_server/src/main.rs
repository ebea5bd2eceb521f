//! Resource store server: loads the catalog, applies the schema, registers
//! intent hooks and serves the REST surface.
//!
//! Run from repo root: `cargo run -p store-server`

use resource_store::{
    app, apply_migrations, ensure_database_exists, load_catalog, load_hooks, resolve, AppState, HookRegistry,
    ResourceStore, Settings,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("resource_store=info,store_server=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    ensure_database_exists(&settings.database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await?;

    let catalog = load_catalog(&settings.catalog_path).await?;
    let registry = Arc::new(resolve(&catalog, &settings.schema)?);
    apply_migrations(&pool, &registry).await?;

    let mut hooks = HookRegistry::new(settings.hook_timeout);
    if let Some(path) = &settings.hooks_path {
        let n = load_hooks(path, &mut hooks).await?;
        tracing::info!(hooks = n, path = %path.display(), "intent hooks registered");
    }
    let store = ResourceStore::new(pool, registry)
        .with_hooks(hooks)?
        .with_span(tracing::info_span!("resource_store", schema = %settings.schema));

    let state = AppState::new(store, settings.request_timeout);
    let router = app(state, settings.max_body_bytes);

    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
