//! Resource routes: /:type and /:type/:id.

use crate::handlers::resource as h;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn resource_routes(state: AppState) -> Router {
    Router::new()
        .route("/:resource_type", get(h::list).post(h::create))
        .route(
            "/:resource_type/:id",
            get(h::read).patch(h::update).delete(h::delete),
        )
        .with_state(state)
}
