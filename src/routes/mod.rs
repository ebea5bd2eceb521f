mod common;
mod resource;

pub use common::common_routes;
pub use resource::resource_routes;

use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

/// Full HTTP surface with request bodies capped at `max_body_bytes`.
pub fn app(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .merge(common_routes(state.clone()))
        .merge(resource_routes(state))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_catalog, resolve};
    use crate::extractors::{ROLES_HEADER, TENANT_ID_HEADER};
    use crate::service::ResourceStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let catalog = parse_catalog(r#"[{ "name": "project" }]"#).unwrap();
        let registry = Arc::new(resolve(&catalog, "resources").unwrap());
        // Never connects: every request below is answered before the store
        // touches the pool.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://127.0.0.1:1/none")
            .unwrap();
        let store = ResourceStore::new(pool, registry);
        app(AppState::new(store, Duration::from_secs(5)), 64)
    }

    #[tokio::test]
    async fn health_and_version() {
        let res = test_app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = test_app()
            .oneshot(Request::get("/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_tenant_is_unauthorized() {
        let res = test_app()
            .oneshot(Request::get("/project").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_type_is_not_found() {
        let req = Request::get("/no_such_type")
            .header(TENANT_ID_HEADER, "t1")
            .body(Body::empty())
            .unwrap();
        let res = test_app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_paging_is_bad_request() {
        let req = Request::get("/project?limit=lots")
            .header(TENANT_ID_HEADER, "t1")
            .header(ROLES_HEADER, "admin")
            .body(Body::empty())
            .unwrap();
        let res = test_app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_create_is_rejected_before_the_database() {
        let req = Request::post("/project")
            .header(TENANT_ID_HEADER, "t1")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"fq_name": []}"#))
            .unwrap();
        let res = test_app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let body = format!(r#"{{"fq_name": ["{}"]}}"#, "x".repeat(200));
        let req = Request::post("/project")
            .header(TENANT_ID_HEADER, "t1")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = test_app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
