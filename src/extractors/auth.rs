//! Build the caller's [`AuthContext`] from request headers.

use crate::auth::AuthContext;
use crate::error::ErrorBody;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

/// Header carrying the caller's tenant id. Required.
pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";
/// Comma-separated role list.
pub const ROLES_HEADER: &str = "X-Roles";

/// Extractor for the caller identity set by the upstream identity layer.
#[derive(Clone, Debug)]
pub struct Caller(pub AuthContext);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = header(parts, TENANT_ID_HEADER).ok_or_else(|| {
            let body = ErrorBody::new("unauthorized", format!("missing {} header", TENANT_ID_HEADER));
            (StatusCode::UNAUTHORIZED, Json(body)).into_response()
        })?;
        let roles = header(parts, ROLES_HEADER).unwrap_or("");
        Ok(Caller(AuthContext::from_roles(tenant, roles.split(','))))
    }
}
