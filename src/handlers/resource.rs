//! Resource handlers: list, create, read, update, delete for any catalog type.

use crate::error::StoreError;
use crate::extractors::Caller;
use crate::model::{ListSpec, Resource};
use crate::response::{success_many, success_one, success_one_ok};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

fn parse_page(key: &str, v: &str) -> Result<u32, StoreError> {
    v.trim()
        .parse()
        .map_err(|_| StoreError::BadRequest(format!("{} must be a non-negative integer", key)))
}

fn parse_flag(key: &str, v: &str) -> Result<bool, StoreError> {
    match v.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(StoreError::BadRequest(format!("{} must be true or false", key))),
    }
}

/// Query string to list request. Unrecognised keys are column filters with
/// comma-separated values; the store checks them against the type.
pub fn list_spec(params: HashMap<String, String>) -> Result<ListSpec, StoreError> {
    let mut spec = ListSpec::default();
    let mut params: Vec<(String, String)> = params.into_iter().collect();
    params.sort();
    for (k, v) in params {
        match k.as_str() {
            "parent_fq_name_str" => {
                spec.parent_fq_name = Some(v.split(':').map(str::to_string).collect());
            }
            "detail" => spec.detail = parse_flag(&k, &v)?,
            "limit" => spec.limit = Some(parse_page(&k, &v)?),
            "offset" => spec.offset = Some(parse_page(&k, &v)?),
            _ => {
                let values = v.split(',').map(|s| Value::String(s.trim().to_string())).collect();
                spec = spec.with_filter(&k, values);
            }
        }
    }
    Ok(spec)
}

/// Turn a create body into a resource, assigning a UUID when the caller
/// left it out.
pub fn create_candidate(body: Value) -> Result<Resource, StoreError> {
    let mut obj = match body {
        Value::Object(m) => m,
        _ => return Err(StoreError::BadRequest("body must be a JSON object".into())),
    };
    let missing = match obj.get("uuid") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if missing {
        obj.insert("uuid".into(), Value::String(uuid::Uuid::new_v4().to_string()));
    }
    serde_json::from_value(Value::Object(obj)).map_err(|e| StoreError::BadRequest(e.to_string()))
}

pub async fn list(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(resource_type): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, StoreError> {
    let spec = list_spec(params)?;
    let ctx = state.request_context(auth);
    let rows = state.store.list(&ctx, &resource_type, &spec).await?;
    Ok(success_many(rows, spec.limit, spec.offset))
}

pub async fn create(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(resource_type): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, StoreError> {
    let candidate = create_candidate(body)?;
    let ctx = state.request_context(auth);
    let created = state.store.create(&ctx, &resource_type, candidate).await?;
    Ok(success_one(created))
}

pub async fn read(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, StoreError> {
    let ctx = state.request_context(auth);
    let found = state.store.get(&ctx, &resource_type, &id).await?;
    Ok(success_one_ok(found))
}

pub async fn update(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path((resource_type, id)): Path<(String, String)>,
    Json(patch): Json<Value>,
) -> Result<impl IntoResponse, StoreError> {
    let ctx = state.request_context(auth);
    let updated = state.store.update(&ctx, &resource_type, &id, patch).await?;
    Ok(success_one_ok(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, StoreError> {
    let ctx = state.request_context(auth);
    state.store.delete(&ctx, &resource_type, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn list_query_maps_onto_spec() {
        let spec = list_spec(query(&[
            ("parent_fq_name_str", "default-domain:admin"),
            ("detail", "true"),
            ("limit", "10"),
            ("offset", "20"),
            ("all_applications", "true,false"),
        ]))
        .unwrap();
        assert_eq!(
            spec.parent_fq_name,
            Some(vec!["default-domain".to_string(), "admin".to_string()])
        );
        assert!(spec.detail);
        assert_eq!(spec.limit, Some(10));
        assert_eq!(spec.offset, Some(20));
        assert_eq!(spec.filters.len(), 1);
        assert_eq!(spec.filters[0].key, "all_applications");
        assert_eq!(spec.filters[0].values, vec![json!("true"), json!("false")]);
    }

    #[test]
    fn bad_paging_is_rejected() {
        assert!(matches!(list_spec(query(&[("limit", "-1")])), Err(StoreError::BadRequest(_))));
        assert!(matches!(list_spec(query(&[("detail", "maybe")])), Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn create_assigns_uuid_when_absent() {
        let r = create_candidate(json!({ "fq_name": ["default-domain"] })).unwrap();
        assert!(uuid::Uuid::parse_str(&r.uuid).is_ok());

        let r = create_candidate(json!({ "uuid": "u-1", "fq_name": ["d"] })).unwrap();
        assert_eq!(r.uuid, "u-1");

        assert!(matches!(create_candidate(json!([1])), Err(StoreError::BadRequest(_))));
    }
}
