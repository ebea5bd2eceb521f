//! Row decoding: list rows back into [`Resource`] values.

use crate::model::{Reference, Resource};
use crate::config::FieldType;
use crate::sql::QueryBuilder;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::Row;

/// Read one typed column into JSON.
fn column_value(row: &PgRow, name: &str, ty: FieldType) -> Result<Value, sqlx::Error> {
    Ok(match ty {
        FieldType::String | FieldType::Timestamp => row
            .try_get::<Option<String>, _>(name)?
            .map(Value::String)
            .unwrap_or(Value::Null),
        FieldType::Integer => row
            .try_get::<Option<i64>, _>(name)?
            .map(Value::from)
            .unwrap_or(Value::Null),
        FieldType::Boolean => row
            .try_get::<Option<bool>, _>(name)?
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        FieldType::Number => row
            .try_get::<Option<f64>, _>(name)?
            .map(Value::from)
            .unwrap_or(Value::Null),
        FieldType::Json => row.try_get::<Option<Value>, _>(name)?.unwrap_or(Value::Null),
    })
}

/// Collect the row's columns (and detail arrays when `detail`) into a map
/// keyed by column alias.
pub fn row_to_map(row: &PgRow, qb: &QueryBuilder, detail: bool) -> Result<Map<String, Value>, sqlx::Error> {
    let mut map = Map::new();
    for c in qb.columns() {
        map.insert(c.name().to_string(), column_value(row, c.name(), c.field_type())?);
    }
    if detail {
        let derived = qb
            .refs
            .iter()
            .map(|r| format!("ref_{}", r.target))
            .chain(qb.inbound.iter().map(|b| format!("backref_{}", b.source)))
            .chain(qb.children.iter().map(|c| format!("children_{}", c.child_type)));
        for alias in derived {
            let v = column_value(row, &alias, FieldType::Json)?;
            map.insert(alias, v);
        }
    }
    Ok(map)
}

/// Build a resource from a row map produced by [`row_to_map`]. Empty
/// reference, back reference and children lists are left out.
pub fn decode(qb: &QueryBuilder, mut map: Map<String, Value>) -> Result<Resource, String> {
    let mut r = Resource::default();
    for c in qb.columns() {
        let v = map.remove(c.name()).unwrap_or(Value::Null);
        c.apply(&mut r, v)?;
    }

    for rs in &qb.refs {
        let Some(v) = map.remove(&format!("ref_{}", rs.target)) else {
            continue;
        };
        let edges = decode_edges(v).map_err(|e| format!("ref_{}: {}", rs.target, e))?;
        if !edges.is_empty() {
            r.references.insert(rs.target.clone(), edges);
        }
    }
    for b in &qb.inbound {
        if let Some(v) = map.remove(&format!("backref_{}", b.source)) {
            let uuids = decode_uuids(v).map_err(|e| format!("backref_{}: {}", b.source, e))?;
            if !uuids.is_empty() {
                r.back_references.insert(b.source.clone(), uuids);
            }
        }
    }
    for c in &qb.children {
        if let Some(v) = map.remove(&format!("children_{}", c.child_type)) {
            let uuids = decode_uuids(v).map_err(|e| format!("children_{}: {}", c.child_type, e))?;
            if !uuids.is_empty() {
                r.children.insert(c.child_type.clone(), uuids);
            }
        }
    }
    Ok(r)
}

/// `[{"uuid": .., "attr": ..}, ..]`; a null attribute means a bare edge.
fn decode_edges(v: Value) -> Result<Vec<Reference>, String> {
    let items = match v {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => return Err(format!("expected array, got {}", other)),
    };
    items
        .into_iter()
        .map(|item| {
            let mut obj = match item {
                Value::Object(obj) => obj,
                other => return Err(format!("expected object, got {}", other)),
            };
            let uuid = match obj.remove("uuid") {
                Some(Value::String(s)) => s,
                other => return Err(format!("edge without uuid: {:?}", other)),
            };
            let attr = obj.remove("attr").filter(|a| !a.is_null());
            Ok(Reference { uuid, attr })
        })
        .collect()
}

fn decode_uuids(v: Value) -> Result<Vec<String>, String> {
    match v {
        Value::Null => Ok(Vec::new()),
        other => serde_json::from_value(other).map_err(|e| e.to_string()),
    }
}
