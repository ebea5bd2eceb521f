//! Convert serde_json::Value to types that sqlx can bind.

use crate::config::FieldType;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// A value that can be bound to a PostgreSQL query. Every placeholder the
/// builder renders carries an explicit cast, and each variant reports its
/// own wire type. NULL keeps the column type so a cached statement always
/// sees the same parameter types.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null(FieldType),
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Json(Value),
}

impl PgBindValue {
    /// Bind `v` as a value of `ty`. Strings are accepted for every scalar
    /// type so query-string filters can be passed through unchanged.
    pub fn typed(ty: FieldType, v: &Value) -> Result<Self, String> {
        if v.is_null() {
            return Ok(PgBindValue::Null(ty));
        }
        Ok(match ty {
            FieldType::String | FieldType::Timestamp => match v {
                Value::String(s) => PgBindValue::String(s.clone()),
                Value::Number(n) => PgBindValue::String(n.to_string()),
                Value::Bool(b) => PgBindValue::String(b.to_string()),
                other => return Err(format!("expected string, got {}", other)),
            },
            FieldType::Integer => match v {
                Value::Number(n) => n
                    .as_i64()
                    .map(PgBindValue::I64)
                    .ok_or_else(|| format!("expected integer, got {}", n))?,
                Value::String(s) => s
                    .trim()
                    .parse()
                    .map(PgBindValue::I64)
                    .map_err(|_| format!("expected integer, got {:?}", s))?,
                other => return Err(format!("expected integer, got {}", other)),
            },
            FieldType::Number => match v {
                Value::Number(n) => n
                    .as_f64()
                    .map(PgBindValue::F64)
                    .ok_or_else(|| format!("expected number, got {}", n))?,
                Value::String(s) => s
                    .trim()
                    .parse()
                    .map(PgBindValue::F64)
                    .map_err(|_| format!("expected number, got {:?}", s))?,
                other => return Err(format!("expected number, got {}", other)),
            },
            FieldType::Boolean => match v {
                Value::Bool(b) => PgBindValue::Bool(*b),
                Value::String(s) if s.eq_ignore_ascii_case("true") => PgBindValue::Bool(true),
                Value::String(s) if s.eq_ignore_ascii_case("false") => PgBindValue::Bool(false),
                other => return Err(format!("expected boolean, got {}", other)),
            },
            FieldType::Json => match v {
                Value::String(s) => {
                    PgBindValue::Json(serde_json::from_str(s).unwrap_or_else(|_| v.clone()))
                }
                other => PgBindValue::Json(other.clone()),
            },
        })
    }

    /// Bind a stored column value of `ty` exactly as given. Unlike
    /// [`PgBindValue::typed`], strings are never parsed: a JSON column holding
    /// `"123"` stores the string, not the number.
    pub fn for_column(ty: FieldType, v: &Value) -> Result<Self, String> {
        if v.is_null() {
            return Ok(PgBindValue::Null(ty));
        }
        Ok(match (ty, v) {
            (FieldType::Json, other) => PgBindValue::Json(other.clone()),
            (FieldType::String | FieldType::Timestamp, Value::String(s)) => PgBindValue::String(s.clone()),
            (FieldType::Integer, Value::Number(n)) => n
                .as_i64()
                .map(PgBindValue::I64)
                .ok_or_else(|| format!("expected integer, got {}", n))?,
            (FieldType::Number, Value::Number(n)) => n
                .as_f64()
                .map(PgBindValue::F64)
                .ok_or_else(|| format!("expected number, got {}", n))?,
            (FieldType::Boolean, Value::Bool(b)) => PgBindValue::Bool(*b),
            (ty, other) => return Err(format!("expected {:?}, got {}", ty, other)),
        })
    }

    pub fn text(s: &str) -> Self {
        PgBindValue::String(s.to_string())
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null(_) => IsNull::Yes,
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::String(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf)?,
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null(ty) => field_type_info(*ty),
            PgBindValue::String(_) => <String as Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as Type<Postgres>>::type_info(),
            PgBindValue::Json(_) => <Value as Type<Postgres>>::type_info(),
        })
    }
}

fn field_type_info(ty: FieldType) -> PgTypeInfo {
    match ty {
        FieldType::String | FieldType::Timestamp => <String as Type<Postgres>>::type_info(),
        FieldType::Integer => <i64 as Type<Postgres>>::type_info(),
        FieldType::Boolean => <bool as Type<Postgres>>::type_info(),
        FieldType::Number => <f64 as Type<Postgres>>::type_info(),
        FieldType::Json => <Value as Type<Postgres>>::type_info(),
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_string_values_coerce_to_column_type() {
        assert_eq!(PgBindValue::typed(FieldType::Integer, &json!("42")), Ok(PgBindValue::I64(42)));
        assert_eq!(PgBindValue::typed(FieldType::Boolean, &json!("TRUE")), Ok(PgBindValue::Bool(true)));
        assert_eq!(PgBindValue::typed(FieldType::Number, &json!("1.5")), Ok(PgBindValue::F64(1.5)));
        assert_eq!(
            PgBindValue::typed(FieldType::Json, &json!("[\"a\",\"b\"]")),
            Ok(PgBindValue::Json(json!(["a", "b"])))
        );
        assert_eq!(
            PgBindValue::typed(FieldType::String, &json!(7)),
            Ok(PgBindValue::String("7".into()))
        );
    }

    #[test]
    fn mismatches_are_reported() {
        assert!(PgBindValue::typed(FieldType::Integer, &json!("x")).is_err());
        assert!(PgBindValue::typed(FieldType::Boolean, &json!(1)).is_err());
        assert!(PgBindValue::typed(FieldType::String, &json!({"a": 1})).is_err());
    }

    #[test]
    fn column_binds_keep_strings_as_strings() {
        assert_eq!(
            PgBindValue::for_column(FieldType::Json, &json!("123")),
            Ok(PgBindValue::Json(json!("123")))
        );
        assert_eq!(
            PgBindValue::for_column(FieldType::Json, &json!("[1]")),
            Ok(PgBindValue::Json(json!("[1]")))
        );
        assert_eq!(
            PgBindValue::for_column(FieldType::Json, &json!({ "a": [1] })),
            Ok(PgBindValue::Json(json!({ "a": [1] })))
        );
        assert_eq!(PgBindValue::for_column(FieldType::Number, &json!(5)), Ok(PgBindValue::F64(5.0)));
        assert!(PgBindValue::for_column(FieldType::Integer, &json!("42")).is_err());
        assert!(PgBindValue::for_column(FieldType::Boolean, &json!("true")).is_err());
        assert!(PgBindValue::for_column(FieldType::String, &json!(7)).is_err());
        assert_eq!(
            PgBindValue::for_column(FieldType::String, &Value::Null),
            Ok(PgBindValue::Null(FieldType::String))
        );
    }

    #[test]
    fn null_keeps_column_type() {
        let null = PgBindValue::typed(FieldType::Integer, &Value::Null).unwrap();
        assert_eq!(null, PgBindValue::Null(FieldType::Integer));
        assert_eq!(
            <PgBindValue as Encode<Postgres>>::produces(&null),
            Some(<i64 as Type<Postgres>>::type_info())
        );
    }
}
