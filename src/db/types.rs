//! Database-agnostic cell decoding.
//!
//! Rows from every driver are flattened into ordered JSON values so that
//! row-sets, scalars and repository mappers all share one representation.
//!
//! # Architecture
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction

use crate::models::DatabaseType;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

/// Text layout used for zone-less timestamps in result cells.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    DateTime,
    Text,
    Binary,
    Json,
    Uuid,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("date") || lower.contains("time") {
        return TypeCategory::DateTime;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Value Encoding
// =============================================================================

/// Binary cells are carried as base64 text.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn naive_date_time_value(v: NaiveDateTime) -> JsonValue {
    JsonValue::String(v.format(DATE_TIME_FORMAT).to_string())
}

/// Map a decode result to JSON: nulls and decode failures both become `Null`.
fn cell<T>(
    decoded: Result<Option<T>, sqlx::Error>,
    to_json: impl FnOnce(T) -> JsonValue,
) -> JsonValue {
    decoded.ok().flatten().map(to_json).unwrap_or(JsonValue::Null)
}

/// Return from the enclosing decoder with the first Rust type the column
/// decodes as.
macro_rules! first_decodable {
    ($row:expr, $idx:expr; $($ty:ty => $to_json:expr),+ $(,)?) => {
        $(
            if let Ok(v) = $row.try_get::<Option<$ty>, _>($idx) {
                return v.map($to_json).unwrap_or(JsonValue::Null);
            }
        )+
    };
}

// =============================================================================
// Row Flattening
// =============================================================================

/// Flattens a driver row into column names and ordered JSON values.
pub trait RowValues {
    fn column_names(&self) -> Vec<String>;
    fn values(&self) -> Vec<JsonValue>;
}

fn names<R: Row>(row: &R) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

impl RowValues for MySqlRow {
    fn column_names(&self) -> Vec<String> {
        names(self)
    }

    fn values(&self) -> Vec<JsonValue> {
        (0..self.len())
            .map(|idx| {
                let type_name = self.column(idx).type_info().name();
                mysql::decode_column(self, idx, type_name)
            })
            .collect()
    }
}

impl RowValues for PgRow {
    fn column_names(&self) -> Vec<String> {
        names(self)
    }

    fn values(&self) -> Vec<JsonValue> {
        (0..self.len())
            .map(|idx| postgres::decode_column(self, idx, self.column(idx).type_info().name()))
            .collect()
    }
}

impl RowValues for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        names(self)
    }

    fn values(&self) -> Vec<JsonValue> {
        (0..self.len())
            .map(|idx| sqlite::decode_column(self, idx, self.column(idx).type_info().name()))
            .collect()
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, type_name: &str) -> JsonValue {
        match categorize_type(type_name, DatabaseType::MySQL) {
            TypeCategory::Decimal => decimal(row.try_get::<Option<RawDecimal>, _>(idx)),
            // sqlx splits MySQL integers by signedness, not width
            TypeCategory::Integer if type_name.contains("UNSIGNED") => {
                cell(row.try_get::<Option<u64>, _>(idx), JsonValue::from)
            }
            TypeCategory::Integer => cell(row.try_get::<Option<i64>, _>(idx), JsonValue::from),
            TypeCategory::Boolean => cell(row.try_get::<Option<bool>, _>(idx), JsonValue::Bool),
            TypeCategory::Float => float(row, idx),
            TypeCategory::DateTime => date_time(row, idx),
            TypeCategory::Binary => cell(row.try_get::<Option<Vec<u8>>, _>(idx), |v| {
                encode_binary(&v)
            }),
            TypeCategory::Json => cell(row.try_get::<Option<JsonValue>, _>(idx), |v| v),
            _ => text(row, idx),
        }
    }

    fn float(row: &MySqlRow, idx: usize) -> JsonValue {
        first_decodable!(row, idx;
            f64 => float_value,
            f32 => |v: f32| float_value(f64::from(v)),
        );
        JsonValue::Null
    }

    fn date_time(row: &MySqlRow, idx: usize) -> JsonValue {
        first_decodable!(row, idx;
            NaiveDateTime => naive_date_time_value,
            DateTime<Utc> => |v: DateTime<Utc>| naive_date_time_value(v.naive_utc()),
            NaiveDate => |v: NaiveDate| JsonValue::String(v.to_string()),
            NaiveTime => |v: NaiveTime| JsonValue::String(v.to_string()),
        );
        text(row, idx)
    }

    fn text(row: &MySqlRow, idx: usize) -> JsonValue {
        first_decodable!(row, idx;
            String => JsonValue::String,
            Vec<u8> => |v: Vec<u8>| encode_binary(&v),
        );
        JsonValue::Null
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        match categorize_type(type_name, DatabaseType::PostgreSQL) {
            TypeCategory::Decimal => decimal(row.try_get::<Option<RawDecimal>, _>(idx)),
            TypeCategory::Integer => integer(row, idx),
            TypeCategory::Boolean => cell(row.try_get::<Option<bool>, _>(idx), JsonValue::Bool),
            TypeCategory::Float => float(row, idx),
            TypeCategory::DateTime => date_time(row, idx),
            TypeCategory::Binary => cell(row.try_get::<Option<Vec<u8>>, _>(idx), |v| {
                encode_binary(&v)
            }),
            TypeCategory::Json => cell(row.try_get::<Option<JsonValue>, _>(idx), |v| v),
            TypeCategory::Uuid => cell(row.try_get::<Option<uuid::Uuid>, _>(idx), |v| {
                JsonValue::String(v.to_string())
            }),
            _ => cell(row.try_get::<Option<String>, _>(idx), JsonValue::String),
        }
    }

    // Each Rust integer only decodes its exact INT2/INT4/INT8 width
    fn integer(row: &PgRow, idx: usize) -> JsonValue {
        first_decodable!(row, idx;
            i64 => JsonValue::from,
            i32 => JsonValue::from,
            i16 => JsonValue::from,
        );
        JsonValue::Null
    }

    fn float(row: &PgRow, idx: usize) -> JsonValue {
        first_decodable!(row, idx;
            f64 => float_value,
            f32 => |v: f32| float_value(f64::from(v)),
        );
        JsonValue::Null
    }

    fn date_time(row: &PgRow, idx: usize) -> JsonValue {
        first_decodable!(row, idx;
            NaiveDateTime => naive_date_time_value,
            DateTime<Utc> => |v: DateTime<Utc>| JsonValue::String(v.to_rfc3339()),
            NaiveDate => |v: NaiveDate| JsonValue::String(v.to_string()),
            NaiveTime => |v: NaiveTime| JsonValue::String(v.to_string()),
        );
        cell(row.try_get::<Option<String>, _>(idx), JsonValue::String)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, type_name: &str) -> JsonValue {
        match categorize_type(type_name, DatabaseType::SQLite) {
            TypeCategory::Boolean => cell(row.try_get::<Option<bool>, _>(idx), JsonValue::Bool),
            TypeCategory::DateTime => {
                first_decodable!(row, idx; NaiveDateTime => naive_date_time_value);
                dynamic(row, idx, false)
            }
            TypeCategory::Json => dynamic(row, idx, true),
            // Declared types are affinities only; the stored class decides
            _ => dynamic(row, idx, false),
        }
    }

    /// Decode by the value's storage class.
    fn dynamic(row: &SqliteRow, idx: usize, parse_json: bool) -> JsonValue {
        let Ok(raw) = row.try_get_raw(idx) else {
            return JsonValue::Null;
        };
        if raw.is_null() {
            return JsonValue::Null;
        }
        match raw.type_info().name() {
            "INTEGER" => cell(row.try_get_unchecked::<Option<i64>, _>(idx), JsonValue::from),
            "REAL" => cell(row.try_get_unchecked::<Option<f64>, _>(idx), float_value),
            "BLOB" => cell(row.try_get_unchecked::<Option<Vec<u8>>, _>(idx), |v| {
                encode_binary(&v)
            }),
            _ => cell(row.try_get_unchecked::<Option<String>, _>(idx), |v| {
                if parse_json {
                    serde_json::from_str(&v).unwrap_or(JsonValue::String(v))
                } else {
                    JsonValue::String(v)
                }
            }),
        }
    }
}

fn decimal(decoded: Result<Option<RawDecimal>, sqlx::Error>) -> JsonValue {
    match decoded {
        Ok(v) => v.map(|d| JsonValue::String(d.0)).unwrap_or(JsonValue::Null),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to decode decimal cell");
            JsonValue::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_date_time() {
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::DateTime
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::DateTime
        );
        assert_eq!(
            categorize_type("date", DatabaseType::SQLite),
            TypeCategory::DateTime
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        // SQLite NUMERIC is a float
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_text_and_unknown() {
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("NULL", DatabaseType::SQLite),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(
            encode_binary(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_non_finite_float_becomes_text() {
        assert_eq!(float_value(f64::NAN), JsonValue::String("NaN".to_string()));
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
    }
}
