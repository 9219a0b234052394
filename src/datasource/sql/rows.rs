//! Row to JSON conversion per backend.
//!
//! Values are decoded from the reported column type. Types without a JSON
//! mapping come out as a `<unsupported TYPE>` string rather than failing
//! the whole query.

use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value};
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{Column, Row, TypeInfo, ValueRef};

fn unsupported(type_name: &str) -> Value {
    Value::String(format!("<unsupported {}>", type_name))
}

fn or_unsupported<T>(result: Result<T, sqlx::Error>, type_name: &str, f: impl FnOnce(T) -> Value) -> Value {
    result.map(f).unwrap_or_else(|_| unsupported(type_name))
}

fn naive_datetime(dt: NaiveDateTime) -> Value {
    Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn base64(bytes: Vec<u8>) -> Value {
    Value::String(BASE64_STANDARD.encode(bytes))
}

/// Column type name, or `None` when the value is SQL NULL.
fn type_of<R: Row>(row: &R, index: usize) -> Option<String>
where
    usize: sqlx::ColumnIndex<R>,
{
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => Some(raw.type_info().name().to_string()),
        _ => None,
    }
}

fn to_map<R: Row>(row: &R, value: impl Fn(&R, usize, &str) -> Value) -> Map<String, Value>
where
    usize: sqlx::ColumnIndex<R>,
{
    row.columns()
        .iter()
        .map(|column| {
            let i = column.ordinal();
            let v = match type_of(row, i) {
                Some(type_name) => value(row, i, &type_name),
                None => Value::Null,
            };
            (column.name().to_string(), v)
        })
        .collect()
}

pub fn mysql_row(row: &MySqlRow) -> Map<String, Value> {
    to_map(row, mysql_value)
}

fn mysql_value(row: &MySqlRow, i: usize, type_name: &str) -> Value {
    let upper = type_name.to_ascii_uppercase();
    match upper.as_str() {
        "BOOLEAN" => or_unsupported(row.try_get::<bool, _>(i), type_name, Value::from),
        t if t.ends_with("UNSIGNED") && t != "DECIMAL UNSIGNED" => {
            or_unsupported(row.try_get::<u64, _>(i), type_name, Value::from)
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            or_unsupported(row.try_get::<i64, _>(i), type_name, Value::from)
        }
        "FLOAT" => or_unsupported(row.try_get::<f32, _>(i), type_name, |f| Value::from(f as f64)),
        "DOUBLE" => or_unsupported(row.try_get::<f64, _>(i), type_name, Value::from),
        // Sent as text on the wire; kept as a string to preserve precision.
        "DECIMAL" | "DECIMAL UNSIGNED" => {
            or_unsupported(row.try_get_unchecked::<String, _>(i), type_name, Value::from)
        }
        "DATE" => or_unsupported(row.try_get::<NaiveDate, _>(i), type_name, |d| {
            Value::String(d.to_string())
        }),
        "TIME" => or_unsupported(row.try_get::<NaiveTime, _>(i), type_name, |t| {
            Value::String(t.to_string())
        }),
        "DATETIME" => or_unsupported(row.try_get::<NaiveDateTime, _>(i), type_name, naive_datetime),
        "TIMESTAMP" => or_unsupported(row.try_get::<DateTime<Utc>, _>(i), type_name, |t| {
            Value::String(t.to_rfc3339())
        }),
        "JSON" => or_unsupported(row.try_get::<Json<Value>, _>(i), type_name, |j| j.0),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" | "GEOMETRY" => {
            or_unsupported(row.try_get::<Vec<u8>, _>(i), type_name, base64)
        }
        _ => match row.try_get::<String, _>(i) {
            Ok(s) => Value::String(s),
            Err(_) => or_unsupported(row.try_get_unchecked::<Vec<u8>, _>(i), type_name, base64),
        },
    }
}

pub fn pg_row(row: &PgRow) -> Map<String, Value> {
    to_map(row, pg_value)
}

fn pg_value(row: &PgRow, i: usize, type_name: &str) -> Value {
    match type_name {
        "BOOL" => or_unsupported(row.try_get::<bool, _>(i), type_name, Value::from),
        "INT2" => or_unsupported(row.try_get::<i16, _>(i), type_name, Value::from),
        "INT4" => or_unsupported(row.try_get::<i32, _>(i), type_name, Value::from),
        "INT8" => or_unsupported(row.try_get::<i64, _>(i), type_name, Value::from),
        "OID" => or_unsupported(row.try_get::<sqlx::postgres::types::Oid, _>(i), type_name, |o| {
            Value::from(o.0)
        }),
        "FLOAT4" => or_unsupported(row.try_get::<f32, _>(i), type_name, |f| Value::from(f as f64)),
        "FLOAT8" => or_unsupported(row.try_get::<f64, _>(i), type_name, Value::from),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "CITEXT" => {
            or_unsupported(row.try_get::<String, _>(i), type_name, Value::from)
        }
        "DATE" => or_unsupported(row.try_get::<NaiveDate, _>(i), type_name, |d| {
            Value::String(d.to_string())
        }),
        "TIME" => or_unsupported(row.try_get::<NaiveTime, _>(i), type_name, |t| {
            Value::String(t.to_string())
        }),
        "TIMESTAMP" => or_unsupported(row.try_get::<NaiveDateTime, _>(i), type_name, naive_datetime),
        "TIMESTAMPTZ" => or_unsupported(row.try_get::<DateTime<Utc>, _>(i), type_name, |t| {
            Value::String(t.to_rfc3339())
        }),
        "JSON" | "JSONB" => or_unsupported(row.try_get::<Json<Value>, _>(i), type_name, |j| j.0),
        "BYTEA" => or_unsupported(row.try_get::<Vec<u8>, _>(i), type_name, base64),
        "TEXT[]" | "VARCHAR[]" => {
            or_unsupported(row.try_get::<Vec<String>, _>(i), type_name, Value::from)
        }
        "INT4[]" => or_unsupported(row.try_get::<Vec<i32>, _>(i), type_name, Value::from),
        "INT8[]" => or_unsupported(row.try_get::<Vec<i64>, _>(i), type_name, Value::from),
        // NUMERIC, UUID, INTERVAL, ... need a cast to text in the query.
        _ => unsupported(type_name),
    }
}

pub fn sqlite_row(row: &SqliteRow) -> Map<String, Value> {
    to_map(row, sqlite_value)
}

/// SQLite reports the storage class of each value, not the declared type.
fn sqlite_value(row: &SqliteRow, i: usize, type_name: &str) -> Value {
    match type_name {
        "INTEGER" | "INT" | "BOOLEAN" => {
            or_unsupported(row.try_get_unchecked::<i64, _>(i), type_name, Value::from)
        }
        "REAL" | "NUMERIC" => {
            or_unsupported(row.try_get_unchecked::<f64, _>(i), type_name, Value::from)
        }
        "BLOB" => or_unsupported(row.try_get_unchecked::<Vec<u8>, _>(i), type_name, base64),
        _ => or_unsupported(row.try_get_unchecked::<String, _>(i), type_name, Value::from),
    }
}
