//! Shapes backend results and failures into the gateway's response contract.

use log::{debug, error};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::{PgRow, PgValueFormat, Postgres};
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};
use std::fmt::Write as _;

use crate::backend::{BackendFailure, RawResultSet};
use crate::error::GatewayError;

/// SQLSTATE `query_canceled`, raised when `statement_timeout` fires server-side.
const QUERY_CANCELED: &str = "57014";

pub type ExecutionOutcome = Result<QueryData, GatewayError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub rows: Vec<Map<String, JsonValue>>,
    pub row_count: usize,
    pub columns: Vec<ColumnDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    /// PostgreSQL type OID.
    pub data_type: u32,
    pub type_name: String,
}

pub fn normalize(result: Result<RawResultSet, BackendFailure>) -> ExecutionOutcome {
    match result {
        Ok(set) => shape(set),
        Err(failure) => Err(classify_failure(failure)),
    }
}

fn shape(set: RawResultSet) -> ExecutionOutcome {
    let RawResultSet { columns, rows } = set;

    let mut shaped = Vec::with_capacity(rows.len());
    for (index, values) in rows.into_iter().enumerate() {
        if values.len() != columns.len() {
            let detail = format!(
                "row {} has {} values for {} columns",
                index,
                values.len(),
                columns.len()
            );
            error!("Result shaping failed: {}", detail);
            return Err(GatewayError::Internal(detail));
        }

        // Duplicate names keep their first position and take the later value.
        let row: Map<String, JsonValue> = columns
            .iter()
            .map(|column| column.name.clone())
            .zip(values)
            .collect();
        shaped.push(row);
    }

    let columns = columns
        .into_iter()
        .map(|column| ColumnDescriptor {
            name: column.name,
            data_type: column.type_oid,
            type_name: column.type_name,
        })
        .collect();

    Ok(QueryData {
        row_count: shaped.len(),
        rows: shaped,
        columns,
    })
}

fn classify_failure(failure: BackendFailure) -> GatewayError {
    match failure {
        BackendFailure::Statement { sqlstate, message }
            if sqlstate.as_deref() == Some(QUERY_CANCELED) =>
        {
            debug!("Backend cancelled statement: {}", message);
            GatewayError::Timeout
        }
        BackendFailure::Statement { message, .. } => GatewayError::Backend(message),
        BackendFailure::Connection(detail) => {
            error!("Sandbox connection fault: {}", detail);
            GatewayError::Internal(detail)
        }
    }
}

/// Decode every column of a row into JSON, in column order.
pub(crate) fn decode_row(row: &PgRow) -> Vec<JsonValue> {
    row.columns()
        .iter()
        .map(|column| decode_value(row, column.ordinal(), column.type_info().name()))
        .collect()
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn number<N: Into<serde_json::Number>>(value: Option<N>) -> JsonValue {
    value.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null)
}

fn text<S: ToString>(value: Option<S>) -> JsonValue {
    value
        .map(|v| JsonValue::String(v.to_string()))
        .unwrap_or(JsonValue::Null)
}

/// Finite floats stay numbers; NaN and the infinities have no JSON number form.
fn float(value: Option<f64>) -> JsonValue {
    match value {
        Some(v) => serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(non_finite(v).to_string())),
        None => JsonValue::Null,
    }
}

fn non_finite(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn array<T>(values: Option<Vec<T>>, convert: impl Fn(Option<T>) -> JsonValue) -> JsonValue {
    values
        .map(|items| JsonValue::Array(items.into_iter().map(|v| convert(Some(v))).collect()))
        .unwrap_or(JsonValue::Null)
}

fn decode_value(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
    match type_name {
        "BOOL" => get::<bool>(row, idx).map(JsonValue::Bool).unwrap_or(JsonValue::Null),
        "INT2" => number(get::<i16>(row, idx)),
        "INT4" => number(get::<i32>(row, idx)),
        "INT8" => number(get::<i64>(row, idx)),
        "OID" => number(get::<sqlx::postgres::types::Oid>(row, idx).map(|oid| oid.0)),
        "FLOAT4" => float(get::<f32>(row, idx).map(f64::from)),
        "FLOAT8" => float(get::<f64>(row, idx)),
        "NUMERIC" => numeric(row, idx),
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "BPCHAR" => text(get::<String>(row, idx)),
        "UUID" => text(get::<uuid::Uuid>(row, idx)),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, idx)
            .map(|v| JsonValue::String(v.to_rfc3339()))
            .unwrap_or(JsonValue::Null),
        "TIMESTAMP" => text(get::<chrono::NaiveDateTime>(row, idx)),
        "DATE" => text(get::<chrono::NaiveDate>(row, idx)),
        "TIME" => text(get::<chrono::NaiveTime>(row, idx)),
        "JSON" | "JSONB" => get::<JsonValue>(row, idx).unwrap_or(JsonValue::Null),
        "BYTEA" => get::<Vec<u8>>(row, idx)
            .map(|bytes| JsonValue::String(format!("\\x{}", hex::encode(bytes))))
            .unwrap_or(JsonValue::Null),
        "BOOL[]" => array(get::<Vec<bool>>(row, idx), |v| {
            v.map(JsonValue::Bool).unwrap_or(JsonValue::Null)
        }),
        "INT2[]" => array(get::<Vec<i16>>(row, idx), number),
        "INT4[]" => array(get::<Vec<i32>>(row, idx), number),
        "INT8[]" => array(get::<Vec<i64>>(row, idx), number),
        "FLOAT8[]" => array(get::<Vec<f64>>(row, idx), float),
        "TEXT[]" | "VARCHAR[]" | "NAME[]" => array(get::<Vec<String>>(row, idx), text),
        _ => fallback(row, idx, type_name),
    }
}

fn numeric(row: &PgRow, idx: usize) -> JsonValue {
    let Ok(raw) = row.try_get_raw(idx) else {
        return JsonValue::Null;
    };
    if raw.is_null() {
        return JsonValue::Null;
    }

    let rendered = match raw.format() {
        PgValueFormat::Binary => raw.as_bytes().ok().and_then(decode_numeric),
        PgValueFormat::Text => raw.as_str().ok().map(str::to_owned),
    };

    rendered.map(JsonValue::String).unwrap_or(JsonValue::Null)
}

/// Unknown types: pass text through when the backend sent text, otherwise try
/// a string decode and give up with null.
fn fallback(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
    if let Some(value) = get::<String>(row, idx) {
        return JsonValue::String(value);
    }

    match row.try_get_raw(idx) {
        Ok(raw) if !raw.is_null() && matches!(raw.format(), PgValueFormat::Text) => {
            text(raw.as_str().ok())
        }
        Ok(raw) if !raw.is_null() => {
            debug!("No JSON rendering for column type {}", type_name);
            JsonValue::Null
        }
        _ => JsonValue::Null,
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render PostgreSQL's binary NUMERIC (base-10000 digits) in its canonical
/// text form, keeping the declared display scale.
pub(crate) fn decode_numeric(bytes: &[u8]) -> Option<String> {
    let word = |at: usize| -> Option<i16> {
        let pair = bytes.get(at..at + 2)?;
        Some(i16::from_be_bytes([pair[0], pair[1]]))
    };

    let ndigits = usize::try_from(word(0)?).ok()?;
    let weight = i32::from(word(2)?);
    let sign = word(4)? as u16;
    let dscale = usize::from(word(6)? as u16);

    match sign {
        NUMERIC_NAN => return Some("NaN".to_string()),
        NUMERIC_PINF => return Some("Infinity".to_string()),
        NUMERIC_NINF => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(8 + 2 * i))
        .collect::<Option<Vec<i16>>>()?;
    let digit_at = |position: i32| -> i16 {
        usize::try_from(position)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for position in 0..=weight {
            let digit = digit_at(position);
            if position == 0 {
                write!(out, "{}", digit).ok()?;
            } else {
                write!(out, "{:04}", digit).ok()?;
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut position = weight + 1;
        while fraction.len() < dscale {
            write!(fraction, "{:04}", digit_at(position)).ok()?;
            position += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Some(out)
}
