//! Runtime values of the analysis dialect and their wire forms.
//!
//! The wire shape crossing the sandbox boundary is the one documented for
//! the result envelope: dataframes as `{headers, rows}`, plots as base64
//! bytes, scalars as plain JSON.

use crate::error::{AgentError, Result};
use polars::prelude::*;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// Insertion-ordered string-keyed map.
    Dict(Vec<(String, Value)>),
    Frame(DataFrame),
    Series(Series),
}

impl Value {
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Frame(_) => "dataframe",
            Value::Series(_) => "series",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(v) => !v.is_empty(),
            Value::Dict(v) => !v.is_empty(),
            Value::Frame(df) => df.height() > 0,
            Value::Series(s) => !s.is_empty(),
        }
    }

    pub fn get_key(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn set_key(&mut self, key: &str, value: Value) -> Result<()> {
        match self {
            Value::Dict(pairs) => {
                if let Some(slot) = pairs.iter_mut().find(|(k, _)| k == key) {
                    slot.1 = value;
                } else {
                    pairs.push((key.to_string(), value));
                }
                Ok(())
            }
            other => Err(AgentError::Runtime(format!(
                "cannot assign key into a {}",
                other.type_label()
            ))),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format!("{}", v),
            Value::Str(s) => s.clone(),
            Value::List(items) => format!(
                "[{}]",
                items.iter().map(|v| v.display()).collect::<Vec<_>>().join(", ")
            ),
            Value::Dict(pairs) => format!(
                "{{{}}}",
                pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.display()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Frame(df) => format!("{}", df),
            Value::Series(s) => format!("{}", s),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// JSON form used across the sandbox boundary and in response `to_json`.
    pub fn to_wire_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::json!(b),
            Value::Int(v) => serde_json::json!(v),
            Value::Float(v) => serde_json::json!(v),
            Value::Str(s) => serde_json::json!(s),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| v.to_wire_json())
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Dict(pairs) => {
                let mut map = serde_json::Map::new();
                for (k, v) in pairs {
                    map.insert(k.clone(), v.to_wire_json()?);
                }
                serde_json::Value::Object(map)
            }
            Value::Frame(df) => dataframe_to_rows_json(df),
            Value::Series(s) => {
                let items: Vec<serde_json::Value> = (0..s.len())
                    .map(|i| any_value_to_json(&s.get(i).unwrap_or(AnyValue::Null)))
                    .collect();
                serde_json::Value::Array(items)
            }
        })
    }

    /// Inverse of `to_wire_json`. Objects shaped `{headers, rows}` come
    /// back as frames.
    pub fn from_wire_json(json: &serde_json::Value) -> Result<Value> {
        Ok(match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_wire_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            serde_json::Value::Object(map) => {
                if map.contains_key("headers") && map.contains_key("rows") {
                    Value::Frame(rows_json_to_dataframe(json)?)
                } else {
                    let mut pairs = Vec::with_capacity(map.len());
                    for (k, v) in map {
                        pairs.push((k.clone(), Value::from_wire_json(v)?));
                    }
                    Value::Dict(pairs)
                }
            }
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Frame(a), Value::Frame(b)) => a.equals_missing(b),
            (Value::Series(a), Value::Series(b)) => a == b,
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

pub fn any_value_to_json(av: &AnyValue) -> serde_json::Value {
    match av {
        AnyValue::Null => serde_json::Value::Null,
        AnyValue::Boolean(b) => serde_json::json!(b),
        AnyValue::String(s) => serde_json::json!(s),
        AnyValue::StringOwned(s) => serde_json::json!(s.as_str()),
        AnyValue::Int8(v) => serde_json::json!(v),
        AnyValue::Int16(v) => serde_json::json!(v),
        AnyValue::Int32(v) => serde_json::json!(v),
        AnyValue::Int64(v) => serde_json::json!(v),
        AnyValue::UInt8(v) => serde_json::json!(v),
        AnyValue::UInt16(v) => serde_json::json!(v),
        AnyValue::UInt32(v) => serde_json::json!(v),
        AnyValue::UInt64(v) => serde_json::json!(v),
        AnyValue::Float32(v) => serde_json::json!(v),
        AnyValue::Float64(v) => serde_json::json!(v),
        other => serde_json::json!(format!("{}", other)),
    }
}

pub fn any_value_to_value(av: &AnyValue) -> Value {
    match av {
        AnyValue::Null => Value::None,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::Str(s.to_string()),
        AnyValue::StringOwned(s) => Value::Str(s.to_string()),
        AnyValue::Int8(v) => Value::Int(*v as i64),
        AnyValue::Int16(v) => Value::Int(*v as i64),
        AnyValue::Int32(v) => Value::Int(*v as i64),
        AnyValue::Int64(v) => Value::Int(*v),
        AnyValue::UInt8(v) => Value::Int(*v as i64),
        AnyValue::UInt16(v) => Value::Int(*v as i64),
        AnyValue::UInt32(v) => Value::Int(*v as i64),
        AnyValue::UInt64(v) => Value::Int(*v as i64),
        AnyValue::Float32(v) => Value::Float(*v as f64),
        AnyValue::Float64(v) => Value::Float(*v),
        other => Value::Str(format!("{}", other)),
    }
}

/// `{headers: [..], rows: [[..], ..]}` — the dataframe wire shape.
pub fn dataframe_to_rows_json(df: &DataFrame) -> serde_json::Value {
    let headers: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut rows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let mut row = Vec::with_capacity(headers.len());
        for name in &headers {
            let cell = df
                .column(name)
                .ok()
                .and_then(|s| s.get(idx).ok())
                .map(|av| any_value_to_json(&av))
                .unwrap_or(serde_json::Value::Null);
            row.push(cell);
        }
        rows.push(serde_json::Value::Array(row));
    }
    serde_json::json!({ "headers": headers, "rows": rows })
}

pub fn rows_json_to_dataframe(json: &serde_json::Value) -> Result<DataFrame> {
    let headers = json["headers"]
        .as_array()
        .ok_or_else(|| AgentError::Runtime("dataframe wire form missing headers".into()))?;
    let rows = json["rows"]
        .as_array()
        .ok_or_else(|| AgentError::Runtime("dataframe wire form missing rows".into()))?;
    let headers: Vec<String> = headers
        .iter()
        .map(|h| h.as_str().unwrap_or_default().to_string())
        .collect();

    let mut series = Vec::with_capacity(headers.len());
    for (col_idx, name) in headers.iter().enumerate() {
        let cells: Vec<&serde_json::Value> = rows
            .iter()
            .map(|row| row.get(col_idx).unwrap_or(&serde_json::Value::Null))
            .collect();
        series.push(json_cells_to_series(name, &cells));
    }
    Ok(DataFrame::new(series)?)
}

/// Columns come back with the widest type seen: ints stay ints unless a
/// float appears; anything non-numeric falls back to strings.
fn json_cells_to_series(name: &str, cells: &[&serde_json::Value]) -> Series {
    let mut all_int = true;
    let mut all_numeric = true;
    let mut all_bool = true;
    for cell in cells {
        match cell {
            serde_json::Value::Null => {}
            serde_json::Value::Number(n) => {
                all_bool = false;
                if n.as_i64().is_none() {
                    all_int = false;
                }
            }
            serde_json::Value::Bool(_) => {
                all_int = false;
                all_numeric = false;
            }
            _ => {
                all_int = false;
                all_numeric = false;
                all_bool = false;
            }
        }
    }

    if all_bool && cells.iter().any(|c| c.is_boolean()) {
        let out: Vec<Option<bool>> = cells.iter().map(|c| c.as_bool()).collect();
        Series::new(name, out)
    } else if all_int && cells.iter().any(|c| c.is_number()) {
        let out: Vec<Option<i64>> = cells.iter().map(|c| c.as_i64()).collect();
        Series::new(name, out)
    } else if all_numeric && cells.iter().any(|c| c.is_number()) {
        let out: Vec<Option<f64>> = cells.iter().map(|c| c.as_f64()).collect();
        Series::new(name, out)
    } else {
        let out: Vec<Option<String>> = cells
            .iter()
            .map(|c| match c {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
            .collect();
        Series::new(name, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataframe_wire_round_trip() {
        let df = df!(
            "name" => &["ada", "alan"],
            "age" => &[36i64, 41],
            "score" => &[9.5f64, 8.25]
        )
        .unwrap();
        let wire = dataframe_to_rows_json(&df);
        let back = rows_json_to_dataframe(&wire).unwrap();
        assert!(df.equals_missing(&back));
    }

    #[test]
    fn value_wire_round_trip() {
        let value = Value::Dict(vec![
            ("type".into(), Value::Str("number".into())),
            ("value".into(), Value::Int(5)),
        ]);
        let wire = value.to_wire_json().unwrap();
        let back = Value::from_wire_json(&wire).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert_eq!(Value::Int(5), Value::Float(5.0));
        assert_ne!(Value::Int(5), Value::Str("5".into()));
    }
}
