//! Query-related data models.
//!
//! This module defines the bind-value type accepted by every facade operation
//! and the shapes results come back in.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }

    /// Convert a caller-supplied JSON value into a bindable parameter.
    ///
    /// Structured values (arrays and objects) have no scalar bind representation
    /// and are rejected with the offending type and position.
    pub fn from_json(position: usize, value: &JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::Null => Ok(Self::Null),
            JsonValue::Bool(v) => Ok(Self::Bool(*v)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(v) => Ok(Self::Int(v)),
                None => n.as_f64().map(Self::Float).ok_or_else(|| {
                    DbError::invalid_input(format!(
                        "Parameter {} is a number that cannot be represented as i64 or f64: {}",
                        position, n
                    ))
                }),
            },
            JsonValue::String(v) => Ok(Self::String(v.clone())),
            JsonValue::Array(_) => Err(unsupported(position, "array")),
            JsonValue::Object(_) => Err(unsupported(position, "object")),
        }
    }
}

fn unsupported(position: usize, type_name: &str) -> DbError {
    DbError::invalid_input(format!(
        "Unsupported parameter type '{}' at position {}: only null, bool, number and string values can be bound",
        type_name, position
    ))
}

/// Validate and convert a full parameter list.
pub fn params_from_json(values: &[JsonValue]) -> DbResult<Vec<QueryParam>> {
    values
        .iter()
        .enumerate()
        .map(|(position, value)| QueryParam::from_json(position, value))
        .collect()
}

/// Result of a non-query statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    /// Populated by drivers that report it (MySQL, SQLite).
    pub last_insert_id: Option<i64>,
}

/// First column of a scalar row as an integer (`COUNT(*)`, row counts).
///
/// Non-numeric or missing values read as 0.
pub fn scalar_i64(row: &Row) -> i64 {
    row.values().next().map(value_as_i64).unwrap_or(0)
}

/// The `sum` field of an aggregate row, or its first numeric column.
pub fn sum_field(row: &Row) -> f64 {
    if let Some(value) = row.get("sum") {
        return value_as_f64(value);
    }
    row.values()
        .find(|v| v.is_number())
        .map(value_as_f64)
        .unwrap_or(0.0)
}

fn value_as_i64(value: &JsonValue) -> i64 {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        // Drivers return DECIMAL aggregates as strings
        JsonValue::String(s) => s.trim().parse().unwrap_or(0),
        JsonValue::Bool(b) => *b as i64,
        _ => 0,
    }
}

fn value_as_f64(value: &JsonValue) -> f64 {
    match value {
        JsonValue::Number(n) => n.as_f64().unwrap_or(0.0),
        JsonValue::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_params_convert() {
        let params = params_from_json(&[json!(null), json!(true), json!(7), json!(1.5), json!("x")])
            .unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Null,
                QueryParam::Bool(true),
                QueryParam::Int(7),
                QueryParam::Float(1.5),
                QueryParam::String("x".to_string()),
            ]
        );
    }

    #[test]
    fn test_structured_params_rejected_with_type_name() {
        let err = params_from_json(&[json!(1), json!({"a": 1})]).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(msg.contains("object"));
        assert!(msg.contains("position 1"));

        let err = QueryParam::from_json(0, &json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_params_serialize_as_compact_json() {
        let params = vec![
            QueryParam::Int(1),
            QueryParam::String("a".to_string()),
            QueryParam::Null,
        ];
        assert_eq!(serde_json::to_string(&params).unwrap(), r#"[1,"a",null]"#);
    }

    #[test]
    fn test_params_deserialize_prefers_int() {
        let params: Vec<QueryParam> = serde_json::from_str(r#"[3, 3.5, false]"#).unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Int(3),
                QueryParam::Float(3.5),
                QueryParam::Bool(false)
            ]
        );
    }

    #[test]
    fn test_type_name() {
        assert_eq!(QueryParam::Null.type_name(), "null");
        assert!(QueryParam::Null.is_null());
        assert_eq!(QueryParam::Float(0.1).type_name(), "float");
    }

    #[test]
    fn test_scalar_i64() {
        let row: Row = serde_json::from_value(json!({"COUNT(*)": 3})).unwrap();
        assert_eq!(scalar_i64(&row), 3);
        let row: Row = serde_json::from_value(json!({"count": "12"})).unwrap();
        assert_eq!(scalar_i64(&row), 12);
        assert_eq!(scalar_i64(&Row::new()), 0);
    }

    #[test]
    fn test_sum_field() {
        let row: Row = serde_json::from_value(json!({"sum": "10.50"})).unwrap();
        assert_eq!(sum_field(&row), 10.5);
        let row: Row = serde_json::from_value(json!({"label": "x", "total": 4})).unwrap();
        assert_eq!(sum_field(&row), 4.0);
        let row: Row = serde_json::from_value(json!({"sum": null})).unwrap();
        assert_eq!(sum_field(&row), 0.0);
    }

    #[test]
    fn test_scalar_reads_columns_in_select_order() {
        let mut row = Row::new();
        row.insert("total".into(), json!(3));
        row.insert("a_flag".into(), json!(0));
        assert_eq!(scalar_i64(&row), 3);
        assert_eq!(sum_field(&row), 3.0);

        let decoded: Row = serde_json::from_str(r#"{"z": 1, "a": 2}"#).unwrap();
        assert_eq!(decoded.keys().collect::<Vec<_>>(), ["z", "a"]);
    }
}
