//! Table descriptions and the untyped record form of a row.

use crate::{AtelierError, AtelierResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A row as it travels to and from a table service.
pub type Record = Map<String, Value>;

/// Compile-time description of a remote table.
///
/// `Insert` leaves server-generated columns optional, `Update` leaves every
/// column optional. Optional fields should be annotated with
/// `#[serde(skip_serializing_if = "Option::is_none")]` so that absent fields
/// are not sent as explicit nulls.
pub trait Table: Send + Sync + 'static {
    const NAME: &'static str;
    const PRIMARY_KEY: &'static [&'static str];

    type Row: DeserializeOwned + Send + Sync;
    type Insert: Serialize + Send + Sync;
    type Update: Serialize + Send + Sync;
}

/// Serialize a value that must encode as a JSON object.
pub fn to_record<V: Serialize>(value: &V) -> AtelierResult<Record> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(AtelierError::Protocol(format!(
            "Expected a row object, got {}",
            json_type_name(&other)
        ))),
    }
}

pub fn from_record<R: DeserializeOwned>(record: Record) -> AtelierResult<R> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Fail with `MissingPrimaryKey` unless every key column is present.
pub fn require_primary_key(table: &str, key: &[&str], record: &Record) -> AtelierResult<()> {
    for column in key {
        if !record.contains_key(*column) {
            return Err(AtelierError::MissingPrimaryKey {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
    }
    Ok(())
}

/// Split a record into its key columns and the remaining data columns.
pub fn split_primary_key(key: &[&str], record: &Record) -> (Record, Record) {
    let mut matching = Record::new();
    let mut data = Record::new();
    for (column, value) in record {
        if key.contains(&column.as_str()) {
            matching.insert(column.clone(), value.clone());
        } else {
            data.insert(column.clone(), value.clone());
        }
    }
    (matching, data)
}

/// True when every key column is present in `variables` and equal in `row`.
pub fn matches_primary_key(key: &[&str], row: &Record, variables: &Record) -> bool {
    key.iter().all(|column| match variables.get(*column) {
        Some(expected) => row.get(*column) == Some(expected),
        None => false,
    })
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_composite_key_requires_every_column() {
        let key = ["order_id", "product_id"];
        let row = record(json!({"order_id": 1, "product_id": 7, "quantity": 2}));

        assert!(matches_primary_key(
            &key,
            &row,
            &record(json!({"order_id": 1, "product_id": 7}))
        ));
        assert!(!matches_primary_key(
            &key,
            &row,
            &record(json!({"order_id": 1, "product_id": 8}))
        ));
        assert!(!matches_primary_key(&key, &row, &record(json!({"order_id": 1}))));
    }

    #[test]
    fn test_split_primary_key() {
        let (matching, data) = split_primary_key(
            &["id"],
            &record(json!({"id": 3, "name": "Oud Royal", "price": 120})),
        );
        assert_eq!(matching, record(json!({"id": 3})));
        assert_eq!(data, record(json!({"name": "Oud Royal", "price": 120})));
    }

    #[test]
    fn test_require_primary_key_names_missing_column() {
        let err = require_primary_key("order_items", &["order_id", "product_id"], &record(json!({"order_id": 1})))
            .unwrap_err();
        match err {
            AtelierError::MissingPrimaryKey { table, column } => {
                assert_eq!(table, "order_items");
                assert_eq!(column, "product_id");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_to_record_rejects_non_objects() {
        assert!(to_record(&vec![1, 2]).is_err());
    }
}
