use serde_json::{Map, Value};

/// One normalized output row or document: field name -> dynamically typed value.
pub type ResultRecord = Map<String, Value>;

/// Wrap an affected-row count from a write path as a single record.
pub fn rows_affected_record(rows_affected: u64) -> ResultRecord {
    let mut record = Map::new();
    record.insert("rows_affected".to_string(), Value::from(rows_affected));
    record
}

/// Convert a JSON value into a record. Non-object values land under `value`.
pub fn value_to_record(value: Value) -> ResultRecord {
    match value {
        Value::Object(map) => map,
        other => {
            let mut record = Map::new();
            record.insert("value".to_string(), other);
            record
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_affected_record() {
        let record = rows_affected_record(3);
        assert_eq!(record.get("rows_affected"), Some(&json!(3)));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_value_to_record() {
        let record = value_to_record(json!({"id": 1}));
        assert_eq!(record.get("id"), Some(&json!(1)));

        let record = value_to_record(json!(42));
        assert_eq!(record.get("value"), Some(&json!(42)));
    }
}
