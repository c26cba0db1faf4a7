use serde::Deserialize;
use serde_json::Value;
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::str::FromStr;
use thiserror::Error;

use crate::models::{DocumentOperation, StoreKind};

/// Rejections raised by the query validator
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error("Query contains forbidden operation: {0}")]
    ForbiddenOperation(String),

    #[error("Statement '{found}' is not allowed; expected one of: {allowed}")]
    DisallowedStatement { found: String, allowed: String },

    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Field '{field}' must be {expected}")]
    InvalidField { field: String, expected: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// Allowed leading verbs and forbidden words for relational statements
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValidationPolicy {
    pub allowed: Vec<String>,
    pub forbidden: Vec<String>,
}

impl ValidationPolicy {
    /// Reads and plain writes only
    pub fn strict() -> Self {
        Self::custom(
            &["select", "insert", "update"],
            &["drop", "truncate", "alter", "delete", "create", "grant", "revoke"],
        )
    }

    /// Also allows delete; schema changes stay blocked
    pub fn permissive() -> Self {
        Self::custom(
            &["select", "insert", "update", "delete"],
            &["drop", "truncate", "alter"],
        )
    }

    pub fn custom(allowed: &[&str], forbidden: &[&str]) -> Self {
        Self {
            allowed: allowed.iter().map(|w| w.to_lowercase()).collect(),
            forbidden: forbidden.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Look up a built-in policy by name
    pub fn named(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "strict" => Some(Self::strict()),
            "permissive" => Some(Self::permissive()),
            _ => None,
        }
    }
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

/// Structural and lexical gate in front of query execution
#[derive(Debug, Clone, Default)]
pub struct QueryValidator {
    policy: ValidationPolicy,
}

impl QueryValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Validate a cleaned payload for the given kind of store
    pub fn validate_query(&self, kind: StoreKind, payload: &str) -> Result<(), ValidationError> {
        match kind {
            StoreKind::Relational => self.validate_sql(payload),
            StoreKind::Document => {
                let trimmed = payload.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::EmptyQuery);
                }
                let value: Value = serde_json::from_str(trimmed)
                    .map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
                self.validate_document(&value)
            }
        }
    }

    /// Check a SQL statement against the policy.
    ///
    /// Forbidden words are matched against whole unquoted tokens, not raw
    /// substrings. `SELECT * FROM dropbox`, `SELECT 'drop'` and a column
    /// named `created_at` all pass the strict policy; only a bare `drop`,
    /// `delete` and so on is rejected, wherever it appears in the statement.
    pub fn validate_sql(&self, sql: &str) -> Result<(), ValidationError> {
        let words = statement_words(sql);
        let Some(first) = words.first() else {
            return Err(ValidationError::EmptyQuery);
        };

        if let Some(word) = self
            .policy
            .forbidden
            .iter()
            .find(|forbidden| words.contains(forbidden))
        {
            return Err(ValidationError::ForbiddenOperation(word.clone()));
        }

        if !self.policy.allowed.contains(first) {
            return Err(ValidationError::DisallowedStatement {
                found: first.clone(),
                allowed: self.policy.allowed.join(", "),
            });
        }

        Ok(())
    }

    pub fn validate_document(&self, envelope: &Value) -> Result<(), ValidationError> {
        let Value::Object(fields) = envelope else {
            return Err(invalid("payload", "a JSON object"));
        };

        let operation = match fields.get("operation") {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("operation".into())),
            Some(Value::String(op)) if !op.trim().is_empty() => op,
            Some(_) => return Err(invalid("operation", "a non-empty string")),
        };
        let operation = DocumentOperation::from_str(operation)
            .map_err(|_| ValidationError::UnsupportedOperation(operation.clone()))?;

        match fields.get("collection") {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("collection".into())),
            Some(Value::String(name)) if !name.trim().is_empty() => {}
            Some(_) => return Err(invalid("collection", "a non-empty string")),
        }

        match operation {
            DocumentOperation::Find | DocumentOperation::Delete => {
                require(fields, "filter", Value::is_object, "an object")?;
            }
            DocumentOperation::Insert => {
                require(fields, "document", is_document, "an object or an array of objects")?;
            }
            DocumentOperation::Update => {
                require(fields, "filter", Value::is_object, "an object")?;
                require(fields, "update", Value::is_object, "an object")?;
            }
            DocumentOperation::Aggregate => {
                require(fields, "pipeline", Value::is_array, "an array of stages")?;
            }
        }

        Ok(())
    }
}

fn require(
    fields: &serde_json::Map<String, Value>,
    field: &str,
    check: impl Fn(&Value) -> bool,
    expected: &str,
) -> Result<(), ValidationError> {
    match fields.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field.to_string())),
        Some(value) if !check(value) => Err(invalid(field, expected)),
        Some(_) => Ok(()),
    }
}

fn invalid(field: &str, expected: &str) -> ValidationError {
    ValidationError::InvalidField {
        field: field.to_string(),
        expected: expected.to_string(),
    }
}

fn is_document(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_object),
        _ => false,
    }
}

/// Lower-cased unquoted words of a statement, in order.
///
/// String literals and quoted identifiers are not words, so a column named
/// `created_at` or a value like `'drop off'` never trips the forbidden list.
pub fn statement_words(sql: &str) -> Vec<String> {
    let dialect = GenericDialect {};
    match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens
            .into_iter()
            .filter_map(|token| match token {
                Token::Word(word) if word.quote_style.is_none() => Some(word.value.to_lowercase()),
                _ => None,
            })
            .collect(),
        Err(e) => {
            tracing::debug!("Tokenizer rejected statement, falling back to word scan: {}", e);
            sql.split(|c: char| !(c.is_alphanumeric() || c == '_'))
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase)
                .collect()
        }
    }
}

/// True when the statement returns rows rather than modifying data
pub fn is_read_statement(sql: &str) -> bool {
    const READ_WORDS: [&str; 6] = ["select", "with", "show", "explain", "pragma", "describe"];
    statement_words(sql)
        .first()
        .is_some_and(|w| READ_WORDS.contains(&w.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_accepted_in_any_case() {
        let validator = QueryValidator::default();
        assert!(validator.validate_sql("select * from students").is_ok());
        assert!(validator.validate_sql("SELECT * FROM students").is_ok());
        assert!(validator.validate_sql("  SeLeCt name FROM students WHERE age > 20  ").is_ok());
    }

    #[test]
    fn test_forbidden_words_rejected_in_any_case() {
        let validator = QueryValidator::default();
        for sql in [
            "DROP TABLE students",
            "  drop table students",
            "select 1; Truncate students",
            "SELECT * FROM t; ALTER TABLE t ADD COLUMN x int",
        ] {
            assert!(
                matches!(validator.validate_sql(sql), Err(ValidationError::ForbiddenOperation(_))),
                "{} should be rejected",
                sql
            );
        }
    }

    #[test]
    fn test_column_names_do_not_trip_forbidden_words() {
        let validator = QueryValidator::default();
        assert!(validator
            .validate_sql("SELECT created_at, dropped_count FROM events WHERE note = 'drop off'")
            .is_ok());
        assert!(validator.validate_sql("SELECT * FROM dropbox").is_ok());
        assert!(validator.validate_sql("SELECT 'drop'").is_ok());
        assert_eq!(
            validator.validate_sql("SELECT 1; DROP TABLE dropbox"),
            Err(ValidationError::ForbiddenOperation("drop".to_string()))
        );
    }

    #[test]
    fn test_leading_verb_must_be_allowed() {
        let validator = QueryValidator::default();
        let err = validator.validate_sql("EXPLAIN SELECT 1").unwrap_err();
        assert!(matches!(err, ValidationError::DisallowedStatement { ref found, .. } if found == "explain"));
        assert_eq!(validator.validate_sql("   "), Err(ValidationError::EmptyQuery));
    }

    #[test]
    fn test_policies() {
        let strict = QueryValidator::new(ValidationPolicy::strict());
        let permissive = QueryValidator::new(ValidationPolicy::permissive());
        let delete = "DELETE FROM students WHERE id = 1";

        assert_eq!(
            strict.validate_sql(delete),
            Err(ValidationError::ForbiddenOperation("delete".into()))
        );
        assert!(permissive.validate_sql(delete).is_ok());
        assert!(permissive.validate_sql("DROP TABLE students").is_err());

        assert_eq!(ValidationPolicy::named("Permissive"), Some(ValidationPolicy::permissive()));
        assert_eq!(ValidationPolicy::named("other"), None);
    }

    #[test]
    fn test_document_accepts_well_formed_find() {
        let validator = QueryValidator::default();
        let payload = r#"{"operation":"find","collection":"orders","filter":{}}"#;
        assert!(validator.validate_query(StoreKind::Document, payload).is_ok());
    }

    #[test]
    fn test_document_rejections() {
        let validator = QueryValidator::default();
        let cases = [
            (json!({"operation": "find", "filter": {}}), ValidationError::MissingField("collection".into())),
            (json!({"collection": "orders", "filter": {}}), ValidationError::MissingField("operation".into())),
            (
                json!({"operation": "drop", "collection": "orders"}),
                ValidationError::UnsupportedOperation("drop".into()),
            ),
            (
                json!({"operation": "find", "collection": "", "filter": {}}),
                invalid("collection", "a non-empty string"),
            ),
            (
                json!({"operation": "update", "collection": "orders", "filter": {}}),
                ValidationError::MissingField("update".into()),
            ),
            (
                json!({"operation": "aggregate", "collection": "orders", "pipeline": {}}),
                invalid("pipeline", "an array of stages"),
            ),
            (
                json!({"operation": "insert", "collection": "orders"}),
                ValidationError::MissingField("document".into()),
            ),
        ];

        for (payload, expected) in cases {
            assert_eq!(validator.validate_document(&payload), Err(expected), "{}", payload);
        }
    }

    #[test]
    fn test_document_invalid_json() {
        let validator = QueryValidator::default();
        assert!(matches!(
            validator.validate_query(StoreKind::Document, "{not json"),
            Err(ValidationError::InvalidJson(_))
        ));
        assert_eq!(
            validator.validate_query(StoreKind::Document, ""),
            Err(ValidationError::EmptyQuery)
        );
    }

    #[test]
    fn test_is_read_statement() {
        assert!(is_read_statement("  SELECT 1"));
        assert!(is_read_statement("WITH t AS (SELECT 1) SELECT * FROM t"));
        assert!(!is_read_statement("INSERT INTO t VALUES (1)"));
        assert!(!is_read_statement(""));
    }
}
