use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::store::StoreKind;

/// Target language the generation backend should emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryLanguage {
    /// Free-text SQL statement
    Sql,
    /// JSON document-operation envelope
    Document,
}

impl From<StoreKind> for QueryLanguage {
    fn from(kind: StoreKind) -> Self {
        match kind {
            StoreKind::Relational => QueryLanguage::Sql,
            StoreKind::Document => QueryLanguage::Document,
        }
    }
}

/// One query-synthesis call. Built once per Ask and only ever borrowed afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub schema: String,
    pub store_kind: StoreKind,
    pub language: QueryLanguage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, schema: impl Into<String>, store_kind: StoreKind) -> Self {
        Self {
            prompt: prompt.into(),
            schema: schema.into(),
            store_kind,
            language: store_kind.into(),
            template: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn extension_str(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).and_then(Value::as_str)
    }
}

/// Raw payload returned by a generation backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub backend: String,
}

impl GenerationResult {
    pub fn new(text: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            explanation: None,
            backend: backend.into(),
        }
    }
}

/// Operations a document store accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentOperation {
    Find,
    Insert,
    Update,
    Delete,
    Aggregate,
}

impl DocumentOperation {
    pub const ALL: [DocumentOperation; 5] = [
        DocumentOperation::Find,
        DocumentOperation::Insert,
        DocumentOperation::Update,
        DocumentOperation::Delete,
        DocumentOperation::Aggregate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentOperation::Find => "find",
            DocumentOperation::Insert => "insert",
            DocumentOperation::Update => "update",
            DocumentOperation::Delete => "delete",
            DocumentOperation::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for DocumentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentOperation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Structured envelope a generation backend produces for document stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentQuery {
    pub operation: DocumentOperation,
    #[serde(default)]
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Vec<Value>>,
}
