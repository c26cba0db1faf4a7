//! The Ask pipeline: prompt in, normalized records out.
//!
//! Stages run strictly in order and the first failure ends the call. A
//! caller-supplied [`CancelSignal`] is checked between stages; nothing inside
//! a stage is interrupted.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::models::{
    rows_affected_record, AskOutcome, DocumentOperation, DocumentQuery, GenerationRequest,
    ResultRecord, StoreDescriptor, StoreKind,
};
use crate::services::database::{DocumentAdapter, RelationalAdapter};
use crate::services::llm_service::GenerationBackend;
use crate::services::response_cleaner::{clean_document, clean_sql};
use crate::services::router::{RouteError, StoreRouter};
use crate::services::schema_cache::SchemaCache;
use crate::services::schema_service::{render_aggregated_schema, SchemaAccessor};
use crate::services::store_registry::StoreRegistry;
use crate::validation::{is_read_statement, QueryValidator, ValidationError};

/// Pipeline stage boundaries, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AskStage {
    Input,
    Route,
    Generate,
    Clean,
    Validate,
    Resolve,
    Execute,
}

impl AskStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AskStage::Input => "input",
            AskStage::Route => "route",
            AskStage::Generate => "generate",
            AskStage::Clean => "clean",
            AskStage::Validate => "validate",
            AskStage::Resolve => "resolve",
            AskStage::Execute => "execute",
        }
    }
}

impl fmt::Display for AskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AskError {
    #[error("Prompt is empty")]
    EmptyInput,

    #[error("No schema is available; introspect the registered stores first")]
    SchemaNotReady,

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("Generation failed for store {store}: {message}")]
    GenerationFailed { store: String, message: String },

    #[error("Validation failed for store {store}: {source}")]
    ValidationFailed {
        store: String,
        #[source]
        source: ValidationError,
    },

    #[error("Could not resolve a collection for store {store}")]
    CollectionUnresolved { store: String },

    #[error("Execution failed on store {store}: {message}")]
    ExecutionFailed { store: String, message: String },

    #[error("Ask cancelled before the {stage} stage")]
    Cancelled { stage: AskStage },
}

/// Cooperative cancellation flag shared between a caller and one Ask call
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, stage: AskStage) -> Result<(), AskError> {
        if self.is_cancelled() {
            tracing::info!("Ask cancelled before {} stage", stage);
            return Err(AskError::Cancelled { stage });
        }
        Ok(())
    }
}

/// Best-guess collection for a document store: the line of its schema with
/// the most keyword substring hits, up to the first `(`.
pub fn guess_collection(schema: &str, keywords: &[String]) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for line in schema.lines().filter(|line| !line.trim().is_empty()) {
        let lowered = line.to_lowercase();
        let score = keywords.iter().filter(|k| lowered.contains(k.as_str())).count();
        if score > best.map_or(0, |(_, top)| top) {
            best = Some((line, score));
        }
    }

    best.map(|(line, _)| line.split('(').next().unwrap_or(line).trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Orchestrates routing, generation, cleaning, validation and execution
pub struct AskPipeline {
    cache: Arc<SchemaCache>,
    router: StoreRouter,
    validator: QueryValidator,
    relational: Arc<dyn RelationalAdapter>,
    document: Arc<dyn DocumentAdapter>,
}

impl AskPipeline {
    pub fn new(
        registry: Arc<StoreRegistry>,
        cache: Arc<SchemaCache>,
        schemas: Arc<dyn SchemaAccessor>,
        relational: Arc<dyn RelationalAdapter>,
        document: Arc<dyn DocumentAdapter>,
    ) -> Self {
        Self {
            cache,
            router: StoreRouter::new(registry, schemas),
            validator: QueryValidator::default(),
            relational,
            document,
        }
    }

    pub fn with_validator(mut self, validator: QueryValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_route_timeout(mut self, timeout: Duration) -> Self {
        self.router = self.router.with_timeout(timeout);
        self
    }

    pub fn router(&self) -> &StoreRouter {
        &self.router
    }

    /// Answer a prompt with the records produced by the routed store
    pub async fn ask(
        &self,
        prompt: &str,
        backend: &dyn GenerationBackend,
    ) -> Result<Vec<ResultRecord>, AskError> {
        Ok(self.run(prompt, backend, &CancelSignal::new()).await?.rows)
    }

    pub async fn ask_with_cancel(
        &self,
        prompt: &str,
        backend: &dyn GenerationBackend,
        cancel: &CancelSignal,
    ) -> Result<Vec<ResultRecord>, AskError> {
        Ok(self.run(prompt, backend, cancel).await?.rows)
    }

    /// Full pipeline run, also reporting the store and the executed query
    pub async fn run(
        &self,
        prompt: &str,
        backend: &dyn GenerationBackend,
        cancel: &CancelSignal,
    ) -> Result<AskOutcome, AskError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("ask", request_id = %request_id);
        self.run_stages(prompt, backend, cancel).instrument(span).await
    }

    async fn run_stages(
        &self,
        prompt: &str,
        backend: &dyn GenerationBackend,
        cancel: &CancelSignal,
    ) -> Result<AskOutcome, AskError> {
        cancel.check(AskStage::Input)?;
        if prompt.trim().is_empty() {
            return Err(AskError::EmptyInput);
        }
        let schema = render_aggregated_schema(&self.cache);
        if schema.is_empty() {
            return Err(AskError::SchemaNotReady);
        }

        cancel.check(AskStage::Route)?;
        let decision = self.router.route_with_details(prompt).await?;
        let store = decision.store;

        cancel.check(AskStage::Generate)?;
        let guess = match store.kind {
            StoreKind::Document => self.guess_collection(&store.name, &decision.keywords),
            StoreKind::Relational => None,
        };
        let mut request = GenerationRequest::new(prompt, schema, store.kind);
        if let Some(collection) = &guess {
            request = request.with_extension("collection", collection.as_str());
        }

        let generated = backend
            .generate(&request)
            .await
            .map_err(|e| AskError::GenerationFailed {
                store: store.name.clone(),
                message: format!("{:#}", e),
            })?;
        tracing::debug!("{} produced: {}", generated.backend, generated.text);

        cancel.check(AskStage::Clean)?;
        let cleaned = match store.kind {
            StoreKind::Relational => clean_sql(&generated.text),
            StoreKind::Document => clean_document(&generated.text),
        };

        let rows = match store.kind {
            StoreKind::Relational => self.execute_relational(&store, &cleaned, cancel).await?,
            StoreKind::Document => {
                self.execute_document(&store, &cleaned, guess.as_deref(), cancel)
                    .await?
            }
        };

        tracing::info!("Ask on store {} returned {} records", store.name, rows.len());
        Ok(AskOutcome {
            store: store.name,
            kind: store.kind,
            query: cleaned,
            rows,
        })
    }

    fn guess_collection(&self, store: &str, keywords: &[String]) -> Option<String> {
        let schema = self.cache.get(store)?;
        let guess = guess_collection(&schema, keywords);
        tracing::debug!("Collection guess for {}: {:?}", store, guess);
        guess
    }

    async fn execute_relational(
        &self,
        store: &StoreDescriptor,
        sql: &str,
        cancel: &CancelSignal,
    ) -> Result<Vec<ResultRecord>, AskError> {
        cancel.check(AskStage::Validate)?;
        self.validator
            .validate_sql(sql)
            .map_err(|source| validation_failed(store, source))?;

        cancel.check(AskStage::Execute)?;
        let result = if is_read_statement(sql) {
            self.relational.read(&store.name, sql).await
        } else {
            self.relational
                .write(&store.name, sql)
                .await
                .map(|count| vec![rows_affected_record(count)])
        };
        result.map_err(|e| execution_failed(store, e))
    }

    async fn execute_document(
        &self,
        store: &StoreDescriptor,
        payload: &str,
        guess: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<Vec<ResultRecord>, AskError> {
        cancel.check(AskStage::Validate)?;
        if payload.trim().is_empty() {
            return Err(validation_failed(store, ValidationError::EmptyQuery));
        }
        let mut envelope: Value = serde_json::from_str(payload)
            .map_err(|e| validation_failed(store, ValidationError::InvalidJson(e.to_string())))?;

        // An omitted collection takes the pre-resolved guess before validation
        if let Value::Object(fields) = &mut envelope {
            let missing = match fields.get("collection") {
                None | Some(Value::Null) => true,
                Some(Value::String(name)) => name.trim().is_empty(),
                Some(_) => false,
            };
            if missing {
                let collection = guess.ok_or_else(|| AskError::CollectionUnresolved {
                    store: store.name.clone(),
                })?;
                tracing::debug!("Using guessed collection {} for store {}", collection, store.name);
                fields.insert("collection".to_string(), json!(collection));
            }
        }
        self.validator
            .validate_document(&envelope)
            .map_err(|source| validation_failed(store, source))?;

        cancel.check(AskStage::Resolve)?;
        let query: DocumentQuery = serde_json::from_value(envelope)
            .map_err(|e| validation_failed(store, ValidationError::InvalidJson(e.to_string())))?;

        cancel.check(AskStage::Execute)?;
        let database = store.database_name();
        let collection = query.collection.as_str();
        let empty = json!({});
        let filter = query.filter.as_ref().unwrap_or(&empty);

        let result = match query.operation {
            DocumentOperation::Find => {
                self.document
                    .find(&store.name, database, collection, filter)
                    .await
            }
            DocumentOperation::Insert => {
                let document = query.document.as_ref().unwrap_or(&empty);
                self.document
                    .insert(&store.name, database, collection, document)
                    .await
            }
            DocumentOperation::Update => {
                let update = query.update.as_ref().unwrap_or(&empty);
                self.document
                    .update(&store.name, database, collection, filter, update)
                    .await
            }
            DocumentOperation::Delete => {
                self.document
                    .delete(&store.name, database, collection, filter)
                    .await
            }
            DocumentOperation::Aggregate => {
                let pipeline = query.pipeline.as_deref().unwrap_or_default();
                self.document
                    .aggregate(&store.name, database, collection, pipeline)
                    .await
            }
        };
        result.map_err(|e| execution_failed(store, e))
    }
}

fn validation_failed(store: &StoreDescriptor, source: ValidationError) -> AskError {
    tracing::warn!("Rejected query for store {}: {}", store.name, source);
    AskError::ValidationFailed {
        store: store.name.clone(),
        source,
    }
}

fn execution_failed(store: &StoreDescriptor, error: anyhow::Error) -> AskError {
    tracing::error!("Execution failed on store {}: {:#}", store.name, error);
    AskError::ExecutionFailed {
        store: store.name.clone(),
        message: format!("{:#}", error),
    }
}
