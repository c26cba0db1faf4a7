// Store router
//
// Scores every registered store against the prompt's keywords using the
// store's schema text and picks the best match. Each store is evaluated in
// its own task; evaluations still running at the deadline are aborted and
// never merged.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::models::StoreDescriptor;
use crate::services::schema_service::SchemaAccessor;
use crate::services::store_registry::StoreRegistry;

/// Default fan-out deadline
pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(5);

const STOP_WORDS: &[&str] = &[
    "a", "about", "add", "all", "an", "and", "any", "are", "as", "at", "be", "been", "by", "can",
    "could", "did", "display", "do", "does", "each", "every", "fetch", "find", "for", "from",
    "get", "give", "have", "has", "how", "i", "in", "into", "is", "it", "its", "list", "many",
    "me", "much", "my", "new", "of", "on", "or", "our", "please", "show", "should", "some",
    "tell", "than", "that", "the", "their", "them", "there", "these", "they", "this", "those",
    "to", "us", "was", "we", "were", "what", "when", "where", "which", "who", "whose", "will",
    "with", "would", "you", "your",
];

#[derive(Debug, Error, PartialEq)]
pub enum RouteError {
    #[error("Prompt is empty or contains no searchable keywords")]
    EmptyPrompt,

    #[error("No stores are registered")]
    NoStoresRegistered,

    #[error("No registered store matches keywords [{}]", keywords.join(", "))]
    NoMatch { keywords: Vec<String> },
}

/// Lower-cased, punctuation-stripped, stop-word-free tokens of a prompt.
/// Duplicates are dropped; order follows first appearance.
pub fn extract_keywords(prompt: &str) -> Vec<String> {
    let lower = prompt.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();

    for token in lower.split_whitespace() {
        let token = token.trim_matches(|c: char| !is_word_char(c));
        if token.is_empty() || STOP_WORDS.contains(&token) {
            continue;
        }
        if !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
    }

    keywords
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Score one keyword against lower-cased schema text.
///
/// * +3 for a separate-word occurrence, otherwise +1 for a substring hit
/// * +2 when an occurrence is followed by `(` and starts the text or follows
///   whitespace (looks like a table or collection name)
/// * +1 when the keyword appears as a separate word more than once
pub fn score_keyword(keyword: &str, schema: &str) -> u32 {
    if keyword.is_empty() {
        return 0;
    }

    let mut whole_words = 0;
    let mut substring = false;
    let mut table_name = false;

    for (idx, _) in schema.match_indices(keyword) {
        substring = true;
        let before = schema[..idx].chars().next_back();
        let after = schema[idx + keyword.len()..].chars().next();

        let starts_word = before.map_or(true, |c| !is_word_char(c));
        let ends_word = after.map_or(true, |c| !is_word_char(c));
        if starts_word && ends_word {
            whole_words += 1;
        }
        if after == Some('(') && before.map_or(true, char::is_whitespace) {
            table_name = true;
        }
    }

    let mut score = 0;
    if whole_words > 0 {
        score += 3;
    } else if substring {
        score += 1;
    }
    if table_name {
        score += 2;
    }
    if whole_words > 1 {
        score += 1;
    }
    score
}

/// Total score of a keyword set against raw schema text
pub fn score_schema(keywords: &[String], schema: &str) -> u32 {
    let schema = schema.to_lowercase();
    keywords.iter().map(|keyword| score_keyword(keyword, &schema)).sum()
}

/// Outcome of one routing pass
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub store: StoreDescriptor,
    pub score: u32,
    pub keywords: Vec<String>,
}

#[derive(Debug)]
struct StoreScore {
    store: StoreDescriptor,
    score: u32,
}

impl StoreScore {
    /// Higher score wins; equal scores fall back to the smaller name so that
    /// the outcome does not depend on task completion order.
    fn beats(&self, other: &StoreScore) -> bool {
        self.score > other.score || (self.score == other.score && self.store.name < other.store.name)
    }
}

/// Picks the store a prompt is about
pub struct StoreRouter {
    registry: Arc<StoreRegistry>,
    schemas: Arc<dyn SchemaAccessor>,
    timeout: Duration,
}

impl StoreRouter {
    pub fn new(registry: Arc<StoreRegistry>, schemas: Arc<dyn SchemaAccessor>) -> Self {
        Self {
            registry,
            schemas,
            timeout: DEFAULT_ROUTE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Select the best-matching store for a prompt
    pub async fn route(&self, prompt: &str) -> Result<StoreDescriptor, RouteError> {
        Ok(self.route_with_details(prompt).await?.store)
    }

    /// Same as `route`, also reporting the winning score and keywords
    pub async fn route_with_details(&self, prompt: &str) -> Result<RouteDecision, RouteError> {
        let keywords = extract_keywords(prompt);
        if keywords.is_empty() {
            return Err(RouteError::EmptyPrompt);
        }

        let stores = self.registry.list();
        if stores.is_empty() {
            return Err(RouteError::NoStoresRegistered);
        }

        tracing::debug!(
            "Routing prompt across {} stores with keywords {:?}",
            stores.len(),
            keywords
        );

        let shared_keywords = Arc::new(keywords.clone());
        let mut tasks = JoinSet::new();
        for store in stores {
            let schemas = self.schemas.clone();
            let keywords = shared_keywords.clone();
            tasks.spawn(async move {
                let score = match schemas.get_schema(&store).await {
                    Ok(schema) if !schema.trim().is_empty() => score_schema(&keywords, &schema),
                    Ok(_) => {
                        tracing::debug!("Store {} has no schema text, scoring 0", store.name);
                        0
                    }
                    Err(e) => {
                        tracing::warn!("Schema fetch failed for store {}: {:#}", store.name, e);
                        0
                    }
                };
                StoreScore { store, score }
            });
        }

        let deadline = Instant::now() + self.timeout;
        let mut best: Option<StoreScore> = None;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(candidate))) => {
                    tracing::debug!("Store {} scored {}", candidate.store.name, candidate.score);
                    if candidate.score == 0 {
                        continue;
                    }
                    let replace = match &best {
                        Some(current) => candidate.beats(current),
                        None => true,
                    };
                    if replace {
                        best = Some(candidate);
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!("Store evaluation task failed: {}", e);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Routing deadline of {:?} reached, abandoning {} pending store evaluations",
                        self.timeout,
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        match best {
            Some(winner) => {
                tracing::info!("Routed prompt to store {} (score {})", winner.store.name, winner.score);
                Ok(RouteDecision {
                    store: winner.store,
                    score: winner.score,
                    keywords,
                })
            }
            None => Err(RouteError::NoMatch { keywords }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StoreEngine, StoreDescriptor};
    use std::collections::HashMap;

    /// Schema accessor backed by fixed text, with optional per-store delay
    struct FixedSchemas {
        schemas: HashMap<String, Result<String, String>>,
        delays: HashMap<String, Duration>,
    }

    impl FixedSchemas {
        fn new() -> Self {
            Self {
                schemas: HashMap::new(),
                delays: HashMap::new(),
            }
        }

        fn with(mut self, name: &str, schema: &str) -> Self {
            self.schemas.insert(name.to_string(), Ok(schema.to_string()));
            self
        }

        fn failing(mut self, name: &str) -> Self {
            self.schemas.insert(name.to_string(), Err("connection refused".to_string()));
            self
        }

        fn delayed(mut self, name: &str, delay: Duration) -> Self {
            self.delays.insert(name.to_string(), delay);
            self
        }
    }

    #[async_trait::async_trait]
    impl SchemaAccessor for FixedSchemas {
        async fn get_schema(&self, store: &StoreDescriptor) -> anyhow::Result<String> {
            if let Some(delay) = self.delays.get(&store.name) {
                tokio::time::sleep(*delay).await;
            }
            match self.schemas.get(&store.name) {
                Some(Ok(schema)) => Ok(schema.clone()),
                Some(Err(e)) => Err(anyhow::anyhow!(e.clone())),
                None => Ok(String::new()),
            }
        }
    }

    fn registry_with(stores: &[(&str, bool)]) -> Arc<StoreRegistry> {
        let registry = Arc::new(StoreRegistry::new());
        for (name, relational) in stores {
            let descriptor = if *relational {
                StoreDescriptor::relational(*name, StoreEngine::Sqlite, ":memory:")
            } else {
                StoreDescriptor::document(*name, "memory://", *name)
            };
            registry.register(descriptor).unwrap();
        }
        registry
    }

    #[test]
    fn test_extract_keywords() {
        let keywords = extract_keywords("Find ALL students, older than 20!");
        assert_eq!(keywords, vec!["students", "older", "20"]);

        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("show me all of the").is_empty());
        assert_eq!(extract_keywords("orders orders ORDERS"), vec!["orders"]);
    }

    #[test]
    fn test_exact_word_outranks_substring() {
        let schema = "courses(title, duration)\nstudent_courses(course_id)";
        let exact = score_keyword("title", schema);
        let substring = score_keyword("titl", schema);
        assert!(exact > substring);
        assert!(substring > 0);
        assert_eq!(score_keyword("missing", schema), 0);
    }

    #[test]
    fn test_table_name_bonus() {
        let as_table = score_keyword("orders", "orders(id, total)");
        let as_column = score_keyword("orders", "customers(id, orders)");
        assert!(as_table > as_column);
    }

    #[test]
    fn test_repeated_word_bonus() {
        let once = score_keyword("name", "students(id, name)");
        let twice = score_keyword("name", "students(id, name)\nteachers(id, name)");
        assert!(twice > once);
    }

    #[tokio::test]
    async fn test_route_whole_word_in_single_store() {
        let registry = registry_with(&[("students_db", true), ("lms_db", false)]);
        let schemas = FixedSchemas::new()
            .with("students_db", "students(id, name, age)")
            .with("lms_db", "courses(title, duration)");
        let router = StoreRouter::new(registry, Arc::new(schemas));

        let store = router.route("find all students older than 20").await.unwrap();
        assert_eq!(store.name, "students_db");

        let store = router.route("list every course duration").await.unwrap();
        assert_eq!(store.name, "lms_db");
    }

    #[tokio::test]
    async fn test_route_empty_prompt() {
        let registry = registry_with(&[("students_db", true)]);
        let router = StoreRouter::new(registry, Arc::new(FixedSchemas::new()));

        assert_eq!(router.route("").await.unwrap_err(), RouteError::EmptyPrompt);
        assert_eq!(router.route("   ").await.unwrap_err(), RouteError::EmptyPrompt);
        assert_eq!(router.route("show me all").await.unwrap_err(), RouteError::EmptyPrompt);
    }

    #[tokio::test]
    async fn test_route_no_stores() {
        let router = StoreRouter::new(Arc::new(StoreRegistry::new()), Arc::new(FixedSchemas::new()));
        assert_eq!(
            router.route("students").await.unwrap_err(),
            RouteError::NoStoresRegistered
        );
    }

    #[tokio::test]
    async fn test_route_no_match() {
        let registry = registry_with(&[("students_db", true)]);
        let schemas = FixedSchemas::new().with("students_db", "students(id, name, age)");
        let router = StoreRouter::new(registry, Arc::new(schemas));

        let err = router.route("invoices overdue").await.unwrap_err();
        assert!(matches!(err, RouteError::NoMatch { .. }));
    }

    #[tokio::test]
    async fn test_failed_schema_fetch_scores_zero() {
        let registry = registry_with(&[("broken_db", true), ("students_db", true)]);
        let schemas = FixedSchemas::new()
            .failing("broken_db")
            .with("students_db", "students(id, name)");
        let router = StoreRouter::new(registry, Arc::new(schemas));

        let store = router.route("students").await.unwrap();
        assert_eq!(store.name, "students_db");
    }

    #[tokio::test]
    async fn test_tie_breaks_on_name() {
        let registry = registry_with(&[("b_db", true), ("a_db", true)]);
        let schemas = FixedSchemas::new()
            .with("a_db", "orders(id)")
            .with("b_db", "orders(id)")
            .delayed("a_db", Duration::from_millis(30));
        let router = StoreRouter::new(registry, Arc::new(schemas));

        for _ in 0..3 {
            let decision = router.route_with_details("orders").await.unwrap();
            assert_eq!(decision.store.name, "a_db");
        }
    }

    #[tokio::test]
    async fn test_late_results_are_dropped() {
        let registry = registry_with(&[("fast_db", true), ("slow_db", true)]);
        let schemas = FixedSchemas::new()
            .with("fast_db", "payments(id, amount)")
            .with("slow_db", "orders(id, total)\norders_archive(orders)")
            .delayed("slow_db", Duration::from_secs(2));
        let router = StoreRouter::new(registry, Arc::new(schemas))
            .with_timeout(Duration::from_millis(100));

        // slow_db would score higher on "orders" but misses the deadline
        let started = std::time::Instant::now();
        let err = router.route("orders").await.unwrap_err();
        assert!(matches!(err, RouteError::NoMatch { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));

        let store = router.route("orders payments").await.unwrap();
        assert_eq!(store.name, "fast_db");
    }
}
