use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::{DocumentOperation, GenerationRequest, GenerationResult, QueryLanguage};

const SYSTEM_PROMPT: &str = "You are a database query generator. Generate only the requested query without any additional text or explanation.";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_HOST: &str = "http://localhost:11434";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A text-generation provider that turns a request into query text
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult>;
}

/// Build the instruction text sent to every provider
pub fn build_prompt(request: &GenerationRequest) -> String {
    match request.language {
        QueryLanguage::Sql => format!(
            r#"You are a SQL expert. Given a database schema and a natural language request, generate one valid SQL statement.

Database Schema:
{schema}

Request: {prompt}

Instructions:
1. Generate ONLY the SQL statement, with no explanations or markdown formatting
2. Use table and column names exactly as they appear in the schema above
3. Prefer SELECT; use INSERT or UPDATE only when the request asks to change data
4. If the request asks how many rows match, use COUNT(*)

SQL:"#,
            schema = request.schema,
            prompt = request.prompt,
        ),
        QueryLanguage::Document => {
            let operations: Vec<&str> = DocumentOperation::ALL.iter().map(|op| op.as_str()).collect();
            let collection_hint = request
                .extension_str("collection")
                .map(|c| format!("\nThe most relevant collection is probably \"{}\".", c))
                .unwrap_or_default();
            format!(
                r#"You are a document database expert. Given the collections below and a natural language request, produce one JSON object describing the operation.

Collections:
{schema}
{collection_hint}
Request: {prompt}

Respond with ONLY a JSON object of this shape:
{{"operation": one of {operations:?}, "collection": "<name>", "filter": {{...}}, "document": {{...}}, "update": {{...}}, "pipeline": [...]}}

Rules:
- find and delete need "filter"; insert needs "document"; update needs "filter" and "update"; aggregate needs "pipeline"
- Use query operators such as $eq, $gt, $lt, $in and update operators such as $set and $inc
- Do not add comments or prose"#,
                schema = request.schema,
                collection_hint = collection_hint,
                prompt = request.prompt,
                operations = operations,
            )
        }
    }
}

/// Pull the generated text out of a gateway response body
fn extract_text(body: &Value) -> Option<&str> {
    body["text"]
        .as_str()
        .or_else(|| body["content"].as_str())
        .or_else(|| body["response"].as_str())
}

async fn read_json(response: reqwest::Response, provider: &str) -> anyhow::Result<Value> {
    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        bail!("{} returned error {}: {}", provider, status, error_text);
    }

    response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", provider))
}

/// Generic JSON gateway: posts `{prompt, max_tokens, temperature}` and reads
/// `text`, `content` or `response` from the reply
pub struct LlmGateway {
    gateway_url: String,
    api_key: Option<String>,
    timeout: Duration,
    http_client: HttpClient,
}

impl LlmGateway {
    pub fn new(gateway_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            api_key,
            timeout,
            http_client: HttpClient::new(),
        }
    }
}

#[async_trait]
impl GenerationBackend for LlmGateway {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        let mut payload = json!({
            "prompt": build_prompt(request),
            "max_tokens": 500,
            "temperature": 0.1,
        });
        if let Some(template) = &request.template {
            payload["template"] = json!(template);
        }

        let mut call = self
            .http_client
            .post(&self.gateway_url)
            .timeout(self.timeout)
            .json(&payload);

        if let Some(api_key) = &self.api_key {
            call = call.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = call.send().await.context("Failed to call LLM gateway")?;
        let body = read_json(response, "LLM gateway").await?;

        let text = extract_text(&body).context("LLM gateway response does not contain generated text")?;
        let mut result = GenerationResult::new(text, self.name());
        result.explanation = body["explanation"].as_str().map(str::to_string);
        Ok(result)
    }
}

/// OpenAI-compatible chat completions endpoint (OpenAI, Groq, local proxies)
pub struct OpenAiChat {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    http_client: HttpClient,
}

impl OpenAiChat {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let api_key = api_key.into();
        let name = name.into();
        if api_key.trim().is_empty() {
            bail!("{} API key is required", name);
        }

        Ok(Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            timeout,
            http_client: HttpClient::new(),
        })
    }
}

#[async_trait]
impl GenerationBackend for OpenAiChat {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": build_prompt(request)},
                ],
                "temperature": 0.1,
            }))
            .send()
            .await
            .with_context(|| format!("Failed to call {}", self.name))?;

        let body = read_json(response, &self.name).await?;
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .with_context(|| format!("No response from {}", self.name))?;

        Ok(GenerationResult::new(text.trim(), self.name.as_str()))
    }
}

/// Google Gemini `generateContent` endpoint
pub struct Gemini {
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    http_client: HttpClient,
}

impl Gemini {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            bail!("Gemini API key is required");
        }

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            timeout,
            http_client: HttpClient::new(),
        })
    }
}

#[async_trait]
impl GenerationBackend for Gemini {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .http_client
            .post(&url)
            .timeout(self.timeout)
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({
                "systemInstruction": {"parts": [{"text": SYSTEM_PROMPT}]},
                "contents": [
                    {"role": "user", "parts": [{"text": build_prompt(request)}]},
                ],
                "generationConfig": {"temperature": 0.1},
            }))
            .send()
            .await
            .context("Failed to call Gemini")?;

        let body = read_json(response, "Gemini").await?;
        let parts = body["candidates"][0]["content"]["parts"]
            .as_array()
            .context("No response from Gemini")?;
        let text: String = parts.iter().filter_map(|part| part["text"].as_str()).collect();
        if text.trim().is_empty() {
            bail!("Gemini returned an empty candidate");
        }

        Ok(GenerationResult::new(text.trim(), self.name()))
    }
}

/// Local Ollama server, non-streaming `/api/generate`
pub struct Ollama {
    host: String,
    model: String,
    timeout: Duration,
    http_client: HttpClient,
}

impl Ollama {
    pub fn new(host: Option<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| OLLAMA_HOST.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.into(),
            timeout,
            http_client: HttpClient::new(),
        }
    }
}

#[async_trait]
impl GenerationBackend for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        let response = self
            .http_client
            .post(format!("{}/api/generate", self.host))
            .timeout(self.timeout)
            .json(&json!({
                "model": self.model,
                "prompt": build_prompt(request),
                "stream": false,
            }))
            .send()
            .await
            .context("Failed to call Ollama")?;

        let body = read_json(response, "Ollama").await?;
        let text = body["response"]
            .as_str()
            .context("Ollama response does not contain generated text")?;
        Ok(GenerationResult::new(text, self.name()))
    }
}

/// Build the configured provider
pub fn create_backend(config: &LlmConfig) -> anyhow::Result<Arc<dyn GenerationBackend>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let api_key = config.api_key.clone().unwrap_or_default();

    let backend: Arc<dyn GenerationBackend> = match config.provider.to_lowercase().as_str() {
        "gateway" => Arc::new(LlmGateway::new(
            config.gateway_url.clone(),
            config.api_key.clone(),
            timeout,
        )),
        "openai" => Arc::new(OpenAiChat::new(
            "openai",
            OPENAI_BASE_URL,
            api_key,
            config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
            timeout,
        )?),
        "groq" => Arc::new(OpenAiChat::new(
            "groq",
            GROQ_BASE_URL,
            api_key,
            config.model.clone().unwrap_or_else(|| "llama-3.1-8b-instant".to_string()),
            timeout,
        )?),
        "gemini" => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
                .unwrap_or_default();
            Arc::new(Gemini::new(
                GEMINI_BASE_URL,
                api_key,
                config.model.clone().unwrap_or_else(|| "gemini-1.5-flash".to_string()),
                timeout,
            )?)
        }
        "ollama" => Arc::new(Ollama::new(
            Some(config.gateway_url.clone()),
            config.model.clone().unwrap_or_else(|| "llama3".to_string()),
            timeout,
        )),
        other => bail!("Unknown LLM provider: {}", other),
    };

    tracing::info!("Using {} generation backend", backend.name());
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoreKind;
    use axum::{routing::post, Json, Router};

    fn llm_config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            gateway_url: "http://localhost:11434".to_string(),
            api_key: None,
            model: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_sql_prompt_contains_schema_and_request() {
        let request = GenerationRequest::new(
            "find all students older than 20",
            "students(id int, name text, age int)",
            StoreKind::Relational,
        );
        let prompt = build_prompt(&request);
        assert!(prompt.contains("students(id int, name text, age int)"));
        assert!(prompt.contains("find all students older than 20"));
        assert!(prompt.contains("SQL"));
    }

    #[test]
    fn test_document_prompt_mentions_collection_guess() {
        let request = GenerationRequest::new("add a course", "courses(title string)", StoreKind::Document)
            .with_extension("collection", "courses");
        let prompt = build_prompt(&request);
        assert!(prompt.contains("\"courses\""));
        assert!(prompt.contains("aggregate"));
        assert!(prompt.contains("JSON object"));
    }

    #[test]
    fn test_extract_text_fallbacks() {
        assert_eq!(extract_text(&json!({"text": "a"})), Some("a"));
        assert_eq!(extract_text(&json!({"content": "b"})), Some("b"));
        assert_eq!(extract_text(&json!({"response": "c"})), Some("c"));
        assert_eq!(extract_text(&json!({"other": "d"})), None);
    }

    #[test]
    fn test_create_backend_by_provider() {
        assert_eq!(create_backend(&llm_config("gateway")).unwrap().name(), "gateway");
        assert_eq!(create_backend(&llm_config("Ollama")).unwrap().name(), "ollama");
        assert!(create_backend(&llm_config("openai")).is_err());
        assert!(create_backend(&llm_config("unknown")).is_err());

        let mut config = llm_config("groq");
        config.api_key = Some("key".to_string());
        assert_eq!(create_backend(&config).unwrap().name(), "groq");
    }

    #[test]
    fn test_create_gemini_backend() {
        let mut config = llm_config("gemini");
        config.api_key = Some("key".to_string());
        assert_eq!(create_backend(&config).unwrap().name(), "gemini");

        assert!(Gemini::new(GEMINI_BASE_URL, " ", "gemini-pro", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_gemini_round_trip() {
        let app = Router::new().route(
            "/v1beta/models/gemini-pro:generateContent",
            post(|headers: axum::http::HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["x-goog-api-key"], "secret");
                let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default();
                assert!(prompt.contains("students"));
                Json(json!({
                    "candidates": [{
                        "content": {"parts": [{"text": "SELECT * "}, {"text": "FROM students"}]}
                    }]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let gemini = Gemini::new(
            format!("http://{}/v1beta", addr),
            "secret",
            "gemini-pro",
            Duration::from_secs(5),
        )
        .unwrap();
        let request = GenerationRequest::new("list students", "students(id int)", StoreKind::Relational);
        let result = gemini.generate(&request).await.unwrap();

        assert_eq!(result.text, "SELECT * FROM students");
        assert_eq!(result.backend, "gemini");
    }

    #[tokio::test]
    async fn test_gateway_round_trip() {
        let app = Router::new().route(
            "/generate",
            post(|Json(body): Json<Value>| async move {
                let prompt = body["prompt"].as_str().unwrap_or_default();
                assert!(prompt.contains("students"));
                Json(json!({"content": "SELECT * FROM students", "explanation": "all rows"}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let gateway = LlmGateway::new(format!("http://{}/generate", addr), None, Duration::from_secs(5));
        let request = GenerationRequest::new("list students", "students(id int)", StoreKind::Relational);
        let result = gateway.generate(&request).await.unwrap();

        assert_eq!(result.text, "SELECT * FROM students");
        assert_eq!(result.explanation.as_deref(), Some("all rows"));
        assert_eq!(result.backend, "gateway");
    }

    #[tokio::test]
    async fn test_gateway_error_status() {
        let app = Router::new().route(
            "/generate",
            post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let gateway = LlmGateway::new(format!("http://{}/generate", addr), None, Duration::from_secs(5));
        let request = GenerationRequest::new("list students", "students(id int)", StoreKind::Relational);
        let err = gateway.generate(&request).await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }
}
