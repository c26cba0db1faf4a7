use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{StoreEngine, StoreKind};
use crate::validation::ValidationPolicy;

const DEFAULT_CONFIG_FILE: &str = "askdb";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub router: RouterConfig,
    pub validation: ValidationConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// gateway, openai, groq, gemini or ollama
    pub provider: String,
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    pub timeout_ms: u64,
}

impl RouterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which relational statements the validator lets through
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// strict, permissive or custom
    pub policy: String,
    pub allowed: Option<Vec<String>>,
    pub forbidden: Option<Vec<String>>,
}

impl ValidationConfig {
    pub fn to_policy(&self) -> Result<ValidationPolicy, config::ConfigError> {
        if self.policy.eq_ignore_ascii_case("custom") {
            let (Some(allowed), Some(forbidden)) = (&self.allowed, &self.forbidden) else {
                return Err(config::ConfigError::Message(
                    "custom validation policy needs both `allowed` and `forbidden` lists".to_string(),
                ));
            };
            let allowed: Vec<&str> = allowed.iter().map(String::as_str).collect();
            let forbidden: Vec<&str> = forbidden.iter().map(String::as_str).collect();
            return Ok(ValidationPolicy::custom(&allowed, &forbidden));
        }

        ValidationPolicy::named(&self.policy).ok_or_else(|| {
            config::ConfigError::Message(format!("unknown validation policy: {}", self.policy))
        })
    }
}

/// Limits applied to relational stores
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub statement_timeout_secs: u64,
    pub max_pool_size: usize,
}

impl DatabaseConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

/// One store to register at startup
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    pub engine: StoreEngine,
    /// Optional; must agree with the engine when given
    pub kind: Option<StoreKind>,
    #[serde(default)]
    pub url: String,
    /// Logical database for document stores, defaults to the store name
    pub database: Option<String>,
    /// JSON file of `{collection: [documents]}` loaded into a memory store
    pub seed: Option<PathBuf>,
}

impl Config {
    /// Defaults, then the config file (`ASKDB_CONFIG` or `./askdb.toml` if
    /// present), then environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let file = env::var("ASKDB_CONFIG").ok().map(PathBuf::from);
        Self::load(file.as_deref())
    }

    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("llm.provider", "gateway")?
            .set_default("llm.gateway_url", "http://localhost:8080")?
            .set_default("llm.timeout_secs", 60)?
            .set_default("router.timeout_ms", 5000)?
            .set_default("validation.policy", "strict")?
            .set_default("database.statement_timeout_secs", 30)?
            .set_default("database.max_pool_size", 16)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        // Load from environment variables
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(provider) = env::var("LLM_PROVIDER") {
            builder = builder.set_override("llm.provider", provider)?;
        }

        if let Ok(gateway_url) = env::var("LLM_GATEWAY_URL") {
            builder = builder.set_override("llm.gateway_url", gateway_url)?;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            builder = builder.set_override("llm.api_key", Some(api_key))?;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            builder = builder.set_override("llm.model", Some(model))?;
        }

        if let Ok(timeout) = env::var("LLM_TIMEOUT_SECS") {
            builder = builder.set_override("llm.timeout_secs", timeout.parse::<u64>().unwrap_or(60))?;
        }

        if let Ok(timeout) = env::var("ROUTER_TIMEOUT_MS") {
            builder = builder.set_override("router.timeout_ms", timeout.parse::<u64>().unwrap_or(5000))?;
        }

        if let Ok(timeout) = env::var("DB_STATEMENT_TIMEOUT_SECS") {
            builder = builder.set_override(
                "database.statement_timeout_secs",
                timeout.parse::<u64>().unwrap_or(30),
            )?;
        }

        if let Ok(policy) = env::var("QUERY_POLICY") {
            builder = builder.set_override("validation.policy", policy)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validation.to_policy()?;
        Ok(config)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        env::remove_var("HOST");
        env::remove_var("PORT");
        env::remove_var("QUERY_POLICY");
        env::remove_var("ROUTER_TIMEOUT_MS");
        env::remove_var("DB_STATEMENT_TIMEOUT_SECS");

        let config = Config::load(None);
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.router.timeout(), Duration::from_secs(5));
        assert_eq!(config.validation.to_policy().unwrap(), ValidationPolicy::strict());
        assert_eq!(config.database.statement_timeout(), Duration::from_secs(30));
        assert_eq!(config.database.max_pool_size, 16);
    }

    #[test]
    fn test_config_file_with_stores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("askdb.toml");
        std::fs::write(
            &path,
            r#"
[validation]
policy = "custom"
allowed = ["select"]
forbidden = ["drop", "delete"]

[database]
statement_timeout_secs = 5
max_pool_size = 4

[[stores]]
name = "students_db"
engine = "sqlite"
url = "sqlite://students.db"

[[stores]]
name = "lms_db"
engine = "memory"
database = "lms"
seed = "seed/lms.json"

[[stores]]
name = "catalog_db"
engine = "mongodb"
url = "mongodb://localhost:27017/catalog"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.stores.len(), 3);
        assert_eq!(config.stores[2].engine, StoreEngine::Mongo);
        assert_eq!(config.database.statement_timeout(), Duration::from_secs(5));
        assert_eq!(config.database.max_pool_size, 4);
        assert_eq!(config.stores[0].engine, StoreEngine::Sqlite);
        assert_eq!(config.stores[1].engine.kind(), StoreKind::Document);
        assert_eq!(config.stores[1].database.as_deref(), Some("lms"));
        assert_eq!(
            config.validation.to_policy().unwrap(),
            ValidationPolicy::custom(&["select"], &["drop", "delete"])
        );
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let validation = ValidationConfig {
            policy: "lenient".to_string(),
            allowed: None,
            forbidden: None,
        };
        assert!(validation.to_policy().is_err());
    }
}
