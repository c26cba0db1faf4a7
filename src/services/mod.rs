pub mod connection_pool;
pub mod database; // Store adapters: SQL connections and the in-memory document store
pub mod db_service;
pub mod llm_service;
pub mod orchestrator;
pub mod response_cleaner;
pub mod router;
pub mod schema_cache;
pub mod schema_service;
pub mod store_registry;

pub use connection_pool::*;
pub use db_service::*;
pub use llm_service::*;
pub use orchestrator::*;
pub use router::*;
pub use schema_cache::*;
pub use schema_service::*;
pub use store_registry::*;
