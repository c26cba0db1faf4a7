use anyhow::Context;
use deadpool_postgres::Pool;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::models::ResultRecord;
use crate::services::connection_pool::PgPoolManager;
use crate::services::database::{postgresql, sqlite, RelationalAdapter};

const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
enum SqlBackend {
    Postgres(Pool),
    Sqlite(Arc<Mutex<Connection>>),
}

/// Relational adapter over every attached SQL store. Each store name maps
/// to either a PostgreSQL pool or a SQLite connection.
pub struct SqlConnections {
    backends: RwLock<HashMap<String, SqlBackend>>,
    pg_pools: PgPoolManager,
    statement_timeout: Duration,
}

impl SqlConnections {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
            pg_pools: PgPoolManager::new(),
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Upper bound on connections per PostgreSQL store
    pub fn with_max_pool_size(mut self, max_pool_size: usize) -> Self {
        self.pg_pools = PgPoolManager::with_max_size(max_pool_size);
        self
    }

    /// Attach a PostgreSQL store and verify a connection can be checked out
    pub async fn attach_postgres(&self, store: &str, connection_url: &str) -> anyhow::Result<()> {
        let url = url::Url::parse(connection_url).context("Invalid PostgreSQL URL")?;
        if url.scheme() != "postgresql" && url.scheme() != "postgres" {
            anyhow::bail!("URL must use postgresql:// or postgres:// scheme");
        }

        let pool = self.pg_pools.get_or_create_pool(store, connection_url).await?;
        pool.get()
            .await
            .with_context(|| format!("Connection test failed for store {}", store))?;

        self.insert(store, SqlBackend::Postgres(pool));
        Ok(())
    }

    /// Attach a SQLite store from a path or `sqlite:` URL
    pub fn attach_sqlite(&self, store: &str, url: &str) -> anyhow::Result<()> {
        let conn = sqlite::open(url).with_context(|| format!("Failed to open SQLite store {}", store))?;
        self.attach_sqlite_connection(store, conn);
        Ok(())
    }

    /// Attach a fresh in-memory SQLite store, running `init_sql` first
    pub fn attach_sqlite_in_memory(&self, store: &str, init_sql: &str) -> anyhow::Result<()> {
        let conn = sqlite::open(":memory:")?;
        conn.execute_batch(init_sql)
            .with_context(|| format!("Failed to initialise SQLite store {}", store))?;
        self.attach_sqlite_connection(store, conn);
        Ok(())
    }

    fn attach_sqlite_connection(&self, store: &str, conn: Connection) {
        self.insert(store, SqlBackend::Sqlite(Arc::new(Mutex::new(conn))));
    }

    pub fn is_attached(&self, store: &str) -> bool {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        backends.contains_key(store)
    }

    fn insert(&self, store: &str, backend: SqlBackend) {
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        backends.insert(store.to_string(), backend);
    }

    fn backend(&self, store: &str) -> anyhow::Result<SqlBackend> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        backends
            .get(store)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No SQL connection attached for store {}", store))
    }
}

impl Default for SqlConnections {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RelationalAdapter for SqlConnections {
    async fn read(&self, store: &str, query: &str) -> anyhow::Result<Vec<ResultRecord>> {
        match self.backend(store)? {
            SqlBackend::Postgres(pool) => postgresql::read(&pool, query, self.statement_timeout).await,
            SqlBackend::Sqlite(conn) => {
                let query = query.to_string();
                on_sqlite(conn, move |conn| sqlite::read(conn, &query).context("SQLite query failed")).await
            }
        }
    }

    async fn write(&self, store: &str, command: &str) -> anyhow::Result<u64> {
        match self.backend(store)? {
            SqlBackend::Postgres(pool) => postgresql::write(&pool, command, self.statement_timeout).await,
            SqlBackend::Sqlite(conn) => {
                let command = command.to_string();
                on_sqlite(conn, move |conn| {
                    sqlite::write(conn, &command).context("SQLite statement failed")
                })
                .await
            }
        }
    }

    async fn introspect(&self, store: &str) -> anyhow::Result<String> {
        match self.backend(store)? {
            SqlBackend::Postgres(pool) => postgresql::introspect(&pool, self.statement_timeout).await,
            SqlBackend::Sqlite(conn) => {
                on_sqlite(conn, |conn| sqlite::introspect(conn).context("SQLite introspection failed")).await
            }
        }
    }
}

/// Run a rusqlite call on the blocking pool so async workers stay free
async fn on_sqlite<T, F>(conn: Arc<Mutex<Connection>>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    })
    .await
    .context("SQLite task failed")?
}
