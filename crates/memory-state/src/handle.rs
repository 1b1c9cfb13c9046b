//! SurrealDB Handle - Connection management
//!
//! Opens the database the durable stores share:
//! - in-memory (`mem://`) for tests
//! - local persistent storage (`surrealkv://<path>`)
//! - any SurrealDB URL (`ws://`, `wss://`)
//! - SurrealDB Cloud with root or database-user credentials
//!
//! Opening a handle never touches the schema; stores call
//! [`SurrealHandle::ensure_schema`] from `connect()`.

use std::path::Path;
use std::sync::Arc;

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::error::MemoryError;
use crate::migrations;
use crate::Result;

/// Default namespace
pub const DEFAULT_NAMESPACE: &str = "agent_memory";
/// Default database
pub const DEFAULT_DATABASE: &str = "main";

/// Configuration for SurrealDB Cloud connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "agent_memory")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create a new cloud configuration for a database user
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "agent_memory")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false") - set to "true" for root users
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database =
            std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// Outcome of a schema check, cached per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    /// All tables present
    Ready,
    /// Tables missing and could not be created; operations may fail
    Degraded,
}

/// Shared SurrealDB connection handle
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
    auto_migrate: bool,
    schema: Arc<OnceCell<SchemaStatus>>,
}

impl std::fmt::Debug for SurrealHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealHandle")
            .field("auto_migrate", &self.auto_migrate)
            .field("schema", &self.schema.get())
            .finish()
    }
}

impl SurrealHandle {
    fn wrap(db: Surreal<Any>) -> Self {
        Self {
            db,
            auto_migrate: true,
            schema: Arc::new(OnceCell::new()),
        }
    }

    /// Connect to SurrealDB in-memory (data does not survive the process)
    #[instrument(skip_all)]
    pub async fn in_memory() -> Result<Self> {
        Self::connect_url("mem://", DEFAULT_NAMESPACE, DEFAULT_DATABASE).await
    }

    /// Open (or create) a persistent local database at `path`
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_local(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| {
            MemoryError::Connection(format!(
                "Failed to create database directory {}: {}",
                path.display(),
                e
            ))
        })?;
        let url = format!("surrealkv://{}", path.display());
        Self::connect_url(&url, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await
    }

    /// Connect to any SurrealDB URL without authentication
    #[instrument(skip_all, fields(url = %url))]
    pub async fn connect_url(url: &str, namespace: &str, database: &str) -> Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| MemoryError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(namespace)
            .use_db(database)
            .await
            .map_err(|e| MemoryError::Connection(e.to_string()))?;

        info!("SurrealDB connected ({})", url);
        Ok(Self::wrap(db))
    }

    /// Connect to SurrealDB Cloud
    ///
    /// # Example
    /// ```ignore
    /// let config = CloudConfig::new(
    ///     "wss://xxx.aws-use1.surrealdb.cloud",
    ///     "your_username",
    ///     "your_password",
    /// );
    /// let handle = SurrealHandle::setup_cloud(config).await?;
    /// ```
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn setup_cloud(config: CloudConfig) -> Result<Self> {
        info!("Connecting to SurrealDB Cloud (root={})", config.is_root);

        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| {
                MemoryError::Connection(format!(
                    "Failed to connect to {}: {}",
                    config.endpoint, e
                ))
            })?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| MemoryError::Connection(format!("Root authentication failed: {}", e)))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| {
                MemoryError::Connection(format!("Database authentication failed: {}", e))
            })?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                MemoryError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        info!("SurrealDB Cloud connected");
        Ok(Self::wrap(db))
    }

    /// Enable or disable creating missing tables from `connect()`.
    pub fn with_auto_migrate(mut self, auto_migrate: bool) -> Self {
        self.auto_migrate = auto_migrate;
        self
    }

    pub(crate) fn db(&self) -> &Surreal<Any> {
        &self.db
    }

    /// Check reachability and tables, creating them if allowed.
    ///
    /// Runs the table check once per handle. Missing tables that cannot be
    /// created leave the handle in [`SchemaStatus::Degraded`]: a warning is
    /// logged and `Ok` is returned so callers are not crashed at startup.
    pub async fn ensure_schema(&self) -> Result<SchemaStatus> {
        self.db
            .health()
            .await
            .map_err(|e| MemoryError::Connection(e.to_string()))?;

        let status = self
            .schema
            .get_or_try_init(|| async {
                let missing = migrations::missing_tables(&self.db).await?;
                if missing.is_empty() {
                    return Ok::<_, MemoryError>(SchemaStatus::Ready);
                }

                if self.auto_migrate {
                    match migrations::init_schema(&self.db).await {
                        Ok(()) => return Ok(SchemaStatus::Ready),
                        Err(e) => warn!(
                            error = %e,
                            "schema creation failed; running in degraded mode"
                        ),
                    }
                } else {
                    warn!(
                        missing = ?missing,
                        "required tables are missing; run the schema setup. Running in degraded mode"
                    );
                }
                Ok(SchemaStatus::Degraded)
            })
            .await?;

        Ok(*status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_connection_and_schema_creation() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let status = handle.ensure_schema().await.unwrap();
        assert_eq!(status, SchemaStatus::Ready);

        let missing = migrations::missing_tables(handle.db()).await.unwrap();
        assert!(missing.is_empty(), "tables still missing: {missing:?}");
    }

    #[tokio::test]
    async fn test_missing_schema_is_degraded_not_fatal() {
        let handle = SurrealHandle::in_memory()
            .await
            .unwrap()
            .with_auto_migrate(false);

        let status = handle.ensure_schema().await.unwrap();
        assert_eq!(status, SchemaStatus::Degraded);

        // Idempotent: the second call reuses the cached status
        assert_eq!(handle.ensure_schema().await.unwrap(), SchemaStatus::Degraded);
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        migrations::init_schema(handle.db()).await.unwrap();
        migrations::init_schema(handle.db()).await.unwrap();
        assert!(migrations::missing_tables(handle.db()).await.unwrap().is_empty());
    }

    #[test]
    fn test_cloud_config_builders() {
        let config = CloudConfig::new("wss://example", "user", "pass")
            .with_namespace("ns")
            .with_database("db")
            .with_root(true);
        assert_eq!(config.namespace, "ns");
        assert_eq!(config.database, "db");
        assert!(config.is_root);
    }
}
