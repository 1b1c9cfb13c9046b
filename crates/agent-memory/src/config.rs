//! Deployment configuration
//!
//! [`MemoryConfig`] is read once at process start, from a TOML file, the
//! environment, or both (environment wins). The factory in
//! [`crate::context`] turns it into a [`crate::MemoryContext`].
//!
//! Environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `AGENT_MEMORY_BACKEND` | `backend` (`durable` or `volatile`) |
//! | `AGENT_MEMORY_DB_PATH` | `storage.db_path` |
//! | `AGENT_MEMORY_AUTO_MIGRATE` | `storage.auto_migrate` |
//! | `SURREALDB_URL` | `storage.url` |
//! | `SURREALDB_ENDPOINT`, `SURREALDB_USERNAME`, `SURREALDB_PASSWORD`, `SURREALDB_ROOT` | `storage.remote` |
//! | `SURREALDB_NAMESPACE`, `SURREALDB_DATABASE` | `storage.namespace`, `storage.database` |
//! | `MEMORY_ENCRYPTION_KEY`, `MEMORY_ENCRYPTION_SALT` | `encryption` |
//! | `EMBEDDING_PROVIDER`, `EMBEDDING_DIMENSION` | `embedding.provider`, `embedding.dimension` |
//! | `OPENAI_API_KEY`, `OPENAI_EMBEDDING_MODEL`, `OPENAI_BASE_URL` | `embedding` |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use memory_state::{
    EncryptionCodec, EncryptionKey, MemoryError, Result, DEFAULT_DATABASE, DEFAULT_NAMESPACE,
};
use serde::{Deserialize, Serialize};

/// Default local database directory for the durable backend.
pub const DEFAULT_DB_PATH: &str = ".agent-memory/db";
/// Default embedding dimension (OpenAI `text-embedding-3-small`).
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// A configuration value that must not appear in logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Which store implementation backs the context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SurrealDB (local `surrealkv://`, a URL, or cloud)
    #[default]
    Durable,
    /// Process memory; lost on exit
    Volatile,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Durable => "durable",
            BackendKind::Volatile => "volatile",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "durable" | "surreal" | "surrealdb" => Ok(BackendKind::Durable),
            "volatile" | "memory" | "in-memory" => Ok(BackendKind::Volatile),
            other => Err(MemoryError::Config(format!(
                "unknown backend '{other}' (expected durable or volatile)"
            ))),
        }
    }
}

/// Credentials for a remote SurrealDB server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub username: String,
    pub password: Secret,
    #[serde(default)]
    pub is_root: bool,
}

/// Durable backend location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Local database directory, used when neither `remote` nor `url` is set
    pub db_path: PathBuf,
    /// Unauthenticated SurrealDB URL (`ws://`, `mem://`, `surrealkv://`)
    pub url: Option<String>,
    pub namespace: String,
    pub database: String,
    /// Create missing tables from `connect()`
    pub auto_migrate: bool,
    pub remote: Option<RemoteConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            url: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            auto_migrate: true,
            remote: None,
        }
    }
}

/// At-rest encryption settings. No key means sensitive writes are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Deployment secret (with `salt`) or a raw 64-hex-character key (without)
    pub key: Option<Secret>,
    /// Hex-encoded per-deployment salt
    pub salt: Option<String>,
}

impl EncryptionConfig {
    /// Build the codec, if a key is configured.
    pub fn codec(&self) -> Result<Option<EncryptionCodec>> {
        let Some(key) = &self.key else {
            return Ok(None);
        };

        let codec = match &self.salt {
            Some(salt) => EncryptionCodec::from_secret(key.expose(), salt)?,
            None if is_raw_hex_key(key.expose()) => {
                EncryptionCodec::new(EncryptionKey::from_hex(key.expose())?)
            }
            None => {
                return Err(MemoryError::Config(
                    "MEMORY_ENCRYPTION_SALT is required when MEMORY_ENCRYPTION_KEY is a secret; \
                     generate one with `agent-memory gen-salt`"
                        .into(),
                ))
            }
        };
        Ok(Some(codec))
    }
}

fn is_raw_hex_key(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// OpenAI-compatible `/embeddings` endpoint
    #[serde(rename = "openai")]
    OpenAi,
    /// Offline feature hashing; lexical overlap only
    Hashing,
}

impl FromStr for EmbeddingProviderKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(EmbeddingProviderKind::OpenAi),
            "hashing" | "hash" | "local" => Ok(EmbeddingProviderKind::Hashing),
            other => Err(MemoryError::Config(format!(
                "unknown embedding provider '{other}' (expected openai or hashing)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Unset: OpenAI when an API key is present. Hashing must be chosen
    /// explicitly.
    pub provider: Option<EmbeddingProviderKind>,
    pub dimension: usize,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<Secret>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: None,
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    /// The provider to construct. Hashing is never picked implicitly, so an
    /// unset provider without an API key is a config error.
    pub fn resolved_provider(&self) -> Result<EmbeddingProviderKind> {
        match self.provider {
            Some(kind) => Ok(kind),
            None if self.api_key.is_some() => Ok(EmbeddingProviderKind::OpenAi),
            None => Err(MemoryError::Config(
                "no embedding provider configured: set OPENAI_API_KEY, or \
                 EMBEDDING_PROVIDER=hashing for offline lexical embeddings"
                    .into(),
            )),
        }
    }
}

/// Complete configuration for one process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub backend: BackendKind,
    pub storage: StorageConfig,
    pub encryption: EncryptionConfig,
    pub embedding: EmbeddingConfig,
}

impl MemoryConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| MemoryError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MemoryError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        base.apply_env(|name| std::env::var(name).ok())
    }

    /// Overlay variables returned by `lookup`. Empty values count as unset.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("AGENT_MEMORY_BACKEND") {
            self.backend = v.parse()?;
        }
        if let Some(v) = var("AGENT_MEMORY_DB_PATH") {
            self.storage.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("AGENT_MEMORY_AUTO_MIGRATE") {
            self.storage.auto_migrate = parse_bool("AGENT_MEMORY_AUTO_MIGRATE", &v)?;
        }
        if let Some(v) = var("SURREALDB_URL") {
            self.storage.url = Some(v);
        }
        if let Some(v) = var("SURREALDB_NAMESPACE") {
            self.storage.namespace = v;
        }
        if let Some(v) = var("SURREALDB_DATABASE") {
            self.storage.database = v;
        }
        if let Some(endpoint) = var("SURREALDB_ENDPOINT") {
            let (Some(username), Some(password)) =
                (var("SURREALDB_USERNAME"), var("SURREALDB_PASSWORD"))
            else {
                return Err(MemoryError::Config(
                    "SURREALDB_ENDPOINT requires SURREALDB_USERNAME and SURREALDB_PASSWORD".into(),
                ));
            };
            let is_root = match var("SURREALDB_ROOT") {
                Some(v) => parse_bool("SURREALDB_ROOT", &v)?,
                None => false,
            };
            self.storage.remote = Some(RemoteConfig {
                endpoint,
                username,
                password: Secret::new(password),
                is_root,
            });
        }

        if let Some(v) = var("MEMORY_ENCRYPTION_KEY") {
            self.encryption.key = Some(Secret::new(v));
        }
        if let Some(v) = var("MEMORY_ENCRYPTION_SALT") {
            self.encryption.salt = Some(v);
        }

        if let Some(v) = var("EMBEDDING_PROVIDER") {
            self.embedding.provider = Some(v.parse()?);
        }
        if let Some(v) = var("EMBEDDING_DIMENSION") {
            self.embedding.dimension = v.trim().parse().map_err(|_| {
                MemoryError::Config(format!("EMBEDDING_DIMENSION must be a positive integer, got '{v}'"))
            })?;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.embedding.api_key = Some(Secret::new(v));
        }
        if let Some(v) = var("OPENAI_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = var("OPENAI_BASE_URL") {
            self.embedding.base_url = v;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(MemoryError::Config("embedding dimension must be positive".into()));
        }
        if self.embedding.provider == Some(EmbeddingProviderKind::OpenAi)
            && self.embedding.api_key.is_none()
        {
            return Err(MemoryError::Config(
                "the openai embedding provider requires OPENAI_API_KEY".into(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MemoryError::Config(format!("{name} must be true or false, got '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.backend, BackendKind::Durable);
        assert_eq!(config.storage.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert!(config.storage.auto_migrate);
        assert_eq!(config.embedding.dimension, 1536);
        assert!(config.encryption.codec().unwrap().is_none());
    }

    #[test]
    fn test_embedding_provider_is_never_implicitly_hashing() {
        let unset = EmbeddingConfig::default();
        assert!(matches!(
            unset.resolved_provider(),
            Err(MemoryError::Config(_))
        ));

        let keyed = MemoryConfig::default()
            .apply_env(env(&[("OPENAI_API_KEY", "sk-test")]))
            .unwrap();
        assert_eq!(
            keyed.embedding.resolved_provider().unwrap(),
            EmbeddingProviderKind::OpenAi
        );

        let offline = MemoryConfig::default()
            .apply_env(env(&[("EMBEDDING_PROVIDER", "hashing")]))
            .unwrap();
        assert_eq!(
            offline.embedding.resolved_provider().unwrap(),
            EmbeddingProviderKind::Hashing
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = MemoryConfig::default()
            .apply_env(env(&[
                ("AGENT_MEMORY_BACKEND", "volatile"),
                ("EMBEDDING_DIMENSION", "384"),
                ("OPENAI_API_KEY", "sk-test"),
                ("SURREALDB_NAMESPACE", "team"),
                ("AGENT_MEMORY_AUTO_MIGRATE", "false"),
            ]))
            .unwrap();

        assert_eq!(config.backend, BackendKind::Volatile);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(
            config.embedding.resolved_provider().unwrap(),
            EmbeddingProviderKind::OpenAi
        );
        assert_eq!(config.storage.namespace, "team");
        assert!(!config.storage.auto_migrate);
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let config = MemoryConfig::default()
            .apply_env(env(&[("AGENT_MEMORY_BACKEND", ""), ("SURREALDB_URL", "  ")]))
            .unwrap();
        assert_eq!(config.backend, BackendKind::Durable);
        assert!(config.storage.url.is_none());
    }

    #[test]
    fn test_invalid_env_values_are_config_errors() {
        for pairs in [
            vec![("AGENT_MEMORY_BACKEND", "postgres")],
            vec![("EMBEDDING_DIMENSION", "wide")],
            vec![("EMBEDDING_DIMENSION", "0")],
            vec![("EMBEDDING_PROVIDER", "openai")],
            vec![("SURREALDB_ENDPOINT", "wss://db.example")],
        ] {
            let err = MemoryConfig::default().apply_env(env(&pairs)).unwrap_err();
            assert!(matches!(err, MemoryError::Config(_)), "{pairs:?} gave {err:?}");
        }
    }

    #[test]
    fn test_remote_credentials() {
        let config = MemoryConfig::default()
            .apply_env(env(&[
                ("SURREALDB_ENDPOINT", "wss://db.example"),
                ("SURREALDB_USERNAME", "svc"),
                ("SURREALDB_PASSWORD", "hunter2"),
                ("SURREALDB_ROOT", "true"),
            ]))
            .unwrap();
        let remote = config.storage.remote.clone().unwrap();
        assert_eq!(remote.endpoint, "wss://db.example");
        assert!(remote.is_root);
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_codec_from_secret_and_salt() {
        let salt = EncryptionKey::generate_salt_hex();
        let config = MemoryConfig::default()
            .apply_env(env(&[
                ("MEMORY_ENCRYPTION_KEY", "0123456789abcdefghijklmnopqrstuvwxyz"),
                ("MEMORY_ENCRYPTION_SALT", salt.as_str()),
            ]))
            .unwrap();
        let codec = config.encryption.codec().unwrap().unwrap();
        let token = codec.encrypt_str("hi").unwrap();
        assert_eq!(codec.decrypt_str(&token).unwrap(), "hi");
    }

    #[test]
    fn test_codec_requires_salt_for_secrets() {
        let config = EncryptionConfig {
            key: Some(Secret::new("a passphrase that is long enough to use")),
            salt: None,
        };
        assert!(matches!(config.codec(), Err(MemoryError::Config(_))));

        let raw = EncryptionConfig {
            key: Some(Secret::new("0f".repeat(32))),
            salt: None,
        };
        assert!(raw.codec().unwrap().is_some());
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.toml");
        std::fs::write(
            &path,
            r#"
backend = "volatile"

[storage]
namespace = "agents"

[embedding]
provider = "hashing"
dimension = 256
"#,
        )
        .unwrap();

        let config = MemoryConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Volatile);
        assert_eq!(config.storage.namespace, "agents");
        assert_eq!(config.storage.database, DEFAULT_DATABASE);
        assert_eq!(config.embedding.dimension, 256);

        assert!(matches!(
            MemoryConfig::from_toml_str("backend = \"postgres\""),
            Err(MemoryError::Config(_))
        ));
    }
}
