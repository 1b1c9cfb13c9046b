//! Storage trait definitions for agent memory
//!
//! These traits define the core storage abstractions:
//! - `ConversationStore`: per-agent dialogue log and key/value data records
//! - `MemoryRepository`: persisted memories plus their access-grant table
//! - `EmbeddingProvider`: the external text-embedding collaborator
//!
//! All traits are async and backend-agnostic. SurrealDB and volatile
//! (process-memory) implementations live in `surreal_store` and `volatile`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, ProviderError};
use crate::Result;

/// Default number of messages returned by `get_conversation_history`.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// User id recorded when a message carries none.
pub const UNKNOWN_USER: &str = "unknown";

// ---------------------------------------------------------------------------
// ConversationStore: dialogue and structured data
// ---------------------------------------------------------------------------

/// Author role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(MemoryError::Validation(format!(
                "invalid message role '{other}' (expected user, assistant or system)"
            ))),
        }
    }
}

/// A message submitted for storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Conversation partner; `None` is recorded as [`UNKNOWN_USER`]
    #[serde(default)]
    pub user_id: Option<String>,
    pub role: Role,
    pub content: String,
    /// Request encryption-at-rest for the content
    #[serde(default)]
    pub sensitive: bool,
    /// Defaults to the time of storage
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn new(user_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role,
            content: content.into(),
            sensitive: false,
            timestamp: None,
        }
    }

    /// Build a message from an untyped role string, validating it.
    pub fn parse(user_id: impl Into<String>, role: &str, content: impl Into<String>) -> Result<Self> {
        Ok(Self::new(user_id, role.parse()?, content))
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Check the message is storable. Called before any side effect.
    pub fn validate(&self) -> Result<()> {
        if self.content.is_empty() {
            return Err(MemoryError::Validation("message content is required".into()));
        }
        Ok(())
    }

    /// The user id this message is filed under.
    pub fn resolved_user_id(&self) -> &str {
        match self.user_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => UNKNOWN_USER,
        }
    }
}

/// A stored message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    pub role: Role,
    /// Plaintext content (decrypted on read)
    pub content: String,
    /// Whether the content is encrypted at rest
    pub encrypted: bool,
    pub timestamp: DateTime<Utc>,
}

/// A structured key/value record in an agent's namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRecord {
    pub agent_id: String,
    pub key: String,
    /// Stored representation (raw string, JSON text or encryption token)
    pub value: String,
    pub encrypted: bool,
    pub timestamp: DateTime<Utc>,
}

/// Options for `store_data`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Request encryption-at-rest for the value
    #[serde(default)]
    pub sensitive: bool,
}

impl StoreOptions {
    pub fn sensitive() -> Self {
        Self { sensitive: true }
    }
}

/// Result of clearing a user's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResult {
    pub deleted: u64,
}

/// Per-agent conversation memory.
///
/// Guarantees:
/// - Invalid messages are rejected with `MemoryError::Validation` before any write.
/// - History is returned oldest-first, sorted by timestamp, never by arrival order.
/// - `clear_user_history` is idempotent (0 deleted on an empty history).
/// - Data records are upserted by `(agent_id, key)`: last write wins, no merge.
/// - Sensitive writes without a configured key fail with `MemoryError::Config`.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The agent whose namespace this store reads and writes.
    fn agent_id(&self) -> &str;

    /// Verify the backend and its tables. Idempotent; missing tables only
    /// degrade the store (logged), unreachability is `MemoryError::Connection`.
    async fn connect(&self) -> Result<()>;

    /// Validate, optionally encrypt and persist a message. Returns its id.
    async fn store_message(&self, message: NewMessage) -> Result<String>;

    /// Most recent `limit` messages with `user_id`, oldest first, decrypted.
    async fn get_conversation_history(&self, user_id: &str, limit: usize)
        -> Result<Vec<Message>>;

    /// Delete every message with `user_id`.
    async fn clear_user_history(&self, user_id: &str) -> Result<ClearResult>;

    /// Upsert a data record.
    async fn store_data(
        &self,
        key: &str,
        value: &serde_json::Value,
        opts: StoreOptions,
    ) -> Result<()>;

    /// Read a data record; `None` if absent.
    async fn get_data(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Delete a data record. Returns whether one existed.
    async fn delete_data(&self, key: &str) -> Result<bool>;

    /// Keys of all data records in this agent's namespace, sorted.
    async fn list_data_keys(&self) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// MemoryRepository: semantic memories and access grants
// ---------------------------------------------------------------------------

/// Kind of semantic memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Conversation,
    Knowledge,
    Task,
    Goal,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Conversation => "conversation",
            MemoryType::Knowledge => "knowledge",
            MemoryType::Task => "task",
            MemoryType::Goal => "goal",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "conversation" => Ok(MemoryType::Conversation),
            "knowledge" => Ok(MemoryType::Knowledge),
            "task" => Ok(MemoryType::Task),
            "goal" => Ok(MemoryType::Goal),
            other => Err(MemoryError::Validation(format!("invalid memory type '{other}'"))),
        }
    }
}

/// Permission an agent holds on a memory. Ordered `Read < Write < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Read => "read",
            PermissionLevel::Write => "write",
            PermissionLevel::Admin => "admin",
        }
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(PermissionLevel::Read),
            "write" => Ok(PermissionLevel::Write),
            "admin" => Ok(PermissionLevel::Admin),
            other => Err(MemoryError::Validation(format!(
                "invalid permission level '{other}'"
            ))),
        }
    }
}

/// Free-form memory metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A typed content fragment with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    /// Creating agent
    pub agent_id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    /// Computed once at creation, never updated
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A memory paired with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    pub similarity: f32,
}

/// Relates an agent to a memory it may see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub id: String,
    pub memory_id: String,
    pub agent_id: String,
    pub permission_level: PermissionLevel,
    pub created_at: DateTime<Utc>,
}

impl AccessGrant {
    pub fn new(memory_id: &str, agent_id: &str, permission_level: PermissionLevel) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            memory_id: memory_id.to_string(),
            agent_id: agent_id.to_string(),
            permission_level,
            created_at: Utc::now(),
        }
    }
}

/// Persistence for memories and their grants.
///
/// Guarantees:
/// - Grants are unique per `(memory_id, agent_id)`; re-granting keeps the
///   stronger of the existing and requested levels.
/// - `accessible_memories` only returns memories the agent holds a grant on.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// Verify the backend and its tables (same semantics as `ConversationStore::connect`).
    async fn connect(&self) -> Result<()>;

    /// Persist a new memory.
    async fn insert_memory(&self, memory: &Memory) -> Result<()>;

    /// Delete a memory and every grant on it. No-op if absent.
    async fn delete_memory(&self, memory_id: &str) -> Result<()>;

    /// Fetch a memory by id regardless of grants.
    async fn get_memory(&self, memory_id: &str) -> Result<Option<Memory>>;

    /// Insert or strengthen a grant. Returns the grant as stored.
    async fn upsert_grant(&self, grant: &AccessGrant) -> Result<AccessGrant>;

    /// Delete the grant of `agent_id` on `memory_id`. Returns whether one existed.
    async fn delete_grant(&self, memory_id: &str, agent_id: &str) -> Result<bool>;

    /// The grant `agent_id` holds on `memory_id`, if any.
    async fn find_grant(&self, memory_id: &str, agent_id: &str) -> Result<Option<AccessGrant>>;

    /// All grants on `memory_id`.
    async fn grants_for(&self, memory_id: &str) -> Result<Vec<AccessGrant>>;

    /// Memories on which `agent_id` holds any grant, optionally filtered by type,
    /// oldest first.
    async fn accessible_memories(
        &self,
        agent_id: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<Memory>>;
}

// ---------------------------------------------------------------------------
// EmbeddingProvider: external collaborator
// ---------------------------------------------------------------------------

/// Produces fixed-dimension embeddings for text.
///
/// Failures are reported as [`ProviderError`] and must reach the caller
/// unchanged; implementations never substitute a zero vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError>;
}
