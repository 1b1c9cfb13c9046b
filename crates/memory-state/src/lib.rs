//! Memory-State: persistence layer for agent memory
//!
//! This crate stores what an agent remembers: its dialogue with each user,
//! arbitrary key/value records, and semantic memories that can be shared
//! with other agents through access grants.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: at-rest encryption, backend parity, and access isolation.
//!
//! ## Key Components
//!
//! - `EncryptionCodec`: AES-256-CBC with `hex(iv):hex(ciphertext)` tokens
//! - `ConversationStore`: per-agent contract, backed by SurrealDB or process memory
//! - `MemoryRepository`: memories and grants, same two backends
//! - `SemanticMemoryIndex`: embedding, cosine search and grant management
//! - `SurrealHandle`: connection and schema management

pub mod codec;
pub mod envelope;
mod error;
pub mod fakes;
mod handle;
pub mod migrations;
pub mod obs;
mod schema;
pub mod semantic;
pub mod storage_traits;
pub mod surreal_store;
pub mod volatile;

pub use codec::{EncryptionCodec, EncryptionKey};
pub use envelope::FieldSealer;
pub use error::{MemoryError, ProviderError};
pub use handle::{CloudConfig, SchemaStatus, SurrealHandle, DEFAULT_DATABASE, DEFAULT_NAMESPACE};
pub use semantic::{cosine_similarity, SearchParams, SemanticMemoryIndex};
pub use storage_traits::{
    AccessGrant, ClearResult, ConversationStore, DataRecord, EmbeddingProvider, Memory,
    MemoryRepository, MemoryType, Message, Metadata, NewMessage, PermissionLevel, Role,
    ScoredMemory, StoreOptions, DEFAULT_HISTORY_LIMIT, UNKNOWN_USER,
};
pub use surreal_store::{SurrealConversationStore, SurrealMemoryRepository};
pub use volatile::{VolatileConversationStore, VolatileMemoryRepository, VolatileTables};

/// Result type for memory-state operations
pub type Result<T> = std::result::Result<T, MemoryError>;
