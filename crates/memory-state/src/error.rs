//! Error types for memory-state

use thiserror::Error;

/// Errors that can occur in the memory persistence layer
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Backend unreachable (surfaced, never retried internally)
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Malformed message, record or query; raised before any side effect
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Malformed token or mismatched key
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Deployment configuration does not allow the requested operation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding collaborator failure, carried unchanged
    #[error("Embedding provider failed: {0}")]
    Provider(#[from] ProviderError),

    /// Caller lacks the permission level required on a memory
    #[error("Access denied: agent {agent_id} lacks {required} on memory {memory_id}")]
    AccessDenied {
        agent_id: String,
        memory_id: String,
        required: String,
    },

    /// Memory not found (or not visible to the requesting agent)
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<surrealdb::Error> for MemoryError {
    fn from(err: surrealdb::Error) -> Self {
        MemoryError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Serialization(err.to_string())
    }
}

/// Errors reported by an embedding provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider rejected the request because a quota or rate limit was hit
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// Network or transport failure talking to the provider
    #[error("network error: {0}")]
    Network(String),

    /// Provider answered with a non-success status
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Provider answered but the payload was unusable
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
