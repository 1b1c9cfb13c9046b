//! SurrealDB schema migrations and initialization
//!
//! This module provides initialization functions to set up all tables
//! with their uniqueness constraints and lookup indexes, plus a check used
//! by `connect()` to detect missing tables.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::MemoryError;
use crate::schema::ALL_TABLES;
use crate::Result;

/// Initialize all agent-memory tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing agent-memory SurrealDB schema");

    init_messages_table(db).await?;
    init_data_table(db).await?;
    init_memories_table(db).await?;
    init_grants_table(db).await?;

    info!("agent-memory schema initialization complete");
    Ok(())
}

/// Return the names of required tables that do not exist yet.
pub async fn missing_tables(db: &Surreal<Any>) -> Result<Vec<&'static str>> {
    let mut result = db
        .query("INFO FOR DB")
        .await
        .map_err(|e| MemoryError::Connection(e.to_string()))?;

    let info: Option<serde_json::Value> = result.take(0)?;
    let tables = info
        .as_ref()
        .and_then(|v| v.get("tables"))
        .and_then(|t| t.as_object());

    Ok(ALL_TABLES
        .iter()
        .copied()
        .filter(|name| tables.map(|t| !t.contains_key(*name)).unwrap_or(true))
        .collect())
}

async fn run(db: &Surreal<Any>, sql: &str) -> Result<()> {
    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| MemoryError::Backend(format!("schema setup failed: {e}")))?;
    Ok(())
}

/// Initialize `agent_messages` table
///
/// Schema:
/// ```text
/// TABLE agent_messages {
///   message_id: STRING (unique)
///   agent_id:   STRING (indexed with user_id, timestamp)
///   user_id:    STRING
///   role:       STRING (user | assistant | system)
///   content:    STRING (plaintext or iv:ciphertext token)
///   encrypted:  BOOL
///   timestamp:  DATETIME
/// }
/// ```
///
/// Rows are never updated; they are only deleted in bulk per (agent, user).
async fn init_messages_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing agent_messages table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS agent_messages
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_message_id ON TABLE agent_messages COLUMNS message_id UNIQUE;

        -- History lookups: (agent_id, user_id) ordered by timestamp
        DEFINE INDEX IF NOT EXISTS idx_agent_user_ts ON TABLE agent_messages COLUMNS agent_id, user_id, timestamp;
    "#;

    run(db, sql).await?;
    info!("✓ agent_messages table initialized");
    Ok(())
}

/// Initialize `agent_data` table
///
/// Record ids are `[agent_id, key]`; writes are single `UPSERT` statements
/// with full overwrite. The unique index guards against stray rows.
async fn init_data_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing agent_data table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS agent_data
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_agent_key ON TABLE agent_data COLUMNS agent_id, key UNIQUE;
    "#;

    run(db, sql).await?;
    info!("✓ agent_data table initialized");
    Ok(())
}

/// Initialize `memories` table
///
/// Memories are immutable after creation; the embedding is never rewritten.
async fn init_memories_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing memories table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memories
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_memory_id ON TABLE memories COLUMNS memory_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_memory_agent ON TABLE memories COLUMNS agent_id;
        DEFINE INDEX IF NOT EXISTS idx_memory_type ON TABLE memories COLUMNS memory_type;
    "#;

    run(db, sql).await?;
    info!("✓ memories table initialized");
    Ok(())
}

/// Initialize `memory_access_controls` table
///
/// Record ids are `[memory_id, agent_id]`. The upsert compares `level_rank`
/// so a level is only ever strengthened in place.
async fn init_grants_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing memory_access_controls table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memory_access_controls
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_grant_pair ON TABLE memory_access_controls COLUMNS memory_id, agent_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_grant_agent ON TABLE memory_access_controls COLUMNS agent_id;
    "#;

    run(db, sql).await?;
    info!("✓ memory_access_controls table initialized");
    Ok(())
}
