//! SurrealDB-backed conversation store and memory repository
//!
//! Uses the row types in `schema` for persistence, converting to/from
//! `storage_traits` types at the boundary. Encryption is applied through the
//! same [`FieldSealer`] the volatile backend uses.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::envelope::FieldSealer;
use crate::error::MemoryError;
use crate::obs;
use crate::handle::{SchemaStatus, SurrealHandle};
use crate::schema::{
    DataRow, GrantRow, MemoryRow, MessageRow, DATA_TABLE, GRANTS_TABLE, MEMORIES_TABLE,
    MESSAGES_TABLE,
};
use crate::storage_traits::*;
use crate::Result;

/// Attempts for a write that loses a transaction conflict.
const WRITE_ATTEMPTS: u32 = 6;
/// Base delay for exponential backoff between write attempts (milliseconds).
const WRITE_BACKOFF_MS: u64 = 2;

fn backend(e: surrealdb::Error) -> MemoryError {
    MemoryError::Backend(e.to_string())
}

fn is_conflict(e: &surrealdb::Error) -> bool {
    let msg = e.to_string();
    msg.contains("read or write conflict") || msg.contains("can be retried")
}

/// Run a single-statement write, retrying transaction conflicts.
///
/// Concurrent writers to the same record id serialize here: the loser of a
/// commit race re-runs its statement against the winner's result.
async fn write_with_retry<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, surrealdb::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < WRITE_ATTEMPTS && is_conflict(&e) => {
                let delay = Duration::from_millis(WRITE_BACKOFF_MS * 2u64.pow(attempt - 1));
                debug!(attempt, "write conflict, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(backend(e)),
        }
    }
}

async fn connect_handle(handle: &SurrealHandle) -> Result<()> {
    match handle.ensure_schema().await? {
        SchemaStatus::Ready => info!("SurrealDB store ready"),
        SchemaStatus::Degraded => info!("SurrealDB store connected in degraded mode"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SurrealConversationStore
// ---------------------------------------------------------------------------

/// Durable [`ConversationStore`] for one agent.
#[derive(Debug, Clone)]
pub struct SurrealConversationStore {
    agent_id: String,
    handle: SurrealHandle,
    sealer: FieldSealer,
}

impl SurrealConversationStore {
    pub fn new(agent_id: impl Into<String>, handle: SurrealHandle, sealer: FieldSealer) -> Self {
        Self {
            agent_id: agent_id.into(),
            handle,
            sealer,
        }
    }

    fn db(&self) -> &Surreal<Any> {
        self.handle.db()
    }

    async fn fetch_data_row(&self, key: &str) -> Result<Option<DataRow>> {
        let mut res = self
            .db()
            .query(format!(
                "SELECT * FROM {DATA_TABLE} WHERE agent_id = $agent AND key = $key LIMIT 1"
            ))
            .bind(("agent", self.agent_id.clone()))
            .bind(("key", key.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<DataRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ConversationStore for SurrealConversationStore {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    #[instrument(skip(self), fields(agent_id = %self.agent_id))]
    async fn connect(&self) -> Result<()> {
        connect_handle(&self.handle).await
    }

    #[instrument(skip(self, message), fields(agent_id = %self.agent_id))]
    async fn store_message(&self, message: NewMessage) -> Result<String> {
        message.validate()?;
        let (content, encrypted) = self.sealer.seal(&message.content, message.sensitive)?;

        let stored = Message {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: self.agent_id.clone(),
            user_id: message.resolved_user_id().to_string(),
            role: message.role,
            content,
            encrypted,
            timestamp: message.timestamp.unwrap_or_else(Utc::now),
        };

        let _created: Option<MessageRow> = self
            .db()
            .create(MESSAGES_TABLE)
            .content(MessageRow::from_message(&stored))
            .await
            .map_err(backend)?;

        debug!(message_id = %stored.id, encrypted, "message stored");
        Ok(stored.id)
    }

    async fn get_conversation_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Newest `limit` rows, then flip to chronological order
        let mut res = self
            .db()
            .query(format!(
                "SELECT * FROM {MESSAGES_TABLE} WHERE agent_id = $agent AND user_id = $user \
                 ORDER BY timestamp DESC LIMIT {limit}"
            ))
            .bind(("agent", self.agent_id.clone()))
            .bind(("user", user_id.to_string()))
            .await
            .map_err(backend)?;

        let mut rows: Vec<MessageRow> = res.take(0).map_err(backend)?;
        rows.reverse();

        rows.into_iter()
            .map(|row| -> Result<Message> {
                let mut msg = row.into_message();
                msg.content = self.sealer.open(&msg.content, msg.encrypted)?;
                Ok(msg)
            })
            .collect()
    }

    #[instrument(skip(self), fields(agent_id = %self.agent_id))]
    async fn clear_user_history(&self, user_id: &str) -> Result<ClearResult> {
        let mut res = self
            .db()
            .query(format!(
                "DELETE {MESSAGES_TABLE} WHERE agent_id = $agent AND user_id = $user RETURN BEFORE"
            ))
            .bind(("agent", self.agent_id.clone()))
            .bind(("user", user_id.to_string()))
            .await
            .map_err(backend)?;

        let removed: Vec<MessageRow> = res.take(0).map_err(backend)?;
        let deleted = removed.len() as u64;
        obs::emit_history_cleared(&self.agent_id, user_id, deleted);
        Ok(ClearResult { deleted })
    }

    #[instrument(skip(self, value), fields(agent_id = %self.agent_id))]
    async fn store_data(
        &self,
        key: &str,
        value: &serde_json::Value,
        opts: StoreOptions,
    ) -> Result<()> {
        let (stored, encrypted) = self.sealer.seal_value(value, opts.sensitive)?;
        let row = DataRow::new(&self.agent_id, key, stored, encrypted);
        let record = vec![self.agent_id.clone(), key.to_string()];

        // One record per (agent, key), written in a single statement
        let db = self.db();
        write_with_retry(|| {
            let row = row.clone();
            let record = record.clone();
            async move {
                db.query("UPSERT type::thing($tb, $record) CONTENT $row")
                    .bind(("tb", DATA_TABLE))
                    .bind(("record", record))
                    .bind(("row", row))
                    .await?
                    .check()
            }
        })
        .await?;

        debug!(key, encrypted, "data stored");
        Ok(())
    }

    async fn get_data(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.fetch_data_row(key)
            .await?
            .map(|row| self.sealer.open_value(&row.value, row.encrypted))
            .transpose()
    }

    async fn delete_data(&self, key: &str) -> Result<bool> {
        let mut res = self
            .db()
            .query(format!(
                "DELETE {DATA_TABLE} WHERE agent_id = $agent AND key = $key RETURN BEFORE"
            ))
            .bind(("agent", self.agent_id.clone()))
            .bind(("key", key.to_string()))
            .await
            .map_err(backend)?;

        let removed: Vec<DataRow> = res.take(0).map_err(backend)?;
        Ok(!removed.is_empty())
    }

    async fn list_data_keys(&self) -> Result<Vec<String>> {
        let mut res = self
            .db()
            .query(format!("SELECT * FROM {DATA_TABLE} WHERE agent_id = $agent"))
            .bind(("agent", self.agent_id.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<DataRow> = res.take(0).map_err(backend)?;
        let mut keys: Vec<String> = rows.into_iter().map(|r| r.key).collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// SurrealMemoryRepository
// ---------------------------------------------------------------------------

/// Durable [`MemoryRepository`].
#[derive(Debug, Clone)]
pub struct SurrealMemoryRepository {
    handle: SurrealHandle,
}

impl SurrealMemoryRepository {
    pub fn new(handle: SurrealHandle) -> Self {
        Self { handle }
    }

    fn db(&self) -> &Surreal<Any> {
        self.handle.db()
    }
}

#[async_trait]
impl MemoryRepository for SurrealMemoryRepository {
    async fn connect(&self) -> Result<()> {
        connect_handle(&self.handle).await
    }

    #[instrument(skip(self, memory), fields(memory_id = %memory.id, agent_id = %memory.agent_id))]
    async fn insert_memory(&self, memory: &Memory) -> Result<()> {
        let _created: Option<MemoryRow> = self
            .db()
            .create(MEMORIES_TABLE)
            .content(MemoryRow::from_memory(memory))
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_memory(&self, memory_id: &str) -> Result<()> {
        self.db()
            .query(format!("DELETE {GRANTS_TABLE} WHERE memory_id = $mid"))
            .query(format!("DELETE {MEMORIES_TABLE} WHERE memory_id = $mid"))
            .bind(("mid", memory_id.to_string()))
            .await
            .and_then(|res| res.check())
            .map_err(backend)?;
        Ok(())
    }

    async fn get_memory(&self, memory_id: &str) -> Result<Option<Memory>> {
        let mut res = self
            .db()
            .query(format!(
                "SELECT * FROM {MEMORIES_TABLE} WHERE memory_id = $mid LIMIT 1"
            ))
            .bind(("mid", memory_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<MemoryRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(MemoryRow::into_memory))
    }

    #[instrument(skip(self, grant), fields(memory_id = %grant.memory_id, agent_id = %grant.agent_id))]
    async fn upsert_grant(&self, grant: &AccessGrant) -> Result<AccessGrant> {
        let row = GrantRow::from_grant(grant);
        let db = self.db();

        // Keyed on (memory, agent); an existing grant keeps its id, creation
        // time and the stronger of the two levels.
        let mut res = write_with_retry(|| {
            let row = row.clone();
            async move {
                db.query(
                    "UPSERT type::thing($tb, [$mid, $aid]) SET \
                         grant_id = grant_id ?? $gid, \
                         memory_id = $mid, \
                         agent_id = $aid, \
                         created_at = created_at ?? $created, \
                         permission_level = IF (level_rank ?? 0) >= $rank \
                             THEN permission_level ELSE $level END, \
                         level_rank = IF (level_rank ?? 0) >= $rank \
                             THEN level_rank ELSE $rank END \
                     RETURN AFTER",
                )
                .bind(("tb", GRANTS_TABLE))
                .bind(("mid", row.memory_id))
                .bind(("aid", row.agent_id))
                .bind(("gid", row.grant_id))
                .bind(("created", surrealdb::sql::Datetime::from(row.created_at)))
                .bind(("level", row.permission_level.as_str()))
                .bind(("rank", row.level_rank))
                .await?
                .check()
            }
        })
        .await?;

        let rows: Vec<GrantRow> = res.take(0).map_err(backend)?;
        rows.into_iter()
            .next()
            .map(GrantRow::into_grant)
            .ok_or_else(|| {
                MemoryError::Backend(format!("grant upsert on {} returned no row", grant.memory_id))
            })
    }

    async fn delete_grant(&self, memory_id: &str, agent_id: &str) -> Result<bool> {
        let mut res = self
            .db()
            .query(format!(
                "DELETE {GRANTS_TABLE} WHERE memory_id = $mid AND agent_id = $aid RETURN BEFORE"
            ))
            .bind(("mid", memory_id.to_string()))
            .bind(("aid", agent_id.to_string()))
            .await
            .map_err(backend)?;

        let removed: Vec<GrantRow> = res.take(0).map_err(backend)?;
        Ok(!removed.is_empty())
    }

    async fn find_grant(&self, memory_id: &str, agent_id: &str) -> Result<Option<AccessGrant>> {
        let mut res = self
            .db()
            .query(format!(
                "SELECT * FROM {GRANTS_TABLE} WHERE memory_id = $mid AND agent_id = $aid LIMIT 1"
            ))
            .bind(("mid", memory_id.to_string()))
            .bind(("aid", agent_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<GrantRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(GrantRow::into_grant))
    }

    async fn grants_for(&self, memory_id: &str) -> Result<Vec<AccessGrant>> {
        let mut res = self
            .db()
            .query(format!(
                "SELECT * FROM {GRANTS_TABLE} WHERE memory_id = $mid ORDER BY created_at ASC"
            ))
            .bind(("mid", memory_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<GrantRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(GrantRow::into_grant).collect())
    }

    async fn accessible_memories(
        &self,
        agent_id: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<Memory>> {
        let type_filter = if memory_type.is_some() {
            " AND memory_type = $mtype"
        } else {
            ""
        };
        let sql = format!(
            "SELECT * FROM {MEMORIES_TABLE} \
             WHERE memory_id IN (SELECT VALUE memory_id FROM {GRANTS_TABLE} WHERE agent_id = $aid)\
             {type_filter} ORDER BY created_at ASC"
        );

        let mut res = self
            .db()
            .query(sql)
            .bind(("aid", agent_id.to_string()))
            .bind(("mtype", memory_type.map(|t| t.as_str()).unwrap_or_default()))
            .await
            .map_err(backend)?;

        let rows: Vec<MemoryRow> = res.take(0).map_err(backend)?;
        debug!(count = rows.len(), "accessible memories fetched");
        Ok(rows.into_iter().map(MemoryRow::into_memory).collect())
    }
}
