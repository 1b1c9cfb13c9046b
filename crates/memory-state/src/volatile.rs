//! Process-memory backends
//!
//! `VolatileConversationStore` and `VolatileMemoryRepository` satisfy the
//! same contracts as the SurrealDB backends without any external
//! dependencies. All data is lost when the process exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};

use crate::envelope::FieldSealer;
use crate::error::MemoryError;
use crate::obs;
use crate::storage_traits::*;
use crate::Result;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| MemoryError::Backend("volatile store lock poisoned".into()))
}

// ---------------------------------------------------------------------------
// VolatileConversationStore
// ---------------------------------------------------------------------------

/// Shared process-memory tables. Clone the `Arc` to give several agents
/// views over the same state.
#[derive(Debug, Default)]
pub struct VolatileTables {
    /// `(agent_id, user_id)` → messages in arrival order, content in stored form
    messages: Mutex<HashMap<(String, String), Vec<Message>>>,
    /// `(agent_id, key)` → record, value in stored form
    data: Mutex<HashMap<(String, String), DataRecord>>,
}

impl VolatileTables {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Conversation store for one agent backed by [`VolatileTables`].
#[derive(Debug, Clone)]
pub struct VolatileConversationStore {
    agent_id: String,
    tables: Arc<VolatileTables>,
    sealer: FieldSealer,
}

impl VolatileConversationStore {
    /// A store with private tables.
    pub fn new(agent_id: impl Into<String>, sealer: FieldSealer) -> Self {
        Self::with_tables(agent_id, VolatileTables::new(), sealer)
    }

    pub fn with_tables(
        agent_id: impl Into<String>,
        tables: Arc<VolatileTables>,
        sealer: FieldSealer,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            tables,
            sealer,
        }
    }
}

#[async_trait]
impl ConversationStore for VolatileConversationStore {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
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
        let id = stored.id.clone();

        let mut messages = lock(&self.tables.messages)?;
        messages
            .entry((self.agent_id.clone(), stored.user_id.clone()))
            .or_default()
            .push(stored);

        debug!(message_id = %id, "message stored");
        Ok(id)
    }

    async fn get_conversation_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut history = {
            let messages = lock(&self.tables.messages)?;
            messages
                .get(&(self.agent_id.clone(), user_id.to_string()))
                .cloned()
                .unwrap_or_default()
        };

        history.sort_by_key(|m| m.timestamp);
        let start = history.len().saturating_sub(limit);

        history
            .drain(start..)
            .map(|mut msg| -> Result<Message> {
                msg.content = self.sealer.open(&msg.content, msg.encrypted)?;
                Ok(msg)
            })
            .collect()
    }

    #[instrument(skip(self), fields(agent_id = %self.agent_id))]
    async fn clear_user_history(&self, user_id: &str) -> Result<ClearResult> {
        let mut messages = lock(&self.tables.messages)?;
        let deleted = messages
            .remove(&(self.agent_id.clone(), user_id.to_string()))
            .map(|m| m.len() as u64)
            .unwrap_or(0);
        drop(messages);
        obs::emit_history_cleared(&self.agent_id, user_id, deleted);
        Ok(ClearResult { deleted })
    }

    async fn store_data(
        &self,
        key: &str,
        value: &serde_json::Value,
        opts: StoreOptions,
    ) -> Result<()> {
        let (stored, encrypted) = self.sealer.seal_value(value, opts.sensitive)?;
        let record = DataRecord {
            agent_id: self.agent_id.clone(),
            key: key.to_string(),
            value: stored,
            encrypted,
            timestamp: Utc::now(),
        };

        let mut data = lock(&self.tables.data)?;
        data.insert((self.agent_id.clone(), key.to_string()), record);
        Ok(())
    }

    async fn get_data(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let record = {
            let data = lock(&self.tables.data)?;
            data.get(&(self.agent_id.clone(), key.to_string())).cloned()
        };
        record
            .map(|r| self.sealer.open_value(&r.value, r.encrypted))
            .transpose()
    }

    async fn delete_data(&self, key: &str) -> Result<bool> {
        let mut data = lock(&self.tables.data)?;
        Ok(data
            .remove(&(self.agent_id.clone(), key.to_string()))
            .is_some())
    }

    async fn list_data_keys(&self) -> Result<Vec<String>> {
        let data = lock(&self.tables.data)?;
        let mut keys: Vec<String> = data
            .keys()
            .filter(|(agent, _)| *agent == self.agent_id)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// VolatileMemoryRepository
// ---------------------------------------------------------------------------

/// Memory repository backed by process-memory maps.
#[derive(Debug, Default)]
pub struct VolatileMemoryRepository {
    memories: Mutex<HashMap<String, Memory>>,
    /// `(memory_id, agent_id)` → grant
    grants: Mutex<HashMap<(String, String), AccessGrant>>,
}

impl VolatileMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryRepository for VolatileMemoryRepository {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_memory(&self, memory: &Memory) -> Result<()> {
        let mut memories = lock(&self.memories)?;
        if memories.contains_key(&memory.id) {
            return Err(MemoryError::Backend(format!(
                "memory {} already exists",
                memory.id
            )));
        }
        memories.insert(memory.id.clone(), memory.clone());
        Ok(())
    }

    async fn delete_memory(&self, memory_id: &str) -> Result<()> {
        lock(&self.memories)?.remove(memory_id);
        lock(&self.grants)?.retain(|(mid, _), _| mid != memory_id);
        Ok(())
    }

    async fn get_memory(&self, memory_id: &str) -> Result<Option<Memory>> {
        Ok(lock(&self.memories)?.get(memory_id).cloned())
    }

    async fn upsert_grant(&self, grant: &AccessGrant) -> Result<AccessGrant> {
        let mut grants = lock(&self.grants)?;
        let key = (grant.memory_id.clone(), grant.agent_id.clone());
        let stored = match grants.get_mut(&key) {
            Some(existing) => {
                existing.permission_level = existing.permission_level.max(grant.permission_level);
                existing.clone()
            }
            None => {
                grants.insert(key, grant.clone());
                grant.clone()
            }
        };
        Ok(stored)
    }

    async fn delete_grant(&self, memory_id: &str, agent_id: &str) -> Result<bool> {
        let mut grants = lock(&self.grants)?;
        Ok(grants
            .remove(&(memory_id.to_string(), agent_id.to_string()))
            .is_some())
    }

    async fn find_grant(&self, memory_id: &str, agent_id: &str) -> Result<Option<AccessGrant>> {
        let grants = lock(&self.grants)?;
        Ok(grants
            .get(&(memory_id.to_string(), agent_id.to_string()))
            .cloned())
    }

    async fn grants_for(&self, memory_id: &str) -> Result<Vec<AccessGrant>> {
        let grants = lock(&self.grants)?;
        let mut found: Vec<AccessGrant> = grants
            .values()
            .filter(|g| g.memory_id == memory_id)
            .cloned()
            .collect();
        found.sort_by_key(|g| g.created_at);
        Ok(found)
    }

    async fn accessible_memories(
        &self,
        agent_id: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<Memory>> {
        let visible: Vec<String> = lock(&self.grants)?
            .keys()
            .filter(|(_, aid)| aid == agent_id)
            .map(|(mid, _)| mid.clone())
            .collect();

        let memories = lock(&self.memories)?;
        let mut found: Vec<Memory> = visible
            .iter()
            .filter_map(|id| memories.get(id))
            .filter(|m| memory_type.map(|t| m.memory_type == t).unwrap_or(true))
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }
}
