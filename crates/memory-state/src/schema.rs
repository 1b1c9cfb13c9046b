//! Schema definitions for agent-memory SurrealDB tables
//!
//! Tables:
//! - agent_messages: dialogue log per (agent, user)
//! - agent_data: key/value records per agent
//! - memories: semantic memories with embeddings
//! - memory_access_controls: grants relating agents to memories
//!
//! Rows are converted to/from `storage_traits` types at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{
    AccessGrant, Memory, MemoryType, Message, Metadata, PermissionLevel, Role,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Table names
pub const MESSAGES_TABLE: &str = "agent_messages";
pub const DATA_TABLE: &str = "agent_data";
pub const MEMORIES_TABLE: &str = "memories";
pub const GRANTS_TABLE: &str = "memory_access_controls";

/// Every table the stores need, in creation order.
pub const ALL_TABLES: [&str; 4] = [MESSAGES_TABLE, DATA_TABLE, MEMORIES_TABLE, GRANTS_TABLE];

/// Message row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Application message ID (UUID string)
    pub message_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub role: Role,
    /// Plaintext or encryption token
    pub content: String,
    pub encrypted: bool,
    #[serde(with = "surreal_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl MessageRow {
    pub fn from_message(message: &Message) -> Self {
        MessageRow {
            id: None,
            message_id: message.id.clone(),
            agent_id: message.agent_id.clone(),
            user_id: message.user_id.clone(),
            role: message.role,
            content: message.content.clone(),
            encrypted: message.encrypted,
            timestamp: message.timestamp,
        }
    }

    /// Convert to the API type, content still in stored form.
    pub fn into_message(self) -> Message {
        Message {
            id: self.message_id,
            agent_id: self.agent_id,
            user_id: self.user_id,
            role: self.role,
            content: self.content,
            encrypted: self.encrypted,
            timestamp: self.timestamp,
        }
    }
}

/// Data record row, record id `[agent_id, key]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub agent_id: String,
    pub key: String,
    pub value: String,
    pub encrypted: bool,
    #[serde(with = "surreal_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl DataRow {
    pub fn new(agent_id: &str, key: &str, value: String, encrypted: bool) -> Self {
        DataRow {
            id: None,
            agent_id: agent_id.to_string(),
            key: key.to_string(),
            value,
            encrypted,
            timestamp: Utc::now(),
        }
    }
}

/// Memory row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub memory_id: String,
    /// Creating agent
    pub agent_id: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl MemoryRow {
    pub fn from_memory(memory: &Memory) -> Self {
        MemoryRow {
            id: None,
            memory_id: memory.id.clone(),
            agent_id: memory.agent_id.clone(),
            memory_type: memory.memory_type,
            content: memory.content.clone(),
            embedding: memory.embedding.clone(),
            metadata: memory.metadata.clone(),
            created_at: memory.created_at,
            updated_at: memory.updated_at,
        }
    }

    pub fn into_memory(self) -> Memory {
        Memory {
            id: self.memory_id,
            agent_id: self.agent_id,
            memory_type: self.memory_type,
            content: self.content,
            embedding: self.embedding,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Numeric order of permission levels, stored so the database can keep the
/// stronger level during an upsert.
pub fn level_rank(level: PermissionLevel) -> u8 {
    match level {
        PermissionLevel::Read => 1,
        PermissionLevel::Write => 2,
        PermissionLevel::Admin => 3,
    }
}

/// Access grant row, record id `[memory_id, agent_id]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub grant_id: String,
    pub memory_id: String,
    pub agent_id: String,
    pub permission_level: PermissionLevel,
    #[serde(default)]
    pub level_rank: u8,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl GrantRow {
    pub fn from_grant(grant: &AccessGrant) -> Self {
        GrantRow {
            id: None,
            grant_id: grant.id.clone(),
            memory_id: grant.memory_id.clone(),
            agent_id: grant.agent_id.clone(),
            permission_level: grant.permission_level,
            level_rank: level_rank(grant.permission_level),
            created_at: grant.created_at,
        }
    }

    pub fn into_grant(self) -> AccessGrant {
        AccessGrant {
            id: self.grant_id,
            memory_id: self.memory_id,
            agent_id: self.agent_id,
            permission_level: self.permission_level,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message {
            id: "msg-1".to_string(),
            agent_id: "agent-1".to_string(),
            user_id: "user-1".to_string(),
            role: Role::Assistant,
            content: "hello".to_string(),
            encrypted: false,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_message_row_round_trip() {
        let message = sample_message();
        let row = MessageRow::from_message(&message);
        assert!(row.id.is_none());
        assert_eq!(row.message_id, "msg-1");
        assert_eq!(row.into_message(), message);
    }

    #[test]
    fn test_message_row_serialization_skips_missing_id() {
        let row = MessageRow::from_message(&sample_message());
        let json = serde_json::to_string(&row).expect("Failed to serialize");
        assert!(!json.contains("\"id\""));
        assert!(json.contains("\"role\":\"assistant\""));
        assert!(json.contains("msg-1"));
    }

    #[test]
    fn test_memory_row_keeps_embedding() {
        let now = Utc::now();
        let memory = Memory {
            id: "mem-1".into(),
            agent_id: "agent-1".into(),
            memory_type: MemoryType::Goal,
            content: "ship v1".into(),
            embedding: vec![0.5, -0.5, 0.25],
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        };
        let row = MemoryRow::from_memory(&memory);
        assert_eq!(row.embedding, vec![0.5, -0.5, 0.25]);
        assert_eq!(row.into_memory(), memory);
    }

    #[test]
    fn test_grant_row_round_trip() {
        let grant = AccessGrant::new("mem-1", "agent-2", PermissionLevel::Write);
        let row = GrantRow::from_grant(&grant);
        assert_eq!(row.permission_level, PermissionLevel::Write);
        assert_eq!(row.into_grant(), grant);
    }

    #[test]
    fn test_data_row_serialization_skips_missing_id() {
        let row = DataRow::new("agent-1", "prefs", "{\"theme\":\"dark\"}".into(), false);
        let json = serde_json::to_string(&row).expect("Failed to serialize");
        assert!(!json.contains("\"id\""));
        assert!(json.contains("\"key\":\"prefs\""));
    }

    #[test]
    fn test_level_rank_follows_permission_order() {
        assert!(level_rank(PermissionLevel::Admin) > level_rank(PermissionLevel::Write));
        assert!(level_rank(PermissionLevel::Write) > level_rank(PermissionLevel::Read));
        assert!(level_rank(PermissionLevel::Read) > 0);

        let row = GrantRow::from_grant(&AccessGrant::new("m", "a", PermissionLevel::Write));
        assert_eq!(row.level_rank, 2);
    }
}
