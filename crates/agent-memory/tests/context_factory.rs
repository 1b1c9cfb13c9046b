//! MemoryContext construction from configuration, across backends.

use std::sync::Arc;

use serde_json::json;

use agent_memory::config::{EncryptionConfig, StorageConfig};
use agent_memory::memory_state::fakes::HashingEmbedder;
use agent_memory::memory_state::{
    EncryptionKey, MemoryError, MemoryType, Metadata, NewMessage, PermissionLevel, Role,
    SearchParams, StoreOptions,
};
use agent_memory::{BackendKind, MemoryConfig, MemoryContext, Secret};

fn in_memory_durable() -> MemoryConfig {
    MemoryConfig {
        backend: BackendKind::Durable,
        storage: StorageConfig {
            url: Some("mem://".into()),
            ..StorageConfig::default()
        },
        ..MemoryConfig::default()
    }
}

fn with_encryption(mut config: MemoryConfig) -> MemoryConfig {
    config.encryption = EncryptionConfig {
        key: Some(Secret::new("correct horse battery staple, 32+ chars")),
        salt: Some(EncryptionKey::generate_salt_hex()),
    };
    config
}

async fn build(config: &MemoryConfig) -> MemoryContext {
    MemoryContext::build_with_embedder(config, Arc::new(HashingEmbedder::new(512)))
        .await
        .unwrap()
}

#[tokio::test]
async fn durable_context_round_trips_through_contracts() {
    let ctx = build(&with_encryption(in_memory_durable())).await;
    assert_eq!(ctx.backend_kind(), BackendKind::Durable);
    assert!(ctx.encryption_enabled());

    let store = ctx.conversations("support-bot");
    store.connect().await.unwrap();
    store
        .store_message(NewMessage::new("alice", Role::User, "my card ends 4242").sensitive())
        .await
        .unwrap();
    store
        .store_data("profile", &json!({"tier": "gold"}), StoreOptions::sensitive())
        .await
        .unwrap();

    let history = store.get_conversation_history("alice", 20).await.unwrap();
    assert_eq!(history[0].content, "my card ends 4242");
    assert_eq!(
        store.get_data("profile").await.unwrap(),
        Some(json!({"tier": "gold"}))
    );
}

#[tokio::test]
async fn missing_tables_without_auto_migrate_is_degraded_not_fatal() {
    let mut config = in_memory_durable();
    config.storage.auto_migrate = false;

    let ctx = build(&config).await;
    ctx.conversations("agent-1").connect().await.unwrap();
}

#[tokio::test]
async fn local_path_backend_is_created_on_demand() {
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig {
        storage: StorageConfig {
            db_path: dir.path().join("nested").join("db"),
            ..StorageConfig::default()
        },
        ..MemoryConfig::default()
    };

    let ctx = build(&config).await;
    let store = ctx.conversations("agent-1");
    store.connect().await.unwrap();
    store
        .store_data("k", &json!("v"), StoreOptions::default())
        .await
        .unwrap();
    assert_eq!(store.get_data("k").await.unwrap(), Some(json!("v")));
    assert!(dir.path().join("nested").join("db").exists());
}

#[tokio::test]
async fn sensitive_write_without_key_is_config_error() {
    let config = MemoryConfig {
        backend: BackendKind::Volatile,
        ..MemoryConfig::default()
    };
    let ctx = build(&config).await;

    let err = ctx
        .conversations("agent-1")
        .store_message(NewMessage::new("u", Role::User, "secret").sensitive())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Config(_)));
}

#[tokio::test]
async fn invalid_encryption_config_fails_build() {
    let mut config = MemoryConfig {
        backend: BackendKind::Volatile,
        ..MemoryConfig::default()
    };
    config.encryption.key = Some(Secret::new("too short"));
    config.encryption.salt = Some(EncryptionKey::generate_salt_hex());

    let err = MemoryContext::build_with_embedder(&config, Arc::new(HashingEmbedder::new(8)))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Config(_)));
}

#[tokio::test]
async fn agents_share_memories_through_the_context() {
    for config in [
        in_memory_durable(),
        MemoryConfig {
            backend: BackendKind::Volatile,
            ..MemoryConfig::default()
        },
    ] {
        let ctx = build(&config).await;
        let index = ctx.semantic();

        let memory = index
            .create_memory("planner", MemoryType::Goal, "launch on the first of may", Metadata::new())
            .await
            .unwrap();

        let hidden = index
            .search_similar_content("launch on the first of may", "executor", SearchParams::default())
            .await
            .unwrap();
        assert!(hidden.is_empty(), "{} leaked a memory", config.backend);

        index
            .grant_access_as("planner", &memory.id, "executor", PermissionLevel::Read)
            .await
            .unwrap();

        let visible = index
            .search_similar_content("launch on the first of may", "executor", SearchParams::default())
            .await
            .unwrap();
        assert_eq!(visible.len(), 1, "{} did not share", config.backend);
    }
}
