//! MemoryContext - the process-wide memory services
//!
//! Built once at start-up from a [`MemoryConfig`]. The backend is chosen
//! here and nowhere else; callers only see the store contracts.

use std::sync::Arc;

use memory_state::{
    CloudConfig, ConversationStore, EmbeddingProvider, EncryptionCodec, FieldSealer,
    MemoryRepository, Result, SchemaStatus, SemanticMemoryIndex, SurrealConversationStore,
    SurrealHandle, SurrealMemoryRepository, VolatileConversationStore, VolatileMemoryRepository,
    VolatileTables,
};
use tracing::{info, instrument};

use crate::config::{BackendKind, MemoryConfig, StorageConfig};
use crate::embedding::build_embedder;
use crate::obs;

#[derive(Debug, Clone)]
enum Backend {
    Durable(SurrealHandle),
    Volatile(Arc<VolatileTables>),
}

/// Constructed backend, optional codec and semantic index.
#[derive(Debug, Clone)]
pub struct MemoryContext {
    backend: Backend,
    sealer: FieldSealer,
    semantic: SemanticMemoryIndex,
}

impl MemoryContext {
    /// Build with the embedding provider named by `config`.
    pub async fn build(config: &MemoryConfig) -> Result<Self> {
        let embedder = build_embedder(&config.embedding)?;
        Self::build_with_embedder(config, embedder).await
    }

    /// Build with an explicit embedding provider.
    #[instrument(skip_all, fields(backend = %config.backend))]
    pub async fn build_with_embedder(
        config: &MemoryConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let sealer = FieldSealer::new(config.encryption.codec()?.map(Arc::new));

        let (backend, repo): (Backend, Arc<dyn MemoryRepository>) = match config.backend {
            BackendKind::Durable => {
                let handle = open_handle(&config.storage)
                    .await?
                    .with_auto_migrate(config.storage.auto_migrate);
                if handle.ensure_schema().await? == SchemaStatus::Degraded {
                    obs::emit_store_degraded(
                        BackendKind::Durable.as_str(),
                        &"required tables are missing",
                    );
                }
                let repo = Arc::new(SurrealMemoryRepository::new(handle.clone()));
                (Backend::Durable(handle), repo)
            }
            BackendKind::Volatile => (
                Backend::Volatile(VolatileTables::new()),
                Arc::new(VolatileMemoryRepository::new()),
            ),
        };

        info!(
            encryption = sealer.has_key(),
            dimension = embedder.dimension(),
            "memory context ready"
        );

        Ok(Self {
            backend,
            sealer,
            semantic: SemanticMemoryIndex::new(repo, embedder),
        })
    }

    /// Volatile context with the given codec; for tests and tools.
    pub fn volatile(codec: Option<EncryptionCodec>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            backend: Backend::Volatile(VolatileTables::new()),
            sealer: FieldSealer::new(codec.map(Arc::new)),
            semantic: SemanticMemoryIndex::new(Arc::new(VolatileMemoryRepository::new()), embedder),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            Backend::Durable(_) => BackendKind::Durable,
            Backend::Volatile(_) => BackendKind::Volatile,
        }
    }

    pub fn encryption_enabled(&self) -> bool {
        self.sealer.has_key()
    }

    /// The conversation store for one agent. Stores for different agents
    /// share the backend but never see each other's records.
    pub fn conversations(&self, agent_id: &str) -> Arc<dyn ConversationStore> {
        match &self.backend {
            Backend::Durable(handle) => Arc::new(SurrealConversationStore::new(
                agent_id,
                handle.clone(),
                self.sealer.clone(),
            )),
            Backend::Volatile(tables) => Arc::new(VolatileConversationStore::with_tables(
                agent_id,
                tables.clone(),
                self.sealer.clone(),
            )),
        }
    }

    pub fn semantic(&self) -> &SemanticMemoryIndex {
        &self.semantic
    }
}

async fn open_handle(storage: &StorageConfig) -> Result<SurrealHandle> {
    if let Some(remote) = &storage.remote {
        let cloud = CloudConfig::new(
            &remote.endpoint,
            &remote.username,
            remote.password.expose(),
        )
        .with_namespace(&storage.namespace)
        .with_database(&storage.database)
        .with_root(remote.is_root);
        return SurrealHandle::setup_cloud(cloud).await;
    }

    if let Some(url) = &storage.url {
        return SurrealHandle::connect_url(url, &storage.namespace, &storage.database).await;
    }

    info!(
        "No remote database configured, using local persistence: {}",
        storage.db_path.display()
    );
    SurrealHandle::open_local(&storage.db_path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_state::fakes::HashingEmbedder;
    use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
    use memory_state::{EncryptionKey, NewMessage, Role};

    fn volatile_config() -> MemoryConfig {
        MemoryConfig {
            backend: BackendKind::Volatile,
            embedding: EmbeddingConfig {
                provider: Some(EmbeddingProviderKind::Hashing),
                dimension: 64,
                ..EmbeddingConfig::default()
            },
            ..MemoryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_volatile_context_shares_tables_across_handles() {
        let ctx = MemoryContext::build(&volatile_config()).await.unwrap();
        assert_eq!(ctx.backend_kind(), BackendKind::Volatile);
        assert!(!ctx.encryption_enabled());

        ctx.conversations("agent-1")
            .store_message(NewMessage::new("user-1", Role::User, "hi"))
            .await
            .unwrap();

        // A second store for the same agent sees the same history
        let again = ctx.conversations("agent-1");
        assert_eq!(again.get_conversation_history("user-1", 20).await.unwrap().len(), 1);

        let other = ctx.conversations("agent-2");
        assert!(other.get_conversation_history("user-1", 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_build_without_embedding_provider_is_config_error() {
        let config = MemoryConfig {
            backend: BackendKind::Volatile,
            ..MemoryConfig::default()
        };
        let err = MemoryContext::build(&config).await.unwrap_err();
        assert!(matches!(err, memory_state::MemoryError::Config(_)));
    }

    #[tokio::test]
    async fn test_volatile_constructor_with_codec() {
        let codec = EncryptionCodec::new(EncryptionKey::from_bytes([5u8; 32]));
        let ctx = MemoryContext::volatile(Some(codec), Arc::new(HashingEmbedder::new(16)));
        assert!(ctx.encryption_enabled());
        assert_eq!(ctx.semantic().dimension(), 16);
    }
}
