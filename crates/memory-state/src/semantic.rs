//! Semantic memory index
//!
//! Stores typed content fragments with their embeddings and answers
//! similarity queries, restricted to memories the requesting agent holds an
//! [`AccessGrant`] on. Scoring happens here so every repository backend
//! ranks identically.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::error::MemoryError;
use crate::obs;
use crate::storage_traits::*;
use crate::Result;

/// Default minimum cosine similarity for search results.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
/// Default cap on search results.
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Search tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Results scoring below this are dropped
    pub similarity_threshold: f32,
    pub max_results: usize,
    /// Only consider memories of this type
    pub memory_type: Option<MemoryType>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
            memory_type: None,
        }
    }
}

impl SearchParams {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns `None` on a length mismatch and `0.0` if either vector has zero
/// norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }

    Some(dot / (norm_a * norm_b))
}

/// Access-controlled semantic memory over a [`MemoryRepository`].
#[derive(Clone)]
pub struct SemanticMemoryIndex {
    repo: Arc<dyn MemoryRepository>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for SemanticMemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticMemoryIndex")
            .field("dimension", &self.embedder.dimension())
            .finish_non_exhaustive()
    }
}

impl SemanticMemoryIndex {
    pub fn new(repo: Arc<dyn MemoryRepository>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { repo, embedder }
    }

    /// Embedding dimension fixed for this index.
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Verify the underlying repository.
    pub async fn connect(&self) -> Result<()> {
        self.repo.connect().await
    }

    fn check_dimension(&self, embedding: &[f32], what: &str) -> Result<()> {
        let expected = self.embedder.dimension();
        if embedding.len() != expected {
            return Err(MemoryError::Validation(format!(
                "{what} has dimension {}, expected {expected}",
                embedding.len()
            )));
        }
        Ok(())
    }

    /// Embed `content`, persist it and grant the creator admin.
    ///
    /// If the admin grant cannot be written the memory is removed again and
    /// the grant error is returned.
    #[instrument(skip(self, content, metadata), fields(agent_id = %agent_id, memory_type = %memory_type))]
    pub async fn create_memory(
        &self,
        agent_id: &str,
        memory_type: MemoryType,
        content: &str,
        metadata: Metadata,
    ) -> Result<Memory> {
        if content.trim().is_empty() {
            return Err(MemoryError::Validation("memory content is empty".into()));
        }

        let embedding = self.embedder.embed(content).await?;
        self.check_dimension(&embedding, "embedding")?;

        let now = Utc::now();
        let memory = Memory {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            memory_type,
            content: content.to_string(),
            embedding,
            metadata,
            created_at: now,
            updated_at: now,
        };

        self.repo.insert_memory(&memory).await?;

        let grant = AccessGrant::new(&memory.id, agent_id, PermissionLevel::Admin);
        if let Err(e) = self.repo.upsert_grant(&grant).await {
            warn!(memory_id = %memory.id, error = %e, "creator grant failed, removing memory");
            if let Err(cleanup) = self.repo.delete_memory(&memory.id).await {
                warn!(memory_id = %memory.id, error = %cleanup, "compensating delete failed");
            }
            return Err(e);
        }

        obs::emit_memory_created(&memory.id, agent_id, memory_type.as_str());
        Ok(memory)
    }

    /// Rank memories visible to `requesting_agent_id` against a query vector.
    #[instrument(skip(self, query_embedding), fields(agent_id = %requesting_agent_id))]
    pub async fn search_memories(
        &self,
        query_embedding: &[f32],
        requesting_agent_id: &str,
        params: SearchParams,
    ) -> Result<Vec<ScoredMemory>> {
        self.check_dimension(query_embedding, "query embedding")?;

        let candidates = self
            .repo
            .accessible_memories(requesting_agent_id, params.memory_type)
            .await?;
        let considered = candidates.len();

        let mut scored: Vec<ScoredMemory> = candidates
            .into_iter()
            .filter_map(|memory| {
                let Some(similarity) = cosine_similarity(query_embedding, &memory.embedding)
                else {
                    warn!(memory_id = %memory.id, "stored embedding has wrong dimension, skipped");
                    return None;
                };
                (similarity >= params.similarity_threshold)
                    .then_some(ScoredMemory { memory, similarity })
            })
            .collect();

        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(params.max_results);

        debug!(considered, returned = scored.len(), "search complete");
        Ok(scored)
    }

    /// Embed `text` and search with it.
    pub async fn search_similar_content(
        &self,
        text: &str,
        requesting_agent_id: &str,
        params: SearchParams,
    ) -> Result<Vec<ScoredMemory>> {
        let query = self.embedder.embed(text).await?;
        self.search_memories(&query, requesting_agent_id, params)
            .await
    }

    /// Give `agent_id` access to a memory. Does not check the caller.
    #[instrument(skip(self))]
    pub async fn grant_access(
        &self,
        memory_id: &str,
        agent_id: &str,
        level: PermissionLevel,
    ) -> Result<AccessGrant> {
        if self.repo.get_memory(memory_id).await?.is_none() {
            return Err(MemoryError::NotFound(memory_id.to_string()));
        }
        let grant = self
            .repo
            .upsert_grant(&AccessGrant::new(memory_id, agent_id, level))
            .await?;
        obs::emit_access_granted(memory_id, agent_id, grant.permission_level);
        Ok(grant)
    }

    /// Remove `agent_id`'s grant. Returns whether a grant existed. Does not
    /// check the caller.
    #[instrument(skip(self))]
    pub async fn revoke_access(&self, memory_id: &str, agent_id: &str) -> Result<bool> {
        let existed = self.repo.delete_grant(memory_id, agent_id).await?;
        obs::emit_access_revoked(memory_id, agent_id, existed);
        Ok(existed)
    }

    async fn require_admin(&self, caller: &str, memory_id: &str) -> Result<()> {
        let level = self
            .repo
            .find_grant(memory_id, caller)
            .await?
            .map(|g| g.permission_level);

        match level {
            Some(PermissionLevel::Admin) => Ok(()),
            _ => Err(MemoryError::AccessDenied {
                agent_id: caller.to_string(),
                memory_id: memory_id.to_string(),
                required: PermissionLevel::Admin.to_string(),
            }),
        }
    }

    /// [`grant_access`](Self::grant_access) on behalf of `caller`, who must
    /// hold admin on the memory.
    pub async fn grant_access_as(
        &self,
        caller: &str,
        memory_id: &str,
        agent_id: &str,
        level: PermissionLevel,
    ) -> Result<AccessGrant> {
        self.require_admin(caller, memory_id).await?;
        self.grant_access(memory_id, agent_id, level).await
    }

    /// [`revoke_access`](Self::revoke_access) on behalf of `caller`, who must
    /// hold admin on the memory.
    pub async fn revoke_access_as(
        &self,
        caller: &str,
        memory_id: &str,
        agent_id: &str,
    ) -> Result<bool> {
        self.require_admin(caller, memory_id).await?;
        self.revoke_access(memory_id, agent_id).await
    }

    /// Every memory `agent_id` holds any grant on, oldest first.
    pub async fn get_memories_by_agent(
        &self,
        agent_id: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<Memory>> {
        self.repo.accessible_memories(agent_id, memory_type).await
    }

    /// One memory, if it exists and the requester holds a grant on it.
    /// Otherwise `NotFound`, so existence is not disclosed.
    pub async fn get_memory(&self, memory_id: &str, requesting_agent_id: &str) -> Result<Memory> {
        let not_found = || MemoryError::NotFound(memory_id.to_string());

        if self
            .repo
            .find_grant(memory_id, requesting_agent_id)
            .await?
            .is_none()
        {
            return Err(not_found());
        }
        self.repo.get_memory(memory_id).await?.ok_or_else(not_found)
    }

    /// All grants on a memory.
    pub async fn grants_for(&self, memory_id: &str) -> Result<Vec<AccessGrant>> {
        self.repo.grants_for(memory_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), Some(-1.0));
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let s = cosine_similarity(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap();
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_params_defaults() {
        let params = SearchParams::default();
        assert_eq!(params.similarity_threshold, 0.7);
        assert_eq!(params.max_results, 10);
        assert!(params.memory_type.is_none());

        let tuned = params
            .with_threshold(0.2)
            .with_max_results(3)
            .with_type(MemoryType::Goal);
        assert_eq!(tuned.max_results, 3);
        assert_eq!(tuned.memory_type, Some(MemoryType::Goal));
    }
}
