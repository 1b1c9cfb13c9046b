//! Structured observability hooks for agent memory lifecycle events.
//!
//! This module provides:
//! - An agent-scoped tracing span via the `AgentSpan` RAII guard
//! - Emission functions for memory creation, grant changes, history
//!   clearing and degraded storage
//!
//! Events are emitted at `info!` level (warnings for degraded storage).
//! The semantic index and both conversation backends call these, so every
//! caller gets the same events. Output format is the subscriber's concern.

use crate::storage_traits::PermissionLevel;
use tracing::{info, warn};

/// RAII guard that tags every log line in scope with the acting agent.
///
/// # Example
///
/// ```ignore
/// let _span = AgentSpan::enter("planner");
/// // Now all tracing calls are associated with agent_id = "planner"
/// ```
pub struct AgentSpan {
    _span: tracing::span::EnteredSpan,
}

impl AgentSpan {
    pub fn enter(agent_id: &str) -> Self {
        let span = tracing::info_span!("agent_memory.agent", agent_id = %agent_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a memory was created and its creator granted admin.
pub fn emit_memory_created(memory_id: &str, agent_id: &str, memory_type: &str) {
    info!(
        event = "memory.created",
        memory_id = %memory_id,
        agent_id = %agent_id,
        memory_type = %memory_type,
    );
}

/// Emit event: an agent was granted access to a memory.
pub fn emit_access_granted(memory_id: &str, agent_id: &str, level: PermissionLevel) {
    info!(
        event = "access.granted",
        memory_id = %memory_id,
        agent_id = %agent_id,
        level = %level,
    );
}

/// Emit event: a grant was removed. `existed` is false when there was nothing to revoke.
pub fn emit_access_revoked(memory_id: &str, agent_id: &str, existed: bool) {
    info!(
        event = "access.revoked",
        memory_id = %memory_id,
        agent_id = %agent_id,
        existed = existed,
    );
}

/// Emit event: a user's history with an agent was cleared.
pub fn emit_history_cleared(agent_id: &str, user_id: &str, deleted: u64) {
    info!(
        event = "history.cleared",
        agent_id = %agent_id,
        user_id = %user_id,
        deleted = deleted,
    );
}

/// Emit event: storage is reachable but its tables are missing.
pub fn emit_store_degraded(backend: &str, detail: &dyn std::fmt::Display) {
    warn!(event = "store.degraded", backend = %backend, detail = %detail);
}
