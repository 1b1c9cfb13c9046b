//! Agent-Memory: wiring for the agent memory subsystem
//!
//! ## Layer 1 - Configuration & Composition
//!
//! Focus: turning deployment configuration into ready-to-use memory
//! services, once per process.
//!
//! ## Key Components
//!
//! - `MemoryConfig`: file and environment configuration
//! - `MemoryContext`: backend, codec and semantic index built by a single factory
//! - `OpenAiEmbedder`: OpenAI-compatible embedding provider
//! - `telemetry` / `obs`: tracing set-up and structured lifecycle events

pub mod config;
pub mod context;
pub mod embedding;
pub mod telemetry;

pub use config::{BackendKind, EmbeddingProviderKind, MemoryConfig, Secret};
pub use context::MemoryContext;
pub use embedding::{build_embedder, OpenAiEmbedder};
pub use telemetry::{init_tracing, LogFormat};

// Re-export the persistence layer so binaries depend on one crate.
pub use memory_state;
pub use memory_state::obs;
