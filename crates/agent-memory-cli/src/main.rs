//! Agent Memory CLI
//!
//! The `agent-memory` command inspects and edits the memory an agent runtime
//! keeps: conversation history, key/value data, and shared semantic memories.
//!
//! ## Commands
//!
//! - `history` / `record` / `clear`: conversation log per (agent, user)
//! - `get` / `put` / `delete` / `keys`: data records per agent
//! - `remember` / `search` / `show`: semantic memories
//! - `grant` / `revoke` / `grants`: sharing memories between agents
//! - `status`: which backend and features are active
//! - `gen-salt`: generate a per-deployment encryption salt

use std::path::PathBuf;

use agent_memory::memory_state::{
    EncryptionKey, MemoryType, Metadata, NewMessage, PermissionLevel, SearchParams,
    StoreOptions, DEFAULT_HISTORY_LIMIT,
};
use agent_memory::{obs, BackendKind, LogFormat, MemoryConfig, MemoryContext};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "agent-memory")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and manage AI agent memory", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// TOML configuration file (environment variables override it)
    #[arg(short, long, global = true, env = "AGENT_MEMORY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured backend (durable or volatile)
    #[arg(long, global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the conversation between an agent and a user, oldest first
    History {
        #[arg(short, long)]
        agent: String,

        #[arg(short, long)]
        user: String,

        /// Number of most recent messages to show
        #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,

        /// Print messages as JSON
        #[arg(long)]
        json: bool,
    },

    /// Append a message to a conversation
    Record {
        #[arg(short, long)]
        agent: String,

        #[arg(short, long)]
        user: String,

        /// user, assistant or system
        #[arg(short, long, default_value = "user")]
        role: String,

        content: String,

        /// Encrypt the content at rest
        #[arg(long)]
        sensitive: bool,
    },

    /// Delete every message between an agent and a user
    Clear {
        #[arg(short, long)]
        agent: String,

        #[arg(short, long)]
        user: String,
    },

    /// Read a data record
    Get {
        #[arg(short, long)]
        agent: String,

        key: String,
    },

    /// Write a data record (JSON if it parses, otherwise a string)
    Put {
        #[arg(short, long)]
        agent: String,

        key: String,

        value: String,

        /// Encrypt the value at rest
        #[arg(long)]
        sensitive: bool,
    },

    /// Delete a data record
    Delete {
        #[arg(short, long)]
        agent: String,

        key: String,
    },

    /// List an agent's data keys
    Keys {
        #[arg(short, long)]
        agent: String,
    },

    /// Create a semantic memory owned by an agent
    Remember {
        #[arg(short, long)]
        agent: String,

        /// conversation, knowledge, task or goal
        #[arg(short = 't', long = "type", default_value = "knowledge")]
        memory_type: String,

        content: String,

        /// Metadata entries as key=value (repeatable)
        #[arg(short, long = "meta")]
        meta: Vec<String>,
    },

    /// Search memories visible to an agent
    Search {
        #[arg(short, long)]
        agent: String,

        query: String,

        /// Minimum cosine similarity
        #[arg(long, default_value_t = 0.7)]
        threshold: f32,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Only memories of this type
        #[arg(short = 't', long = "type")]
        memory_type: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one memory, if the agent may see it
    Show {
        #[arg(short, long)]
        agent: String,

        memory_id: String,
    },

    /// Grant an agent access to a memory (caller must hold admin)
    Grant {
        /// Agent performing the grant
        #[arg(long = "as")]
        caller: String,

        memory_id: String,

        /// Agent receiving access
        agent: String,

        /// read, write or admin
        #[arg(short, long, default_value = "read")]
        level: String,
    },

    /// Revoke an agent's access to a memory (caller must hold admin)
    Revoke {
        #[arg(long = "as")]
        caller: String,

        memory_id: String,

        agent: String,
    },

    /// List grants on a memory
    Grants { memory_id: String },

    /// Show the active backend and features
    Status,

    /// Generate a random hex salt for MEMORY_ENCRYPTION_SALT
    GenSalt,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::from_env()
    };
    agent_memory::init_tracing(format, level);

    // No storage needed
    if let Commands::GenSalt = cli.command {
        return cmd_gen_salt();
    }

    let mut config =
        MemoryConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(backend) = cli.backend.as_deref() {
        config.backend = backend.parse()?;
    }

    let ctx = MemoryContext::build(&config)
        .await
        .context("Failed to initialise agent memory")?;

    run(&ctx, cli.command).await
}

async fn run(ctx: &MemoryContext, command: Commands) -> Result<()> {
    match command {
        Commands::History {
            agent,
            user,
            limit,
            json,
        } => cmd_history(ctx, &agent, &user, limit, json).await,
        Commands::Record {
            agent,
            user,
            role,
            content,
            sensitive,
        } => cmd_record(ctx, &agent, &user, &role, &content, sensitive).await,
        Commands::Clear { agent, user } => cmd_clear(ctx, &agent, &user).await,
        Commands::Get { agent, key } => cmd_get(ctx, &agent, &key).await,
        Commands::Put {
            agent,
            key,
            value,
            sensitive,
        } => cmd_put(ctx, &agent, &key, &value, sensitive).await,
        Commands::Delete { agent, key } => cmd_delete(ctx, &agent, &key).await,
        Commands::Keys { agent } => cmd_keys(ctx, &agent).await,
        Commands::Remember {
            agent,
            memory_type,
            content,
            meta,
        } => cmd_remember(ctx, &agent, &memory_type, &content, &meta).await,
        Commands::Search {
            agent,
            query,
            threshold,
            limit,
            memory_type,
            json,
        } => {
            let mut params = SearchParams::default()
                .with_threshold(threshold)
                .with_max_results(limit);
            if let Some(t) = memory_type {
                params = params.with_type(t.parse()?);
            }
            cmd_search(ctx, &agent, &query, params, json).await
        }
        Commands::Show { agent, memory_id } => cmd_show(ctx, &agent, &memory_id).await,
        Commands::Grant {
            caller,
            memory_id,
            agent,
            level,
        } => cmd_grant(ctx, &caller, &memory_id, &agent, &level).await,
        Commands::Revoke {
            caller,
            memory_id,
            agent,
        } => cmd_revoke(ctx, &caller, &memory_id, &agent).await,
        Commands::Grants { memory_id } => cmd_grants(ctx, &memory_id).await,
        Commands::Status => cmd_status(ctx),
        Commands::GenSalt => cmd_gen_salt(),
    }
}

/// Show conversation history
async fn cmd_history(
    ctx: &MemoryContext,
    agent: &str,
    user: &str,
    limit: usize,
    json: bool,
) -> Result<()> {
    let history = ctx
        .conversations(agent)
        .get_conversation_history(user, limit)
        .await
        .context("Failed to read history")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No messages between '{}' and '{}'", agent, user);
        return Ok(());
    }

    for msg in history {
        let lock = if msg.encrypted { " [encrypted]" } else { "" };
        println!(
            "{} {:>9}{}: {}",
            msg.timestamp.format("%Y-%m-%d %H:%M:%S"),
            msg.role.as_str(),
            lock,
            msg.content
        );
    }
    Ok(())
}

/// Append a message
async fn cmd_record(
    ctx: &MemoryContext,
    agent: &str,
    user: &str,
    role: &str,
    content: &str,
    sensitive: bool,
) -> Result<()> {
    let mut message = NewMessage::parse(user, role, content)?;
    if sensitive {
        message = message.sensitive();
    }

    let id = ctx.conversations(agent).store_message(message).await?;
    println!("{}", id);
    Ok(())
}

/// Clear a user's history with an agent
async fn cmd_clear(ctx: &MemoryContext, agent: &str, user: &str) -> Result<()> {
    let result = ctx.conversations(agent).clear_user_history(user).await?;
    println!("Deleted {} message(s)", result.deleted);
    Ok(())
}

/// Read a data record
async fn cmd_get(ctx: &MemoryContext, agent: &str, key: &str) -> Result<()> {
    match ctx.conversations(agent).get_data(key).await? {
        Some(Value::String(s)) => println!("{}", s),
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => bail!("No data stored under '{}' for agent '{}'", key, agent),
    }
    Ok(())
}

/// Command-line values are JSON when they parse, plain strings otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Write a data record
async fn cmd_put(
    ctx: &MemoryContext,
    agent: &str,
    key: &str,
    raw: &str,
    sensitive: bool,
) -> Result<()> {
    let opts = StoreOptions { sensitive };
    ctx.conversations(agent)
        .store_data(key, &parse_value(raw), opts)
        .await?;
    debug!(key, sensitive, "data stored");
    println!("Stored '{}'", key);
    Ok(())
}

async fn cmd_delete(ctx: &MemoryContext, agent: &str, key: &str) -> Result<()> {
    if ctx.conversations(agent).delete_data(key).await? {
        println!("Deleted '{}'", key);
    } else {
        println!("Nothing stored under '{}'", key);
    }
    Ok(())
}

async fn cmd_keys(ctx: &MemoryContext, agent: &str) -> Result<()> {
    for key in ctx.conversations(agent).list_data_keys().await? {
        println!("{}", key);
    }
    Ok(())
}

fn parse_metadata(entries: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for entry in entries {
        let Some((k, v)) = entry.split_once('=') else {
            bail!("Metadata must be key=value, got '{}'", entry);
        };
        metadata.insert(k.trim().to_string(), parse_value(v));
    }
    Ok(metadata)
}

/// Create a memory
async fn cmd_remember(
    ctx: &MemoryContext,
    agent: &str,
    memory_type: &str,
    content: &str,
    meta: &[String],
) -> Result<()> {
    let _span = obs::AgentSpan::enter(agent);
    let memory_type: MemoryType = memory_type.parse()?;
    let memory = ctx
        .semantic()
        .create_memory(agent, memory_type, content, parse_metadata(meta)?)
        .await
        .context("Failed to create memory")?;

    println!("{}", memory.id);
    Ok(())
}

/// Search visible memories
async fn cmd_search(
    ctx: &MemoryContext,
    agent: &str,
    query: &str,
    params: SearchParams,
    json: bool,
) -> Result<()> {
    let _span = obs::AgentSpan::enter(agent);
    let results = ctx
        .semantic()
        .search_similar_content(query, agent, params)
        .await
        .context("Search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No memories above {:.2} visible to '{}'", params.similarity_threshold, agent);
        return Ok(());
    }

    for hit in results {
        println!(
            "{:.3}  {}  [{}] {}",
            hit.similarity, hit.memory.id, hit.memory.memory_type, hit.memory.content
        );
    }
    Ok(())
}

async fn cmd_show(ctx: &MemoryContext, agent: &str, memory_id: &str) -> Result<()> {
    let memory = ctx.semantic().get_memory(memory_id, agent).await?;

    println!("memory  {}", memory.id);
    println!("Owner:  {}", memory.agent_id);
    println!("Type:   {}", memory.memory_type);
    println!("Date:   {}", memory.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if !memory.metadata.is_empty() {
        println!("Meta:   {}", Value::Object(memory.metadata));
    }
    println!();
    println!("    {}", memory.content);
    Ok(())
}

/// Share a memory
async fn cmd_grant(
    ctx: &MemoryContext,
    caller: &str,
    memory_id: &str,
    agent: &str,
    level: &str,
) -> Result<()> {
    let level: PermissionLevel = level.parse()?;
    let grant = ctx
        .semantic()
        .grant_access_as(caller, memory_id, agent, level)
        .await?;

    println!(
        "'{}' now holds {} on {}",
        agent, grant.permission_level, memory_id
    );
    Ok(())
}

async fn cmd_revoke(ctx: &MemoryContext, caller: &str, memory_id: &str, agent: &str) -> Result<()> {
    let existed = ctx
        .semantic()
        .revoke_access_as(caller, memory_id, agent)
        .await?;

    if existed {
        println!("Revoked '{}' on {}", agent, memory_id);
    } else {
        println!("'{}' had no access to {}", agent, memory_id);
    }
    Ok(())
}

async fn cmd_grants(ctx: &MemoryContext, memory_id: &str) -> Result<()> {
    let grants = ctx.semantic().grants_for(memory_id).await?;
    if grants.is_empty() {
        println!("No grants on {}", memory_id);
    }
    for grant in grants {
        println!("{:<6} {}", grant.permission_level.as_str(), grant.agent_id);
    }
    Ok(())
}

fn cmd_status(ctx: &MemoryContext) -> Result<()> {
    let backend = match ctx.backend_kind() {
        BackendKind::Durable => "durable (SurrealDB)",
        BackendKind::Volatile => "volatile (process memory, lost on exit)",
    };
    println!("Backend:     {}", backend);
    println!(
        "Encryption:  {}",
        if ctx.encryption_enabled() {
            "enabled"
        } else {
            "disabled (sensitive writes are rejected)"
        }
    );
    println!("Embeddings:  {} dimensions", ctx.semantic().dimension());
    Ok(())
}

fn cmd_gen_salt() -> Result<()> {
    println!("{}", EncryptionKey::generate_salt_hex());
    Ok(())
}
