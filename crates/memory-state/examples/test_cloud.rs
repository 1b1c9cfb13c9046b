//! Quick cloud connection test
//! Run with: cargo run --package memory-state --example test_cloud

use memory_state::{CloudConfig, SchemaStatus, SurrealHandle};

#[tokio::main]
async fn main() {
    // Load from environment
    dotenvy::dotenv().ok();

    println!("Testing SurrealDB Cloud connection...");

    let config = match CloudConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Missing environment variables: {}", e);
            std::process::exit(1);
        }
    };

    println!("  Endpoint: {}", config.endpoint);
    println!("  Namespace: {}", config.namespace);
    println!("  Database: {}", config.database);
    println!("  User: {}", config.username);

    let handle = match SurrealHandle::setup_cloud(config).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("\n✗ Connection failed: {}", e);
            std::process::exit(1);
        }
    };
    println!("\n✓ Successfully connected to SurrealDB Cloud!");

    match handle.ensure_schema().await {
        Ok(SchemaStatus::Ready) => println!("✓ agent-memory tables present"),
        Ok(SchemaStatus::Degraded) => {
            println!("! tables missing and could not be created (degraded mode)")
        }
        Err(e) => {
            eprintln!("✗ Schema check failed: {}", e);
            std::process::exit(1);
        }
    }
}
