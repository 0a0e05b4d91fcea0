//! # Store Inspector
//!
//! Prints per-namespace row counts of a Tessera SQLite store.
//!
//! ## Usage
//! ```bash
//! # Inspect the default database
//! cargo run -p tessera-db --bin inspect
//!
//! # Specify database path
//! cargo run -p tessera-db --bin inspect -- --db ./data/tessera.db
//!
//! # Only one namespace
//! cargo run -p tessera-db --bin inspect -- --namespace alice
//! ```

use std::env;

use tessera_db::{ConfigPort, DbConfig, SqliteStorage};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tessera=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./tessera_dev.db");
    let mut namespace: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--namespace" | "-n" => {
                if i + 1 < args.len() {
                    namespace = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tessera Store Inspector");
                println!();
                println!("Usage: inspect [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>          Database file path (default: ./tessera_dev.db)");
                println!("  -n, --namespace <NAME>   Only show this namespace");
                println!("  -h, --help               Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    // Inspecting never migrates
    let config = DbConfig::new(&db_path).run_migrations(false);
    let storage = SqliteStorage::open(config).await?;
    storage.initialize().await?;
    info!(path = %db_path, "Opened store");

    let (total, applied) = tessera_db::migrations::migration_status(storage.pool()).await?;
    println!("Database:   {}", db_path);
    println!("Migrations: {}/{} applied", applied, total);
    println!();

    let schemas = storage.schemas().await?;
    if !schemas.is_empty() {
        println!("Tables:");
        for schema in &schemas {
            println!("  {:<20} id field: {}, {} declared fields", schema.table, schema.id_field, schema.fields.len());
        }
        println!();
    }

    println!("{:<16} {:<20} {:>8} {:>8} {:>10}", "NAMESPACE", "TABLE", "ROWS", "PENDING", "TOMBSTONES");
    let stats = storage.table_stats().await?;
    let mut shown = 0;
    for row in stats
        .iter()
        .filter(|s| namespace.as_deref().map_or(true, |ns| s.namespace == ns))
    {
        println!(
            "{:<16} {:<20} {:>8} {:>8} {:>10}",
            row.namespace, row.table, row.total, row.pending, row.tombstones
        );
        shown += 1;
    }
    if shown == 0 {
        println!("(no rows)");
    }

    storage.close().await?;
    Ok(())
}
