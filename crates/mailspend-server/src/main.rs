//! Mailspend server binary
//!
//! Usage:
//!   mailspend init                 Initialize database
//!   mailspend serve --port 3000    Start API server and schedulers
//!   mailspend sync                 Run one sync pass from the terminal

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mailspend_core::{Database, ExtractionConfig, SyncOrchestrator, TokenCipher};

/// Mailspend - extract transactions from bank and merchant email
#[derive(Parser)]
#[command(name = "mailspend")]
#[command(about = "Email transaction extraction service", long_about = None)]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(long, default_value = "mailspend.db", global = true)]
    db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set MAILSPEND_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    no_encrypt: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Start the API server and background schedulers
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Run one sync pass without starting the server
    Sync {
        /// Sync only this account id
        #[arg(long)]
        account: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => cmd_init(&cli.db, cli.no_encrypt),
        Commands::Serve { port, host } => cmd_serve(&cli.db, &host, port, cli.no_encrypt).await,
        Commands::Sync { account } => cmd_sync(&cli.db, account, cli.no_encrypt).await,
    }
}

fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    let _db = open_db(db_path, no_encrypt)?;
    println!("Initialized database at {}", db_path.display());
    if no_encrypt {
        println!("⚠️  Encryption DISABLED (--no-encrypt)");
    }
    Ok(())
}

async fn cmd_serve(db_path: &Path, host: &str, port: u16, no_encrypt: bool) -> Result<()> {
    println!("🚀 Starting Mailspend server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;
    mailspend_server::serve(db, host, port).await
}

async fn cmd_sync(db_path: &Path, account: Option<i64>, no_encrypt: bool) -> Result<()> {
    let db = open_db(db_path, no_encrypt)?;
    let cipher = TokenCipher::from_env().context("Token encryption key required")?;
    let orchestrator = SyncOrchestrator::new(db, cipher, ExtractionConfig::from_env())?;

    match account {
        Some(id) => {
            let outcome = orchestrator.sync_account(id).await?;
            println!(
                "Synced account {}: {} email(s) seen, {} extracted",
                id, outcome.emails_seen, outcome.extracted
            );
        }
        None => {
            let synced = orchestrator.run_once().await?;
            println!("Synced {} account(s)", synced);
        }
    }
    Ok(())
}

fn open_db(path: &Path, no_encrypt: bool) -> Result<Database> {
    let path = path
        .to_str()
        .context("Database path must be valid UTF-8")?;

    let db = if no_encrypt {
        Database::new_unencrypted(path)
    } else {
        Database::new(path)
    };

    db.context("Failed to open database")
}
