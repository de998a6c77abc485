//! ShelfDB CLI
//!
//! Command-line tools for inspecting a file-backed ShelfDB directory.
//!
//! # Commands
//!
//! - `databases` - List databases and their versions
//! - `inspect` - Display the schema and record counts of a database
//! - `dump` - Print the records of an object store as JSON lines

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ShelfDB command-line database tools.
#[derive(Parser)]
#[command(name = "shelfdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List databases and their versions
    Databases {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: Format,
    },

    /// Display the schema and record counts of a database
    Inspect {
        /// Database name
        database: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: Format,
    },

    /// Print the records of an object store as JSON lines
    Dump {
        /// Database name
        database: String,

        /// Object store name
        store: String,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("ShelfDB CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.path.ok_or("Database path required (--path DIR)")?;
    let factory = commands::factory(&path)?;
    match cli.command {
        Commands::Databases { format } => commands::databases::run(&factory, format).await?,
        Commands::Inspect { database, format } => {
            commands::inspect::run(&factory, &database, format).await?;
        }
        Commands::Dump {
            database,
            store,
            limit,
        } => commands::dump::run(&factory, &database, &store, limit).await?,
        Commands::Version => {}
    }

    Ok(())
}
