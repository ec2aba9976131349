//! cardsync CLI
//!
//! Command-line tools for a device's local card store.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics and sync metadata
//! - `due` - List cards due for review
//! - `grade` - Grade a card and queue the new schedule
//! - `pending` - List queued local changes
//! - `checksum` - Print the collection checksums used by validation
//! - `export` / `import` - Offline snapshot of the whole store
//! - `sync` - Run a sync cycle against a server

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// cardsync command-line store tools.
#[derive(Parser)]
#[command(name = "cardsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics and sync metadata
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// List cards due for review
    Due {
        /// Maximum number of cards to list
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Grade a card
    Grade {
        /// Card id
        card_id: String,

        /// Recall quality, 0 (blackout) to 5 (perfect)
        grade: u8,
    },

    /// List queued local changes
    Pending {
        /// Show only the latest change per entity, as a push would send
        #[arg(short, long)]
        compacted: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Print the collection checksums
    Checksum,

    /// Write an offline snapshot of the store
    Export {
        /// Output file
        output: PathBuf,
    },

    /// Replace the store with an offline snapshot
    Import {
        /// Input file
        input: PathBuf,
    },

    /// Run a sync cycle
    Sync {
        /// Sync server base URL
        #[arg(short, long)]
        server: String,

        /// Replace local state with the server's instead of a normal cycle
        #[arg(long)]
        full: bool,

        /// Attempts before giving up on retryable failures
        #[arg(short, long, default_value = "3")]
        attempts: u32,

        /// How push conflicts are settled
        #[arg(long, value_enum, default_value = "server-wins")]
        policy: commands::sync::Policy,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("cardsync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!(
            "export format v{}",
            cardsync_core::EXPORT_FORMAT_VERSION
        );
        return Ok(());
    }

    let path = cli.path.ok_or("Store path required (--path)")?;
    match cli.command {
        Commands::Inspect { format } => {
            commands::inspect::run(&path, matches!(format, Format::Json))?;
        }
        Commands::Due { limit } => commands::review::due(&path, limit)?,
        Commands::Grade { card_id, grade } => commands::review::grade(&path, &card_id, grade)?,
        Commands::Pending { compacted, format } => {
            commands::pending::run(&path, compacted, matches!(format, Format::Json))?;
        }
        Commands::Checksum => commands::pending::checksum(&path)?,
        Commands::Export { output } => commands::transfer::export(&path, &output)?,
        Commands::Import { input } => commands::transfer::import(&path, &input)?,
        Commands::Sync {
            server,
            full,
            attempts,
            policy,
        } => commands::sync::run(&path, &server, full, attempts, policy)?,
        Commands::Version => {}
    }

    Ok(())
}
