//! easync CLI
//!
//! Command-line tools for ActiveSync WBXML and sync state.
//!
//! # Commands
//!
//! - `dump` - Decode a WBXML document and print it
//! - `encode` - Encode a JSON event list as WBXML
//! - `codepages` - List the code page dictionary
//! - `state` - Inspect and repair a file state store

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// easync command-line tools.
#[derive(Parser)]
#[command(name = "easync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root directory of the file state store
    #[arg(global = true, short, long)]
    state_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a WBXML document and print it
    Dump {
        /// WBXML file to read
        file: PathBuf,

        /// Code page in effect at the start of the document
        #[arg(short, long, default_value = "0")]
        codepage: u8,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Encode a JSON event list as WBXML
    Encode {
        /// JSON file holding an array of events
        file: PathBuf,

        /// Where to write the WBXML document
        #[arg(short, long)]
        output: PathBuf,

        /// Code page in effect at the start of the document
        #[arg(short, long, default_value = "0")]
        codepage: u8,
    },

    /// List the code page dictionary
    Codepages {
        /// Show the tags of one page
        #[arg(short, long)]
        page: Option<u8>,
    },

    /// Inspect and repair sync state
    #[command(subcommand)]
    State(StateCommand),

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum StateCommand {
    /// Show one record
    Inspect {
        /// Device id
        device: String,

        /// Collection id
        collection: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the records of a device
    List {
        /// Device id
        device: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Clear sync turns stuck in progress
    ResetStale {
        /// Minimum age in seconds
        #[arg(short, long, default_value = "300")]
        max_age: u64,
    },

    /// Delete a record, or every record of a device
    Unlink {
        /// Device id
        device: String,

        /// Collection id; all collections when omitted
        collection: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Dump {
            file,
            codepage,
            format,
        } => {
            commands::dump::run(&file, codepage, &format)?;
        }
        Commands::Encode {
            file,
            output,
            codepage,
        } => {
            commands::encode::run(&file, &output, codepage)?;
        }
        Commands::Codepages { page } => {
            commands::codepages::run(page)?;
        }
        Commands::State(command) => {
            let dir = cli.state_dir.ok_or("State directory required (--state-dir)")?;
            match command {
                StateCommand::Inspect {
                    device,
                    collection,
                    format,
                } => commands::state::inspect(&dir, &device, &collection, &format)?,
                StateCommand::List { device, format } => {
                    commands::state::list(&dir, &device, &format)?;
                }
                StateCommand::ResetStale { max_age } => {
                    commands::state::reset_stale(&dir, max_age)?;
                }
                StateCommand::Unlink { device, collection } => {
                    commands::state::unlink(&dir, &device, collection.as_deref())?;
                }
            }
        }
        Commands::Version => {
            println!("easync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "WBXML dictionary: {} code pages",
                easync_wbxml::codepage::codepage_count()
            );
        }
    }

    Ok(())
}
