//! # tributo CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.
//! Uses clap derive macros; exit codes are 0 on success, 1 on
//! configuration error, 2 on runtime failure.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tributo_cli::contacts::{run_sync_contacts, SyncContactsArgs};
use tributo_cli::references::{run_generate_references, GenerateReferencesArgs};
use tributo_cli::seed::{run_seed_templates, SeedTemplatesArgs};
use tributo_cli::{connect_store, CliError};

/// Tributo back-office administration.
#[derive(Parser, Debug)]
#[command(name = "tributo", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rebuild contacts from persisted documents.
    SyncContacts(SyncContactsArgs),

    /// Link credit/debit notes to the documents they reference.
    GenerateDocumentReferences(GenerateReferencesArgs),

    /// Load the canonical process templates into the store.
    SeedProcessTemplates(SeedTemplatesArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = run(cli.command).await;
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(command: Commands) -> Result<(), CliError> {
    let store = connect_store().await?;
    match command {
        Commands::SyncContacts(args) => run_sync_contacts(&args, &store).await,
        Commands::GenerateDocumentReferences(args) => {
            run_generate_references(&args, &store).await
        }
        Commands::SeedProcessTemplates(args) => run_seed_templates(&args, &store).await,
    }
}
