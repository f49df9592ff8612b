//! `tributo seed-process-templates` — template seeding command.

use clap::Args;
use tributo_engine::{seed_templates, SeedOptions};
use tributo_store::PgStore;

use crate::CliError;

#[derive(Args, Debug)]
pub struct SeedTemplatesArgs {
    /// Remove existing templates before seeding.
    #[arg(long)]
    pub clear: bool,

    /// Log each template as it is processed.
    #[arg(long)]
    pub verbose: bool,
}

pub async fn run_seed_templates(
    args: &SeedTemplatesArgs,
    store: &PgStore,
) -> Result<(), CliError> {
    let summary = seed_templates(
        store,
        SeedOptions {
            clear: args.clear,
            verbose: args.verbose,
        },
    )
    .await
    .map_err(|e| CliError::Runtime(e.to_string()))?;

    println!(
        "template seeding done: created={} skipped={} cleared={}",
        summary.created, summary.skipped, summary.cleared
    );
    Ok(())
}
