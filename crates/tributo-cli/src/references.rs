//! `tributo generate-document-references` — reference linking command.

use clap::Args;
use tributo_core::CompanyId;
use tributo_ingest::references::link_document_references;
use tributo_store::PgStore;
use uuid::Uuid;

use crate::CliError;

#[derive(Args, Debug)]
pub struct GenerateReferencesArgs {
    /// Restrict the pass to one company.
    #[arg(long)]
    pub company_id: Option<Uuid>,

    /// Maximum number of pending documents to examine.
    #[arg(long, default_value_t = 1000)]
    pub limit: i64,
}

pub async fn run_generate_references(
    args: &GenerateReferencesArgs,
    store: &PgStore,
) -> Result<(), CliError> {
    let stats = link_document_references(
        store,
        args.company_id.map(CompanyId::from_uuid),
        args.limit,
    )
    .await
    .map_err(|e| CliError::Runtime(e.to_string()))?;

    println!(
        "reference linking done: scanned={} linked={} unmatched={} errors={}",
        stats.scanned, stats.linked, stats.unmatched, stats.errors
    );
    if stats.errors > 0 {
        return Err(CliError::Runtime(format!(
            "{} documents failed to link",
            stats.errors
        )));
    }
    Ok(())
}
