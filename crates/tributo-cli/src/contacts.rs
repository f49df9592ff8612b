//! `tributo sync-contacts` — contact rebuild command.

use clap::Args;
use tributo_core::CompanyId;
use tributo_ingest::contacts::rebuild_contacts;
use tributo_store::{CompanyRecord, CompanyStore, PgStore};
use uuid::Uuid;

use crate::CliError;

/// How many documents one company's rebuild scans at most.
const REBUILD_SCAN_LIMIT: i64 = 10_000;

#[derive(Args, Debug)]
pub struct SyncContactsArgs {
    /// Restrict the rebuild to one company.
    #[arg(long)]
    pub company_id: Option<Uuid>,

    /// Count what would change without writing.
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run_sync_contacts(args: &SyncContactsArgs, store: &PgStore) -> Result<(), CliError> {
    let companies = resolve_companies(store, args.company_id).await?;

    let mut scanned = 0u64;
    let mut updated = 0u64;
    let mut skipped = 0u64;

    for company in &companies {
        let stats = rebuild_contacts(store, company, REBUILD_SCAN_LIMIT, args.dry_run)
            .await
            .map_err(|e| CliError::Runtime(e.to_string()))?;
        scanned += stats.documents_scanned;
        updated += stats.contacts_updated;
        skipped += stats.skipped;
    }

    println!(
        "contact rebuild {}: companies={} documents={} contacts={} skipped={}",
        if args.dry_run { "dry run" } else { "done" },
        companies.len(),
        scanned,
        updated,
        skipped
    );
    Ok(())
}

pub(crate) async fn resolve_companies(
    store: &PgStore,
    company_id: Option<Uuid>,
) -> Result<Vec<CompanyRecord>, CliError> {
    match company_id {
        Some(id) => {
            let company = store
                .company_by_id(CompanyId::from_uuid(id))
                .await
                .map_err(|e| CliError::Runtime(e.to_string()))?
                .ok_or_else(|| CliError::Config(format!("company {id} not found")))?;
            Ok(vec![company])
        }
        None => store
            .list_companies()
            .await
            .map_err(|e| CliError::Runtime(e.to_string())),
    }
}
