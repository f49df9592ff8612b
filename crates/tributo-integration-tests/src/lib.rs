//! Cross-crate scenario tests live in `tests/`; this crate exports the
//! shared fixtures they build on.

use tributo_core::Rut;
use tributo_store::{CompanyRecord, CompanyStore, MemStore, SyncLogRecord, SyncLogStore};

/// The company every scenario operates on.
pub const COMPANY_RUT: &str = "77794858-K";

/// A fresh in-memory store with the scenario company persisted.
pub async fn store_with_company() -> (MemStore, CompanyRecord) {
    let store = MemStore::new();
    let company = CompanyRecord::new(
        Rut::parse(COMPANY_RUT).expect("fixture tax id"),
        "Empresa SpA",
    );
    store
        .insert_company(&company)
        .await
        .expect("insert fixture company");
    (store, company)
}

/// A pending sync log for a document job on the fixture company.
pub async fn pending_sync_log(store: &MemStore, company: &CompanyRecord) -> SyncLogRecord {
    let log = SyncLogRecord::new(
        Some(company.id),
        company.tax_id,
        "documents",
        "tests@example.cl",
        "scenario sync",
    );
    store.insert_sync_log(&log).await.expect("insert sync log");
    log
}
