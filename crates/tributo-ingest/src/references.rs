//! Document reference linking.
//!
//! Credit and debit notes announce the document they modify through a
//! reference folio and type code. This pass resolves those announcements
//! to actual rows by the unique document key and writes the link.
//! Idempotent: already-linked rows are never revisited.

use tributo_core::CompanyId;
use tributo_store::{DocumentKey, DocumentStore};

use crate::error::IngestError;

/// Counters for one linking pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceStats {
    pub scanned: u64,
    pub linked: u64,
    pub unmatched: u64,
    pub errors: u64,
}

/// Resolve pending references, optionally scoped to one company.
pub async fn link_document_references<S: DocumentStore>(
    store: &S,
    company_id: Option<CompanyId>,
    limit: i64,
) -> Result<ReferenceStats, IngestError> {
    let pending = store
        .documents_with_unresolved_references(company_id, limit)
        .await?;
    let mut stats = ReferenceStats::default();

    for document in &pending {
        stats.scanned += 1;
        let (Some(folio), Some(type_code)) =
            (document.reference_folio, document.reference_type_code)
        else {
            continue;
        };
        // A note references a document by the same issuer.
        let key = DocumentKey {
            issuer: document.issuer,
            type_code,
            folio,
        };
        match store.find_document(&key).await {
            Ok(Some(referenced)) => {
                match store.set_reference_document(document.id, referenced.id).await {
                    Ok(()) => {
                        stats.linked += 1;
                        tracing::debug!(
                            from = document.folio,
                            to = referenced.folio,
                            "document reference linked"
                        );
                    }
                    Err(e) => {
                        stats.errors += 1;
                        tracing::warn!(folio = document.folio, error = %e, "reference write failed");
                    }
                }
            }
            Ok(None) => {
                stats.unmatched += 1;
                tracing::debug!(
                    folio = document.folio,
                    reference_folio = folio,
                    "referenced document not present yet"
                );
            }
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(folio = document.folio, error = %e, "reference lookup failed");
            }
        }
    }

    tracing::info!(
        scanned = stats.scanned,
        linked = stats.linked,
        unmatched = stats.unmatched,
        errors = stats.errors,
        "reference linking pass finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use serde_json::Value;
    use tributo_core::{DocumentId, DocumentStatus, Rut};
    use tributo_store::{DocumentRecord, MemStore};

    fn doc(folio: i64, type_code: i32) -> DocumentRecord {
        let now = Utc::now();
        DocumentRecord {
            id: DocumentId::new(),
            company_id: None,
            issuer: Rut::parse("76543210-5").unwrap(),
            issuer_name: "Proveedor".into(),
            issuer_address: String::new(),
            issuer_activity: String::new(),
            recipient: Rut::parse("77794858-K").unwrap(),
            recipient_name: "Empresa".into(),
            recipient_address: String::new(),
            type_code,
            folio,
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            status: DocumentStatus::Accepted,
            net_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            exempt_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            sii_track_id: String::new(),
            raw_data: Value::Null,
            reference_folio: None,
            reference_type_code: None,
            reference_document: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn links_credit_note_to_its_invoice() {
        let store = MemStore::new();
        let invoice = doc(100, 33);
        store.insert_document(&invoice).await.unwrap();

        let mut credit_note = doc(7, 61);
        credit_note.reference_folio = Some(100);
        credit_note.reference_type_code = Some(33);
        store.insert_document(&credit_note).await.unwrap();

        let stats = link_document_references(&store, None, 1000).await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.linked, 1);

        let key = credit_note.key();
        let reloaded = store.find_document(&key).await.unwrap().unwrap();
        assert_eq!(reloaded.reference_document, Some(invoice.id));

        // Second pass finds nothing left to do.
        let stats = link_document_references(&store, None, 1000).await.unwrap();
        assert_eq!(stats.scanned, 0);
    }

    #[tokio::test]
    async fn missing_target_counts_as_unmatched() {
        let store = MemStore::new();
        let mut credit_note = doc(7, 61);
        credit_note.reference_folio = Some(999);
        credit_note.reference_type_code = Some(33);
        store.insert_document(&credit_note).await.unwrap();

        let stats = link_document_references(&store, None, 1000).await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.linked, 0);
    }
}
