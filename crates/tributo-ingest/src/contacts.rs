//! Contact derivation from document traffic.
//!
//! Runs synchronously on the document upsert path: a document issued by
//! the company yields its recipient as a client, a received document
//! yields its issuer as a provider. Roles are additive — an update never
//! removes one — and existing non-empty fields are never overwritten.

use chrono::Utc;
use tributo_core::{ContactId, ContactRole, DocumentDirection, Rut};
use tributo_store::{CompanyRecord, ContactRecord, ContactStore, DocumentRecord, DocumentStore};

use crate::error::IngestError;

/// Counters for the bulk rebuild path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactSyncStats {
    pub documents_scanned: u64,
    pub contacts_created: u64,
    pub contacts_updated: u64,
    pub skipped: u64,
}

/// Derive (or merge) the counterparty contact implied by one persisted
/// document. Documents whose direction is unknown are skipped.
pub async fn derive_contact_for_document<S: ContactStore>(
    store: &S,
    company: &CompanyRecord,
    document: &DocumentRecord,
) -> Result<Option<ContactRole>, IngestError> {
    let (counterparty, name, address, category, role) =
        match document.direction(company.tax_id) {
            DocumentDirection::Issued => (
                document.recipient,
                document.recipient_name.clone(),
                document.recipient_address.clone(),
                String::new(),
                ContactRole::Client,
            ),
            DocumentDirection::Received => (
                document.issuer,
                document.issuer_name.clone(),
                document.issuer_address.clone(),
                document.issuer_activity.clone(),
                ContactRole::Provider,
            ),
            DocumentDirection::Unknown => {
                tracing::warn!(
                    company = %company.tax_id,
                    issuer = %document.issuer,
                    recipient = %document.recipient,
                    folio = document.folio,
                    "document matches neither side of its company, skipping contact"
                );
                return Ok(None);
            }
        };

    // A company is never its own contact.
    if counterparty == company.tax_id {
        return Ok(None);
    }

    upsert_contact(store, company, counterparty, &name, &address, &category, role).await?;
    Ok(Some(role))
}

async fn upsert_contact<S: ContactStore>(
    store: &S,
    company: &CompanyRecord,
    tax_id: Rut,
    name: &str,
    address: &str,
    category: &str,
    role: ContactRole,
) -> Result<bool, IngestError> {
    match store.contact_for(company.id, tax_id).await? {
        Some(mut contact) => {
            let mut changed = false;
            match role {
                ContactRole::Client if !contact.is_client => {
                    contact.is_client = true;
                    changed = true;
                }
                ContactRole::Provider if !contact.is_provider => {
                    contact.is_provider = true;
                    changed = true;
                }
                _ => {}
            }
            // Fill gaps only; never clobber data someone already curated.
            if contact.name.is_empty() && !name.is_empty() {
                contact.name = name.to_string();
                changed = true;
            }
            if contact.address.is_empty() && !address.is_empty() {
                contact.address = address.to_string();
                changed = true;
            }
            if contact.category.is_empty() && !category.is_empty() {
                contact.category = category.to_string();
                changed = true;
            }
            if changed {
                store.update_contact(&contact).await?;
                tracing::debug!(contact = %tax_id, "contact updated from document");
            }
            Ok(false)
        }
        None => {
            let contact = ContactRecord {
                id: ContactId::new(),
                company_id: company.id,
                tax_id,
                name: name.to_string(),
                email: String::new(),
                phone: String::new(),
                address: address.to_string(),
                category: category.to_string(),
                is_client: role == ContactRole::Client,
                is_provider: role == ContactRole::Provider,
                is_active: true,
                notes: String::new(),
                created_at: Utc::now(),
            };
            store.insert_contact(&contact).await?;
            tracing::debug!(contact = %tax_id, "contact created from document");
            Ok(true)
        }
    }
}

/// Replay contact derivation over a company's persisted documents, using
/// the same rules as the upsert path. With `dry_run`, counts what would
/// change without writing.
pub async fn rebuild_contacts<S: ContactStore + DocumentStore>(
    store: &S,
    company: &CompanyRecord,
    limit: i64,
    dry_run: bool,
) -> Result<ContactSyncStats, IngestError> {
    let documents = store.list_documents_for_company(company.id, limit).await?;
    let mut stats = ContactSyncStats::default();

    for document in &documents {
        stats.documents_scanned += 1;
        if dry_run {
            match document.direction(company.tax_id) {
                DocumentDirection::Unknown => stats.skipped += 1,
                DocumentDirection::Issued | DocumentDirection::Received => {
                    stats.contacts_updated += 1;
                }
            }
            continue;
        }
        match derive_contact_for_document(store, company, document).await {
            Ok(Some(_)) => stats.contacts_updated += 1,
            Ok(None) => stats.skipped += 1,
            Err(e) => {
                stats.skipped += 1;
                tracing::warn!(folio = document.folio, error = %e, "contact rebuild skipped a document");
            }
        }
    }

    tracing::info!(
        company = %company.tax_id,
        scanned = stats.documents_scanned,
        updated = stats.contacts_updated,
        skipped = stats.skipped,
        dry_run,
        "contact rebuild finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use serde_json::Value;
    use tributo_core::DocumentId;
    use tributo_store::{CompanyStore, MemStore};

    fn rut(s: &str) -> Rut {
        Rut::parse(s).unwrap()
    }

    fn doc(company: &CompanyRecord, issuer: &str, recipient: &str, folio: i64) -> DocumentRecord {
        let now = Utc::now();
        DocumentRecord {
            id: DocumentId::new(),
            company_id: Some(company.id),
            issuer: rut(issuer),
            issuer_name: "Proveedor SpA".into(),
            issuer_address: "Calle 1".into(),
            issuer_activity: "Servicios".into(),
            recipient: rut(recipient),
            recipient_name: "Cliente Ltda".into(),
            recipient_address: String::new(),
            type_code: 33,
            folio,
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            status: tributo_core::DocumentStatus::Accepted,
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

    async fn setup() -> (MemStore, CompanyRecord) {
        let store = MemStore::new();
        let company = CompanyRecord::new(rut("77794858-K"), "Empresa SpA");
        store.insert_company(&company).await.unwrap();
        (store, company)
    }

    #[tokio::test]
    async fn received_document_creates_provider() {
        let (store, company) = setup().await;
        let document = doc(&company, "76543210-5", "77794858-K", 1);
        let role = derive_contact_for_document(&store, &company, &document)
            .await
            .unwrap();
        assert_eq!(role, Some(ContactRole::Provider));

        let contact = store
            .contact_for(company.id, rut("76543210-5"))
            .await
            .unwrap()
            .unwrap();
        assert!(contact.is_provider);
        assert!(!contact.is_client);
        assert_eq!(contact.name, "Proveedor SpA");
        assert_eq!(contact.category, "Servicios");
        assert!(contact.is_active);
    }

    #[tokio::test]
    async fn roles_are_additive_and_never_removed() {
        let (store, company) = setup().await;
        // Received first: provider.
        let received = doc(&company, "76543210-5", "77794858-K", 1);
        derive_contact_for_document(&store, &company, &received)
            .await
            .unwrap();
        // Then the company issues to the same counterparty: add client.
        let issued = doc(&company, "77794858-K", "76543210-5", 2);
        derive_contact_for_document(&store, &company, &issued)
            .await
            .unwrap();

        let contact = store
            .contact_for(company.id, rut("76543210-5"))
            .await
            .unwrap()
            .unwrap();
        assert!(contact.is_client && contact.is_provider);

        // A further issued document changes nothing.
        let issued_again = doc(&company, "77794858-K", "76543210-5", 3);
        derive_contact_for_document(&store, &company, &issued_again)
            .await
            .unwrap();
        let contact = store
            .contact_for(company.id, rut("76543210-5"))
            .await
            .unwrap()
            .unwrap();
        assert!(contact.is_client && contact.is_provider);
    }

    #[tokio::test]
    async fn existing_fields_are_not_overwritten() {
        let (store, company) = setup().await;
        let first = doc(&company, "76543210-5", "77794858-K", 1);
        derive_contact_for_document(&store, &company, &first)
            .await
            .unwrap();

        let mut second = doc(&company, "76543210-5", "77794858-K", 2);
        second.issuer_name = "Otro Nombre SpA".into();
        derive_contact_for_document(&store, &company, &second)
            .await
            .unwrap();

        let contact = store
            .contact_for(company.id, rut("76543210-5"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contact.name, "Proveedor SpA");
    }

    #[tokio::test]
    async fn unknown_direction_is_skipped() {
        let (store, company) = setup().await;
        let stray = doc(&company, "76543210-5", "9123456-7", 1);
        let role = derive_contact_for_document(&store, &company, &stray)
            .await
            .unwrap();
        assert_eq!(role, None);
        assert!(store.list_contacts(company.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rebuild_replays_all_documents() {
        let (store, company) = setup().await;
        store
            .insert_document(&doc(&company, "76543210-5", "77794858-K", 1))
            .await
            .unwrap();
        store
            .insert_document(&doc(&company, "77794858-K", "9123456-7", 2))
            .await
            .unwrap();

        let dry = rebuild_contacts(&store, &company, 1000, true).await.unwrap();
        assert_eq!(dry.documents_scanned, 2);
        assert!(store.list_contacts(company.id).await.unwrap().is_empty());

        let stats = rebuild_contacts(&store, &company, 1000, false)
            .await
            .unwrap();
        assert_eq!(stats.documents_scanned, 2);
        assert_eq!(store.list_contacts(company.id).await.unwrap().len(), 2);
    }
}
