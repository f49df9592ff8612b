//! The DTE processor: validate → map → upsert, one record at a time.
//!
//! Each record runs in its own atomic scope: a failure is counted and the
//! batch continues. Upserts key on
//! `(issuer, type_code, folio)` — a lost insert race surfaces as a
//! uniqueness conflict and is retried once as an update, so re-running the
//! same source records can only ever update rows, never duplicate them.
//! Contact derivation runs on the same path immediately after the write.

use chrono::Utc;

use tributo_store::{CompanyRecord, ContactStore, DocumentStore, SyncCounters};

use crate::contacts::derive_contact_for_document;
use crate::error::IngestError;
use crate::mapper::DocumentMapper;
use crate::validator::validate_document;
use tributo_portal::TaggedDocument;

/// Per-batch processing outcome: counters plus the stable reasons of every
/// rejected record, carried into the sync log's error details.
#[derive(Debug, Default, Clone)]
pub struct BatchOutcome {
    pub counters: SyncCounters,
    pub error_details: Vec<String>,
}

/// Processes batches of raw documents for one company.
#[derive(Debug, Clone)]
pub struct DteProcessor<S> {
    store: S,
    company: CompanyRecord,
    mapper: DocumentMapper,
}

impl<S> DteProcessor<S>
where
    S: DocumentStore + ContactStore + Clone,
{
    pub fn new(store: S, company: CompanyRecord) -> Self {
        let mapper = DocumentMapper::new(company.clone());
        Self {
            store,
            company,
            mapper,
        }
    }

    /// Process one batch. Never fails as a whole: every record's failure is
    /// absorbed into the counters.
    pub async fn process_batch(&self, batch: &[TaggedDocument]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return outcome;
        }
        tracing::info!(
            company = %self.company.tax_id,
            batch_size = batch.len(),
            "processing document batch"
        );

        for tagged in batch {
            match self.process_single(tagged).await {
                Ok(created) => {
                    outcome.counters.processed += 1;
                    if created {
                        outcome.counters.created += 1;
                    } else {
                        outcome.counters.updated += 1;
                    }
                }
                Err(reason) => {
                    outcome.counters.processed += 1;
                    outcome.counters.errors += 1;
                    tracing::warn!(
                        company = %self.company.tax_id,
                        period = %tagged.period,
                        reason,
                        "document rejected"
                    );
                    outcome.error_details.push(reason);
                }
            }
        }

        tracing::info!(
            created = outcome.counters.created,
            updated = outcome.counters.updated,
            errors = outcome.counters.errors,
            "document batch processed"
        );
        outcome
    }

    /// Upsert one record. Returns `true` when a new row was created.
    /// The error is the stable rejection reason.
    async fn process_single(&self, tagged: &TaggedDocument) -> Result<bool, String> {
        validate_document(tagged).map_err(|f| format!("validation: {f}"))?;

        let now = Utc::now();
        let mapped = self
            .mapper
            .map(tagged, now)
            .map_err(|f| format!("mapping: {f}"))?;

        // The type catalogue row must exist before the document references it.
        self.store
            .ensure_document_type(&mapped.document_type)
            .await
            .map_err(|e| format!("type catalogue: {e}"))?;

        let created = self
            .upsert_document(&mapped.record)
            .await
            .map_err(|e| format!("persistence: {e}"))?;

        derive_contact_for_document(&self.store, &self.company, &mapped.record)
            .await
            .map_err(|e| format!("contact derivation: {e}"))?;

        Ok(created)
    }

    async fn upsert_document(
        &self,
        record: &tributo_store::DocumentRecord,
    ) -> Result<bool, IngestError> {
        let key = record.key();
        if let Some(mut existing) = self.store.find_document(&key).await? {
            existing.absorb(record, Utc::now());
            self.store.update_document(&existing).await?;
            return Ok(false);
        }

        match self.store.insert_document(record).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => {
                // Lost the insert race against a concurrent worker: the row
                // exists now, so retry once as an update.
                let mut existing = self
                    .store
                    .find_document(&key)
                    .await?
                    .ok_or(IngestError::Store(e))?;
                existing.absorb(record, Utc::now());
                self.store.update_document(&existing).await?;
                Ok(false)
            }
            Err(e) => Err(IngestError::Store(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tributo_core::{OperationKind, Rut, TaxPeriod};
    use tributo_portal::RawDocument;
    use tributo_store::{CompanyStore, DocumentKey, MemStore};

    fn tagged(value: serde_json::Value, operation: OperationKind) -> TaggedDocument {
        TaggedDocument {
            operation,
            company_tax_id: "77794858-K".into(),
            period: TaxPeriod::new(2024, 1).unwrap(),
            task_id: None,
            document: RawDocument::from_value(&value).unwrap(),
        }
    }

    async fn processor() -> (MemStore, CompanyRecord, DteProcessor<MemStore>) {
        let store = MemStore::new();
        let company = CompanyRecord::new(Rut::parse("77794858-K").unwrap(), "Empresa SpA");
        store.insert_company(&company).await.unwrap();
        let processor = DteProcessor::new(store.clone(), company.clone());
        (store, company, processor)
    }

    fn purchase(folio: i64) -> TaggedDocument {
        tagged(
            json!({
                "detNroDoc": folio, "detTipoDoc": 33, "detFchDoc": "15/01/2024",
                "detRutDoc": 76543210, "detDvDoc": "5", "detRznSoc": "Proveedor SpA",
                "detMntNeto": 100000, "detMntIVA": 19000, "detMntTotal": 119000
            }),
            OperationKind::Received,
        )
    }

    #[tokio::test]
    async fn batch_counts_creates_updates_and_errors() {
        let (_, _, processor) = processor().await;
        let batch = vec![
            purchase(1),
            purchase(2),
            // Bad row: negative folio.
            tagged(json!({"detNroDoc": -1}), OperationKind::Received),
        ];
        let outcome = processor.process_batch(&batch).await;
        // Every record counts as processed, rejected ones as errors too.
        assert_eq!(outcome.counters.processed, 3);
        assert_eq!(outcome.counters.created, 2);
        assert_eq!(outcome.counters.updated, 0);
        assert_eq!(outcome.counters.errors, 1);
        assert_eq!(outcome.error_details.len(), 1);
    }

    #[tokio::test]
    async fn reprocessing_is_idempotent() {
        let (store, _, processor) = processor().await;
        let batch = vec![purchase(1), purchase(2)];

        let first = processor.process_batch(&batch).await;
        assert_eq!(first.counters.created, 2);

        let second = processor.process_batch(&batch).await;
        assert_eq!(second.counters.created, 0);
        assert_eq!(second.counters.updated, 2);

        // The unique key yields exactly one row.
        let key = DocumentKey {
            issuer: Rut::parse("76543210-5").unwrap(),
            type_code: 33,
            folio: 1,
        };
        assert!(store.find_document(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unseen_type_code_creates_catalogue_row() {
        let (store, _, processor) = processor().await;
        let batch = vec![tagged(
            json!({"detNroDoc": 7, "detTipoDoc": 99, "detRutDoc": 76543210, "detDvDoc": "5"}),
            OperationKind::Received,
        )];
        let outcome = processor.process_batch(&batch).await;
        assert_eq!(outcome.counters.created, 1);
        let row = store.document_type(99).await.unwrap().unwrap();
        assert_eq!(row.name, "DTE Tipo 99");
    }

    #[tokio::test]
    async fn persisted_documents_derive_contacts() {
        let (store, company, processor) = processor().await;
        processor.process_batch(&[purchase(1)]).await;
        let contact = store
            .contact_for(company.id, Rut::parse("76543210-5").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(contact.is_provider);
    }

    #[tokio::test]
    async fn invariant_processed_equals_created_updated_errors() {
        let (_, _, processor) = processor().await;
        let batch = vec![
            purchase(1),
            purchase(2),
            purchase(1),
            tagged(json!({"detNroDoc": -1}), OperationKind::Received),
        ];
        let outcome = processor.process_batch(&batch).await;
        assert_eq!(
            outcome.counters.processed,
            outcome.counters.created + outcome.counters.updated + outcome.counters.errors
        );
        assert_eq!(outcome.counters.created, 2);
        assert_eq!(outcome.counters.updated, 1);
        assert_eq!(outcome.counters.errors, 1);
    }
}
