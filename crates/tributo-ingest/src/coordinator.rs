//! The period-sharded ingestion coordinator.
//!
//! One job owns one portal session for its whole lifetime. The date range
//! is split into monthly periods processed chronologically; within each
//! period the summary is fetched first to discover which document type
//! codes have content, then each code's listing is pulled, tagged and
//! appended to the in-memory batch. Batches flush to the DTE processor at
//! the configured size so memory stays bounded. Progress and counters
//! stream into the sync log; cancellation is cooperative and checked
//! between periods and between batches.

use chrono::{NaiveDate, Utc};

use tributo_core::{OperationKind, SyncLogId, SyncStatus, TaxPeriod};
use tributo_portal::{PortalError, PortalSession, RetrySchedule, TaggedDocument};
use tributo_store::{
    CompanyRecord, CompanyStore, ContactStore, CredentialStore, DocumentStore, SyncCounters,
    SyncLogStore,
};

use crate::error::IngestError;
use crate::processor::DteProcessor;

/// Fallback purchase-side codes when the summary is unavailable or empty.
const FALLBACK_PURCHASE_CODES: &[i32] = &[33, 34, 46, 56, 61];

/// Fallback sales-side codes when the summary is unavailable or empty.
const FALLBACK_SALES_CODES: &[i32] = &[33, 34, 39, 41, 52, 56, 61];

/// How far back a full-history sync reaches when the taxpayer has no
/// recorded activity start date.
const DEFAULT_HISTORY_YEARS: i64 = 5;

/// Coordinator tuning, sourced from the environment.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Documents per flush to the DTE processor.
    pub batch_size: usize,
    /// Periods between progress-percentage writes.
    pub progress_interval_periods: usize,
    /// Backoff schedule for retriable portal calls.
    pub retry: RetrySchedule,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            progress_interval_periods: 10,
            retry: RetrySchedule::default(),
        }
    }
}

impl IngestConfig {
    /// Read `SYNC_BATCH_SIZE` and `SYNC_PROGRESS_INTERVAL_PERIODS`,
    /// falling back to the defaults (1000 and 10).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: std::env::var("SYNC_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),
            progress_interval_periods: std::env::var("SYNC_PROGRESS_INTERVAL_PERIODS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.progress_interval_periods),
            retry: defaults.retry,
        }
    }
}

/// Final outcome of one ingestion job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub counters: SyncCounters,
    pub periods_processed: usize,
    pub cancelled: bool,
    pub error_details: Vec<String>,
}

/// Drives one ingestion job against one portal session.
pub struct IngestionCoordinator<P, S> {
    session: P,
    store: S,
    config: IngestConfig,
}

impl<P, S> IngestionCoordinator<P, S>
where
    P: PortalSession,
    S: DocumentStore + ContactStore + SyncLogStore + CredentialStore + CompanyStore + Clone,
{
    /// Takes ownership of the session for the job's lifetime; nothing else
    /// may touch it while the job runs, and `run`/`sync_*` close it on
    /// every exit path.
    pub fn new(session: P, store: S, config: IngestConfig) -> Self {
        Self {
            session,
            store,
            config,
        }
    }

    /// Sync a specific date range (`YYYY-MM-DD` bounds, `from ≤ to ≤ today`).
    pub async fn sync_period(
        mut self,
        company: &CompanyRecord,
        from_date: NaiveDate,
        to_date: NaiveDate,
        sync_log: SyncLogId,
        task_id: Option<String>,
    ) -> Result<IngestOutcome, IngestError> {
        if from_date > to_date {
            return Err(IngestError::InvalidDateRange(format!(
                "{from_date} is after {to_date}"
            )));
        }
        if to_date > Utc::now().date_naive() {
            return Err(IngestError::InvalidDateRange(format!(
                "{to_date} is in the future"
            )));
        }

        let periods = TaxPeriod::enumerate(from_date, to_date);
        self.run(company, periods, sync_log, task_id).await
    }

    /// Sync everything from the taxpayer's activity start (or five years
    /// back when unknown) up to today.
    pub async fn sync_full_history(
        self,
        company: &CompanyRecord,
        sync_log: SyncLogId,
        task_id: Option<String>,
    ) -> Result<IngestOutcome, IngestError> {
        let today = Utc::now().date_naive();
        let from_date = match self
            .store
            .taxpayer_for_company(company.id)
            .await?
            .and_then(|t| t.activity_start_date)
        {
            Some(start) => start,
            None => {
                let fallback = today - chrono::Duration::days(365 * DEFAULT_HISTORY_YEARS);
                tracing::warn!(
                    company = %company.tax_id,
                    from = %fallback,
                    "no activity start date, bounding history at five years"
                );
                fallback
            }
        };

        let periods = TaxPeriod::enumerate(from_date, today);
        self.run(company, periods, sync_log, task_id).await
    }

    async fn run(
        mut self,
        company: &CompanyRecord,
        periods: Vec<TaxPeriod>,
        sync_log: SyncLogId,
        task_id: Option<String>,
    ) -> Result<IngestOutcome, IngestError> {
        let total_periods = periods.len();
        tracing::info!(
            company = %company.tax_id,
            periods = total_periods,
            "starting document sync"
        );
        self.store.mark_sync_running(sync_log).await?;

        match self.session.authenticate().await {
            Ok(true) => {}
            Ok(false) | Err(PortalError::Auth { .. }) => {
                // Authentication rejections are fatal to the job and feed
                // the credential failure counter.
                let failures = self
                    .store
                    .record_verification_failure(company.id)
                    .await
                    .unwrap_or_default();
                self.session.close().await;
                self.store
                    .finalize_sync_log(
                        sync_log,
                        SyncStatus::Failed,
                        Some("portal authentication failed".to_string()),
                        None,
                    )
                    .await?;
                tracing::error!(
                    company = %company.tax_id,
                    failures,
                    "document sync aborted: authentication failed"
                );
                return Err(IngestError::Portal(PortalError::Auth {
                    tax_id: company.tax_id.canonical(),
                }));
            }
            Err(e) => {
                self.session.close().await;
                self.store
                    .finalize_sync_log(sync_log, SyncStatus::Failed, Some(e.to_string()), None)
                    .await?;
                return Err(IngestError::Portal(e));
            }
        }

        let outcome = self
            .drive_periods(company, &periods, sync_log, task_id)
            .await;
        self.session.close().await;

        match outcome {
            Ok(outcome) => {
                let status = if outcome.cancelled {
                    SyncStatus::Cancelled
                } else {
                    SyncStatus::Completed
                };
                let sync_data = serde_json::json!({
                    "periods_processed": outcome.periods_processed,
                    "total_periods": total_periods,
                    "errors": outcome.error_details,
                });
                self.store.update_sync_counters(sync_log, outcome.counters).await?;
                self.store
                    .finalize_sync_log(sync_log, status, None, Some(sync_data))
                    .await?;
                tracing::info!(
                    company = %company.tax_id,
                    processed = outcome.counters.processed,
                    created = outcome.counters.created,
                    updated = outcome.counters.updated,
                    errors = outcome.counters.errors,
                    cancelled = outcome.cancelled,
                    "document sync finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.store
                    .finalize_sync_log(sync_log, SyncStatus::Failed, Some(e.to_string()), None)
                    .await?;
                Err(e)
            }
        }
    }

    async fn drive_periods(
        &mut self,
        company: &CompanyRecord,
        periods: &[TaxPeriod],
        sync_log: SyncLogId,
        task_id: Option<String>,
    ) -> Result<IngestOutcome, IngestError> {
        let processor = DteProcessor::new(self.store.clone(), company.clone());
        let mut outcome = IngestOutcome::default();
        let mut batch: Vec<TaggedDocument> = Vec::new();
        let total = periods.len().max(1);

        for (index, period) in periods.iter().enumerate() {
            if self.cancelled(sync_log).await? {
                outcome.cancelled = true;
                return Ok(outcome);
            }

            tracing::info!(
                period = %period,
                position = index + 1,
                total = periods.len(),
                "processing period"
            );

            self.collect_period(company, *period, task_id.as_deref(), &mut batch)
                .await;
            outcome.periods_processed += 1;

            if batch.len() >= self.config.batch_size {
                let flushed = std::mem::take(&mut batch);
                let batch_outcome = processor.process_batch(&flushed).await;
                outcome.counters.absorb(batch_outcome.counters);
                outcome.error_details.extend(batch_outcome.error_details);
                self.store
                    .update_sync_counters(sync_log, outcome.counters)
                    .await?;

                if self.cancelled(sync_log).await? {
                    outcome.cancelled = true;
                    return Ok(outcome);
                }
            }

            if (index + 1) % self.config.progress_interval_periods == 0 {
                let percentage = ((index + 1) * 100 / total) as i32;
                self.store
                    .update_sync_progress(sync_log, percentage)
                    .await?;
                tracing::debug!(percentage, "sync progress");
            }
        }

        // Flush whatever the last periods accumulated.
        if !batch.is_empty() {
            let batch_outcome = processor.process_batch(&batch).await;
            outcome.counters.absorb(batch_outcome.counters);
            outcome.error_details.extend(batch_outcome.error_details);
        }
        self.store
            .update_sync_counters(sync_log, outcome.counters)
            .await?;
        self.store.update_sync_progress(sync_log, 100).await?;
        Ok(outcome)
    }

    /// Fetch everything one period has: summary first (purchases, then
    /// sales), then the per-code listings in order. A failed summary falls
    /// back to the predefined code sets; a failed listing skips that code
    /// only.
    async fn collect_period(
        &mut self,
        company: &CompanyRecord,
        period: TaxPeriod,
        task_id: Option<&str>,
        batch: &mut Vec<TaggedDocument>,
    ) {
        let summary = self.summary_with_retry(period).await;

        let (purchase_codes, sales_codes) = match summary {
            Ok(summary) => {
                let purchases = summary.purchase_codes();
                let sales = summary.sales_codes();
                (
                    if purchases.is_empty() {
                        FALLBACK_PURCHASE_CODES.to_vec()
                    } else {
                        purchases
                    },
                    if sales.is_empty() {
                        FALLBACK_SALES_CODES.to_vec()
                    } else {
                        sales
                    },
                )
            }
            Err(e) => {
                tracing::warn!(
                    period = %period,
                    error = %e,
                    "summary unavailable, using fallback code sets"
                );
                (
                    FALLBACK_PURCHASE_CODES.to_vec(),
                    FALLBACK_SALES_CODES.to_vec(),
                )
            }
        };

        for code in purchase_codes {
            match self.listing_with_retry(period, code, OperationKind::Received).await {
                Ok(docs) => {
                    tracing::debug!(period = %period, code, count = docs.len(), "purchases fetched");
                    batch.extend(tag_documents(
                        docs,
                        OperationKind::Received,
                        company,
                        period,
                        task_id,
                    ));
                }
                Err(e) => {
                    tracing::warn!(period = %period, code, error = %e, "purchase fetch failed, skipping code");
                }
            }
        }

        for code in sales_codes {
            match self.listing_with_retry(period, code, OperationKind::Issued).await {
                Ok(docs) => {
                    tracing::debug!(period = %period, code, count = docs.len(), "sales fetched");
                    batch.extend(tag_documents(
                        docs,
                        OperationKind::Issued,
                        company,
                        period,
                        task_id,
                    ));
                }
                Err(e) => {
                    tracing::warn!(period = %period, code, error = %e, "sales fetch failed, skipping code");
                }
            }
        }
    }

    /// Fetch the period summary, backing off on transient failures. The
    /// session is exclusively owned, so retries run strictly in sequence.
    async fn summary_with_retry(
        &mut self,
        period: TaxPeriod,
    ) -> Result<tributo_portal::DocumentsSummary, PortalError> {
        let mut result = self.session.documents_summary(period).await;
        for delay in self.config.retry.delays().to_vec() {
            match &result {
                Err(e) if e.is_retriable() => {
                    tracing::warn!(
                        period = %period,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "summary fetch failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    result = self.session.documents_summary(period).await;
                }
                _ => break,
            }
        }
        result
    }

    /// Fetch one code's listing on one side, backing off on transient
    /// failures before the caller decides to skip the code.
    async fn listing_with_retry(
        &mut self,
        period: TaxPeriod,
        code: i32,
        side: OperationKind,
    ) -> Result<Vec<tributo_portal::RawDocument>, PortalError> {
        let mut result = match side {
            OperationKind::Received => self.session.purchase_documents(period, code).await,
            OperationKind::Issued => self.session.sales_documents(period, code).await,
        };
        for delay in self.config.retry.delays().to_vec() {
            match &result {
                Err(e) if e.is_retriable() => {
                    tracing::warn!(
                        period = %period,
                        code,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "listing fetch failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    result = match side {
                        OperationKind::Received => {
                            self.session.purchase_documents(period, code).await
                        }
                        OperationKind::Issued => self.session.sales_documents(period, code).await,
                    };
                }
                _ => break,
            }
        }
        result
    }

    async fn cancelled(&self, sync_log: SyncLogId) -> Result<bool, IngestError> {
        Ok(self.store.sync_log_status(sync_log).await? == SyncStatus::Cancelled)
    }
}

fn tag_documents(
    docs: Vec<tributo_portal::RawDocument>,
    operation: OperationKind,
    company: &CompanyRecord,
    period: TaxPeriod,
    task_id: Option<&str>,
) -> Vec<TaggedDocument> {
    docs.into_iter()
        .map(|document| TaggedDocument {
            operation,
            company_tax_id: company.tax_id.canonical(),
            period,
            task_id: task_id.map(str::to_string),
            document,
        })
        .collect()
}
