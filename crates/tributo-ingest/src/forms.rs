//! Declared-form synchronisation.
//!
//! Per-year fetch of declared forms with the same idempotent upsert
//! pattern as documents: lookup prefers `(company, form code, portal
//! folio)` and falls back to the legacy issuer tuple. The form family's
//! template row is created lazily on first use. The historical variant
//! walks every year from the taxpayer's activity start and reports the
//! forms whose detail extraction should follow.

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use tributo_core::{FormCode, FormId, FormStatus};
use tributo_portal::{NumberOrText, PortalSession, RawForm};
use tributo_store::{CompanyRecord, CompanyStore, FormRecord, FormStore, FormTemplateRecord};

use crate::error::IngestError;

/// Counters for one year's form sync.
#[derive(Debug, Clone, Default)]
pub struct FormSyncStats {
    pub found: u64,
    pub created: u64,
    pub updated: u64,
    pub errors: u64,
    pub error_details: Vec<String>,
    /// Ids of rows touched this run, in portal order. Detail-extraction
    /// jobs are emitted for these.
    pub touched_form_ids: Vec<FormId>,
}

/// Aggregate of a full-history form sync.
#[derive(Debug, Clone, Default)]
pub struct HistoricalFormSync {
    pub first_year: i32,
    pub last_year: i32,
    pub totals: FormSyncStats,
    /// Per-year sub-results, keyed by year, carried into the sync log.
    pub results_by_year: Value,
}

/// Synchronises declared forms for one company over one portal session.
pub struct FormSyncService<P, S> {
    session: P,
    store: S,
    did_authenticate: bool,
}

impl<P, S> FormSyncService<P, S>
where
    P: PortalSession,
    S: FormStore + CompanyStore + Clone,
{
    pub fn new(session: P, store: S) -> Self {
        Self {
            session,
            store,
            did_authenticate: false,
        }
    }

    /// Authenticate, fetch and upsert one year's declarations, optionally
    /// narrowed to a month or a single folio. Closes the session.
    pub async fn sync_forms(
        mut self,
        company: &CompanyRecord,
        year: i32,
        month: Option<u32>,
        folio: Option<&str>,
        form_code: FormCode,
    ) -> Result<FormSyncStats, IngestError> {
        let outcome = self
            .sync_year(company, year, month, folio, form_code)
            .await;
        self.session.close().await;
        outcome
    }

    /// Walk every year from the taxpayer's activity start (or five years
    /// back) to today. Closes the session at the end.
    pub async fn sync_all_historical_forms(
        mut self,
        company: &CompanyRecord,
        form_code: FormCode,
    ) -> Result<HistoricalFormSync, IngestError> {
        let today = Utc::now().date_naive();
        let first_year = match self
            .store
            .taxpayer_for_company(company.id)
            .await?
            .and_then(|t| t.activity_start_date)
        {
            Some(start) => start.year(),
            None => today.year() - 5,
        };
        let last_year = today.year();

        let mut aggregate = HistoricalFormSync {
            first_year,
            last_year,
            ..HistoricalFormSync::default()
        };
        let mut by_year = serde_json::Map::new();

        for year in first_year..=last_year {
            match self.sync_year(company, year, None, None, form_code).await {
                Ok(stats) => {
                    by_year.insert(
                        year.to_string(),
                        json!({
                            "found": stats.found,
                            "created": stats.created,
                            "updated": stats.updated,
                            "errors": stats.errors,
                            "status": "completed",
                        }),
                    );
                    aggregate.totals.found += stats.found;
                    aggregate.totals.created += stats.created;
                    aggregate.totals.updated += stats.updated;
                    aggregate.totals.errors += stats.errors;
                    aggregate
                        .totals
                        .error_details
                        .extend(stats.error_details);
                    aggregate.totals.touched_form_ids.extend(stats.touched_form_ids);
                }
                Err(e) => {
                    tracing::error!(year, error = %e, "form sync failed for year");
                    aggregate.totals.errors += 1;
                    by_year.insert(
                        year.to_string(),
                        json!({"status": "failed", "error": e.to_string()}),
                    );
                }
            }
        }

        self.session.close().await;
        aggregate.results_by_year = Value::Object(by_year);
        tracing::info!(
            company = %company.tax_id,
            first_year,
            last_year,
            found = aggregate.totals.found,
            created = aggregate.totals.created,
            updated = aggregate.totals.updated,
            detail_candidates = aggregate.totals.touched_form_ids.len(),
            "historical form sync finished"
        );
        Ok(aggregate)
    }

    async fn sync_year(
        &mut self,
        company: &CompanyRecord,
        year: i32,
        month: Option<u32>,
        folio: Option<&str>,
        form_code: FormCode,
    ) -> Result<FormSyncStats, IngestError> {
        if !self.did_authenticate {
            match self.session.authenticate().await {
                Ok(true) => self.did_authenticate = true,
                Ok(false) => {
                    return Err(IngestError::Portal(tributo_portal::PortalError::Auth {
                        tax_id: company.tax_id.canonical(),
                    }))
                }
                Err(e) => return Err(IngestError::Portal(e)),
            }
        }

        let rows = self.session.forms_search(year, month, folio).await?;
        tracing::info!(
            company = %company.tax_id,
            year,
            form = %form_code,
            found = rows.len(),
            "forms fetched"
        );

        let template = self
            .store
            .ensure_form_template(&default_template(form_code))
            .await?;

        let mut stats = FormSyncStats {
            found: rows.len() as u64,
            ..FormSyncStats::default()
        };
        for row in rows {
            match self
                .upsert_form(company, &template, &row)
                .await
            {
                Ok((id, created)) => {
                    if created {
                        stats.created += 1;
                    } else {
                        stats.updated += 1;
                    }
                    stats.touched_form_ids.push(id);
                }
                Err(e) => {
                    stats.errors += 1;
                    let detail = format!("form {}: {e}", row.folio);
                    tracing::warn!(year, folio = %row.folio, error = %e, "form upsert failed");
                    stats.error_details.push(detail);
                }
            }
        }
        Ok(stats)
    }

    async fn upsert_form(
        &self,
        company: &CompanyRecord,
        template: &FormTemplateRecord,
        row: &RawForm,
    ) -> Result<(FormId, bool), IngestError> {
        let converted = convert_row(company, template.form_code, row)?;

        // Prefer the company key; fall back to the legacy issuer tuple.
        let existing = match self
            .store
            .find_form(company.id, template.form_code, &row.folio)
            .await?
        {
            Some(form) => Some(form),
            None => {
                self.store
                    .find_form_by_issuer(company.tax_id, template.form_code, &row.folio)
                    .await?
            }
        };

        match existing {
            Some(mut form) => {
                form.company_id = Some(company.id);
                form.tax_year = converted.tax_year;
                form.tax_month = converted.tax_month;
                form.tax_period = converted.tax_period.clone();
                form.status = converted.status;
                form.submission_date = converted.submission_date;
                form.form_data = converted.form_data.clone();
                form.total_tax_due = converted.total_tax_due;
                form.balance_due = converted.balance_due;
                form.sii_response = converted.sii_response.clone();
                form.updated_at = Utc::now();
                self.store.update_form(&form).await?;
                Ok((form.id, false))
            }
            None => {
                let form = FormRecord {
                    id: FormId::new(),
                    company_id: Some(company.id),
                    issuer: company.tax_id,
                    form_code: template.form_code,
                    tax_year: converted.tax_year,
                    tax_month: converted.tax_month,
                    tax_period: converted.tax_period.clone(),
                    status: converted.status,
                    due_date: None,
                    submission_date: converted.submission_date,
                    form_data: converted.form_data.clone(),
                    total_tax_due: converted.total_tax_due,
                    total_paid: Decimal::ZERO,
                    balance_due: converted.balance_due,
                    sii_folio: row.folio.clone(),
                    sii_response: converted.sii_response.clone(),
                    details_extracted: false,
                    details_extracted_at: None,
                    details_extraction_method: String::new(),
                    details_data: Vec::new(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                };
                self.store.insert_form(&form).await?;
                Ok((form.id, true))
            }
        }
    }
}

/// Converted fields shared between create and update.
struct ConvertedForm {
    tax_year: i32,
    tax_month: Option<u32>,
    tax_period: String,
    status: FormStatus,
    submission_date: Option<DateTime<Utc>>,
    form_data: Value,
    total_tax_due: Option<Decimal>,
    balance_due: Option<Decimal>,
    sii_response: Value,
}

/// Apply the row conversion rules: period `"YYYY-MM"` split for
/// year/month, status from the portal's label plus submission date, and
/// the declared amount mirrored into the balance (the source carries no
/// payment data).
fn convert_row(
    _company: &CompanyRecord,
    form_code: FormCode,
    row: &RawForm,
) -> Result<ConvertedForm, IngestError> {
    let (tax_year, tax_month) = split_period(&row.period);
    let tax_period = match tax_month {
        Some(month) => format!("{tax_year:04}-{month:02}"),
        None => tax_year.to_string(),
    };

    let submission_date = row
        .submission_date
        .as_deref()
        .and_then(parse_submission_date);

    let status = if row.status.to_lowercase().contains("vigente") && submission_date.is_some() {
        FormStatus::Submitted
    } else if submission_date.is_some() {
        FormStatus::Accepted
    } else {
        FormStatus::Draft
    };

    let total_tax_due = row.amount.as_ref().and_then(amount_to_decimal);

    Ok(ConvertedForm {
        tax_year,
        tax_month,
        tax_period,
        status,
        submission_date,
        form_data: serde_json::to_value(row).unwrap_or(Value::Null),
        total_tax_due,
        // No payment data in the source: everything declared is owed.
        balance_due: total_tax_due,
        sii_response: json!({
            "extracted_at": Utc::now().to_rfc3339(),
            "source": "forms_search",
            "form": form_code.as_str(),
            "original_data": serde_json::to_value(row).unwrap_or(Value::Null),
        }),
    })
}

fn split_period(period: &str) -> (i32, Option<u32>) {
    if let Some((year_part, month_part)) = period.split_once('-') {
        if let (Ok(year), Ok(month)) = (year_part.parse(), month_part.parse()) {
            return (year, Some(month));
        }
    }
    if let Ok(year) = period.trim().parse() {
        return (year, None);
    }
    (Utc::now().date_naive().year(), None)
}

/// The portal renders submission dates as `DD/MM/YYYY`.
fn parse_submission_date(rendered: &str) -> Option<DateTime<Utc>> {
    let date = chrono::NaiveDate::parse_from_str(rendered.trim(), "%d/%m/%Y").ok()?;
    let naive = NaiveDateTime::new(date, NaiveTime::MIN);
    Some(Utc.from_utc_datetime(&naive))
}

fn amount_to_decimal(amount: &NumberOrText) -> Option<Decimal> {
    match amount {
        NumberOrText::Int(n) => Some(Decimal::from(*n)),
        NumberOrText::Float(f) => Decimal::try_from(*f).ok(),
        NumberOrText::Text(s) => tributo_core::parse::parse_chilean_number(s).ok().flatten(),
    }
}

fn default_template(form_code: FormCode) -> FormTemplateRecord {
    FormTemplateRecord {
        form_code,
        name: form_code.display_name().to_string(),
        version: "1.0".to_string(),
        is_active: true,
        form_structure: default_structure(form_code),
        validation_rules: json!({}),
        calculation_rules: json!({}),
    }
}

/// Type-specific default structure used when a form family's template is
/// created lazily.
fn default_structure(form_code: FormCode) -> Value {
    match form_code {
        FormCode::F29 => json!({
            "sections": [
                {"name": "datos_generales", "fields": ["periodo", "rut", "razon_social"]},
                {"name": "iva", "fields": ["iva_debito", "iva_credito", "impuesto_total"]},
                {"name": "pagos", "fields": ["total_pagado", "saldo_favor", "saldo_diferencia"]}
            ]
        }),
        _ => json!({"sections": []}),
    }
}
