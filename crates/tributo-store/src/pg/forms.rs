//! Declared-form and form-template persistence.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use tributo_core::{CompanyId, FormCode, FormId, Rut};

use super::{enum_from_str, enum_to_str, json_from, json_into, rut_from_columns, LIST_MAX_ROWS};
use crate::error::StoreError;
use crate::records::{FormDetailValue, FormRecord, FormTemplateRecord};

#[derive(sqlx::FromRow)]
struct FormTemplateRow {
    form_code: String,
    name: String,
    version: String,
    is_active: bool,
    form_structure: Value,
    validation_rules: Value,
    calculation_rules: Value,
}

impl FormTemplateRow {
    fn into_record(self) -> Result<FormTemplateRecord, StoreError> {
        let form_code = FormCode::parse(&self.form_code).ok_or_else(|| {
            StoreError::decode("tax_form_template", format!("unknown code {}", self.form_code))
        })?;
        Ok(FormTemplateRecord {
            form_code,
            name: self.name,
            version: self.version,
            is_active: self.is_active,
            form_structure: self.form_structure,
            validation_rules: self.validation_rules,
            calculation_rules: self.calculation_rules,
        })
    }
}

pub async fn ensure_form_template(
    pool: &PgPool,
    record: &FormTemplateRecord,
) -> Result<FormTemplateRecord, StoreError> {
    sqlx::query(
        "INSERT INTO tax_form_templates (form_code, name, version, is_active,
         form_structure, validation_rules, calculation_rules)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (form_code) DO NOTHING",
    )
    .bind(record.form_code.as_str())
    .bind(&record.name)
    .bind(&record.version)
    .bind(record.is_active)
    .bind(&record.form_structure)
    .bind(&record.validation_rules)
    .bind(&record.calculation_rules)
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, FormTemplateRow>(
        "SELECT form_code, name, version, is_active, form_structure, validation_rules,
         calculation_rules FROM tax_form_templates WHERE form_code = $1",
    )
    .bind(record.form_code.as_str())
    .fetch_optional(pool)
    .await?;
    row.map(FormTemplateRow::into_record)
        .transpose()?
        .ok_or_else(|| StoreError::not_found("tax_form_template", record.form_code))
}

const FORM_COLUMNS: &str = "id, company_id, issuer_digits, issuer_dv, form_code, tax_year, \
     tax_month, tax_period, status, due_date, submission_date, form_data, total_tax_due, \
     total_paid, balance_due, sii_folio, sii_response, details_extracted, \
     details_extracted_at, details_extraction_method, details_data, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct FormRow {
    id: Uuid,
    company_id: Option<Uuid>,
    issuer_digits: i64,
    issuer_dv: String,
    form_code: String,
    tax_year: i32,
    tax_month: Option<i32>,
    tax_period: String,
    status: String,
    due_date: Option<NaiveDate>,
    submission_date: Option<DateTime<Utc>>,
    form_data: Value,
    total_tax_due: Option<Decimal>,
    total_paid: Decimal,
    balance_due: Option<Decimal>,
    sii_folio: String,
    sii_response: Value,
    details_extracted: bool,
    details_extracted_at: Option<DateTime<Utc>>,
    details_extraction_method: String,
    details_data: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FormRow {
    fn into_record(self) -> Result<FormRecord, StoreError> {
        let form_code = FormCode::parse(&self.form_code).ok_or_else(|| {
            StoreError::decode("tax_form", format!("unknown code {}", self.form_code))
        })?;
        Ok(FormRecord {
            id: FormId::from_uuid(self.id),
            company_id: self.company_id.map(CompanyId::from_uuid),
            issuer: rut_from_columns("tax_form", self.issuer_digits, &self.issuer_dv)?,
            form_code,
            tax_year: self.tax_year,
            tax_month: self.tax_month.map(|m| m as u32),
            tax_period: self.tax_period,
            status: enum_from_str("tax_form", &self.status)?,
            due_date: self.due_date,
            submission_date: self.submission_date,
            form_data: self.form_data,
            total_tax_due: self.total_tax_due,
            total_paid: self.total_paid,
            balance_due: self.balance_due,
            sii_folio: self.sii_folio,
            sii_response: self.sii_response,
            details_extracted: self.details_extracted,
            details_extracted_at: self.details_extracted_at,
            details_extraction_method: self.details_extraction_method,
            details_data: json_into("tax_form", self.details_data)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub async fn find_form(
    pool: &PgPool,
    company_id: CompanyId,
    form_code: FormCode,
    sii_folio: &str,
) -> Result<Option<FormRecord>, StoreError> {
    let row = sqlx::query_as::<_, FormRow>(&format!(
        "SELECT {FORM_COLUMNS} FROM tax_forms
         WHERE company_id = $1 AND form_code = $2 AND sii_folio = $3"
    ))
    .bind(company_id.as_uuid())
    .bind(form_code.as_str())
    .bind(sii_folio)
    .fetch_optional(pool)
    .await?;
    row.map(FormRow::into_record).transpose()
}

pub async fn find_form_by_issuer(
    pool: &PgPool,
    issuer: Rut,
    form_code: FormCode,
    sii_folio: &str,
) -> Result<Option<FormRecord>, StoreError> {
    let row = sqlx::query_as::<_, FormRow>(&format!(
        "SELECT {FORM_COLUMNS} FROM tax_forms
         WHERE issuer_digits = $1 AND issuer_dv = $2 AND form_code = $3 AND sii_folio = $4"
    ))
    .bind(issuer.digits() as i64)
    .bind(issuer.check_digit().to_string())
    .bind(form_code.as_str())
    .bind(sii_folio)
    .fetch_optional(pool)
    .await?;
    row.map(FormRow::into_record).transpose()
}

pub async fn form_by_id(pool: &PgPool, id: FormId) -> Result<Option<FormRecord>, StoreError> {
    let row = sqlx::query_as::<_, FormRow>(&format!(
        "SELECT {FORM_COLUMNS} FROM tax_forms WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(FormRow::into_record).transpose()
}

pub async fn insert_form(pool: &PgPool, record: &FormRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO tax_forms (id, company_id, issuer_digits, issuer_dv, form_code,
         tax_year, tax_month, tax_period, status, due_date, submission_date, form_data,
         total_tax_due, total_paid, balance_due, sii_folio, sii_response,
         details_extracted, details_extracted_at, details_extraction_method,
         details_data, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                 $17, $18, $19, $20, $21, $22, $23)",
    )
    .bind(record.id.as_uuid())
    .bind(record.company_id.map(|c| *c.as_uuid()))
    .bind(record.issuer.digits() as i64)
    .bind(record.issuer.check_digit().to_string())
    .bind(record.form_code.as_str())
    .bind(record.tax_year)
    .bind(record.tax_month.map(|m| m as i32))
    .bind(&record.tax_period)
    .bind(enum_to_str(&record.status))
    .bind(record.due_date)
    .bind(record.submission_date)
    .bind(&record.form_data)
    .bind(record.total_tax_due)
    .bind(record.total_paid)
    .bind(record.balance_due)
    .bind(&record.sii_folio)
    .bind(&record.sii_response)
    .bind(record.details_extracted)
    .bind(record.details_extracted_at)
    .bind(&record.details_extraction_method)
    .bind(json_from(&record.details_data))
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_form(pool: &PgPool, record: &FormRecord) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE tax_forms SET company_id = $2, tax_year = $3, tax_month = $4,
         tax_period = $5, status = $6, due_date = $7, submission_date = $8,
         form_data = $9, total_tax_due = $10, total_paid = $11, balance_due = $12,
         sii_response = $13, updated_at = $14
         WHERE id = $1",
    )
    .bind(record.id.as_uuid())
    .bind(record.company_id.map(|c| *c.as_uuid()))
    .bind(record.tax_year)
    .bind(record.tax_month.map(|m| m as i32))
    .bind(&record.tax_period)
    .bind(enum_to_str(&record.status))
    .bind(record.due_date)
    .bind(record.submission_date)
    .bind(&record.form_data)
    .bind(record.total_tax_due)
    .bind(record.total_paid)
    .bind(record.balance_due)
    .bind(&record.sii_response)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("tax_form", record.id));
    }
    Ok(())
}

pub async fn forms_needing_details(
    pool: &PgPool,
    company_id: Option<CompanyId>,
    limit: i64,
) -> Result<Vec<FormRecord>, StoreError> {
    let limit = limit.clamp(0, LIST_MAX_ROWS);
    let rows = match company_id {
        Some(company_id) => {
            sqlx::query_as::<_, FormRow>(&format!(
                "SELECT {FORM_COLUMNS} FROM tax_forms
                 WHERE details_extracted = FALSE AND sii_folio <> '' AND company_id = $1
                 ORDER BY tax_year DESC, tax_month DESC NULLS LAST LIMIT $2"
            ))
            .bind(company_id.as_uuid())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, FormRow>(&format!(
                "SELECT {FORM_COLUMNS} FROM tax_forms
                 WHERE details_extracted = FALSE AND sii_folio <> ''
                 ORDER BY tax_year DESC, tax_month DESC NULLS LAST LIMIT $1"
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    rows.into_iter().map(FormRow::into_record).collect()
}

pub async fn mark_details_extracted(
    pool: &PgPool,
    id: FormId,
    method: &str,
    details: &[FormDetailValue],
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE tax_forms SET details_extracted = TRUE, details_extracted_at = $2,
         details_extraction_method = $3, details_data = $4, updated_at = $2
         WHERE id = $1",
    )
    .bind(id.as_uuid())
    .bind(at)
    .bind(method)
    .bind(json_from(&details))
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("tax_form", id));
    }
    Ok(())
}
