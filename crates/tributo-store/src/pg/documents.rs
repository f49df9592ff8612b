//! Document and document-type persistence.
//!
//! The unique key `(issuer_digits, issuer_dv, type_code, folio)` backs the
//! ingestion upsert; the type catalogue is get-or-create and never deleted
//! once referenced.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use tributo_core::{CompanyId, DocumentId};

use super::{enum_from_str, enum_to_str, rut_from_columns, LIST_MAX_ROWS};
use crate::error::StoreError;
use crate::records::{DocumentKey, DocumentRecord, DocumentTypeRecord};

const DOCUMENT_COLUMNS: &str = "id, company_id, issuer_digits, issuer_dv, issuer_name, \
     issuer_address, issuer_activity, recipient_digits, recipient_dv, recipient_name, \
     recipient_address, type_code, folio, issue_date, status, net_amount, tax_amount, \
     exempt_amount, total_amount, sii_track_id, raw_data, reference_folio, \
     reference_type_code, reference_document, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    company_id: Option<Uuid>,
    issuer_digits: i64,
    issuer_dv: String,
    issuer_name: String,
    issuer_address: String,
    issuer_activity: String,
    recipient_digits: i64,
    recipient_dv: String,
    recipient_name: String,
    recipient_address: String,
    type_code: i32,
    folio: i64,
    issue_date: NaiveDate,
    status: String,
    net_amount: Decimal,
    tax_amount: Decimal,
    exempt_amount: Decimal,
    total_amount: Decimal,
    sii_track_id: String,
    raw_data: Value,
    reference_folio: Option<i64>,
    reference_type_code: Option<i32>,
    reference_document: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_record(self) -> Result<DocumentRecord, StoreError> {
        Ok(DocumentRecord {
            id: DocumentId::from_uuid(self.id),
            company_id: self.company_id.map(CompanyId::from_uuid),
            issuer: rut_from_columns("document", self.issuer_digits, &self.issuer_dv)?,
            issuer_name: self.issuer_name,
            issuer_address: self.issuer_address,
            issuer_activity: self.issuer_activity,
            recipient: rut_from_columns("document", self.recipient_digits, &self.recipient_dv)?,
            recipient_name: self.recipient_name,
            recipient_address: self.recipient_address,
            type_code: self.type_code,
            folio: self.folio,
            issue_date: self.issue_date,
            status: enum_from_str("document", &self.status)?,
            net_amount: self.net_amount,
            tax_amount: self.tax_amount,
            exempt_amount: self.exempt_amount,
            total_amount: self.total_amount,
            sii_track_id: self.sii_track_id,
            raw_data: self.raw_data,
            reference_folio: self.reference_folio,
            reference_type_code: self.reference_type_code,
            reference_document: self.reference_document.map(DocumentId::from_uuid),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub async fn find_document(
    pool: &PgPool,
    key: &DocumentKey,
) -> Result<Option<DocumentRecord>, StoreError> {
    let row = sqlx::query_as::<_, DocumentRow>(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents
         WHERE issuer_digits = $1 AND issuer_dv = $2 AND type_code = $3 AND folio = $4"
    ))
    .bind(key.issuer.digits() as i64)
    .bind(key.issuer.check_digit().to_string())
    .bind(key.type_code)
    .bind(key.folio)
    .fetch_optional(pool)
    .await?;
    row.map(DocumentRow::into_record).transpose()
}

pub async fn insert_document(pool: &PgPool, record: &DocumentRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO documents (id, company_id, issuer_digits, issuer_dv, issuer_name,
         issuer_address, issuer_activity, recipient_digits, recipient_dv, recipient_name,
         recipient_address, type_code, folio, issue_date, status, net_amount, tax_amount,
         exempt_amount, total_amount, sii_track_id, raw_data, reference_folio,
         reference_type_code, reference_document, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                 $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)",
    )
    .bind(record.id.as_uuid())
    .bind(record.company_id.map(|c| *c.as_uuid()))
    .bind(record.issuer.digits() as i64)
    .bind(record.issuer.check_digit().to_string())
    .bind(&record.issuer_name)
    .bind(&record.issuer_address)
    .bind(&record.issuer_activity)
    .bind(record.recipient.digits() as i64)
    .bind(record.recipient.check_digit().to_string())
    .bind(&record.recipient_name)
    .bind(&record.recipient_address)
    .bind(record.type_code)
    .bind(record.folio)
    .bind(record.issue_date)
    .bind(enum_to_str(&record.status))
    .bind(record.net_amount)
    .bind(record.tax_amount)
    .bind(record.exempt_amount)
    .bind(record.total_amount)
    .bind(&record.sii_track_id)
    .bind(&record.raw_data)
    .bind(record.reference_folio)
    .bind(record.reference_type_code)
    .bind(record.reference_document.map(|d| *d.as_uuid()))
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_document(pool: &PgPool, record: &DocumentRecord) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE documents SET company_id = $2, issuer_name = $3, issuer_address = $4,
         issuer_activity = $5, recipient_digits = $6, recipient_dv = $7,
         recipient_name = $8, recipient_address = $9, issue_date = $10, status = $11,
         net_amount = $12, tax_amount = $13, exempt_amount = $14, total_amount = $15,
         sii_track_id = $16, raw_data = $17, reference_folio = $18,
         reference_type_code = $19, updated_at = $20
         WHERE id = $1",
    )
    .bind(record.id.as_uuid())
    .bind(record.company_id.map(|c| *c.as_uuid()))
    .bind(&record.issuer_name)
    .bind(&record.issuer_address)
    .bind(&record.issuer_activity)
    .bind(record.recipient.digits() as i64)
    .bind(record.recipient.check_digit().to_string())
    .bind(&record.recipient_name)
    .bind(&record.recipient_address)
    .bind(record.issue_date)
    .bind(enum_to_str(&record.status))
    .bind(record.net_amount)
    .bind(record.tax_amount)
    .bind(record.exempt_amount)
    .bind(record.total_amount)
    .bind(&record.sii_track_id)
    .bind(&record.raw_data)
    .bind(record.reference_folio)
    .bind(record.reference_type_code)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("document", record.id));
    }
    Ok(())
}

pub async fn list_documents_for_company(
    pool: &PgPool,
    company_id: CompanyId,
    limit: i64,
) -> Result<Vec<DocumentRecord>, StoreError> {
    let rows = sqlx::query_as::<_, DocumentRow>(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE company_id = $1
         ORDER BY issue_date DESC, folio DESC LIMIT $2"
    ))
    .bind(company_id.as_uuid())
    .bind(limit.clamp(0, LIST_MAX_ROWS))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(DocumentRow::into_record).collect()
}

pub async fn documents_with_unresolved_references(
    pool: &PgPool,
    company_id: Option<CompanyId>,
    limit: i64,
) -> Result<Vec<DocumentRecord>, StoreError> {
    let limit = limit.clamp(0, LIST_MAX_ROWS);
    let rows = match company_id {
        Some(company_id) => {
            sqlx::query_as::<_, DocumentRow>(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE reference_folio IS NOT NULL AND reference_document IS NULL
                   AND company_id = $1
                 ORDER BY created_at LIMIT $2"
            ))
            .bind(company_id.as_uuid())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, DocumentRow>(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE reference_folio IS NOT NULL AND reference_document IS NULL
                 ORDER BY created_at LIMIT $1"
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    rows.into_iter().map(DocumentRow::into_record).collect()
}

pub async fn set_reference_document(
    pool: &PgPool,
    id: DocumentId,
    referenced: DocumentId,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE documents SET reference_document = $2 WHERE id = $1")
        .bind(id.as_uuid())
        .bind(referenced.as_uuid())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("document", id));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct DocumentTypeRow {
    code: i32,
    name: String,
    category: String,
    is_dte: bool,
    requires_recipient: bool,
    is_active: bool,
}

impl DocumentTypeRow {
    fn into_record(self) -> Result<DocumentTypeRecord, StoreError> {
        Ok(DocumentTypeRecord {
            code: self.code,
            name: self.name,
            category: enum_from_str("document_type", &self.category)?,
            is_dte: self.is_dte,
            requires_recipient: self.requires_recipient,
            is_active: self.is_active,
        })
    }
}

pub async fn document_type(
    pool: &PgPool,
    code: i32,
) -> Result<Option<DocumentTypeRecord>, StoreError> {
    let row = sqlx::query_as::<_, DocumentTypeRow>(
        "SELECT code, name, category, is_dte, requires_recipient, is_active
         FROM document_types WHERE code = $1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    row.map(DocumentTypeRow::into_record).transpose()
}

pub async fn ensure_document_type(
    pool: &PgPool,
    record: &DocumentTypeRecord,
) -> Result<DocumentTypeRecord, StoreError> {
    // Insert-if-absent, then read back whichever row won. The catalogue is
    // shared and rows are never deleted once referenced.
    sqlx::query(
        "INSERT INTO document_types (code, name, category, is_dte, requires_recipient, is_active)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (code) DO NOTHING",
    )
    .bind(record.code)
    .bind(&record.name)
    .bind(enum_to_str(&record.category))
    .bind(record.is_dte)
    .bind(record.requires_recipient)
    .bind(record.is_active)
    .execute(pool)
    .await?;

    document_type(pool, record.code)
        .await?
        .ok_or_else(|| StoreError::not_found("document_type", record.code))
}
