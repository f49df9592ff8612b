//! Company and taxpayer persistence.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use tributo_core::{CompanyId, Rut, SegmentId};

use super::{json_from, json_into};
use crate::error::StoreError;
use crate::records::{CompanyRecord, TaxpayerRecord};

const COMPANY_COLUMNS: &str = "id, tax_id, business_name, display_name, email, mobile_phone, \
     is_active, is_electronic_biller, currency, notification_preferences, created_at";

#[derive(sqlx::FromRow)]
struct CompanyRow {
    id: Uuid,
    tax_id: String,
    business_name: String,
    display_name: String,
    email: String,
    mobile_phone: String,
    is_active: bool,
    is_electronic_biller: bool,
    currency: String,
    notification_preferences: Value,
    created_at: DateTime<Utc>,
}

impl CompanyRow {
    fn into_record(self) -> Result<CompanyRecord, StoreError> {
        Ok(CompanyRecord {
            id: CompanyId::from_uuid(self.id),
            tax_id: Rut::parse(&self.tax_id).map_err(|e| StoreError::decode("company", e))?,
            business_name: self.business_name,
            display_name: self.display_name,
            email: self.email,
            mobile_phone: self.mobile_phone,
            is_active: self.is_active,
            is_electronic_biller: self.is_electronic_biller,
            currency: self.currency,
            notification_preferences: self.notification_preferences,
            created_at: self.created_at,
        })
    }
}

pub async fn company_by_id(
    pool: &PgPool,
    id: CompanyId,
) -> Result<Option<CompanyRecord>, StoreError> {
    let row = sqlx::query_as::<_, CompanyRow>(&format!(
        "SELECT {COMPANY_COLUMNS} FROM companies WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(CompanyRow::into_record).transpose()
}

pub async fn company_by_tax_id(
    pool: &PgPool,
    tax_id: Rut,
) -> Result<Option<CompanyRecord>, StoreError> {
    let row = sqlx::query_as::<_, CompanyRow>(&format!(
        "SELECT {COMPANY_COLUMNS} FROM companies WHERE tax_id = $1"
    ))
    .bind(tax_id.canonical())
    .fetch_optional(pool)
    .await?;
    row.map(CompanyRow::into_record).transpose()
}

pub async fn list_companies(pool: &PgPool) -> Result<Vec<CompanyRecord>, StoreError> {
    let rows = sqlx::query_as::<_, CompanyRow>(&format!(
        "SELECT {COMPANY_COLUMNS} FROM companies ORDER BY created_at LIMIT $1"
    ))
    .bind(super::LIST_MAX_ROWS)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(CompanyRow::into_record).collect()
}

pub async fn insert_company(pool: &PgPool, record: &CompanyRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO companies (id, tax_id, business_name, display_name, email,
         mobile_phone, is_active, is_electronic_biller, currency,
         notification_preferences, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(record.id.as_uuid())
    .bind(record.tax_id.canonical())
    .bind(&record.business_name)
    .bind(&record.display_name)
    .bind(&record.email)
    .bind(&record.mobile_phone)
    .bind(record.is_active)
    .bind(record.is_electronic_biller)
    .bind(&record.currency)
    .bind(&record.notification_preferences)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct TaxpayerRow {
    company_id: Uuid,
    tax_id: String,
    razon_social: String,
    sii_raw_data: Option<Value>,
    data_source: String,
    last_sii_sync: Option<DateTime<Utc>>,
    is_verified: bool,
    is_active: bool,
    activity_start_date: Option<NaiveDate>,
    settings: Value,
    segment_id: Option<Uuid>,
}

impl TaxpayerRow {
    fn into_record(self) -> Result<TaxpayerRecord, StoreError> {
        Ok(TaxpayerRecord {
            company_id: CompanyId::from_uuid(self.company_id),
            tax_id: Rut::parse(&self.tax_id).map_err(|e| StoreError::decode("taxpayer", e))?,
            razon_social: self.razon_social,
            sii_raw_data: self.sii_raw_data,
            data_source: self.data_source,
            last_sii_sync: self.last_sii_sync,
            is_verified: self.is_verified,
            is_active: self.is_active,
            activity_start_date: self.activity_start_date,
            settings: json_into("taxpayer", self.settings)?,
            segment_id: self.segment_id.map(SegmentId::from_uuid),
        })
    }
}

pub async fn taxpayer_for_company(
    pool: &PgPool,
    company_id: CompanyId,
) -> Result<Option<TaxpayerRecord>, StoreError> {
    let row = sqlx::query_as::<_, TaxpayerRow>(
        "SELECT company_id, tax_id, razon_social, sii_raw_data, data_source,
         last_sii_sync, is_verified, is_active, activity_start_date, settings, segment_id
         FROM taxpayers WHERE company_id = $1",
    )
    .bind(company_id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(TaxpayerRow::into_record).transpose()
}

pub async fn upsert_taxpayer(pool: &PgPool, record: &TaxpayerRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO taxpayers (company_id, tax_id, razon_social, sii_raw_data,
         data_source, last_sii_sync, is_verified, is_active, activity_start_date,
         settings, segment_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (company_id) DO UPDATE SET
           tax_id = EXCLUDED.tax_id,
           razon_social = EXCLUDED.razon_social,
           sii_raw_data = EXCLUDED.sii_raw_data,
           data_source = EXCLUDED.data_source,
           last_sii_sync = EXCLUDED.last_sii_sync,
           is_verified = EXCLUDED.is_verified,
           is_active = EXCLUDED.is_active,
           activity_start_date = EXCLUDED.activity_start_date,
           settings = EXCLUDED.settings,
           segment_id = EXCLUDED.segment_id",
    )
    .bind(record.company_id.as_uuid())
    .bind(record.tax_id.canonical())
    .bind(&record.razon_social)
    .bind(&record.sii_raw_data)
    .bind(&record.data_source)
    .bind(record.last_sii_sync)
    .bind(record.is_verified)
    .bind(record.is_active)
    .bind(record.activity_start_date)
    .bind(json_from(&record.settings))
    .bind(record.segment_id.map(|s| *s.as_uuid()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_taxpayer_segment(
    pool: &PgPool,
    company_id: CompanyId,
    segment_id: Option<SegmentId>,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE taxpayers SET segment_id = $2 WHERE company_id = $1")
        .bind(company_id.as_uuid())
        .bind(segment_id.map(|s| *s.as_uuid()))
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("taxpayer", company_id));
    }
    Ok(())
}
