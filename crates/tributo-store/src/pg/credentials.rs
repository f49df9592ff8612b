//! Encrypted credential persistence.
//!
//! The failure counter is a read-modify-write site: both mutation paths
//! take a row lock so concurrent verification jobs cannot lose updates.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use tributo_core::{CompanyId, Rut};

use crate::error::StoreError;
use crate::records::CredentialRecord;

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    company_id: Uuid,
    user_email: String,
    tax_id: String,
    encrypted_password: String,
    is_active: bool,
    last_verified: Option<DateTime<Utc>>,
    verification_failures: i32,
    created_at: DateTime<Utc>,
}

impl CredentialRow {
    fn into_record(self) -> Result<CredentialRecord, StoreError> {
        Ok(CredentialRecord {
            id: self.id,
            company_id: CompanyId::from_uuid(self.company_id),
            user_email: self.user_email,
            tax_id: Rut::parse(&self.tax_id).map_err(|e| StoreError::decode("credentials", e))?,
            encrypted_password: self.encrypted_password,
            is_active: self.is_active,
            last_verified: self.last_verified,
            verification_failures: self.verification_failures,
            created_at: self.created_at,
        })
    }
}

pub async fn credentials_for_company(
    pool: &PgPool,
    company_id: CompanyId,
) -> Result<Option<CredentialRecord>, StoreError> {
    let row = sqlx::query_as::<_, CredentialRow>(
        "SELECT id, company_id, user_email, tax_id, encrypted_password, is_active,
         last_verified, verification_failures, created_at
         FROM taxpayer_sii_credentials WHERE company_id = $1
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(company_id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(CredentialRow::into_record).transpose()
}

pub async fn upsert_credentials(
    pool: &PgPool,
    record: &CredentialRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO taxpayer_sii_credentials (id, company_id, user_email, tax_id,
         encrypted_password, is_active, last_verified, verification_failures, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (company_id, user_email) DO UPDATE SET
           tax_id = EXCLUDED.tax_id,
           encrypted_password = EXCLUDED.encrypted_password,
           is_active = EXCLUDED.is_active,
           last_verified = EXCLUDED.last_verified,
           verification_failures = EXCLUDED.verification_failures",
    )
    .bind(record.id)
    .bind(record.company_id.as_uuid())
    .bind(&record.user_email)
    .bind(record.tax_id.canonical())
    .bind(&record.encrypted_password)
    .bind(record.is_active)
    .bind(record.last_verified)
    .bind(record.verification_failures)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_verification_success(
    pool: &PgPool,
    company_id: CompanyId,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    let locked: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM taxpayer_sii_credentials WHERE company_id = $1 FOR UPDATE",
    )
    .bind(company_id.as_uuid())
    .fetch_optional(&mut *tx)
    .await?;
    let Some((id,)) = locked else {
        return Err(StoreError::not_found("credentials", company_id));
    };
    sqlx::query(
        "UPDATE taxpayer_sii_credentials
         SET last_verified = $2, verification_failures = 0 WHERE id = $1",
    )
    .bind(id)
    .bind(at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn record_verification_failure(
    pool: &PgPool,
    company_id: CompanyId,
) -> Result<i32, StoreError> {
    let mut tx = pool.begin().await?;
    let locked: Option<(Uuid, i32)> = sqlx::query_as(
        "SELECT id, verification_failures FROM taxpayer_sii_credentials
         WHERE company_id = $1 FOR UPDATE",
    )
    .bind(company_id.as_uuid())
    .fetch_optional(&mut *tx)
    .await?;
    let Some((id, failures)) = locked else {
        return Err(StoreError::not_found("credentials", company_id));
    };
    let updated = failures + 1;
    sqlx::query("UPDATE taxpayer_sii_credentials SET verification_failures = $2 WHERE id = $1")
        .bind(id)
        .bind(updated)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(updated)
}
