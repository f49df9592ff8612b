//! Contact registry persistence. Unique per `(company, tax_id)`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use tributo_core::{CompanyId, ContactId, Rut};

use crate::error::StoreError;
use crate::records::ContactRecord;

const CONTACT_COLUMNS: &str = "id, company_id, tax_id, name, email, phone, address, category, \
     is_client, is_provider, is_active, notes, created_at";

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: Uuid,
    company_id: Uuid,
    tax_id: String,
    name: String,
    email: String,
    phone: String,
    address: String,
    category: String,
    is_client: bool,
    is_provider: bool,
    is_active: bool,
    notes: String,
    created_at: DateTime<Utc>,
}

impl ContactRow {
    fn into_record(self) -> Result<ContactRecord, StoreError> {
        Ok(ContactRecord {
            id: ContactId::from_uuid(self.id),
            company_id: CompanyId::from_uuid(self.company_id),
            tax_id: Rut::parse(&self.tax_id).map_err(|e| StoreError::decode("contact", e))?,
            name: self.name,
            email: self.email,
            phone: self.phone,
            address: self.address,
            category: self.category,
            is_client: self.is_client,
            is_provider: self.is_provider,
            is_active: self.is_active,
            notes: self.notes,
            created_at: self.created_at,
        })
    }
}

pub async fn contact_for(
    pool: &PgPool,
    company_id: CompanyId,
    tax_id: Rut,
) -> Result<Option<ContactRecord>, StoreError> {
    let row = sqlx::query_as::<_, ContactRow>(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE company_id = $1 AND tax_id = $2"
    ))
    .bind(company_id.as_uuid())
    .bind(tax_id.canonical())
    .fetch_optional(pool)
    .await?;
    row.map(ContactRow::into_record).transpose()
}

pub async fn insert_contact(pool: &PgPool, record: &ContactRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO contacts (id, company_id, tax_id, name, email, phone, address,
         category, is_client, is_provider, is_active, notes, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(record.id.as_uuid())
    .bind(record.company_id.as_uuid())
    .bind(record.tax_id.canonical())
    .bind(&record.name)
    .bind(&record.email)
    .bind(&record.phone)
    .bind(&record.address)
    .bind(&record.category)
    .bind(record.is_client)
    .bind(record.is_provider)
    .bind(record.is_active)
    .bind(&record.notes)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_contact(pool: &PgPool, record: &ContactRecord) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE contacts SET name = $3, email = $4, phone = $5, address = $6,
         category = $7, is_client = $8, is_provider = $9, is_active = $10, notes = $11
         WHERE company_id = $1 AND tax_id = $2",
    )
    .bind(record.company_id.as_uuid())
    .bind(record.tax_id.canonical())
    .bind(&record.name)
    .bind(&record.email)
    .bind(&record.phone)
    .bind(&record.address)
    .bind(&record.category)
    .bind(record.is_client)
    .bind(record.is_provider)
    .bind(record.is_active)
    .bind(&record.notes)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("contact", record.tax_id));
    }
    Ok(())
}

pub async fn list_contacts(
    pool: &PgPool,
    company_id: CompanyId,
) -> Result<Vec<ContactRecord>, StoreError> {
    let rows = sqlx::query_as::<_, ContactRow>(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE company_id = $1
         ORDER BY tax_id LIMIT $2"
    ))
    .bind(company_id.as_uuid())
    .bind(super::LIST_MAX_ROWS)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(ContactRow::into_record).collect()
}
