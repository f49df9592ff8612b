//! Taxpayer profile synchronisation.
//!
//! Mirrors the portal's identity blob onto the company's taxpayer record:
//! business name, the opaque raw payload, the verification stamp and the
//! activity start date that bounds full-history syncs.

use chrono::Utc;

use tributo_portal::TaxpayerProfile;
use tributo_store::{CompanyRecord, CompanyStore, TaxpayerRecord};

use crate::error::IngestError;

/// Apply a freshly fetched profile to the taxpayer record, creating it on
/// first sync. Returns the stored record.
pub async fn sync_taxpayer_profile<S: CompanyStore>(
    store: &S,
    company: &CompanyRecord,
    profile: &TaxpayerProfile,
) -> Result<TaxpayerRecord, IngestError> {
    let mut taxpayer = store
        .taxpayer_for_company(company.id)
        .await?
        .unwrap_or_else(|| TaxpayerRecord::new(company.id, company.tax_id));

    taxpayer.apply_profile(&profile.razon_social, profile.raw.clone(), Utc::now());
    if let Some(start) = profile.activity_start_date {
        taxpayer.activity_start_date = Some(start);
    }

    store.upsert_taxpayer(&taxpayer).await?;
    tracing::info!(
        company = %company.tax_id,
        razon_social = %taxpayer.razon_social,
        "taxpayer profile synchronised"
    );
    Ok(taxpayer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use tributo_core::Rut;
    use tributo_store::MemStore;

    #[tokio::test]
    async fn first_sync_creates_and_verifies() {
        let store = MemStore::new();
        let company = CompanyRecord::new(Rut::parse("77794858-K").unwrap(), "Empresa SpA");
        store.insert_company(&company).await.unwrap();

        let profile = TaxpayerProfile {
            razon_social: "EMPRESA SPA".into(),
            tax_id: "77794858-K".into(),
            activity_start_date: NaiveDate::from_ymd_opt(2019, 3, 1),
            activities: vec!["Servicios informáticos".into()],
            addresses: vec![],
            raw: json!({"razon_social": "EMPRESA SPA"}),
        };

        let taxpayer = sync_taxpayer_profile(&store, &company, &profile)
            .await
            .unwrap();
        assert!(taxpayer.is_verified);
        assert_eq!(taxpayer.razon_social, "EMPRESA SPA");
        assert_eq!(
            taxpayer.activity_start_date,
            NaiveDate::from_ymd_opt(2019, 3, 1)
        );
        assert!(taxpayer.last_sii_sync.is_some());

        // Re-sync without a start date keeps the known one.
        let no_date = TaxpayerProfile {
            activity_start_date: None,
            ..profile
        };
        let taxpayer = sync_taxpayer_profile(&store, &company, &no_date)
            .await
            .unwrap();
        assert_eq!(
            taxpayer.activity_start_date,
            NaiveDate::from_ymd_opt(2019, 3, 1)
        );
    }
}
