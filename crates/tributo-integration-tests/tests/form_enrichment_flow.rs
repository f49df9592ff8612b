//! Form sync followed by detail enrichment: every synced form with a
//! portal folio is eventually enriched by its detail job.

use chrono::Utc;

use tributo_core::FormCode;
use tributo_portal::{
    FormDetail, FormDetailField, MockPortalSession, NumberOrText, RawForm,
};
use tributo_ingest::{DetailExtractor, DetailOutcome, FormSyncService};
use tributo_store::{FormStore, MemStore};

use tributo_integration_tests::store_with_company;

fn raw_form(folio: &str, period: &str) -> RawForm {
    RawForm {
        folio: folio.to_string(),
        period: period.to_string(),
        contributor: "77794858-K".into(),
        submission_date: Some("09/05/2024".into()),
        status: "Vigente".into(),
        amount: Some(NumberOrText::Int(42443)),
    }
}

fn detail(folio: &str) -> FormDetail {
    FormDetail {
        folio: folio.to_string(),
        period: "2024-01".into(),
        fields: vec![
            FormDetailField {
                code: "538".into(),
                label: "Débito fiscal".into(),
                value: "1.023.785".into(),
            },
            FormDetailField {
                code: "511".into(),
                label: "Crédito fiscal".into(),
                value: "981.342".into(),
            },
        ],
        subtables: Vec::new(),
    }
}

fn detail_session(store: &MemStore, folios: &[&str]) -> (MockPortalSession, MemStore) {
    let mut session = MockPortalSession::new();
    for &folio in folios {
        session = session.with_detail(folio, detail(folio));
    }
    (session, store.clone())
}

#[tokio::test]
async fn synced_forms_are_eventually_enriched() {
    let (store, company) = store_with_company().await;

    // Year sync finds two declarations.
    let session = MockPortalSession::new().with_forms(
        2024,
        vec![raw_form("7904207766", "2024-01"), raw_form("7904207767", "2024-02")],
    );
    let sync = FormSyncService::new(session, store.clone());
    let stats = sync
        .sync_forms(&company, 2024, None, None, FormCode::F29)
        .await
        .unwrap();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.touched_form_ids.len(), 2);

    // Each touched form gets its own detail job with its own session.
    for form_id in &stats.touched_form_ids {
        let form = store.form_by_id(*form_id).await.unwrap().unwrap();
        assert!(form.needs_detail_extraction());

        let (session, store_clone) = detail_session(&store, &[form.sii_folio.as_str()]);
        let extractor = DetailExtractor::new(session, store_clone);
        let outcome = extractor.extract(*form_id, false).await.unwrap();
        assert!(matches!(outcome, DetailOutcome::Extracted { fields: 2 }));
    }

    // Every form with a folio is now enriched, stamped no later than now.
    let now = Utc::now();
    for form_id in &stats.touched_form_ids {
        let form = store.form_by_id(*form_id).await.unwrap().unwrap();
        assert!(form.details_extracted);
        assert!(form.details_extracted_at.unwrap() <= now);
        assert!(!form.needs_detail_extraction());
        assert_eq!(form.details_data.len(), 2);
        assert!(form.details_data[0].value_formatted.is_some());
    }
    assert!(store
        .forms_needing_details(Some(company.id), 100)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn historical_sync_reports_detail_candidates_per_year() {
    let (store, company) = store_with_company().await;

    // Activity starts two calendar years back.
    let mut taxpayer = tributo_store::TaxpayerRecord::new(company.id, company.tax_id);
    taxpayer.activity_start_date =
        Some(Utc::now().date_naive() - chrono::Duration::days(2 * 365));
    tributo_store::CompanyStore::upsert_taxpayer(&store, &taxpayer)
        .await
        .unwrap();

    let this_year = chrono::Datelike::year(&Utc::now().date_naive());
    let mut session = MockPortalSession::new();
    for (index, year) in (this_year - 2..=this_year).enumerate() {
        session = session.with_forms(
            year,
            vec![raw_form(&format!("79042{index}"), &format!("{year}-03"))],
        );
    }

    let sync = FormSyncService::new(session, store.clone());
    let aggregate = sync
        .sync_all_historical_forms(&company, FormCode::F29)
        .await
        .unwrap();

    assert_eq!(aggregate.first_year, this_year - 2);
    assert_eq!(aggregate.last_year, this_year);
    assert_eq!(aggregate.totals.created, 3);
    assert_eq!(aggregate.totals.touched_form_ids.len(), 3);
    // Per-year sub-results are carried for the sync log.
    for year in this_year - 2..=this_year {
        assert_eq!(
            aggregate.results_by_year[year.to_string()]["created"],
            serde_json::json!(1)
        );
    }
}
