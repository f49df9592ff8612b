//! Company segmentation and rule-driven process assignment.
//!
//! A segment is a named predicate over the taxpayer profile. Evaluation
//! walks the active segments in type order and returns the first whose
//! criteria all hold (AND over present predicates). Predicates the
//! profile cannot answer evaluate to false, and any evaluation failure
//! makes the segment a non-match rather than an error.

use serde_json::Value;

use tributo_store::{
    AssignmentRuleRecord, CompanyRecord, CompanyStore, ProcessRecord, ProcessStore,
    SegmentCriteria, SegmentRecord, TaxpayerRecord, TemplateStore,
};

use crate::error::EngineError;
use crate::materialize::ProcessMaterialiser;

/// Custom-condition tags the evaluator recognises.
const TAG_REQUIRES_F3323: &str = "requires_f3323";

/// Evaluates segments and applies the matching assignment rules.
#[derive(Debug, Clone)]
pub struct SegmentationService<S> {
    store: S,
}

impl<S> SegmentationService<S>
where
    S: CompanyStore + TemplateStore + ProcessStore + Clone,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Return the first active segment whose criteria the company meets.
    pub async fn evaluate_segment(
        &self,
        company: &CompanyRecord,
    ) -> Result<Option<SegmentRecord>, EngineError> {
        let Some(taxpayer) = self.store.taxpayer_for_company(company.id).await? else {
            tracing::warn!(company = %company.tax_id, "company has no taxpayer profile");
            return Ok(None);
        };

        for segment in self.store.list_active_segments().await? {
            if matches_criteria(&segment.criteria, &taxpayer) {
                tracing::info!(
                    company = %company.tax_id,
                    segment = %segment.name,
                    "company matched segment"
                );
                return Ok(Some(segment));
            }
        }
        tracing::info!(company = %company.tax_id, "company matched no segment");
        Ok(None)
    }

    /// Evaluate and persist the segment on the taxpayer; with
    /// `auto_apply`, materialise the segment's auto-apply rules.
    pub async fn assign_segment(
        &self,
        company: &CompanyRecord,
        auto_apply: bool,
    ) -> Result<Option<SegmentRecord>, EngineError> {
        let segment = self.evaluate_segment(company).await?;
        if let Some(segment) = &segment {
            self.store
                .set_taxpayer_segment(company.id, Some(segment.id))
                .await?;
            if auto_apply {
                self.assign_processes_by_rules(company).await?;
            }
        }
        Ok(segment)
    }

    /// Apply every active, auto-apply rule of the company's segment, in
    /// priority order. One rule's failure never stops the rest.
    pub async fn assign_processes_by_rules(
        &self,
        company: &CompanyRecord,
    ) -> Result<Vec<ProcessRecord>, EngineError> {
        let Some(taxpayer) = self.store.taxpayer_for_company(company.id).await? else {
            return Ok(Vec::new());
        };
        let Some(segment_id) = taxpayer.segment_id else {
            tracing::info!(company = %company.tax_id, "no segment assigned");
            return Ok(Vec::new());
        };

        let materialiser = ProcessMaterialiser::new(self.store.clone());
        let mut created = Vec::new();

        for rule in self.store.rules_for_segment(segment_id).await? {
            if !rule.auto_apply || !rule_conditions_pass(&rule, &taxpayer) {
                continue;
            }
            let Some(template) = self.store.template_by_id(rule.template_id).await? else {
                tracing::warn!(rule = %rule.id, "rule references a missing template");
                continue;
            };
            match materialiser
                .apply_template(&template, company, "system", None)
                .await
            {
                Ok(process) => {
                    tracing::info!(
                        process = %process.name,
                        template = %template.name,
                        "process assigned by rule"
                    );
                    created.push(process);
                }
                Err(e) => {
                    tracing::error!(
                        template = %template.name,
                        error = %e,
                        "rule application failed, continuing"
                    );
                }
            }
        }
        Ok(created)
    }

    /// The templates whose rules currently apply to the company, without
    /// materialising anything.
    pub async fn applicable_templates(
        &self,
        company: &CompanyRecord,
    ) -> Result<Vec<tributo_store::ProcessTemplateRecord>, EngineError> {
        let Some(taxpayer) = self.store.taxpayer_for_company(company.id).await? else {
            return Ok(Vec::new());
        };
        let Some(segment_id) = taxpayer.segment_id else {
            return Ok(Vec::new());
        };

        let mut templates = Vec::new();
        for rule in self.store.rules_for_segment(segment_id).await? {
            if !rule_conditions_pass(&rule, &taxpayer) {
                continue;
            }
            if let Some(template) = self.store.template_by_id(rule.template_id).await? {
                if template.is_available() {
                    templates.push(template);
                }
            }
        }
        Ok(templates)
    }
}

/// AND over the present predicates. Predicates the profile carries no data
/// for (size, economic activity, revenue) evaluate to false so a segment
/// demanding them never matches spuriously.
fn matches_criteria(criteria: &SegmentCriteria, taxpayer: &TaxpayerRecord) -> bool {
    if criteria.is_empty() {
        return false;
    }
    if criteria.size.is_some() || criteria.annual_revenue.is_some() {
        return false;
    }
    if !criteria.economic_activity.is_empty() {
        return false;
    }

    if !criteria.tax_regime.is_empty() {
        let settings = &taxpayer.settings;
        let regime_matches = criteria.tax_regime.iter().any(|regime| {
            (regime == "f29_monthly" && settings.f29_monthly)
                || (regime == "f3323_quarterly" && settings.f3323_quarterly)
        });
        if !regime_matches {
            return false;
        }
    }

    if !criteria.custom_conditions.is_empty() {
        let settings = &taxpayer.settings;
        let all_tags_hold = criteria.custom_conditions.iter().all(|tag| {
            match tag.as_str() {
                TAG_REQUIRES_F3323 => settings.f3323_quarterly,
                // Unrecognised tags evaluate to false.
                _ => false,
            }
        });
        if !all_tags_hold {
            return false;
        }
    }

    true
}

/// A rule's additional conditions. An empty map passes; recognised keys
/// mirror the segment tags.
fn rule_conditions_pass(rule: &AssignmentRuleRecord, taxpayer: &TaxpayerRecord) -> bool {
    let Value::Object(conditions) = &rule.conditions else {
        return true;
    };
    if conditions.is_empty() {
        return true;
    }
    conditions.iter().all(|(key, value)| match key.as_str() {
        "requires_f29" => value.as_bool() != Some(true) || taxpayer.settings.f29_monthly,
        "requires_f3323" => value.as_bool() != Some(true) || taxpayer.settings.f3323_quarterly,
        "requires_document_sync" => {
            value.as_bool() != Some(true) || taxpayer.settings.document_sync
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tributo_core::{ProcessSettings, Rut, SegmentId};
    use tributo_store::{MemStore, SegmentCriteria};
    use uuid::Uuid;

    async fn company_with_settings(
        store: &MemStore,
        settings: ProcessSettings,
    ) -> CompanyRecord {
        let company = CompanyRecord::new(Rut::parse("77794858-K").unwrap(), "Empresa SpA");
        store.insert_company(&company).await.unwrap();
        let mut taxpayer = TaxpayerRecord::new(company.id, company.tax_id);
        taxpayer.settings = settings;
        store.upsert_taxpayer(&taxpayer).await.unwrap();
        company
    }

    fn segment(name: &str, segment_type: &str, criteria: SegmentCriteria) -> SegmentRecord {
        SegmentRecord {
            id: SegmentId::new(),
            name: name.into(),
            segment_type: segment_type.into(),
            criteria,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn regime_criteria_match_process_settings() {
        let store = MemStore::new();
        let company = company_with_settings(
            &store,
            ProcessSettings {
                f29_monthly: true,
                ..ProcessSettings::default()
            },
        )
        .await;

        store
            .insert_segment(&segment(
                "PYME con F29",
                "a",
                SegmentCriteria {
                    tax_regime: vec!["f29_monthly".into()],
                    ..SegmentCriteria::default()
                },
            ))
            .await
            .unwrap();

        let service = SegmentationService::new(store.clone());
        let matched = service.evaluate_segment(&company).await.unwrap().unwrap();
        assert_eq!(matched.name, "PYME con F29");
    }

    #[tokio::test]
    async fn first_matching_segment_in_type_order_wins() {
        let store = MemStore::new();
        let company = company_with_settings(
            &store,
            ProcessSettings {
                f29_monthly: true,
                f3323_quarterly: true,
                ..ProcessSettings::default()
            },
        )
        .await;

        store
            .insert_segment(&segment(
                "Pro Pyme",
                "b-second",
                SegmentCriteria {
                    custom_conditions: vec![TAG_REQUIRES_F3323.into()],
                    ..SegmentCriteria::default()
                },
            ))
            .await
            .unwrap();
        store
            .insert_segment(&segment(
                "PYME con F29",
                "a-first",
                SegmentCriteria {
                    tax_regime: vec!["f29_monthly".into()],
                    ..SegmentCriteria::default()
                },
            ))
            .await
            .unwrap();

        let service = SegmentationService::new(store.clone());
        let matched = service.evaluate_segment(&company).await.unwrap().unwrap();
        assert_eq!(matched.name, "PYME con F29");
    }

    #[tokio::test]
    async fn unanswerable_predicates_never_match() {
        let store = MemStore::new();
        let company = company_with_settings(
            &store,
            ProcessSettings {
                f29_monthly: true,
                ..ProcessSettings::default()
            },
        )
        .await;

        store
            .insert_segment(&segment(
                "Grandes",
                "a",
                SegmentCriteria {
                    size: Some(tributo_store::CriteriaRange {
                        min: Some(100),
                        max: None,
                    }),
                    tax_regime: vec!["f29_monthly".into()],
                    ..SegmentCriteria::default()
                },
            ))
            .await
            .unwrap();

        let service = SegmentationService::new(store.clone());
        assert!(service.evaluate_segment(&company).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_criteria_never_match() {
        let store = MemStore::new();
        let company = company_with_settings(&store, ProcessSettings::default()).await;
        store
            .insert_segment(&segment("Vacío", "a", SegmentCriteria::default()))
            .await
            .unwrap();

        let service = SegmentationService::new(store.clone());
        assert!(service.evaluate_segment(&company).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn assignment_materialises_rule_templates() {
        let store = MemStore::new();
        let company = company_with_settings(
            &store,
            ProcessSettings {
                f29_monthly: true,
                ..ProcessSettings::default()
            },
        )
        .await;

        let seg = segment(
            "PYME con F29",
            "a",
            SegmentCriteria {
                tax_regime: vec!["f29_monthly".into()],
                ..SegmentCriteria::default()
            },
        );
        store.insert_segment(&seg).await.unwrap();

        let (template, tasks) = crate::templates::TemplateFactory::f29_monthly().build();
        store.insert_template(&template).await.unwrap();
        for task in tasks {
            store.insert_template_task(&task).await.unwrap();
        }
        store
            .insert_assignment_rule(&AssignmentRuleRecord {
                id: Uuid::new_v4(),
                template_id: template.id,
                segment_id: seg.id,
                priority: 10,
                is_active: true,
                auto_apply: true,
                conditions: json!({}),
            })
            .await
            .unwrap();

        let service = SegmentationService::new(store.clone());
        let assigned = service.assign_segment(&company, true).await.unwrap();
        assert!(assigned.is_some());

        let taxpayer = store.taxpayer_for_company(company.id).await.unwrap().unwrap();
        assert_eq!(taxpayer.segment_id, Some(seg.id));

        // The rule materialised one process with the template's tasks.
        let exists = store
            .process_exists_for_period(
                company.id,
                tributo_core::ProcessType::TaxMonthly,
                &tributo_core::TaxPeriod::containing(chrono::Utc::now().date_naive()).dashed(),
            )
            .await
            .unwrap();
        assert!(exists);
    }

    #[tokio::test]
    async fn rule_conditions_gate_application() {
        let taxpayer = TaxpayerRecord::new(
            tributo_core::CompanyId::new(),
            Rut::parse("77794858-K").unwrap(),
        );
        let rule = AssignmentRuleRecord {
            id: Uuid::new_v4(),
            template_id: tributo_core::TemplateId::new(),
            segment_id: SegmentId::new(),
            priority: 0,
            is_active: true,
            auto_apply: true,
            conditions: json!({"requires_f3323": true}),
        };
        assert!(!rule_conditions_pass(&rule, &taxpayer));

        let mut quarterly = taxpayer.clone();
        quarterly.settings.f3323_quarterly = true;
        assert!(rule_conditions_pass(&rule, &quarterly));

        let unconditional = AssignmentRuleRecord {
            conditions: json!({}),
            ..rule
        };
        assert!(rule_conditions_pass(&unconditional, &taxpayer));
    }
}
