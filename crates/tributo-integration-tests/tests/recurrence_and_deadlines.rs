//! Recurrence on completion and deadline classification, end to end: a
//! completed monthly process spawns exactly one successor for the next
//! covered period, and the deadline monitor classifies by proximity.

use chrono::{Duration, NaiveDate, Utc};
use serde_json::json;

use tributo_core::{ExecutionStatus, ProcessStatus, TaskType};
use tributo_engine::{
    DeadlineKind, DeadlineMonitor, NoopRunner, ProcessEngine, ProcessMaterialiser,
    RecurrenceGenerator, TemplateFactory,
};
use tributo_store::{MemStore, ProcessStore, TemplateStore};

use tributo_integration_tests::store_with_company;

#[tokio::test]
async fn completed_f29_spawns_exactly_one_successor() {
    let (store, company) = store_with_company().await;

    // Materialise the F29 flow, then force its covered period to 2024-01
    // so the scenario is deterministic.
    let (template, tasks) = TemplateFactory::f29_monthly().build();
    store.insert_template(&template).await.unwrap();
    for task in tasks {
        store.insert_template_task(&task).await.unwrap();
    }
    let materialiser = ProcessMaterialiser::new(store.clone());
    let mut process = materialiser
        .apply_template(&template, &company, "system", None)
        .await
        .unwrap();
    process.config_data = json!({"period": "2024-01", "form_type": "f29"});
    process.status = ProcessStatus::Completed;
    // Completion happens months later: the successor must still follow
    // the covered period, not the completion month.
    process.completed_at = Some(Utc::now());
    store.update_process(&process).await.unwrap();

    let generator = RecurrenceGenerator::new(store.clone());
    let successor = generator.generate_next(process.id).await.unwrap().unwrap();

    assert_eq!(successor.period().as_deref(), Some("2024-02"));
    assert_eq!(
        successor.due_date.unwrap().date_naive(),
        NaiveDate::from_ymd_opt(2024, 3, 12).unwrap()
    );
    assert_eq!(successor.parent_process, Some(process.id));

    // The successor clones the structural shape with fresh pending tasks.
    let tasks = store.process_tasks(successor.id).await.unwrap();
    assert_eq!(tasks.len(), 8);
    assert!(tasks
        .iter()
        .all(|(_, task)| task.status == tributo_core::TaskStatus::Pending));

    // A second generator call in the same state makes no new process.
    assert!(generator.generate_next(process.id).await.unwrap().is_none());
}

#[tokio::test]
async fn engine_completion_feeds_recurrence() {
    let (store, company) = store_with_company().await;

    // A minimal all-automatic recurring process for period 2024-05.
    let (template, template_tasks) = {
        let mut definition = TemplateFactory::f29_monthly();
        definition.tasks.retain(|t| t.task_type == TaskType::Automatic);
        for task in &mut definition.tasks {
            task.conditions = Default::default();
        }
        definition.build()
    };
    store.insert_template(&template).await.unwrap();
    for task in template_tasks {
        store.insert_template_task(&task).await.unwrap();
    }

    let materialiser = ProcessMaterialiser::new(store.clone());
    let mut process = materialiser
        .apply_template(&template, &company, "system", Some(json!({"period": "2024-05"})))
        .await
        .unwrap();
    // The engine starts draft processes.
    process.status = ProcessStatus::Draft;
    store.update_process(&process).await.unwrap();

    let engine = ProcessEngine::new(store.clone(), NoopRunner);
    let execution = engine.start_process(process.id, json!({})).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let completed = store.process_by_id(process.id).await.unwrap().unwrap();
    assert_eq!(completed.status, ProcessStatus::Completed);

    // Completion hands over to the recurrence generator.
    let generator = RecurrenceGenerator::new(store.clone());
    let successor = generator.generate_next(process.id).await.unwrap().unwrap();
    assert_eq!(successor.period().as_deref(), Some("2024-06"));
}

#[tokio::test]
async fn deadline_scan_classifies_three_processes() {
    let (store, company) = store_with_company().await;
    let now = Utc::now();

    let mut base = {
        let (template, tasks) = TemplateFactory::f29_monthly().build();
        store.insert_template(&template).await.unwrap();
        for task in tasks {
            store.insert_template_task(&task).await.unwrap();
        }
        ProcessMaterialiser::new(store.clone())
            .apply_template(&template, &company, "system", None)
            .await
            .unwrap()
    };

    // Three active processes due at now+4d, now+1d and now-2d.
    for (suffix, due) in [
        ("cuatro", now + Duration::days(4)),
        ("uno", now + Duration::days(1)),
        ("vencido", now - Duration::days(2)),
    ] {
        base.id = tributo_core::ProcessId::new();
        base.name = format!("F29 {suffix}");
        base.status = ProcessStatus::Active;
        base.due_date = Some(due);
        store.insert_process(&base).await.unwrap();
    }

    let monitor = DeadlineMonitor::new(store.clone());
    let alerts = monitor.scan(now).await.unwrap();

    // The four-day process gets no alert; the original materialised
    // process (due next month) gets none either.
    let names: Vec<(&str, DeadlineKind)> = alerts
        .iter()
        .map(|a| (a.process_name.as_str(), a.kind))
        .collect();
    assert_eq!(alerts.len(), 2);
    assert!(names.contains(&("F29 uno", DeadlineKind::Urgent)));
    assert!(names.contains(&("F29 vencido", DeadlineKind::Overdue)));
}
