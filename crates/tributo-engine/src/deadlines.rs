//! Deadline monitoring.
//!
//! A singleton periodic job scans active and paused processes and
//! classifies them by proximity to their due date. Each scan emits one
//! alert per process — the most severe that applies — as a structured
//! record consumed by the messaging layer.

use chrono::{DateTime, Duration, Utc};

use tributo_core::{CompanyId, ProcessId, ProcessStatus};
use tributo_store::ProcessStore;

use crate::error::EngineError;

/// Statuses the monitor watches.
const WATCHED: &[ProcessStatus] = &[ProcessStatus::Active, ProcessStatus::Paused];

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineKind {
    /// Due within three days.
    Reminder,
    /// Due within one day.
    Urgent,
    /// Due date already passed.
    Overdue,
}

impl DeadlineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reminder => "reminder",
            Self::Urgent => "urgent",
            Self::Overdue => "overdue",
        }
    }
}

impl std::fmt::Display for DeadlineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted alert, ready for the messaging subsystem.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeadlineAlert {
    pub process_id: ProcessId,
    pub company_id: CompanyId,
    pub process_name: String,
    pub kind: DeadlineKind,
    pub due_date: DateTime<Utc>,
    /// Whole days until (positive) or since (negative) the due date.
    pub days_delta: i64,
}

/// The periodic scanner.
#[derive(Debug, Clone)]
pub struct DeadlineMonitor<S> {
    store: S,
}

impl<S> DeadlineMonitor<S>
where
    S: ProcessStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// One scan at instant `now`. Returns the alerts in ascending due-date
    /// order, overdue first.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<Vec<DeadlineAlert>, EngineError> {
        let mut alerts = Vec::new();

        for process in self.store.processes_overdue(now, WATCHED).await? {
            let Some(due_date) = process.due_date else { continue };
            alerts.push(DeadlineAlert {
                process_id: process.id,
                company_id: process.company_id,
                process_name: process.name.clone(),
                kind: DeadlineKind::Overdue,
                due_date,
                days_delta: (due_date - now).num_days(),
            });
        }

        let upcoming = self
            .store
            .processes_due_between(now, now + Duration::days(3), WATCHED)
            .await?;
        for process in upcoming {
            let Some(due_date) = process.due_date else { continue };
            let kind = if due_date - now <= Duration::days(1) {
                DeadlineKind::Urgent
            } else {
                DeadlineKind::Reminder
            };
            alerts.push(DeadlineAlert {
                process_id: process.id,
                company_id: process.company_id,
                process_name: process.name.clone(),
                kind,
                due_date,
                days_delta: (due_date - now).num_days(),
            });
        }

        for alert in &alerts {
            tracing::info!(
                process = %alert.process_name,
                kind = %alert.kind,
                days = alert.days_delta,
                "deadline alert emitted"
            );
        }
        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tributo_core::{ProcessType, RecurrenceType, Rut};
    use tributo_store::{MemStore, ProcessRecord, RecurrenceConfig};

    fn process_due(name: &str, due: DateTime<Utc>, status: ProcessStatus) -> ProcessRecord {
        ProcessRecord {
            id: ProcessId::new(),
            name: name.into(),
            description: String::new(),
            process_type: ProcessType::TaxMonthly,
            company_id: CompanyId::new(),
            company_tax_id: Rut::parse("77794858-K").unwrap(),
            status,
            is_template: false,
            parent_process: None,
            created_by: "system".into(),
            assigned_to: "system".into(),
            start_date: None,
            due_date: Some(due),
            completed_at: None,
            is_recurring: false,
            recurrence_type: RecurrenceType::None,
            recurrence_config: RecurrenceConfig::default(),
            config_data: json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn classification_matches_the_windows() {
        let store = MemStore::new();
        let now = Utc::now();
        store
            .insert_process(&process_due("in-four-days", now + Duration::days(4), ProcessStatus::Active))
            .await
            .unwrap();
        store
            .insert_process(&process_due("in-one-day", now + Duration::days(1), ProcessStatus::Active))
            .await
            .unwrap();
        store
            .insert_process(&process_due("two-days-late", now - Duration::days(2), ProcessStatus::Active))
            .await
            .unwrap();

        let monitor = DeadlineMonitor::new(store.clone());
        let alerts = monitor.scan(now).await.unwrap();

        // The four-day process is outside every window.
        assert_eq!(alerts.len(), 2);
        let overdue = alerts.iter().find(|a| a.process_name == "two-days-late").unwrap();
        assert_eq!(overdue.kind, DeadlineKind::Overdue);
        assert_eq!(overdue.days_delta, -2);
        let urgent = alerts.iter().find(|a| a.process_name == "in-one-day").unwrap();
        assert_eq!(urgent.kind, DeadlineKind::Urgent);
    }

    #[tokio::test]
    async fn three_day_boundary_is_a_reminder_each_scan() {
        let store = MemStore::new();
        let now = Utc::now();
        store
            .insert_process(&process_due("at-boundary", now + Duration::days(3), ProcessStatus::Active))
            .await
            .unwrap();

        let monitor = DeadlineMonitor::new(store.clone());
        let alerts = monitor.scan(now).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, DeadlineKind::Reminder);

        // Exactly one alert per scan for the same process.
        let alerts = monitor.scan(now).await.unwrap();
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn terminal_processes_are_ignored() {
        let store = MemStore::new();
        let now = Utc::now();
        store
            .insert_process(&process_due("done", now - Duration::days(1), ProcessStatus::Completed))
            .await
            .unwrap();
        store
            .insert_process(&process_due("cancelled", now - Duration::days(1), ProcessStatus::Cancelled))
            .await
            .unwrap();
        store
            .insert_process(&process_due("paused-late", now - Duration::days(1), ProcessStatus::Paused))
            .await
            .unwrap();

        let monitor = DeadlineMonitor::new(store.clone());
        let alerts = monitor.scan(now).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].process_name, "paused-late");
    }
}
