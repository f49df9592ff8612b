//! Seeding of the canonical process templates.
//!
//! Loads the catalogue ([`crate::templates::TemplateFactory`]) into the
//! store. Existing templates of the same name are left untouched unless
//! `clear` wipes the table first, so repeated seeding is idempotent.

use tributo_store::TemplateStore;

use crate::error::EngineError;
use crate::templates::{validate_template_tasks, TemplateFactory};

/// Seeder options, mirroring the admin command's flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeedOptions {
    /// Remove every existing template (and its tasks) first.
    pub clear: bool,
    /// Log each template as it is created or skipped.
    pub verbose: bool,
}

/// What the seeder did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub cleared: u64,
    pub created: u64,
    pub skipped: u64,
}

/// Load the canonical templates.
pub async fn seed_templates<S: TemplateStore>(
    store: &S,
    options: SeedOptions,
) -> Result<SeedSummary, EngineError> {
    let mut summary = SeedSummary::default();

    if options.clear {
        summary.cleared = store.clear_templates().await?;
        tracing::warn!(removed = summary.cleared, "existing templates cleared");
    }

    for definition in TemplateFactory::all() {
        if store.template_by_name(definition.name).await?.is_some() {
            summary.skipped += 1;
            if options.verbose {
                tracing::info!(template = definition.name, "template already exists");
            }
            continue;
        }

        let (template, tasks) = definition.build();
        validate_template_tasks(&tasks)?;
        store.insert_template(&template).await?;
        for task in &tasks {
            store.insert_template_task(task).await?;
        }
        summary.created += 1;
        if options.verbose {
            tracing::info!(
                template = %template.name,
                tasks = tasks.len(),
                "template seeded"
            );
        }
    }

    tracing::info!(
        created = summary.created,
        skipped = summary.skipped,
        cleared = summary.cleared,
        "template seeding finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributo_store::MemStore;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = MemStore::new();
        let first = seed_templates(&store, SeedOptions::default()).await.unwrap();
        assert_eq!(first.created, 6);
        assert_eq!(first.skipped, 0);

        let second = seed_templates(&store, SeedOptions::default()).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 6);

        assert_eq!(store.list_templates().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn clear_reseeds_from_scratch() {
        let store = MemStore::new();
        seed_templates(&store, SeedOptions::default()).await.unwrap();

        let summary = seed_templates(
            &store,
            SeedOptions {
                clear: true,
                verbose: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(summary.cleared, 6);
        assert_eq!(summary.created, 6);
    }

    #[tokio::test]
    async fn seeded_templates_carry_their_tasks() {
        let store = MemStore::new();
        seed_templates(&store, SeedOptions::default()).await.unwrap();

        for template in store.list_templates().await.unwrap() {
            let tasks = store.template_tasks(template.id).await.unwrap();
            assert!(!tasks.is_empty(), "{}", template.name);
            // Ordered by execution order, as the materialiser expects.
            let orders: Vec<i32> = tasks.iter().map(|t| t.execution_order).collect();
            let mut sorted = orders.clone();
            sorted.sort_unstable();
            assert_eq!(orders, sorted);
        }
    }
}
