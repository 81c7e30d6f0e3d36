use chrono::Utc;
use ladder_core::domain::hierarchy::{HierarchyId, HierarchyKey, ValueBand};
use ladder_core::errors::ValidationError;
use ladder_core::hierarchy::HierarchyManager;
use ladder_db::{HierarchyRepository, SqlHierarchyRepository};
use rust_decimal::Decimal;

use crate::commands::{load_config, migrated_pool, runtime, CommandResult, StepFailure};

const IMPORT_SCOPES: &[(&str, &str)] = &[
    ("import_payment", "foreign"),
    ("import_payment", "local"),
    ("custom_duty", "foreign"),
    ("journal_voucher", "all"),
];

const CAPEX_DEPARTMENT: &str = "general";

/// Import scopes plus three CAPEX bands for the general department:
/// under 100k, 100k to 1M, and 1M upward.
pub fn default_keys() -> Result<Vec<HierarchyKey>, ValidationError> {
    let mut keys: Vec<HierarchyKey> = IMPORT_SCOPES
        .iter()
        .map(|(import_type, scope)| HierarchyKey::import_scope(*import_type, *scope))
        .collect();

    let bands = [
        (Decimal::ZERO, Some(Decimal::new(100_000, 0))),
        (Decimal::new(100_000, 0), Some(Decimal::new(1_000_000, 0))),
        (Decimal::new(1_000_000, 0), None),
    ];
    for (min, max) in bands {
        keys.push(HierarchyKey::department_band(CAPEX_DEPARTMENT, ValueBand::new(min, max)?));
    }
    Ok(keys)
}

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let manager = HierarchyManager::new(config.workflow.skeleton_levels)
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
        let keys = default_keys().map_err(|error| ("seed_execution", error.to_string(), 6u8))?;

        let pool = migrated_pool(&config).await?;
        let repository = SqlHierarchyRepository::new(pool.clone());
        let outcome = seed_keys(&repository, &manager, keys).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(report) => CommandResult::success("seed", report.message()),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SeedReport {
    created: Vec<String>,
    existing: Vec<String>,
}

impl SeedReport {
    fn message(&self) -> String {
        let mut lines = vec![format!(
            "default hierarchies ready: {} created, {} already present",
            self.created.len(),
            self.existing.len()
        )];
        lines.extend(self.created.iter().map(|key| format!("  + {key}")));
        lines.extend(self.existing.iter().map(|key| format!("  = {key}")));
        lines.join("\n")
    }
}

async fn seed_keys<R>(
    repository: &R,
    manager: &HierarchyManager,
    keys: Vec<HierarchyKey>,
) -> Result<SeedReport, StepFailure>
where
    R: HierarchyRepository + ?Sized,
{
    let mut report = SeedReport::default();
    for key in keys {
        let storage_key = key.storage_key();
        let existing = repository
            .find_by_key(&key)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
        if existing.is_some() {
            report.existing.push(storage_key);
            continue;
        }

        let skeleton = manager
            .default_skeleton(HierarchyId::generate(), key, Utc::now())
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
        repository
            .save(skeleton)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
        report.created.push(storage_key);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use ladder_core::hierarchy::HierarchyManager;
    use ladder_db::{HierarchyRepository, InMemoryHierarchyRepository};

    use super::{default_keys, seed_keys};

    #[test]
    fn default_keys_are_unique() {
        let keys = default_keys().expect("keys");
        let mut storage: Vec<String> = keys.iter().map(|key| key.storage_key()).collect();
        storage.sort();
        storage.dedup();
        assert_eq!(storage.len(), keys.len());
    }

    #[tokio::test]
    async fn second_pass_only_reports_existing_keys() {
        let repository = InMemoryHierarchyRepository::default();
        let manager = HierarchyManager::new(6).expect("manager");

        let first = seed_keys(&repository, &manager, default_keys().expect("keys"))
            .await
            .expect("first seed");
        assert_eq!(first.created.len(), 7);
        assert!(first.existing.is_empty());

        let second = seed_keys(&repository, &manager, default_keys().expect("keys"))
            .await
            .expect("second seed");
        assert!(second.created.is_empty());
        assert_eq!(second.existing, first.created);

        let key = &default_keys().expect("keys")[0];
        let stored = repository.find_by_key(key).await.expect("lookup").expect("seeded");
        assert_eq!(stored.levels.len(), 6);
        assert!(stored.levels.iter().all(|level| !level.enabled));
    }
}
