use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use ladder_core::domain::hierarchy::{HierarchyDefinition, HierarchyId, HierarchyKey};
use ladder_core::domain::request::{RequestId, RequestInstance};
use ladder_core::domain::step::{ApprovalHistory, Step};
use ladder_core::hierarchy::select_band;

pub mod hierarchy;
pub mod memory;
pub mod request;

pub use hierarchy::SqlHierarchyRepository;
pub use memory::{InMemoryHierarchyRepository, InMemoryRequestRepository};
pub use request::SqlRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} `{id}` was changed by another action; reload and retry")]
    Conflict { entity: &'static str, id: String },
}

impl RepositoryError {
    /// Unique-constraint violations mean a concurrent writer got there first.
    pub(crate) fn from_write(error: sqlx::Error, entity: &'static str, id: &str) -> Self {
        match &error {
            sqlx::Error::Database(database) if database.is_unique_violation() => {
                Self::Conflict { entity, id: id.to_owned() }
            }
            _ => Self::Database(error),
        }
    }
}

#[async_trait]
pub trait HierarchyRepository: Send + Sync {
    async fn find_by_id(&self, id: &HierarchyId)
        -> Result<Option<HierarchyDefinition>, RepositoryError>;

    async fn find_by_key(
        &self,
        key: &HierarchyKey,
    ) -> Result<Option<HierarchyDefinition>, RepositoryError>;

    /// Every CAPEX band configured for `department`.
    async fn list_for_department(
        &self,
        department: &str,
    ) -> Result<Vec<HierarchyDefinition>, RepositoryError>;

    async fn save(&self, definition: HierarchyDefinition) -> Result<(), RepositoryError>;

    async fn find_for_amount(
        &self,
        department: &str,
        amount: Decimal,
    ) -> Result<Option<HierarchyDefinition>, RepositoryError> {
        let bands = self.list_for_department(department).await?;
        Ok(select_band(&bands, department, amount).cloned())
    }
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<RequestInstance>, RepositoryError>;

    /// Writes the request row and its steps and returns the new stored
    /// version. `request.version` must match what is stored (0 for a new
    /// request), otherwise nothing is written and `Conflict` is returned. A
    /// step already completed in storage is never overwritten.
    async fn save(&self, request: RequestInstance) -> Result<u64, RepositoryError>;

    /// Returns `false` when nothing was stored under `id`.
    async fn delete(&self, id: &RequestId) -> Result<bool, RepositoryError>;

    async fn list_steps(&self, id: &RequestId) -> Result<Vec<Step>, RepositoryError>;
}

/// Applies incoming steps onto stored ones, keeping any stored step that is
/// already complete.
pub(crate) fn merge_history(
    stored: &ApprovalHistory,
    incoming: &ApprovalHistory,
) -> ApprovalHistory {
    let mut merged: Vec<Step> = stored.steps().to_vec();
    for step in incoming.steps() {
        match merged.iter_mut().find(|existing| existing.id == step.id) {
            Some(existing) if existing.is_open() => *existing = step.clone(),
            Some(_) => {}
            None => merged.push(step.clone()),
        }
    }
    ApprovalHistory::from_steps(merged)
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

pub(crate) fn encode_json<T: Serialize>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode {what}: {error}")))
}

pub(crate) fn decode_json<T: DeserializeOwned>(
    raw: &str,
    what: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("could not decode {what}: {error}")))
}

pub(crate) fn parse_timestamp(raw: &str, what: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid {what} `{raw}`: {error}")))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use ladder_core::domain::approver::ApproverId;
    use ladder_core::domain::hierarchy::LevelNumber;
    use ladder_core::domain::step::{ApprovalHistory, NewStep, StepCompletion, StepStatus};

    use super::merge_history;

    #[test]
    fn merge_never_reopens_a_completed_step() {
        let mut stored = ApprovalHistory::default();
        let step_id = stored
            .append(NewStep {
                level: LevelNumber(1),
                approver_position: "Manager".to_owned(),
                assignees: Vec::new(),
                status: StepStatus::Pending,
                comment: None,
                actor: None,
                assigned_at: Utc::now(),
                completed_at: None,
                clarification: None,
            })
            .id
            .clone();
        let stale = stored.clone();
        stored
            .complete(
                &step_id,
                StepCompletion {
                    status: StepStatus::Approved,
                    actor: ApproverId("u-1".to_owned()),
                    comment: None,
                    response_comment: None,
                    completed_at: Utc::now(),
                },
            )
            .expect("complete");

        let merged = merge_history(&stored, &stale);

        assert_eq!(merged.steps()[0].status, StepStatus::Approved);
        assert!(merged.steps()[0].completed_at.is_some());
    }
}
