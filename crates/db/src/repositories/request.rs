use sqlx::sqlite::SqliteRow;

use ladder_core::domain::approver::{ApproverId, ApproverRef};
use ladder_core::domain::hierarchy::{HierarchyId, HierarchySnapshot, LevelNumber};
use ladder_core::domain::request::{RequestId, RequestInstance, RequestKind, RequestStatus};
use ladder_core::domain::step::{ApprovalHistory, Clarification, Step, StepId, StepStatus};

use super::{column, decode_json, encode_json, parse_timestamp, RepositoryError, RequestRepository};
use crate::DbPool;

const REQUEST_SELECT: &str = "SELECT id, hierarchy_id, kind, requester_json, payload_json,
        current_level, status, snapshot_json, created_at, updated_at, version
     FROM approval_request WHERE id = ?";

const STEPS_SELECT: &str = "SELECT id, sequence, level_number, approver_position,
        assignees_json, status, comment, actor_id, assigned_at, completed_at, is_clarification,
        clarification_json, response_comment
     FROM approval_step WHERE request_id = ? ORDER BY sequence";

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn version_param(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("request version {version} out of range")))
}

fn stale(id: &RequestId) -> RepositoryError {
    RepositoryError::Conflict { entity: "request", id: id.0.clone() }
}

fn level_from(raw: i64, what: &str) -> Result<LevelNumber, RepositoryError> {
    u32::try_from(raw)
        .map(LevelNumber)
        .map_err(|_| RepositoryError::Decode(format!("{what} {raw} out of range")))
}

fn row_to_step(row: &SqliteRow) -> Result<Step, RepositoryError> {
    let status_raw: String = column(row, "status")?;
    let status = StepStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status_raw}`")))?;
    let sequence = column::<i64>(row, "sequence")?;
    let sequence = u32::try_from(sequence)
        .map_err(|_| RepositoryError::Decode(format!("step sequence {sequence} out of range")))?;
    let clarification: Option<Clarification> = column::<Option<String>>(row, "clarification_json")?
        .map(|raw| decode_json(&raw, "clarification"))
        .transpose()?;
    let completed_at = column::<Option<String>>(row, "completed_at")?
        .map(|raw| parse_timestamp(&raw, "completed_at"))
        .transpose()?;
    let assignees: Vec<ApproverRef> =
        decode_json(&column::<String>(row, "assignees_json")?, "step assignees")?;

    Ok(Step {
        id: StepId(column(row, "id")?),
        sequence,
        level: level_from(column(row, "level_number")?, "step level")?,
        approver_position: column(row, "approver_position")?,
        assignees,
        status,
        comment: column(row, "comment")?,
        actor: column::<Option<String>>(row, "actor_id")?.map(ApproverId),
        assigned_at: parse_timestamp(&column::<String>(row, "assigned_at")?, "assigned_at")?,
        completed_at,
        is_clarification: column::<i64>(row, "is_clarification")? != 0,
        clarification,
        response_comment: column(row, "response_comment")?,
    })
}

fn row_to_request(row: &SqliteRow, steps: Vec<Step>) -> Result<RequestInstance, RepositoryError> {
    let status_raw: String = column(row, "status")?;
    let status = RequestStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{status_raw}`")))?;
    let snapshot: Option<HierarchySnapshot> = column::<Option<String>>(row, "snapshot_json")?
        .map(|raw| decode_json(&raw, "hierarchy snapshot"))
        .transpose()?;
    let version = column::<i64>(row, "version")?;
    let version = u64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("request version {version} out of range")))?;

    Ok(RequestInstance {
        id: RequestId(column(row, "id")?),
        hierarchy_id: HierarchyId(column(row, "hierarchy_id")?),
        kind: RequestKind::parse(&column::<String>(row, "kind")?),
        requester: decode_json(&column::<String>(row, "requester_json")?, "requester")?,
        payload: decode_json(&column::<String>(row, "payload_json")?, "payload")?,
        current_level: level_from(column(row, "current_level")?, "current level")?,
        status,
        snapshot,
        history: ApprovalHistory::from_steps(steps),
        created_at: parse_timestamp(&column::<String>(row, "created_at")?, "created_at")?,
        updated_at: parse_timestamp(&column::<String>(row, "updated_at")?, "updated_at")?,
        version,
    })
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    /// Reads the row and its steps inside one transaction so a concurrent
    /// save is seen either entirely or not at all.
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<RequestInstance>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(REQUEST_SELECT).bind(&id.0).fetch_optional(&mut *tx).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let step_rows = sqlx::query(STEPS_SELECT).bind(&id.0).fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let steps = step_rows.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?;
        Ok(Some(row_to_request(&row, steps)?))
    }

    async fn save(&self, request: RequestInstance) -> Result<u64, RepositoryError> {
        let snapshot_json = request
            .snapshot
            .as_ref()
            .map(|snapshot| encode_json(snapshot, "snapshot"))
            .transpose()?;
        let expected = version_param(request.version)?;
        let next = request.version + 1;
        let mut tx = self.pool.begin().await?;

        let result = if request.version == 0 {
            sqlx::query(
                "INSERT INTO approval_request
                     (id, hierarchy_id, kind, requester_json, payload_json, current_level,
                      status, snapshot_json, created_at, updated_at, version)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&request.id.0)
            .bind(&request.hierarchy_id.0)
            .bind(request.kind.as_str())
            .bind(encode_json(&request.requester, "requester")?)
            .bind(encode_json(&request.payload, "payload")?)
            .bind(i64::from(request.current_level.0))
            .bind(request.status.as_str())
            .bind(&snapshot_json)
            .bind(request.created_at.to_rfc3339())
            .bind(request.updated_at.to_rfc3339())
            .bind(version_param(next)?)
            .execute(&mut *tx)
            .await
        } else {
            // Compare-and-swap on the version read by the caller.
            sqlx::query(
                "UPDATE approval_request SET
                     payload_json = ?,
                     current_level = ?,
                     status = ?,
                     snapshot_json = ?,
                     updated_at = ?,
                     version = ?
                 WHERE id = ? AND version = ?",
            )
            .bind(encode_json(&request.payload, "payload")?)
            .bind(i64::from(request.current_level.0))
            .bind(request.status.as_str())
            .bind(&snapshot_json)
            .bind(request.updated_at.to_rfc3339())
            .bind(version_param(next)?)
            .bind(&request.id.0)
            .bind(expected)
            .execute(&mut *tx)
            .await
        };
        let written =
            result.map_err(|error| RepositoryError::from_write(error, "request", &request.id.0))?;

        if written.rows_affected() == 0 {
            return Err(stale(&request.id));
        }

        for step in request.history.steps() {
            let clarification_json = step
                .clarification
                .as_ref()
                .map(|clarification| encode_json(clarification, "clarification"))
                .transpose()?;

            // Completed rows are frozen: the WHERE clause turns a conflicting
            // write against them into a no-op.
            sqlx::query(
                "INSERT INTO approval_step
                     (id, request_id, sequence, level_number, approver_position, assignees_json,
                      status, comment, actor_id, assigned_at, completed_at, is_clarification,
                      clarification_json, response_comment)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     comment = excluded.comment,
                     actor_id = excluded.actor_id,
                     completed_at = excluded.completed_at,
                     response_comment = excluded.response_comment
                 WHERE approval_step.completed_at IS NULL",
            )
            .bind(&step.id.0)
            .bind(&request.id.0)
            .bind(i64::from(step.sequence))
            .bind(i64::from(step.level.0))
            .bind(&step.approver_position)
            .bind(encode_json(&step.assignees, "step assignees")?)
            .bind(step.status.as_str())
            .bind(&step.comment)
            .bind(step.actor.as_ref().map(|actor| actor.0.as_str()))
            .bind(step.assigned_at.to_rfc3339())
            .bind(step.completed_at.map(|completed_at| completed_at.to_rfc3339()))
            .bind(i64::from(step.is_clarification))
            .bind(&clarification_json)
            .bind(&step.response_comment)
            .execute(&mut *tx)
            .await
            .map_err(|error| RepositoryError::from_write(error, "request", &request.id.0))?;
        }

        tx.commit().await?;
        Ok(next)
    }

    async fn delete(&self, id: &RequestId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM approval_request WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_steps(&self, id: &RequestId) -> Result<Vec<Step>, RepositoryError> {
        let rows = sqlx::query(STEPS_SELECT).bind(&id.0).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_step).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{SubsecRound, Utc};
    use serde_json::json;

    use ladder_core::domain::approver::{ApproverId, ApproverRef};
    use ladder_core::domain::hierarchy::{
        HierarchyDefinition, HierarchyId, HierarchyKey, Level, LevelNumber, LevelRule,
    };
    use ladder_core::domain::request::{RequestInstance, RequestKind, RequestStatus};
    use ladder_core::domain::step::StepStatus;
    use ladder_core::workflow::{DecisionAction, DecisionCommand, WorkflowEngine};

    use super::SqlRequestRepository;
    use crate::repositories::{
        HierarchyRepository, RepositoryError, RequestRepository, SqlHierarchyRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    fn approver(id: &str) -> ApproverRef {
        ApproverRef::new(id, id, format!("{id}@corp.example")).expect("approver")
    }

    fn hierarchy() -> HierarchyDefinition {
        let now = Utc::now().trunc_subsecs(0);
        HierarchyDefinition {
            id: HierarchyId("H-duty".to_owned()),
            key: HierarchyKey::import_scope("duty", "local"),
            levels: vec![Level {
                number: LevelNumber(1),
                position: "Duty Manager".to_owned(),
                approvers: vec![approver("u-1")],
                enabled: true,
                rule: LevelRule::NoCondition,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    async fn pool_with_hierarchy() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlHierarchyRepository::new(pool.clone()).save(hierarchy()).await.expect("hierarchy");
        pool
    }

    fn submitted() -> RequestInstance {
        let mut request = RequestInstance::draft(
            HierarchyId("H-duty".to_owned()),
            RequestKind::CustomDuty,
            approver("u-req"),
            json!({"amount": "1,200.50", "port": "CGP"}),
            Utc::now().trunc_subsecs(0),
        );
        WorkflowEngine::default()
            .submit(&mut request, &hierarchy(), &ApproverId("u-req".to_owned()), Utc::now())
            .expect("submit");
        request
    }

    #[tokio::test]
    async fn request_round_trips_with_history_and_snapshot() {
        let repo = SqlRequestRepository::new(pool_with_hierarchy().await);
        let mut request = submitted();

        request.version = repo.save(request.clone()).await.expect("save");
        let stored = repo.find_by_id(&request.id).await.expect("find").expect("present");

        assert_eq!(request.version, 1);
        assert_eq!(stored, request);
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(repo.list_steps(&request.id).await.expect("steps").len(), 2);
    }

    fn decision(action: DecisionAction, comment: &str) -> DecisionCommand {
        DecisionCommand {
            level: LevelNumber(1),
            action,
            comment: Some(comment.to_owned()),
            actor: ApproverId("u-1".to_owned()),
            target: None,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stale_copy_is_rejected_after_a_decision() {
        let repo = SqlRequestRepository::new(pool_with_hierarchy().await);
        let mut request = submitted();
        request.version = repo.save(request.clone()).await.expect("initial save");
        let mut stale = request.clone();

        let engine = WorkflowEngine::default();
        let approve = decision(DecisionAction::Approved, "cleared");
        engine.decide(&mut request, approve).expect("approve");
        assert_eq!(repo.save(request.clone()).await.expect("save decision"), 2);

        let decline = decision(DecisionAction::Declined, "too late");
        engine.decide(&mut stale, decline).expect("decline");
        let error = repo.save(stale).await.expect_err("stale copy must not be written");
        assert!(matches!(error, RepositoryError::Conflict { entity: "request", .. }), "{error}");

        let stored = repo.find_by_id(&request.id).await.expect("find").expect("present");
        assert_eq!(stored.status, RequestStatus::Approved);
        assert_eq!(stored.version, 2);
        let steps = stored.history.steps();
        assert_eq!(steps[1].status, StepStatus::Approved);
        assert_eq!(steps[1].comment.as_deref(), Some("cleared"));
        assert!(steps[1].completed_at.is_some());
    }

    #[tokio::test]
    async fn new_request_cannot_be_inserted_twice() {
        let repo = SqlRequestRepository::new(pool_with_hierarchy().await);
        let request = submitted();

        repo.save(request.clone()).await.expect("first insert");
        let error = repo.save(request).await.expect_err("second insert");
        assert!(matches!(error, RepositoryError::Conflict { .. }), "{error}");
    }

    #[tokio::test]
    async fn delete_removes_request_and_steps() {
        let repo = SqlRequestRepository::new(pool_with_hierarchy().await);
        let request = submitted();
        repo.save(request.clone()).await.expect("save");

        assert!(repo.delete(&request.id).await.expect("delete"));
        assert!(repo.find_by_id(&request.id).await.expect("find").is_none());
        assert!(repo.list_steps(&request.id).await.expect("steps").is_empty());
        assert!(!repo.delete(&request.id).await.expect("second delete"));
    }
}
