use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{info, warn};

use ladder_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
};
use ladder_core::domain::approver::{ApproverId, ApproverRef};
use ladder_core::domain::hierarchy::{
    HierarchyDefinition, HierarchyId, HierarchyKey, LevelNumber, LevelRule,
};
use ladder_core::domain::request::{RequestId, RequestInstance, RequestKind, RequestStatus};
use ladder_core::domain::step::Step;
use ladder_core::errors::{ApplicationError, WorkflowError};
use ladder_core::hierarchy::{HierarchyManager, LevelChange, LevelToggle};
use ladder_core::history::{render_history, RenderedHistory};
use ladder_core::workflow::{
    ClarificationReply, DecisionCommand, SequentialResolver, TransitionOutcome, WorkflowEngine,
};
use ladder_db::{HierarchyRepository, RepositoryError, RequestRepository};

/// Result of the enable/disable endpoint. Unconfirmed calls only return the
/// prompt the caller has to acknowledge.
#[derive(Debug)]
pub enum ToggleResult {
    NeedsConfirmation(LevelToggle),
    Applied { change: LevelChange, hierarchy: HierarchyDefinition },
}

pub struct ApprovalService {
    hierarchies: Arc<dyn HierarchyRepository>,
    requests: Arc<dyn RequestRepository>,
    manager: HierarchyManager,
    engine: WorkflowEngine<SequentialResolver>,
    audit: Arc<dyn AuditSink>,
}

impl ApprovalService {
    pub fn new(
        hierarchies: Arc<dyn HierarchyRepository>,
        requests: Arc<dyn RequestRepository>,
        manager: HierarchyManager,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { hierarchies, requests, manager, engine: WorkflowEngine::default(), audit }
    }

    /// Returns the hierarchy stored under `key`, seeding the default skeleton
    /// the first time a key is looked up.
    pub async fn lookup_hierarchy(
        &self,
        key: HierarchyKey,
        correlation_id: &str,
    ) -> Result<HierarchyDefinition, ApplicationError> {
        key.validate()?;
        if let Some(existing) = self.hierarchies.find_by_key(&key).await.map_err(persistence)? {
            return Ok(existing);
        }

        let definition = self.manager.default_skeleton(HierarchyId::generate(), key, Utc::now())?;
        match self.hierarchies.save(definition.clone()).await {
            Ok(()) => {}
            // A concurrent lookup seeded the same key first.
            Err(RepositoryError::Conflict { .. }) => {
                return self
                    .hierarchies
                    .find_by_key(&definition.key)
                    .await
                    .map_err(persistence)?
                    .ok_or_else(|| {
                        ApplicationError::Conflict(format!(
                            "hierarchy `{}` could not be seeded",
                            definition.key.storage_key()
                        ))
                    });
            }
            Err(error) => return Err(persistence(error)),
        }
        info!(
            event_name = "hierarchy.skeleton_seeded",
            correlation_id,
            hierarchy_id = %definition.id,
            storage_key = %definition.key.storage_key(),
            levels = definition.levels.len(),
            "seeded default hierarchy skeleton"
        );
        self.audit.emit(
            AuditEvent::new(
                None,
                Some(definition.id.clone()),
                correlation_id,
                "hierarchy.skeleton_seeded",
                AuditCategory::Hierarchy,
                "system",
                AuditOutcome::Success,
            )
            .with_metadata("storage_key", definition.key.storage_key()),
        );
        Ok(definition)
    }

    pub async fn hierarchy_for_amount(
        &self,
        department: &str,
        amount: Decimal,
    ) -> Result<HierarchyDefinition, ApplicationError> {
        self.hierarchies
            .find_for_amount(department, amount)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::NotFound {
                entity: "hierarchy band",
                id: format!("{department}@{amount}"),
            })
    }

    pub async fn get_hierarchy(
        &self,
        id: &HierarchyId,
    ) -> Result<HierarchyDefinition, ApplicationError> {
        self.hierarchies
            .find_by_id(id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::NotFound { entity: "hierarchy", id: id.0.clone() })
    }

    pub async fn set_level_approvers(
        &self,
        id: &HierarchyId,
        level: LevelNumber,
        approvers: Vec<ApproverRef>,
        enabled: Option<bool>,
        correlation_id: &str,
    ) -> Result<(LevelChange, HierarchyDefinition), ApplicationError> {
        let mut definition = self.get_hierarchy(id).await?;
        let change = self.manager.set_level_approvers(
            &mut definition,
            level,
            approvers,
            enabled,
            Utc::now(),
        )?;
        self.store_change(definition, change, correlation_id).await
    }

    pub async fn toggle_level(
        &self,
        id: &HierarchyId,
        level: LevelNumber,
        enabled: bool,
        confirmed: bool,
        correlation_id: &str,
    ) -> Result<ToggleResult, ApplicationError> {
        let mut definition = self.get_hierarchy(id).await?;
        let toggle = self.manager.request_level_toggle(&definition, level, enabled)?;
        if !confirmed {
            return Ok(ToggleResult::NeedsConfirmation(toggle));
        }

        let change = self.manager.confirm_level_toggle(&mut definition, &toggle, Utc::now())?;
        if matches!(change, LevelChange::Toggled { changed: false, .. }) {
            return Ok(ToggleResult::Applied { change, hierarchy: definition });
        }
        let (change, hierarchy) = self.store_change(definition, change, correlation_id).await?;
        Ok(ToggleResult::Applied { change, hierarchy })
    }

    pub async fn set_level_condition(
        &self,
        id: &HierarchyId,
        level: LevelNumber,
        rule: LevelRule,
        correlation_id: &str,
    ) -> Result<(LevelChange, HierarchyDefinition), ApplicationError> {
        let mut definition = self.get_hierarchy(id).await?;
        let change = self.manager.set_level_condition(&mut definition, level, rule, Utc::now())?;
        self.store_change(definition, change, correlation_id).await
    }

    pub async fn add_level(
        &self,
        id: &HierarchyId,
        position: Option<String>,
        correlation_id: &str,
    ) -> Result<(LevelChange, HierarchyDefinition), ApplicationError> {
        let mut definition = self.get_hierarchy(id).await?;
        let change = self.manager.add_level(&mut definition, position, Utc::now())?;
        self.store_change(definition, change, correlation_id).await
    }

    pub async fn create_request(
        &self,
        hierarchy_id: HierarchyId,
        kind: RequestKind,
        requester: ApproverRef,
        payload: Value,
        correlation_id: &str,
    ) -> Result<RequestInstance, ApplicationError> {
        self.get_hierarchy(&hierarchy_id).await?;
        let mut request =
            RequestInstance::draft(hierarchy_id, kind, requester, payload, Utc::now());
        request.version = self.requests.save(request.clone()).await.map_err(persistence)?;
        info!(
            event_name = "request.created",
            correlation_id,
            request_id = %request.id,
            hierarchy_id = %request.hierarchy_id,
            kind = request.kind.as_str(),
            "draft request created"
        );
        Ok(request)
    }

    pub async fn get_request(&self, id: &RequestId) -> Result<RequestInstance, ApplicationError> {
        self.requests
            .find_by_id(id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::NotFound { entity: "request", id: id.0.clone() })
    }

    pub async fn update_payload(
        &self,
        id: &RequestId,
        payload: Value,
    ) -> Result<RequestInstance, ApplicationError> {
        let mut request = self.get_request(id).await?;
        if !request.update_payload(payload, Utc::now()) {
            return Err(WorkflowError::InvalidTransition {
                status: request.status,
                operation: "edit the payload of",
            }
            .into());
        }
        request.version = self.requests.save(request.clone()).await.map_err(persistence)?;
        Ok(request)
    }

    pub async fn delete_request(
        &self,
        id: &RequestId,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let request = self.get_request(id).await?;
        if !request.can_delete() {
            return Err(WorkflowError::InvalidTransition {
                status: request.status,
                operation: "delete",
            }
            .into());
        }
        if !self.requests.delete(id).await.map_err(persistence)? {
            return Err(ApplicationError::NotFound { entity: "request", id: id.0.clone() });
        }
        info!(event_name = "request.deleted", correlation_id, request_id = %id, "draft deleted");
        Ok(())
    }

    pub async fn submit(
        &self,
        id: &RequestId,
        actor: ApproverId,
        correlation_id: &str,
    ) -> Result<(RequestInstance, TransitionOutcome), ApplicationError> {
        let mut request = self.get_request(id).await?;
        let hierarchy = self.get_hierarchy(&request.hierarchy_id).await?;
        let context = self.audit_context(&request, correlation_id, &actor);
        let staged = InMemoryAuditSink::default();

        let outcome = self.engine.submit_with_audit(
            &mut request,
            &hierarchy,
            &actor,
            Utc::now(),
            &staged,
            &context,
        );
        self.finish_transition(request, outcome, staged, &context).await
    }

    pub async fn decide(
        &self,
        id: &RequestId,
        command: DecisionCommand,
        correlation_id: &str,
    ) -> Result<(RequestInstance, TransitionOutcome), ApplicationError> {
        let mut request = self.get_request(id).await?;
        let context = self.audit_context(&request, correlation_id, &command.actor);
        let staged = InMemoryAuditSink::default();

        let outcome = self.engine.decide_with_audit(&mut request, command, &staged, &context);
        self.finish_transition(request, outcome, staged, &context).await
    }

    pub async fn respond_to_clarification(
        &self,
        id: &RequestId,
        reply: ClarificationReply,
        correlation_id: &str,
    ) -> Result<(RequestInstance, TransitionOutcome), ApplicationError> {
        let mut request = self.get_request(id).await?;
        let context = self.audit_context(&request, correlation_id, &reply.actor);
        let staged = InMemoryAuditSink::default();

        let outcome = self.engine.respond_with_audit(&mut request, reply, &staged, &context);
        self.finish_transition(request, outcome, staged, &context).await
    }

    /// Steps in the order they were appended.
    pub async fn history(&self, id: &RequestId) -> Result<Vec<Step>, ApplicationError> {
        self.get_request(id).await?;
        self.requests.list_steps(id).await.map_err(persistence)
    }

    pub async fn rendered_history(
        &self,
        id: &RequestId,
    ) -> Result<RenderedHistory, ApplicationError> {
        let steps = self.history(id).await?;
        Ok(render_history(&steps))
    }

    async fn store_change(
        &self,
        definition: HierarchyDefinition,
        change: LevelChange,
        correlation_id: &str,
    ) -> Result<(LevelChange, HierarchyDefinition), ApplicationError> {
        self.hierarchies.save(definition.clone()).await.map_err(persistence)?;
        info!(
            event_name = change.event_name(),
            correlation_id,
            hierarchy_id = %definition.id,
            level = change.level().0,
            "hierarchy level updated"
        );

        let mut event = AuditEvent::new(
            None,
            Some(definition.id.clone()),
            correlation_id,
            change.event_name(),
            AuditCategory::Hierarchy,
            "system",
            AuditOutcome::Success,
        )
        .with_metadata("level", change.level().to_string());
        if let Ok(detail) = serde_json::to_string(&change) {
            event = event.with_metadata("change", detail);
        }
        self.audit.emit(event);

        Ok((change, definition))
    }

    /// Persists an engine transition. Audit events the engine staged are only
    /// forwarded once the save has committed; a lost write discards them and
    /// records the rejection instead.
    async fn finish_transition(
        &self,
        mut request: RequestInstance,
        outcome: Result<TransitionOutcome, WorkflowError>,
        staged: InMemoryAuditSink,
        context: &AuditContext,
    ) -> Result<(RequestInstance, TransitionOutcome), ApplicationError> {
        let correlation_id = context.correlation_id.as_str();
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "workflow.transition_rejected",
                    correlation_id,
                    request_id = %request.id,
                    status = request.status.as_str(),
                    error = %error,
                    "workflow transition rejected"
                );
                self.forward(staged);
                return Err(error.into());
            }
        };

        match self.requests.save(request.clone()).await {
            Ok(version) => request.version = version,
            Err(error) => {
                warn!(
                    event_name = "workflow.transition_rejected",
                    correlation_id,
                    request_id = %request.id,
                    version = request.version,
                    error = %error,
                    "workflow transition lost to a concurrent write"
                );
                let outcome = match error {
                    RepositoryError::Conflict { .. } => AuditOutcome::Rejected,
                    _ => AuditOutcome::Failed,
                };
                self.audit.emit(
                    AuditEvent::new(
                        Some(request.id.clone()),
                        Some(request.hierarchy_id.clone()),
                        correlation_id,
                        "workflow.transition_rejected",
                        AuditCategory::Persistence,
                        context.actor.clone(),
                        outcome,
                    )
                    .with_metadata("error", error.to_string()),
                );
                return Err(persistence(error));
            }
        }
        self.forward(staged);
        info!(
            event_name = "workflow.transition_applied",
            correlation_id,
            request_id = %request.id,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            level = request.current_level.0,
            skipped = outcome.skipped_levels.len(),
            "workflow transition applied"
        );
        if outcome.to == RequestStatus::Approved && outcome.from != RequestStatus::Approved {
            info!(
                event_name = "workflow.request_approved",
                correlation_id,
                request_id = %request.id,
                "request fully approved"
            );
        }
        Ok((request, outcome))
    }

    fn forward(&self, staged: InMemoryAuditSink) {
        for event in staged.take() {
            self.audit.emit(event);
        }
    }

    fn audit_context(
        &self,
        request: &RequestInstance,
        correlation_id: &str,
        actor: &ApproverId,
    ) -> AuditContext {
        AuditContext::new(
            Some(request.id.clone()),
            Some(request.hierarchy_id.clone()),
            correlation_id,
            actor.as_str(),
        )
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    match error {
        RepositoryError::NotFound { entity, id } => ApplicationError::NotFound { entity, id },
        conflict @ RepositoryError::Conflict { .. } => {
            ApplicationError::Conflict(conflict.to_string())
        }
        other => ApplicationError::Persistence(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use ladder_core::audit::InMemoryAuditSink;
    use ladder_core::domain::approver::{ApproverId, ApproverRef};
    use ladder_core::domain::hierarchy::{HierarchyKey, LevelNumber};
    use ladder_core::domain::request::{RequestKind, RequestStatus};
    use ladder_core::domain::step::StepStatus;
    use ladder_core::errors::{ApplicationError, DomainError, WorkflowError};
    use ladder_core::hierarchy::{HierarchyManager, LevelChange};
    use ladder_core::workflow::{DecisionAction, DecisionCommand};
    use ladder_core::domain::hierarchy::HierarchyDefinition;
    use ladder_core::domain::request::RequestInstance;
    use ladder_db::{
        connect_with_settings, migrations, InMemoryHierarchyRepository, InMemoryRequestRepository,
        SqlHierarchyRepository, SqlRequestRepository,
    };

    use super::{ApprovalService, ToggleResult};
    use crate::test_support::PinnedReads;

    fn service(sink: InMemoryAuditSink) -> ApprovalService {
        ApprovalService::new(
            Arc::new(InMemoryHierarchyRepository::default()),
            Arc::new(InMemoryRequestRepository::default()),
            HierarchyManager::default(),
            Arc::new(sink),
        )
    }

    fn approver(id: &str) -> ApproverRef {
        ApproverRef::new(id, id, format!("{id}@corp.example")).expect("approver")
    }

    #[tokio::test]
    async fn lookup_seeds_skeleton_once() {
        let sink = InMemoryAuditSink::default();
        let service = service(sink.clone());
        let key = HierarchyKey::import_scope("Sea", "Local");

        let first = service.lookup_hierarchy(key.clone(), "c-1").await.expect("seed");
        let second = service.lookup_hierarchy(key, "c-2").await.expect("lookup");

        assert_eq!(first.id, second.id);
        assert_eq!(first.levels.len(), 5);
        assert!(first.levels.iter().all(|level| !level.enabled));
        let seeded = sink
            .events()
            .into_iter()
            .filter(|event| event.event_type == "hierarchy.skeleton_seeded")
            .count();
        assert_eq!(seeded, 1);
    }

    #[tokio::test]
    async fn unconfirmed_toggle_changes_nothing() {
        let service = service(InMemoryAuditSink::default());
        let hierarchy = service
            .lookup_hierarchy(HierarchyKey::import_scope("air", "foreign"), "c")
            .await
            .expect("seed");
        service
            .set_level_approvers(&hierarchy.id, LevelNumber(2), vec![approver("u-2")], None, "c")
            .await
            .expect("staff");

        let pending = service
            .toggle_level(&hierarchy.id, LevelNumber(2), true, false, "c")
            .await
            .expect("prompt");
        assert!(matches!(pending, ToggleResult::NeedsConfirmation(ref toggle)
            if toggle.prompt == "Are you sure you want to enable Level 2?"));
        let stored = service.get_hierarchy(&hierarchy.id).await.expect("stored");
        assert!(!stored.levels[1].enabled);

        let applied = service
            .toggle_level(&hierarchy.id, LevelNumber(2), true, true, "c")
            .await
            .expect("applied");
        assert!(matches!(
            applied,
            ToggleResult::Applied { change: LevelChange::Toggled { changed: true, .. }, .. }
        ));
        let stored = service.get_hierarchy(&hierarchy.id).await.expect("stored");
        assert!(stored.levels[1].enabled);
    }

    #[tokio::test]
    async fn full_approval_flow_persists_every_step() {
        let service = service(InMemoryAuditSink::default());
        let hierarchy = service
            .lookup_hierarchy(HierarchyKey::import_scope("sea", "local"), "c")
            .await
            .expect("seed");
        service
            .set_level_approvers(
                &hierarchy.id,
                LevelNumber(1),
                vec![approver("u-1")],
                Some(true),
                "c",
            )
            .await
            .expect("staff level 1");

        let request = service
            .create_request(
                hierarchy.id.clone(),
                RequestKind::ImportPayment,
                approver("u-req"),
                json!({"amount": 100}),
                "c",
            )
            .await
            .expect("draft");

        let (submitted, _) = service
            .submit(&request.id, ApproverId("u-req".to_owned()), "c")
            .await
            .expect("submit");
        assert_eq!(submitted.status, RequestStatus::Pending);
        assert_eq!(submitted.current_level, LevelNumber(1));

        let (approved, outcome) = service
            .decide(
                &request.id,
                DecisionCommand {
                    level: LevelNumber(1),
                    action: DecisionAction::Approved,
                    comment: None,
                    actor: ApproverId("u-1".to_owned()),
                    target: None,
                    at: Utc::now(),
                },
                "c",
            )
            .await
            .expect("approve");
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(outcome.to, RequestStatus::Approved);

        let steps = service.history(&request.id).await.expect("history");
        assert_eq!(steps.len(), 2);
        let rendered = service.rendered_history(&request.id).await.expect("rendered");
        assert_eq!(rendered.entries[0].label, "Raised By");
    }

    #[tokio::test]
    async fn submitted_request_cannot_be_deleted() {
        let service = service(InMemoryAuditSink::default());
        let hierarchy = service
            .lookup_hierarchy(HierarchyKey::import_scope("sea", "local"), "c")
            .await
            .expect("seed");
        let request = service
            .create_request(
                hierarchy.id.clone(),
                RequestKind::CustomDuty,
                approver("u-req"),
                json!({}),
                "c",
            )
            .await
            .expect("draft");
        service.submit(&request.id, ApproverId("u-req".to_owned()), "c").await.expect("submit");

        let error = service.delete_request(&request.id, "c").await.expect_err("not deletable");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Workflow(WorkflowError::InvalidTransition {
                operation: "delete",
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn rejected_transition_is_not_persisted() {
        let service = service(InMemoryAuditSink::default());
        let hierarchy = service
            .lookup_hierarchy(HierarchyKey::import_scope("sea", "local"), "c")
            .await
            .expect("seed");
        let request = service
            .create_request(hierarchy.id, RequestKind::Capex, approver("u-req"), json!({}), "c")
            .await
            .expect("draft");

        service
            .submit(&request.id, ApproverId("someone-else".to_owned()), "c")
            .await
            .expect_err("only the requester submits");

        let stored = service.get_request(&request.id).await.expect("stored");
        assert_eq!(stored.status, RequestStatus::Draft);
        assert!(stored.history.is_empty());
    }

    fn decision(action: DecisionAction, actor: &str) -> DecisionCommand {
        DecisionCommand {
            level: LevelNumber(1),
            action,
            comment: Some(format!("{actor} decided")),
            actor: ApproverId(actor.to_owned()),
            target: None,
            at: Utc::now(),
        }
    }

    /// One enabled level shared by two approvers, with a submitted request on it.
    async fn pending_on_shared_level(service: &ApprovalService) -> RequestInstance {
        let hierarchy: HierarchyDefinition = service
            .lookup_hierarchy(HierarchyKey::import_scope("sea", "local"), "c")
            .await
            .expect("seed");
        service
            .set_level_approvers(
                &hierarchy.id,
                LevelNumber(1),
                vec![approver("u-1"), approver("u-2")],
                Some(true),
                "c",
            )
            .await
            .expect("staff level 1");
        let request = service
            .create_request(hierarchy.id, RequestKind::Capex, approver("u-req"), json!({}), "c")
            .await
            .expect("draft");
        let (submitted, _) = service
            .submit(&request.id, ApproverId("u-req".to_owned()), "c")
            .await
            .expect("submit");
        submitted
    }

    #[tokio::test]
    async fn decision_on_a_stale_read_is_a_conflict() {
        let sink = InMemoryAuditSink::default();
        let requests = Arc::new(PinnedReads::default());
        let service = ApprovalService::new(
            Arc::new(InMemoryHierarchyRepository::default()),
            requests.clone(),
            HierarchyManager::default(),
            Arc::new(sink.clone()),
        );
        let request = pending_on_shared_level(&service).await;
        requests.pin(&request.id).await;

        service
            .decide(&request.id, decision(DecisionAction::Approved, "u-1"), "c-approve")
            .await
            .expect("first decision wins");
        let error = service
            .decide(&request.id, decision(DecisionAction::Declined, "u-2"), "c-decline")
            .await
            .expect_err("second decision read a stale copy");
        assert!(matches!(error, ApplicationError::Conflict(_)), "{error}");

        let stored = requests.stored(&request.id).await;
        assert_eq!(stored.status, RequestStatus::Approved);
        assert_eq!(stored.history.steps()[1].actor, Some(ApproverId("u-1".to_owned())));

        let events = sink.events();
        let losing: Vec<_> =
            events.iter().filter(|event| event.correlation_id == "c-decline").collect();
        assert_eq!(losing.len(), 1);
        assert_eq!(losing[0].event_type, "workflow.transition_rejected");
        assert!(events.iter().any(|event| event.correlation_id == "c-approve"
            && event.event_type == "workflow.transition_applied"));
    }

    #[tokio::test]
    async fn racing_decisions_on_the_last_level_commit_once() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let sink = InMemoryAuditSink::default();
        let service = ApprovalService::new(
            Arc::new(SqlHierarchyRepository::new(pool.clone())),
            Arc::new(SqlRequestRepository::new(pool)),
            HierarchyManager::default(),
            Arc::new(sink.clone()),
        );
        let request = pending_on_shared_level(&service).await;

        let (approve, decline) = tokio::join!(
            service.decide(&request.id, decision(DecisionAction::Approved, "u-1"), "c-1"),
            service.decide(&request.id, decision(DecisionAction::Declined, "u-2"), "c-2"),
        );
        assert_eq!(usize::from(approve.is_ok()) + usize::from(decline.is_ok()), 1);

        let stored = service.get_request(&request.id).await.expect("stored");
        let step = &stored.history.steps()[1];
        let (status, step_status, winner) = if approve.is_ok() {
            (RequestStatus::Approved, StepStatus::Approved, "u-1")
        } else {
            (RequestStatus::Declined, StepStatus::Declined, "u-2")
        };
        assert_eq!(stored.status, status);
        assert_eq!(step.status, step_status);
        assert_eq!(step.actor.as_ref().map(ApproverId::as_str), Some(winner));
        let applied = sink
            .events()
            .into_iter()
            .filter(|event| {
                event.event_type == "workflow.transition_applied"
                    && event.metadata.get("to").is_some_and(|to| to != "pending")
            })
            .count();
        assert_eq!(applied, 1);
    }
}
