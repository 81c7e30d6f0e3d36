use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::approver::{ApproverId, ApproverRef};
use crate::domain::hierarchy::{
    HierarchyDefinition, HierarchySnapshot, Level, LevelNumber, LevelRule,
};
use crate::domain::request::{RequestInstance, RequestStatus};
use crate::domain::step::{
    Clarification, ClarificationTarget, NewStep, StepCompletion, StepId, StepStatus,
};
use crate::errors::{ValidationError, WorkflowError};
use crate::workflow::states::{
    DecisionAction, SkipReason, SkippedLevel, TransitionOutcome, WorkflowEvent,
};

pub const REQUESTER_POSITION: &str = "Requester";

/// Picks the next level a request moves to after `after`.
pub trait LevelResolver {
    fn next_level(&self, snapshot: &HierarchySnapshot, after: LevelNumber, payload: &Value)
        -> Resolution;
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Resolution {
    pub next: Option<Level>,
    pub skipped: Vec<SkippedLevel>,
}

/// Walks levels in ascending order and takes the first one that is enabled,
/// has approvers in the snapshot, and whose rule holds for the payload.
#[derive(Clone, Debug, Default)]
pub struct SequentialResolver;

impl LevelResolver for SequentialResolver {
    fn next_level(
        &self,
        snapshot: &HierarchySnapshot,
        after: LevelNumber,
        payload: &Value,
    ) -> Resolution {
        let mut skipped = Vec::new();

        for level in snapshot.levels_after(after) {
            let reason = if !level.enabled {
                Some(SkipReason::Disabled)
            } else if !level.has_approvers() {
                Some(SkipReason::NoApprovers)
            } else {
                match &level.rule {
                    LevelRule::Conditional { predicate } if !predicate.evaluate(payload) => {
                        Some(SkipReason::ConditionNotMet)
                    }
                    _ => None,
                }
            };

            match reason {
                Some(reason) => skipped.push(SkippedLevel { level: level.number, reason }),
                None => return Resolution { next: Some(level.clone()), skipped },
            }
        }

        Resolution { next: None, skipped }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionCommand {
    pub level: LevelNumber,
    pub action: DecisionAction,
    pub comment: Option<String>,
    pub actor: ApproverId,
    /// Only read for `NeedClarification`; defaults to the requester.
    pub target: Option<ClarificationTarget>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClarificationReply {
    /// When set, the reply must close exactly this clarification step.
    pub step_id: Option<StepId>,
    pub response: String,
    pub actor: ApproverId,
    pub at: DateTime<Utc>,
}

pub fn validate_decision_comment(
    action: DecisionAction,
    comment: Option<&str>,
) -> Result<(), ValidationError> {
    let blank = comment.map_or(true, |comment| comment.trim().is_empty());
    if action.requires_comment() && blank {
        return Err(ValidationError::MissingComment { action });
    }
    Ok(())
}

pub fn validate_clarification_response(response: &str) -> Result<(), ValidationError> {
    if response.trim().is_empty() {
        return Err(ValidationError::EmptyResponse);
    }
    Ok(())
}

pub struct WorkflowEngine<R> {
    resolver: R,
}

impl<R> WorkflowEngine<R>
where
    R: LevelResolver,
{
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Draft -> Submitted -> Pending(first eligible level), or straight to
    /// Approved when no level applies.
    pub fn submit(
        &self,
        request: &mut RequestInstance,
        hierarchy: &HierarchyDefinition,
        actor: &ApproverId,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        if request.status != RequestStatus::Draft {
            return Err(WorkflowError::InvalidTransition {
                status: request.status,
                operation: "submit",
            });
        }
        if !request.requester.is(actor) {
            return Err(WorkflowError::NotRequester { operation: "submit the request" });
        }
        if request.hierarchy_id != hierarchy.id {
            return Err(WorkflowError::HierarchyMismatch {
                expected: request.hierarchy_id.0.clone(),
                found: hierarchy.id.0.clone(),
            });
        }
        hierarchy.validate()?;

        let snapshot = hierarchy.snapshot(at);
        let resolution =
            self.resolver.next_level(&snapshot, LevelNumber::REQUESTER, &request.payload);
        let from = request.status;

        request.status = RequestStatus::Submitted;
        request.snapshot = Some(snapshot);
        let raised_by = request
            .history
            .append(NewStep {
                level: LevelNumber::REQUESTER,
                approver_position: REQUESTER_POSITION.to_owned(),
                assignees: vec![request.requester.clone()],
                status: StepStatus::Submitted,
                comment: None,
                actor: Some(request.requester.id.clone()),
                assigned_at: at,
                completed_at: Some(at),
                clarification: None,
            })
            .id
            .clone();

        let mut appended_steps = vec![raised_by];
        let from_level = request.current_level;
        if let Some(step_id) = move_to(request, resolution.next.as_ref(), at) {
            appended_steps.push(step_id);
        }
        request.updated_at = at;

        Ok(TransitionOutcome {
            from,
            to: request.status,
            event: WorkflowEvent::Submitted,
            from_level,
            to_level: request.current_level,
            skipped_levels: resolution.skipped,
            appended_steps,
            completed_steps: Vec::new(),
        })
    }

    pub fn decide(
        &self,
        request: &mut RequestInstance,
        command: DecisionCommand,
    ) -> Result<TransitionOutcome, WorkflowError> {
        validate_decision_comment(command.action, command.comment.as_deref())?;

        match request.status {
            RequestStatus::Pending => {}
            RequestStatus::ClarificationNeeded => return Err(WorkflowError::ClarificationOpen),
            status => {
                return Err(WorkflowError::InvalidTransition { status, operation: "decide on" })
            }
        }

        let current = request.current_level;
        if command.level != current {
            return Err(WorkflowError::StaleLevel { requested: command.level, current });
        }

        let snapshot = request.snapshot.as_ref().ok_or(WorkflowError::MissingSnapshot)?;
        let step = request
            .history
            .open_level_step(current)
            .ok_or(WorkflowError::MissingPendingStep { level: current })?;
        if !step.is_assigned_to(&command.actor) {
            return Err(WorkflowError::ActorNotAssigned {
                actor: command.actor.0.clone(),
                level: current,
            });
        }
        let step_id = step.id.clone();
        let comment = command.comment.map(|comment| comment.trim().to_owned());
        let from = request.status;

        match command.action {
            DecisionAction::Approved => {
                let resolution = self.resolver.next_level(snapshot, current, &request.payload);
                request.history.complete(
                    &step_id,
                    StepCompletion {
                        status: StepStatus::Approved,
                        actor: command.actor,
                        comment,
                        response_comment: None,
                        completed_at: command.at,
                    },
                )?;

                let appended_steps =
                    move_to(request, resolution.next.as_ref(), command.at).into_iter().collect();
                request.updated_at = command.at;

                Ok(TransitionOutcome {
                    from,
                    to: request.status,
                    event: WorkflowEvent::Decided { action: DecisionAction::Approved },
                    from_level: current,
                    to_level: request.current_level,
                    skipped_levels: resolution.skipped,
                    appended_steps,
                    completed_steps: vec![step_id],
                })
            }
            DecisionAction::Declined => {
                request.history.complete(
                    &step_id,
                    StepCompletion {
                        status: StepStatus::Declined,
                        actor: command.actor,
                        comment,
                        response_comment: None,
                        completed_at: command.at,
                    },
                )?;
                request.status = RequestStatus::Declined;
                request.updated_at = command.at;

                Ok(TransitionOutcome {
                    from,
                    to: request.status,
                    event: WorkflowEvent::Decided { action: DecisionAction::Declined },
                    from_level: current,
                    to_level: current,
                    skipped_levels: Vec::new(),
                    appended_steps: Vec::new(),
                    completed_steps: vec![step_id],
                })
            }
            DecisionAction::NeedClarification => {
                let target = command.target.unwrap_or(ClarificationTarget::Requester);
                let assignees = clarification_assignees(request, snapshot, current, &target)?;
                let clarification_id = request
                    .history
                    .append(NewStep {
                        level: current,
                        approver_position: clarification_position(snapshot, &target),
                        assignees,
                        status: StepStatus::NeedClarification,
                        comment,
                        actor: Some(command.actor),
                        assigned_at: command.at,
                        completed_at: None,
                        clarification: Some(Clarification {
                            target: target.clone(),
                            origin_step: step_id,
                        }),
                    })
                    .id
                    .clone();
                request.status = RequestStatus::ClarificationNeeded;
                request.updated_at = command.at;

                Ok(TransitionOutcome {
                    from,
                    to: request.status,
                    event: WorkflowEvent::ClarificationRequested { target },
                    from_level: current,
                    to_level: current,
                    skipped_levels: Vec::new(),
                    appended_steps: vec![clarification_id],
                    completed_steps: Vec::new(),
                })
            }
        }
    }

    /// Closes the open clarification and hands the decision back to the
    /// originating level. The level step itself is left untouched.
    pub fn respond_to_clarification(
        &self,
        request: &mut RequestInstance,
        reply: ClarificationReply,
    ) -> Result<TransitionOutcome, WorkflowError> {
        validate_clarification_response(&reply.response)?;

        if let Some(step_id) = &reply.step_id {
            let step = request
                .history
                .find(step_id)
                .filter(|step| step.is_clarification)
                .ok_or_else(|| WorkflowError::UnknownStep { step_id: step_id.clone() })?;
            if !step.is_open() {
                return Err(WorkflowError::StepAlreadyCompleted { step_id: step_id.clone() });
            }
        }

        let open = request.history.open_clarification().ok_or(WorkflowError::NoOpenClarification)?;
        if request.status != RequestStatus::ClarificationNeeded {
            return Err(WorkflowError::NoOpenClarification);
        }
        if !open.is_assigned_to(&reply.actor) {
            return Err(WorkflowError::NotClarificationTarget { actor: reply.actor.0.clone() });
        }

        let open_id = open.id.clone();
        request.history.complete(
            &open_id,
            StepCompletion {
                status: StepStatus::Answered,
                actor: reply.actor,
                comment: None,
                response_comment: Some(reply.response.trim().to_owned()),
                completed_at: reply.at,
            },
        )?;

        let from = request.status;
        request.status = RequestStatus::Pending;
        request.updated_at = reply.at;

        Ok(TransitionOutcome {
            from,
            to: request.status,
            event: WorkflowEvent::ClarificationAnswered,
            from_level: request.current_level,
            to_level: request.current_level,
            skipped_levels: Vec::new(),
            appended_steps: Vec::new(),
            completed_steps: vec![open_id],
        })
    }

    pub fn submit_with_audit<S>(
        &self,
        request: &mut RequestInstance,
        hierarchy: &HierarchyDefinition,
        actor: &ApproverId,
        at: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.submit(request, hierarchy, actor, at);
        emit_transition(sink, audit, request, &result);
        result
    }

    pub fn decide_with_audit<S>(
        &self,
        request: &mut RequestInstance,
        command: DecisionCommand,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.decide(request, command);
        emit_transition(sink, audit, request, &result);
        result
    }

    pub fn respond_with_audit<S>(
        &self,
        request: &mut RequestInstance,
        reply: ClarificationReply,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.respond_to_clarification(request, reply);
        emit_transition(sink, audit, request, &result);
        result
    }
}

impl Default for WorkflowEngine<SequentialResolver> {
    fn default() -> Self {
        Self::new(SequentialResolver)
    }
}

/// Points the request at `next` (appending its pending step) or marks it
/// approved when nothing is left.
fn move_to(
    request: &mut RequestInstance,
    next: Option<&Level>,
    at: DateTime<Utc>,
) -> Option<StepId> {
    let Some(level) = next else {
        request.status = RequestStatus::Approved;
        return None;
    };

    request.current_level = level.number;
    request.status = RequestStatus::Pending;
    let step = request.history.append(NewStep {
        level: level.number,
        approver_position: level.position.clone(),
        assignees: level.approvers.clone(),
        status: StepStatus::Pending,
        comment: None,
        actor: None,
        assigned_at: at,
        completed_at: None,
        clarification: None,
    });
    Some(step.id.clone())
}

fn clarification_assignees(
    request: &RequestInstance,
    snapshot: &HierarchySnapshot,
    current: LevelNumber,
    target: &ClarificationTarget,
) -> Result<Vec<ApproverRef>, WorkflowError> {
    match target {
        ClarificationTarget::Requester => Ok(vec![request.requester.clone()]),
        ClarificationTarget::ApproverPosition { level } => {
            if *level == current {
                return Err(WorkflowError::InvalidClarificationTarget {
                    reason: "the asking level cannot target itself".to_owned(),
                });
            }
            let position = snapshot.level(*level).ok_or_else(|| {
                WorkflowError::InvalidClarificationTarget {
                    reason: format!("level {level} is not part of this request's hierarchy"),
                }
            })?;
            if !position.has_approvers() {
                return Err(WorkflowError::InvalidClarificationTarget {
                    reason: format!("level {level} has no approvers to answer"),
                });
            }
            Ok(position.approvers.clone())
        }
    }
}

fn clarification_position(snapshot: &HierarchySnapshot, target: &ClarificationTarget) -> String {
    match target {
        ClarificationTarget::Requester => REQUESTER_POSITION.to_owned(),
        ClarificationTarget::ApproverPosition { level } => snapshot
            .level(*level)
            .map(|position| position.position.clone())
            .unwrap_or_else(|| format!("Level {level}")),
    }
}

fn emit_transition<S>(
    sink: &S,
    audit: &AuditContext,
    request: &RequestInstance,
    result: &Result<TransitionOutcome, WorkflowError>,
) where
    S: AuditSink + ?Sized,
{
    let event = match result {
        Ok(outcome) => {
            let skipped = outcome
                .skipped_levels
                .iter()
                .map(|skipped| skipped.level.to_string())
                .collect::<Vec<_>>()
                .join(",");
            AuditEvent::new(
                Some(request.id.clone()),
                Some(request.hierarchy_id.clone()),
                audit.correlation_id.clone(),
                "workflow.transition_applied",
                AuditCategory::Workflow,
                audit.actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("from", outcome.from.as_str())
            .with_metadata("to", outcome.to.as_str())
            .with_metadata("from_level", outcome.from_level.to_string())
            .with_metadata("to_level", outcome.to_level.to_string())
            .with_metadata("event", format!("{:?}", outcome.event))
            .with_metadata("skipped_levels", skipped)
        }
        Err(error) => AuditEvent::new(
            Some(request.id.clone()),
            Some(request.hierarchy_id.clone()),
            audit.correlation_id.clone(),
            "workflow.transition_rejected",
            AuditCategory::Workflow,
            audit.actor.clone(),
            AuditOutcome::Rejected,
        )
        .with_metadata("status", request.status.as_str())
        .with_metadata("error", error.to_string()),
    };
    sink.emit(event);
}
