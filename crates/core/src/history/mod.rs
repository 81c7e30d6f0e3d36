//! Display projection of a request's step log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approver::{ApproverId, ApproverRef};
use crate::domain::hierarchy::LevelNumber;
use crate::domain::step::{ClarificationTarget, Step, StepId, StepStatus};

pub const RAISED_BY: &str = "Raised By";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationEntry {
    pub step_id: StepId,
    pub target: ClarificationTarget,
    pub asked_by: Option<ApproverId>,
    pub question: Option<String>,
    pub answered_by: Option<ApproverId>,
    pub response: Option<String>,
    pub asked_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step_id: StepId,
    pub label: String,
    pub status_text: String,
    pub level: LevelNumber,
    pub approver_position: String,
    pub assignees: Vec<ApproverRef>,
    pub actor: Option<ApproverId>,
    pub comment: Option<String>,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub clarifications: Vec<ClarificationEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RenderedHistory {
    pub entries: Vec<HistoryEntry>,
    pub open_clarifications: usize,
}

/// Labels the main sequence and folds resolved clarifications into the entry
/// that raised them.
///
/// The requester's entry is always "Raised By". Every other entry is
/// "Step {n}" where `n` counts its position among non-clarification steps,
/// so the first approver entry after the requester is "Step 2".
pub fn render_history(steps: &[Step]) -> RenderedHistory {
    let mut ordered: Vec<&Step> = steps.iter().collect();
    ordered.sort_by_key(|step| step.sequence);

    let mut entries: Vec<HistoryEntry> = Vec::new();
    for (index, step) in ordered.iter().filter(|step| !step.is_clarification).enumerate() {
        let raised_by = step.level.is_requester() || step.status == StepStatus::Submitted;
        let label = if raised_by { RAISED_BY.to_owned() } else { format!("Step {}", index + 1) };
        let status_text = if step.status == StepStatus::Submitted {
            RAISED_BY.to_owned()
        } else {
            step.status.label().to_owned()
        };

        entries.push(HistoryEntry {
            step_id: step.id.clone(),
            label,
            status_text,
            level: step.level,
            approver_position: step.approver_position.clone(),
            assignees: step.assignees.clone(),
            actor: step.actor.clone(),
            comment: step.comment.clone(),
            assigned_at: step.assigned_at,
            completed_at: step.completed_at,
            clarifications: Vec::new(),
        });
    }

    let mut open_clarifications = 0;
    for step in ordered.iter().filter(|step| step.is_clarification) {
        if step.is_open() {
            open_clarifications += 1;
            continue;
        }
        let Some(clarification) = &step.clarification else {
            continue;
        };
        let Some(origin) =
            entries.iter_mut().find(|entry| entry.step_id == clarification.origin_step)
        else {
            continue;
        };

        origin.clarifications.push(ClarificationEntry {
            step_id: step.id.clone(),
            target: clarification.target.clone(),
            asked_by: asker(steps, step),
            question: step.comment.clone(),
            answered_by: step.actor.clone(),
            response: step.response_comment.clone(),
            asked_at: step.assigned_at,
            answered_at: step.completed_at,
        });
    }

    RenderedHistory { entries, open_clarifications }
}

// A closed clarification's `actor` is whoever answered; the asker is the
// origin step's assignee set, so report the first assignee when we can.
fn asker(steps: &[Step], clarification: &Step) -> Option<ApproverId> {
    let origin = clarification.clarification.as_ref()?.origin_step.clone();
    steps
        .iter()
        .find(|step| step.id == origin)
        .and_then(|step| {
            step.actor.clone().or_else(|| step.assignees.first().map(|first| first.id.clone()))
        })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::render_history;
    use crate::domain::approver::{ApproverId, ApproverRef};
    use crate::domain::hierarchy::{
        HierarchyDefinition, HierarchyId, HierarchyKey, Level, LevelNumber, LevelRule,
    };
    use crate::domain::request::{RequestInstance, RequestKind};
    use crate::workflow::{ClarificationReply, DecisionAction, DecisionCommand, WorkflowEngine};

    fn approver(id: &str) -> ApproverRef {
        ApproverRef::new(id, id, format!("{id}@corp.example")).expect("valid approver")
    }

    fn definition() -> HierarchyDefinition {
        let level = |number: u32, id: &str| Level {
            number: LevelNumber(number),
            position: format!("Manager {number}"),
            approvers: vec![approver(id)],
            enabled: true,
            rule: LevelRule::NoCondition,
        };
        HierarchyDefinition {
            id: HierarchyId("H-1".to_owned()),
            key: HierarchyKey::import_scope("sea", "local"),
            levels: vec![level(1, "u-1"), level(2, "u-2")],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn submitted() -> RequestInstance {
        let mut request = RequestInstance::draft(
            HierarchyId("H-1".to_owned()),
            RequestKind::CustomDuty,
            approver("u-req"),
            json!({}),
            Utc::now(),
        );
        WorkflowEngine::default()
            .submit(&mut request, &definition(), &ApproverId("u-req".to_owned()), Utc::now())
            .expect("submit");
        request
    }

    #[test]
    fn requester_and_first_level_are_labelled() {
        let request = submitted();

        let rendered = render_history(request.history.steps());
        let labels: Vec<&str> = rendered.entries.iter().map(|entry| entry.label.as_str()).collect();

        assert_eq!(labels, vec!["Raised By", "Step 2"]);
        assert_eq!(rendered.entries[0].status_text, "Raised By");
        assert_eq!(rendered.entries[1].status_text, "Pending");
    }

    #[test]
    fn clarifications_are_folded_only_once_resolved() {
        let engine = WorkflowEngine::default();
        let mut request = submitted();
        engine
            .decide(
                &mut request,
                DecisionCommand {
                    level: LevelNumber(1),
                    action: DecisionAction::NeedClarification,
                    comment: Some("which port?".to_owned()),
                    actor: ApproverId("u-1".to_owned()),
                    target: None,
                    at: Utc::now(),
                },
            )
            .expect("ask");

        let open = render_history(request.history.steps());
        assert_eq!(open.entries.len(), 2);
        assert_eq!(open.open_clarifications, 1);
        assert!(open.entries[1].clarifications.is_empty());

        engine
            .respond_to_clarification(
                &mut request,
                ClarificationReply {
                    step_id: None,
                    response: "Chittagong".to_owned(),
                    actor: ApproverId("u-req".to_owned()),
                    at: Utc::now(),
                },
            )
            .expect("answer");
        engine
            .decide(
                &mut request,
                DecisionCommand {
                    level: LevelNumber(1),
                    action: DecisionAction::Approved,
                    comment: None,
                    actor: ApproverId("u-1".to_owned()),
                    target: None,
                    at: Utc::now(),
                },
            )
            .expect("approve");

        let rendered = render_history(request.history.steps());
        let labels: Vec<&str> = rendered.entries.iter().map(|entry| entry.label.as_str()).collect();
        assert_eq!(labels, vec!["Raised By", "Step 2", "Step 3"]);
        assert_eq!(rendered.open_clarifications, 0);

        let folded = &rendered.entries[1].clarifications;
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].question.as_deref(), Some("which port?"));
        assert_eq!(folded[0].response.as_deref(), Some("Chittagong"));
        assert_eq!(folded[0].asked_by.as_ref().map(ApproverId::as_str), Some("u-1"));
        assert_eq!(rendered.entries[1].status_text, "Approved");
    }
}
