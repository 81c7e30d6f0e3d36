use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approver::{ApproverId, ApproverRef};
use crate::domain::hierarchy::LevelNumber;
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn generate() -> Self {
        Self(format!("STP-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Submitted,
    Pending,
    Approved,
    Declined,
    NeedClarification,
    Answered,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::NeedClarification => "need_clarification",
            Self::Answered => "answered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "declined" => Some(Self::Declined),
            "need_clarification" => Some(Self::NeedClarification),
            "answered" => Some(Self::Answered),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Declined => "Declined",
            Self::NeedClarification => "Need Clarification",
            Self::Answered => "Answered",
        }
    }
}

/// Who a clarification question is addressed to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClarificationTarget {
    Requester,
    ApproverPosition { level: LevelNumber },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub target: ClarificationTarget,
    pub origin_step: StepId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub sequence: u32,
    pub level: LevelNumber,
    pub approver_position: String,
    pub assignees: Vec<ApproverRef>,
    pub status: StepStatus,
    pub comment: Option<String>,
    pub actor: Option<ApproverId>,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_clarification: bool,
    pub clarification: Option<Clarification>,
    pub response_comment: Option<String>,
}

impl Step {
    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }

    pub fn is_assigned_to(&self, actor: &ApproverId) -> bool {
        self.assignees.iter().any(|assignee| assignee.is(actor))
    }
}

/// Fields for a step that is about to be appended; the log assigns id and sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewStep {
    pub level: LevelNumber,
    pub approver_position: String,
    pub assignees: Vec<ApproverRef>,
    pub status: StepStatus,
    pub comment: Option<String>,
    pub actor: Option<ApproverId>,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub clarification: Option<Clarification>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepCompletion {
    pub status: StepStatus,
    pub actor: ApproverId,
    pub comment: Option<String>,
    pub response_comment: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Append-only log of a request's steps.
///
/// Steps are never removed or reordered. The only mutation after append is
/// [`ApprovalHistory::complete`], which sets `completed_at` exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ApprovalHistory {
    steps: Vec<Step>,
}

impl ApprovalHistory {
    /// Rebuilds a log from storage, restoring sequence order.
    pub fn from_steps(mut steps: Vec<Step>) -> Self {
        steps.sort_by(|left, right| {
            left.sequence
                .cmp(&right.sequence)
                .then_with(|| left.assigned_at.cmp(&right.assigned_at))
        });
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn append(&mut self, new_step: NewStep) -> &Step {
        let sequence = self.steps.last().map_or(0, |step| step.sequence + 1);
        self.steps.push(Step {
            id: StepId::generate(),
            sequence,
            level: new_step.level,
            approver_position: new_step.approver_position,
            assignees: new_step.assignees,
            status: new_step.status,
            comment: new_step.comment,
            actor: new_step.actor,
            assigned_at: new_step.assigned_at,
            completed_at: new_step.completed_at,
            is_clarification: new_step.clarification.is_some(),
            clarification: new_step.clarification,
            response_comment: None,
        });
        let index = self.steps.len() - 1;
        &self.steps[index]
    }

    pub fn complete(
        &mut self,
        step_id: &StepId,
        completion: StepCompletion,
    ) -> Result<&Step, WorkflowError> {
        let step = self
            .steps
            .iter_mut()
            .find(|step| &step.id == step_id)
            .ok_or_else(|| WorkflowError::UnknownStep { step_id: step_id.clone() })?;

        if !step.is_open() {
            return Err(WorkflowError::StepAlreadyCompleted { step_id: step_id.clone() });
        }

        step.status = completion.status;
        step.actor = Some(completion.actor);
        if completion.comment.is_some() {
            step.comment = completion.comment;
        }
        step.response_comment = completion.response_comment;
        step.completed_at = Some(completion.completed_at);
        Ok(step)
    }

    /// The open decision step for `level`, if any.
    pub fn open_level_step(&self, level: LevelNumber) -> Option<&Step> {
        self.steps
            .iter()
            .rev()
            .find(|step| !step.is_clarification && step.level == level && step.is_open())
    }

    pub fn open_clarification(&self) -> Option<&Step> {
        self.steps.iter().rev().find(|step| step.is_clarification && step.is_open())
    }

    pub fn find(&self, step_id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|step| &step.id == step_id)
    }
}
