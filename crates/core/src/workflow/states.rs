use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::hierarchy::LevelNumber;
use crate::domain::request::RequestStatus;
use crate::domain::step::{ClarificationTarget, StepId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approved,
    Declined,
    NeedClarification,
}

impl DecisionAction {
    pub fn requires_comment(&self) -> bool {
        matches!(self, Self::Declined | Self::NeedClarification)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "declined" | "decline" | "rejected" | "reject" => Some(Self::Declined),
            "need_clarification" | "needclarification" | "clarify" => {
                Some(Self::NeedClarification)
            }
            _ => None,
        }
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approved => "approve",
            Self::Declined => "decline",
            Self::NeedClarification => "request clarification",
        })
    }
}

/// Event that drove a transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Submitted,
    Decided { action: DecisionAction },
    ClarificationRequested { target: ClarificationTarget },
    ClarificationAnswered,
}

/// Why a level was passed over while resolving the next approver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    NoApprovers,
    ConditionNotMet,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLevel {
    pub level: LevelNumber,
    pub reason: SkipReason,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub event: WorkflowEvent,
    pub from_level: LevelNumber,
    pub to_level: LevelNumber,
    pub skipped_levels: Vec<SkippedLevel>,
    pub appended_steps: Vec<StepId>,
    pub completed_steps: Vec<StepId>,
}
