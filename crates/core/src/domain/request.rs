use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::approver::ApproverRef;
use crate::domain::hierarchy::{HierarchyId, HierarchySnapshot, LevelNumber};
use crate::domain::step::ApprovalHistory;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("REQ-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Business process a request belongs to; the engine treats all kinds alike.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Capex,
    ImportPayment,
    CustomDuty,
    JournalVoucher,
    Other(String),
}

impl RequestKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Capex => "capex",
            Self::ImportPayment => "import_payment",
            Self::CustomDuty => "custom_duty",
            Self::JournalVoucher => "journal_voucher",
            Self::Other(other) => other,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "capex" => Self::Capex,
            "import_payment" => Self::ImportPayment,
            "custom_duty" => Self::CustomDuty,
            "journal_voucher" | "jvm" => Self::JournalVoucher,
            other => Self::Other(other.to_owned()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Submitted,
    Pending,
    ClarificationNeeded,
    Approved,
    Declined,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::ClarificationNeeded => "clarification_needed",
            Self::Approved => "approved",
            Self::Declined => "declined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "pending" => Some(Self::Pending),
            "clarification_needed" => Some(Self::ClarificationNeeded),
            "approved" => Some(Self::Approved),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestInstance {
    pub id: RequestId,
    pub hierarchy_id: HierarchyId,
    pub kind: RequestKind,
    pub requester: ApproverRef,
    /// Business form data; only conditional rules ever look inside it.
    pub payload: Value,
    pub current_level: LevelNumber,
    pub status: RequestStatus,
    pub snapshot: Option<HierarchySnapshot>,
    pub history: ApprovalHistory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Stored revision, 0 until the first save. A repository only accepts a
    /// save carrying the revision it currently holds.
    #[serde(default)]
    pub version: u64,
}

impl RequestInstance {
    pub fn draft(
        hierarchy_id: HierarchyId,
        kind: RequestKind,
        requester: ApproverRef,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            hierarchy_id,
            kind,
            requester,
            payload,
            current_level: LevelNumber::REQUESTER,
            status: RequestStatus::Draft,
            snapshot: None,
            history: ApprovalHistory::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn can_delete(&self) -> bool {
        self.status == RequestStatus::Draft
    }

    /// Payload edits are the requester's until submission.
    pub fn update_payload(&mut self, payload: Value, now: DateTime<Utc>) -> bool {
        if self.status != RequestStatus::Draft {
            return false;
        }
        self.payload = payload;
        self.updated_at = now;
        true
    }
}
