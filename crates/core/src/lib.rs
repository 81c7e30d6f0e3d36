pub mod audit;
pub mod conditions;
pub mod config;
pub mod domain;
pub mod errors;
pub mod hierarchy;
pub mod history;
pub mod workflow;

pub use conditions::{Clause, Operator, Predicate};
pub use domain::approver::{approvers_from_raw, ApproverId, ApproverRef, RawApprover};
pub use domain::hierarchy::{
    HierarchyDefinition, HierarchyId, HierarchyKey, HierarchySnapshot, Level, LevelNumber,
    LevelRule, ValueBand,
};
pub use domain::request::{RequestId, RequestInstance, RequestKind, RequestStatus};
pub use domain::step::{ApprovalHistory, ClarificationTarget, Step, StepId, StepStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError, ValidationError, WorkflowError};
pub use hierarchy::{HierarchyManager, LevelChange, LevelToggle};
pub use history::{render_history, HistoryEntry, RenderedHistory};
pub use workflow::{
    ClarificationReply, DecisionAction, DecisionCommand, TransitionOutcome, WorkflowEngine,
};
