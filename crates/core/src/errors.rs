use thiserror::Error;

use crate::domain::hierarchy::LevelNumber;
use crate::domain::request::RequestStatus;
use crate::domain::step::StepId;
use crate::workflow::DecisionAction;

/// Input problems detected before any state change or network dispatch.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a comment is required to {action}")]
    MissingComment { action: DecisionAction },
    #[error("a clarification response cannot be empty")]
    EmptyResponse,
    #[error("level {level} is enabled and needs at least one approver")]
    EmptyApproverSet { level: LevelNumber },
    #[error("level 0 is reserved for the requester and cannot be edited")]
    ReservedLevel,
    #[error("level {level} does not exist in this hierarchy")]
    UnknownLevel { level: LevelNumber },
    #[error("level {level} appears more than once")]
    DuplicateLevel { level: LevelNumber },
    #[error("levels must be contiguous from 1: expected {expected}, found {found}")]
    NonContiguousLevels { expected: LevelNumber, found: LevelNumber },
    #[error("invalid condition: {reason}")]
    InvalidCondition { reason: String },
    #[error("invalid approver: {reason}")]
    InvalidApprover { reason: String },
    #[error("invalid hierarchy key: {reason}")]
    InvalidKey { reason: String },
    #[error("skeleton level count must be in 1..={max}, got {requested}")]
    InvalidSkeletonSize { requested: u32, max: u32 },
}

/// Rejected transitions of the step-progression state machine.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("cannot {operation} a request in status {status:?}")]
    InvalidTransition { status: RequestStatus, operation: &'static str },
    #[error("decision targets level {requested} but the request is at level {current}")]
    StaleLevel { requested: LevelNumber, current: LevelNumber },
    #[error("`{actor}` is not an assigned approver for level {level}")]
    ActorNotAssigned { actor: String, level: LevelNumber },
    #[error("only the requester may {operation}")]
    NotRequester { operation: &'static str },
    #[error("a clarification is still open for this request")]
    ClarificationOpen,
    #[error("there is no open clarification to respond to")]
    NoOpenClarification,
    #[error("`{actor}` is not the target of the open clarification")]
    NotClarificationTarget { actor: String },
    #[error("invalid clarification target: {reason}")]
    InvalidClarificationTarget { reason: String },
    #[error("step `{step_id}` was already completed")]
    StepAlreadyCompleted { step_id: StepId },
    #[error("step `{step_id}` is not part of this request")]
    UnknownStep { step_id: StepId },
    #[error("request has no hierarchy snapshot")]
    MissingSnapshot,
    #[error("no pending step exists for level {level}")]
    MissingPendingStep { level: LevelNumber },
    #[error("request references hierarchy `{expected}` but `{found}` was supplied")]
    HierarchyMismatch { expected: String, found: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<ValidationError> for ApplicationError {
    fn from(value: ValidationError) -> Self {
        Self::Domain(DomainError::Validation(value))
    }
}

impl From<WorkflowError> for ApplicationError {
    fn from(value: WorkflowError) -> Self {
        Self::Domain(DomainError::Workflow(value))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record changed state before this action was applied. Reload and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Workflow(
                error @ (WorkflowError::InvalidTransition { .. }
                | WorkflowError::StaleLevel { .. }
                | WorkflowError::ClarificationOpen
                | WorkflowError::NoOpenClarification
                | WorkflowError::StepAlreadyCompleted { .. }
                | WorkflowError::MissingPendingStep { .. }),
            )) => Self::Conflict { message: error.to_string(), correlation_id: unassigned() },
            ApplicationError::Conflict(message) => {
                Self::Conflict { message, correlation_id: unassigned() }
            }
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::NotFound { .. } => {
                Self::NotFound { message: value.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::hierarchy::LevelNumber;
    use crate::domain::request::RequestStatus;
    use crate::errors::{ApplicationError, InterfaceError, ValidationError, WorkflowError};
    use crate::workflow::DecisionAction;

    #[test]
    fn validation_error_maps_to_bad_request_with_message() {
        let interface = ApplicationError::from(ValidationError::MissingComment {
            action: DecisionAction::Declined,
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert_eq!(interface.message(), "a comment is required to decline");
    }

    #[test]
    fn state_conflicts_map_to_conflict() {
        let interface = ApplicationError::from(WorkflowError::InvalidTransition {
            status: RequestStatus::Approved,
            operation: "decide on",
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(
            interface.user_message(),
            "The record changed state before this action was applied. Reload and try again."
        );
    }

    #[test]
    fn actor_errors_stay_bad_requests() {
        let interface = ApplicationError::from(WorkflowError::ActorNotAssigned {
            actor: "u-9".to_owned(),
            level: LevelNumber(2),
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
    }

    #[test]
    fn not_found_and_persistence_mapping() {
        let missing = ApplicationError::NotFound { entity: "request", id: "REQ-1".to_owned() }
            .into_interface("req-4");
        assert!(matches!(missing, InterfaceError::NotFound { .. }));
        assert_eq!(missing.correlation_id(), "req-4");

        let unavailable = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-5");
        assert!(matches!(unavailable, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn lost_write_races_map_to_conflict() {
        let stale = ApplicationError::Conflict(
            "request `REQ-1` was changed by another action".to_owned(),
        )
        .into_interface("req-6");
        assert!(matches!(stale, InterfaceError::Conflict { .. }));
        assert_eq!(stale.message(), "request `REQ-1` was changed by another action");

        let missing_step =
            ApplicationError::from(WorkflowError::MissingPendingStep { level: LevelNumber(1) })
                .into_interface("req-7");
        assert!(matches!(missing_step, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("invalid bind address".to_owned()).into_interface("r");

        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
