pub mod engine;
pub mod states;

pub use engine::{
    validate_clarification_response, validate_decision_comment, ClarificationReply,
    DecisionCommand, LevelResolver, Resolution, SequentialResolver, WorkflowEngine,
    REQUESTER_POSITION,
};
pub use states::{DecisionAction, SkipReason, SkippedLevel, TransitionOutcome, WorkflowEvent};
