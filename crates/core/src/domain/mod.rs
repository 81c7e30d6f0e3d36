pub mod approver;
pub mod hierarchy;
pub mod request;
pub mod step;
