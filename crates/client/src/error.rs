use ladder_core::errors::ValidationError;
use thiserror::Error;

const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("another request is already in flight")]
    Busy,
    #[error("the session has been logged out")]
    SessionInvalidated,
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server responded with {status}")]
    Server { status: u16, message: Option<String> },
}

impl ClientError {
    /// Text to show the user. Server-side messages are passed through as-is.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(error) => error.to_string(),
            Self::Busy => "Please wait for the current action to finish.".to_owned(),
            Self::SessionInvalidated => "Your session has ended. Please sign in again.".to_owned(),
            Self::Server { message: Some(message), .. } if !message.trim().is_empty() => {
                message.clone()
            }
            Self::Server { .. } | Self::Network(_) => GENERIC_FAILURE.to_owned(),
        }
    }
}
