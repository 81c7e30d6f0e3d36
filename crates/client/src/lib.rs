//! HTTP client for the ladder approval API.
//!
//! Every call validates its input locally before anything is sent, and a
//! client never has more than one call in flight.

pub mod api;
pub mod error;
pub mod session;

pub use api::{ApiClient, ChangeResponse, ToggleResponse, TransitionResponse};
pub use error::ClientError;
pub use session::{DirectoryCache, DirectoryList, Session};
