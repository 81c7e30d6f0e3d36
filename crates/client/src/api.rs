use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use ladder_core::config::ClientConfig;
use ladder_core::domain::approver::ApproverRef;
use ladder_core::domain::hierarchy::{
    HierarchyDefinition, HierarchyId, HierarchyKey, LevelNumber, LevelRule,
};
use ladder_core::domain::request::{RequestId, RequestInstance, RequestKind};
use ladder_core::domain::step::{ClarificationTarget, Step, StepId};
use ladder_core::errors::ValidationError;
use ladder_core::hierarchy::LevelChange;
use ladder_core::history::RenderedHistory;
use ladder_core::workflow::{
    validate_clarification_response, validate_decision_comment, DecisionAction, TransitionOutcome,
};

use crate::error::ClientError;
use crate::session::Session;

#[derive(Debug, Deserialize)]
pub struct ChangeResponse {
    pub change: LevelChange,
    pub hierarchy: HierarchyDefinition,
}

#[derive(Debug, Deserialize)]
pub struct TransitionResponse {
    pub request: RequestInstance,
    pub outcome: TransitionOutcome,
}

#[derive(Debug)]
pub enum ToggleResponse {
    /// The server wants the prompt acknowledged; resend with `confirmed`.
    ConfirmationRequired { prompt: String },
    Applied(ChangeResponse),
}

#[derive(Debug, Deserialize)]
struct ConfirmationBody {
    confirmation_required: bool,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Marks the client busy for the lifetime of one call.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
    in_flight: AtomicBool,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        session: Arc<Session>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { http, base_url, session, in_flight: AtomicBool::new(false) })
    }

    pub fn from_config(config: &ClientConfig, session: Arc<Session>) -> Result<Self, ClientError> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs), session)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn lookup_hierarchy(
        &self,
        key: &HierarchyKey,
    ) -> Result<HierarchyDefinition, ClientError> {
        key.validate()?;
        self.call(Method::POST, "/api/v1/hierarchies/lookup", Some(key)).await
    }

    pub async fn fetch_hierarchy(
        &self,
        id: &HierarchyId,
    ) -> Result<HierarchyDefinition, ClientError> {
        self.call::<_, ()>(Method::GET, &format!("/api/v1/hierarchies/{id}"), None).await
    }

    pub async fn save_level_approvers(
        &self,
        id: &HierarchyId,
        level: LevelNumber,
        approvers: &[ApproverRef],
        enabled: Option<bool>,
    ) -> Result<ChangeResponse, ClientError> {
        editable(level)?;
        if enabled == Some(true) && approvers.is_empty() {
            return Err(ValidationError::EmptyApproverSet { level }.into());
        }

        let body = json!({ "approvers": approvers, "enabled": enabled });
        let path = format!("/api/v1/hierarchies/{id}/levels/{level}/approvers");
        self.call(Method::PUT, &path, Some(&body)).await
    }

    pub async fn set_level_enabled(
        &self,
        id: &HierarchyId,
        level: LevelNumber,
        enabled: bool,
        confirmed: bool,
    ) -> Result<ToggleResponse, ClientError> {
        editable(level)?;
        let body = json!({ "enabled": enabled, "confirmed": confirmed });
        let path = format!("/api/v1/hierarchies/{id}/levels/{level}/enabled");

        let (status, text) = self.dispatch(Method::POST, &path, Some(&body)).await?;
        if status == StatusCode::CONFLICT {
            if let Ok(confirmation) = serde_json::from_str::<ConfirmationBody>(&text) {
                if confirmation.confirmation_required {
                    return Ok(ToggleResponse::ConfirmationRequired { prompt: confirmation.prompt });
                }
            }
        }
        decode(status, &text).map(ToggleResponse::Applied)
    }

    pub async fn set_level_condition(
        &self,
        id: &HierarchyId,
        level: LevelNumber,
        rule: &LevelRule,
    ) -> Result<ChangeResponse, ClientError> {
        editable(level)?;
        if let LevelRule::Conditional { predicate } = rule {
            predicate.validate()?;
        }
        let path = format!("/api/v1/hierarchies/{id}/levels/{level}/condition");
        self.call(Method::PUT, &path, Some(rule)).await
    }

    /// Creates a draft raised by the signed-in user.
    pub async fn create_request(
        &self,
        hierarchy_id: &HierarchyId,
        kind: &RequestKind,
        payload: Value,
    ) -> Result<RequestInstance, ClientError> {
        let body = json!({
            "hierarchy_id": hierarchy_id,
            "kind": kind.as_str(),
            "requester": self.session.user(),
            "payload": payload,
        });
        self.call(Method::POST, "/api/v1/requests", Some(&body)).await
    }

    pub async fn fetch_request(&self, id: &RequestId) -> Result<RequestInstance, ClientError> {
        self.call::<_, ()>(Method::GET, &format!("/api/v1/requests/{id}"), None).await
    }

    pub async fn submit(&self, id: &RequestId) -> Result<TransitionResponse, ClientError> {
        let body = json!({ "actor": self.session.actor() });
        self.call(Method::POST, &format!("/api/v1/requests/{id}/submit"), Some(&body)).await
    }

    pub async fn decide(
        &self,
        id: &RequestId,
        level: LevelNumber,
        action: DecisionAction,
        comment: Option<&str>,
        target: Option<ClarificationTarget>,
    ) -> Result<TransitionResponse, ClientError> {
        validate_decision_comment(action, comment)?;
        let body = json!({
            "level": level,
            "action": action,
            "comment": comment.map(str::trim),
            "actor": self.session.actor(),
            "target": target,
        });
        self.call(Method::POST, &format!("/api/v1/requests/{id}/decision"), Some(&body)).await
    }

    pub async fn respond_to_clarification(
        &self,
        id: &RequestId,
        response: &str,
        step_id: Option<&StepId>,
    ) -> Result<TransitionResponse, ClientError> {
        validate_clarification_response(response)?;
        let body = json!({
            "step_id": step_id,
            "response": response.trim(),
            "actor": self.session.actor(),
        });
        self.call(Method::POST, &format!("/api/v1/requests/{id}/clarification"), Some(&body)).await
    }

    pub async fn fetch_history(&self, id: &RequestId) -> Result<Vec<Step>, ClientError> {
        self.call::<_, ()>(Method::GET, &format!("/api/v1/requests/{id}/history"), None).await
    }

    pub async fn fetch_rendered_history(
        &self,
        id: &RequestId,
    ) -> Result<RenderedHistory, ClientError> {
        self.call::<_, ()>(Method::GET, &format!("/api/v1/requests/{id}/history/rendered"), None)
            .await
    }

    fn begin(&self) -> Result<InFlight<'_>, ClientError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlight(&self.in_flight))
            .map_err(|_| ClientError::Busy)
    }

    async fn call<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let (status, text) = self.dispatch(method, path, body).await?;
        decode(status, &text)
    }

    async fn dispatch<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(StatusCode, String), ClientError>
    where
        B: Serialize + ?Sized,
    {
        let token = self.session.token()?;
        let _guard = self.begin()?;

        debug!(method = %method, path, "dispatching api call");
        let mut request = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }
}

fn editable(level: LevelNumber) -> Result<(), ValidationError> {
    if level.is_requester() {
        return Err(ValidationError::ReservedLevel);
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(status: StatusCode, text: &str) -> Result<T, ClientError> {
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(text).ok().map(|body| body.error);
        return Err(ClientError::Server { status: status.as_u16(), message });
    }
    serde_json::from_str(text).map_err(|error| ClientError::Server {
        status: status.as_u16(),
        message: Some(format!("unreadable response: {error}")),
    })
}
