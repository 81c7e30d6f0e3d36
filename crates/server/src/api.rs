use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use ladder_core::domain::approver::{approvers_from_raw, ApproverId, ApproverRef, RawApprover};
use ladder_core::domain::hierarchy::{
    HierarchyDefinition, HierarchyId, HierarchyKey, LevelNumber, LevelRule,
};
use ladder_core::domain::request::{RequestId, RequestInstance, RequestKind};
use ladder_core::domain::step::{ClarificationTarget, Step, StepId};
use ladder_core::errors::{ApplicationError, InterfaceError};
use ladder_core::hierarchy::LevelChange;
use ladder_core::history::RenderedHistory;
use ladder_core::workflow::{
    ClarificationReply, DecisionAction, DecisionCommand, TransitionOutcome,
};

use crate::service::{ApprovalService, ToggleResult};

const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    service: Arc<ApprovalService>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub user_message: String,
    pub correlation_id: String,
}

type Rejection = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, Rejection>;

#[derive(Debug, Deserialize)]
pub struct BandQuery {
    pub department: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ApproversBody {
    pub approvers: Vec<RawApprover>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleBody {
    pub enabled: bool,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Serialize)]
pub struct ConfirmationBody {
    pub confirmation_required: bool,
    pub level: LevelNumber,
    pub enabled: bool,
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct AddLevelBody {
    #[serde(default)]
    pub position: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChangeResponse {
    pub change: LevelChange,
    pub hierarchy: HierarchyDefinition,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub hierarchy_id: String,
    pub kind: String,
    pub requester: RawApprover,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct PayloadBody {
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub level: u32,
    pub action: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub actor: String,
    #[serde(default)]
    pub target: Option<ClarificationTarget>,
}

#[derive(Debug, Deserialize)]
pub struct ClarificationBody {
    #[serde(default)]
    pub step_id: Option<String>,
    pub response: String,
    pub actor: String,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub request: RequestInstance,
    pub outcome: TransitionOutcome,
}

pub fn router(service: Arc<ApprovalService>) -> Router {
    Router::new()
        .route("/api/v1/hierarchies/lookup", post(lookup_hierarchy))
        .route("/api/v1/hierarchies/band", get(hierarchy_for_amount))
        .route("/api/v1/hierarchies/{id}", get(get_hierarchy))
        .route("/api/v1/hierarchies/{id}/levels", post(add_level))
        .route("/api/v1/hierarchies/{id}/levels/{level}/approvers", put(save_level_approvers))
        .route("/api/v1/hierarchies/{id}/levels/{level}/enabled", post(set_level_enabled))
        .route("/api/v1/hierarchies/{id}/levels/{level}/condition", put(set_level_condition))
        .route("/api/v1/requests", post(create_request))
        .route(
            "/api/v1/requests/{id}",
            get(get_request).patch(update_payload).delete(delete_request),
        )
        .route("/api/v1/requests/{id}/submit", post(submit_request))
        .route("/api/v1/requests/{id}/decision", post(decide))
        .route("/api/v1/requests/{id}/clarification", post(respond_to_clarification))
        .route("/api/v1/requests/{id}/history", get(fetch_history))
        .route("/api/v1/requests/{id}/history/rendered", get(fetch_rendered_history))
        .with_state(ApiState { service })
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn reject(error: ApplicationError, correlation_id: &str) -> Rejection {
    interface_rejection(error.into_interface(correlation_id))
}

fn interface_rejection(error: InterfaceError) -> Rejection {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "api.request_failed",
        correlation_id = error.correlation_id(),
        status = status.as_u16(),
        error = error.message(),
        "api request failed"
    );

    (
        status,
        Json(ErrorBody {
            error: error.message().to_owned(),
            user_message: error.user_message().to_owned(),
            correlation_id: error.correlation_id().to_owned(),
        }),
    )
}

fn bad_request(message: impl Into<String>, correlation_id: &str) -> Rejection {
    interface_rejection(InterfaceError::BadRequest {
        message: message.into(),
        correlation_id: correlation_id.to_owned(),
    })
}

fn convert_approver(raw: RawApprover, correlation_id: &str) -> Result<ApproverRef, Rejection> {
    ApproverRef::try_from(raw).map_err(|error| reject(error.into(), correlation_id))
}

async fn lookup_hierarchy(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(key): Json<HierarchyKey>,
) -> ApiResult<HierarchyDefinition> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .lookup_hierarchy(key, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn hierarchy_for_amount(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<BandQuery>,
) -> ApiResult<HierarchyDefinition> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .hierarchy_for_amount(&query.department, query.amount)
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn get_hierarchy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<HierarchyDefinition> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .get_hierarchy(&HierarchyId(id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn add_level(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AddLevelBody>,
) -> ApiResult<ChangeResponse> {
    let correlation_id = correlation_id(&headers);
    let (change, hierarchy) = state
        .service
        .add_level(&HierarchyId(id), body.position, &correlation_id)
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok(Json(ChangeResponse { change, hierarchy }))
}

async fn save_level_approvers(
    State(state): State<ApiState>,
    Path((id, level)): Path<(String, u32)>,
    headers: HeaderMap,
    Json(body): Json<ApproversBody>,
) -> ApiResult<ChangeResponse> {
    let correlation_id = correlation_id(&headers);
    let approvers =
        approvers_from_raw(body.approvers).map_err(|error| reject(error.into(), &correlation_id))?;

    let (change, hierarchy) = state
        .service
        .set_level_approvers(
            &HierarchyId(id),
            LevelNumber(level),
            approvers,
            body.enabled,
            &correlation_id,
        )
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok(Json(ChangeResponse { change, hierarchy }))
}

async fn set_level_enabled(
    State(state): State<ApiState>,
    Path((id, level)): Path<(String, u32)>,
    headers: HeaderMap,
    Json(body): Json<ToggleBody>,
) -> Result<Response, Rejection> {
    let correlation_id = correlation_id(&headers);
    let result = state
        .service
        .toggle_level(
            &HierarchyId(id),
            LevelNumber(level),
            body.enabled,
            body.confirmed,
            &correlation_id,
        )
        .await
        .map_err(|error| reject(error, &correlation_id))?;

    Ok(match result {
        ToggleResult::NeedsConfirmation(toggle) => (
            StatusCode::CONFLICT,
            Json(ConfirmationBody {
                confirmation_required: true,
                level: toggle.level,
                enabled: toggle.enabled,
                prompt: toggle.prompt,
            }),
        )
            .into_response(),
        ToggleResult::Applied { change, hierarchy } => {
            Json(ChangeResponse { change, hierarchy }).into_response()
        }
    })
}

async fn set_level_condition(
    State(state): State<ApiState>,
    Path((id, level)): Path<(String, u32)>,
    headers: HeaderMap,
    Json(rule): Json<LevelRule>,
) -> ApiResult<ChangeResponse> {
    let correlation_id = correlation_id(&headers);
    let (change, hierarchy) = state
        .service
        .set_level_condition(&HierarchyId(id), LevelNumber(level), rule, &correlation_id)
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok(Json(ChangeResponse { change, hierarchy }))
}

async fn create_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<RequestInstance>), Rejection> {
    let correlation_id = correlation_id(&headers);
    let requester = convert_approver(body.requester, &correlation_id)?;
    if body.hierarchy_id.trim().is_empty() {
        return Err(bad_request("hierarchy_id is required", &correlation_id));
    }

    let request = state
        .service
        .create_request(
            HierarchyId(body.hierarchy_id.trim().to_owned()),
            RequestKind::parse(&body.kind),
            requester,
            body.payload,
            &correlation_id,
        )
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<RequestInstance> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .get_request(&RequestId(id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn update_payload(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PayloadBody>,
) -> ApiResult<RequestInstance> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .update_payload(&RequestId(id), body.payload)
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn delete_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, Rejection> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .delete_request(&RequestId(id), &correlation_id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|error| reject(error, &correlation_id))
}

async fn submit_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SubmitBody>,
) -> ApiResult<TransitionResponse> {
    let correlation_id = correlation_id(&headers);
    let (request, outcome) = state
        .service
        .submit(&RequestId(id), ApproverId(body.actor.trim().to_owned()), &correlation_id)
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok(Json(TransitionResponse { request, outcome }))
}

async fn decide(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<DecisionBody>,
) -> ApiResult<TransitionResponse> {
    let correlation_id = correlation_id(&headers);
    let action = DecisionAction::parse(&body.action).ok_or_else(|| {
        bad_request(format!("unknown decision action `{}`", body.action), &correlation_id)
    })?;

    let command = DecisionCommand {
        level: LevelNumber(body.level),
        action,
        comment: body.comment,
        actor: ApproverId(body.actor.trim().to_owned()),
        target: body.target,
        at: Utc::now(),
    };
    let (request, outcome) = state
        .service
        .decide(&RequestId(id), command, &correlation_id)
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok(Json(TransitionResponse { request, outcome }))
}

async fn respond_to_clarification(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ClarificationBody>,
) -> ApiResult<TransitionResponse> {
    let correlation_id = correlation_id(&headers);
    let reply = ClarificationReply {
        step_id: body.step_id.map(StepId),
        response: body.response,
        actor: ApproverId(body.actor.trim().to_owned()),
        at: Utc::now(),
    };
    let (request, outcome) = state
        .service
        .respond_to_clarification(&RequestId(id), reply, &correlation_id)
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok(Json(TransitionResponse { request, outcome }))
}

async fn fetch_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Vec<Step>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .history(&RequestId(id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn fetch_rendered_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<RenderedHistory> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .rendered_history(&RequestId(id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}
