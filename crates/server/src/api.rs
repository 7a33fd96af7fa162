use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use approvy_core::{
    ApplicationError, ApprovalStatus, Decision, DomainError, InterfaceError, RequestId,
    RequestRecord,
};

use crate::approvals::ApprovalService;

#[derive(Clone)]
pub struct ApiState {
    service: Arc<ApprovalService>,
}

pub fn router(service: Arc<ApprovalService>) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/status", get(status))
        .route("/requests", post(create_request))
        .route("/requests/{id}", get(get_request))
        .route("/requests/{id}/responses", post(record_response))
        .with_state(ApiState { service })
}

/// Form body for `POST /requests`. `from`/`to` are accepted for older clients.
#[derive(Debug, Default, Deserialize)]
pub struct CreateRequestForm {
    #[serde(default, alias = "from")]
    pub requester: Option<String>,
    #[serde(default, alias = "to")]
    pub approver: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub ttl_secs: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseForm {
    #[serde(default)]
    pub approved: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedRequest {
    pub id: String,
    pub status: ApprovalStatus,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct ResponseView {
    pub id: String,
    pub approved: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct RequestView {
    pub id: String,
    pub requester: String,
    pub approver: String,
    pub message: String,
    pub status: ApprovalStatus,
    pub created_at: String,
    pub expires_at: String,
    pub responses: Vec<ResponseView>,
}

impl From<RequestRecord> for RequestView {
    fn from(record: RequestRecord) -> Self {
        let RequestRecord { request, responses } = record;
        Self {
            id: request.id.0,
            requester: request.requester,
            approver: request.approver,
            message: request.message,
            status: request.status,
            created_at: request.created_at.to_rfc3339(),
            expires_at: request.expires_at.to_rfc3339(),
            responses: responses
                .into_iter()
                .map(|response| ResponseView {
                    id: response.id.0,
                    approved: response.decision.is_approve(),
                    created_at: response.created_at.to_rfc3339(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordedResponse {
    pub request_id: String,
    pub response_id: String,
    pub status: ApprovalStatus,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        Self(error.into_interface(Uuid::new_v4().to_string()))
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        ApplicationError::from(error).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, detail) = match &self.0 {
            InterfaceError::BadRequest { message, .. } => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(message.clone()))
            }
            InterfaceError::NotFound { message, .. } => {
                (StatusCode::NOT_FOUND, "not_found", Some(message.clone()))
            }
            InterfaceError::ServiceUnavailable { message, .. } => {
                warn!(
                    event_name = "http.request.unavailable",
                    correlation_id = %self.0.correlation_id(),
                    error = %message,
                    "request failed on an unavailable dependency"
                );
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", None)
            }
            InterfaceError::Internal { message, .. } => {
                error!(
                    event_name = "http.request.internal_error",
                    correlation_id = %self.0.correlation_id(),
                    error = %message,
                    "request failed with an internal error"
                );
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", None)
            }
        };

        let body = ErrorBody {
            error: code,
            message: self.0.user_message(),
            detail,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn malformed_form(rejection: FormRejection) -> ApiError {
    DomainError::InvalidInput { field: "body", reason: rejection.body_text() }.into()
}

fn parse_ttl(raw: Option<&str>) -> Result<Option<Duration>, DomainError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let seconds = raw.parse::<i64>().map_err(|_| DomainError::InvalidInput {
        field: "ttl_secs",
        reason: format!("`{raw}` is not a whole number of seconds"),
    })?;
    Duration::try_seconds(seconds).map(Some).ok_or_else(|| DomainError::InvalidInput {
        field: "ttl_secs",
        reason: format!("`{raw}` is out of range"),
    })
}

fn parse_decision(raw: Option<&str>) -> Result<Decision, DomainError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(Decision::Approve),
        "false" | "no" | "0" => Ok(Decision::Reject),
        "" => Err(DomainError::InvalidInput { field: "approved", reason: "is required".into() }),
        _ => Err(DomainError::InvalidInput {
            field: "approved",
            reason: format!("`{raw}` is not one of true|false|yes|no|1|0"),
        }),
    }
}

async fn banner() -> &'static str {
    "Approvy!"
}

async fn status() -> &'static str {
    "ok"
}

async fn create_request(
    State(state): State<ApiState>,
    form: Result<Form<CreateRequestForm>, FormRejection>,
) -> Result<(StatusCode, Json<CreatedRequest>), ApiError> {
    let Form(form) = form.map_err(malformed_form)?;
    let ttl = parse_ttl(form.ttl_secs.as_deref())?;

    let submission = state
        .service
        .submit(
            form.requester.as_deref().unwrap_or_default(),
            form.approver.as_deref().unwrap_or_default(),
            form.message.as_deref().unwrap_or_default(),
            ttl,
        )
        .await?;

    let request = submission.request;
    Ok((
        StatusCode::CREATED,
        Json(CreatedRequest {
            id: request.id.0,
            status: request.status,
            expires_at: request.expires_at.to_rfc3339(),
        }),
    ))
}

async fn get_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<RequestView>, ApiError> {
    let record = state.service.get(&RequestId(id)).await?;
    Ok(Json(record.into()))
}

async fn record_response(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    form: Result<Form<ResponseForm>, FormRejection>,
) -> Result<Json<RecordedResponse>, ApiError> {
    let Form(form) = form.map_err(malformed_form)?;
    let decision = parse_decision(form.approved.as_deref())?;

    let outcome = state.service.respond(&RequestId(id), decision).await?;
    Ok(Json(RecordedResponse {
        request_id: outcome.response.request_id.0,
        response_id: outcome.response.id.0,
        status: outcome.status,
    }))
}
