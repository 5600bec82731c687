use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::coordinator::SubmissionError;
use super::domain::{EvaluationSubmission, EvaluationType, Rating, SubjectId};
use super::gateway::AccessError;
use super::issuer::{IssueError, IssueLinkRequest};
use super::rate_limit::ClientKey;
use super::repository::{EvaluationHistoryStore, EvaluationRepository, LinkRepository};
use super::sentinel::SessionId;
use super::service::ExternalEvaluationService;
use crate::workflows::directory::EmployeeStatus;

pub const SESSION_HEADER: &str = "x-evaluation-session";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const DIRECT_ORIGIN: &str = "direct";

type SharedService<L, E, H> = Arc<ExternalEvaluationService<L, E, H>>;

/// Routes for issuing, opening, and submitting external evaluations.
pub fn evaluation_router<L, E, H>(service: SharedService<L, E, H>) -> Router
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/evaluation-subjects",
            get(subjects_handler::<L, E, H>),
        )
        .route("/api/v1/evaluation-links", post(issue_handler::<L, E, H>))
        .route(
            "/api/v1/external-evaluations/:token",
            get(open_form_handler::<L, E, H>).post(submit_handler::<L, E, H>),
        )
        .route(
            "/api/v1/evaluation-eligibility/:subject_id/:evaluation_type",
            get(eligibility_handler::<L, E, H>),
        )
        .route(
            "/api/v1/inspections/score",
            post(inspection_score_handler::<L, E, H>),
        )
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SubjectQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitRequest {
    csrf_token: String,
    #[serde(flatten)]
    submission: EvaluationSubmission,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InspectionScoreRequest {
    answers: BTreeMap<String, Rating>,
}

/// Client origin for rate limiting: first `x-forwarded-for` hop, else a shared bucket.
fn client_origin(headers: &HeaderMap) -> String {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .unwrap_or(DIRECT_ORIGIN)
        .to_string()
}

fn session_from(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|session| !session.is_empty())
        .map(|session| SessionId(session.to_string()))
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, axum::Json(json!({ "error": message.into() }))).into_response()
}

fn access_error_response(error: &AccessError) -> Response {
    let status = match error {
        AccessError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        AccessError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AccessError::TokenMalformed
        | AccessError::TokenNotFound
        | AccessError::TokenExpired
        | AccessError::TokenAlreadyUsed => StatusCode::NOT_FOUND,
    };
    error_body(status, error.public_message())
}

pub(crate) async fn subjects_handler<L, E, H>(
    State(service): State<SharedService<L, E, H>>,
    Query(query): Query<SubjectQuery>,
) -> Response
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    let statuses = query.status.map(|raw| {
        raw.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(EmployeeStatus::parse)
            .collect::<BTreeSet<_>>()
    });

    match service.list_subjects(statuses) {
        Ok(subjects) => (StatusCode::OK, axum::Json(subjects)).into_response(),
        Err(err) => error_body(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

pub(crate) async fn issue_handler<L, E, H>(
    State(service): State<SharedService<L, E, H>>,
    axum::Json(request): axum::Json<IssueLinkRequest>,
) -> Response
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    match service.issue_link(request).await {
        Ok(issued) => {
            let payload = json!({
                "url": issued.url,
                "token": issued.link.token.as_str(),
                "subject_id": issued.link.subject_id,
                "subject_name": issued.link.subject_name,
                "evaluation_type": issued.link.evaluation_type,
                "expires_at": issued.link.expires_at,
            });
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        Err(err @ IssueError::InvalidRequest { .. }) => {
            error_body(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        Err(err @ (IssueError::UnknownSubject(_) | IssueError::InactiveSubject { .. })) => {
            error_body(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        Err(IssueError::EligibilityWindowViolation {
            kind,
            last_submitted_at,
            next_eligible_at,
        }) => {
            let payload = json!({
                "error": "evaluation cooldown in effect",
                "evaluation_type": kind,
                "last_submitted_at": last_submitted_at,
                "next_eligible_at": next_eligible_at,
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Err(other) => error_body(StatusCode::SERVICE_UNAVAILABLE, other.to_string()),
    }
}

pub(crate) async fn open_form_handler<L, E, H>(
    State(service): State<SharedService<L, E, H>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Response
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    let client = ClientKey::derive(&client_origin(&headers), &token);
    let session = session_from(&headers)
        .unwrap_or_else(|| SessionId(uuid::Uuid::new_v4().simple().to_string()));

    match service.open_form(&token, &client, &session).await {
        Ok(form) => {
            let payload = json!({
                "session_id": session.0,
                "form": form,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => access_error_response(&err),
    }
}

pub(crate) async fn submit_handler<L, E, H>(
    State(service): State<SharedService<L, E, H>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<SubmitRequest>,
) -> Response
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    let client = ClientKey::derive(&client_origin(&headers), &token);
    let session = session_from(&headers).unwrap_or_else(|| SessionId(String::new()));

    match service
        .submit(&token, &client, &request.csrf_token, &session, request.submission)
        .await
    {
        Ok(id) => {
            let payload = json!({
                "evaluation_id": id,
                "status": "received",
            });
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        Err(SubmissionError::Access(err)) => access_error_response(&err),
        Err(SubmissionError::ValidationFailed(failure)) => {
            let payload = json!({
                "error": failure.to_string(),
                "field": failure.field(),
            });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        Err(err @ SubmissionError::CsrfMismatch) => {
            error_body(StatusCode::NOT_FOUND, err.public_message())
        }
        Err(err @ SubmissionError::PersistenceFailure { .. }) => {
            error_body(StatusCode::SERVICE_UNAVAILABLE, err.public_message())
        }
    }
}

pub(crate) async fn eligibility_handler<L, E, H>(
    State(service): State<SharedService<L, E, H>>,
    Path((subject_id, evaluation_type)): Path<(String, EvaluationType)>,
) -> Response
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    let subject = SubjectId(subject_id);
    match service.eligibility(&subject, evaluation_type).await {
        Ok(eligibility) => {
            let payload = json!({
                "subject_id": subject,
                "evaluation_type": evaluation_type,
                "can_issue": eligibility.is_eligible(),
                "eligibility": eligibility,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_body(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

pub(crate) async fn inspection_score_handler<L, E, H>(
    State(service): State<SharedService<L, E, H>>,
    axum::Json(request): axum::Json<InspectionScoreRequest>,
) -> Response
where
    L: LinkRepository + 'static,
    E: EvaluationRepository + 'static,
    H: EvaluationHistoryStore + 'static,
{
    let ratings: Vec<Rating> = request.answers.into_values().collect();
    let banded = service.score_inspection(&ratings);
    (StatusCode::OK, axum::Json(banded)).into_response()
}
