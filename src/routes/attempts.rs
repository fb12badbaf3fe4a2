use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::attempt_dto::{
    AttemptView, EventRecordedResponse, ManualGradeRequest, RecordEventRequest, ResultView,
    ResultsQuery, SaveAnswerRequest, SaveAnswerResponse, StartAttemptResponse, StatusResponse,
    SubmissionAck, SubmitResponse,
};
use crate::models::identity::Identity;
use crate::services::attempt_service::{ManualGradeInput, RequestContext, SaveAnswer};
use crate::AppState;

fn request_context(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    RequestContext {
        ip_address: header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())),
        user_agent: header("user-agent"),
    }
}

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(assessment_id): Path<Uuid>,
    headers: HeaderMap,
) -> crate::error::Result<Response> {
    let outcome = state
        .attempt_service
        .start(assessment_id, &identity, request_context(&headers))
        .await?;
    let status = if outcome.resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let body = StartAttemptResponse {
        resumed: outcome.resumed,
        attempt: AttemptView::new(&outcome.attempt, false),
    };
    Ok((status, Json(body)).into_response())
}

#[axum::debug_handler]
pub async fn get_current_attempt(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(assessment_id): Path<Uuid>,
) -> crate::error::Result<Json<AttemptView>> {
    let current = state
        .attempt_service
        .get_current(assessment_id, &identity)
        .await?;
    Ok(Json(AttemptView::new(
        &current.attempt,
        current.results_visible,
    )))
}

#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<SaveAnswerRequest>,
) -> crate::error::Result<Json<SaveAnswerResponse>> {
    req.validate()?;
    let saved = state
        .attempt_service
        .save_answer(
            attempt_id,
            &identity,
            SaveAnswer {
                question_id: req.question_id,
                answer: req.answer,
                time_spent_delta_seconds: req.time_spent_seconds,
                marked_for_review: req.marked_for_review.unwrap_or(false),
            },
        )
        .await?;
    Ok(Json(SaveAnswerResponse::new(
        &saved.response,
        saved.status,
        saved.time_remaining_minutes,
        saved.grading_visible,
    )))
}

/// A repeated submit answers 409 with the stored outcome in the body.
#[axum::debug_handler]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let submission = state.attempt_service.submit(attempt_id, &identity).await?;
    let body = if submission.results_visible {
        SubmitResponse::Result(ResultView::build(
            &submission.attempt,
            &submission.questions,
        )?)
    } else {
        SubmitResponse::Ack(SubmissionAck::new(&submission.attempt))
    };

    if submission.replayed {
        let mut value = serde_json::to_value(&body)?;
        value["error"] = serde_json::json!("already_submitted");
        return Ok((StatusCode::CONFLICT, Json(value)).into_response());
    }
    Ok(Json(body).into_response())
}

#[axum::debug_handler]
pub async fn pause_attempt(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Json<StatusResponse>> {
    let attempt = state.attempt_service.pause(attempt_id, &identity).await?;
    Ok(Json(StatusResponse {
        attempt_id: attempt.id,
        status: attempt.status,
        time_remaining_minutes: attempt.time_remaining_minutes,
    }))
}

#[axum::debug_handler]
pub async fn resume_attempt(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Json<StatusResponse>> {
    let attempt = state.attempt_service.resume(attempt_id, &identity).await?;
    Ok(Json(StatusResponse {
        attempt_id: attempt.id,
        status: attempt.status,
        time_remaining_minutes: attempt.time_remaining_minutes,
    }))
}

#[axum::debug_handler]
pub async fn record_event(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<RecordEventRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let event = state
        .security_service
        .record_event(attempt_id, &identity, &req.event_type, req.severity, req.details)
        .await?;
    let body = EventRecordedResponse {
        id: event.id,
        recorded: true,
        occurred_at: event.occurred_at,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[axum::debug_handler]
pub async fn get_results(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(assessment_id): Path<Uuid>,
    Query(query): Query<ResultsQuery>,
) -> crate::error::Result<Json<ResultView>> {
    let result = state
        .attempt_service
        .get_results(assessment_id, &identity, query.student_id)
        .await?;
    Ok(Json(ResultView::build(&result.attempt, &result.questions)?))
}

#[axum::debug_handler]
pub async fn grade_response(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<ManualGradeRequest>,
) -> crate::error::Result<Json<AttemptView>> {
    req.validate()?;
    let attempt = state
        .attempt_service
        .grade_response(
            attempt_id,
            &identity,
            ManualGradeInput {
                question_id: req.question_id,
                marks: req.marks,
                feedback: req.feedback,
            },
        )
        .await?;
    Ok(Json(AttemptView::new(&attempt, true)))
}
