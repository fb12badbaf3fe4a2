use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::assessment_dto::{
    AssessmentCreatedResponse, CreateAssessmentPayload, ResultsReleasedResponse,
    StatisticsResponse,
};
use crate::models::identity::Identity;
use crate::AppState;

#[axum::debug_handler]
pub async fn create_assessment(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<CreateAssessmentPayload>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let assessment = state
        .assessment_service
        .create_assessment(payload, &identity)
        .await?;
    let body = AssessmentCreatedResponse {
        id: assessment.id,
        title: assessment.title,
        status: assessment.status,
        total_marks: assessment.total_marks,
        passing_marks: assessment.passing_marks,
        opens_at: assessment.schedule.start,
        closes_at: assessment.schedule.end,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[axum::debug_handler]
pub async fn get_statistics(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(assessment_id): Path<Uuid>,
) -> crate::error::Result<Json<StatisticsResponse>> {
    let statistics = state
        .assessment_service
        .get_statistics(assessment_id, &identity)
        .await?;
    Ok(Json(StatisticsResponse {
        assessment_id,
        statistics,
    }))
}

#[axum::debug_handler]
pub async fn release_results(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(assessment_id): Path<Uuid>,
) -> crate::error::Result<Json<ResultsReleasedResponse>> {
    let assessment = state
        .assessment_service
        .release_results(assessment_id, &identity)
        .await?;
    Ok(Json(ResultsReleasedResponse {
        assessment_id: assessment.id,
        results_released: assessment.results_released,
        result_visibility: assessment.config.result_visibility,
    }))
}
