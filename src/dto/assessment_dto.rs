use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::assessment::{
    AccessPolicy, AssessmentStatistics, AssessmentStatus, GradeBand, NegativeMarking,
    ResultVisibility, Schedule,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAssessmentQuestion {
    pub question_id: Uuid,
    pub marks: Decimal,
    pub order: i32,
    #[serde(default)]
    pub optional: bool,
    #[validate(range(min = 1, message = "Time limit must be at least 1 second"))]
    pub time_limit_seconds: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAssessmentConfig {
    #[validate(range(min = 1, message = "Duration must be at least 1 minute"))]
    pub duration_minutes: i32,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub shuffle_options: bool,
    #[validate(range(min = 1, message = "At least one attempt must be allowed"))]
    pub max_attempts: i32,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub attempt_delay_minutes: i32,
    #[serde(default)]
    pub negative_marking: NegativeMarking,
    pub partial_marking: Option<bool>,
    pub result_visibility: Option<ResultVisibility>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAssessmentPayload {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    pub status: Option<AssessmentStatus>,
    #[validate(length(min = 1, message = "At least one question is required"), nested)]
    pub questions: Vec<CreateAssessmentQuestion>,
    #[validate(nested)]
    pub config: CreateAssessmentConfig,
    pub schedule: Schedule,
    pub grading_scale: Vec<GradeBand>,
    pub total_marks: Decimal,
    pub passing_marks: Decimal,
    pub access: Option<AccessPolicy>,
    #[serde(default)]
    pub participants: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentCreatedResponse {
    pub id: Uuid,
    pub title: String,
    pub status: AssessmentStatus,
    pub total_marks: Decimal,
    pub passing_marks: Decimal,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsReleasedResponse {
    pub assessment_id: Uuid,
    pub results_released: bool,
    pub result_visibility: ResultVisibility,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsResponse {
    pub assessment_id: Uuid,
    #[serde(flatten)]
    pub statistics: AssessmentStatistics,
}
