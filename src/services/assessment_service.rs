use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::database::store::Store;
use crate::dto::assessment_dto::CreateAssessmentPayload;
use crate::error::{Error, Result};
use crate::models::assessment::{
    AccessPolicy, Assessment, AssessmentConfig, AssessmentQuestion, AssessmentStatistics,
    AssessmentStatus, ResultVisibility,
};
use crate::models::identity::Identity;
use crate::services::scoring_service::ScoringService;
use crate::utils::time::Clock;

#[derive(Clone)]
pub struct AssessmentService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl AssessmentService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create_assessment(
        &self,
        payload: CreateAssessmentPayload,
        created_by: &Identity,
    ) -> Result<Assessment> {
        if !created_by.is_staff() {
            return Err(Error::Forbidden("Only staff can create assessments".into()));
        }

        let sum: Decimal = payload.questions.iter().map(|q| q.marks).sum();
        if payload.questions.iter().any(|q| q.marks <= Decimal::ZERO) {
            return Err(Error::BadRequest("Question marks must be positive".into()));
        }
        if sum != payload.total_marks {
            return Err(Error::BadRequest(format!(
                "Total marks {} must equal the sum of question marks {}",
                payload.total_marks, sum
            )));
        }
        if payload.passing_marks < Decimal::ZERO || payload.passing_marks > payload.total_marks {
            return Err(Error::BadRequest(
                "Passing marks must be between 0 and total marks".into(),
            ));
        }
        if payload.schedule.start >= payload.schedule.end {
            return Err(Error::BadRequest("Schedule start must be before end".into()));
        }
        if payload.schedule.grace_period_minutes < 0 {
            return Err(Error::BadRequest("Grace period cannot be negative".into()));
        }
        let negative = &payload.config.negative_marking;
        if negative.percentage < Decimal::ZERO || negative.percentage > Decimal::ONE_HUNDRED {
            return Err(Error::BadRequest(
                "Negative marking percentage must be between 0 and 100".into(),
            ));
        }
        ScoringService::validate_scale(&payload.grading_scale)?;

        let mut seen = HashSet::new();
        for question in &payload.questions {
            if !seen.insert(question.question_id) {
                return Err(Error::BadRequest(format!(
                    "Question {} is listed twice",
                    question.question_id
                )));
            }
        }
        let ids: Vec<Uuid> = payload.questions.iter().map(|q| q.question_id).collect();
        let found = self.store.get_questions(&ids).await?;
        if let Some(missing) = ids.iter().find(|id| !found.iter().any(|q| &q.id == *id)) {
            return Err(Error::BadRequest(format!("Question {} does not exist", missing)));
        }

        let now = self.clock.now();
        let config = payload.config;
        let assessment = Assessment {
            id: Uuid::new_v4(),
            title: payload.title.trim().to_string(),
            description: payload.description,
            status: payload.status.unwrap_or(AssessmentStatus::Draft),
            questions: payload
                .questions
                .into_iter()
                .map(|q| AssessmentQuestion {
                    question_id: q.question_id,
                    marks: q.marks,
                    order: q.order,
                    optional: q.optional,
                    time_limit_seconds: q.time_limit_seconds,
                })
                .collect(),
            config: AssessmentConfig {
                duration_minutes: config.duration_minutes,
                shuffle_questions: config.shuffle_questions,
                shuffle_options: config.shuffle_options,
                max_attempts: config.max_attempts,
                attempt_delay_minutes: config.attempt_delay_minutes,
                negative_marking: config.negative_marking,
                partial_marking: config.partial_marking.unwrap_or(true),
                result_visibility: config
                    .result_visibility
                    .unwrap_or(ResultVisibility::Immediate),
            },
            schedule: payload.schedule,
            grading_scale: payload.grading_scale,
            total_marks: payload.total_marks,
            passing_marks: payload.passing_marks,
            access: payload.access.unwrap_or(AccessPolicy::Open),
            participants: payload.participants,
            results_released: false,
            statistics: AssessmentStatistics::default(),
            created_by: created_by.user_id,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_assessment(&assessment).await?;
        tracing::info!(
            assessment_id = %assessment.id,
            created_by = %created_by.user_id,
            questions = assessment.questions.len(),
            "Assessment created"
        );
        Ok(assessment)
    }

    pub async fn get_statistics(
        &self,
        assessment_id: Uuid,
        identity: &Identity,
    ) -> Result<AssessmentStatistics> {
        if !identity.is_staff() {
            return Err(Error::Forbidden("Only staff can read statistics".into()));
        }
        self.store
            .get_assessment(assessment_id)
            .await?
            .map(|a| a.statistics)
            .ok_or_else(|| Error::NotFound("Assessment not found".into()))
    }

    /// Open results to students under the `on_release` policy. Releasing
    /// twice is harmless.
    pub async fn release_results(
        &self,
        assessment_id: Uuid,
        identity: &Identity,
    ) -> Result<Assessment> {
        if !identity.is_staff() {
            return Err(Error::Forbidden("Only staff can release results".into()));
        }
        let assessment = self
            .store
            .release_results(assessment_id)
            .await?
            .ok_or_else(|| Error::NotFound("Assessment not found".into()))?;
        tracing::info!(
            %assessment_id,
            released_by = %identity.user_id,
            "Results released"
        );
        Ok(assessment)
    }
}
