use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::attempt::{
    AnswerPayload, Attempt, AttemptStatus, AutoGrade, PresentedQuestion, Response, ScoreSummary,
    Severity,
};
use crate::models::question::{Question, QuestionType};

/// Student-facing attempt. Grading fields appear only once results are visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptView {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_remaining_minutes: i32,
    pub time_taken_minutes: Option<i32>,
    pub answered: usize,
    pub questions: Vec<PresentedQuestion>,
    pub responses: Vec<ResponseView>,
    pub score: Option<ScoreSummary>,
    pub security_summary: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseView {
    pub question_id: Uuid,
    pub answer: Option<AnswerPayload>,
    pub time_spent_seconds: i32,
    pub answered: bool,
    pub marked_for_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grading: Option<GradingView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingView {
    pub is_correct: Option<bool>,
    pub marks_awarded: Option<Decimal>,
    pub final_marks: Decimal,
}

impl GradingView {
    fn of(response: &Response) -> Self {
        Self {
            is_correct: response.auto_grade.map(|g: AutoGrade| g.is_correct),
            marks_awarded: response.auto_grade.map(|g| g.marks_awarded),
            final_marks: response.final_marks,
        }
    }
}

impl AttemptView {
    pub fn new(attempt: &Attempt, results_visible: bool) -> Self {
        let responses = attempt
            .responses
            .iter()
            .map(|r| ResponseView {
                question_id: r.question_id,
                answer: r.answer.clone(),
                time_spent_seconds: r.time_spent_seconds,
                answered: r.answered,
                marked_for_review: r.marked_for_review,
                grading: results_visible.then(|| GradingView::of(r)),
            })
            .collect();

        Self {
            id: attempt.id,
            assessment_id: attempt.assessment_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            started_at: attempt.started_at,
            submitted_at: attempt.submitted_at,
            time_remaining_minutes: attempt.time_remaining_minutes,
            time_taken_minutes: attempt.time_taken_minutes,
            answered: attempt.answered_count(),
            questions: attempt.questions.clone(),
            responses,
            score: if results_visible {
                attempt.score.clone()
            } else {
                None
            },
            security_summary: severity_counts(attempt),
        }
    }
}

fn severity_counts(attempt: &Attempt) -> BTreeMap<String, usize> {
    attempt
        .security_summary()
        .into_iter()
        .map(|(severity, count): (Severity, usize)| (severity.as_str().to_string(), count))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct StartAttemptResponse {
    pub resumed: bool,
    #[serde(flatten)]
    pub attempt: AttemptView,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    pub question_id: Uuid,
    pub answer: AnswerPayload,
    #[serde(default)]
    #[validate(range(
        min = 0,
        max = 86_400,
        message = "Time spent must be between 0 and 86400 seconds"
    ))]
    pub time_spent_seconds: i32,
    pub marked_for_review: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    pub question_id: Uuid,
    pub status: AttemptStatus,
    pub time_remaining_minutes: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grading: Option<GradingView>,
    pub timestamp: DateTime<Utc>,
}

impl SaveAnswerResponse {
    pub fn new(
        response: &Response,
        status: AttemptStatus,
        time_remaining_minutes: i32,
        grading_visible: bool,
    ) -> Self {
        Self {
            saved: true,
            question_id: response.question_id,
            status,
            time_remaining_minutes,
            grading: grading_visible.then(|| GradingView::of(response)),
            timestamp: response.answered_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Full per-question breakdown, including answer keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultView {
    pub attempt_id: Uuid,
    pub assessment_id: Uuid,
    pub student_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_taken_minutes: Option<i32>,
    pub score: ScoreSummary,
    pub questions: Vec<QuestionResultView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResultView {
    pub question_id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    pub max_marks: Decimal,
    pub answer: Option<AnswerPayload>,
    pub answered: bool,
    pub is_correct: Option<bool>,
    /// Signed value used in the total.
    pub marks_awarded: Decimal,
    pub final_marks: Decimal,
    pub correct_answer: Option<serde_json::Value>,
    pub explanation: Option<String>,
    pub feedback: Option<String>,
}

impl ResultView {
    pub fn build(attempt: &Attempt, questions: &[Question]) -> Result<Self> {
        let score = attempt
            .score
            .clone()
            .ok_or_else(|| Error::Internal("Attempt has not been scored".into()))?;

        let breakdown = attempt
            .questions
            .iter()
            .zip(&attempt.responses)
            .map(|(presented, response)| {
                let key = questions.iter().find(|q| q.id == presented.question_id);
                QuestionResultView {
                    question_id: presented.question_id,
                    question_type: presented.question_type,
                    prompt: presented.prompt.clone(),
                    max_marks: response.max_marks,
                    answer: response.answer.clone(),
                    answered: response.answered,
                    is_correct: response.auto_grade.map(|g| g.is_correct),
                    marks_awarded: response.effective_marks(),
                    final_marks: response.final_marks,
                    correct_answer: key.and_then(Question::correct_answer_display),
                    explanation: key.and_then(|q| q.explanation.clone()),
                    feedback: response
                        .manual_grade
                        .as_ref()
                        .and_then(|m| m.feedback.clone()),
                }
            })
            .collect();

        Ok(Self {
            attempt_id: attempt.id,
            assessment_id: attempt.assessment_id,
            student_id: attempt.student_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            submitted_at: attempt.submitted_at,
            time_taken_minutes: attempt.time_taken_minutes,
            score,
            questions: breakdown,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionAck {
    pub attempt_id: Uuid,
    pub status: AttemptStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub message: String,
}

impl SubmissionAck {
    pub fn new(attempt: &Attempt) -> Self {
        Self {
            attempt_id: attempt.id,
            status: attempt.status,
            submitted_at: attempt.submitted_at,
            message: "Submission received. Results will be available later.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SubmitResponse {
    Result(ResultView),
    Ack(SubmissionAck),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub attempt_id: Uuid,
    pub status: AttemptStatus,
    pub time_remaining_minutes: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordEventRequest {
    #[validate(length(min = 1, max = 100))]
    pub event_type: String,
    pub severity: Severity,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecordedResponse {
    pub id: Uuid,
    pub recorded: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ManualGradeRequest {
    pub question_id: Uuid,
    pub marks: Decimal,
    #[validate(length(max = 5000))]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsQuery {
    pub student_id: Option<Uuid>,
}
