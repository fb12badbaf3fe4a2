use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::question::{QuestionOption, QuestionType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub student_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_remaining_minutes: i32,
    pub time_taken_minutes: Option<i32>,
    /// Presented questions in session order, stripped of answer keys.
    pub questions: Vec<PresentedQuestion>,
    pub responses: Vec<Response>,
    pub score: Option<ScoreSummary>,
    #[serde(default)]
    pub security_events: Vec<SecurityEvent>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Started,
    InProgress,
    Paused,
    Submitted,
    AutoSubmitted,
    Graded,
}

impl AttemptStatus {
    pub const LIVE: [AttemptStatus; 3] = [
        AttemptStatus::Started,
        AttemptStatus::InProgress,
        AttemptStatus::Paused,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Started => "started",
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Paused => "paused",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::AutoSubmitted => "auto_submitted",
            AttemptStatus::Graded => "graded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "started" => Some(AttemptStatus::Started),
            "in_progress" => Some(AttemptStatus::InProgress),
            "paused" => Some(AttemptStatus::Paused),
            "submitted" => Some(AttemptStatus::Submitted),
            "auto_submitted" => Some(AttemptStatus::AutoSubmitted),
            "graded" => Some(AttemptStatus::Graded),
            _ => None,
        }
    }

    pub fn is_live(self) -> bool {
        Self::LIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the student sees of a question for this session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentedQuestion {
    pub question_id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    pub options: Vec<QuestionOption>,
    pub blank_count: usize,
    pub marks: Decimal,
    pub order: i32,
    pub optional: bool,
    pub time_limit_seconds: Option<i32>,
}

/// Raw answer, one variant per question family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerPayload {
    SingleChoice { selected: String },
    TrueFalse { value: bool },
    FillInBlank { blanks: Vec<String> },
    Text { text: String },
    Media { url: String, mime_type: Option<String> },
}

impl AnswerPayload {
    pub fn fits(&self, question_type: QuestionType) -> bool {
        matches!(
            (self, question_type),
            (AnswerPayload::SingleChoice { .. }, QuestionType::SingleChoice)
                | (AnswerPayload::TrueFalse { .. }, QuestionType::TrueFalse)
                | (AnswerPayload::FillInBlank { .. }, QuestionType::FillInBlank)
                | (AnswerPayload::Text { .. }, QuestionType::ShortAnswer)
                | (AnswerPayload::Text { .. }, QuestionType::Essay)
                | (AnswerPayload::Media { .. }, QuestionType::FileUpload)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoGrade {
    pub is_correct: bool,
    /// Signed: an incorrect answer under negative marking is below zero.
    pub marks_awarded: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualGrade {
    pub marks: Decimal,
    pub feedback: Option<String>,
    pub graded_by: Uuid,
    pub graded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub question_id: Uuid,
    pub question_type: QuestionType,
    pub max_marks: Decimal,
    pub answer: Option<AnswerPayload>,
    pub time_spent_seconds: i32,
    pub answered: bool,
    pub marked_for_review: bool,
    pub auto_grade: Option<AutoGrade>,
    pub manual_grade: Option<ManualGrade>,
    /// Per-question display value, never below zero.
    pub final_marks: Decimal,
    pub answered_at: Option<DateTime<Utc>>,
}

impl Response {
    pub fn placeholder(question: &PresentedQuestion) -> Self {
        Self {
            question_id: question.question_id,
            question_type: question.question_type,
            max_marks: question.marks,
            answer: None,
            time_spent_seconds: 0,
            answered: false,
            marked_for_review: false,
            auto_grade: None,
            manual_grade: None,
            final_marks: Decimal::ZERO,
            answered_at: None,
        }
    }

    /// Signed value that enters final aggregation.
    pub fn effective_marks(&self) -> Decimal {
        if let Some(manual) = &self.manual_grade {
            return manual.marks;
        }
        self.auto_grade
            .map(|g| g.marks_awarded)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn refresh_final_marks(&mut self) {
        self.final_marks = self.effective_marks().max(Decimal::ZERO);
    }

    pub fn awaits_manual_grading(&self) -> bool {
        self.answered && !self.question_type.is_objective() && self.manual_grade.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeBreakdown {
    pub questions: i32,
    pub answered: i32,
    pub correct: i32,
    pub max_marks: Decimal,
    pub marks_obtained: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total_marks: Decimal,
    pub positive_marks: Decimal,
    pub negative_marks: Decimal,
    pub late_penalty: Decimal,
    pub marks_obtained: Decimal,
    pub percentage: i32,
    pub grade: Option<String>,
    pub passed: bool,
    pub breakdown: BTreeMap<String, TypeBreakdown>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub event_type: String,
    pub severity: Severity,
    pub details: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl Attempt {
    pub fn response_mut(&mut self, question_id: Uuid) -> Option<(usize, &mut Response)> {
        self.responses
            .iter_mut()
            .enumerate()
            .find(|(_, r)| r.question_id == question_id)
    }

    pub fn answered_count(&self) -> usize {
        self.responses.iter().filter(|r| r.answered).count()
    }

    pub fn security_summary(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.security_events {
            *counts.entry(event.severity).or_insert(0) += 1;
        }
        counts
    }
}
