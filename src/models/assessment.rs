use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: AssessmentStatus,
    pub questions: Vec<AssessmentQuestion>,
    pub config: AssessmentConfig,
    pub schedule: Schedule,
    pub grading_scale: Vec<GradeBand>,
    pub total_marks: Decimal,
    pub passing_marks: Decimal,
    pub access: AccessPolicy,
    #[serde(default)]
    pub participants: Vec<Uuid>,
    #[serde(default)]
    pub results_released: bool,
    pub statistics: AssessmentStatistics,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Draft,
    Published,
    Active,
    Completed,
    Archived,
}

impl AssessmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssessmentStatus::Draft => "draft",
            AssessmentStatus::Published => "published",
            AssessmentStatus::Active => "active",
            AssessmentStatus::Completed => "completed",
            AssessmentStatus::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(AssessmentStatus::Draft),
            "published" => Some(AssessmentStatus::Published),
            "active" => Some(AssessmentStatus::Active),
            "completed" => Some(AssessmentStatus::Completed),
            "archived" => Some(AssessmentStatus::Archived),
            _ => None,
        }
    }

    /// Drafts and archived assessments cannot be taken.
    pub fn is_addressable(self) -> bool {
        matches!(
            self,
            AssessmentStatus::Published | AssessmentStatus::Active | AssessmentStatus::Completed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentQuestion {
    pub question_id: Uuid,
    pub marks: Decimal,
    pub order: i32,
    #[serde(default)]
    pub optional: bool,
    /// Per-question limit in seconds.
    pub time_limit_seconds: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentConfig {
    pub duration_minutes: i32,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub shuffle_options: bool,
    pub max_attempts: i32,
    #[serde(default)]
    pub attempt_delay_minutes: i32,
    #[serde(default)]
    pub negative_marking: NegativeMarking,
    #[serde(default = "default_partial_marking")]
    pub partial_marking: bool,
    pub result_visibility: ResultVisibility,
}

fn default_partial_marking() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegativeMarking {
    pub enabled: bool,
    pub percentage: Decimal,
}

impl NegativeMarking {
    pub fn penalty_for(&self, max_marks: Decimal) -> Decimal {
        if !self.enabled {
            return Decimal::ZERO;
        }
        max_marks * self.percentage / Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultVisibility {
    Immediate,
    AfterClose,
    OnRelease,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub grace_period_minutes: i32,
    #[serde(default)]
    pub late_submission: LateSubmissionPolicy,
}

impl Schedule {
    /// Latest instant at which an attempt may still be open.
    pub fn cutoff(&self) -> DateTime<Utc> {
        if self.late_submission.allowed {
            self.end + Duration::minutes(self.grace_period_minutes as i64)
        } else {
            self.end
        }
    }

    pub fn is_late(&self, at: DateTime<Utc>) -> bool {
        at > self.end
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LateSubmissionPolicy {
    pub allowed: bool,
    #[serde(default)]
    pub penalty_percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeBand {
    pub min: i32,
    pub max: i32,
    pub grade: String,
}

impl GradeBand {
    pub fn new(min: i32, max: i32, grade: impl Into<String>) -> Self {
        Self {
            min,
            max,
            grade: grade.into(),
        }
    }

    pub fn contains(&self, percentage: i32) -> bool {
        percentage >= self.min && percentage <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    Open,
    Participants,
}

impl Assessment {
    /// Passing threshold expressed as a whole-number percentage of total marks.
    pub fn allows(&self, student_id: Uuid) -> bool {
        match self.access {
            AccessPolicy::Open => true,
            AccessPolicy::Participants => self.participants.contains(&student_id),
        }
    }

    /// Whether students may see scores and answer keys at `now`.
    pub fn results_visible(&self, now: DateTime<Utc>) -> bool {
        match self.config.result_visibility {
            ResultVisibility::Immediate => true,
            ResultVisibility::AfterClose => now > self.schedule.cutoff(),
            ResultVisibility::OnRelease => self.results_released,
        }
    }
}

/// Running aggregate over terminal attempts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentStatistics {
    pub total_attempts: i64,
    pub completed_attempts: i64,
    pub passed_attempts: i64,
    pub pass_rate: Decimal,
    pub average_score: Decimal,
    pub highest_score: Option<Decimal>,
    pub lowest_score: Option<Decimal>,
    pub average_percentage: Decimal,
    pub average_time_minutes: Decimal,
}

/// One finished attempt as seen by the statistics aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptOutcome {
    pub marks_obtained: Decimal,
    pub percentage: i32,
    pub time_taken_minutes: i32,
    pub passed: bool,
}

impl AssessmentStatistics {
    /// Fold one more outcome in with incremental averages.
    pub fn record(&mut self, outcome: &AttemptOutcome) {
        let old_count = Decimal::from(self.completed_attempts);
        let new_count = old_count + Decimal::ONE;

        self.average_score =
            (self.average_score * old_count + outcome.marks_obtained) / new_count;
        self.average_percentage =
            (self.average_percentage * old_count + Decimal::from(outcome.percentage)) / new_count;
        self.average_time_minutes = (self.average_time_minutes * old_count
            + Decimal::from(outcome.time_taken_minutes))
            / new_count;

        self.highest_score = Some(match self.highest_score {
            Some(h) => h.max(outcome.marks_obtained),
            None => outcome.marks_obtained,
        });
        self.lowest_score = Some(match self.lowest_score {
            Some(l) => l.min(outcome.marks_obtained),
            None => outcome.marks_obtained,
        });

        self.completed_attempts += 1;
        if outcome.passed {
            self.passed_attempts += 1;
        }
        self.pass_rate =
            Decimal::from(self.passed_attempts) / Decimal::from(self.completed_attempts);
    }

    /// Rebuild the aggregate from scratch, keeping the started-attempt counter.
    pub fn derive(total_attempts: i64, outcomes: &[AttemptOutcome]) -> Self {
        let mut stats = AssessmentStatistics {
            total_attempts,
            ..Default::default()
        };
        for outcome in outcomes {
            stats.record(outcome);
        }
        stats
    }
}
