use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::store::{FinalizeOutcome, Finalizer, InsertOutcome, Regrader, Store};
use crate::error::{Error, Result};
use crate::models::assessment::{
    AccessPolicy, Assessment, AssessmentConfig, AssessmentQuestion, AssessmentStatistics,
    AssessmentStatus, GradeBand, Schedule,
};
use crate::models::attempt::{
    Attempt, AttemptStatus, PresentedQuestion, Response, ScoreSummary, SecurityEvent, Severity,
};
use crate::models::question::{AnswerKey, Question, QuestionOption, QuestionType};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_events(&self, attempt_id: Uuid) -> Result<Vec<SecurityEvent>> {
        let rows = sqlx::query_as::<_, SecurityEventRow>(
            r#"SELECT id, attempt_id, event_type, severity, details, occurred_at
               FROM attempt_security_events
               WHERE attempt_id = $1
               ORDER BY occurred_at, id"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SecurityEvent::try_from).collect()
    }

    async fn hydrate(&self, row: AttemptRow) -> Result<Attempt> {
        let events = self.load_events(row.id).await?;
        let mut attempt = Attempt::try_from(row)?;
        attempt.security_events = events;
        Ok(attempt)
    }
}

fn live_statuses() -> Vec<String> {
    AttemptStatus::LIVE
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[derive(Debug, FromRow)]
struct QuestionRow {
    id: Uuid,
    question_type: String,
    prompt: String,
    options: Json<Vec<QuestionOption>>,
    blank_count: i32,
    answer_key: Json<AnswerKey>,
    marks: Decimal,
    explanation: Option<String>,
}

impl TryFrom<QuestionRow> for Question {
    type Error = Error;

    fn try_from(row: QuestionRow) -> Result<Self> {
        let question_type = QuestionType::parse(&row.question_type).ok_or_else(|| {
            Error::Internal(format!("Unknown question type '{}'", row.question_type))
        })?;
        Ok(Question {
            id: row.id,
            question_type,
            prompt: row.prompt,
            options: row.options.0,
            blank_count: row.blank_count.max(0) as usize,
            answer_key: row.answer_key.0,
            marks: row.marks,
            explanation: row.explanation,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssessmentRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    status: String,
    questions: Json<Vec<AssessmentQuestion>>,
    config: Json<AssessmentConfig>,
    schedule: Json<Schedule>,
    grading_scale: Json<Vec<GradeBand>>,
    total_marks: Decimal,
    passing_marks: Decimal,
    access: String,
    results_released: bool,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    stat_total_attempts: i64,
    stat_completed_attempts: i64,
    stat_passed_attempts: i64,
    stat_pass_rate: Decimal,
    stat_average_score: Decimal,
    stat_highest_score: Option<Decimal>,
    stat_lowest_score: Option<Decimal>,
    stat_average_percentage: Decimal,
    stat_average_time_minutes: Decimal,
}

impl AssessmentRow {
    fn statistics(&self) -> AssessmentStatistics {
        AssessmentStatistics {
            total_attempts: self.stat_total_attempts,
            completed_attempts: self.stat_completed_attempts,
            passed_attempts: self.stat_passed_attempts,
            pass_rate: self.stat_pass_rate,
            average_score: self.stat_average_score,
            highest_score: self.stat_highest_score,
            lowest_score: self.stat_lowest_score,
            average_percentage: self.stat_average_percentage,
            average_time_minutes: self.stat_average_time_minutes,
        }
    }

    fn into_assessment(self, participants: Vec<Uuid>) -> Result<Assessment> {
        let statistics = self.statistics();
        let status = AssessmentStatus::parse(&self.status)
            .ok_or_else(|| Error::Internal(format!("Unknown assessment status '{}'", self.status)))?;
        let access = match self.access.as_str() {
            "open" => AccessPolicy::Open,
            "participants" => AccessPolicy::Participants,
            other => return Err(Error::Internal(format!("Unknown access policy '{}'", other))),
        };
        Ok(Assessment {
            id: self.id,
            title: self.title,
            description: self.description,
            status,
            questions: self.questions.0,
            config: self.config.0,
            schedule: self.schedule.0,
            grading_scale: self.grading_scale.0,
            total_marks: self.total_marks,
            passing_marks: self.passing_marks,
            access,
            participants,
            results_released: self.results_released,
            statistics,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AttemptRow {
    id: Uuid,
    assessment_id: Uuid,
    student_id: Uuid,
    attempt_number: i32,
    status: String,
    started_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    time_remaining_minutes: i32,
    time_taken_minutes: Option<i32>,
    questions: Json<Vec<PresentedQuestion>>,
    responses: Json<Vec<Response>>,
    score: Option<Json<ScoreSummary>>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = Error;

    fn try_from(row: AttemptRow) -> Result<Self> {
        let status = AttemptStatus::parse(&row.status)
            .ok_or_else(|| Error::Internal(format!("Unknown attempt status '{}'", row.status)))?;
        Ok(Attempt {
            id: row.id,
            assessment_id: row.assessment_id,
            student_id: row.student_id,
            attempt_number: row.attempt_number,
            status,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            time_remaining_minutes: row.time_remaining_minutes,
            time_taken_minutes: row.time_taken_minutes,
            questions: row.questions.0,
            responses: row.responses.0,
            score: row.score.map(|s| s.0),
            security_events: Vec::new(),
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SecurityEventRow {
    id: Uuid,
    attempt_id: Uuid,
    event_type: String,
    severity: String,
    details: Option<Json<serde_json::Value>>,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<SecurityEventRow> for SecurityEvent {
    type Error = Error;

    fn try_from(row: SecurityEventRow) -> Result<Self> {
        let severity = Severity::parse(&row.severity)
            .ok_or_else(|| Error::Internal(format!("Unknown severity '{}'", row.severity)))?;
        Ok(SecurityEvent {
            id: row.id,
            attempt_id: row.attempt_id,
            event_type: row.event_type,
            severity,
            details: row.details.map(|d| d.0),
            occurred_at: row.occurred_at,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_question(&self, id: Uuid) -> Result<Option<Question>> {
        let row = sqlx::query_as::<_, QuestionRow>(
            r#"SELECT id, question_type, prompt, options, blank_count, answer_key, marks, explanation
               FROM questions WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Question::try_from).transpose()
    }

    async fn get_questions(&self, ids: &[Uuid]) -> Result<Vec<Question>> {
        let rows = sqlx::query_as::<_, QuestionRow>(
            r#"SELECT id, question_type, prompt, options, blank_count, answer_key, marks, explanation
               FROM questions WHERE id = ANY($1)"#,
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Question::try_from).collect()
    }

    async fn get_assessment(&self, id: Uuid) -> Result<Option<Assessment>> {
        let row = sqlx::query_as::<_, AssessmentRow>(r#"SELECT * FROM assessments WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let participants: Vec<Uuid> = sqlx::query_scalar(
            r#"SELECT student_id FROM assessment_participants WHERE assessment_id = $1"#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        row.into_assessment(participants).map(Some)
    }

    async fn insert_assessment(&self, assessment: &Assessment) -> Result<()> {
        let access = match assessment.access {
            AccessPolicy::Open => "open",
            AccessPolicy::Participants => "participants",
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO assessments (
                id, title, description, status, questions, config, schedule, grading_scale,
                total_marks, passing_marks, access, results_released, created_by, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(assessment.id)
        .bind(&assessment.title)
        .bind(&assessment.description)
        .bind(assessment.status.as_str())
        .bind(Json(&assessment.questions))
        .bind(Json(&assessment.config))
        .bind(Json(&assessment.schedule))
        .bind(Json(&assessment.grading_scale))
        .bind(assessment.total_marks)
        .bind(assessment.passing_marks)
        .bind(access)
        .bind(assessment.results_released)
        .bind(assessment.created_by)
        .bind(assessment.created_at)
        .bind(assessment.updated_at)
        .execute(&mut *tx)
        .await?;

        for student_id in &assessment.participants {
            sqlx::query(
                r#"INSERT INTO assessment_participants (assessment_id, student_id)
                   VALUES ($1, $2) ON CONFLICT DO NOTHING"#,
            )
            .bind(assessment.id)
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_attempt_started(&self, assessment_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"UPDATE assessments SET stat_total_attempts = stat_total_attempts + 1 WHERE id = $1"#,
        )
        .bind(assessment_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refresh_statistics(&self, assessment_id: Uuid) -> Result<AssessmentStatistics> {
        let row = sqlx::query_as::<_, AssessmentRow>(
            r#"
            UPDATE assessments a SET
                stat_completed_attempts = s.completed,
                stat_passed_attempts = s.passed,
                stat_pass_rate = CASE WHEN s.completed > 0
                    THEN s.passed::numeric / s.completed ELSE 0 END,
                stat_average_score = COALESCE(s.average_score, 0),
                stat_highest_score = s.highest_score,
                stat_lowest_score = s.lowest_score,
                stat_average_percentage = COALESCE(s.average_percentage, 0),
                stat_average_time_minutes = COALESCE(s.average_time, 0),
                updated_at = NOW()
            FROM (
                SELECT
                    COUNT(*) AS completed,
                    COUNT(*) FILTER (WHERE (score->>'passed')::boolean) AS passed,
                    AVG((score->>'marks_obtained')::numeric) AS average_score,
                    MAX((score->>'marks_obtained')::numeric) AS highest_score,
                    MIN((score->>'marks_obtained')::numeric) AS lowest_score,
                    AVG((score->>'percentage')::numeric) AS average_percentage,
                    AVG(COALESCE(time_taken_minutes, 0))::numeric AS average_time
                FROM attempts
                WHERE assessment_id = $1
                  AND NOT (status = ANY($2))
                  AND score IS NOT NULL
            ) s
            WHERE a.id = $1
            RETURNING a.*
            "#,
        )
        .bind(assessment_id)
        .bind(live_statuses())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.statistics())
    }

    async fn get_attempt(&self, id: Uuid) -> Result<Option<Attempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn list_attempts(&self, assessment_id: Uuid, student_id: Uuid) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            r#"SELECT * FROM attempts
               WHERE assessment_id = $1 AND student_id = $2
               ORDER BY attempt_number"#,
        )
        .bind(assessment_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let mut attempts = Vec::with_capacity(rows.len());
        for row in rows {
            attempts.push(self.hydrate(row).await?);
        }
        Ok(attempts)
    }

    async fn insert_attempt(&self, attempt: &Attempt) -> Result<InsertOutcome> {
        let inserted = sqlx::query_as::<_, AttemptRow>(
            r#"
            INSERT INTO attempts (
                id, assessment_id, student_id, attempt_number, status, started_at, submitted_at,
                time_remaining_minutes, time_taken_minutes, questions, responses, score,
                ip_address, user_agent, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, NULL, $8, $9, NULL, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.assessment_id)
        .bind(attempt.student_id)
        .bind(attempt.attempt_number)
        .bind(attempt.status.as_str())
        .bind(attempt.started_at)
        .bind(attempt.time_remaining_minutes)
        .bind(Json(&attempt.questions))
        .bind(Json(&attempt.responses))
        .bind(&attempt.ip_address)
        .bind(&attempt.user_agent)
        .bind(attempt.updated_at)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(InsertOutcome::Created(Attempt::try_from(row)?)),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::LiveExists),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_response(
        &self,
        attempt_id: Uuid,
        index: usize,
        response: &Response,
        status: AttemptStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE attempts
            SET responses = jsonb_set(responses, ARRAY[$2]::text[], $3),
                status = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($5)
            "#,
        )
        .bind(attempt_id)
        .bind(index.to_string())
        .bind(Json(response))
        .bind(status.as_str())
        .bind(live_statuses())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition_status(
        &self,
        attempt_id: Uuid,
        from: &[AttemptStatus],
        to: AttemptStatus,
    ) -> Result<bool> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            r#"UPDATE attempts SET status = $2, updated_at = NOW()
               WHERE id = $1 AND status = ANY($3)"#,
        )
        .bind(attempt_id)
        .bind(to.as_str())
        .bind(from)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_results(&self, assessment_id: Uuid) -> Result<Option<Assessment>> {
        let updated = sqlx::query(
            r#"UPDATE assessments SET results_released = TRUE, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(assessment_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_assessment(assessment_id).await
    }

    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        finalize: &Finalizer<'_>,
    ) -> Result<FinalizeOutcome> {
        let mut tx = self.pool.begin().await?;

        // Concurrent saves block on this lock and then fail their live-status guard.
        let row = sqlx::query_as::<_, AttemptRow>(
            r#"SELECT * FROM attempts WHERE id = $1 FOR UPDATE"#,
        )
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound("Attempt not found".into()))?;
        let mut attempt = self.hydrate(row).await?;
        if !attempt.status.is_live() {
            tx.rollback().await?;
            return Ok(FinalizeOutcome::AlreadyTerminal(attempt));
        }

        let outcome = finalize(&mut attempt)?;

        sqlx::query(
            r#"
            UPDATE attempts
            SET status = $2, submitted_at = $3, time_remaining_minutes = $4,
                time_taken_minutes = $5, score = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.status.as_str())
        .bind(attempt.submitted_at)
        .bind(attempt.time_remaining_minutes)
        .bind(attempt.time_taken_minutes)
        .bind(attempt.score.as_ref().map(Json))
        .bind(attempt.updated_at)
        .execute(&mut *tx)
        .await?;

        // Every right-hand side reads the pre-update row, so this is one atomic fold.
        sqlx::query(
            r#"
            UPDATE assessments SET
                stat_average_score =
                    (stat_average_score * stat_completed_attempts + $2) / (stat_completed_attempts + 1),
                stat_average_percentage =
                    (stat_average_percentage * stat_completed_attempts + $3) / (stat_completed_attempts + 1),
                stat_average_time_minutes =
                    (stat_average_time_minutes * stat_completed_attempts + $4) / (stat_completed_attempts + 1),
                stat_highest_score = GREATEST(COALESCE(stat_highest_score, $2), $2),
                stat_lowest_score = LEAST(COALESCE(stat_lowest_score, $2), $2),
                stat_passed_attempts = stat_passed_attempts + CASE WHEN $5 THEN 1 ELSE 0 END,
                stat_pass_rate = (stat_passed_attempts + CASE WHEN $5 THEN 1 ELSE 0 END)::numeric
                    / (stat_completed_attempts + 1),
                stat_completed_attempts = stat_completed_attempts + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(attempt.assessment_id)
        .bind(outcome.marks_obtained)
        .bind(Decimal::from(outcome.percentage))
        .bind(Decimal::from(outcome.time_taken_minutes))
        .bind(outcome.passed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(FinalizeOutcome::Finalized(attempt))
    }

    async fn regrade_attempt(&self, attempt_id: Uuid, regrade: &Regrader<'_>) -> Result<Attempt> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AttemptRow>(
            r#"SELECT * FROM attempts WHERE id = $1 FOR UPDATE"#,
        )
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound("Attempt not found".into()))?;
        let mut attempt = self.hydrate(row).await?;
        if let Err(err) = regrade(&mut attempt) {
            tx.rollback().await?;
            return Err(err);
        }

        sqlx::query(
            r#"UPDATE attempts SET status = $2, responses = $3, score = $4, updated_at = $5
               WHERE id = $1"#,
        )
        .bind(attempt.id)
        .bind(attempt.status.as_str())
        .bind(Json(&attempt.responses))
        .bind(attempt.score.as_ref().map(Json))
        .bind(attempt.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(attempt)
    }

    async fn append_security_event(&self, event: &SecurityEvent) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO attempt_security_events (id, attempt_id, event_type, severity, details, occurred_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(event.id)
        .bind(event.attempt_id)
        .bind(&event.event_type)
        .bind(event.severity.as_str())
        .bind(event.details.as_ref().map(Json))
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
