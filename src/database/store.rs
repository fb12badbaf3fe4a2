//! Storage contract for assessments, questions and attempts.
//!
//! Every write that can race is expressed as a single conditional
//! operation so the backing store, not application memory, decides
//! the winner.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::assessment::{Assessment, AssessmentStatistics, AttemptOutcome};
use crate::models::attempt::{Attempt, AttemptStatus, Response, SecurityEvent};
use crate::models::question::Question;

/// Turns the freshly locked live attempt into a scored terminal one.
pub type Finalizer<'a> = dyn Fn(&mut Attempt) -> Result<AttemptOutcome> + Send + Sync + 'a;

/// Applies a grader's change to the freshly locked terminal attempt.
pub type Regrader<'a> = dyn Fn(&mut Attempt) -> Result<()> + Send + Sync + 'a;

#[derive(Debug)]
pub enum FinalizeOutcome {
    /// This call moved the attempt out of its live state.
    Finalized(Attempt),
    /// Someone else finalized it first; the stored attempt is returned untouched.
    AlreadyTerminal(Attempt),
}

/// Result of trying to create a live attempt.
#[derive(Debug)]
pub enum InsertOutcome {
    Created(Attempt),
    /// Another live attempt for the same student and assessment already exists.
    LiveExists,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_question(&self, id: Uuid) -> Result<Option<Question>>;

    async fn get_questions(&self, ids: &[Uuid]) -> Result<Vec<Question>>;

    async fn get_assessment(&self, id: Uuid) -> Result<Option<Assessment>>;

    async fn insert_assessment(&self, assessment: &Assessment) -> Result<()>;

    /// Atomically bump the started-attempt counter.
    async fn record_attempt_started(&self, assessment_id: Uuid) -> Result<()>;

    /// Re-derive statistics from every terminal attempt of the assessment.
    async fn refresh_statistics(&self, assessment_id: Uuid) -> Result<AssessmentStatistics>;

    async fn get_attempt(&self, id: Uuid) -> Result<Option<Attempt>>;

    /// All attempts of a student on an assessment, ordered by attempt number.
    async fn list_attempts(&self, assessment_id: Uuid, student_id: Uuid) -> Result<Vec<Attempt>>;

    /// Insert unless a live attempt for the same key exists.
    async fn insert_attempt(&self, attempt: &Attempt) -> Result<InsertOutcome>;

    /// Replace one response and the status, only while the attempt is live.
    /// Returns `false` when the attempt had already left the live states.
    async fn save_response(
        &self,
        attempt_id: Uuid,
        index: usize,
        response: &Response,
        status: AttemptStatus,
    ) -> Result<bool>;

    /// Compare-and-swap on status.
    async fn transition_status(
        &self,
        attempt_id: Uuid,
        from: &[AttemptStatus],
        to: AttemptStatus,
    ) -> Result<bool>;

    async fn release_results(&self, assessment_id: Uuid) -> Result<Option<Assessment>>;

    /// Lock the stored attempt, run `finalize` on it while it is still live,
    /// persist it and fold its outcome into the assessment statistics in one
    /// unit. Answers saved before the lock are part of what gets scored.
    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        finalize: &Finalizer<'_>,
    ) -> Result<FinalizeOutcome>;

    /// Lock the stored attempt, apply `regrade` and persist responses, score
    /// and status. An error from `regrade` leaves the row unchanged.
    async fn regrade_attempt(&self, attempt_id: Uuid, regrade: &Regrader<'_>) -> Result<Attempt>;

    async fn append_security_event(&self, event: &SecurityEvent) -> Result<()>;
}
