//! In-memory store for tests and local runs.
//!
//! A single lock guards all state, so each trait call is atomic the same
//! way one SQL statement or transaction is in the Postgres store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::store::{FinalizeOutcome, Finalizer, InsertOutcome, Regrader, Store};
use crate::error::{Error, Result};
use crate::models::assessment::{Assessment, AssessmentStatistics, AttemptOutcome};
use crate::models::attempt::{Attempt, AttemptStatus, Response, SecurityEvent};
use crate::models::question::Question;
use crate::services::scoring_service::ScoringService;

#[derive(Default)]
struct Inner {
    questions: HashMap<Uuid, Question>,
    assessments: HashMap<Uuid, Assessment>,
    attempts: HashMap<Uuid, Attempt>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_question(&self, question: Question) {
        self.inner
            .write()
            .await
            .questions
            .insert(question.id, question);
    }

    /// Overwrite an assessment in place, bypassing creation checks.
    pub async fn put_assessment(&self, assessment: Assessment) {
        self.inner
            .write()
            .await
            .assessments
            .insert(assessment.id, assessment);
    }

    pub async fn attempt_count(&self) -> usize {
        self.inner.read().await.attempts.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_question(&self, id: Uuid) -> Result<Option<Question>> {
        Ok(self.inner.read().await.questions.get(&id).cloned())
    }

    async fn get_questions(&self, ids: &[Uuid]) -> Result<Vec<Question>> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.questions.get(id).cloned())
            .collect())
    }

    async fn get_assessment(&self, id: Uuid) -> Result<Option<Assessment>> {
        Ok(self.inner.read().await.assessments.get(&id).cloned())
    }

    async fn insert_assessment(&self, assessment: &Assessment) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.assessments.contains_key(&assessment.id) {
            return Err(Error::BadRequest(format!(
                "Assessment {} already exists",
                assessment.id
            )));
        }
        inner.assessments.insert(assessment.id, assessment.clone());
        Ok(())
    }

    async fn record_attempt_started(&self, assessment_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let assessment = inner
            .assessments
            .get_mut(&assessment_id)
            .ok_or_else(|| Error::NotFound("Assessment not found".into()))?;
        assessment.statistics.total_attempts += 1;
        Ok(())
    }

    async fn refresh_statistics(&self, assessment_id: Uuid) -> Result<AssessmentStatistics> {
        let mut inner = self.inner.write().await;
        let outcomes: Vec<AttemptOutcome> = inner
            .attempts
            .values()
            .filter(|a| a.assessment_id == assessment_id && a.status.is_terminal())
            .filter_map(ScoringService::outcome)
            .collect();
        let assessment = inner
            .assessments
            .get_mut(&assessment_id)
            .ok_or_else(|| Error::NotFound("Assessment not found".into()))?;
        assessment.statistics =
            AssessmentStatistics::derive(assessment.statistics.total_attempts, &outcomes);
        Ok(assessment.statistics.clone())
    }

    async fn get_attempt(&self, id: Uuid) -> Result<Option<Attempt>> {
        Ok(self.inner.read().await.attempts.get(&id).cloned())
    }

    async fn list_attempts(&self, assessment_id: Uuid, student_id: Uuid) -> Result<Vec<Attempt>> {
        let inner = self.inner.read().await;
        let mut attempts: Vec<Attempt> = inner
            .attempts
            .values()
            .filter(|a| a.assessment_id == assessment_id && a.student_id == student_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }

    async fn insert_attempt(&self, attempt: &Attempt) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().await;
        let clash = inner.attempts.values().any(|a| {
            a.assessment_id == attempt.assessment_id
                && a.student_id == attempt.student_id
                && (a.status.is_live() || a.attempt_number == attempt.attempt_number)
        });
        if clash {
            return Ok(InsertOutcome::LiveExists);
        }
        inner.attempts.insert(attempt.id, attempt.clone());
        Ok(InsertOutcome::Created(attempt.clone()))
    }

    async fn save_response(
        &self,
        attempt_id: Uuid,
        index: usize,
        response: &Response,
        status: AttemptStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(attempt) = inner.attempts.get_mut(&attempt_id) else {
            return Err(Error::NotFound("Attempt not found".into()));
        };
        if !attempt.status.is_live() {
            return Ok(false);
        }
        let slot = attempt
            .responses
            .get_mut(index)
            .ok_or_else(|| Error::BadRequest(format!("No response slot {}", index)))?;
        *slot = response.clone();
        attempt.status = status;
        Ok(true)
    }

    async fn transition_status(
        &self,
        attempt_id: Uuid,
        from: &[AttemptStatus],
        to: AttemptStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(attempt) = inner.attempts.get_mut(&attempt_id) else {
            return Err(Error::NotFound("Attempt not found".into()));
        };
        if !from.contains(&attempt.status) {
            return Ok(false);
        }
        attempt.status = to;
        Ok(true)
    }

    async fn release_results(&self, assessment_id: Uuid) -> Result<Option<Assessment>> {
        let mut inner = self.inner.write().await;
        let Some(assessment) = inner.assessments.get_mut(&assessment_id) else {
            return Ok(None);
        };
        assessment.results_released = true;
        Ok(Some(assessment.clone()))
    }

    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        finalize: &Finalizer<'_>,
    ) -> Result<FinalizeOutcome> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .attempts
            .get(&attempt_id)
            .ok_or_else(|| Error::NotFound("Attempt not found".into()))?;
        if !stored.status.is_live() {
            return Ok(FinalizeOutcome::AlreadyTerminal(stored.clone()));
        }

        let mut attempt = stored.clone();
        let outcome = finalize(&mut attempt)?;
        let assessment = inner
            .assessments
            .get_mut(&attempt.assessment_id)
            .ok_or_else(|| Error::NotFound("Assessment not found".into()))?;
        assessment.statistics.record(&outcome);

        inner.attempts.insert(attempt_id, attempt.clone());
        Ok(FinalizeOutcome::Finalized(attempt))
    }

    async fn regrade_attempt(&self, attempt_id: Uuid, regrade: &Regrader<'_>) -> Result<Attempt> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| Error::NotFound("Attempt not found".into()))?;
        let mut attempt = stored.clone();
        regrade(&mut attempt)?;
        *stored = attempt.clone();
        Ok(attempt)
    }

    async fn append_security_event(&self, event: &SecurityEvent) -> Result<()> {
        let mut inner = self.inner.write().await;
        let attempt = inner
            .attempts
            .get_mut(&event.attempt_id)
            .ok_or_else(|| Error::NotFound("Attempt not found".into()))?;
        attempt.security_events.push(event.clone());
        Ok(())
    }
}
