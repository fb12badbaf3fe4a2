use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::database::store::{FinalizeOutcome, InsertOutcome, Store};
use crate::error::{Error, Result};
use crate::models::assessment::{Assessment, AttemptOutcome};
use crate::models::attempt::{
    AnswerPayload, Attempt, AttemptStatus, ManualGrade, PresentedQuestion, Response,
};
use crate::models::identity::{Identity, Role};
use crate::models::question::Question;
use crate::services::grading_service::GradingService;
use crate::services::scoring_service::ScoringService;
use crate::services::timing_service::TimingService;
use crate::utils::time::Clock;

/// Where a start request came from, kept on the attempt for review.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub attempt: Attempt,
    pub resumed: bool,
}

/// An attempt as of this request, after expiry has been applied.
#[derive(Debug, Clone)]
pub struct CurrentAttempt {
    pub attempt: Attempt,
    pub results_visible: bool,
}

#[derive(Debug, Clone)]
pub struct SaveAnswer {
    pub question_id: Uuid,
    pub answer: AnswerPayload,
    pub time_spent_delta_seconds: i32,
    pub marked_for_review: bool,
}

#[derive(Debug, Clone)]
pub struct SavedAnswer {
    pub response: Response,
    pub status: AttemptStatus,
    pub time_remaining_minutes: i32,
    /// Grading is echoed back only under immediate result visibility.
    pub grading_visible: bool,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub attempt: Attempt,
    /// The attempt was already terminal; nothing was rescored.
    pub replayed: bool,
    pub results_visible: bool,
    /// Question keys for the result breakdown, loaded only when visible.
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub attempt: Attempt,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone)]
pub struct ManualGradeInput {
    pub question_id: Uuid,
    pub marks: Decimal,
    pub feedback: Option<String>,
}

#[derive(Clone)]
pub struct AttemptService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl AttemptService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start a new attempt, or hand back the live one.
    ///
    /// Eligibility is checked in a fixed order and each failure is distinct:
    /// addressable, window, authorization, quota, then cooldown. Stale live
    /// attempts are expired before the quota is counted.
    pub async fn start(
        &self,
        assessment_id: Uuid,
        identity: &Identity,
        ctx: RequestContext,
    ) -> Result<StartOutcome> {
        if identity.role != Role::Student {
            return Err(Error::Forbidden("Only students can take assessments".into()));
        }
        let student_id = identity.user_id;
        let assessment = self.load_assessment(assessment_id).await?;
        if !assessment.status.is_addressable() {
            return Err(Error::NotFound("Assessment not available".into()));
        }

        let now = self.clock.now();
        if now < assessment.schedule.start {
            return Err(Error::NotYetOpen {
                opens_at: assessment.schedule.start,
            });
        }
        if now > assessment.schedule.end {
            return Err(Error::WindowClosed {
                closed_at: assessment.schedule.end,
            });
        }
        if !assessment.allows(student_id) {
            return Err(Error::NotAuthorized);
        }

        let mut attempts = Vec::new();
        for attempt in self.store.list_attempts(assessment_id, student_id).await? {
            attempts.push(self.enforce_timing(attempt, &assessment, now).await?);
        }

        let used = attempts.iter().filter(|a| a.status.is_terminal()).count() as i32;
        if used >= assessment.config.max_attempts {
            return Err(Error::AttemptsExhausted {
                max_attempts: assessment.config.max_attempts,
            });
        }

        if let Some(live) = attempts.iter().find(|a| a.status.is_live()) {
            tracing::info!(attempt_id = %live.id, %student_id, "Resuming live attempt");
            return Ok(StartOutcome {
                attempt: live.clone(),
                resumed: true,
            });
        }

        if assessment.config.attempt_delay_minutes > 0 {
            let last_submitted = attempts.iter().filter_map(|a| a.submitted_at).max();
            if let Some(last) = last_submitted {
                let available_at =
                    last + Duration::minutes(assessment.config.attempt_delay_minutes as i64);
                if now < available_at {
                    return Err(Error::AttemptCooldown { available_at });
                }
            }
        }

        let attempt_number = attempts
            .iter()
            .map(|a| a.attempt_number)
            .max()
            .unwrap_or(0)
            + 1;
        let questions = self.session_questions(&assessment).await?;
        let responses = questions.iter().map(Response::placeholder).collect();
        let timing = TimingService::check(now, &assessment, now);

        let attempt = Attempt {
            id: Uuid::new_v4(),
            assessment_id,
            student_id,
            attempt_number,
            status: AttemptStatus::Started,
            started_at: now,
            submitted_at: None,
            time_remaining_minutes: timing.time_remaining_minutes,
            time_taken_minutes: None,
            questions,
            responses,
            score: None,
            security_events: Vec::new(),
            ip_address: ctx.ip_address,
            user_agent: ctx.user_agent,
            updated_at: now,
        };

        match self.store.insert_attempt(&attempt).await? {
            InsertOutcome::Created(attempt) => {
                self.store.record_attempt_started(assessment_id).await?;
                tracing::info!(
                    attempt_id = %attempt.id,
                    %assessment_id,
                    %student_id,
                    attempt_number,
                    "Attempt started"
                );
                Ok(StartOutcome {
                    attempt,
                    resumed: false,
                })
            }
            InsertOutcome::LiveExists => {
                // A concurrent request won the insert; hand back its attempt.
                let live = self
                    .store
                    .list_attempts(assessment_id, student_id)
                    .await?
                    .into_iter()
                    .find(|a| a.status.is_live());
                match live {
                    Some(attempt) => Ok(StartOutcome {
                        attempt,
                        resumed: true,
                    }),
                    None => Err(Error::InvalidState(
                        "Attempt was started concurrently, retry".into(),
                    )),
                }
            }
        }
    }

    /// The live attempt if there is one, else the most recent attempt.
    pub async fn get_current(
        &self,
        assessment_id: Uuid,
        identity: &Identity,
    ) -> Result<CurrentAttempt> {
        let assessment = self.load_assessment(assessment_id).await?;
        let attempts = self
            .store
            .list_attempts(assessment_id, identity.user_id)
            .await?;
        let current = match attempts.iter().position(|a| a.status.is_live()) {
            Some(index) => attempts.into_iter().nth(index),
            None => attempts.into_iter().last(),
        }
        .ok_or_else(|| Error::NotFound("No attempt for this assessment".into()))?;

        let now = self.clock.now();
        let attempt = self.enforce_timing(current, &assessment, now).await?;
        Ok(CurrentAttempt {
            attempt,
            results_visible: assessment.results_visible(now),
        })
    }

    pub async fn save_answer(
        &self,
        attempt_id: Uuid,
        identity: &Identity,
        input: SaveAnswer,
    ) -> Result<SavedAnswer> {
        if input.time_spent_delta_seconds < 0 {
            return Err(Error::BadRequest("time_spent_seconds cannot be negative".into()));
        }
        let attempt = self.load_owned(attempt_id, identity).await?;
        let assessment = self.load_assessment(attempt.assessment_id).await?;
        let now = self.clock.now();

        let mut attempt = self.enforce_timing(attempt, &assessment, now).await?;
        Self::ensure_editable(&attempt)?;

        let limit = attempt
            .questions
            .iter()
            .find(|q| q.question_id == input.question_id)
            .and_then(|q| q.time_limit_seconds);
        let (index, response) = attempt.response_mut(input.question_id).ok_or_else(|| {
            Error::BadRequest(format!(
                "Question {} is not part of this attempt",
                input.question_id
            ))
        })?;

        let time_spent = response
            .time_spent_seconds
            .checked_add(input.time_spent_delta_seconds)
            .ok_or_else(|| Error::BadRequest("time_spent_seconds is out of range".into()))?;
        if let Some(limit) = limit {
            if time_spent > limit {
                return Err(Error::QuestionTimeLimit {
                    question_id: input.question_id,
                });
            }
        }

        let question = self
            .store
            .get_question(input.question_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Question {} not found", input.question_id)))?;
        let grade = GradingService::grade_answer(
            &question,
            &input.answer,
            response.max_marks,
            &assessment.config,
        )?;

        response.answer = Some(input.answer);
        response.time_spent_seconds = time_spent;
        response.answered = true;
        response.marked_for_review = input.marked_for_review;
        response.auto_grade = grade;
        response.answered_at = Some(now);
        response.refresh_final_marks();
        let response = response.clone();

        let status = match attempt.status {
            AttemptStatus::Started => AttemptStatus::InProgress,
            other => other,
        };
        if !self
            .store
            .save_response(attempt_id, index, &response, status)
            .await?
        {
            // Finalized between our read and write.
            let stored = self.load_attempt(attempt_id).await?;
            return Err(Self::not_editable(stored.status));
        }

        tracing::info!(
            %attempt_id,
            question_id = %response.question_id,
            answered = attempt.answered_count(),
            "Answer saved"
        );

        Ok(SavedAnswer {
            response,
            status,
            time_remaining_minutes: attempt.time_remaining_minutes,
            grading_visible: assessment.results_visible(now),
        })
    }

    /// Finalize an attempt. Submitting a terminal attempt replays the stored
    /// result without rescoring.
    pub async fn submit(&self, attempt_id: Uuid, identity: &Identity) -> Result<Submission> {
        let attempt = self.load_owned(attempt_id, identity).await?;
        let assessment = self.load_assessment(attempt.assessment_id).await?;
        let now = self.clock.now();

        let (attempt, replayed) = if attempt.status.is_terminal() {
            (attempt, true)
        } else if TimingService::check(attempt.started_at, &assessment, now).expired {
            self.auto_submit(attempt, &assessment, now).await?
        } else {
            let time_taken = TimingService::elapsed_minutes(attempt.started_at, now);
            let (attempt, won) = self
                .finalize(attempt.id, &assessment, AttemptStatus::Submitted, now, time_taken)
                .await?;
            (attempt, !won)
        };

        let results_visible = assessment.results_visible(now);
        let questions = if results_visible {
            self.attempt_questions(&attempt).await?
        } else {
            Vec::new()
        };

        Ok(Submission {
            attempt,
            replayed,
            results_visible,
            questions,
        })
    }

    pub async fn pause(&self, attempt_id: Uuid, identity: &Identity) -> Result<Attempt> {
        self.transition(
            attempt_id,
            identity,
            &[AttemptStatus::Started, AttemptStatus::InProgress],
            AttemptStatus::Paused,
        )
        .await
    }

    pub async fn resume(&self, attempt_id: Uuid, identity: &Identity) -> Result<Attempt> {
        self.transition(
            attempt_id,
            identity,
            &[AttemptStatus::Paused],
            AttemptStatus::InProgress,
        )
        .await
    }

    /// Latest terminal attempt of a student. Staff read any student's result
    /// regardless of the visibility policy.
    pub async fn get_results(
        &self,
        assessment_id: Uuid,
        identity: &Identity,
        student_id: Option<Uuid>,
    ) -> Result<AttemptResult> {
        let target = if identity.is_staff() {
            student_id.ok_or_else(|| Error::BadRequest("student_id is required".into()))?
        } else {
            match student_id {
                Some(other) if other != identity.user_id => {
                    return Err(Error::Forbidden("Cannot read another student's results".into()))
                }
                _ => identity.user_id,
            }
        };

        let assessment = self.load_assessment(assessment_id).await?;
        let now = self.clock.now();
        let mut latest = None;
        for attempt in self.store.list_attempts(assessment_id, target).await? {
            let attempt = self.enforce_timing(attempt, &assessment, now).await?;
            if attempt.status.is_terminal() {
                latest = Some(attempt);
            }
        }
        let attempt = latest.ok_or(Error::NotAvailableYet)?;

        if !identity.is_staff() && !assessment.results_visible(now) {
            return Err(Error::NotAvailableYet);
        }

        let questions = self.attempt_questions(&attempt).await?;
        Ok(AttemptResult { attempt, questions })
    }

    /// Apply a grader's override to one response of a submitted attempt.
    pub async fn grade_response(
        &self,
        attempt_id: Uuid,
        grader: &Identity,
        input: ManualGradeInput,
    ) -> Result<Attempt> {
        if !grader.is_staff() {
            return Err(Error::Forbidden("Only graders can grade responses".into()));
        }
        let attempt = self.load_attempt(attempt_id).await?;
        let assessment = self.load_assessment(attempt.assessment_id).await?;
        let now = self.clock.now();

        let attempt = self.enforce_timing(attempt, &assessment, now).await?;
        if attempt.status.is_live() {
            return Err(Error::InvalidState(
                "Attempt has not been submitted yet".into(),
            ));
        }

        let regrade = |attempt: &mut Attempt| -> Result<()> {
            let (_, response) = attempt.response_mut(input.question_id).ok_or_else(|| {
                Error::BadRequest(format!(
                    "Question {} is not part of this attempt",
                    input.question_id
                ))
            })?;
            if input.marks < Decimal::ZERO || input.marks > response.max_marks {
                return Err(Error::BadRequest(format!(
                    "Marks must be between 0 and {}",
                    response.max_marks
                )));
            }
            response.manual_grade = Some(ManualGrade {
                marks: input.marks,
                feedback: input.feedback.clone(),
                graded_by: grader.user_id,
                graded_at: now,
            });
            response.refresh_final_marks();

            let scored_at = Self::scoring_instant(attempt, &assessment, now);
            attempt.score = Some(ScoringService::summarize(
                &assessment,
                &attempt.responses,
                scored_at,
            ));
            if !attempt.responses.iter().any(Response::awaits_manual_grading) {
                attempt.status = AttemptStatus::Graded;
            }
            attempt.updated_at = now;
            Ok(())
        };

        let attempt = self.store.regrade_attempt(attempt_id, &regrade).await?;
        self.store.refresh_statistics(attempt.assessment_id).await?;

        tracing::info!(
            %attempt_id,
            question_id = %input.question_id,
            grader = %grader.user_id,
            status = %attempt.status,
            "Manual grade applied"
        );
        Ok(attempt)
    }

    async fn transition(
        &self,
        attempt_id: Uuid,
        identity: &Identity,
        from: &[AttemptStatus],
        to: AttemptStatus,
    ) -> Result<Attempt> {
        let attempt = self.load_owned(attempt_id, identity).await?;
        let assessment = self.load_assessment(attempt.assessment_id).await?;
        let now = self.clock.now();
        let mut attempt = self.enforce_timing(attempt, &assessment, now).await?;

        if !from.contains(&attempt.status)
            || !self.store.transition_status(attempt_id, from, to).await?
        {
            let current = self.load_attempt(attempt_id).await?.status;
            return Err(Error::InvalidState(format!(
                "Cannot move attempt from {} to {}",
                current, to
            )));
        }

        tracing::info!(%attempt_id, from = %attempt.status, to = %to, "Attempt status changed");
        attempt.status = to;
        Ok(attempt)
    }

    /// Expiry check run on every access. A live attempt past its deadline is
    /// auto-submitted here; otherwise the remaining time is refreshed.
    async fn enforce_timing(
        &self,
        mut attempt: Attempt,
        assessment: &Assessment,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        if attempt.status.is_terminal() {
            attempt.time_remaining_minutes = 0;
            return Ok(attempt);
        }
        let check = TimingService::check(attempt.started_at, assessment, now);
        if !check.expired {
            attempt.time_remaining_minutes = check.time_remaining_minutes;
            return Ok(attempt);
        }
        let (attempt, _) = self.auto_submit(attempt, assessment, now).await?;
        Ok(attempt)
    }

    async fn auto_submit(
        &self,
        attempt: Attempt,
        assessment: &Assessment,
        now: DateTime<Utc>,
    ) -> Result<(Attempt, bool)> {
        let time_taken = TimingService::expired_time_taken(attempt.started_at, assessment);
        let (attempt, won) = self
            .finalize(attempt.id, assessment, AttemptStatus::AutoSubmitted, now, time_taken)
            .await?;
        if won {
            tracing::warn!(
                attempt_id = %attempt.id,
                student_id = %attempt.student_id,
                "Attempt expired and was auto-submitted"
            );
        }
        Ok((attempt, !won))
    }

    /// Score and persist a terminal attempt. Scoring runs on the stored row
    /// under the store's lock, so every acknowledged answer is counted.
    /// Returns the stored attempt and whether this call performed the
    /// transition.
    async fn finalize(
        &self,
        attempt_id: Uuid,
        assessment: &Assessment,
        status: AttemptStatus,
        submitted_at: DateTime<Utc>,
        time_taken_minutes: i32,
    ) -> Result<(Attempt, bool)> {
        let score = |attempt: &mut Attempt| -> Result<AttemptOutcome> {
            attempt.status = status;
            attempt.submitted_at = Some(submitted_at);
            attempt.time_taken_minutes = Some(time_taken_minutes);
            attempt.time_remaining_minutes = 0;
            attempt.updated_at = submitted_at;

            let scored_at = Self::scoring_instant(attempt, assessment, submitted_at);
            attempt.score = Some(ScoringService::summarize(
                assessment,
                &attempt.responses,
                scored_at,
            ));
            ScoringService::outcome(attempt)
                .ok_or_else(|| Error::Internal("Finalized attempt has no score".into()))
        };

        let attempt = match self.store.finalize_attempt(attempt_id, &score).await? {
            FinalizeOutcome::Finalized(attempt) => attempt,
            FinalizeOutcome::AlreadyTerminal(stored) => return Ok((stored, false)),
        };

        if let Some(score) = &attempt.score {
            tracing::info!(
                attempt_id = %attempt.id,
                status = %attempt.status,
                marks = %score.marks_obtained,
                percentage = score.percentage,
                passed = score.passed,
                "Attempt finalized"
            );
        }
        Ok((attempt, true))
    }

    /// Late penalties are judged at submission, but never past the deadline:
    /// an auto-submitted attempt is treated as handed in when time ran out.
    fn scoring_instant(
        attempt: &Attempt,
        assessment: &Assessment,
        fallback: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let submitted = attempt.submitted_at.unwrap_or(fallback);
        submitted.min(TimingService::deadline(attempt.started_at, assessment))
    }

    fn ensure_editable(attempt: &Attempt) -> Result<()> {
        if attempt.status.is_live() {
            Ok(())
        } else {
            Err(Self::not_editable(attempt.status))
        }
    }

    fn not_editable(status: AttemptStatus) -> Error {
        match status {
            AttemptStatus::AutoSubmitted => Error::AttemptExpired,
            other => Error::NotActive(other),
        }
    }

    async fn session_questions(&self, assessment: &Assessment) -> Result<Vec<PresentedQuestion>> {
        let mut authored = assessment.questions.clone();
        authored.sort_by_key(|q| q.order);

        let ids: Vec<Uuid> = authored.iter().map(|q| q.question_id).collect();
        let bank = self.store.get_questions(&ids).await?;

        let mut presented = Vec::with_capacity(authored.len());
        for item in &authored {
            let question = bank
                .iter()
                .find(|q| q.id == item.question_id)
                .ok_or_else(|| Error::NotFound(format!("Question {} not found", item.question_id)))?;
            presented.push(PresentedQuestion {
                question_id: question.id,
                question_type: question.question_type,
                prompt: question.prompt.clone(),
                options: question.options.clone(),
                blank_count: question.blank_count,
                marks: item.marks,
                order: item.order,
                optional: item.optional,
                time_limit_seconds: item.time_limit_seconds,
            });
        }

        Self::shuffle(&mut presented, assessment);
        Ok(presented)
    }

    fn shuffle(questions: &mut [PresentedQuestion], assessment: &Assessment) {
        let mut rng = rand::thread_rng();
        if assessment.config.shuffle_options {
            for question in questions.iter_mut() {
                question.options.shuffle(&mut rng);
            }
        }
        if assessment.config.shuffle_questions {
            questions.shuffle(&mut rng);
        }
        for (position, question) in questions.iter_mut().enumerate() {
            question.order = position as i32 + 1;
        }
    }

    async fn attempt_questions(&self, attempt: &Attempt) -> Result<Vec<Question>> {
        let ids: Vec<Uuid> = attempt.questions.iter().map(|q| q.question_id).collect();
        self.store.get_questions(&ids).await
    }

    async fn load_assessment(&self, id: Uuid) -> Result<Assessment> {
        self.store
            .get_assessment(id)
            .await?
            .ok_or_else(|| Error::NotFound("Assessment not found".into()))
    }

    async fn load_attempt(&self, id: Uuid) -> Result<Attempt> {
        self.store
            .get_attempt(id)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".into()))
    }

    async fn load_owned(&self, id: Uuid, identity: &Identity) -> Result<Attempt> {
        let attempt = self.load_attempt(id).await?;
        if attempt.student_id != identity.user_id {
            return Err(Error::Forbidden("Attempt belongs to another student".into()));
        }
        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::models::assessment::{NegativeMarking, ResultVisibility};
    use crate::models::question::QuestionType;
    use crate::test_support::assessment_fixture;
    use crate::utils::time::ManualClock;

    struct Harness {
        store: Arc<MemoryStore>,
        clock: ManualClock,
        service: AttemptService,
        assessment: Assessment,
        questions: Vec<Question>,
        student: Identity,
    }

    async fn harness(questions: Vec<Question>, tweak: impl FnOnce(&mut Assessment)) -> Harness {
        let store = Arc::new(MemoryStore::new());
        for question in &questions {
            store.insert_question(question.clone()).await;
        }
        let mut assessment = assessment_fixture(&questions);
        tweak(&mut assessment);
        store.put_assessment(assessment.clone()).await;

        let clock = ManualClock::new(assessment.schedule.start + Duration::minutes(1));
        let service = AttemptService::new(store.clone(), Arc::new(clock.clone()));
        Harness {
            store,
            clock,
            service,
            assessment,
            questions,
            student: Identity::student(Uuid::new_v4()),
        }
    }

    fn mcq(marks: i64) -> Question {
        Question::new_single_choice(
            "Pick one",
            &[("a", "Alpha"), ("b", "Beta"), ("c", "Gamma")],
            "a",
            Decimal::from(marks),
        )
    }

    fn choose(question: &Question, option: &str) -> SaveAnswer {
        SaveAnswer {
            question_id: question.id,
            answer: AnswerPayload::SingleChoice {
                selected: option.to_string(),
            },
            time_spent_delta_seconds: 10,
            marked_for_review: false,
        }
    }

    impl Harness {
        async fn start(&self) -> Result<StartOutcome> {
            self.service
                .start(self.assessment.id, &self.student, RequestContext::default())
                .await
        }

        /// A service whose finalize and regrade calls first let `racing`
        /// reach the store, as a concurrent request would.
        fn interleaved(&self, racing: Hook) -> (AttemptService, Arc<Interleaved>) {
            let store = Arc::new(Interleaved {
                inner: self.store.clone(),
                hook: std::sync::Mutex::new(Some(racing)),
                hook_succeeded: std::sync::Mutex::new(None),
            });
            let service = AttemptService::new(store.clone(), Arc::new(self.clock.clone()));
            (service, store)
        }
    }

    type Hook = std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send>>;

    struct Interleaved {
        inner: Arc<MemoryStore>,
        hook: std::sync::Mutex<Option<Hook>>,
        hook_succeeded: std::sync::Mutex<Option<bool>>,
    }

    impl Interleaved {
        async fn run_hook(&self) {
            let hook = self.hook.lock().unwrap().take();
            if let Some(hook) = hook {
                let ok = hook.await;
                *self.hook_succeeded.lock().unwrap() = Some(ok);
            }
        }

        fn hook_succeeded(&self) -> Option<bool> {
            *self.hook_succeeded.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl Store for Interleaved {
        async fn get_question(&self, id: Uuid) -> Result<Option<Question>> {
            self.inner.get_question(id).await
        }

        async fn get_questions(&self, ids: &[Uuid]) -> Result<Vec<Question>> {
            self.inner.get_questions(ids).await
        }

        async fn get_assessment(&self, id: Uuid) -> Result<Option<Assessment>> {
            self.inner.get_assessment(id).await
        }

        async fn insert_assessment(&self, assessment: &Assessment) -> Result<()> {
            self.inner.insert_assessment(assessment).await
        }

        async fn record_attempt_started(&self, assessment_id: Uuid) -> Result<()> {
            self.inner.record_attempt_started(assessment_id).await
        }

        async fn refresh_statistics(
            &self,
            assessment_id: Uuid,
        ) -> Result<crate::models::assessment::AssessmentStatistics> {
            self.inner.refresh_statistics(assessment_id).await
        }

        async fn get_attempt(&self, id: Uuid) -> Result<Option<Attempt>> {
            self.inner.get_attempt(id).await
        }

        async fn list_attempts(
            &self,
            assessment_id: Uuid,
            student_id: Uuid,
        ) -> Result<Vec<Attempt>> {
            self.inner.list_attempts(assessment_id, student_id).await
        }

        async fn insert_attempt(&self, attempt: &Attempt) -> Result<InsertOutcome> {
            self.inner.insert_attempt(attempt).await
        }

        async fn save_response(
            &self,
            attempt_id: Uuid,
            index: usize,
            response: &Response,
            status: AttemptStatus,
        ) -> Result<bool> {
            self.inner
                .save_response(attempt_id, index, response, status)
                .await
        }

        async fn transition_status(
            &self,
            attempt_id: Uuid,
            from: &[AttemptStatus],
            to: AttemptStatus,
        ) -> Result<bool> {
            self.inner.transition_status(attempt_id, from, to).await
        }

        async fn release_results(&self, assessment_id: Uuid) -> Result<Option<Assessment>> {
            self.inner.release_results(assessment_id).await
        }

        async fn finalize_attempt(
            &self,
            attempt_id: Uuid,
            finalize: &crate::database::store::Finalizer<'_>,
        ) -> Result<FinalizeOutcome> {
            self.run_hook().await;
            self.inner.finalize_attempt(attempt_id, finalize).await
        }

        async fn regrade_attempt(
            &self,
            attempt_id: Uuid,
            regrade: &crate::database::store::Regrader<'_>,
        ) -> Result<Attempt> {
            self.run_hook().await;
            self.inner.regrade_attempt(attempt_id, regrade).await
        }

        async fn append_security_event(
            &self,
            event: &crate::models::attempt::SecurityEvent,
        ) -> Result<()> {
            self.inner.append_security_event(event).await
        }
    }

    #[tokio::test]
    async fn expired_attempt_rejects_saves_and_auto_submits() {
        let h = harness(vec![mcq(10)], |a| {
            a.config.negative_marking = NegativeMarking {
                enabled: true,
                percentage: Decimal::from(25),
            };
        })
        .await;
        let attempt = h.start().await.unwrap().attempt;
        assert_eq!(attempt.time_remaining_minutes, 10);

        h.clock.advance(Duration::minutes(11));
        let err = h
            .service
            .save_answer(attempt.id, &h.student, choose(&h.questions[0], "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttemptExpired));

        let current = h
            .service
            .get_current(h.assessment.id, &h.student)
            .await
            .unwrap()
            .attempt;
        assert_eq!(current.status, AttemptStatus::AutoSubmitted);
        assert_eq!(current.time_remaining_minutes, 0);
        assert_eq!(current.time_taken_minutes, Some(10));
        let score = current.score.unwrap();
        assert_eq!(score.marks_obtained, Decimal::ZERO);
    }

    #[tokio::test]
    async fn negative_marking_offsets_across_questions() {
        let h = harness(vec![mcq(5), mcq(5)], |a| {
            a.config.negative_marking = NegativeMarking {
                enabled: true,
                percentage: Decimal::from(50),
            };
        })
        .await;
        let attempt = h.start().await.unwrap().attempt;

        let right = h
            .service
            .save_answer(attempt.id, &h.student, choose(&h.questions[0], "a"))
            .await
            .unwrap();
        assert_eq!(right.status, AttemptStatus::InProgress);
        let wrong = h
            .service
            .save_answer(attempt.id, &h.student, choose(&h.questions[1], "b"))
            .await
            .unwrap();
        assert_eq!(wrong.response.final_marks, Decimal::ZERO);
        assert_eq!(
            wrong.response.auto_grade.unwrap().marks_awarded,
            Decimal::new(-25, 1)
        );

        let submission = h.service.submit(attempt.id, &h.student).await.unwrap();
        assert!(!submission.replayed);
        let score = submission.attempt.score.unwrap();
        assert_eq!(score.marks_obtained, Decimal::new(25, 1));
        assert_eq!(score.percentage, 25);
        assert_eq!(submission.attempt.status, AttemptStatus::Submitted);
    }

    #[tokio::test]
    async fn quota_is_enforced_after_terminal_attempts() {
        let h = harness(vec![mcq(10)], |a| a.config.max_attempts = 2).await;
        for expected in 1..=2 {
            let attempt = h.start().await.unwrap().attempt;
            assert_eq!(attempt.attempt_number, expected);
            h.service.submit(attempt.id, &h.student).await.unwrap();
        }
        let err = h.start().await.unwrap_err();
        assert!(matches!(err, Error::AttemptsExhausted { max_attempts: 2 }));
    }

    #[tokio::test]
    async fn starting_twice_resumes_the_live_attempt() {
        let h = harness(vec![mcq(10)], |_| {}).await;
        let first = h.start().await.unwrap();
        let second = h.start().await.unwrap();
        assert!(!first.resumed);
        assert!(second.resumed);
        assert_eq!(first.attempt.id, second.attempt.id);
        assert_eq!(h.store.attempt_count().await, 1);

        let stored = h.store.get_assessment(h.assessment.id).await.unwrap().unwrap();
        assert_eq!(stored.statistics.total_attempts, 1);
    }

    #[tokio::test]
    async fn stale_live_attempt_counts_against_quota_once_expired() {
        let h = harness(vec![mcq(10)], |a| a.config.max_attempts = 1).await;
        h.start().await.unwrap();
        h.clock.advance(Duration::minutes(15));
        let err = h.start().await.unwrap_err();
        assert!(matches!(err, Error::AttemptsExhausted { .. }));
    }

    #[tokio::test]
    async fn window_and_access_are_checked_before_anything_else() {
        let h = harness(vec![mcq(10)], |a| {
            a.access = crate::models::assessment::AccessPolicy::Participants;
        })
        .await;

        h.clock.set(h.assessment.schedule.start - Duration::minutes(5));
        assert!(matches!(h.start().await.unwrap_err(), Error::NotYetOpen { .. }));

        h.clock.set(h.assessment.schedule.end + Duration::minutes(5));
        assert!(matches!(h.start().await.unwrap_err(), Error::WindowClosed { .. }));

        h.clock.set(h.assessment.schedule.start);
        assert!(matches!(h.start().await.unwrap_err(), Error::NotAuthorized));
    }

    #[tokio::test]
    async fn submit_twice_replays_without_touching_statistics() {
        let h = harness(vec![mcq(10)], |_| {}).await;
        let attempt = h.start().await.unwrap().attempt;
        h.service
            .save_answer(attempt.id, &h.student, choose(&h.questions[0], "a"))
            .await
            .unwrap();

        let first = h.service.submit(attempt.id, &h.student).await.unwrap();
        h.clock.advance(Duration::minutes(3));
        let second = h.service.submit(attempt.id, &h.student).await.unwrap();

        assert!(second.replayed);
        assert_eq!(first.attempt.score, second.attempt.score);
        assert_eq!(first.attempt.submitted_at, second.attempt.submitted_at);

        let stats = h
            .store
            .get_assessment(h.assessment.id)
            .await
            .unwrap()
            .unwrap()
            .statistics;
        assert_eq!(stats.completed_attempts, 1);
        assert_eq!(stats.passed_attempts, 1);
        assert_eq!(stats.highest_score, Some(Decimal::from(10)));
    }

    #[tokio::test]
    async fn pause_and_resume_follow_the_state_machine() {
        let h = harness(vec![mcq(10)], |_| {}).await;
        let attempt = h.start().await.unwrap().attempt;

        let paused = h.service.pause(attempt.id, &h.student).await.unwrap();
        assert_eq!(paused.status, AttemptStatus::Paused);
        assert!(matches!(
            h.service.pause(attempt.id, &h.student).await.unwrap_err(),
            Error::InvalidState(_)
        ));

        let resumed = h.service.resume(attempt.id, &h.student).await.unwrap();
        assert_eq!(resumed.status, AttemptStatus::InProgress);
        assert!(matches!(
            h.service.resume(attempt.id, &h.student).await.unwrap_err(),
            Error::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn paused_attempt_still_expires() {
        let h = harness(vec![mcq(10)], |_| {}).await;
        let attempt = h.start().await.unwrap().attempt;
        h.service.pause(attempt.id, &h.student).await.unwrap();
        h.clock.advance(Duration::minutes(12));

        assert!(matches!(
            h.service.resume(attempt.id, &h.student).await.unwrap_err(),
            Error::InvalidState(_)
        ));
        let stored = h.store.get_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::AutoSubmitted);
    }

    #[tokio::test]
    async fn saved_answer_reads_back_unchanged() {
        let blanks = Question::new_fill_in_blank(
            "The ___ is ___",
            &["sky", "blue"],
            Decimal::from(4),
        );
        let h = harness(vec![blanks], |_| {}).await;
        let attempt = h.start().await.unwrap().attempt;
        let answer = AnswerPayload::FillInBlank {
            blanks: vec![" SKY ".into(), "green".into()],
        };

        let saved = h
            .service
            .save_answer(
                attempt.id,
                &h.student,
                SaveAnswer {
                    question_id: h.questions[0].id,
                    answer: answer.clone(),
                    time_spent_delta_seconds: 30,
                    marked_for_review: true,
                },
            )
            .await
            .unwrap();
        assert!(saved.grading_visible);
        let grade = saved.response.auto_grade.unwrap();
        assert!(!grade.is_correct);
        assert_eq!(grade.marks_awarded, Decimal::from(2));

        let current = h
            .service
            .get_current(h.assessment.id, &h.student)
            .await
            .unwrap()
            .attempt;
        let response = &current.responses[0];
        assert_eq!(response.answer.as_ref(), Some(&answer));
        assert!(response.answered);
        assert!(response.marked_for_review);
        assert_eq!(response.time_spent_seconds, 30);
    }

    #[tokio::test]
    async fn cooldown_blocks_an_early_retake() {
        let h = harness(vec![mcq(10)], |a| a.config.attempt_delay_minutes = 30).await;
        let attempt = h.start().await.unwrap().attempt;
        h.service.submit(attempt.id, &h.student).await.unwrap();

        let err = h.start().await.unwrap_err();
        match err {
            Error::AttemptCooldown { available_at } => {
                assert_eq!(available_at, h.clock.now() + Duration::minutes(30));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        h.clock.advance(Duration::minutes(30));
        assert_eq!(h.start().await.unwrap().attempt.attempt_number, 2);
    }

    #[tokio::test]
    async fn question_time_limit_is_enforced() {
        let h = harness(vec![mcq(10)], |a| a.questions[0].time_limit_seconds = Some(60)).await;
        let attempt = h.start().await.unwrap().attempt;

        let mut input = choose(&h.questions[0], "b");
        input.time_spent_delta_seconds = 50;
        h.service
            .save_answer(attempt.id, &h.student, input.clone())
            .await
            .unwrap();

        input.time_spent_delta_seconds = 20;
        let err = h
            .service
            .save_answer(attempt.id, &h.student, input)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuestionTimeLimit { .. }));
    }

    #[tokio::test]
    async fn other_students_cannot_touch_an_attempt() {
        let h = harness(vec![mcq(10)], |_| {}).await;
        let attempt = h.start().await.unwrap().attempt;
        let intruder = Identity::student(Uuid::new_v4());

        let err = h
            .service
            .save_answer(attempt.id, &intruder, choose(&h.questions[0], "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert!(matches!(
            h.service.submit(attempt.id, &intruder).await.unwrap_err(),
            Error::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn manual_grade_completes_grading_and_refreshes_statistics() {
        let essay = Question::new_subjective(QuestionType::Essay, "Discuss", Decimal::from(10));
        let h = harness(vec![mcq(10), essay], |_| {}).await;
        let attempt = h.start().await.unwrap().attempt;
        h.service
            .save_answer(attempt.id, &h.student, choose(&h.questions[0], "a"))
            .await
            .unwrap();
        h.service
            .save_answer(
                attempt.id,
                &h.student,
                SaveAnswer {
                    question_id: h.questions[1].id,
                    answer: AnswerPayload::Text {
                        text: "An essay".into(),
                    },
                    time_spent_delta_seconds: 120,
                    marked_for_review: false,
                },
            )
            .await
            .unwrap();

        let submitted = h.service.submit(attempt.id, &h.student).await.unwrap().attempt;
        assert_eq!(submitted.status, AttemptStatus::Submitted);
        assert_eq!(submitted.score.unwrap().marks_obtained, Decimal::from(10));

        let grader = Identity::teacher(Uuid::new_v4());
        let over = h
            .service
            .grade_response(
                attempt.id,
                &grader,
                ManualGradeInput {
                    question_id: h.questions[1].id,
                    marks: Decimal::from(11),
                    feedback: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(over, Error::BadRequest(_)));

        let graded = h
            .service
            .grade_response(
                attempt.id,
                &grader,
                ManualGradeInput {
                    question_id: h.questions[1].id,
                    marks: Decimal::from(7),
                    feedback: Some("Solid".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(graded.status, AttemptStatus::Graded);
        let score = graded.score.unwrap();
        assert_eq!(score.marks_obtained, Decimal::from(17));
        assert_eq!(score.percentage, 85);
        assert_eq!(score.grade.as_deref(), Some("A"));

        let stats = h
            .store
            .get_assessment(h.assessment.id)
            .await
            .unwrap()
            .unwrap()
            .statistics;
        assert_eq!(stats.completed_attempts, 1);
        assert_eq!(stats.average_score, Decimal::from(17));
    }

    #[tokio::test]
    async fn results_follow_the_visibility_policy() {
        let h = harness(vec![mcq(10)], |a| {
            a.config.result_visibility = ResultVisibility::OnRelease;
        })
        .await;
        let attempt = h.start().await.unwrap().attempt;
        let submission = h.service.submit(attempt.id, &h.student).await.unwrap();
        assert!(!submission.results_visible);
        assert!(submission.questions.is_empty());

        let err = h
            .service
            .get_results(h.assessment.id, &h.student, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAvailableYet));

        let teacher = Identity::teacher(Uuid::new_v4());
        let result = h
            .service
            .get_results(h.assessment.id, &teacher, Some(h.student.user_id))
            .await
            .unwrap();
        assert_eq!(result.attempt.id, attempt.id);
        assert_eq!(result.questions.len(), 1);
    }

    #[tokio::test]
    async fn options_are_shuffled_without_losing_any() {
        let h = harness(vec![mcq(10), mcq(10)], |a| {
            a.config.shuffle_questions = true;
            a.config.shuffle_options = true;
        })
        .await;
        let attempt = h.start().await.unwrap().attempt;

        let mut ids: Vec<Uuid> = attempt.questions.iter().map(|q| q.question_id).collect();
        ids.sort();
        let mut expected: Vec<Uuid> = h.questions.iter().map(|q| q.id).collect();
        expected.sort();
        assert_eq!(ids, expected);

        for question in &attempt.questions {
            let mut options: Vec<&str> = question.options.iter().map(|o| o.id.as_str()).collect();
            options.sort();
            assert_eq!(options, vec!["a", "b", "c"]);
        }
        let orders: Vec<i32> = attempt.questions.iter().map(|q| q.order).collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[tokio::test]
    async fn answer_saved_while_submitting_is_scored() {
        let h = harness(vec![mcq(10)], |_| {}).await;
        let attempt = h.start().await.unwrap().attempt;

        let attempt_id = attempt.id;
        let saver = h.service.clone();
        let student = h.student;
        let answer = choose(&h.questions[0], "a");
        let (service, store) = h.interleaved(Box::pin(async move {
            saver.save_answer(attempt_id, &student, answer).await.is_ok()
        }));

        let submission = service.submit(attempt.id, &h.student).await.unwrap();
        assert_eq!(store.hook_succeeded(), Some(true));
        assert!(!submission.replayed);
        assert_eq!(
            submission.attempt.score.unwrap().marks_obtained,
            Decimal::from(10)
        );

        let stored = h.store.get_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::Submitted);
        assert!(stored.responses[0].answered);
        assert_eq!(
            stored.responses[0].answer,
            Some(AnswerPayload::SingleChoice {
                selected: "a".into()
            })
        );
        let stats = h
            .store
            .get_assessment(h.assessment.id)
            .await
            .unwrap()
            .unwrap()
            .statistics;
        assert_eq!(stats.completed_attempts, 1);
        assert_eq!(stats.average_score, Decimal::from(10));
    }

    #[tokio::test]
    async fn concurrent_grades_on_different_questions_both_stick() {
        let first = Question::new_subjective(QuestionType::Essay, "Discuss", Decimal::from(10));
        let second =
            Question::new_subjective(QuestionType::ShortAnswer, "Define", Decimal::from(10));
        let h = harness(vec![first, second], |_| {}).await;
        let attempt = h.start().await.unwrap().attempt;
        for question in &h.questions {
            h.service
                .save_answer(
                    attempt.id,
                    &h.student,
                    SaveAnswer {
                        question_id: question.id,
                        answer: AnswerPayload::Text {
                            text: "An answer".into(),
                        },
                        time_spent_delta_seconds: 30,
                        marked_for_review: false,
                    },
                )
                .await
                .unwrap();
        }
        h.service.submit(attempt.id, &h.student).await.unwrap();

        let attempt_id = attempt.id;
        let other_grader = h.service.clone();
        let first_id = h.questions[0].id;
        let (service, store) = h.interleaved(Box::pin(async move {
            other_grader
                .grade_response(
                    attempt_id,
                    &Identity::teacher(Uuid::new_v4()),
                    ManualGradeInput {
                        question_id: first_id,
                        marks: Decimal::from(6),
                        feedback: None,
                    },
                )
                .await
                .is_ok()
        }));

        let graded = service
            .grade_response(
                attempt.id,
                &Identity::teacher(Uuid::new_v4()),
                ManualGradeInput {
                    question_id: h.questions[1].id,
                    marks: Decimal::from(7),
                    feedback: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(store.hook_succeeded(), Some(true));
        assert_eq!(graded.status, AttemptStatus::Graded);
        assert_eq!(graded.score.unwrap().marks_obtained, Decimal::from(13));

        let stored = h.store.get_attempt(attempt.id).await.unwrap().unwrap();
        assert!(stored.responses.iter().all(|r| r.manual_grade.is_some()));
        assert_eq!(stored.status, AttemptStatus::Graded);
    }

    #[tokio::test]
    async fn oversized_time_spent_is_rejected_without_wrapping() {
        let h = harness(vec![mcq(10)], |_| {}).await;
        let attempt = h.start().await.unwrap().attempt;

        let mut answer = choose(&h.questions[0], "a");
        answer.time_spent_delta_seconds = i32::MAX;
        h.service
            .save_answer(attempt.id, &h.student, answer.clone())
            .await
            .unwrap();

        answer.time_spent_delta_seconds = 1;
        let err = h
            .service
            .save_answer(attempt.id, &h.student, answer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));

        let stored = h.store.get_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.responses[0].time_spent_seconds, i32::MAX);
    }
}
