use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{Error, Result};
use crate::models::assessment::{Assessment, AttemptOutcome, GradeBand};
use crate::models::attempt::{Attempt, Response, ScoreSummary, TypeBreakdown};

pub struct ScoringService;

impl ScoringService {
    /// Aggregate the final score of an attempt.
    ///
    /// Per-question values enter the sum signed, so a wrong answer under
    /// negative marking offsets marks earned elsewhere; only the net total
    /// is clamped at zero.
    pub fn summarize(
        assessment: &Assessment,
        responses: &[Response],
        submitted_at: DateTime<Utc>,
    ) -> ScoreSummary {
        let mut total_marks = Decimal::ZERO;
        let mut positive = Decimal::ZERO;
        let mut negative = Decimal::ZERO;
        let mut breakdown = std::collections::BTreeMap::<String, TypeBreakdown>::new();

        for response in responses {
            let value = response.effective_marks();
            total_marks += response.max_marks;
            if value > Decimal::ZERO {
                positive += value;
            } else if value < Decimal::ZERO {
                negative += value.abs();
            }

            let entry = breakdown
                .entry(response.question_type.as_str().to_string())
                .or_default();
            entry.questions += 1;
            entry.max_marks += response.max_marks;
            entry.marks_obtained += value;
            if response.answered {
                entry.answered += 1;
            }
            if response.auto_grade.map(|g| g.is_correct).unwrap_or(false) {
                entry.correct += 1;
            }
        }

        let net = (positive - negative).max(Decimal::ZERO);
        let late_penalty = Self::late_penalty(assessment, net, submitted_at);
        let marks_obtained = (net - late_penalty).max(Decimal::ZERO);
        let percentage = Self::percentage(marks_obtained, total_marks);
        let grade = Self::grade_for(percentage, &assessment.grading_scale);
        let passed = Self::passes(marks_obtained, total_marks, assessment);

        ScoreSummary {
            total_marks,
            positive_marks: positive,
            negative_marks: negative,
            late_penalty,
            marks_obtained,
            percentage,
            grade,
            passed,
            breakdown,
        }
    }

    fn late_penalty(assessment: &Assessment, net: Decimal, submitted_at: DateTime<Utc>) -> Decimal {
        let policy = &assessment.schedule.late_submission;
        if !policy.allowed || !assessment.schedule.is_late(submitted_at) {
            return Decimal::ZERO;
        }
        net * policy.penalty_percentage / Decimal::ONE_HUNDRED
    }

    /// Pass mark scaled onto `total_marks`, the same total the percentage is
    /// taken against. Nothing passes when there is nothing to score.
    fn passes(obtained: Decimal, total_marks: Decimal, assessment: &Assessment) -> bool {
        if total_marks <= Decimal::ZERO || assessment.total_marks <= Decimal::ZERO {
            return false;
        }
        let threshold = assessment.passing_marks / assessment.total_marks * total_marks;
        obtained >= threshold
    }

    /// Whole-number percentage, halves rounded up.
    pub fn percentage(obtained: Decimal, total: Decimal) -> i32 {
        if total <= Decimal::ZERO {
            return 0;
        }
        (obtained / total * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i32()
            .unwrap_or(0)
    }

    /// First band containing `percentage`, in the order the scale defines.
    pub fn grade_for(percentage: i32, scale: &[GradeBand]) -> Option<String> {
        scale
            .iter()
            .find(|band| band.contains(percentage))
            .map(|band| band.grade.clone())
    }

    /// A scale must cover 0..=100 with no overlapping bands.
    pub fn validate_scale(scale: &[GradeBand]) -> Result<()> {
        if scale.is_empty() {
            return Err(Error::BadRequest("Grading scale is empty".into()));
        }
        let mut bands: Vec<&GradeBand> = scale.iter().collect();
        for band in &bands {
            if band.min > band.max || band.min < 0 || band.max > 100 {
                return Err(Error::BadRequest(format!(
                    "Grade band {} has invalid range {}-{}",
                    band.grade, band.min, band.max
                )));
            }
        }
        bands.sort_by_key(|b| b.min);

        let mut next = 0;
        for band in bands {
            if band.min != next {
                return Err(Error::BadRequest(format!(
                    "Grading scale has a gap or overlap at {}%",
                    next.min(band.min)
                )));
            }
            next = band.max + 1;
        }
        if next != 101 {
            return Err(Error::BadRequest(
                "Grading scale must reach 100%".to_string(),
            ));
        }
        Ok(())
    }

    pub fn outcome(attempt: &Attempt) -> Option<AttemptOutcome> {
        let score = attempt.score.as_ref()?;
        Some(AttemptOutcome {
            marks_obtained: score.marks_obtained,
            percentage: score.percentage,
            time_taken_minutes: attempt.time_taken_minutes.unwrap_or(0),
            passed: score.passed,
        })
    }
}
