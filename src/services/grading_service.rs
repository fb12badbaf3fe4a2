use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::models::assessment::AssessmentConfig;
use crate::models::attempt::{AnswerPayload, AutoGrade};
use crate::models::question::{AnswerKey, Question};

pub struct GradingService;

impl GradingService {
    /// Grade one saved answer. Subjective questions return `None` and wait for a grader.
    pub fn grade_answer(
        question: &Question,
        answer: &AnswerPayload,
        max_marks: Decimal,
        config: &AssessmentConfig,
    ) -> Result<Option<AutoGrade>> {
        if !answer.fits(question.question_type) {
            return Err(Error::BadRequest(format!(
                "Answer shape does not match a {} question",
                question.question_type.as_str()
            )));
        }

        let grade = match (&question.answer_key, answer) {
            (AnswerKey::Option { option_id }, AnswerPayload::SingleChoice { selected }) => {
                if !question.options.iter().any(|o| &o.id == selected) {
                    return Err(Error::BadRequest(format!("Unknown option '{}'", selected)));
                }
                Some(Self::grade_exact(selected == option_id, max_marks, config))
            }
            (AnswerKey::Boolean { value }, AnswerPayload::TrueFalse { value: given }) => {
                Some(Self::grade_exact(value == given, max_marks, config))
            }
            (AnswerKey::Blanks { answers }, AnswerPayload::FillInBlank { blanks }) => {
                if blanks.len() > answers.len() {
                    return Err(Error::BadRequest(format!(
                        "Expected at most {} blanks, got {}",
                        answers.len(),
                        blanks.len()
                    )));
                }
                Some(Self::grade_blanks(answers, blanks, max_marks, config.partial_marking))
            }
            (AnswerKey::Manual, _) => None,
            _ => {
                return Err(Error::Internal(format!(
                    "Answer key for question {} does not match its type",
                    question.id
                )))
            }
        };

        Ok(grade)
    }

    fn grade_exact(is_correct: bool, max_marks: Decimal, config: &AssessmentConfig) -> AutoGrade {
        let penalty = config.negative_marking.penalty_for(max_marks);
        let marks_awarded = if is_correct {
            max_marks
        } else if penalty.is_zero() {
            Decimal::ZERO
        } else {
            -penalty
        };
        AutoGrade {
            is_correct,
            marks_awarded,
        }
    }

    fn grade_blanks(
        expected: &[String],
        given: &[String],
        max_marks: Decimal,
        partial_marking: bool,
    ) -> AutoGrade {
        let total = expected.len();
        if total == 0 {
            return AutoGrade {
                is_correct: false,
                marks_awarded: Decimal::ZERO,
            };
        }

        let correct = expected
            .iter()
            .zip(given.iter())
            .filter(|(want, got)| normalize_blank(want) == normalize_blank(got))
            .count();
        let is_correct = correct == total;

        let marks_awarded = if is_correct {
            max_marks
        } else if partial_marking {
            max_marks * Decimal::from(correct as u64) / Decimal::from(total as u64)
        } else {
            Decimal::ZERO
        };

        AutoGrade {
            is_correct,
            marks_awarded,
        }
    }
}

pub fn normalize_blank(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::assessment::{NegativeMarking, ResultVisibility};
    use crate::models::question::QuestionType;

    fn config(negative: Option<i64>) -> AssessmentConfig {
        AssessmentConfig {
            duration_minutes: 30,
            shuffle_questions: false,
            shuffle_options: false,
            max_attempts: 1,
            attempt_delay_minutes: 0,
            negative_marking: NegativeMarking {
                enabled: negative.is_some(),
                percentage: Decimal::from(negative.unwrap_or(0)),
            },
            partial_marking: true,
            result_visibility: ResultVisibility::Immediate,
        }
    }

    fn mcq() -> Question {
        Question::new_single_choice(
            "2+2?",
            &[("a", "3"), ("b", "4"), ("c", "5")],
            "b",
            Decimal::from(5),
        )
    }

    #[test]
    fn correct_choice_earns_full_marks() {
        let grade = GradingService::grade_answer(
            &mcq(),
            &AnswerPayload::SingleChoice { selected: "b".into() },
            Decimal::from(5),
            &config(Some(50)),
        )
        .unwrap()
        .unwrap();
        assert!(grade.is_correct);
        assert_eq!(grade.marks_awarded, Decimal::from(5));
    }

    #[test]
    fn wrong_choice_is_penalised_only_under_negative_marking() {
        let answer = AnswerPayload::SingleChoice { selected: "a".into() };
        let penalised =
            GradingService::grade_answer(&mcq(), &answer, Decimal::from(5), &config(Some(50)))
                .unwrap()
                .unwrap();
        assert!(!penalised.is_correct);
        assert_eq!(penalised.marks_awarded, Decimal::new(-25, 1));

        let plain = GradingService::grade_answer(&mcq(), &answer, Decimal::from(5), &config(None))
            .unwrap()
            .unwrap();
        assert_eq!(plain.marks_awarded, Decimal::ZERO);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = GradingService::grade_answer(
            &mcq(),
            &AnswerPayload::SingleChoice { selected: "z".into() },
            Decimal::from(5),
            &config(None),
        )
        .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn true_false_compares_against_key() {
        let q = Question::new_true_false("Sky is blue", true, Decimal::from(2));
        let grade = GradingService::grade_answer(
            &q,
            &AnswerPayload::TrueFalse { value: false },
            Decimal::from(2),
            &config(Some(25)),
        )
        .unwrap()
        .unwrap();
        assert!(!grade.is_correct);
        assert_eq!(grade.marks_awarded, Decimal::new(-5, 1));
    }

    #[test]
    fn fill_in_blank_partial_credit_ignores_case_and_whitespace() {
        let q = Question::new_fill_in_blank(
            "Capitals",
            &["Paris", "Berlin", "Rome", "Madrid"],
            Decimal::from(8),
        );
        let answer = AnswerPayload::FillInBlank {
            blanks: vec![
                "  paris ".into(),
                "BERLIN".into(),
                "rome".into(),
                "Lisbon".into(),
            ],
        };
        let grade = GradingService::grade_answer(&q, &answer, Decimal::from(8), &config(Some(50)))
            .unwrap()
            .unwrap();
        assert!(!grade.is_correct);
        assert_eq!(grade.marks_awarded, Decimal::from(6));
    }

    #[test]
    fn fill_in_blank_without_partial_marking_is_all_or_nothing() {
        let q = Question::new_fill_in_blank("Pair", &["a", "b"], Decimal::from(4));
        let mut cfg = config(None);
        cfg.partial_marking = false;
        let grade = GradingService::grade_answer(
            &q,
            &AnswerPayload::FillInBlank {
                blanks: vec!["a".into()],
            },
            Decimal::from(4),
            &cfg,
        )
        .unwrap()
        .unwrap();
        assert_eq!(grade.marks_awarded, Decimal::ZERO);
    }

    #[test]
    fn subjective_answers_are_left_for_a_grader() {
        let q = Question::new_subjective(QuestionType::Essay, "Discuss", Decimal::from(10));
        let grade = GradingService::grade_answer(
            &q,
            &AnswerPayload::Text {
                text: "Essay body".into(),
            },
            Decimal::from(10),
            &config(Some(50)),
        )
        .unwrap();
        assert!(grade.is_none());
    }

    #[test]
    fn mismatched_payload_is_a_validation_error() {
        let err = GradingService::grade_answer(
            &mcq(),
            &AnswerPayload::TrueFalse { value: true },
            Decimal::from(5),
            &config(None),
        )
        .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
