use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A question as held by the question bank. This crate only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Number of blanks in a fill-in-blank prompt.
    #[serde(default)]
    pub blank_count: usize,
    pub answer_key: AnswerKey,
    pub marks: Decimal,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    TrueFalse,
    FillInBlank,
    ShortAnswer,
    Essay,
    FileUpload,
}

impl QuestionType {
    /// Objective types are graded the moment an answer is saved.
    pub fn is_objective(self) -> bool {
        matches!(
            self,
            QuestionType::SingleChoice | QuestionType::TrueFalse | QuestionType::FillInBlank
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::SingleChoice => "single_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::FillInBlank => "fill_in_blank",
            QuestionType::ShortAnswer => "short_answer",
            QuestionType::Essay => "essay",
            QuestionType::FileUpload => "file_upload",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "single_choice" => Some(QuestionType::SingleChoice),
            "true_false" => Some(QuestionType::TrueFalse),
            "fill_in_blank" => Some(QuestionType::FillInBlank),
            "short_answer" => Some(QuestionType::ShortAnswer),
            "essay" => Some(QuestionType::Essay),
            "file_upload" => Some(QuestionType::FileUpload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

/// Correct-answer key, one shape per gradable family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerKey {
    Option { option_id: String },
    Boolean { value: bool },
    Blanks { answers: Vec<String> },
    /// Subjective questions carry no machine-checkable key.
    Manual,
}

impl Question {
    pub fn new_single_choice(
        prompt: impl Into<String>,
        options: &[(&str, &str)],
        correct: &str,
        marks: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            question_type: QuestionType::SingleChoice,
            prompt: prompt.into(),
            options: options
                .iter()
                .map(|(id, text)| QuestionOption {
                    id: (*id).to_string(),
                    text: (*text).to_string(),
                })
                .collect(),
            blank_count: 0,
            answer_key: AnswerKey::Option {
                option_id: correct.to_string(),
            },
            marks,
            explanation: None,
        }
    }

    pub fn new_true_false(prompt: impl Into<String>, correct: bool, marks: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            question_type: QuestionType::TrueFalse,
            prompt: prompt.into(),
            options: Vec::new(),
            blank_count: 0,
            answer_key: AnswerKey::Boolean { value: correct },
            marks,
            explanation: None,
        }
    }

    pub fn new_fill_in_blank(prompt: impl Into<String>, answers: &[&str], marks: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            question_type: QuestionType::FillInBlank,
            prompt: prompt.into(),
            options: Vec::new(),
            blank_count: answers.len(),
            answer_key: AnswerKey::Blanks {
                answers: answers.iter().map(|a| (*a).to_string()).collect(),
            },
            marks,
            explanation: None,
        }
    }

    pub fn new_subjective(
        question_type: QuestionType,
        prompt: impl Into<String>,
        marks: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            question_type,
            prompt: prompt.into(),
            options: Vec::new(),
            blank_count: 0,
            answer_key: AnswerKey::Manual,
            marks,
            explanation: None,
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Human-readable form of the key, used in result breakdowns.
    pub fn correct_answer_display(&self) -> Option<serde_json::Value> {
        match &self.answer_key {
            AnswerKey::Option { option_id } => {
                let text = self
                    .options
                    .iter()
                    .find(|o| &o.id == option_id)
                    .map(|o| o.text.clone())
                    .unwrap_or_else(|| option_id.clone());
                Some(serde_json::json!({ "option_id": option_id, "text": text }))
            }
            AnswerKey::Boolean { value } => Some(serde_json::json!(value)),
            AnswerKey::Blanks { answers } => Some(serde_json::json!(answers)),
            AnswerKey::Manual => None,
        }
    }
}
