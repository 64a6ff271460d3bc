// src/models/question.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct Question {
    pub id: i64,

    /// Denormalized from the exam topic.
    pub exam_id: i64,

    pub exam_topic_id: i64,

    /// Base64 ciphertext of the question text.
    pub content: String,

    pub marks: i32,

    pub created_at: DateTime<Utc>,
}

/// Represents the 'choices' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct Choice {
    pub id: i64,
    pub question_id: i64,

    /// Base64 ciphertext of the choice text.
    pub choice_text: String,

    pub is_correct: bool,
}

/// A question loaded together with its choices, choices in insertion order.
#[derive(Debug, Clone)]
pub struct QuestionWithChoices {
    pub question: Question,
    pub choices: Vec<Choice>,
}

/// A choice as submitted by the client.
///
/// On update, a missing or zero `id` means "new choice".
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChoiceInput {
    #[serde(default)]
    pub id: Option<i64>,
    #[validate(length(min = 1, max = 2000, message = "Choice text length must be between 1 and 2000 chars"))]
    pub choice_text: String,
    #[serde(default)]
    pub is_correct: bool,
}

impl ChoiceInput {
    /// The id of the stored choice this input refers to, if any.
    pub fn existing_id(&self) -> Option<i64> {
        self.id.filter(|id| *id != 0)
    }
}

/// DTO for creating a new question.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    pub exam_topic_id: i64,
    #[validate(length(min = 1, max = 10000, message = "Content length must be between 1 and 10000 chars"))]
    pub content: String,
    #[validate(range(min = 1, message = "Marks must be at least 1."))]
    pub marks: i32,
    #[validate(custom(function = validate_choices))]
    pub choices: Vec<ChoiceInput>,
}

/// DTO for replacing a question and reconciling its choices.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuestionRequest {
    pub question_id: i64,
    pub exam_topic_id: i64,
    #[validate(length(min = 1, max = 10000, message = "Content length must be between 1 and 10000 chars"))]
    pub content: String,
    #[validate(range(min = 1, message = "Marks must be at least 1."))]
    pub marks: i32,
    #[validate(custom(function = validate_choices))]
    pub choices: Vec<ChoiceInput>,
}

fn validate_choices(choices: &[ChoiceInput]) -> Result<(), validator::ValidationError> {
    if choices.is_empty() {
        return Err(validator::ValidationError::new("choices_cannot_be_empty"));
    }
    for choice in choices {
        if choice.validate().is_err() {
            return Err(validator::ValidationError::new("invalid_choice_text"));
        }
    }
    Ok(())
}

/// Decrypted choice as returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChoiceResponse {
    pub id: i64,
    pub choice_text: String,
    pub is_correct: bool,
}

/// Decrypted question as returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub id: i64,
    pub exam_id: i64,
    pub exam_topic_id: i64,
    pub content: String,
    pub marks: i32,
    pub choices: Vec<ChoiceResponse>,
}

/// Questions of one exam topic plus quota counters.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionListResponse {
    pub exam_id: i64,
    pub exam_topic_id: i64,
    pub total_questions: i32,
    pub used_questions: i64,
    pub remaining_questions: i64,
    pub questions: Vec<QuestionResponse>,
}

/// Already-encrypted choice ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewChoice {
    pub choice_text: String,
    pub is_correct: bool,
}

/// Already-encrypted question aggregate ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub exam_id: i64,
    pub exam_topic_id: i64,
    pub content: String,
    pub marks: i32,
    pub choices: Vec<NewChoice>,
}

/// In-place change to a stored choice. `choice_text` is `None` when the
/// text is unchanged and the stored ciphertext must be kept.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceChange {
    pub id: i64,
    pub choice_text: Option<String>,
    pub is_correct: bool,
}

/// Result of reconciling submitted choices against stored ones.
#[derive(Debug, Clone, Default)]
pub struct ChoicePlan {
    pub changed: Vec<ChoiceChange>,
    pub inserted: Vec<NewChoice>,
    pub deleted: Vec<i64>,
}

/// Everything an update writes, in one unit of work.
#[derive(Debug, Clone)]
pub struct QuestionUpdate {
    pub exam_id: i64,
    pub question_id: i64,
    pub previous_exam_topic_id: i64,
    pub exam_topic_id: i64,
    /// New ciphertext, or `None` to keep the stored one.
    pub content: Option<String>,
    pub marks: i32,
    pub choices: ChoicePlan,
}

impl QuestionUpdate {
    pub fn moves_topic(&self) -> bool {
        self.previous_exam_topic_id != self.exam_topic_id
    }
}
