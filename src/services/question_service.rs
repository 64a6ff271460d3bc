// src/services/question_service.rs

use std::{collections::HashMap, sync::Arc};

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::exam_topic::ExamTopic,
    models::question::{
        Choice, ChoiceChange, ChoiceInput, ChoicePlan, ChoiceResponse, CreateQuestionRequest,
        NewChoice, NewQuestion, QuestionListResponse, QuestionResponse, QuestionUpdate,
        QuestionWithChoices, UpdateQuestionRequest,
    },
    repositories::QuestionRepository,
    services::{ownership, quota},
    utils::crypto::FieldCipher,
};

/// Instructor-facing question authoring.
///
/// Every operation resolves ownership of the exam topic first. Text is
/// encrypted before it reaches the repository and decrypted on the way out.
#[derive(Clone)]
pub struct QuestionService {
    repo: Arc<dyn QuestionRepository>,
    cipher: Arc<FieldCipher>,
}

impl QuestionService {
    pub fn new(repo: Arc<dyn QuestionRepository>, cipher: Arc<FieldCipher>) -> Self {
        Self { repo, cipher }
    }

    /// Lists an owned exam topic's questions, newest first, with quota counters.
    pub async fn list(
        &self,
        exam_id: i64,
        exam_topic_id: i64,
        user_id: i64,
    ) -> AppResult<QuestionListResponse> {
        let topic = self.authorize_topic(exam_id, exam_topic_id, user_id).await?;

        let rows = self.repo.list_questions(exam_id, topic.id).await?;
        let used = self.repo.count_questions(topic.id).await?;

        let questions = rows
            .iter()
            .map(|row| self.reveal(row))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(QuestionListResponse {
            exam_id,
            exam_topic_id: topic.id,
            total_questions: topic.total_questions,
            used_questions: used,
            remaining_questions: quota::remaining(topic.total_questions, used),
            questions,
        })
    }

    /// Creates a question with its choices under the requested exam topic.
    pub async fn create(
        &self,
        exam_id: i64,
        request: CreateQuestionRequest,
        user_id: i64,
    ) -> AppResult<QuestionResponse> {
        request.validate()?;

        let topic = self
            .authorize_topic(exam_id, request.exam_topic_id, user_id)
            .await?;

        let choices = request
            .choices
            .iter()
            .map(|c| -> AppResult<NewChoice> {
                Ok(NewChoice {
                    choice_text: self.seal(&c.choice_text)?,
                    is_correct: c.is_correct,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let new = NewQuestion {
            exam_id,
            exam_topic_id: topic.id,
            content: self.seal(&request.content)?,
            marks: request.marks,
            choices,
        };

        let created = self.repo.insert_within_quota(new).await.inspect_err(|e| {
            if matches!(e, AppError::QuotaExceeded(_)) {
                tracing::info!("Quota reached for exam topic {}", topic.id);
            }
        })?;

        tracing::info!(
            "Question {} created under exam topic {} by user {}",
            created.question.id,
            topic.id,
            user_id
        );

        self.reveal(&created)
    }

    /// Reads one question the acting user owns.
    pub async fn get(&self, exam_id: i64, question_id: i64, user_id: i64) -> AppResult<QuestionResponse> {
        let existing = self.load_owned(exam_id, question_id, user_id).await?;
        self.reveal(&existing)
    }

    /// Replaces content, marks and topic, and reconciles the choice set.
    pub async fn update(
        &self,
        exam_id: i64,
        question_id: i64,
        request: UpdateQuestionRequest,
        user_id: i64,
    ) -> AppResult<QuestionResponse> {
        if request.question_id != question_id {
            return Err(AppError::BadRequest("ID mismatch.".to_string()));
        }
        request.validate()?;

        let existing = self.load_owned(exam_id, question_id, user_id).await?;

        let target = self
            .authorize_topic(exam_id, request.exam_topic_id, user_id)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => {
                    AppError::NotFound("Target ExamTopic not found.".to_string())
                }
                other => other,
            })?;

        let current = self.open(&existing.question.content)?;
        let content = if current != request.content {
            Some(self.seal(&request.content)?)
        } else {
            None
        };

        let choices = plan_choices(&self.cipher, &existing.choices, &request.choices)?;

        let update = QuestionUpdate {
            exam_id,
            question_id,
            previous_exam_topic_id: existing.question.exam_topic_id,
            exam_topic_id: target.id,
            content,
            marks: request.marks,
            choices,
        };

        let updated = self.repo.apply_update(update).await?;

        tracing::info!("Question {} updated by user {}", question_id, user_id);

        self.reveal(&updated)
    }

    /// Deletes a question the acting user owns; choices go with it.
    pub async fn delete(&self, exam_id: i64, question_id: i64, user_id: i64) -> AppResult<()> {
        self.load_owned(exam_id, question_id, user_id).await?;

        if !self.repo.delete_question(question_id).await? {
            return Err(AppError::NotFound("Question not found.".to_string()));
        }

        tracing::info!("Question {} deleted by user {}", question_id, user_id);
        Ok(())
    }

    async fn authorize_topic(
        &self,
        exam_id: i64,
        exam_topic_id: i64,
        user_id: i64,
    ) -> AppResult<ExamTopic> {
        let topic = self.repo.find_exam_topic(exam_topic_id).await?;
        ownership::authorize(topic, exam_id, user_id)
    }

    async fn load_owned(
        &self,
        exam_id: i64,
        question_id: i64,
        user_id: i64,
    ) -> AppResult<QuestionWithChoices> {
        let existing = self
            .repo
            .find_question(exam_id, question_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Question not found.".to_string()))?;

        self.authorize_topic(exam_id, existing.question.exam_topic_id, user_id)
            .await?;

        Ok(existing)
    }

    fn seal(&self, plaintext: &str) -> AppResult<String> {
        self.cipher
            .encrypt(Some(plaintext))?
            .ok_or_else(|| AppError::BadRequest("Text fields must not be empty.".to_string()))
    }

    fn open(&self, ciphertext: &str) -> AppResult<String> {
        Ok(self.cipher.decrypt(Some(ciphertext))?.unwrap_or_default())
    }

    fn reveal(&self, row: &QuestionWithChoices) -> AppResult<QuestionResponse> {
        let choices = row
            .choices
            .iter()
            .map(|c| -> AppResult<ChoiceResponse> {
                Ok(ChoiceResponse {
                    id: c.id,
                    choice_text: self.open(&c.choice_text)?,
                    is_correct: c.is_correct,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(QuestionResponse {
            id: row.question.id,
            exam_id: row.question.exam_id,
            exam_topic_id: row.question.exam_topic_id,
            content: self.open(&row.question.content)?,
            marks: row.question.marks,
            choices,
        })
    }
}

/// Matches submitted choices against stored ones.
///
/// * Known id: updated in place. Text is re-encrypted only when the decrypted
///   value differs; the correctness flag is always overwritten.
/// * Missing or zero id: inserted.
/// * Stored id absent from the request: deleted.
///
/// An id that does not belong to the question is rejected, as is the same id
/// submitted twice.
pub fn plan_choices(
    cipher: &FieldCipher,
    existing: &[Choice],
    incoming: &[ChoiceInput],
) -> AppResult<ChoicePlan> {
    let stored: HashMap<i64, &Choice> = existing.iter().map(|c| (c.id, c)).collect();
    let mut plan = ChoicePlan::default();
    let mut kept = Vec::new();

    for input in incoming {
        let Some(id) = input.existing_id() else {
            let choice_text = cipher
                .encrypt(Some(input.choice_text.as_str()))?
                .ok_or_else(|| AppError::BadRequest("Choice text must not be empty.".to_string()))?;
            plan.inserted.push(NewChoice {
                choice_text,
                is_correct: input.is_correct,
            });
            continue;
        };

        let current = stored.get(&id).ok_or_else(|| {
            AppError::BadRequest(format!("Choice {} does not belong to this question.", id))
        })?;
        if kept.contains(&id) {
            return Err(AppError::BadRequest(format!("Choice {} submitted twice.", id)));
        }
        kept.push(id);

        let decrypted = cipher
            .decrypt(Some(current.choice_text.as_str()))?
            .unwrap_or_default();
        let choice_text = if decrypted != input.choice_text {
            cipher.encrypt(Some(input.choice_text.as_str()))?
        } else {
            None
        };

        plan.changed.push(ChoiceChange {
            id,
            choice_text,
            is_correct: input.is_correct,
        });
    }

    plan.deleted = existing
        .iter()
        .map(|c| c.id)
        .filter(|id| !kept.contains(id))
        .collect();

    Ok(plan)
}
