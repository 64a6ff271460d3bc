// src/repositories/question_repository.rs

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use crate::{
    error::{AppError, AppResult},
    models::{
        exam_topic::ExamTopic,
        question::{Choice, NewChoice, NewQuestion, Question, QuestionUpdate, QuestionWithChoices},
    },
    services::quota::ensure_capacity,
};

const EXAM_TOPIC_COLUMNS: &str =
    "id, exam_id, topic_id, user_id, total_questions, deadline, created_at, updated_at";
const QUESTION_COLUMNS: &str = "id, exam_id, exam_topic_id, content, marks, created_at";
const CHOICE_COLUMNS: &str = "id, question_id, choice_text, is_correct";

/// Storage for question aggregates and the exam topics that own them.
///
/// Text fields cross this boundary as ciphertext only.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    async fn find_exam_topic(&self, exam_topic_id: i64) -> AppResult<Option<ExamTopic>>;

    async fn count_questions(&self, exam_topic_id: i64) -> AppResult<i64>;

    /// Newest first; choices in insertion order.
    async fn list_questions(
        &self,
        exam_id: i64,
        exam_topic_id: i64,
    ) -> AppResult<Vec<QuestionWithChoices>>;

    async fn find_question(
        &self,
        exam_id: i64,
        question_id: i64,
    ) -> AppResult<Option<QuestionWithChoices>>;

    /// Counts and inserts as one atomic step against concurrent writers to the
    /// same exam topic. Fails with `QuotaExceeded` and writes nothing when full.
    async fn insert_within_quota(&self, new: NewQuestion) -> AppResult<QuestionWithChoices>;

    /// Applies an update and its choice plan as one unit of work. When the
    /// question moves topic, the target topic's quota is checked atomically.
    /// A planned change to a choice that no longer exists fails with
    /// `Conflict` and writes nothing.
    async fn apply_update(&self, update: QuestionUpdate) -> AppResult<QuestionWithChoices>;

    /// Returns `false` when nothing was deleted. Choices cascade.
    async fn delete_question(&self, question_id: i64) -> AppResult<bool>;
}

pub struct PgQuestionRepository {
    pool: PgPool,
}

impl PgQuestionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_choices(&self, question_ids: &[i64]) -> AppResult<HashMap<i64, Vec<Choice>>> {
        let choices = sqlx::query_as::<_, Choice>(&format!(
            "SELECT {CHOICE_COLUMNS} FROM choices WHERE question_id = ANY($1) ORDER BY id ASC"
        ))
        .bind(question_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<i64, Vec<Choice>> = HashMap::new();
        for choice in choices {
            grouped.entry(choice.question_id).or_default().push(choice);
        }
        Ok(grouped)
    }
}

/// Takes the exam topic row lock and verifies a free slot remains.
///
/// Concurrent writers block on `FOR UPDATE` until the holder commits, and
/// the subsequent count runs on a fresh snapshot that includes its insert.
async fn lock_capacity(conn: &mut PgConnection, exam_topic_id: i64) -> AppResult<()> {
    let total: i32 = sqlx::query_scalar(
        "SELECT total_questions FROM exam_topics WHERE id = $1 FOR UPDATE",
    )
    .bind(exam_topic_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("ExamTopic not found.".to_string()))?;

    let used: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE exam_topic_id = $1")
        .bind(exam_topic_id)
        .fetch_one(&mut *conn)
        .await?;

    ensure_capacity(total, used)
}

async fn insert_choices(
    conn: &mut PgConnection,
    question_id: i64,
    choices: &[NewChoice],
) -> AppResult<Vec<Choice>> {
    let mut inserted = Vec::with_capacity(choices.len());
    for choice in choices {
        let row = sqlx::query_as::<_, Choice>(&format!(
            "INSERT INTO choices (question_id, choice_text, is_correct)
             VALUES ($1, $2, $3)
             RETURNING {CHOICE_COLUMNS}"
        ))
        .bind(question_id)
        .bind(&choice.choice_text)
        .bind(choice.is_correct)
        .fetch_one(&mut *conn)
        .await?;
        inserted.push(row);
    }
    Ok(inserted)
}

#[async_trait]
impl QuestionRepository for PgQuestionRepository {
    async fn find_exam_topic(&self, exam_topic_id: i64) -> AppResult<Option<ExamTopic>> {
        let topic = sqlx::query_as::<_, ExamTopic>(&format!(
            "SELECT {EXAM_TOPIC_COLUMNS} FROM exam_topics WHERE id = $1"
        ))
        .bind(exam_topic_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(topic)
    }

    async fn count_questions(&self, exam_topic_id: i64) -> AppResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE exam_topic_id = $1")
                .bind(exam_topic_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn list_questions(
        &self,
        exam_id: i64,
        exam_topic_id: i64,
    ) -> AppResult<Vec<QuestionWithChoices>> {
        let questions = sqlx::query_as::<_, Question>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions
             WHERE exam_id = $1 AND exam_topic_id = $2
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(exam_id)
        .bind(exam_topic_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list questions: {:?}", e);
            AppError::from(e)
        })?;

        let ids: Vec<i64> = questions.iter().map(|q| q.id).collect();
        let mut choices = self.load_choices(&ids).await?;

        Ok(questions
            .into_iter()
            .map(|question| QuestionWithChoices {
                choices: choices.remove(&question.id).unwrap_or_default(),
                question,
            })
            .collect())
    }

    async fn find_question(
        &self,
        exam_id: i64,
        question_id: i64,
    ) -> AppResult<Option<QuestionWithChoices>> {
        let question = sqlx::query_as::<_, Question>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE id = $1 AND exam_id = $2"
        ))
        .bind(question_id)
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(question) = question else {
            return Ok(None);
        };

        let choices = self
            .load_choices(&[question.id])
            .await?
            .remove(&question.id)
            .unwrap_or_default();

        Ok(Some(QuestionWithChoices { question, choices }))
    }

    async fn insert_within_quota(&self, new: NewQuestion) -> AppResult<QuestionWithChoices> {
        let mut tx = self.pool.begin().await?;

        lock_capacity(&mut tx, new.exam_topic_id).await?;

        let question = sqlx::query_as::<_, Question>(&format!(
            "INSERT INTO questions (exam_id, exam_topic_id, content, marks)
             VALUES ($1, $2, $3, $4)
             RETURNING {QUESTION_COLUMNS}"
        ))
        .bind(new.exam_id)
        .bind(new.exam_topic_id)
        .bind(&new.content)
        .bind(new.marks)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create question: {:?}", e);
            AppError::from(e)
        })?;

        let choices = insert_choices(&mut tx, question.id, &new.choices).await?;

        tx.commit().await?;

        Ok(QuestionWithChoices { question, choices })
    }

    async fn apply_update(&self, update: QuestionUpdate) -> AppResult<QuestionWithChoices> {
        let mut tx = self.pool.begin().await?;

        if update.moves_topic() {
            lock_capacity(&mut tx, update.exam_topic_id).await?;
        }

        let result = sqlx::query(
            "UPDATE questions
             SET exam_topic_id = $1, marks = $2, content = COALESCE($3, content), updated_at = NOW()
             WHERE id = $4 AND exam_id = $5",
        )
        .bind(update.exam_topic_id)
        .bind(update.marks)
        .bind(update.content.as_deref())
        .bind(update.question_id)
        .bind(update.exam_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update question: {:?}", e);
            AppError::from(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Question not found.".to_string()));
        }

        let plan = &update.choices;

        if !plan.deleted.is_empty() {
            sqlx::query("DELETE FROM choices WHERE question_id = $1 AND id = ANY($2)")
                .bind(update.question_id)
                .bind(&plan.deleted)
                .execute(&mut *tx)
                .await?;
        }

        for change in &plan.changed {
            let result = sqlx::query(
                "UPDATE choices
                 SET choice_text = COALESCE($1, choice_text), is_correct = $2, updated_at = NOW()
                 WHERE id = $3 AND question_id = $4",
            )
            .bind(change.choice_text.as_deref())
            .bind(change.is_correct)
            .bind(change.id)
            .bind(update.question_id)
            .execute(&mut *tx)
            .await?;

            // Removed by a concurrent update after the plan was read; dropping
            // `tx` rolls back everything applied so far.
            if result.rows_affected() == 0 {
                return Err(AppError::Conflict(format!(
                    "Choice {} was changed concurrently; reload and retry.",
                    change.id
                )));
            }
        }

        insert_choices(&mut tx, update.question_id, &plan.inserted).await?;

        tx.commit().await?;

        self.find_question(update.exam_id, update.question_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Question not found.".to_string()))
    }

    async fn delete_question(&self, question_id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM questions WHERE id = $1")
            .bind(question_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to delete question: {:?}", e);
                AppError::from(e)
            })?;

        Ok(result.rows_affected() > 0)
    }
}
