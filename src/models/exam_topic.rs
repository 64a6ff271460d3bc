// src/models/exam_topic.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'exam_topics' table: one instructor's assignment to supply
/// `total_questions` questions for a topic within an exam.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamTopic {
    pub id: i64,
    pub exam_id: i64,
    pub topic_id: i64,

    /// Owning instructor.
    pub user_id: i64,

    /// Question quota for this assignment.
    pub total_questions: i32,

    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Assignment row joined with topic/instructor names and the live question count.
#[derive(Debug, Serialize, FromRow)]
pub struct ExamTopicSummary {
    pub id: i64,
    pub exam_id: i64,
    pub topic_id: i64,
    pub topic_title: String,
    pub user_id: i64,
    pub instructor_name: String,
    pub total_questions: i32,
    pub used_questions: i64,
    pub deadline: DateTime<Utc>,
}

/// DTO for assigning a topic to an instructor. Also used for edits, where
/// every field is replaced.
#[derive(Debug, Deserialize, Validate)]
pub struct ExamTopicRequest {
    pub topic_id: i64,
    pub user_id: i64,
    #[validate(range(min = 1, message = "Total questions must be at least 1."))]
    pub total_questions: i32,
    pub deadline: DateTime<Utc>,
}
