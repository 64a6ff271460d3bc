// src/handlers/exam_topics.rs

use axum::{
    Json,
    extract::{Extension, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::{AppError, is_foreign_key_violation, is_unique_violation},
    models::exam_topic::{ExamTopic, ExamTopicRequest, ExamTopicSummary},
    utils::jwt::{Claims, ROLE_INSTRUCTOR, ROLE_SUPER_ADMIN},
};

const DUPLICATE_ASSIGNMENT: &str =
    "This topic has already been assigned to this instructor for this exam.";

async fn ensure_exam_exists(pool: &PgPool, exam_id: i64) -> Result<(), AppError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM exams WHERE id = $1")
        .bind(exam_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Exam not found".to_string()))?;
    Ok(())
}

/// Checks the referenced topic exists and the assignee is an instructor.
async fn check_assignment_targets(pool: &PgPool, payload: &ExamTopicRequest) -> Result<(), AppError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM topics WHERE id = $1")
        .bind(payload.topic_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Topic not found".to_string()))?;

    let role = sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = $1")
        .bind(payload.user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Instructor not found".to_string()))?;

    if role != ROLE_INSTRUCTOR {
        return Err(AppError::BadRequest(
            "Exam topics can only be assigned to instructors.".to_string(),
        ));
    }
    Ok(())
}

/// Lists the topic assignments of an exam with live question counts.
/// Admin only.
pub async fn list_exam_topics(
    State(pool): State<PgPool>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    ensure_exam_exists(&pool, exam_id).await?;

    let topics = sqlx::query_as::<_, ExamTopicSummary>(
        r#"
        SELECT
            et.id, et.exam_id, et.topic_id, t.title AS topic_title,
            et.user_id, u.full_name AS instructor_name,
            et.total_questions,
            (SELECT COUNT(*) FROM questions q WHERE q.exam_topic_id = et.id) AS used_questions,
            et.deadline
        FROM exam_topics et
        JOIN topics t ON et.topic_id = t.id
        JOIN users u ON et.user_id = u.id
        WHERE et.exam_id = $1
        ORDER BY et.id ASC
        "#,
    )
    .bind(exam_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list exam topics: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(topics))
}

/// Assigns a topic to an instructor within an exam.
/// Admin only. The (exam, topic, instructor) triple is unique.
pub async fn create_exam_topic(
    State(pool): State<PgPool>,
    Path(exam_id): Path<i64>,
    payload: Result<Json<ExamTopicRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    payload.validate()?;

    ensure_exam_exists(&pool, exam_id).await?;
    check_assignment_targets(&pool, &payload).await?;

    let topic = sqlx::query_as::<_, ExamTopic>(
        r#"
        INSERT INTO exam_topics (exam_id, topic_id, user_id, total_questions, deadline)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, exam_id, topic_id, user_id, total_questions, deadline, created_at, updated_at
        "#,
    )
    .bind(exam_id)
    .bind(payload.topic_id)
    .bind(payload.user_id)
    .bind(payload.total_questions)
    .bind(payload.deadline)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(DUPLICATE_ASSIGNMENT.to_string())
        } else {
            tracing::error!("Failed to create exam topic: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    tracing::info!(
        "Exam topic {} assigned to user {} with quota {}",
        topic.id,
        topic.user_id,
        topic.total_questions
    );

    Ok((StatusCode::CREATED, Json(topic)))
}

/// Retrieves one assignment of an exam.
/// Admin only.
pub async fn get_exam_topic(
    State(pool): State<PgPool>,
    Path((exam_id, id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let topic = sqlx::query_as::<_, ExamTopic>(
        r#"
        SELECT id, exam_id, topic_id, user_id, total_questions, deadline, created_at, updated_at
        FROM exam_topics
        WHERE id = $1 AND exam_id = $2
        "#,
    )
    .bind(id)
    .bind(exam_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("ExamTopic not found".to_string()))?;

    Ok(Json(topic))
}

/// Replaces topic, instructor, quota and deadline of an assignment.
/// Admin only.
pub async fn update_exam_topic(
    State(pool): State<PgPool>,
    Path((exam_id, id)): Path<(i64, i64)>,
    payload: Result<Json<ExamTopicRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    payload.validate()?;

    check_assignment_targets(&pool, &payload).await?;

    let topic = sqlx::query_as::<_, ExamTopic>(
        r#"
        UPDATE exam_topics
        SET topic_id = $1, user_id = $2, total_questions = $3, deadline = $4, updated_at = NOW()
        WHERE id = $5 AND exam_id = $6
        RETURNING id, exam_id, topic_id, user_id, total_questions, deadline, created_at, updated_at
        "#,
    )
    .bind(payload.topic_id)
    .bind(payload.user_id)
    .bind(payload.total_questions)
    .bind(payload.deadline)
    .bind(id)
    .bind(exam_id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(DUPLICATE_ASSIGNMENT.to_string())
        } else {
            tracing::error!("Failed to update exam topic: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?
    .ok_or(AppError::NotFound("ExamTopic not found".to_string()))?;

    Ok(Json(topic))
}

/// Deletes an assignment.
/// Super admin only. Refused while questions still reference it.
pub async fn delete_exam_topic(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    if !claims.has_role(&[ROLE_SUPER_ADMIN]) {
        return Err(AppError::Forbidden(
            "Only a super admin can delete exam topics.".to_string(),
        ));
    }

    let result = sqlx::query("DELETE FROM exam_topics WHERE id = $1 AND exam_id = $2")
        .bind(id)
        .bind(exam_id)
        .execute(&pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::Conflict("ExamTopic still has questions.".to_string())
            } else {
                tracing::error!("Failed to delete exam topic: {:?}", e);
                AppError::InternalServerError(e.to_string())
            }
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("ExamTopic not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}
