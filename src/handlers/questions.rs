// src/handlers/questions.rs

use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::{
    error::AppError,
    models::question::{CreateQuestionRequest, UpdateQuestionRequest},
    services::QuestionService,
    utils::jwt::Claims,
};

/// Lists the questions of an exam topic owned by the current instructor,
/// with quota counters.
pub async fn list_questions(
    State(service): State<QuestionService>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, topic_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let list = service.list(exam_id, topic_id, claims.user_id()?).await?;
    Ok(Json(list))
}

/// Creates a question with its choices.
///
/// The exam topic is taken from the body; it must be owned by the caller and
/// still have quota left.
pub async fn create_question(
    State(service): State<QuestionService>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, _topic_id)): Path<(i64, i64)>,
    payload: Result<Json<CreateQuestionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let created = service.create(exam_id, payload, claims.user_id()?).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Retrieves a single question with decrypted content.
pub async fn get_question(
    State(service): State<QuestionService>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, _topic_id, question_id)): Path<(i64, i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let question = service.get(exam_id, question_id, claims.user_id()?).await?;
    Ok(Json(question))
}

/// Replaces a question and reconciles its choices.
pub async fn update_question(
    State(service): State<QuestionService>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, _topic_id, question_id)): Path<(i64, i64, i64)>,
    payload: Result<Json<UpdateQuestionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let updated = service
        .update(exam_id, question_id, payload, claims.user_id()?)
        .await?;
    Ok(Json(updated))
}

/// Deletes a question and its choices.
pub async fn delete_question(
    State(service): State<QuestionService>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, _topic_id, question_id)): Path<(i64, i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    service.delete(exam_id, question_id, claims.user_id()?).await?;
    Ok(Json(json!({ "message": "Deleted successfully." })))
}
