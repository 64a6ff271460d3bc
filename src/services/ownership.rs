// src/services/ownership.rs

use crate::{error::AppError, models::exam_topic::ExamTopic};

/// `owns(user, topic) := topic.user_id == user`.
pub fn owns(user_id: i64, topic: &ExamTopic) -> bool {
    topic.user_id == user_id
}

/// Resolves a looked-up exam topic against the route's exam and the acting user.
///
/// * Missing, or attached to a different exam: `NotFound`.
/// * Present but assigned to another instructor: `Forbidden`.
pub fn authorize(
    topic: Option<ExamTopic>,
    exam_id: i64,
    user_id: i64,
) -> Result<ExamTopic, AppError> {
    let topic = topic
        .filter(|t| t.exam_id == exam_id)
        .ok_or_else(|| AppError::NotFound("ExamTopic not found.".to_string()))?;

    if !owns(user_id, &topic) {
        tracing::warn!(
            "User {} denied access to exam topic {} owned by {}",
            user_id,
            topic.id,
            topic.user_id
        );
        return Err(AppError::Forbidden("Unauthorized.".to_string()));
    }

    Ok(topic)
}
