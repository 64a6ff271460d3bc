// src/services/quota.rs

use crate::error::AppError;

/// Rejects another insert once `used` has reached the allocated total.
///
/// Callers must hold a lock on the exam topic between counting and inserting;
/// on its own this is only a read-then-write pair.
pub fn ensure_capacity(total_questions: i32, used: i64) -> Result<(), AppError> {
    if used >= i64::from(total_questions) {
        return Err(AppError::QuotaExceeded(format!(
            "Limit reached: {} of {} questions already submitted.",
            used, total_questions
        )));
    }
    Ok(())
}

/// Slots left for display; never negative even if the quota was lowered.
pub fn remaining(total_questions: i32, used: i64) -> i64 {
    (i64::from(total_questions) - used).max(0)
}
