use std::sync::Arc;

use crate::{
    config::Config,
    repositories::PgQuestionRepository,
    services::QuestionService,
    utils::crypto::{CryptoError, FieldCipher},
};
use axum::extract::FromRef;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub questions: QuestionService,
}

impl AppState {
    /// Wires the Postgres-backed question service; the cipher key is derived
    /// once here and shared read-only by every request.
    pub fn new(pool: PgPool, config: Config) -> Result<Self, CryptoError> {
        let cipher = Arc::new(FieldCipher::new(&config.encryption_key)?);
        let repo = Arc::new(PgQuestionRepository::new(pool.clone()));
        let questions = QuestionService::new(repo, cipher);

        Ok(Self {
            pool,
            config,
            questions,
        })
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for QuestionService {
    fn from_ref(state: &AppState) -> Self {
        state.questions.clone()
    }
}
