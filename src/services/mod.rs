// src/services/mod.rs

pub mod ownership;
pub mod question_service;
pub mod quota;

pub use question_service::QuestionService;
