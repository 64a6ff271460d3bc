// src/handlers/mod.rs

pub mod exam_topics;
pub mod questions;
