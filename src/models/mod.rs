// src/models/mod.rs

pub mod exam_topic;
pub mod question;
