// src/utils/mod.rs

pub mod crypto;
pub mod jwt;
