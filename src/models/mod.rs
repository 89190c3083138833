// src/models/mod.rs
pub mod annotation;
pub mod credential;
pub mod layout;
pub mod outcome;
