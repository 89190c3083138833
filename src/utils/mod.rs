// src/utils/mod.rs
pub mod address;
pub mod crypto;
pub mod serialization;
