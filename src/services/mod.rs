// src/services/mod.rs
pub mod actuation;
pub mod api_server;
pub mod credential_codec;
pub mod credential_issuer;
pub mod lock_state;
pub mod record_reader;
pub mod revocation;
pub mod verifier;
