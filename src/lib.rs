// src/lib.rs
//! # Gatekey
//!
//! Ledger-anchored guest keys for physical access control. An owner issues
//! time-bounded, revocable keys; a verifying device checks each presented
//! key against the ledger before releasing the lock.
//!
//! ## Architecture Overview
//! 1. **Blockchain Layer**: ledger traits, the REST adapter and an in-process ledger
//! 2. **Services Layer**: codec, record reader, revocation scanner, verification
//!    engine, issuance, actuation and the HTTP API
//! 3. **Wallet Layer**: signer and owner session
//! 4. **Models / Utils**: data types, addresses, hashing, serialization

pub mod blockchain; // Ledger seams and adapters
pub mod config;
pub mod error;
pub mod models; // Data structures
pub mod services; // Business logic and API
pub mod utils; // Helper functions
pub mod wallet; // Signing and sessions
