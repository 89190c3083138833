// src/blockchain/mod.rs
pub mod indexer_client;
pub mod ledger;
pub mod memory_ledger;
