// src/utils/crypto.rs
//! Hashing utilities compatible with the ledger's identifier scheme.
//!
//! Uses SHA-512/256 (the ledger's native digest for address checksums and
//! transaction identifiers) via `ring`.

use ring::digest::{digest, SHA512_256};

/// Computes a SHA-512/256 hash of the input data.
///
/// # Arguments
/// * `data` - Binary data to hash (as bytes slice)
///
/// # Returns
/// Fixed-size 32-byte array (`[u8; 32]`) containing the hash.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    let output = digest(&SHA512_256, data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(output.as_ref());
    hash
}

/// Hashes several fields with an unambiguous separator.
///
/// Each part is length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
pub fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(parts.iter().map(|p| p.len() + 8).sum());
    for part in parts {
        buf.extend_from_slice(&(part.len() as u64).to_be_bytes());
        buf.extend_from_slice(part);
    }
    hash_data(&buf)
}
