// src/models/layout.rs
//! Fixed-layout object record and the guest-key application interface.
//!
//! Object-store records are 56 bytes, keyed by key id:
//!
//! | bytes    | field                                   |
//! |----------|-----------------------------------------|
//! | `0..32`  | recipient address                       |
//! | `32..40` | `valid_from`, u64 big-endian seconds    |
//! | `40..48` | `valid_until`, u64 big-endian seconds   |
//! | `48..56` | status, u64 big-endian (0 = revoked)    |

use crate::models::credential::KeyStatus;
use crate::utils::address::Address;

pub const RECORD_LEN: usize = 56;

const RECIPIENT: std::ops::Range<usize> = 0..32;
const VALID_FROM: std::ops::Range<usize> = 32..40;
const VALID_UNTIL: std::ops::Range<usize> = 40..48;
const STATUS: std::ops::Range<usize> = 48..56;

/// Application method creating a key object.
pub const METHOD_CREATE_KEY: &str = "create_key";
/// Application method flipping a key object's status to revoked.
pub const METHOD_REVOKE_KEY: &str = "revoke_key";

/// Field view of a 56-byte object record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRecord {
    pub recipient: Address,
    pub valid_from: u64,
    pub valid_until: u64,
    pub status: KeyStatus,
}

impl ObjectRecord {
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[RECIPIENT].copy_from_slice(self.recipient.as_bytes());
        bytes[VALID_FROM].copy_from_slice(&self.valid_from.to_be_bytes());
        bytes[VALID_UNTIL].copy_from_slice(&self.valid_until.to_be_bytes());
        let status: u64 = match self.status {
            KeyStatus::Active => 1,
            KeyStatus::Revoked => 0,
        };
        bytes[STATUS].copy_from_slice(&status.to_be_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() != RECORD_LEN {
            return Err(format!("object record must be {} bytes, got {}", RECORD_LEN, bytes.len()));
        }
        let mut recipient = [0u8; 32];
        recipient.copy_from_slice(&bytes[RECIPIENT]);
        let status = match read_u64(&bytes[STATUS]) {
            0 => KeyStatus::Revoked,
            _ => KeyStatus::Active,
        };
        Ok(Self {
            recipient: Address::from_bytes(recipient),
            valid_from: read_u64(&bytes[VALID_FROM]),
            valid_until: read_u64(&bytes[VALID_UNTIL]),
            status,
        })
    }

    /// Overwrites the status field of an encoded record in place.
    pub fn mark_revoked(bytes: &mut [u8]) -> Result<(), String> {
        if bytes.len() != RECORD_LEN {
            return Err(format!("object record must be {} bytes, got {}", RECORD_LEN, bytes.len()));
        }
        bytes[STATUS].copy_from_slice(&0u64.to_be_bytes());
        Ok(())
    }
}

fn read_u64(slice: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    u64::from_be_bytes(buf)
}
