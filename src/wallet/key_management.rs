// src/wallet/key_management.rs
//! Signing capability for owner and device accounts.
//!
//! The core only needs an opaque signer: something that can produce an
//! address and sign a transaction. [`LocalSigner`] keeps an Ed25519 key in
//! process; a remote wallet agent can implement [`Signer`] instead.

use crate::blockchain::ledger::{SignedTransaction, UnsignedTransaction};
use crate::error::SignerError;
use crate::utils::address::Address;
use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};

/// Opaque signing capability.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Account address controlled by this signer.
    fn address(&self) -> Address;

    /// Signs a transaction on behalf of [`Signer::address`].
    async fn sign(
        &self,
        transaction: &UnsignedTransaction,
    ) -> Result<SignedTransaction, SignerError>;
}

/// In-process Ed25519 signer.
///
/// # Security Notes
/// - The seed never leaves this struct once loaded
/// - The account address is the raw public key
pub struct LocalSigner {
    key_pair: Ed25519KeyPair,
    seed: [u8; 32],
    address: Address,
}

impl LocalSigner {
    /// Builds a signer from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: [u8; 32]) -> Result<Self, SignerError> {
        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed)
            .map_err(|e| SignerError::Key(e.to_string()))?;
        let mut public = [0u8; 32];
        public.copy_from_slice(key_pair.public_key().as_ref());
        Ok(Self {
            key_pair,
            seed,
            address: Address::from_bytes(public),
        })
    }

    /// Builds a signer from a hex-encoded seed (with or without `0x`).
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, SignerError> {
        let trimmed = seed_hex.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(trimmed).map_err(|e| SignerError::Key(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| {
                SignerError::Key(format!("seed must be 32 bytes, got {}", b.len()))
            })?;
        Self::from_seed(seed)
    }

    /// Generates a fresh signer from the system RNG.
    pub fn generate() -> Result<Self, SignerError> {
        let mut seed = [0u8; 32];
        SystemRandom::new()
            .fill(&mut seed)
            .map_err(|_| SignerError::Unavailable("system RNG failure".into()))?;
        Self::from_seed(seed)
    }

    /// Hex form of the seed, for persisting the session.
    pub fn seed_hex(&self) -> String {
        hex::encode(self.seed)
    }

    /// Signs arbitrary bytes.
    pub fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        self.key_pair.sign(message).as_ref().to_vec()
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(
        &self,
        transaction: &UnsignedTransaction,
    ) -> Result<SignedTransaction, SignerError> {
        if transaction.sender != self.address {
            return Err(SignerError::Key(format!(
                "cannot sign for {}, signer controls {}",
                transaction.sender, self.address
            )));
        }
        let bytes = transaction
            .signing_bytes()
            .map_err(|e| SignerError::Unavailable(e.to_string()))?;
        Ok(SignedTransaction {
            transaction: transaction.clone(),
            signature: self.sign_bytes(&bytes),
        })
    }
}

/// Checks that `signed` carries a valid signature by its sender.
pub fn verify_signature(signed: &SignedTransaction) -> bool {
    let Ok(bytes) = signed.transaction.signing_bytes() else {
        return false;
    };
    UnparsedPublicKey::new(&ED25519, signed.transaction.sender.as_bytes())
        .verify(&bytes, &signed.signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::ledger::TransactionKind;

    fn note_payment(sender: Address) -> UnsignedTransaction {
        UnsignedTransaction {
            sender,
            nonce: 1,
            kind: TransactionKind::Payment {
                receiver: sender,
                amount: 0,
                note: b"{\"app_id\":\"gate\"}".to_vec(),
            },
        }
    }

    #[tokio::test]
    async fn signatures_verify_against_the_sender_address() {
        let signer = LocalSigner::from_seed([3u8; 32]).unwrap();
        let signed = signer.sign(&note_payment(signer.address())).await.unwrap();
        assert!(verify_signature(&signed));

        let mut tampered = signed.clone();
        tampered.transaction.nonce = 2;
        assert!(!verify_signature(&tampered));
    }

    #[tokio::test]
    async fn refuses_to_sign_for_other_accounts() {
        let signer = LocalSigner::from_seed([3u8; 32]).unwrap();
        let other = Address::from_bytes([4u8; 32]);
        assert!(matches!(signer.sign(&note_payment(other)).await, Err(SignerError::Key(_))));
    }

    #[test]
    fn seed_hex_round_trips() {
        let signer = LocalSigner::generate().unwrap();
        let restored = LocalSigner::from_seed_hex(&format!("0x{}", signer.seed_hex())).unwrap();
        assert_eq!(restored.address(), signer.address());
        assert!(LocalSigner::from_seed_hex("abcd").is_err());
        assert!(LocalSigner::from_seed_hex("zz").is_err());
    }
}
