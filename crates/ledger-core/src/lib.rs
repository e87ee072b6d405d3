pub mod audit;
pub mod chain;
pub mod constants;
pub mod error;
pub mod mine;
pub mod proof;
pub mod records;
pub mod store;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub use audit::{AuditEntry, AuditFilter, AuditTrail, ChainViolation, ViolationKind};
pub use chain::{ChainStore, Ledger, LedgerConfig};
pub use error::LedgerError;
pub use proof::{DocumentProof, ProofSigner};
pub use records::{
    CustomRecord, DocumentRecord, LeaseRecord, PaymentRecord, Record, RecordReceipt,
    VendorContractRecord,
};
pub use store::MemoryStore;

pub type Hash = [u8; 32];

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub fn sha256(bytes: &[u8]) -> Hash {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub payload: Record,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
}

impl Block {
    /// An unmined block: nonce 0 and an empty hash.
    pub fn candidate(index: u64, timestamp: u64, payload: Record, previous_hash: String) -> Self {
        Self {
            index,
            timestamp,
            payload,
            previous_hash,
            hash: String::new(),
            nonce: 0,
        }
    }

    /// Hashing preimage with `nonce` left off the end, so miners can append
    /// candidate nonces without re-serializing the payload.
    pub fn preimage_prefix(&self) -> Result<Vec<u8>, LedgerError> {
        let payload = self.payload.canonical_bytes()?;
        let prev = self.previous_hash.as_bytes();
        let mut bytes = Vec::with_capacity(8 + 8 + 8 + payload.len() + 8 + prev.len() + 8);
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(&(prev.len() as u64).to_le_bytes());
        bytes.extend_from_slice(prev);
        Ok(bytes)
    }

    pub fn hash_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        let mut bytes = self.preimage_prefix()?;
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        Ok(bytes)
    }

    /// Recompute the hex digest from the block's own fields.
    pub fn compute_hash(&self) -> Result<String, LedgerError> {
        Ok(hex::encode(sha256(&self.hash_bytes()?)))
    }

    /// True when the stored hash matches a fresh recomputation.
    pub fn is_self_consistent(&self) -> bool {
        matches!(self.compute_hash(), Ok(h) if h == self.hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

pub mod pow {
    use super::{sha256, Block, LedgerError};

    /// Mine the block by incrementing nonce until its hex hash starts with at
    /// least `difficulty` `'0'` digits.
    pub fn mine_block(mut block: Block, difficulty: usize) -> Result<Block, LedgerError> {
        let mut preimage = block.preimage_prefix()?;
        let prefix_len = preimage.len();
        loop {
            preimage.truncate(prefix_len);
            preimage.extend_from_slice(&block.nonce.to_le_bytes());
            let h = sha256(&preimage);
            if count_leading_zero_digits(&h) >= difficulty {
                block.hash = hex::encode(h);
                return Ok(block);
            }
            block.nonce = block.nonce.wrapping_add(1);
        }
    }

    /// Leading zero hex digits (nibbles) of a raw digest.
    pub fn count_leading_zero_digits(hash: &[u8]) -> usize {
        let mut total = 0usize;
        for b in hash {
            if *b == 0 {
                total += 2;
            } else {
                if *b < 0x10 {
                    total += 1;
                }
                break;
            }
        }
        total
    }

    pub fn meets_difficulty(hex_hash: &str, difficulty: usize) -> bool {
        hex_hash.len() >= difficulty && hex_hash.bytes().take(difficulty).all(|c| c == b'0')
    }
}
