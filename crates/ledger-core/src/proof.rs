//! Keyed fingerprints for documents kept outside the chain.
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{now_ms, sha256, LedgerError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentProof {
    /// Hex SHA-256 of the document content.
    pub hash: String,
    /// Hex HMAC-SHA256 of `hash` under the signer's secret.
    pub signature: String,
    pub timestamp: u64,
}

/// Produces and checks [`DocumentProof`]s. No block is written.
#[derive(Clone)]
pub struct ProofSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for ProofSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofSigner").finish_non_exhaustive()
    }
}

impl ProofSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, LedgerError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(LedgerError::InvalidProofKey);
        }
        let mac = HmacSha256::new_from_slice(&secret).map_err(|_| LedgerError::InvalidProofKey)?;
        Ok(Self { mac })
    }

    pub fn generate_proof(&self, content: &[u8]) -> DocumentProof {
        let hash = hex::encode(sha256(content));
        let mut mac = self.mac.clone();
        mac.update(hash.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        DocumentProof {
            hash,
            signature,
            timestamp: now_ms(),
        }
    }

    /// True only if both the content digest and its signature match exactly.
    pub fn verify_integrity(&self, content: &[u8], hash: &str, signature: &str) -> bool {
        let current = hex::encode(sha256(content));
        if current != hash {
            return false;
        }
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(current.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }
}
