use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, info, warn};

use crate::audit::{validate_blocks, AuditFilter, AuditTrail, ChainViolation};
use crate::constants::{
    GENESIS_PREVIOUS_HASH, MAX_BLOCKS_PER_REQUEST, MAX_POW_DIFFICULTY, POW_DIFFICULTY,
};
use crate::error::LedgerError;
use crate::mine::mine;
use crate::proof::{DocumentProof, ProofSigner};
use crate::{now_ms, Block, Record};

/// Persistence the ledger mirrors its chain into.
/// This lives in `ledger-core` to avoid a circular dependency.
pub trait ChainStore: Send + Sync {
    /// Every stored block, ascending by index.
    fn load_all(&self) -> anyhow::Result<Vec<Block>>;
    /// Store a block. Re-saving a block with the same hash is a no-op.
    fn upsert(&self, block: &Block) -> anyhow::Result<()>;
    /// Highest stored index, `None` when empty.
    fn tip_height(&self) -> anyhow::Result<Option<u64>>;
    fn close(&self) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Leading zero hex digits every admitted block hash must have.
    pub difficulty: usize,
    pub proof_secret: Vec<u8>,
}

impl LedgerConfig {
    pub fn new(proof_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            difficulty: POW_DIFFICULTY,
            proof_secret: proof_secret.into(),
        }
    }

    pub fn with_difficulty(mut self, difficulty: usize) -> Self {
        self.difficulty = difficulty;
        self
    }
}

struct ChainState {
    blocks: Arc<Vec<Block>>,
    by_hash: HashMap<String, usize>,
}

impl ChainState {
    fn new(blocks: Vec<Block>) -> Self {
        let by_hash = blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.hash.clone(), i))
            .collect();
        Self {
            blocks: Arc::new(blocks),
            by_hash,
        }
    }

    fn tail(&self) -> Option<&Block> {
        self.blocks.last()
    }

    fn get(&self, hash: &str) -> Option<&Block> {
        self.by_hash.get(hash).and_then(|&i| self.blocks.get(i))
    }

    fn push(&mut self, block: Block) {
        self.by_hash.insert(block.hash.clone(), self.blocks.len());
        // Copy-on-write: outstanding audit snapshots keep the old vector.
        Arc::make_mut(&mut self.blocks).push(block);
    }
}

/// Append-only, tamper-evident chain of [`Record`]s.
///
/// Appends are serialized by a single writer lock; readers share the chain
/// state and never observe a block before it has been persisted and linked.
pub struct Ledger<S: ChainStore> {
    store: Arc<S>,
    config: LedgerConfig,
    signer: ProofSigner,
    state: RwLock<Option<ChainState>>,
    append: Mutex<()>,
}

impl<S: ChainStore> Ledger<S> {
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Result<Self, LedgerError> {
        if config.difficulty > MAX_POW_DIFFICULTY {
            return Err(LedgerError::InvalidDifficulty {
                difficulty: config.difficulty,
                max: MAX_POW_DIFFICULTY,
            });
        }
        let signer = ProofSigner::new(config.proof_secret.clone())?;
        Ok(Self {
            store,
            config,
            signer,
            state: RwLock::new(None),
            append: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Load the chain, creating genesis when the store is empty, and validate it.
    /// Idempotent once it has succeeded.
    pub fn initialize(&self) -> Result<(), LedgerError> {
        let _writer = self.lock_append()?;
        if self.read_state()?.is_some() {
            return Ok(());
        }

        let mut blocks = self.store.load_all().map_err(LedgerError::Storage)?;
        info!(blocks = blocks.len(), "loaded chain from store");

        if blocks.is_empty() {
            let candidate = Block::candidate(
                0,
                now_ms(),
                Record::genesis(),
                GENESIS_PREVIOUS_HASH.to_string(),
            );
            let genesis = mine(candidate, self.config.difficulty)?;
            self.store.upsert(&genesis).map_err(LedgerError::Storage)?;
            info!(hash = %genesis.hash, "created genesis block");
            blocks.push(genesis);
        }

        let violations = validate_blocks(&blocks);
        if !violations.is_empty() {
            for v in &violations {
                error!(index = v.index, kind = ?v.kind, "chain integrity violation");
            }
            return Err(LedgerError::InvalidChain { violations });
        }

        let height = blocks.len() as u64 - 1;
        *self.write_state()? = Some(ChainState::new(blocks));
        info!(height, "ledger initialized");
        Ok(())
    }

    /// Mine `payload` onto the tail, persist it, then make it visible.
    ///
    /// On a storage failure the in-memory chain is left untouched.
    pub fn add_block(&self, payload: Record) -> Result<Block, LedgerError> {
        if payload.is_genesis() {
            return Err(LedgerError::GenesisPayload);
        }
        if let Record::Custom(custom) = &payload {
            if custom.has_reserved_kind() {
                return Err(LedgerError::ReservedKind(custom.kind.clone()));
            }
        }
        let _writer = self.lock_append()?;

        let (index, previous_hash) = self.with_state(|s| {
            s.tail().map(|tail| (tail.index + 1, tail.hash.clone()))
        })?
        .ok_or(LedgerError::NotInitialized)?;

        let candidate = Block::candidate(index, now_ms(), payload, previous_hash);
        let block = mine(candidate, self.config.difficulty)?;
        debug!(index, nonce = block.nonce, hash = %block.hash, "mined block");

        if let Err(err) = self.store.upsert(&block) {
            warn!(index, error = %err, "failed to persist block; chain unchanged");
            return Err(LedgerError::Storage(err));
        }

        let mut guard = self.write_state()?;
        let state = guard.as_mut().ok_or(LedgerError::NotInitialized)?;
        state.push(block.clone());
        info!(index, kind = block.payload.record_type(), "block added");
        Ok(block)
    }

    /// Every integrity violation in the current chain.
    pub fn validate(&self) -> Result<Vec<ChainViolation>, LedgerError> {
        let blocks = self.snapshot()?;
        Ok(validate_blocks(&blocks))
    }

    pub fn is_chain_valid(&self) -> Result<bool, LedgerError> {
        let violations = self.validate()?;
        for v in &violations {
            warn!(index = v.index, kind = ?v.kind, "chain integrity violation");
        }
        Ok(violations.is_empty())
    }

    /// True when the block exists, recomputes, and the whole chain is valid.
    pub fn verify_block(&self, hash: &str) -> Result<bool, LedgerError> {
        if !self.block_is_self_consistent(hash)? {
            return Ok(false);
        }
        self.is_chain_valid()
    }

    /// True when the block exists and its hash recomputes. No chain scan.
    pub fn block_is_self_consistent(&self, hash: &str) -> Result<bool, LedgerError> {
        Ok(self
            .get_block(hash)?
            .is_some_and(|block| block.is_self_consistent()))
    }

    pub fn get_block(&self, hash: &str) -> Result<Option<Block>, LedgerError> {
        self.with_state(|s| s.get(hash).cloned())
    }

    pub fn block_at(&self, index: u64) -> Result<Option<Block>, LedgerError> {
        self.with_state(|s| s.blocks.get(index as usize).cloned())
    }

    /// (height, tip hash).
    pub fn tip(&self) -> Result<(u64, String), LedgerError> {
        self.with_state(|s| s.tail().map(|b| (b.index, b.hash.clone())))?
            .ok_or(LedgerError::NotInitialized)
    }

    pub fn len(&self) -> Result<usize, LedgerError> {
        self.with_state(|s| s.blocks.len())
    }

    /// A page of at most `limit` blocks starting at `start`, capped at
    /// `MAX_BLOCKS_PER_REQUEST`.
    pub fn blocks(&self, start: u64, limit: u32) -> Result<Vec<Block>, LedgerError> {
        let limit = limit.min(MAX_BLOCKS_PER_REQUEST) as usize;
        self.with_state(|s| {
            let start = (start as usize).min(s.blocks.len());
            let end = start.saturating_add(limit).min(s.blocks.len());
            s.blocks[start..end].to_vec()
        })
    }

    /// Blocks whose record references `entity_id`, in chain order.
    pub fn entity_history(&self, entity_id: &str) -> Result<Vec<Block>, LedgerError> {
        self.with_state(|s| {
            s.blocks
                .iter()
                .filter(|b| b.payload.references(entity_id))
                .cloned()
                .collect()
        })
    }

    /// Blocks whose serialized payload contains `needle` anywhere.
    ///
    /// Substring matching can hit unrelated fields; prefer [`Self::entity_history`].
    pub fn search_payloads(&self, needle: &str) -> Result<Vec<Block>, LedgerError> {
        let blocks = self.snapshot()?;
        let mut hits = Vec::new();
        for block in blocks.iter() {
            let json = serde_json::to_string(&block.payload)?;
            if json.contains(needle) {
                hits.push(block.clone());
            }
        }
        Ok(hits)
    }

    /// Non-genesis entries matching `filter`, over the chain as of this call.
    pub fn audit_trail(&self, filter: AuditFilter) -> Result<AuditTrail, LedgerError> {
        Ok(AuditTrail::new(self.snapshot()?, filter))
    }

    pub fn generate_proof(&self, content: &[u8]) -> DocumentProof {
        self.signer.generate_proof(content)
    }

    pub fn verify_integrity(&self, content: &[u8], hash: &str, signature: &str) -> bool {
        self.signer.verify_integrity(content, hash, signature)
    }

    /// Shared view of the chain; later appends do not affect it.
    pub fn snapshot(&self) -> Result<Arc<Vec<Block>>, LedgerError> {
        self.with_state(|s| Arc::clone(&s.blocks))
    }

    fn with_state<T>(&self, f: impl FnOnce(&ChainState) -> T) -> Result<T, LedgerError> {
        let guard = self.read_state()?;
        guard.as_ref().map(f).ok_or(LedgerError::NotInitialized)
    }

    fn read_state(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, Option<ChainState>>, LedgerError> {
        self.state
            .read()
            .map_err(|_| LedgerError::LockPoisoned("state"))
    }

    fn write_state(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, Option<ChainState>>, LedgerError> {
        self.state
            .write()
            .map_err(|_| LedgerError::LockPoisoned("state"))
    }

    fn lock_append(&self) -> Result<std::sync::MutexGuard<'_, ()>, LedgerError> {
        self.append
            .lock()
            .map_err(|_| LedgerError::LockPoisoned("append"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::meets_difficulty;
    use crate::store::MemoryStore;
    use crate::{CustomRecord, DocumentRecord, LeaseRecord, PaymentRecord, VendorContractRecord};

    fn ledger() -> Ledger<MemoryStore> {
        let ledger = Ledger::new(
            Arc::new(MemoryStore::new()),
            LedgerConfig::new("test-secret"),
        )
        .unwrap();
        ledger.initialize().unwrap();
        ledger
    }

    fn payment(amount: u64) -> Record {
        Record::Payment(PaymentRecord {
            payment_id: format!("pay-{amount}"),
            tenant_id: "tenant-1".to_string(),
            property_id: "prop-1".to_string(),
            lease_id: Some("lease-1".to_string()),
            amount,
            method: "card".to_string(),
            reference: None,
        })
    }

    fn note(entity: &str) -> Record {
        Record::Custom(CustomRecord {
            kind: "NOTE".to_string(),
            entity_ids: vec![entity.to_string()],
            data: serde_json::json!({ "text": "pay-500 mentioned in passing" }),
        })
    }

    #[test]
    fn fresh_ledger_has_genesis() {
        let ledger = ledger();
        assert_eq!(ledger.len().unwrap(), 1);
        let genesis = ledger.block_at(0).unwrap().unwrap();
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(genesis.payload.is_genesis());
        assert!(meets_difficulty(&genesis.hash, POW_DIFFICULTY));
        assert_eq!(ledger.store().len(), 1);
        assert!(ledger.is_chain_valid().unwrap());
    }

    #[test]
    fn operations_before_initialize_fail() {
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), LedgerConfig::new("k")).unwrap();
        assert!(matches!(ledger.len(), Err(LedgerError::NotInitialized)));
        assert!(matches!(
            ledger.add_block(payment(1)),
            Err(LedgerError::NotInitialized)
        ));
        assert!(matches!(
            ledger.verify_block("00"),
            Err(LedgerError::NotInitialized)
        ));
    }

    #[test]
    fn example_scenario() {
        let ledger = ledger();
        let genesis_hash = ledger.tip().unwrap().1;

        let block = ledger.add_block(payment(500)).unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.previous_hash, genesis_hash);
        assert!(block.hash.starts_with("00"));
        assert!(ledger.verify_block(&block.hash).unwrap());

        let trail: Vec<_> = ledger
            .audit_trail(AuditFilter::of_type("PAYMENT"))
            .unwrap()
            .collect();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].hash, block.hash);
    }

    #[test]
    fn append_monotonicity_and_linkage() {
        let ledger = ledger();
        let n = 12;
        for i in 0..n {
            ledger.add_block(payment(i)).unwrap();
        }
        let blocks = ledger.snapshot().unwrap();
        assert_eq!(blocks.len(), n as usize + 1);
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.index, i as u64);
            assert_eq!(block.compute_hash().unwrap(), block.hash);
            assert!(meets_difficulty(&block.hash, POW_DIFFICULTY));
            if i > 0 {
                assert_eq!(block.previous_hash, blocks[i - 1].hash);
            }
        }
        assert_eq!(ledger.tip().unwrap(), (n, blocks[n as usize].hash.clone()));
    }

    #[test]
    fn genesis_payload_rejected() {
        let ledger = ledger();
        assert!(matches!(
            ledger.add_block(Record::genesis()),
            Err(LedgerError::GenesisPayload)
        ));
        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn custom_kind_cannot_claim_a_builtin_type() {
        let ledger = ledger();
        for kind in ["PAYMENT", "GENESIS", "CUSTOM"] {
            let err = ledger
                .add_block(Record::Custom(CustomRecord {
                    kind: kind.to_string(),
                    entity_ids: vec!["tenant-1".to_string()],
                    data: serde_json::Value::Null,
                }))
                .unwrap_err();
            assert!(matches!(err, LedgerError::ReservedKind(k) if k == kind));
        }
        assert_eq!(ledger.len().unwrap(), 1);
        ledger.add_block(note("tenant-1")).unwrap();
        assert_eq!(ledger.audit_trail(AuditFilter::of_type("PAYMENT")).unwrap().count(), 0);
        assert_eq!(ledger.audit_trail(AuditFilter::of_type("GENESIS")).unwrap().count(), 0);
    }

    #[test]
    fn unreachable_difficulty_is_rejected() {
        let config = LedgerConfig::new("k").with_difficulty(MAX_POW_DIFFICULTY + 1);
        match Ledger::new(Arc::new(MemoryStore::new()), config) {
            Err(LedgerError::InvalidDifficulty { difficulty, max }) => {
                assert_eq!(difficulty, 65);
                assert_eq!(max, 64);
            }
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("difficulty 65 accepted"),
        }
    }

    #[test]
    fn initialize_twice_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let first = Ledger::new(store.clone(), LedgerConfig::new("k")).unwrap();
        first.initialize().unwrap();
        first.add_block(payment(1)).unwrap();
        first.initialize().unwrap();
        assert_eq!(first.len().unwrap(), 2);

        let second = Ledger::new(store.clone(), LedgerConfig::new("k")).unwrap();
        second.initialize().unwrap();
        assert_eq!(second.len().unwrap(), 2);
        assert_eq!(store.len(), 2);
        let genesis_count = second
            .snapshot()
            .unwrap()
            .iter()
            .filter(|b| b.payload.is_genesis())
            .count();
        assert_eq!(genesis_count, 1);
    }

    #[test]
    fn tampered_store_fails_initialization() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), LedgerConfig::new("k")).unwrap();
        ledger.initialize().unwrap();
        ledger.add_block(payment(500)).unwrap();
        ledger.add_block(payment(600)).unwrap();

        store.tamper(1, |block| {
            if let Record::Payment(p) = &mut block.payload {
                p.amount = 900;
            }
        });

        let reloaded = Ledger::new(store, LedgerConfig::new("k")).unwrap();
        match reloaded.initialize() {
            Err(LedgerError::InvalidChain { violations }) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].index, 1);
            }
            other => panic!("expected invalid chain, got {other:?}"),
        }
        assert!(matches!(reloaded.len(), Err(LedgerError::NotInitialized)));
    }

    #[test]
    fn storage_failure_leaves_chain_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), LedgerConfig::new("k")).unwrap();
        ledger.initialize().unwrap();
        ledger.add_block(payment(1)).unwrap();

        store.fail_next_write();
        let err = ledger.add_block(payment(2)).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ledger.len().unwrap(), 2);
        assert_eq!(store.len(), 2);

        let block = ledger.add_block(payment(2)).unwrap();
        assert_eq!(block.index, 2);
        assert!(ledger.is_chain_valid().unwrap());
    }

    #[test]
    fn load_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_read();
        let ledger = Ledger::new(store.clone(), LedgerConfig::new("k")).unwrap();
        assert!(matches!(ledger.initialize(), Err(LedgerError::Storage(_))));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn verify_and_lookup_unknown_hash() {
        let ledger = ledger();
        assert!(!ledger.verify_block("deadbeef").unwrap());
        assert!(!ledger.block_is_self_consistent("deadbeef").unwrap());
        assert!(ledger.get_block("deadbeef").unwrap().is_none());
    }

    #[test]
    fn get_block_by_hash() {
        let ledger = ledger();
        let block = ledger.add_block(payment(7)).unwrap();
        assert_eq!(ledger.get_block(&block.hash).unwrap(), Some(block.clone()));
        assert!(ledger.block_is_self_consistent(&block.hash).unwrap());
    }

    #[test]
    fn entity_history_uses_typed_references() {
        let ledger = ledger();
        let a = ledger.add_block(payment(500)).unwrap();
        let b = ledger.add_block(note("unit-4")).unwrap();
        let c = ledger.add_block(payment(600)).unwrap();

        let tenant: Vec<u64> = ledger
            .entity_history("tenant-1")
            .unwrap()
            .iter()
            .map(|b| b.index)
            .collect();
        assert_eq!(tenant, vec![a.index, c.index]);

        let unit = ledger.entity_history("unit-4").unwrap();
        assert_eq!(unit, vec![b.clone()]);

        // "pay-500" only appears inside the note's free text.
        let exact: Vec<u64> = ledger
            .entity_history("pay-500")
            .unwrap()
            .iter()
            .map(|b| b.index)
            .collect();
        assert_eq!(exact, vec![a.index]);
        let fuzzy: Vec<u64> = ledger
            .search_payloads("pay-500")
            .unwrap()
            .iter()
            .map(|b| b.index)
            .collect();
        assert_eq!(fuzzy, vec![a.index, b.index]);
    }

    #[test]
    fn audit_trail_is_a_snapshot() {
        let ledger = ledger();
        ledger.add_block(payment(1)).unwrap();
        let trail = ledger.audit_trail(AuditFilter::default()).unwrap();
        ledger.add_block(payment(2)).unwrap();
        assert_eq!(trail.count(), 1);
        assert_eq!(
            ledger.audit_trail(AuditFilter::default()).unwrap().count(),
            2
        );
    }

    #[test]
    fn paging_blocks() {
        let ledger = ledger();
        for i in 0..5 {
            ledger.add_block(payment(i)).unwrap();
        }
        let page: Vec<u64> = ledger.blocks(2, 2).unwrap().iter().map(|b| b.index).collect();
        assert_eq!(page, vec![2, 3]);
        assert_eq!(ledger.blocks(4, 10).unwrap().len(), 2);
        assert!(ledger.blocks(100, 10).unwrap().is_empty());
    }

    #[test]
    fn producers_return_verified_receipts() {
        let ledger = ledger();
        let lease = ledger
            .record_lease(LeaseRecord {
                lease_id: "lease-1".into(),
                property_id: "prop-1".into(),
                tenant_id: "tenant-1".into(),
                start_date: "2026-01-01".into(),
                end_date: "2026-12-31".into(),
                monthly_rent: 150_000,
                security_deposit: 300_000,
                terms_hash: "ab".repeat(32),
            })
            .unwrap();
        let contract = ledger
            .record_vendor_contract(VendorContractRecord {
                contract_id: "contract-1".into(),
                vendor_id: "vendor-1".into(),
                property_id: "prop-1".into(),
                service_type: "plumbing".into(),
                amount: 45_000,
                start_date: "2026-02-01".into(),
                end_date: "2026-08-01".into(),
                terms_hash: "cd".repeat(32),
            })
            .unwrap();
        let pay = ledger
            .record_payment(PaymentRecord {
                payment_id: "pay-1".into(),
                tenant_id: "tenant-1".into(),
                property_id: "prop-1".into(),
                lease_id: Some("lease-1".into()),
                amount: 150_000,
                method: "ach".into(),
                reference: Some("txn_123".into()),
            })
            .unwrap();
        let proof = ledger.generate_proof(b"inspection report");
        let doc = ledger
            .record_document(DocumentRecord {
                document_id: "doc-1".into(),
                document_type: "inspection".into(),
                content_hash: proof.hash.clone(),
                entity_id: Some("prop-1".into()),
            })
            .unwrap();

        for (i, receipt) in [lease, contract, pay, doc].iter().enumerate() {
            assert!(receipt.verified);
            assert_eq!(receipt.index, i as u64 + 1);
        }
        assert_eq!(ledger.entity_history("prop-1").unwrap().len(), 4);
        assert_eq!(
            ledger
                .audit_trail(AuditFilter::of_type("VENDOR_CONTRACT"))
                .unwrap()
                .count(),
            1
        );
        assert!(ledger.verify_integrity(b"inspection report", &proof.hash, &proof.signature));
        assert!(!ledger.verify_integrity(b"inspection rep0rt", &proof.hash, &proof.signature));
    }

    #[test]
    fn higher_difficulty_is_honoured() {
        let ledger = Ledger::new(
            Arc::new(MemoryStore::new()),
            LedgerConfig::new("k").with_difficulty(3),
        )
        .unwrap();
        ledger.initialize().unwrap();
        let block = ledger.add_block(payment(1)).unwrap();
        assert!(block.hash.starts_with("000"));
    }

    #[test]
    fn concurrent_appends_stay_contiguous() {
        let ledger = Arc::new(ledger());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for i in 0..5 {
                        ledger.add_block(payment(t * 100 + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let blocks = ledger.snapshot().unwrap();
        assert_eq!(blocks.len(), 41);
        assert!(ledger.is_chain_valid().unwrap());
        assert_eq!(ledger.store().len(), 41);
    }
}
