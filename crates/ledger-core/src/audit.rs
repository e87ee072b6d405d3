//! Integrity scans and audit queries over a chain snapshot.
//!
//! Both operate on a `&[Block]`, so the [`Ledger`](crate::chain::Ledger) can run
//! them against a cheap `Arc` snapshot without holding its state lock.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::GENESIS_PREVIOUS_HASH;
use crate::{Block, Record};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Block index does not match its position in the chain.
    IndexGap,
    /// Genesis `previous_hash` is not the sentinel.
    GenesisLink,
    /// Block 0 lacks the genesis record, or a later block carries one.
    GenesisPayload,
    /// `previous_hash` does not match the prior block's hash.
    BrokenLink,
    /// Stored hash does not recompute from the block fields.
    HashMismatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainViolation {
    pub index: u64,
    pub kind: ViolationKind,
}

/// Scan every block and report each integrity violation found.
pub fn validate_blocks(blocks: &[Block]) -> Vec<ChainViolation> {
    let mut violations = Vec::new();
    for (position, block) in blocks.iter().enumerate() {
        if block.index != position as u64 {
            violations.push(ChainViolation {
                index: block.index,
                kind: ViolationKind::IndexGap,
            });
        }

        if block.is_genesis() != block.payload.is_genesis() {
            violations.push(ChainViolation {
                index: block.index,
                kind: ViolationKind::GenesisPayload,
            });
        }

        if position == 0 {
            if block.previous_hash != GENESIS_PREVIOUS_HASH {
                violations.push(ChainViolation {
                    index: block.index,
                    kind: ViolationKind::GenesisLink,
                });
            }
        } else if block.previous_hash != blocks[position - 1].hash {
            violations.push(ChainViolation {
                index: block.index,
                kind: ViolationKind::BrokenLink,
            });
        }

        if !block.is_self_consistent() {
            violations.push(ChainViolation {
                index: block.index,
                kind: ViolationKind::HashMismatch,
            });
        }
    }
    violations
}

/// Optional, AND-combined audit filters. Time bounds are inclusive unix ms.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    #[serde(default, rename = "type")]
    pub record_type: Option<String>,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub end: Option<u64>,
}

impl AuditFilter {
    pub fn of_type(record_type: impl Into<String>) -> Self {
        Self {
            record_type: Some(record_type.into()),
            ..Self::default()
        }
    }

    pub fn between(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn matches(&self, block: &Block) -> bool {
        if block.payload.is_genesis() {
            return false;
        }
        if let Some(t) = &self.record_type {
            if block.payload.record_type() != t {
                return false;
            }
        }
        if self.start.is_some_and(|start| block.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| block.timestamp > end) {
            return false;
        }
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub index: u64,
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub record_type: String,
    pub payload: Record,
    pub hash: String,
}

impl From<&Block> for AuditEntry {
    fn from(block: &Block) -> Self {
        Self {
            index: block.index,
            timestamp: block.timestamp,
            record_type: block.payload.record_type().to_string(),
            payload: block.payload.clone(),
            hash: block.hash.clone(),
        }
    }
}

/// Lazily filtered audit entries over a chain snapshot, in ascending index order.
///
/// Cloning yields an independent iterator positioned where the original was,
/// and [`AuditTrail::restart`] rewinds to the first block.
#[derive(Clone, Debug)]
pub struct AuditTrail {
    blocks: Arc<Vec<Block>>,
    filter: AuditFilter,
    position: usize,
}

impl AuditTrail {
    pub(crate) fn new(blocks: Arc<Vec<Block>>, filter: AuditFilter) -> Self {
        Self {
            blocks,
            filter,
            position: 0,
        }
    }

    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for AuditTrail {
    type Item = AuditEntry;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(block) = self.blocks.get(self.position) {
            self.position += 1;
            if self.filter.matches(block) {
                return Some(AuditEntry::from(block));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.blocks.len().saturating_sub(self.position)))
    }
}
