use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};

use crate::chain::ChainStore;
use crate::Block;

/// Volatile [`ChainStore`] for tests, demos, and embedding.
///
/// Failure switches let callers simulate an unreachable backend for exactly
/// one read or write.
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<BTreeMap<u64, Block>>,
    fail_read: AtomicBool,
    fail_write: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().map(|b| b.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_next_read(&self) {
        self.fail_read.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_write(&self) {
        self.fail_write.store(true, Ordering::SeqCst);
    }

    /// Mutate a stored block in place, bypassing every check.
    pub fn tamper(&self, index: u64, f: impl FnOnce(&mut Block)) {
        if let Ok(mut blocks) = self.blocks.write() {
            if let Some(block) = blocks.get_mut(&index) {
                f(block);
            }
        }
    }
}

impl ChainStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<Block>> {
        if self.fail_read.swap(false, Ordering::SeqCst) {
            bail!("memory store: simulated read failure");
        }
        let blocks = self
            .blocks
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(blocks.values().cloned().collect())
    }

    fn upsert(&self, block: &Block) -> Result<()> {
        if self.fail_write.swap(false, Ordering::SeqCst) {
            bail!("memory store: simulated write failure");
        }
        let mut blocks = self
            .blocks
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        match blocks.get(&block.index) {
            Some(existing) if existing.hash == block.hash => Ok(()),
            Some(existing) => bail!(
                "index {} already holds block {}",
                block.index,
                existing.hash
            ),
            None => {
                blocks.insert(block.index, block.clone());
                Ok(())
            }
        }
    }

    fn tip_height(&self) -> Result<Option<u64>> {
        let blocks = self
            .blocks
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(blocks.keys().next_back().copied())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
