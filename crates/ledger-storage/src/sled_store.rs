use anyhow::{anyhow, bail, Context, Result};
use ledger_core::{Block, ChainStore, Record};
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionResult;
use sled::{Db, IVec, Transactional, Tree};
use std::path::Path;
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";
const TREE_HASHES: &str = "hashes";

/// On-disk row. The payload is kept as its JSON text because bincode cannot
/// decode the internally tagged `Record` enum.
#[derive(Serialize, Deserialize)]
struct StoredBlock {
  index: u64,
  timestamp: u64,
  payload_json: String,
  previous_hash: String,
  hash: String,
  nonce: u64,
}

impl StoredBlock {
  fn from_block(block: &Block) -> Result<Self> {
    Ok(Self {
      index: block.index,
      timestamp: block.timestamp,
      payload_json: serde_json::to_string(&block.payload)?,
      previous_hash: block.previous_hash.clone(),
      hash: block.hash.clone(),
      nonce: block.nonce,
    })
  }

  fn into_block(self) -> Result<Block> {
    let payload: Record = serde_json::from_str(&self.payload_json)
      .with_context(|| format!("decoding payload of block {}", self.index))?;
    Ok(Block {
      index: self.index,
      timestamp: self.timestamp,
      payload,
      previous_hash: self.previous_hash,
      hash: self.hash,
      nonce: self.nonce,
    })
  }
}

fn index_key(index: u64) -> [u8; 8] {
  index.to_be_bytes()
}

fn key_index(key: &[u8]) -> Result<u64> {
  let arr: [u8; 8] = key
    .try_into()
    .map_err(|_| anyhow!("malformed block key of {} bytes", key.len()))?;
  Ok(u64::from_be_bytes(arr))
}

fn decode(value: &IVec) -> Result<Block> {
  let row: StoredBlock = bincode::deserialize(value).context("decoding stored block")?;
  row.into_block()
}

/// Durable [`ChainStore`] backed by sled.
///
/// `blocks` maps big-endian index to a bincode row, `hashes` maps block hash
/// to index so re-saving a known block is a no-op.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled store at {}", path.display()))?;
    info!(path = %path.display(), "sled store opened");
    Ok(Self { db })
  }

  fn blocks(&self) -> Result<Tree> {
    Ok(self.db.open_tree(TREE_BLOCKS)?)
  }

  fn hashes(&self) -> Result<Tree> {
    Ok(self.db.open_tree(TREE_HASHES)?)
  }

  pub fn get_block(&self, index: u64) -> Result<Option<Block>> {
    self.blocks()?.get(index_key(index))?.map(|v| decode(&v)).transpose()
  }

  pub fn get_by_hash(&self, hash: &str) -> Result<Option<Block>> {
    match self.hashes()?.get(hash.as_bytes())? {
      Some(key) => self.get_block(key_index(&key)?),
      None => Ok(None),
    }
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.blocks()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.blocks()?.is_empty())
  }

  /// Drop every stored block.
  pub fn clear(&self) -> Result<()> {
    self.blocks()?.clear()?;
    self.hashes()?.clear()?;
    self.db.flush()?;
    Ok(())
  }
}

impl ChainStore for SledStore {
  fn load_all(&self) -> Result<Vec<Block>> {
    let mut out = Vec::new();
    for entry in self.blocks()?.iter() {
      let (key, value) = entry?;
      let index = key_index(&key)?;
      let block = decode(&value).with_context(|| format!("block {index} is corrupt"))?;
      out.push(block);
    }
    debug!(blocks = out.len(), "loaded blocks from sled");
    Ok(out)
  }

  fn upsert(&self, block: &Block) -> Result<()> {
    let blocks = self.blocks()?;
    let hashes = self.hashes()?;

    if hashes.contains_key(block.hash.as_bytes())? {
      return Ok(());
    }
    let key = index_key(block.index);
    if let Some(existing) = blocks.get(key)? {
      let existing = decode(&existing)?;
      bail!(
        "index {} already holds block {}",
        block.index,
        existing.hash
      );
    }

    let bytes = bincode::serialize(&StoredBlock::from_block(block)?)?;
    let result: TransactionResult<(), ()> = (&blocks, &hashes).transaction(|(tb, th)| {
      tb.insert(key.to_vec(), bytes.clone())?;
      th.insert(block.hash.as_bytes(), key.to_vec())?;
      Ok(())
    });
    result.map_err(|e| anyhow!("writing block {}: {e:?}", block.index))?;

    self.db.flush()?;
    Ok(())
  }

  fn tip_height(&self) -> Result<Option<u64>> {
    match self.blocks()?.last()? {
      Some((key, _)) => Ok(Some(key_index(&key)?)),
      None => Ok(None),
    }
  }

  fn close(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }
}
