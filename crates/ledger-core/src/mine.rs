use crate::{
    constants::PARALLEL_MINING_THRESHOLD,
    pow::{count_leading_zero_digits, mine_block},
    sha256, Block, LedgerError,
};
use rayon::prelude::*;
use tracing::debug;

/// Mines a block by searching nonces in parallel until its hash has at least
/// `difficulty` leading zero hex digits. Returns the block with nonce and hash set.
pub fn mine_block_parallel(block: Block, difficulty: usize) -> Result<Block, LedgerError> {
    // Only the nonce varies per attempt.
    let prefix = block.preimage_prefix()?;

    let found = (0u64..u64::MAX).into_par_iter().find_first(|nonce| {
        let mut preimage = Vec::with_capacity(prefix.len() + 8);
        preimage.extend_from_slice(&prefix);
        preimage.extend_from_slice(&nonce.to_le_bytes());
        count_leading_zero_digits(&sha256(&preimage)) >= difficulty
    });

    let mut mined = block;
    // The u64 nonce space is never exhausted at any practical difficulty; fall
    // back to the sequential miner so the result is still well defined.
    let Some(nonce) = found else {
        return mine_block(mined, difficulty);
    };
    mined.nonce = nonce;
    mined.hash = mined.compute_hash()?;

    debug!(
        index = mined.index,
        nonce,
        hash = %mined.hash,
        "mined block in parallel"
    );
    Ok(mined)
}

/// Picks the sequential or parallel miner for the requested difficulty.
pub fn mine(block: Block, difficulty: usize) -> Result<Block, LedgerError> {
    if difficulty >= PARALLEL_MINING_THRESHOLD {
        mine_block_parallel(block, difficulty)
    } else {
        mine_block(block, difficulty)
    }
}
