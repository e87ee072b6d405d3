use ledger_core::constants::BLOCKS_PER_BATCH;

pub(crate) const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const PROOF_SECRET_ENV: &str = "LEDGER_PROOF_SECRET";
pub(crate) const DEFAULT_PAGE_LIMIT: u32 = BLOCKS_PER_BATCH;
