pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_MARKER: &str = "Genesis Block";
pub const POW_DIFFICULTY: usize = 2;
/// A hex digest has no more leading digits than this to zero.
pub const MAX_POW_DIFFICULTY: usize = HASH_HEX_SIZE;
/// Above this many leading zero digits the nonce search is spread over rayon.
pub const PARALLEL_MINING_THRESHOLD: usize = 4;
pub const BLOCKS_PER_BATCH: u32 = 99;
pub const MAX_BLOCKS_PER_REQUEST: u32 = BLOCKS_PER_BATCH * 10;
/// Type tags owned by the built-in record variants; custom kinds may not reuse them.
pub const BUILTIN_RECORD_TYPES: [&str; 6] = [
    "GENESIS",
    "LEASE_AGREEMENT",
    "VENDOR_CONTRACT",
    "PAYMENT",
    "DOCUMENT",
    "CUSTOM",
];
