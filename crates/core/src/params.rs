//! SnowField consensus parameters
//!
//! Anything in here changes the bytes of a generated field or the shape of a
//! proof, so these values are shared by miners and validators alike.

/// Size of one field word (and of a merkle node hash) in bytes
pub const WORD_LEN: usize = 16;

/// Same as [`WORD_LEN`], for offset arithmetic
pub const WORD_LEN_U64: u64 = WORD_LEN as u64;

/// Chain hash length (header hashing and pass contexts)
pub const CHAIN_HASH_LEN: usize = 32;

/// Number of field reads in one header hash
pub const POW_LOOK_PASSES: usize = 6;

/// Block header nonce length
pub const NONCE_LENGTH: usize = 12;

/// Length of a difficulty target
pub const TARGET_LENGTH: usize = 32;

/// Words covered by one entry of the first deck; deck k covers DECK_ENTRIES^k
pub const DECK_ENTRIES: u64 = 1024;

/// Unit of distributed storage (1 GiB)
pub const MINE_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// Words in one mining chunk
pub const WORDS_PER_CHUNK: u64 = MINE_CHUNK_SIZE / WORD_LEN_U64;

/// Average number of times each page is rewritten during generation
pub const PASSES: u64 = 7;

/// Generation page size in bytes
pub const PAGE_SIZE: usize = 4 * 1024;

/// Pages read, mixed and rewritten per generation round
pub const MULTIPLICITY: usize = 128;

/// Size of each buffer in the rotating entropy pool
pub const MONSTER_PAGE_SIZE: usize = PAGE_SIZE / 4;

/// Buffers kept in the rotating entropy pool (256 MiB worth)
pub const MONSTER_COUNT: usize = 268_435_456 / MONSTER_PAGE_SIZE;

/// Block size of the initial straight fill
pub const WRITE_BLOCK: usize = 1024 * 1024;

/// Algorithm version
pub const VERSION: u8 = 1;
