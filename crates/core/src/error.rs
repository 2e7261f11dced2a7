//! Error type shared by the SnowField core operations

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while generating, committing or reading a field
///
/// Every variant is fatal for the operation that produced it: a field is only
/// meaningful as a complete deterministic whole.
#[derive(Error, Debug)]
pub enum SnowError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("i/o error on {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("seed must not be empty")]
    MalformedSeed,

    #[error("invalid generator parameters: {0}")]
    InvalidParams(String),

    #[error("field length {0} is not a multiple of the word size")]
    Misaligned(u64),

    #[error("field word count {0} is not a power of two")]
    NotPowerOfTwo(u64),

    #[error("deck {name} has length {actual}, expected {expected}")]
    DeckLength {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("word index {index} out of range for {word_count} words")]
    OutOfRange { index: u64, word_count: u64 },
}

impl SnowError {
    /// Attach a path to an I/O error
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SnowError::File {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, SnowError>;
