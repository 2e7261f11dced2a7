//! Error types of the miner library

use std::io;
use std::path::PathBuf;

use snowfield_core::SnowError;
use thiserror::Error;

/// Failures of a field source or the word RPC
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Field(#[from] SnowError),

    /// A read was routed to a layer that does not hold the chunk
    #[error("{layer} does not hold chunk {chunk} (word {word_index})")]
    NotHeld {
        layer: String,
        chunk: u64,
        word_index: u64,
    },

    #[error("read of {len} bytes at word {word_index} is not whole words inside one chunk")]
    BadRead { word_index: u64, len: usize },

    #[error("remote side reports wrong field (asked for {0})")]
    WrongField(u32),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("chunk {chunk} is not available from any loaded layer")]
    MissingChunk { chunk: u64 },

    #[error("chunk file {path} has length {actual}, expected {expected}")]
    ChunkLength {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

/// Invalid or unreadable miner configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no layers configured")]
    NoLayers,

    #[error("layer {layer}: missing required key '{key}'")]
    MissingKey { layer: usize, key: &'static str },

    #[error("layer {layer}: range {start}..={end} is inverted")]
    InvertedRange { layer: usize, start: u64, end: u64 },

    #[error("layer {layer}: needs at least one thread")]
    NoThreads { layer: usize },

    #[error("selected field {0} is not in the network field table")]
    UnknownField(u32),

    #[error("{0}")]
    Invalid(String),
}
