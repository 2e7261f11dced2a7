//! Header proof-of-work helpers
//!
//! The header hash is a chain of [`POW_LOOK_PASSES`] field reads:
//!
//! ```text
//! context_0 = H(nonce || version || height || timestamp || field || prev || merkle || utxo || target)
//! index_i   = next_word_index(context_i, word_count)
//! context_i+1 = H(context_i || word[index_i])
//! snow_hash = context_POW_LOOK_PASSES
//! ```
//!
//! A header is valid work when `snow_hash` is below its target and every
//! read is backed by a merkle proof against the field root.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::FieldInfo;
use crate::params::{NONCE_LENGTH, POW_LOOK_PASSES, TARGET_LENGTH};
use crate::primitives::{ChainHash, Word, chain_hash};
use crate::proof::{SnowPowProof, verify_proof};

/// A difficulty target, big-endian
pub type Target = [u8; TARGET_LENGTH];

/// Block header fields that take part in the proof of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub block_height: u32,
    /// Milliseconds since the unix epoch
    pub timestamp: u64,
    pub snow_field: u32,
    #[serde(with = "hex")]
    pub prev_block_hash: ChainHash,
    #[serde(with = "hex")]
    pub merkle_root_hash: ChainHash,
    #[serde(with = "hex")]
    pub utxo_root_hash: ChainHash,
    #[serde(with = "hex")]
    pub target: Target,
    #[serde(with = "hex")]
    pub nonce: [u8; NONCE_LENGTH],
    #[serde(with = "hex")]
    pub snow_hash: ChainHash,
    #[serde(default)]
    pub pow_proofs: Vec<SnowPowProof>,
}

/// Why a header's proof of work was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PowError {
    #[error("wrong number of pow passes: {0}")]
    WrongPassCount(usize),

    #[error("pow merkle proof for word {0} does not compute")]
    BadProof(u64),

    #[error("pow pass index does not match: got {got}, expected {expected} of {word_count}")]
    IndexMismatch {
        got: u64,
        expected: u64,
        word_count: u64,
    },

    #[error("pow hash does not match")]
    HashMismatch,

    #[error("pow hash is not below target")]
    AboveTarget,

    #[error("header references field {header}, expected field {field}")]
    FieldMismatch { header: u32, field: u32 },
}

/// Initial pass context of a header with the given nonce
pub fn hash_header_bits(header: &BlockHeader, nonce: &[u8]) -> ChainHash {
    let mut int_data = [0u8; 3 * 4 + 8];
    int_data[0..4].copy_from_slice(&header.version.to_be_bytes());
    int_data[4..8].copy_from_slice(&header.block_height.to_be_bytes());
    int_data[8..16].copy_from_slice(&header.timestamp.to_be_bytes());
    int_data[16..20].copy_from_slice(&header.snow_field.to_be_bytes());

    chain_hash(&[
        nonce,
        &int_data,
        &header.prev_block_hash,
        &header.merkle_root_hash,
        &header.utxo_root_hash,
        &header.target,
    ])
}

/// Field word read by the pass with this context
///
/// Bytes 1..8 of `H(context)` as a big-endian integer (top byte zero),
/// reduced modulo `word_count`.
pub fn next_word_index(context: &ChainHash, word_count: u64) -> u64 {
    let hash = chain_hash(&[context]);
    let mut long_data = [0u8; 8];
    long_data[1..8].copy_from_slice(&hash[1..8]);
    u64::from_be_bytes(long_data) % word_count.max(1)
}

/// Context after a pass that read `word`
pub fn next_context(context: &ChainHash, word: &Word) -> ChainHash {
    chain_hash(&[context, word])
}

/// True when `hash` sorts strictly below `target`
pub fn less_than_target(hash: &ChainHash, target: &Target) -> bool {
    hash[..TARGET_LENGTH] < target[..]
}

/// Target for `bits` of difficulty: 2^(256 - bits), saturating at the maximum
pub fn target_for_diff(bits: u32) -> Target {
    let mut target = [0u8; TARGET_LENGTH];
    if bits == 0 {
        return [0xff; TARGET_LENGTH];
    }
    if bits > 256 {
        return target;
    }
    let exponent = (256 - bits) as usize;
    let byte = TARGET_LENGTH - 1 - exponent / 8;
    target[byte] = 1 << (exponent % 8);
    target
}

/// Approximate difficulty in bits for a target (display only)
pub fn diff_for_target(target: &Target) -> f64 {
    let mut value = 0f64;
    for b in target.iter() {
        value = value * 256.0 + *b as f64;
    }
    if value <= 0.0 {
        return 256.0;
    }
    256.0 - value.log2()
}

/// Replay the pass chain of `header` against its own proofs
///
/// Returns the final context; `header.snow_hash` is not consulted.
pub fn replay_passes(header: &BlockHeader, field: &FieldInfo) -> Result<ChainHash, PowError> {
    if header.pow_proofs.len() != POW_LOOK_PASSES {
        return Err(PowError::WrongPassCount(header.pow_proofs.len()));
    }
    for proof in &header.pow_proofs {
        if !check_proof(proof, field) {
            return Err(PowError::BadProof(proof.word_index));
        }
    }

    let word_count = field.word_count();
    let mut context = hash_header_bits(header, &header.nonce);
    for proof in &header.pow_proofs {
        let expected = next_word_index(&context, word_count);
        if proof.word_index != expected {
            return Err(PowError::IndexMismatch {
                got: proof.word_index,
                expected,
                word_count,
            });
        }
        let word = proof.word().ok_or(PowError::BadProof(proof.word_index))?;
        context = next_context(&context, word);
    }
    Ok(context)
}

/// Full proof-of-work check of a header against its field
pub fn check_header_pow(header: &BlockHeader, field: &FieldInfo) -> Result<(), PowError> {
    if header.snow_field != field.number {
        return Err(PowError::FieldMismatch {
            header: header.snow_field,
            field: field.number,
        });
    }
    let context = replay_passes(header, field)?;
    if context != header.snow_hash {
        return Err(PowError::HashMismatch);
    }
    if !less_than_target(&header.snow_hash, &header.target) {
        return Err(PowError::AboveTarget);
    }
    Ok(())
}

/// Check one proof against a field's committed root
pub fn check_proof(proof: &SnowPowProof, field: &FieldInfo) -> bool {
    verify_proof(proof, &field.merkle_root, field.length)
}
