//! # SnowField Core
//!
//! A memory-hard proof of work built on a large, deterministically generated
//! dataset (the *field*). Mining means reading pseudorandom words of the field
//! as fast as possible; validating needs only the field's merkle root.
//!
//! ## Pieces
//!
//! - **SnowFall** ([`generate`]): builds the field file from a seed string in
//!   two phases, a straight fill then `PASSES` rounds of page mixing.
//! - **Merkle commit** ([`commit`]): binary merkle tree over the field's
//!   16-byte words. Nodes at spans of `1024^k` words are saved to *deck*
//!   files so later proofs never recompute large subtrees.
//! - **Proofs** ([`ProofService`], [`verify_proof`]): a proof is the leaf
//!   word plus one sibling hash per level; verification is O(log n).
//! - **Header PoW** ([`pow`]): `POW_LOOK_PASSES` chained field reads turn a
//!   header and nonce into the header's snow hash.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use snowfield_core::{commit, generate, verify_proof, DeckSet, ProofService};
//!
//! let field = Path::new("spoon.0.snow");
//! generate(field, "spoon.0", 1024 * 1024)?;
//! let committed = commit(field)?;
//!
//! let decks = DeckSet::open(Path::new("."), "spoon.0", committed.word_count, 1024)?;
//! let service = ProofService::new(std::fs::File::open(field)?, decks.into())?;
//! let proof = service.get_proof(5)?;
//! assert!(verify_proof(&proof, &committed.root, 1024 * 1024));
//! # Ok::<(), snowfield_core::SnowError>(())
//! ```

mod error;
pub mod io;
pub mod merkle;
pub mod network;
mod params;
pub mod pow;
mod primitives;
mod proof;
pub mod snowfall;

pub use error::{Result, SnowError};
pub use io::ReadAt;
pub use merkle::{MerkleCommit, commit, commit_with, deck_count, field_word_count};
pub use network::{FieldInfo, NetworkParams};
pub use params::*;
pub use pow::{
    BlockHeader, PowError, Target, check_header_pow, check_proof, hash_header_bits,
    less_than_target, next_context, next_word_index,
};
pub use primitives::{ChainHash, SnowStream, Word, chain_hash, merkle_hash};
pub use proof::{DeckSet, ProofService, SnowPowProof, verify_proof};
pub use snowfall::{SnowFallParams, generate, generate_with};

#[cfg(test)]
mod tests;
