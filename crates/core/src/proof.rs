//! Merkle proofs over a committed field
//!
//! A [`SnowPowProof`] carries the leaf word followed by one sibling hash per
//! tree level, bottom-up. Building one walks the path from the root to the
//! target word; sibling subtrees are taken from a deck when one exists for
//! their span, otherwise recomputed from raw words.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SnowError};
use crate::io::ReadAt;
use crate::merkle::{deck_file_name, deck_spans, field_word_count};
use crate::params::{WORD_LEN, WORD_LEN_U64};
use crate::primitives::{Word, merkle_hash};

/// Proof that a word sits at a given index of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnowPowProof {
    pub word_index: u64,
    /// Leaf word first, then sibling hashes from the bottom of the tree up
    #[serde(with = "hex_words")]
    pub merkle_component: Vec<Word>,
}

impl SnowPowProof {
    /// The proven word
    pub fn word(&self) -> Option<&Word> {
        self.merkle_component.first()
    }

    /// Sibling hashes, bottom-up
    pub fn siblings(&self) -> &[Word] {
        self.merkle_component.get(1..).unwrap_or(&[])
    }
}

/// Check a proof against a field root
///
/// Never fails loudly: malformed lengths, out of range indexes and the wrong
/// number of siblings all come back as `false`.
pub fn verify_proof(proof: &SnowPowProof, expected_root: &Word, field_length: u64) -> bool {
    let word_count = match field_word_count(field_length) {
        Ok(n) => n,
        Err(_) => return false,
    };
    if proof.word_index >= word_count {
        return false;
    }

    let levels = word_count.trailing_zeros() as usize;
    let Some((leaf, siblings)) = proof.merkle_component.split_first() else {
        return false;
    };
    if siblings.len() != levels {
        return false;
    }

    let mut hash = *leaf;
    let mut start = proof.word_index;
    let mut span = 1u64;
    for sibling in siblings {
        let parent_start = start - start % (span * 2);
        let mid = parent_start + span;
        hash = if proof.word_index < mid {
            merkle_hash(&hash, sibling)
        } else {
            merkle_hash(sibling, &hash)
        };
        start = parent_start;
        span *= 2;
    }

    span == word_count && hash == *expected_root
}

/// Deck files of one field, keyed by span
///
/// Every deck's length is checked against the field size when added.
pub struct DeckSet {
    word_count: u64,
    decks: BTreeMap<u64, Box<dyn ReadAt>>,
}

impl std::fmt::Debug for DeckSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeckSet")
            .field("word_count", &self.word_count)
            .field("spans", &self.decks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DeckSet {
    /// No decks; proofs recompute every subtree
    pub fn empty(word_count: u64) -> Self {
        Self {
            word_count,
            decks: BTreeMap::new(),
        }
    }

    /// Open `<dir>/<base>.deck.<letter>` for every deck the field has
    pub fn open(dir: &Path, base: &str, word_count: u64, deck_entries: u64) -> Result<Self> {
        let mut set = Self::empty(word_count);
        for (i, span) in deck_spans(word_count, deck_entries)?.into_iter().enumerate() {
            let name = deck_file_name(base, i as u32 + 1)?;
            let path = dir.join(&name);
            let file = File::open(&path).map_err(|e| SnowError::file(&path, e))?;
            set.insert(name, span, Box::new(file))?;
        }
        Ok(set)
    }

    /// Add a deck covering `span` words per entry
    pub fn insert(&mut self, name: String, span: u64, deck: Box<dyn ReadAt>) -> Result<()> {
        let expected = self.word_count / span.max(1) * WORD_LEN_U64;
        let actual = deck.length()?;
        if actual != expected {
            return Err(SnowError::DeckLength {
                name,
                expected,
                actual,
            });
        }
        self.decks.insert(span, deck);
        Ok(())
    }

    pub fn word_count(&self) -> u64 {
        self.word_count
    }

    pub fn spans(&self) -> impl Iterator<Item = u64> + '_ {
        self.decks.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.decks.is_empty()
    }

    /// Hash of the subtree `[start, start + span)` if a deck covers it
    pub fn lookup(&self, start: u64, span: u64) -> Result<Option<Word>> {
        let Some(deck) = self.decks.get(&span) else {
            return Ok(None);
        };
        let mut hash = [0u8; WORD_LEN];
        deck.read_at(start / span * WORD_LEN_U64, &mut hash)?;
        Ok(Some(hash))
    }
}

/// Builds proofs for one field
pub struct ProofService<F> {
    field: F,
    decks: Arc<DeckSet>,
    word_count: u64,
}

impl<F: ReadAt> ProofService<F> {
    /// `field` must hold the whole field (`word_count * 16` bytes)
    pub fn new(field: F, decks: Arc<DeckSet>) -> Result<Self> {
        let word_count = field_word_count(field.length()?)?;
        if decks.word_count() != word_count {
            return Err(SnowError::DeckLength {
                name: "deck set".to_string(),
                expected: word_count,
                actual: decks.word_count(),
            });
        }
        Ok(Self {
            field,
            decks,
            word_count,
        })
    }

    pub fn word_count(&self) -> u64 {
        self.word_count
    }

    pub fn decks(&self) -> &Arc<DeckSet> {
        &self.decks
    }

    /// Read one raw word
    pub fn read_word(&self, index: u64) -> Result<Word> {
        if index >= self.word_count {
            return Err(SnowError::OutOfRange {
                index,
                word_count: self.word_count,
            });
        }
        let mut word = [0u8; WORD_LEN];
        self.field.read_at(index * WORD_LEN_U64, &mut word)?;
        Ok(word)
    }

    /// Root hash, computed through the decks where possible
    pub fn root(&self) -> Result<Word> {
        self.subtree_hash(0, self.word_count)
    }

    /// Build the proof for `word_index`
    pub fn get_proof(&self, word_index: u64) -> Result<SnowPowProof> {
        if word_index >= self.word_count {
            return Err(SnowError::OutOfRange {
                index: word_index,
                word_count: self.word_count,
            });
        }
        let merkle_component = self.path(word_index, 0, self.word_count)?;
        Ok(SnowPowProof {
            word_index,
            merkle_component,
        })
    }

    /// Leaf plus siblings for `target` within `[start, end)`
    fn path(&self, target: u64, start: u64, end: u64) -> Result<Vec<Word>> {
        if end - start == 1 {
            return Ok(vec![self.read_word(start)?]);
        }
        let mid = start + (end - start) / 2;
        let (mut path, sibling) = if target < mid {
            (self.path(target, start, mid)?, self.subtree_hash(mid, end)?)
        } else {
            (self.path(target, mid, end)?, self.subtree_hash(start, mid)?)
        };
        path.push(sibling);
        Ok(path)
    }

    /// Hash of `[start, end)`: deck if available, raw word at a leaf, else both halves
    fn subtree_hash(&self, start: u64, end: u64) -> Result<Word> {
        let span = end - start;
        if let Some(hash) = self.decks.lookup(start, span)? {
            return Ok(hash);
        }
        if span == 1 {
            return self.read_word(start);
        }
        let mid = start + span / 2;
        let left = self.subtree_hash(start, mid)?;
        let right = self.subtree_hash(mid, end)?;
        Ok(merkle_hash(&left, &right))
    }
}

/// Hex encoding for a list of words
mod hex_words {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::primitives::Word;

    pub fn serialize<S: Serializer>(words: &[Word], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(words.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Word>, D::Error> {
        let strings = Vec::<String>::deserialize(d)?;
        strings
            .iter()
            .map(|s| {
                let mut word = [0u8; 16];
                hex::decode_to_slice(s, &mut word).map_err(D::Error::custom)?;
                Ok(word)
            })
            .collect()
    }
}
