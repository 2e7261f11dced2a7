//! Merkle commitment over a field, with deck shortcut files
//!
//! The tree is a plain binary tree over the field words. Leaves are the raw
//! 16-byte words, internal nodes are [`merkle_hash`] of their children.
//!
//! While the root is computed, every node whose span equals
//! `deck_entries^k` is appended to deck `k`. Because the recursion visits
//! nodes left to right, each deck ends up holding its level in tree order:
//! entry `i` of deck `k` covers words `[i * span, (i + 1) * span)`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{Result, SnowError};
use crate::params::{DECK_ENTRIES, WORD_LEN, WORD_LEN_U64};
use crate::primitives::{Word, merkle_hash};

/// File extension of a contiguous field
pub const FIELD_EXTENSION: &str = "snow";

/// Result of committing a field
#[derive(Debug, Clone)]
pub struct MerkleCommit {
    pub root: Word,
    pub word_count: u64,
    /// Deck files in order of increasing span
    pub decks: Vec<PathBuf>,
}

/// Word count of a field of `length` bytes
///
/// Fails unless the length is whole words and the word count is a power of two.
pub fn field_word_count(length: u64) -> Result<u64> {
    if length % WORD_LEN_U64 != 0 {
        return Err(SnowError::Misaligned(length));
    }
    let word_count = length / WORD_LEN_U64;
    if !word_count.is_power_of_two() {
        return Err(SnowError::NotPowerOfTwo(word_count));
    }
    Ok(word_count)
}

/// Number of decks for a field of `word_count` words
pub fn deck_count(word_count: u64, deck_entries: u64) -> u32 {
    if deck_entries < 2 {
        return 0;
    }
    let mut w = word_count;
    let mut count = 0;
    while w > deck_entries {
        w /= deck_entries;
        count += 1;
    }
    count
}

/// Decks are named `a` to `z`
pub const MAX_DECKS: u32 = 26;

/// Check that `deck_entries` gives usable decks for a field of `word_count` words
///
/// Deck spans must be tree spans, so `deck_entries` is a power of two of at
/// least 2, and the field may not need more decks than there are letters.
pub fn check_deck_entries(word_count: u64, deck_entries: u64) -> Result<()> {
    if deck_entries < 2 || !deck_entries.is_power_of_two() {
        return Err(SnowError::InvalidParams(format!(
            "deck entries {} must be a power of two of at least 2",
            deck_entries
        )));
    }
    let count = deck_count(word_count, deck_entries);
    if count > MAX_DECKS {
        return Err(SnowError::InvalidParams(format!(
            "{} words need {} decks of {} entries, at most {} are named",
            word_count, count, deck_entries, MAX_DECKS
        )));
    }
    Ok(())
}

/// Spans of all decks for a field, smallest first
pub fn deck_spans(word_count: u64, deck_entries: u64) -> Result<Vec<u64>> {
    check_deck_entries(word_count, deck_entries)?;
    Ok((1..=deck_count(word_count, deck_entries))
        .map(|k| deck_entries.pow(k))
        .collect())
}

/// Letter naming deck `k` (1 → 'a'), `None` past [`MAX_DECKS`]
pub fn deck_letter(k: u32) -> Option<char> {
    (1..=MAX_DECKS)
        .contains(&k)
        .then(|| (b'a' + (k - 1) as u8) as char)
}

/// `<base>.deck.<letter>`
pub fn deck_file_name(base: &str, k: u32) -> Result<String> {
    let letter = deck_letter(k)
        .ok_or_else(|| SnowError::InvalidParams(format!("no deck letter for deck {}", k)))?;
    Ok(format!("{}.deck.{}", base, letter))
}

/// Base name of a field file: the file name without a trailing `.snow`
pub fn field_base(field: &Path) -> String {
    match field.extension().and_then(|e| e.to_str()) {
        Some(FIELD_EXTENSION) => field
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        _ => field
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// Path of deck `k` next to a field file
pub fn deck_path(field: &Path, k: u32) -> Result<PathBuf> {
    let dir = field.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(deck_file_name(&field_base(field), k)?))
}

/// Commit a field file with the consensus deck granularity
pub fn commit(field: &Path) -> Result<MerkleCommit> {
    commit_with(field, DECK_ENTRIES)
}

/// Commit a field file, writing decks next to it
pub fn commit_with(field: &Path, deck_entries: u64) -> Result<MerkleCommit> {
    let file = File::open(field).map_err(|e| SnowError::file(field, e))?;
    let length = file
        .metadata()
        .map_err(|e| SnowError::file(field, e))?
        .len();
    let word_count = field_word_count(length)?;

    info!(
        "Committing {} ({} words, {} decks)",
        field.display(),
        word_count,
        deck_count(word_count, deck_entries)
    );

    let mut paths = BTreeMap::new();
    let mut writers = BTreeMap::new();
    for (i, span) in deck_spans(word_count, deck_entries)?.into_iter().enumerate() {
        let path = deck_path(field, i as u32 + 1)?;
        let out = File::create(&path).map_err(|e| SnowError::file(&path, e))?;
        writers.insert(span, BufWriter::new(out));
        paths.insert(span, path);
    }

    let reader = BufReader::with_capacity(1 << 20, file);
    let root = commit_stream(reader, word_count, deck_entries, &mut writers)?;

    for (span, writer) in writers {
        let path = &paths[&span];
        writer
            .into_inner()
            .map_err(|e| SnowError::file(path, e.into_error()))?
            .sync_all()
            .map_err(|e| SnowError::file(path, e))?;
    }

    info!("Merkle root of {}: {}", field.display(), hex::encode(root));

    Ok(MerkleCommit {
        root,
        word_count,
        decks: paths.into_values().collect(),
    })
}

/// Commit a field read sequentially from `reader`
///
/// `decks` maps a span to the sink for that deck level; spans not present are
/// simply not recorded. Works on any reader, files or memory.
pub fn commit_stream<R: Read, W: Write>(
    reader: R,
    word_count: u64,
    deck_entries: u64,
    decks: &mut BTreeMap<u64, W>,
) -> Result<Word> {
    if !word_count.is_power_of_two() {
        return Err(SnowError::NotPowerOfTwo(word_count));
    }
    let mut committer = Committer {
        reader,
        decks,
        progress_span: deck_entries.saturating_mul(deck_entries),
        word_count,
    };
    committer.tree_hash(0, word_count)
}

struct Committer<'a, R, W> {
    reader: R,
    decks: &'a mut BTreeMap<u64, W>,
    progress_span: u64,
    word_count: u64,
}

impl<R: Read, W: Write> Committer<'_, R, W> {
    fn tree_hash(&mut self, start: u64, end: u64) -> Result<Word> {
        let span = end - start;
        let hash = if span == 1 {
            let mut word = [0u8; WORD_LEN];
            self.reader.read_exact(&mut word)?;
            word
        } else {
            let mid = start + span / 2;
            let left = self.tree_hash(start, mid)?;
            let right = self.tree_hash(mid, end)?;
            merkle_hash(&left, &right)
        };

        if let Some(deck) = self.decks.get_mut(&span) {
            deck.write_all(&hash)?;
        }
        if span == self.progress_span {
            info!("Merkle progress: {} of {} words", end, self.word_count);
        }
        Ok(hash)
    }
}
