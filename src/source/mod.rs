//! Field sources: where pass engine reads come from
//!
//! A field is split into chunks of `words_per_chunk` words. Each source holds
//! some set of chunks (its holding set) and answers reads for words inside
//! them. The engine routes every read to a layer that holds the chunk, so
//! asking a source for a chunk it lacks is a routing bug and fails the read.

mod composite;
mod fake;
mod file;
mod mem;
mod remote;

pub use composite::CompositeSource;
pub use fake::FakeSource;
pub use file::{FileSource, SplitField, chunk_file_name, split_field};
pub use mem::MemSource;
pub use remote::RemoteSource;

use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use snowfield_core::{DeckSet, ReadAt, WORD_LEN, WORD_LEN_U64, Word};

use crate::error::SourceError;

/// Shape of the selected field as the sources see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub number: u32,
    /// Seed and base file name, `<network>.<number>`
    pub base: String,
    pub word_count: u64,
    pub words_per_chunk: u64,
    pub deck_entries: u64,
}

impl FieldLayout {
    pub fn chunk_of(&self, word_index: u64) -> u64 {
        word_index / self.words_per_chunk
    }

    pub fn chunk_count(&self) -> u64 {
        self.word_count.div_ceil(self.words_per_chunk)
    }

    /// First word and word count of a chunk; the last chunk may be short
    pub fn chunk_words(&self, chunk: u64) -> (u64, u64) {
        let start = chunk * self.words_per_chunk;
        let len = self
            .words_per_chunk
            .min(self.word_count.saturating_sub(start));
        (start, len)
    }

    pub fn length(&self) -> u64 {
        self.word_count * WORD_LEN_U64
    }

    /// Chunks in an inclusive range, clipped to the field
    pub fn chunks_in(&self, range: Option<(u64, u64)>) -> BTreeSet<u64> {
        let last = self.chunk_count().saturating_sub(1);
        match range {
            Some((start, end)) => (start..=end.min(last)).collect(),
            None => (0..self.chunk_count()).collect(),
        }
    }
}

/// Read counters for rate reporting
#[derive(Debug, Default)]
pub struct ReadCounter {
    reads: AtomicU64,
    calls: AtomicU64,
}

impl ReadCounter {
    pub fn add_reads(&self, n: u64) {
        self.reads.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads since the last take
    pub fn take_reads(&self) -> u64 {
        self.reads.swap(0, Ordering::Relaxed)
    }

    pub fn take_calls(&self) -> u64 {
        self.calls.swap(0, Ordering::Relaxed)
    }
}

/// A storage backend answering word reads for a subset of chunks
pub trait FieldSource: Send + Sync {
    fn name(&self) -> &str;

    fn layout(&self) -> &FieldLayout;

    fn holding_set(&self) -> &BTreeSet<u64>;

    fn counter(&self) -> &ReadCounter;

    /// Fill `out` with the words starting at `word_index`
    ///
    /// `out` must be whole words and stay inside one held chunk.
    fn bulk_read(&self, word_index: u64, out: &mut [u8]) -> Result<(), SourceError>;

    fn has_chunk(&self, chunk: u64) -> bool {
        self.holding_set().contains(&chunk)
    }

    /// Read one word, counting it
    fn read_word(&self, word_index: u64) -> Result<Word, SourceError> {
        self.counter().add_reads(1);
        let mut word = [0u8; WORD_LEN];
        self.bulk_read(word_index, &mut word)?;
        Ok(word)
    }

    /// Keep advancing an attempt inline while its next chunk is held here
    fn skip_queue_on_rehit(&self) -> bool {
        false
    }

    fn deck_set(&self) -> Option<Arc<DeckSet>> {
        None
    }

    fn as_batch(&self) -> Option<&dyn BatchSource> {
        None
    }

    fn rate_string(&self, elapsed_sec: f64) -> String {
        let reads = self.counter().take_reads() as f64;
        format!("read_ops/s: {:.1}", reads / elapsed_sec.max(1e-9))
    }
}

/// A source that answers many scattered words in one call
pub trait BatchSource: FieldSource {
    fn suggested_batch_size(&self) -> usize;

    fn read_words_bulk(&self, indexes: &[u64]) -> Result<Vec<Word>, SourceError>;
}

/// Check that a read lies inside one held chunk, returning the chunk and its
/// first word
pub(crate) fn check_read(
    source: &dyn FieldSource,
    word_index: u64,
    len: usize,
) -> Result<(u64, u64), SourceError> {
    let layout = source.layout();
    let words = (len / WORD_LEN) as u64;
    if len % WORD_LEN != 0 || word_index >= layout.word_count {
        return Err(SourceError::BadRead { word_index, len });
    }
    let chunk = layout.chunk_of(word_index);
    if !source.has_chunk(chunk) {
        return Err(SourceError::NotHeld {
            layer: source.name().to_string(),
            chunk,
            word_index,
        });
    }
    let (start, chunk_len) = layout.chunk_words(chunk);
    if word_index + words > start + chunk_len {
        return Err(SourceError::BadRead { word_index, len });
    }
    Ok((chunk, start))
}

/// Positional reads over a field source, for proof construction
pub struct SourceReader {
    source: Arc<dyn FieldSource>,
}

impl SourceReader {
    pub fn new(source: Arc<dyn FieldSource>) -> Self {
        Self { source }
    }
}

impl ReadAt for SourceReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if offset % WORD_LEN_U64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "field reads must be word aligned",
            ));
        }
        self.source
            .bulk_read(offset / WORD_LEN_U64, buf)
            .map_err(io::Error::other)
    }

    fn length(&self) -> io::Result<u64> {
        Ok(self.source.layout().length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> FieldLayout {
        FieldLayout {
            number: 0,
            base: "spoon.0".into(),
            word_count: 100,
            words_per_chunk: 32,
            deck_entries: 4,
        }
    }

    #[test]
    fn test_chunk_math() {
        let l = layout();
        assert_eq!(l.chunk_count(), 4);
        assert_eq!(l.chunk_of(31), 0);
        assert_eq!(l.chunk_of(32), 1);
        assert_eq!(l.chunk_words(3), (96, 4));
        assert_eq!(l.chunks_in(Some((2, 9))), [2, 3].into_iter().collect());
        assert_eq!(l.chunks_in(None).len(), 4);
    }

    #[test]
    fn test_read_counter_resets() {
        let c = ReadCounter::default();
        c.add_reads(5);
        c.add_reads(2);
        assert_eq!(c.take_reads(), 7);
        assert_eq!(c.take_reads(), 0);
    }
}
