//! Disk-backed field source
//!
//! Looks in `<path>/<base>/` for either one contiguous `<base>.snow` or chunk
//! files `<base>.snow.<4-hex chunk>`, plus the deck files
//! `<base>.deck.<letter>`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use snowfield_core::io::read_exact_at;
use snowfield_core::merkle::{commit_stream, deck_file_name, deck_spans, field_base};
use snowfield_core::{DeckSet, SnowError, WORD_LEN_U64, Word, field_word_count};

use super::{FieldLayout, FieldSource, ReadCounter, check_read};
use crate::error::SourceError;

/// `<base>.snow.<4-hex chunk>`
pub fn chunk_file_name(base: &str, chunk: u64) -> String {
    format!("{}.snow.{:04x}", base, chunk)
}

/// Where [`split_field`] put a field
#[derive(Debug, Clone)]
pub struct SplitField {
    /// `<out>/<base>`
    pub dir: PathBuf,
    pub chunks: u64,
    pub root: Word,
}

/// Copy a contiguous field into chunk files plus decks under `<out>/<base>/`
///
/// A [`FileSource`] opened on `out` with the same chunk size and deck
/// granularity finds every chunk and deck.
pub fn split_field(
    field: &Path,
    out: &Path,
    words_per_chunk: u64,
    deck_entries: u64,
) -> Result<SplitField, SourceError> {
    if words_per_chunk == 0 {
        return Err(SnowError::InvalidParams("words per chunk must be positive".into()).into());
    }
    let base = field_base(field);
    let dir = out.join(&base);
    fs::create_dir_all(&dir)?;

    let length = fs::metadata(field)?.len();
    let word_count = field_word_count(length)?;
    let spans = deck_spans(word_count, deck_entries)?;
    let chunk_bytes = words_per_chunk * WORD_LEN_U64;
    let chunks = word_count.div_ceil(words_per_chunk);

    let mut reader = BufReader::new(File::open(field)?);
    let mut buf = vec![0u8; chunk_bytes.min(length) as usize];
    for chunk in 0..chunks {
        let len = chunk_bytes.min(length - chunk * chunk_bytes) as usize;
        reader.read_exact(&mut buf[..len])?;
        let chunk_path = dir.join(chunk_file_name(&base, chunk));
        fs::write(&chunk_path, &buf[..len])?;
        info!("Wrote {}", chunk_path.display());
    }

    let mut decks = BTreeMap::new();
    for (i, span) in spans.into_iter().enumerate() {
        let name = deck_file_name(&base, i as u32 + 1)?;
        decks.insert(span, BufWriter::new(File::create(dir.join(name))?));
    }
    let root = commit_stream(BufReader::new(File::open(field)?), word_count, deck_entries, &mut decks)?;
    for (_, mut deck) in decks {
        deck.flush()?;
    }

    Ok(SplitField { dir, chunks, root })
}

enum Storage {
    Contiguous(File),
    Chunked(BTreeMap<u64, File>),
}

pub struct FileSource {
    name: String,
    layout: FieldLayout,
    holding: BTreeSet<u64>,
    storage: Storage,
    decks: Option<Arc<DeckSet>>,
    counter: ReadCounter,
}

impl FileSource {
    /// Open whatever part of the field `<path>/<base>/` holds within `range`
    pub fn open(
        path: &Path,
        layout: &FieldLayout,
        range: Option<(u64, u64)>,
    ) -> Result<Self, SourceError> {
        let dir = path.join(&layout.base);
        let name = format!("{}#{}", path.display(), layout.number);
        let wanted = layout.chunks_in(range);

        let contiguous = dir.join(format!("{}.snow", layout.base));
        let (storage, holding) = if contiguous.is_file() {
            let file = File::open(&contiguous)?;
            let actual = file.metadata()?.len();
            if actual != layout.length() {
                return Err(SourceError::ChunkLength {
                    path: contiguous,
                    expected: layout.length(),
                    actual,
                });
            }
            (Storage::Contiguous(file), wanted)
        } else {
            let mut files = BTreeMap::new();
            for chunk in wanted {
                let chunk_path = dir.join(chunk_file_name(&layout.base, chunk));
                if !chunk_path.is_file() {
                    continue;
                }
                let file = File::open(&chunk_path)?;
                let expected = layout.chunk_words(chunk).1 * WORD_LEN_U64;
                let actual = file.metadata()?.len();
                if actual != expected {
                    return Err(SourceError::ChunkLength {
                        path: chunk_path,
                        expected,
                        actual,
                    });
                }
                files.insert(chunk, file);
            }
            let holding = files.keys().copied().collect();
            (Storage::Chunked(files), holding)
        };

        let decks = Self::open_decks(&dir, layout)?;
        info!(
            "{}: holding {} chunks, decks {}",
            name,
            holding.len(),
            if decks.is_some() { "present" } else { "missing" }
        );

        Ok(Self {
            name,
            layout: layout.clone(),
            holding,
            storage,
            decks,
            counter: ReadCounter::default(),
        })
    }

    /// All deck files, or `None` when any is missing; a wrong length is fatal
    fn open_decks(dir: &Path, layout: &FieldLayout) -> Result<Option<Arc<DeckSet>>, SourceError> {
        let spans = deck_spans(layout.word_count, layout.deck_entries)?;
        for k in 1..=spans.len() as u32 {
            if !dir.join(deck_file_name(&layout.base, k)?).is_file() {
                return Ok(None);
            }
        }
        let decks = DeckSet::open(dir, &layout.base, layout.word_count, layout.deck_entries)?;
        Ok(Some(Arc::new(decks)))
    }
}

impl FieldSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    fn holding_set(&self) -> &BTreeSet<u64> {
        &self.holding
    }

    fn counter(&self) -> &ReadCounter {
        &self.counter
    }

    fn bulk_read(&self, word_index: u64, out: &mut [u8]) -> Result<(), SourceError> {
        let (chunk, chunk_start) = check_read(self, word_index, out.len())?;
        match &self.storage {
            Storage::Contiguous(file) => read_exact_at(file, out, word_index * WORD_LEN_U64)?,
            Storage::Chunked(files) => {
                let file = files.get(&chunk).ok_or_else(|| SourceError::NotHeld {
                    layer: self.name.clone(),
                    chunk,
                    word_index,
                })?;
                read_exact_at(file, out, (word_index - chunk_start) * WORD_LEN_U64)?;
            }
        }
        Ok(())
    }

    fn deck_set(&self) -> Option<Arc<DeckSet>> {
        self.decks.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snowfield_core::{PASSES, SnowFallParams, commit_with, generate_with};

    const WORDS: u64 = 256;

    fn layout() -> FieldLayout {
        FieldLayout {
            number: 0,
            base: "net.0".into(),
            word_count: WORDS,
            words_per_chunk: 64,
            deck_entries: 4,
        }
    }

    /// Generate `<dir>/net.0/net.0.snow` with decks beside it
    fn contiguous_field(dir: &Path) -> (PathBuf, Word) {
        let field_dir = dir.join("net.0");
        fs::create_dir_all(&field_dir).unwrap();
        let path = field_dir.join("net.0.snow");
        let params = SnowFallParams {
            passes: PASSES,
            page_size: 64,
            multiplicity: 2,
            monster_page_size: 32,
            monster_count: 4,
            write_block: 64,
        };
        generate_with(&path, "net.0", WORDS * 16, &params).unwrap();
        let committed = commit_with(&path, 4).unwrap();
        (path, committed.root)
    }

    #[test]
    fn test_contiguous_field_holds_range() {
        let dir = tempfile::tempdir().unwrap();
        contiguous_field(dir.path());

        let whole = FileSource::open(dir.path(), &layout(), None).unwrap();
        assert_eq!(whole.holding_set().len(), 4);
        assert!(whole.deck_set().is_some());

        let part = FileSource::open(dir.path(), &layout(), Some((1, 2))).unwrap();
        assert_eq!(part.holding_set().iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(part.read_word(70).unwrap(), whole.read_word(70).unwrap());
        assert!(matches!(part.read_word(10), Err(SourceError::NotHeld { chunk: 0, .. })));
    }

    #[test]
    fn test_split_field_opens_as_chunked_layer() {
        let dir = tempfile::tempdir().unwrap();
        let (path, root) = contiguous_field(dir.path());
        let out = dir.path().join("layer");

        let split = split_field(&path, &out, 64, 4).unwrap();
        assert_eq!(split.dir, out.join("net.0"));
        assert_eq!(split.chunks, 4);
        assert_eq!(split.root, root);
        assert!(split.dir.join("net.0.snow.0003").is_file());
        assert!(split.dir.join("net.0.deck.a").is_file());

        let whole = FileSource::open(dir.path(), &layout(), None).unwrap();
        let chunked = FileSource::open(&out, &layout(), None).unwrap();
        assert!(matches!(chunked.storage, Storage::Chunked(_)));
        assert_eq!(chunked.holding_set().len(), 4);
        assert!(chunked.deck_set().is_some());
        for index in [0, 63, 64, 200, 255] {
            assert_eq!(chunked.read_word(index).unwrap(), whole.read_word(index).unwrap());
        }
    }

    #[test]
    fn test_chunk_files_found_individually() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = contiguous_field(dir.path());
        let out = dir.path().join("layer");
        let split = split_field(&path, &out, 64, 4).unwrap();

        fs::remove_file(split.dir.join(chunk_file_name("net.0", 1))).unwrap();
        fs::remove_file(split.dir.join("net.0.deck.b")).unwrap();

        let source = FileSource::open(&out, &layout(), None).unwrap();
        assert_eq!(source.holding_set().iter().copied().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert!(source.deck_set().is_none());
    }

    #[test]
    fn test_short_chunk_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = contiguous_field(dir.path());
        let out = dir.path().join("layer");
        let split = split_field(&path, &out, 64, 4).unwrap();

        let chunk_path = split.dir.join(chunk_file_name("net.0", 2));
        fs::write(&chunk_path, vec![0u8; 100]).unwrap();

        match FileSource::open(&out, &layout(), None) {
            Err(SourceError::ChunkLength { expected, actual, .. }) => {
                assert_eq!(expected, 64 * 16);
                assert_eq!(actual, 100);
            }
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("short chunk accepted"),
        }
    }

    #[test]
    fn test_split_rejects_bad_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = contiguous_field(dir.path());
        let out = dir.path().join("layer");
        assert!(split_field(&path, &out, 0, 4).is_err());
        assert!(split_field(&path, &out, 64, 3).is_err());
    }
}
