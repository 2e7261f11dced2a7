//! A source that dispatches to the first child holding the chunk

use std::collections::BTreeSet;
use std::sync::Arc;

use snowfield_core::{DeckSet, WORD_LEN};

use super::{FieldLayout, FieldSource, ReadCounter};
use crate::error::SourceError;

pub struct CompositeSource {
    layout: FieldLayout,
    sources: Vec<Arc<dyn FieldSource>>,
    holding: BTreeSet<u64>,
    counter: ReadCounter,
}

impl CompositeSource {
    pub fn new(layout: &FieldLayout, sources: Vec<Arc<dyn FieldSource>>) -> Self {
        let holding = sources
            .iter()
            .flat_map(|s| s.holding_set().iter().copied())
            .collect();
        Self {
            layout: layout.clone(),
            sources,
            holding,
            counter: ReadCounter::default(),
        }
    }

    pub fn sources(&self) -> &[Arc<dyn FieldSource>] {
        &self.sources
    }
}

impl FieldSource for CompositeSource {
    fn name(&self) -> &str {
        "composite"
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
        let chunk = self.layout.chunk_of(word_index);
        let source = self
            .sources
            .iter()
            .find(|s| s.has_chunk(chunk))
            .ok_or(SourceError::MissingChunk { chunk })?;

        if out.len() == WORD_LEN {
            let word = source.read_word(word_index)?;
            out.copy_from_slice(&word);
            Ok(())
        } else {
            source.bulk_read(word_index, out)
        }
    }

    fn deck_set(&self) -> Option<Arc<DeckSet>> {
        self.sources.iter().find_map(|s| s.deck_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FakeSource, MemSource};

    fn layout(number: u32) -> FieldLayout {
        FieldLayout {
            number,
            base: format!("spoon.{}", number),
            word_count: 128,
            words_per_chunk: 32,
            deck_entries: 4,
        }
    }

    /// Memory source holding `chunks` of a fake field seeded by `number`
    fn part(number: u32, chunks: &[u64]) -> Arc<dyn FieldSource> {
        let fake: Arc<dyn FieldSource> = Arc::new(FakeSource::new(&layout(number)));
        let mem = MemSource::load(&layout(number), chunks.iter().copied().collect(), &[fake]).unwrap();
        Arc::new(mem)
    }

    #[test]
    fn test_first_holder_answers() {
        let a = part(1, &[0, 1]);
        let b = part(2, &[1, 2]);
        let composite = CompositeSource::new(&layout(1), vec![a.clone(), b.clone()]);

        assert_eq!(
            composite.holding_set().iter().copied().collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(composite.read_word(5).unwrap(), a.read_word(5).unwrap());
        // chunk 1 is held by both; the first child wins
        assert_eq!(composite.read_word(40).unwrap(), a.read_word(40).unwrap());
        assert_ne!(composite.read_word(40).unwrap(), b.read_word(40).unwrap());
        assert_eq!(composite.read_word(70).unwrap(), b.read_word(70).unwrap());

        let mut pair = [0u8; 32];
        composite.bulk_read(70, &mut pair).unwrap();
        assert_eq!(&pair[..16], &b.read_word(70).unwrap());

        assert!(matches!(
            composite.read_word(100),
            Err(SourceError::MissingChunk { chunk: 3 })
        ));
        assert!(composite.deck_set().is_none());
    }
}
