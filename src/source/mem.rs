//! RAM-resident field source
//!
//! Chunks are copied in once at startup from the disk layers, in parallel,
//! and never written again, so reads take no locks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::info;
use rayon::prelude::*;
use snowfield_core::WORD_LEN_U64;

use super::{FieldLayout, FieldSource, ReadCounter, check_read};
use crate::error::SourceError;

pub struct MemSource {
    name: String,
    layout: FieldLayout,
    holding: BTreeSet<u64>,
    chunks: BTreeMap<u64, Vec<u8>>,
    counter: ReadCounter,
}

impl MemSource {
    /// Load `chunks` from the first of `sources` holding each one
    pub fn load(
        layout: &FieldLayout,
        chunks: BTreeSet<u64>,
        sources: &[Arc<dyn FieldSource>],
    ) -> Result<Self, SourceError> {
        let loaded = chunks
            .par_iter()
            .map(|&chunk| {
                let source = sources
                    .iter()
                    .find(|s| s.has_chunk(chunk))
                    .ok_or(SourceError::MissingChunk { chunk })?;
                let (start, len) = layout.chunk_words(chunk);
                info!("Reading chunk {} into memory from {}", chunk, source.name());

                let mut data = vec![0u8; (len * WORD_LEN_U64) as usize];
                source.bulk_read(start, &mut data)?;
                Ok((chunk, data))
            })
            .collect::<Result<BTreeMap<_, _>, SourceError>>()?;

        Ok(Self {
            name: format!("mem{{{}}}", chunks.len()),
            layout: layout.clone(),
            holding: chunks,
            chunks: loaded,
            counter: ReadCounter::default(),
        })
    }
}

impl FieldSource for MemSource {
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
        let data = self.chunks.get(&chunk).ok_or(SourceError::MissingChunk { chunk })?;
        let offset = ((word_index - chunk_start) * WORD_LEN_U64) as usize;
        out.copy_from_slice(&data[offset..offset + out.len()]);
        Ok(())
    }

    fn skip_queue_on_rehit(&self) -> bool {
        true
    }
}
