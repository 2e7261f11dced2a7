//! Field source backed by a peer's word server

use std::collections::BTreeSet;

use snowfield_core::{WORD_LEN, Word};

use super::{BatchSource, FieldLayout, FieldSource, ReadCounter};
use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::SourceError;
use crate::rpc::{GetWordsRequest, HttpTransport, WordTransport};

pub struct RemoteSource {
    name: String,
    layout: FieldLayout,
    holding: BTreeSet<u64>,
    transport: Box<dyn WordTransport>,
    batch_size: usize,
    counter: ReadCounter,
}

impl RemoteSource {
    /// Remote layer over HTTP, claiming the inclusive chunk `range`
    pub fn connect(
        host: &str,
        layout: &FieldLayout,
        range: (u64, u64),
        batch_size: usize,
    ) -> Result<Self, SourceError> {
        let transport = HttpTransport::new(host)?;
        Ok(Self::with_transport(Box::new(transport), layout, range, batch_size))
    }

    pub fn with_transport(
        transport: Box<dyn WordTransport>,
        layout: &FieldLayout,
        range: (u64, u64),
        batch_size: usize,
    ) -> Self {
        Self {
            name: format!("remote({})", transport.endpoint()),
            layout: layout.clone(),
            holding: layout.chunks_in(Some(range)),
            transport,
            batch_size: if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size },
            counter: ReadCounter::default(),
        }
    }
}

impl FieldSource for RemoteSource {
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
        if out.len() != WORD_LEN {
            return Err(SourceError::BadRead {
                word_index,
                len: out.len(),
            });
        }
        let words = self.read_words_bulk(&[word_index])?;
        out.copy_from_slice(&words[0]);
        Ok(())
    }

    /// Counted by `read_words_bulk`
    fn read_word(&self, word_index: u64) -> Result<Word, SourceError> {
        let words = self.read_words_bulk(&[word_index])?;
        Ok(words[0])
    }

    fn as_batch(&self) -> Option<&dyn BatchSource> {
        Some(self)
    }

    fn rate_string(&self, elapsed_sec: f64) -> String {
        let secs = elapsed_sec.max(1e-9);
        let read_rate = self.counter.take_reads() as f64 / secs;
        let call_rate = self.counter.take_calls() as f64 / secs;
        let network_mb = read_rate * WORD_LEN as f64 / 1_048_576.0;
        format!(
            "read_ops/s: {:.1} rpc_ops/s: {:.1} network_bw: {:.1} MB/s",
            read_rate, call_rate, network_mb
        )
    }
}

impl BatchSource for RemoteSource {
    fn suggested_batch_size(&self) -> usize {
        self.batch_size
    }

    fn read_words_bulk(&self, indexes: &[u64]) -> Result<Vec<Word>, SourceError> {
        self.counter.add_reads(indexes.len() as u64);
        self.counter.add_call();

        for &index in indexes {
            let chunk = self.layout.chunk_of(index);
            if !self.has_chunk(chunk) {
                return Err(SourceError::NotHeld {
                    layer: self.name.clone(),
                    chunk,
                    word_index: index,
                });
            }
        }

        let response = self.transport.get_words(&GetWordsRequest {
            field: self.layout.number,
            word_indexes: indexes.to_vec(),
        })?;
        if response.wrong_field {
            return Err(SourceError::WrongField(self.layout.number));
        }
        response.decode(indexes.len())
    }
}
