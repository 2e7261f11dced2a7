//! Pseudorandom field source for benchmarking without a generated field
//!
//! Every word is derived from its index, so repeated reads agree, but the
//! content has nothing to do with any real field.

use std::collections::BTreeSet;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use snowfield_core::WORD_LEN;

use super::{FieldLayout, FieldSource, ReadCounter, check_read};
use crate::error::SourceError;

pub struct FakeSource {
    layout: FieldLayout,
    holding: BTreeSet<u64>,
    seed: u64,
    counter: ReadCounter,
}

impl FakeSource {
    pub fn new(layout: &FieldLayout) -> Self {
        Self {
            layout: layout.clone(),
            holding: layout.chunks_in(None),
            seed: u64::from(layout.number) ^ 0x5eed_f1e1_d000_0000,
            counter: ReadCounter::default(),
        }
    }
}

impl FieldSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
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
        check_read(self, word_index, out.len())?;
        for (i, word) in out.chunks_exact_mut(WORD_LEN).enumerate() {
            let index = word_index + i as u64;
            let mut rng = SmallRng::seed_from_u64(self.seed ^ index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
            rng.fill_bytes(word);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_reads_are_stable() {
        let layout = FieldLayout {
            number: 1,
            base: "spoon.1".into(),
            word_count: 64,
            words_per_chunk: 16,
            deck_entries: 4,
        };
        let fake = FakeSource::new(&layout);
        assert_eq!(fake.holding_set().len(), 4);

        let a = fake.read_word(17).unwrap();
        assert_eq!(a, fake.read_word(17).unwrap());
        assert_ne!(a, fake.read_word(18).unwrap());

        let mut pair = [0u8; 32];
        fake.bulk_read(17, &mut pair).unwrap();
        assert_eq!(&pair[..16], &a);

        assert!(fake.read_word(64).is_err());
    }
}
