//! One in-progress mining attempt

use std::sync::Arc;

use rand::RngCore;
use snowfield_core::{
    ChainHash, NONCE_LENGTH, POW_LOOK_PASSES, Word, hash_header_bits, next_context,
    next_word_index,
};

use super::work::WorkUnit;

/// An attempt at all passes for one (work unit, nonce)
///
/// Owned by exactly one worker at a time; it moves between layer queues as
/// its next word moves between chunks.
#[derive(Debug, Clone)]
pub struct PartialWork {
    pub work: Arc<WorkUnit>,
    /// Board generation the attempt was started in
    pub generation: u64,
    pub nonce: [u8; NONCE_LENGTH],
    pub context: ChainHash,
    pub passes_done: usize,
    next_word: u64,
}

impl PartialWork {
    /// Fresh attempt with a random nonce behind the work unit's prefix
    pub fn new(work: Arc<WorkUnit>, generation: u64, rng: &mut impl RngCore, word_count: u64) -> Self {
        let mut nonce = [0u8; NONCE_LENGTH];
        rng.fill_bytes(&mut nonce);
        let prefix = work.nonce_prefix();
        nonce[..prefix.len()].copy_from_slice(prefix);

        let context = hash_header_bits(&work.header, &nonce);
        let next_word = next_word_index(&context, word_count);
        Self {
            work,
            generation,
            nonce,
            context,
            passes_done: 0,
            next_word,
        }
    }

    /// Word the next pass reads; meaningless once done
    pub fn next_word_index(&self) -> u64 {
        self.next_word
    }

    pub fn is_done(&self) -> bool {
        self.passes_done >= POW_LOOK_PASSES
    }

    /// Fold in the word read for the current pass
    pub fn do_pass(&mut self, word: &Word, word_count: u64) {
        self.context = next_context(&self.context, word);
        self.passes_done += 1;
        if !self.is_done() {
            self.next_word = next_word_index(&self.context, word_count);
        }
    }
}
