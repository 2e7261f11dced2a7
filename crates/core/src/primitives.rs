//! Hash and stream primitives for SnowField
//!
//! - `merkle_hash`: 128-bit node digest used inside field merkle trees
//! - `chain_hash`: 256-bit SHA-256 used for headers and pass contexts
//! - `SnowStream`: the deterministic byte stream that drives field generation

use aes::Aes128;
use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};
use sha2::{Digest, Sha256};

use crate::params::{CHAIN_HASH_LEN, WORD_LEN};

/// One 16-byte field word, also the size of a merkle node
pub type Word = [u8; WORD_LEN];

/// A 32-byte chain hash
pub type ChainHash = [u8; CHAIN_HASH_LEN];

/// Context string for merkle node hashing
const MERKLE_CONTEXT: &str = "snowfield 2018-01-01 merkle node v1";

/// Context string for deriving the initial stream key from a seed
const SEED_CONTEXT: &str = "snowfield 2018-01-01 stream seed v1";

/// Context string for folding mixed bytes back into the stream key
const MIX_CONTEXT: &str = "snowfield 2018-01-01 stream mix v1";

/// Hash two child nodes into their parent
///
/// BLAKE3 (derive-key mode) over `left || right`, truncated to 128 bits.
#[inline]
pub fn merkle_hash(left: &Word, right: &Word) -> Word {
    let mut hasher = blake3::Hasher::new_derive_key(MERKLE_CONTEXT);
    hasher.update(left);
    hasher.update(right);
    let digest = hasher.finalize();

    let mut out = [0u8; WORD_LEN];
    out.copy_from_slice(&digest.as_bytes()[..WORD_LEN]);
    out
}

/// SHA-256 over the concatenation of `parts`
#[inline]
pub fn chain_hash(parts: &[&[u8]]) -> ChainHash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Deterministic pseudorandom stream with a mixable state
///
/// Output is AES-128 in counter mode. Seeding and every `mix_bytes` call
/// rekey the cipher from a BLAKE3 digest, so the stream after a mix depends
/// on everything mixed in so far. Not thread safe; each generator owns one.
pub struct SnowStream {
    cipher: Aes128,
    counter: u128,
}

impl SnowStream {
    /// Create a stream from a seed string
    pub fn new(seed: &str) -> Self {
        let key_material = blake3::derive_key(SEED_CONTEXT, seed.as_bytes());
        let (cipher, counter) = Self::key_schedule(&key_material);
        Self { cipher, counter }
    }

    fn key_schedule(material: &[u8; 32]) -> (Aes128, u128) {
        let mut key = [0u8; 16];
        key.copy_from_slice(&material[..16]);
        let mut counter = [0u8; 16];
        counter.copy_from_slice(&material[16..]);

        (
            Aes128::new(&GenericArray::from(key)),
            u128::from_le_bytes(counter),
        )
    }

    #[inline(always)]
    fn next_counter(&mut self) -> [u8; 16] {
        let block = self.counter.to_le_bytes();
        self.counter = self.counter.wrapping_add(1);
        block
    }

    /// Fill `out` with the next bytes of the stream
    ///
    /// Output is produced in 16-byte blocks; a trailing partial block
    /// discards its unused bytes.
    pub fn next_bytes(&mut self, out: &mut [u8]) {
        let mut blocks = out.chunks_exact_mut(16);
        for block in &mut blocks {
            block.copy_from_slice(&self.next_counter());
            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }

        let tail = blocks.into_remainder();
        if !tail.is_empty() {
            let mut block = GenericArray::from(self.next_counter());
            self.cipher.encrypt_block(&mut block);
            let len = tail.len();
            tail.copy_from_slice(&block[..len]);
        }
    }

    /// Fold `data` into the stream state
    pub fn mix_bytes(&mut self, data: &[u8]) {
        let mut existing = [0u8; 32];
        self.next_bytes(&mut existing);

        let mut hasher = blake3::Hasher::new_derive_key(MIX_CONTEXT);
        hasher.update(&existing);
        hasher.update(data);
        let material = *hasher.finalize().as_bytes();

        let (cipher, counter) = Self::key_schedule(&material);
        self.cipher = cipher;
        self.counter = counter;
    }
}
