//! Blocked bloom filter over k-mer hashes.
//!
//! Membership bits for one key all land in a single 512-bit (cache-line)
//! block; the block is chosen from the key's minimizer hash via
//! [`BlockedBloomFilter::get_block`], and the probe bits inside the block are
//! derived from the key hash by double hashing. Both insertion and query must
//! therefore derive the block from the same minimizer hash, which keeps the
//! filter free of false negatives.

use crate::kmer::mix64;

/// One cache line of filter bits.
type Block = [u64; 8];

const BLOCK_BITS: u64 = 512;

/// A blocked bloom filter sized for a known number of keys.
pub struct BlockedBloomFilter {
    blocks: Vec<Block>,
    nb_hashes: usize,
}

impl BlockedBloomFilter {
    /// Filter sized for `nb_keys` keys at `bits_per_key` bits each, with
    /// `nb_hashes` probe bits per key.
    pub fn new(nb_keys: usize, bits_per_key: usize, nb_hashes: usize) -> Self {
        let bits = (nb_keys.max(1) as u64) * (bits_per_key.max(1) as u64);
        let nb_blocks = (bits.div_ceil(BLOCK_BITS) as usize).max(8);
        Self {
            blocks: vec![[0u64; 8]; nb_blocks],
            nb_hashes: nb_hashes.clamp(1, 16),
        }
    }

    /// Number of blocks.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Block index for a key with the given minimizer hash.
    #[inline]
    pub fn get_block(&self, min_hash: u64) -> usize {
        // multiply-shift range reduction
        ((min_hash as u128 * self.blocks.len() as u128) >> 64) as usize
    }

    #[inline]
    fn probe_bits(&self, hash: u64) -> impl Iterator<Item = u64> {
        let h1 = hash;
        let h2 = mix64(hash) | 1;
        let n = self.nb_hashes as u64;
        (0..n).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % BLOCK_BITS)
    }

    /// Set the probe bits of `hash` inside `block`.
    pub fn insert(&mut self, hash: u64, block: usize) {
        for bit in self.probe_bits(hash) {
            self.blocks[block][(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    /// Whether every probe bit of `hash` is set inside `block`.
    pub fn contains(&self, hash: u64, block: usize) -> bool {
        self.probe_bits(hash)
            .all(|bit| self.blocks[block][(bit / 64) as usize] & (1u64 << (bit % 64)) != 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
