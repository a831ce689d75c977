//! Minimizers and per-window minimum-hash scanning.
//!
//! A minimizer is the canonical g-mer of lowest hash among the `k - g + 1`
//! g-mer positions of a k-mer window. Hashes are computed on the canonical
//! form, so a window and its reverse complement always agree on the winning
//! hash; ties (several positions with the same lowest hash) are all exposed,
//! in position order. `alternate_min` yields the next distinct-hash minimum of
//! a window, used when a minimizer bin is overcrowded and references must
//! migrate to a fallback bin.

use crate::kmer::{encode_base, mix64, Kmer, MAX_K};

/// Seed folded into the minimizer ordering hash so that it is independent of
/// the hashes used elsewhere (bloom filter, color slots).
const ORDER_SEED: u64 = 0x2545f4914f6cdd1d;

// ---------------------------------------------------------------------------
// Minimizer
// ---------------------------------------------------------------------------

/// A DNA word of length `g` packed two bits per base, same layout as [`Kmer`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Minimizer(u64);

impl Minimizer {
    /// Sentinel marking an unoccupied table slot.
    pub const EMPTY: Minimizer = Minimizer(u64::MAX);
    /// Sentinel marking a tombstoned table slot.
    pub const DELETED: Minimizer = Minimizer(u64::MAX - 1);

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Minimizer(bits)
    }

    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self == Self::EMPTY
    }

    #[inline]
    pub fn is_deleted(self) -> bool {
        self == Self::DELETED
    }

    /// Parse a g-mer from ASCII; `None` on any non-A/C/G/T byte.
    pub fn from_ascii(seq: &[u8]) -> Option<Self> {
        Kmer::from_ascii(seq).map(|km| Minimizer(km.bits()))
    }

    /// Canonical form (lexicographic min of the g-mer and its twin).
    #[inline]
    pub fn rep(self, g: usize) -> Self {
        Minimizer(Kmer::from_bits(self.0).rep(g).bits())
    }

    /// The strand-symmetric ordering hash used to select minimizers.
    #[inline]
    pub fn order_hash(self, g: usize) -> u64 {
        mix64(self.rep(g).bits() ^ ORDER_SEED)
    }

    pub fn to_string(self, g: usize) -> String {
        Kmer::from_bits(self.0).to_string(g)
    }
}

impl std::fmt::Debug for Minimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Minimizer(0x{:x})", self.0)
    }
}

// ---------------------------------------------------------------------------
// MinHashIterator
// ---------------------------------------------------------------------------

/// One minimizer occurrence: its ordering hash and its absolute position in
/// the scanned sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MinHashResult {
    pub hash: u64,
    pub pos: usize,
}

/// Precomputed per-position g-mer hashes over a sequence, answering
/// minimum-hash queries for any k-mer window.
///
/// Positions whose g-mer touches a non-A/C/G/T byte hash to `u64::MAX` and
/// can never win a window that contains at least one valid g-mer; callers
/// only query windows that are themselves valid k-mers.
pub struct MinHashIterator<'a> {
    s: &'a [u8],
    k: usize,
    g: usize,
    hashes: Vec<u64>,
}

impl<'a> MinHashIterator<'a> {
    pub fn new(s: &'a [u8], k: usize, g: usize) -> Self {
        debug_assert!(g >= 1 && g < k && k <= MAX_K);
        let n = s.len().saturating_sub(g - 1);
        let mut hashes = vec![u64::MAX; n];

        let mask = (1u64 << (2 * g)) - 1;
        let mut cur = 0u64;
        let mut filled = 0usize;
        for (i, &b) in s.iter().enumerate() {
            match encode_base(b) {
                Some(v) => {
                    cur = ((cur << 2) | v) & mask;
                    filled += 1;
                    if filled >= g {
                        hashes[i + 1 - g] = Minimizer(cur).order_hash(g);
                    }
                }
                None => {
                    cur = 0;
                    filled = 0;
                }
            }
        }

        Self { s, k, g, hashes }
    }

    /// Number of k-mer windows in the scanned sequence.
    #[inline]
    pub fn num_windows(&self) -> usize {
        if self.s.len() < self.k {
            0
        } else {
            self.s.len() - self.k + 1
        }
    }

    /// The canonical minimizer value at absolute position `pos`.
    #[inline]
    pub fn minimizer_at(&self, pos: usize) -> Minimizer {
        Minimizer::from_ascii(&self.s[pos..pos + self.g])
            .expect("minimizer position must be a valid g-mer")
            .rep(self.g)
    }

    /// Minimum hash of window `w` and the first position achieving it.
    pub fn window_min(&self, w: usize) -> MinHashResult {
        let mut best = MinHashResult {
            hash: u64::MAX,
            pos: w,
        };
        for pos in w..=w + self.k - self.g {
            let h = self.hashes[pos];
            if h < best.hash {
                best = MinHashResult { hash: h, pos };
            }
        }
        best
    }

    /// All positions of window `w` whose hash equals the window minimum, in
    /// position order.
    pub fn window_ties(&self, w: usize) -> TiedMins<'_> {
        let min = self.window_min(w).hash;
        TiedMins {
            hashes: &self.hashes,
            cur: w,
            end: w + self.k - self.g,
            min,
        }
    }

    /// The next distinct minimum of window `w`: the smallest hash strictly
    /// greater than `prev_hash`, with the first position achieving it.
    /// `None` when every g-mer of the window hashes at or below `prev_hash`.
    pub fn alternate_min(&self, w: usize, prev_hash: u64) -> Option<MinHashResult> {
        let mut best: Option<MinHashResult> = None;
        for pos in w..=w + self.k - self.g {
            let h = self.hashes[pos];
            if h > prev_hash && best.map_or(true, |b| h < b.hash) {
                best = Some(MinHashResult { hash: h, pos });
            }
        }
        best
    }
}

/// Iterator over the tied minimum positions of one window.
pub struct TiedMins<'a> {
    hashes: &'a [u64],
    cur: usize,
    end: usize,
    min: u64,
}

impl<'a> Iterator for TiedMins<'a> {
    type Item = MinHashResult;

    fn next(&mut self) -> Option<MinHashResult> {
        while self.cur <= self.end {
            let pos = self.cur;
            self.cur += 1;
            if self.hashes[pos] == self.min {
                return Some(MinHashResult {
                    hash: self.min,
                    pos,
                });
            }
        }
        None
    }
}

/// Minimum g-mer hash of a single k-mer given as ASCII; selects the bloom
/// filter block for that k-mer.
pub fn window_min_hash(km_ascii: &[u8], g: usize) -> u64 {
    let mask = (1u64 << (2 * g)) - 1;
    let mut cur = 0u64;
    let mut filled = 0usize;
    let mut min = u64::MAX;
    for &b in km_ascii {
        match encode_base(b) {
            Some(v) => {
                cur = ((cur << 2) | v) & mask;
                filled += 1;
                if filled >= g {
                    min = min.min(Minimizer(cur).order_hash(g));
                }
            }
            None => {
                cur = 0;
                filled = 0;
            }
        }
    }
    min
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_hash_strand_symmetric() {
        let m = Minimizer::from_ascii(b"GAT").unwrap();
        let t = Minimizer::from_ascii(b"ATC").unwrap(); // twin of GAT
        assert_eq!(m.order_hash(3), t.order_hash(3));
    }

    #[test]
    fn test_window_min_matches_fresh_scan() {
        // The window minimum computed on the full sequence must agree with a
        // fresh scan of the isolated k-mer.
        let seq = b"GATTACAGATTACA";
        let (k, g) = (7, 3);
        let scan = MinHashIterator::new(seq, k, g);
        for w in 0..scan.num_windows() {
            let wm = scan.window_min(w);
            let kmer_scan = MinHashIterator::new(&seq[w..w + k], k, g);
            let fresh = kmer_scan.window_min(0);
            assert_eq!(wm.hash, fresh.hash, "window {w}");
            assert_eq!(wm.pos - w, fresh.pos, "window {w}");
        }
    }

    #[test]
    fn test_window_min_symmetric_under_twin() {
        let km = Kmer::from_ascii(b"GATTACA").unwrap();
        let twin = km.twin(7);
        let fw = twin.twin(7).to_string(7);
        let rc = twin.to_string(7);
        let a = MinHashIterator::new(fw.as_bytes(), 7, 3).window_min(0);
        let b = MinHashIterator::new(rc.as_bytes(), 7, 3).window_min(0);
        assert_eq!(a.hash, b.hash);
        // positions mirror: pos_fw == (k - g) - pos_rc for the same g-mer
        assert_eq!(a.pos, (7 - 3) - b.pos);
    }

    #[test]
    fn test_ties_in_position_order() {
        // A homopolymer window ties at every position.
        let seq = b"AAAAAAA";
        let scan = MinHashIterator::new(seq, 7, 3);
        let ties: Vec<_> = scan.window_ties(0).map(|r| r.pos).collect();
        assert_eq!(ties, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_alternate_min_strictly_increasing() {
        let seq = b"GATTACAGT";
        let scan = MinHashIterator::new(seq, 9, 3);
        let first = scan.window_min(0);
        let mut prev = first.hash;
        let mut seen = 1;
        while let Some(next) = scan.alternate_min(0, prev) {
            assert!(next.hash > prev);
            prev = next.hash;
            seen += 1;
        }
        // At most k - g + 1 distinct hashes exist.
        assert!(seen <= 7);
        // Exhausted: nothing above the largest hash.
        assert!(scan.alternate_min(0, u64::MAX).is_none());
    }

    #[test]
    fn test_window_min_hash_helper_agrees() {
        let seq = b"GATTACAGT";
        let (k, g) = (5, 3);
        let scan = MinHashIterator::new(seq, k, g);
        for w in 0..scan.num_windows() {
            assert_eq!(
                window_min_hash(&seq[w..w + k], g),
                scan.window_min(w).hash
            );
        }
    }
}
