//! Bloom-filter-guided unitig extension.
//!
//! Starting from a seed k-mer known to the filter, the walker extends forward
//! and backward one base at a time, stopping at branch points, dead ends,
//! self-loops, and reverse-complement meets. Because the filter produces
//! false positives, a candidate neighbor that is itself a dead end in the
//! walking direction (while extending the opposite way, i.e. a one-k-mer
//! "tip") is treated as a probable false positive and pruned; the pruned
//! candidates are reported so tip surgery can later check the ones that turn
//! out to be real.

use crate::graph::bloom::BlockedBloomFilter;
use crate::kmer::{decode_base, mix64, Kmer, MAX_K};
use crate::minimizer::window_min_hash;

/// Seed folded into the bloom-filter key hash.
const BLOOM_KEY_SEED: u64 = 0x9e2e9089bcecfd2f;

/// The filter key for a k-mer: a seeded hash of its canonical form.
#[inline]
pub fn bloom_key(km: Kmer, k: usize) -> u64 {
    mix64(km.rep(k).bits() ^ BLOOM_KEY_SEED)
}

/// Outcome of one guided extension step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BfStep {
    /// Exactly one plausible neighbor; `base` is its new 2-bit base.
    Extended { next: Kmer, base: u64 },
    /// No neighbor present in the filter.
    DeadEnd,
    /// More than one surviving neighbor (or the back-check found a fork).
    Branch,
}

/// Outcome of an unchecked (single-sided) step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SimpleStep {
    Extended(Kmer),
    DeadEnd,
    Branch,
}

pub struct Walker<'a> {
    bf: &'a BlockedBloomFilter,
    k: usize,
    g: usize,
}

impl<'a> Walker<'a> {
    pub fn new(bf: &'a BlockedBloomFilter, k: usize, g: usize) -> Self {
        Self { bf, k, g }
    }

    /// Whether the filter reports `km` present.
    pub fn bf_has(&self, km: Kmer) -> bool {
        let mut buf = [0u8; MAX_K];
        km.write_ascii(self.k, &mut buf);
        let block = self.bf.get_block(window_min_hash(&buf[..self.k], self.g));
        self.bf.contains(bloom_key(km, self.k), block)
    }

    #[inline]
    fn ext(&self, km: Kmer, b: u64, forward: bool) -> Kmer {
        if forward {
            km.forward_base(self.k, b)
        } else {
            km.backward_base(self.k, b)
        }
    }

    /// Count filter-present neighbors of `km` in one direction, with an
    /// early exit on the second hit.
    fn step_simple(&self, km: Kmer, forward: bool) -> SimpleStep {
        let mut nb = 0;
        let mut found = None;
        for b in 0..4u64 {
            let n = self.ext(km, b, forward);
            if self.bf_has(n) {
                nb += 1;
                if nb >= 2 {
                    return SimpleStep::Branch;
                }
                found = Some(n);
            }
        }
        match found {
            Some(n) => SimpleStep::Extended(n),
            None => SimpleStep::DeadEnd,
        }
    }

    /// Whether `cand` looks like a filter artifact: a dead end in the `dir`
    /// direction that still extends the opposite way.
    fn looks_like_tip(&self, cand: Kmer, dir: bool) -> bool {
        matches!(self.step_simple(cand, dir), SimpleStep::DeadEnd)
            && matches!(self.step_simple(cand, !dir), SimpleStep::Extended(_))
    }

    /// One guided extension step of `km` in direction `forward`, with
    /// false-positive pruning and the symmetric back-check from the chosen
    /// neighbor. Pruned candidates that survive the step are appended to
    /// `ignored` in canonical form.
    pub fn step(&self, km: Kmer, forward: bool, ignored: &mut Vec<Kmer>) -> BfStep {
        let mut pres = [false; 4];
        let mut nb = 0usize;
        let mut j = 0u64;
        for b in 0..4u64 {
            if self.bf_has(self.ext(km, b, forward)) {
                pres[b as usize] = true;
                j = b;
                nb += 1;
            }
        }

        let mut pruned_primary: Vec<Kmer> = Vec::new();
        if nb >= 2 {
            let mut found_fp = 0usize;
            let mut j_tmp = j;
            for b in 0..4u64 {
                if !pres[b as usize] {
                    continue;
                }
                let cand = self.ext(km, b, forward);
                if self.looks_like_tip(cand, forward) {
                    found_fp += 1;
                    pruned_primary.push(cand);
                } else {
                    pres[b as usize] = false;
                    j_tmp = b;
                }
            }
            if found_fp != 0 {
                if nb - found_fp != 0 {
                    j = j_tmp;
                    nb -= found_fp;
                } else {
                    // every candidate looks like a tip: prune nothing
                    pruned_primary.clear();
                }
            }
        }

        if nb != 1 {
            return if nb == 0 { BfStep::DeadEnd } else { BfStep::Branch };
        }

        // back-check: the chosen neighbor must see a single plausible
        // predecessor on the way we came from
        let chosen = self.ext(km, j, forward);
        let mut pres2 = [false; 4];
        let mut nb2 = 0usize;
        for b in 0..4u64 {
            if self.bf_has(self.ext(chosen, b, !forward)) {
                pres2[b as usize] = true;
                nb2 += 1;
            }
        }

        let mut pruned_second: Vec<Kmer> = Vec::new();
        if nb2 >= 2 {
            let mut found_fp = 0usize;
            for b in 0..4u64 {
                if !pres2[b as usize] {
                    continue;
                }
                let cand = self.ext(chosen, b, !forward);
                if self.looks_like_tip(cand, !forward) {
                    if cand != km {
                        found_fp += 1;
                        pruned_second.push(cand);
                    } else {
                        // the seed itself reads as a tip: record none
                        found_fp = 0;
                        pruned_second.clear();
                        break;
                    }
                } else {
                    pres2[b as usize] = false;
                }
            }
            if found_fp != 0 && nb2 - found_fp == 0 {
                pruned_second.clear();
                found_fp = 0;
            }
            if found_fp != 0 {
                nb2 -= found_fp;
            }
        }

        if nb2 != 1 {
            return BfStep::Branch;
        }

        for t in pruned_second {
            ignored.push(t.rep(self.k));
        }
        for t in pruned_primary {
            ignored.push(t.rep(self.k));
        }
        BfStep::Extended { next: chosen, base: j }
    }

    /// Extend `km` both ways into the maximal non-branching sequence.
    ///
    /// Returns the ASCII sequence, whether the walk closed a self-loop
    /// (including hairpins back onto the seed), and whether the seed is
    /// isolated (no neighbor either way).
    pub fn find_unitig_sequence(
        &self,
        km: Kmer,
        ignored: &mut Vec<Kmer>,
    ) -> (Vec<u8>, bool, bool) {
        let k = self.k;
        let twin = km.twin(k);

        let mut fw_s: Vec<u8> = Vec::new();
        let mut end = km;
        let mut last = km;
        let mut self_loop = false;
        let mut j = 0usize;
        let mut fw_dead = false;
        loop {
            match self.step(end, true, ignored) {
                BfStep::Extended { next, base } => {
                    j += 1;
                    if next == km {
                        self_loop = true;
                        break;
                    }
                    if next == twin || next == last.twin(k) {
                        break;
                    }
                    fw_s.push(decode_base(base));
                    last = next;
                    end = next;
                }
                BfStep::DeadEnd => {
                    fw_dead = true;
                    break;
                }
                BfStep::Branch => break,
            }
        }

        let mut is_isolated = false;
        let mut bw_s: Vec<u8> = Vec::new();
        if !self_loop {
            is_isolated = j == 0 && fw_dead;

            let mut front = km;
            let mut first = km;
            let mut jb = 0usize;
            let mut bw_dead = false;
            loop {
                match self.step(front, false, ignored) {
                    BfStep::Extended { next, base } => {
                        jb += 1;
                        if next == km {
                            self_loop = true;
                            break;
                        }
                        if next == twin || next == first.twin(k) {
                            break;
                        }
                        bw_s.push(decode_base(base));
                        first = next;
                        front = next;
                    }
                    BfStep::DeadEnd => {
                        bw_dead = true;
                        break;
                    }
                    BfStep::Branch => break,
                }
            }
            if is_isolated {
                is_isolated = jb == 0 && bw_dead;
            }
            bw_s.reverse();
        }

        let mut s = bw_s;
        let mut buf = [0u8; MAX_K];
        km.write_ascii(k, &mut buf);
        s.extend_from_slice(&buf[..k]);
        s.extend_from_slice(&fw_s);
        (s, self_loop, is_isolated)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_with(kmers: &[&[u8]], k: usize, g: usize) -> BlockedBloomFilter {
        let mut bf = BlockedBloomFilter::new(kmers.len().max(64), 16, 4);
        for s in kmers {
            let km = Kmer::from_ascii(s).unwrap();
            let block = bf.get_block(window_min_hash(s, g));
            bf.insert(bloom_key(km, k), block);
        }
        bf
    }

    #[test]
    fn test_linear_extension() {
        let (k, g) = (5, 3);
        let bf = filter_with(&[b"GATTA", b"ATTAC", b"TTACA", b"TACAG"], k, g);
        let walker = Walker::new(&bf, k, g);

        let mut ignored = Vec::new();
        let seed = Kmer::from_ascii(b"TTACA").unwrap();
        let (s, self_loop, isolated) = walker.find_unitig_sequence(seed, &mut ignored);
        assert_eq!(s, b"GATTACAG".to_vec());
        assert!(!self_loop);
        assert!(!isolated);
        assert!(ignored.is_empty());
    }

    #[test]
    fn test_query_is_strand_symmetric() {
        let (k, g) = (5, 3);
        let bf = filter_with(&[b"GATTA"], k, g);
        let walker = Walker::new(&bf, k, g);
        let km = Kmer::from_ascii(b"GATTA").unwrap();
        assert!(walker.bf_has(km));
        assert!(walker.bf_has(km.twin(k)));
    }

    #[test]
    fn test_isolated_seed() {
        let (k, g) = (5, 3);
        let bf = filter_with(&[b"GATTA"], k, g);
        let walker = Walker::new(&bf, k, g);
        let mut ignored = Vec::new();
        let seed = Kmer::from_ascii(b"GATTA").unwrap();
        let (s, self_loop, isolated) = walker.find_unitig_sequence(seed, &mut ignored);
        assert_eq!(s, b"GATTA".to_vec());
        assert!(!self_loop);
        assert!(isolated);
    }

    #[test]
    fn test_homopolymer_self_loop() {
        let (k, g) = (4, 2);
        let bf = filter_with(&[b"AAAA"], k, g);
        let walker = Walker::new(&bf, k, g);
        let mut ignored = Vec::new();
        let seed = Kmer::from_ascii(b"AAAA").unwrap();
        let (s, self_loop, _isolated) = walker.find_unitig_sequence(seed, &mut ignored);
        assert_eq!(s, b"AAAA".to_vec());
        assert!(self_loop);
    }

    #[test]
    fn test_cycle_stops_at_reverse_complement_meet() {
        let (k, g) = (5, 3);
        // k-mers of the period-4 cycle ACGT ACGT ...; the k-mer set is
        // closed under reverse complement (GTACG = twin(CGTAC), TACGT =
        // twin(ACGTA)), so both walks hit the twin-meet checks before the
        // cycle can close on the seed
        let bf = filter_with(&[b"ACGTA", b"CGTAC", b"GTACG", b"TACGT"], k, g);
        let walker = Walker::new(&bf, k, g);
        let mut ignored = Vec::new();
        let seed = Kmer::from_ascii(b"ACGTA").unwrap();
        let (s, self_loop, _isolated) = walker.find_unitig_sequence(seed, &mut ignored);
        assert!(!self_loop);
        assert_eq!(s, b"ACGTAC".to_vec());
    }

    #[test]
    fn test_branch_stops_extension() {
        let (k, g) = (5, 3);
        // a real fork after TTACA: both continuations extend further, so
        // neither is pruned and the walk stops at the branch point
        let bf = filter_with(
            &[
                b"GATTA", b"ATTAC", b"TTACA", b"TACAG", b"ACAGT", b"TACAT",
                b"ACATC",
            ],
            k,
            g,
        );
        let walker = Walker::new(&bf, k, g);
        let mut ignored = Vec::new();
        let seed = Kmer::from_ascii(b"GATTA").unwrap();
        let (s, self_loop, isolated) = walker.find_unitig_sequence(seed, &mut ignored);
        assert_eq!(s, b"GATTACA".to_vec());
        assert!(!self_loop);
        assert!(!isolated);
        assert!(ignored.is_empty());
    }

    #[test]
    fn test_false_positive_tip_pruned() {
        let (k, g) = (5, 3);
        // backbone GATTACAGT with a one-k-mer side branch TACAT off TTACA:
        // the side branch dead-ends forward while the backbone continues, so
        // the walk prunes it, records it, and pushes through the fork
        let bf = filter_with(
            &[
                b"GATTA", b"ATTAC", b"TTACA", b"TACAG", b"ACAGT", b"TACAT",
            ],
            k,
            g,
        );
        let walker = Walker::new(&bf, k, g);
        let mut ignored = Vec::new();
        let seed = Kmer::from_ascii(b"GATTA").unwrap();
        let (s, self_loop, _isolated) = walker.find_unitig_sequence(seed, &mut ignored);
        assert!(!self_loop);
        assert_eq!(s, b"GATTACAGT".to_vec());
        let tip = Kmer::from_ascii(b"TACAT").unwrap().rep(k);
        assert!(ignored.contains(&tip));
    }
}
