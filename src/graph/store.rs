//! The unitig store: three storage representations plus the minimizer index.
//!
//! Unitigs live in one of three places depending on length and abundance:
//!
//! - `v_unitigs`: unitigs longer than k, dense index, tombstoned with `None`;
//! - `v_kmers`: single-k-mer unitigs, dense index, tombstoned by flagging the
//!   stored k-mer as deleted;
//! - `h_kmers_ccov`: "abundant" single k-mers whose minimizer bin is shared
//!   with many others, addressed by their slot in a k-mer-keyed table.
//!
//! The minimizer index `hmap_min_unitigs` maps each canonical minimizer to a
//! small list of references `(representation, unitig id, position of the
//! minimizer occurrence in the unitig)`. A bin may end in a single reserved
//! sentinel carrying the count of abundant k-mers sharing the minimizer and
//! an "overcrowded" flag; when a bin is overcrowded, references for further
//! long unitigs migrate to an alternate minimizer of the same window. The
//! sentinel, when present, is always the last entry of its bin.
//!
//! Every mutation of unitig storage goes through `add_unitig` /
//! `delete_unitig` / `swap_unitigs` so the index stays coherent: after each
//! of them, every k-mer window of every live unitig is reachable through the
//! index, and no reference addresses a tombstoned slot.

use smallvec::SmallVec;

use crate::graph::coverage::CompressedCoverage;
use crate::graph::hash_table::SlotTable;
use crate::graph::unitig::Unitig;
use crate::kmer::Kmer;
use crate::minimizer::{MinHashIterator, MinHashResult, Minimizer};

/// Bin capacity threshold that promotes a new single-k-mer unitig to the
/// abundant representation.
pub const DEFAULT_MIN_ABUNDANCE_LIM: usize = 15;
/// Bin capacity threshold past which long-unitig references migrate to an
/// alternate minimizer.
pub const DEFAULT_MAX_ABUNDANCE_LIM: usize = 15;

// ---------------------------------------------------------------------------
// Minimizer index entries
// ---------------------------------------------------------------------------

/// One entry of a minimizer bin.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum MinzEntry {
    /// A minimizer occurrence inside a stored unitig.
    Occ { is_short: bool, id: u32, pos: u32 },
    /// Trailing reserved entry: count of abundant k-mers sharing this
    /// minimizer, plus the overcrowded flag.
    Sentinel { abundant: u32, overcrowded: bool },
}

pub(crate) type MinzBin = SmallVec<[MinzEntry; 2]>;

#[inline]
fn ends_overcrowded(bin: &MinzBin) -> bool {
    matches!(
        bin.last(),
        Some(MinzEntry::Sentinel {
            overcrowded: true,
            ..
        })
    )
}

// ---------------------------------------------------------------------------
// UnitigMap
// ---------------------------------------------------------------------------

/// Which storage representation a unitig lives in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnitigKind {
    Long,
    Short,
    Abundant,
}

/// A resolved mapping of one or more consecutive k-mers onto a stored unitig.
///
/// `dist` is the k-mer start offset inside the unitig (for the reverse
/// strand, the offset of the *last* matched k-mer's position on the forward
/// strand of the stored sequence); `len` counts matched k-mers; `size` is the
/// unitig length in bases; `strand` is true when the queried k-mer matches
/// the stored orientation.
#[derive(Clone, Copy, Debug)]
pub struct UnitigMap {
    pub kind: UnitigKind,
    pub id: usize,
    pub dist: usize,
    pub len: usize,
    pub size: usize,
    pub strand: bool,
}

/// A stored single-k-mer unitig.
pub struct ShortEntry {
    pub km: Kmer,
    pub ccov: CompressedCoverage,
    pub self_loop: bool,
}

// ---------------------------------------------------------------------------
// UnitigStore
// ---------------------------------------------------------------------------

pub struct UnitigStore {
    k: usize,
    g: usize,
    min_abundance_lim: usize,
    max_abundance_lim: usize,
    pub(crate) v_unitigs: Vec<Option<Unitig>>,
    pub(crate) v_kmers: Vec<ShortEntry>,
    pub(crate) h_kmers_ccov: SlotTable<Kmer, CompressedCoverage>,
    pub(crate) hmap_min_unitigs: SlotTable<Minimizer, MinzBin>,
}

impl UnitigStore {
    pub fn new(k: usize, g: usize) -> Self {
        Self::with_limits(k, g, DEFAULT_MIN_ABUNDANCE_LIM, DEFAULT_MAX_ABUNDANCE_LIM)
    }

    /// Store with explicit abundance/overcrowding thresholds.
    pub fn with_limits(
        k: usize,
        g: usize,
        min_abundance_lim: usize,
        max_abundance_lim: usize,
    ) -> Self {
        assert!(g >= 1 && g < k && k <= crate::kmer::MAX_K);
        Self {
            k,
            g,
            min_abundance_lim,
            max_abundance_lim,
            v_unitigs: Vec::new(),
            v_kmers: Vec::new(),
            h_kmers_ccov: SlotTable::new(),
            hmap_min_unitigs: SlotTable::new(),
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn g(&self) -> usize {
        self.g
    }

    pub fn num_longs(&self) -> usize {
        self.v_unitigs.iter().filter(|u| u.is_some()).count()
    }

    pub fn num_shorts(&self) -> usize {
        self.v_kmers.iter().filter(|e| !e.km.is_deleted()).count()
    }

    pub fn num_abundant(&self) -> usize {
        self.h_kmers_ccov.len()
    }

    /// Total number of live unitigs across the three representations.
    pub fn unitig_count(&self) -> usize {
        self.num_longs() + self.num_shorts() + self.num_abundant()
    }

    /// The head k-mer of a unitig: its stored canonical k-mer for the short
    /// and abundant representations, the first k-mer of the sequence for
    /// long ones.
    pub fn head_kmer(&self, kind: UnitigKind, id: usize) -> Kmer {
        match kind {
            UnitigKind::Short => self.v_kmers[id].km,
            UnitigKind::Abundant => {
                *self
                    .h_kmers_ccov
                    .entry_at(id)
                    .expect("abundant slot is live")
                    .0
            }
            UnitigKind::Long => self.long_at(id).seq.get_kmer(0, self.k),
        }
    }

    #[inline]
    pub(crate) fn long_at(&self, id: usize) -> &Unitig {
        self.v_unitigs[id]
            .as_ref()
            .expect("unitig slot referenced after deletion")
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Locate the unitig containing `km`, if any.
    pub fn find(&self, km: Kmer, extremities_only: bool) -> Option<UnitigMap> {
        let mut buf = [0u8; crate::kmer::MAX_K];
        km.write_ascii(self.k, &mut buf);
        let ascii = &buf[..self.k];
        let scan = MinHashIterator::new(ascii, self.k, self.g);
        self.find_in_window(km, &scan, 0, extremities_only)
    }

    /// Locate `km` using a precomputed minimizer scan of its surrounding
    /// read; `w` is the k-mer's start position in the scanned sequence.
    pub fn find_in_window(
        &self,
        km: Kmer,
        scan: &MinHashIterator,
        w: usize,
        extremities_only: bool,
    ) -> Option<UnitigMap> {
        let k = self.k;
        let diff = k - self.g;
        let km_twin = km.twin(k);
        let km_rep = if km.bits() <= km_twin.bits() {
            km
        } else {
            km_twin
        };

        for tie in scan.window_ties(w) {
            let rel = tie.pos - w;
            let mut mhr = tie;
            let mut bin_slot = self
                .hmap_min_unitigs
                .find(&scan.minimizer_at(mhr.pos));

            while let Some(slot) = bin_slot.take() {
                let Some((_, bin)) = self.hmap_min_unitigs.entry_at(slot) else {
                    break;
                };
                for &entry in bin.iter() {
                    match entry {
                        MinzEntry::Sentinel {
                            abundant,
                            overcrowded,
                        } => {
                            if abundant > 0 {
                                if let Some(a_slot) = self.h_kmers_ccov.find(&km_rep) {
                                    return Some(UnitigMap {
                                        kind: UnitigKind::Abundant,
                                        id: a_slot,
                                        dist: 0,
                                        len: 1,
                                        size: k,
                                        strand: km == km_rep,
                                    });
                                }
                            }
                            if overcrowded {
                                if let Some(alt) = scan.alternate_min(w, mhr.hash) {
                                    mhr = alt;
                                    bin_slot = self
                                        .hmap_min_unitigs
                                        .find(&scan.minimizer_at(mhr.pos));
                                }
                            }
                        }
                        MinzEntry::Occ {
                            is_short: true,
                            id,
                            pos,
                        } => {
                            let id = id as usize;
                            let pos = pos as usize;
                            if rel == pos {
                                if self.v_kmers[id].km == km_rep {
                                    return Some(UnitigMap {
                                        kind: UnitigKind::Short,
                                        id,
                                        dist: 0,
                                        len: 1,
                                        size: k,
                                        strand: true,
                                    });
                                }
                            } else if rel == diff - pos && self.v_kmers[id].km == km_rep {
                                return Some(UnitigMap {
                                    kind: UnitigKind::Short,
                                    id,
                                    dist: 0,
                                    len: 1,
                                    size: k,
                                    strand: false,
                                });
                            }
                        }
                        MinzEntry::Occ {
                            is_short: false,
                            id,
                            pos,
                        } => {
                            let id = id as usize;
                            let u = self.long_at(id);
                            let last = u.seq.len() - k;

                            let pm = pos as i64 - rel as i64;
                            let at_extremity =
                                |p: i64| -> bool { p == 0 || p == last as i64 };
                            let in_range =
                                |p: i64| -> bool { p >= 0 && p <= last as i64 };
                            let ok_fw = if extremities_only {
                                at_extremity(pm)
                            } else {
                                in_range(pm)
                            };
                            if ok_fw && u.seq.compare_kmer(pm as usize, k, km) {
                                return Some(UnitigMap {
                                    kind: UnitigKind::Long,
                                    id,
                                    dist: pm as usize,
                                    len: 1,
                                    size: last + k,
                                    strand: true,
                                });
                            }

                            let pm = pos as i64 - diff as i64 + rel as i64;
                            let ok_bw = if extremities_only {
                                at_extremity(pm)
                            } else {
                                in_range(pm)
                            };
                            if ok_bw && u.seq.compare_kmer(pm as usize, k, km_twin) {
                                return Some(UnitigMap {
                                    kind: UnitigKind::Long,
                                    id,
                                    dist: pm as usize,
                                    len: 1,
                                    size: last + k,
                                    strand: false,
                                });
                            }
                        }
                    }
                }
            }
        }
        None
    }

    /// Locate `km` at position `pos` of `seq` and extend the match along the
    /// read, so one lookup maps as many consecutive k-mers as possible.
    pub fn find_unitig(
        &self,
        km: Kmer,
        seq: &[u8],
        pos: usize,
        scan: &MinHashIterator,
    ) -> Option<UnitigMap> {
        let k = self.k;
        let cc = self.find_in_window(km, scan, pos, false)?;
        if cc.kind != UnitigKind::Long {
            return Some(cc);
        }
        let u = self.long_at(cc.id);
        if cc.strand {
            let jlen = u.seq.jump(seq, pos, cc.dist, false) + 1 - k;
            Some(UnitigMap { len: jlen, ..cc })
        } else {
            let jlen = u.seq.jump(seq, pos, cc.dist + k - 1, true) + 1 - k;
            Some(UnitigMap {
                dist: cc.dist - (jlen - 1),
                len: jlen,
                ..cc
            })
        }
    }

    /// Record read coverage for a mapped stretch of k-mers.
    pub fn map_read(&mut self, um: &UnitigMap) {
        let (a, b) = (um.dist, um.dist + um.len - 1);
        match um.kind {
            UnitigKind::Short => self.v_kmers[um.id].ccov.cover(a, b),
            UnitigKind::Abundant => {
                self.h_kmers_ccov
                    .value_at_mut(um.id)
                    .expect("abundant slot is live")
                    .cover(a, b);
            }
            UnitigKind::Long => {
                let u = self.v_unitigs[um.id]
                    .as_mut()
                    .expect("unitig slot referenced after deletion");
                u.ccov.cover(a, b);
                u.coveragesum += um.len as u64;
            }
        }
    }

    /// Flag a freshly added unitig as a self-loop (cycle or hairpin).
    pub fn mark_self_loop(&mut self, is_short: bool, is_abundant: bool, id: usize) {
        if is_abundant {
            // abundant k-mers carry no flag
        } else if is_short {
            self.v_kmers[id].self_loop = true;
        } else if let Some(u) = self.v_unitigs[id].as_mut() {
            u.self_loop = true;
        }
    }

    /// Whether the unitig was created from a self-loop walk.
    pub fn is_self_loop(&self, kind: UnitigKind, id: usize) -> bool {
        match kind {
            UnitigKind::Short => self.v_kmers[id].self_loop,
            UnitigKind::Long => self.long_at(id).self_loop,
            UnitigKind::Abundant => false,
        }
    }

    // -----------------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------------

    /// Insert the unitig `seq` under dense index `id` (which must be the
    /// next free index or a tombstoned slot of the target representation).
    /// Returns true when the sequence was promoted to the abundant
    /// representation instead of the short one.
    pub fn add_unitig(&mut self, seq: &[u8], id: usize) -> bool {
        let k = self.k;
        let is_short = seq.len() == k;

        let mut buf = [0u8; crate::kmer::MAX_K];
        let mut km_rep = Kmer::EMPTY;
        let s: &[u8] = if is_short {
            km_rep = Kmer::from_ascii(seq)
                .expect("unitig sequences contain only A/C/G/T")
                .rep(k);
            km_rep.write_ascii(k, &mut buf);
            &buf[..k]
        } else {
            seq
        };

        // Promotion is decided before any index mutation: a single k-mer
        // whose minimizer bin already holds min_abundance_lim entries goes
        // straight to the abundant table.
        let scan = MinHashIterator::new(s, k, self.g);
        if is_short {
            let crowded = scan.window_ties(0).any(|tie| {
                self.hmap_min_unitigs
                    .get(&scan.minimizer_at(tie.pos))
                    .is_some_and(|bin| bin.len() >= self.min_abundance_lim)
            });
            if crowded {
                self.add_abundant(&scan, km_rep);
                return true;
            }
        }

        self.index_insert_walk(&scan, is_short, id);

        if is_short {
            let entry = ShortEntry {
                km: km_rep,
                ccov: CompressedCoverage::new(1, false),
                self_loop: false,
            };
            if id == self.v_kmers.len() {
                self.v_kmers.push(entry);
            } else {
                self.v_kmers[id] = entry;
            }
        } else {
            let u = Unitig::new(s, k);
            if id == self.v_unitigs.len() {
                self.v_unitigs.push(Some(u));
            } else {
                self.v_unitigs[id] = Some(u);
            }
        }
        false
    }

    /// Bump the abundant sentinel of each minimizer of `km_rep` and store it
    /// in the k-mer table.
    fn add_abundant(&mut self, scan: &MinHashIterator, km_rep: Kmer) {
        let ties: Vec<MinHashResult> = scan.window_ties(0).collect();
        for tie in ties {
            let minz = scan.minimizer_at(tie.pos);
            let slot = self.hmap_min_unitigs.insert_with(minz, MinzBin::new);
            let bin = self
                .hmap_min_unitigs
                .value_at_mut(slot)
                .expect("bin just inserted");
            match bin.last_mut() {
                Some(MinzEntry::Sentinel { abundant, .. }) => *abundant += 1,
                _ => bin.push(MinzEntry::Sentinel {
                    abundant: 1,
                    overcrowded: false,
                }),
            }
        }
        self.h_kmers_ccov
            .insert(km_rep, CompressedCoverage::new(1, false));
    }

    /// Walk the minimizers of `s` and insert one reference per new
    /// minimizer occurrence, migrating to alternate minimizers when a bin is
    /// overcrowded for long unitigs.
    fn index_insert_walk(&mut self, scan: &MinHashIterator, is_short: bool, id: usize) {
        let mut last_pos_min: i64 = -1;
        let mut forbidden = false;

        for w in 0..scan.num_windows() {
            let wm = scan.window_min(w);
            if (last_pos_min >= wm.pos as i64) && !forbidden {
                continue;
            }
            forbidden = false;

            let ties: Vec<MinHashResult> = scan.window_ties(w).collect();
            for tie in ties {
                let mut mhr = tie;
                let mut minz = scan.minimizer_at(mhr.pos);
                let mut slot = self.hmap_min_unitigs.insert_with(minz, MinzBin::new);

                if !is_short {
                    loop {
                        let bin = self
                            .hmap_min_unitigs
                            .value_at_mut(slot)
                            .expect("bin just inserted");
                        let full = bin.len() >= self.max_abundance_lim;
                        if !full && !ends_overcrowded(bin) {
                            break;
                        }
                        forbidden = true;
                        let Some(alt) = scan.alternate_min(w, mhr.hash) else {
                            break;
                        };
                        // flag the saturated bin before migrating
                        match bin.last_mut() {
                            Some(MinzEntry::Sentinel { overcrowded, .. }) => {
                                *overcrowded = true;
                            }
                            _ => bin.push(MinzEntry::Sentinel {
                                abundant: 0,
                                overcrowded: true,
                            }),
                        }
                        mhr = alt;
                        minz = scan.minimizer_at(mhr.pos);
                        slot = self.hmap_min_unitigs.insert_with(minz, MinzBin::new);
                    }
                }

                let new_entry = MinzEntry::Occ {
                    is_short,
                    id: id as u32,
                    pos: tie.pos as u32,
                };
                let bin = self
                    .hmap_min_unitigs
                    .value_at_mut(slot)
                    .expect("bin just inserted");
                let v_sz = bin.len();
                if v_sz == 0 {
                    bin.push(new_entry);
                } else if matches!(bin[v_sz - 1], MinzEntry::Sentinel { .. }) {
                    // entries go before the trailing sentinel
                    if v_sz == 1 || bin[v_sz - 2] != new_entry {
                        bin.insert(v_sz - 1, new_entry);
                    }
                } else if bin[v_sz - 1] != new_entry {
                    bin.push(new_entry);
                }

                last_pos_min = tie.pos as i64;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Remove a unitig's references from the minimizer index and tombstone
    /// its storage slot. Dense indices are never compacted here.
    pub fn delete_unitig(&mut self, is_short: bool, is_abundant: bool, id: usize) {
        let k = self.k;

        if is_abundant {
            let km = *self
                .h_kmers_ccov
                .entry_at(id)
                .expect("abundant slot is live")
                .0;
            let mut buf = [0u8; crate::kmer::MAX_K];
            km.write_ascii(k, &mut buf);
            let ascii = buf[..k].to_vec();
            let scan = MinHashIterator::new(&ascii, k, self.g);
            let ties: Vec<MinHashResult> = scan.window_ties(0).collect();
            for tie in ties {
                let minz = scan.minimizer_at(tie.pos);
                let Some(slot) = self.hmap_min_unitigs.find(&minz) else {
                    continue;
                };
                let bin = self
                    .hmap_min_unitigs
                    .value_at_mut(slot)
                    .expect("bin slot is live");
                let mut drop_sentinel = false;
                if let Some(MinzEntry::Sentinel {
                    abundant,
                    overcrowded,
                }) = bin.last_mut()
                {
                    *abundant -= 1;
                    drop_sentinel = *abundant == 0 && !*overcrowded;
                }
                if drop_sentinel {
                    if bin.len() == 1 {
                        self.hmap_min_unitigs.erase_slot(slot);
                    } else {
                        bin.pop();
                    }
                }
            }
            self.h_kmers_ccov.erase_slot(id);
            return;
        }

        let s: Vec<u8> = if is_short {
            let mut buf = [0u8; crate::kmer::MAX_K];
            self.v_kmers[id].km.write_ascii(k, &mut buf);
            buf[..k].to_vec()
        } else {
            self.long_at(id).seq.to_string().into_bytes()
        };
        let scan = MinHashIterator::new(&s, k, self.g);
        self.index_remove_walk(&scan, is_short, id);

        if is_short {
            self.v_kmers[id].km = Kmer::DELETED;
        } else {
            self.v_unitigs[id] = None;
        }
    }

    fn index_remove_walk(&mut self, scan: &MinHashIterator, is_short: bool, id: usize) {
        let mut last_pos_min: i64 = -1;
        let mut forbidden = false;

        for w in 0..scan.num_windows() {
            let wm = scan.window_min(w);
            if (last_pos_min >= wm.pos as i64) && !forbidden {
                continue;
            }
            forbidden = false;

            let ties: Vec<MinHashResult> = scan.window_ties(w).collect();
            for tie in ties {
                let mut mhr = tie;
                let mut bin_slot = self
                    .hmap_min_unitigs
                    .find(&scan.minimizer_at(mhr.pos));

                while let Some(slot) = bin_slot.take() {
                    let bin = self
                        .hmap_min_unitigs
                        .value_at_mut(slot)
                        .expect("bin slot is live");
                    if let Some(i) = bin.iter().position(|e| {
                        matches!(e, MinzEntry::Occ { is_short: s, id: eid, .. }
                                 if *s == is_short && *eid == id as u32)
                    }) {
                        bin.remove(i);
                    }
                    let now_empty = bin.is_empty();
                    let overcrowded_tail = !is_short && ends_overcrowded(bin);
                    if now_empty {
                        self.hmap_min_unitigs.erase_slot(slot);
                    } else if overcrowded_tail {
                        // references may continue in an alternate bin
                        forbidden = true;
                        if let Some(alt) = scan.alternate_min(w, mhr.hash) {
                            mhr = alt;
                            bin_slot = self
                                .hmap_min_unitigs
                                .find(&scan.minimizer_at(mhr.pos));
                        }
                    }
                }

                last_pos_min = tie.pos as i64;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Swap
    // -----------------------------------------------------------------------

    /// Exchange two storage slots of the same representation and rewrite
    /// every minimizer-index reference of either so ids stay accurate.
    pub fn swap_unitigs(&mut self, is_short: bool, id_a: usize, id_b: usize) {
        if is_short {
            self.v_kmers.swap(id_a, id_b);
        } else {
            self.v_unitigs.swap(id_a, id_b);
        }

        // after the storage swap, slot a holds b's old sequence
        let str_a = self.slot_sequence(is_short, id_a);
        let mut v_min_a = self.collect_bins(&str_a, is_short);
        v_min_a.sort_unstable();
        v_min_a.dedup();

        for &minz in &v_min_a {
            if let Some(bin) = self.hmap_min_unitigs.get_mut(&minz) {
                for entry in bin.iter_mut() {
                    if let MinzEntry::Occ {
                        is_short: s, id, ..
                    } = entry
                    {
                        if *s == is_short {
                            if *id == id_b as u32 {
                                *id = id_a as u32;
                            } else if *id == id_a as u32 {
                                *id = id_b as u32;
                            }
                        }
                    }
                }
            }
        }

        let str_b = self.slot_sequence(is_short, id_b);
        let mut v_min_b = self.collect_bins(&str_b, is_short);
        v_min_b.sort_unstable();
        v_min_b.dedup();
        // bins shared by both sequences were already rewritten above
        v_min_b.retain(|m| v_min_a.binary_search(m).is_err());

        for &minz in &v_min_b {
            if let Some(bin) = self.hmap_min_unitigs.get_mut(&minz) {
                for entry in bin.iter_mut() {
                    if let MinzEntry::Occ {
                        is_short: s, id, ..
                    } = entry
                    {
                        if *s == is_short && *id == id_a as u32 {
                            *id = id_b as u32;
                        }
                    }
                }
            }
        }
    }

    fn slot_sequence(&self, is_short: bool, id: usize) -> Vec<u8> {
        if is_short {
            let mut buf = [0u8; crate::kmer::MAX_K];
            self.v_kmers[id].km.write_ascii(self.k, &mut buf);
            buf[..self.k].to_vec()
        } else {
            self.long_at(id).seq.to_string().into_bytes()
        }
    }

    /// Every minimizer bin a sequence's references may live in, following
    /// overcrowded bins to their alternates for long unitigs.
    fn collect_bins(&self, s: &[u8], is_short: bool) -> Vec<Minimizer> {
        let scan = MinHashIterator::new(s, self.k, self.g);
        let mut out = Vec::new();
        let mut last_pos_min: i64 = -1;
        let mut forbidden = false;

        for w in 0..scan.num_windows() {
            let wm = scan.window_min(w);
            if (last_pos_min >= wm.pos as i64) && !forbidden {
                continue;
            }
            forbidden = false;

            for tie in scan.window_ties(w) {
                let mut mhr = tie;
                let mut minz = scan.minimizer_at(mhr.pos);
                if is_short {
                    out.push(minz);
                } else if let Some(mut bin) = self.hmap_min_unitigs.get(&minz) {
                    out.push(minz);
                    while ends_overcrowded(bin) {
                        forbidden = true;
                        let Some(alt) = scan.alternate_min(w, mhr.hash) else {
                            break;
                        };
                        mhr = alt;
                        minz = scan.minimizer_at(mhr.pos);
                        match self.hmap_min_unitigs.get(&minz) {
                            Some(next) => {
                                out.push(minz);
                                bin = next;
                            }
                            None => break,
                        }
                    }
                }
                last_pos_min = tie.pos as i64;
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Coherence checks
    // -----------------------------------------------------------------------

    /// Validate the storage/index invariants: every k-mer of every live
    /// unitig resolves through `find` to that unitig at the right offset, no
    /// index entry references a tombstoned slot, sentinels only trail, and
    /// every abundant k-mer is announced by a sentinel on its minimizers.
    pub fn check_index_coherence(&self) -> anyhow::Result<()> {
        use anyhow::{bail, Context};
        let k = self.k;

        for (id, u) in self.v_unitigs.iter().enumerate() {
            let Some(u) = u else { continue };
            for pos in 0..=u.seq.len() - k {
                let km = u.seq.get_kmer(pos, k);
                let um = self
                    .find(km, false)
                    .with_context(|| format!("k-mer at unitig {id} pos {pos} unfindable"))?;
                if um.kind != UnitigKind::Long || um.id != id || um.dist != pos {
                    bail!(
                        "k-mer at unitig {id} pos {pos} resolved to {:?}",
                        um
                    );
                }
            }
        }
        for (id, e) in self.v_kmers.iter().enumerate() {
            if e.km.is_deleted() {
                continue;
            }
            let um = self
                .find(e.km, false)
                .with_context(|| format!("short unitig {id} unfindable"))?;
            if um.kind != UnitigKind::Short || um.id != id {
                bail!("short unitig {id} resolved to {:?}", um);
            }
        }
        for (slot, km, _) in self.h_kmers_ccov.iter() {
            let um = self
                .find(*km, false)
                .with_context(|| format!("abundant k-mer in slot {slot} unfindable"))?;
            if um.kind != UnitigKind::Abundant || um.id != slot {
                bail!("abundant k-mer in slot {slot} resolved to {:?}", um);
            }
        }

        for (_, minz, bin) in self.hmap_min_unitigs.iter() {
            for (i, entry) in bin.iter().enumerate() {
                match entry {
                    MinzEntry::Sentinel { .. } => {
                        if i + 1 != bin.len() {
                            bail!(
                                "sentinel not trailing in bin {}",
                                minz.to_string(self.g)
                            );
                        }
                    }
                    MinzEntry::Occ {
                        is_short: true,
                        id,
                        ..
                    } => {
                        let id = *id as usize;
                        if id >= self.v_kmers.len() || self.v_kmers[id].km.is_deleted() {
                            bail!("dangling short reference {id}");
                        }
                    }
                    MinzEntry::Occ {
                        is_short: false,
                        id,
                        ..
                    } => {
                        let id = *id as usize;
                        if id >= self.v_unitigs.len() || self.v_unitigs[id].is_none() {
                            bail!("dangling long reference {id}");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
