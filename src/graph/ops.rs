//! Graph surgery over the unitig store: coverage splitting, joining of
//! non-branching neighbors, removal of isolated unitigs and tips, and
//! repair around false-positive tips recorded by the walker.
//!
//! Dense storage indices are reclaimed by swapping the doomed slot with the
//! last live one and truncating at the end of each operation, so the
//! minimizer index never sees a dangling reference.

use crate::graph::coverage::CompressedCoverage;
use crate::graph::store::{UnitigKind, UnitigMap, UnitigStore};
use crate::kmer::Kmer;

/// Bookkeeping for a sweep that splits long unitigs in place.
///
/// `pos` is the slot currently under examination, `nxt_insert` the next slot
/// for freshly created long segments, and the two `*_sz` fields track the
/// live prefixes of the dense vectors.
pub struct SplitCursor {
    pub pos: usize,
    pub nxt_insert: usize,
    pub v_unitigs_sz: usize,
    pub v_kmers_sz: usize,
}

impl UnitigStore {
    // -----------------------------------------------------------------------
    // Splitting
    // -----------------------------------------------------------------------

    /// Split every unitig whose coverage is not saturated everywhere,
    /// deleting those with no saturated stretch at all. Returns
    /// `(split_count, deleted_count)`. Afterwards every stored unitig has
    /// full coverage.
    pub fn split_all_unitigs(&mut self) -> (usize, usize) {
        let mut split = 0usize;
        let mut deleted = 0usize;

        for slot in self.h_kmers_ccov.occupied_slots() {
            let full = self
                .h_kmers_ccov
                .entry_at(slot)
                .map(|(_, cc)| cc.is_full())
                .unwrap_or(true);
            if !full {
                self.delete_unitig(false, true, slot);
                deleted += 1;
            }
        }

        let mut v_kmers_sz = self.v_kmers.len();
        let mut i = 0usize;
        while i < v_kmers_sz {
            if !self.v_kmers[i].ccov.is_full() {
                v_kmers_sz -= 1;
                if i != v_kmers_sz {
                    self.swap_unitigs(true, i, v_kmers_sz);
                }
                self.delete_unitig(true, false, v_kmers_sz);
                deleted += 1;
            } else {
                i += 1;
            }
        }

        let mut cur = SplitCursor {
            pos: 0,
            nxt_insert: self.v_unitigs.len(),
            v_unitigs_sz: self.v_unitigs.len(),
            v_kmers_sz,
        };
        while cur.pos < cur.v_unitigs_sz {
            let u = self.long_at(cur.pos);
            if u.ccov.is_full() {
                cur.pos += 1;
                continue;
            }
            let sp = u.ccov.splitting_vector();
            if self.split_unitig(&mut cur, &sp) {
                deleted += 1;
            } else {
                split += 1;
            }
        }

        if cur.nxt_insert < self.v_unitigs.len() {
            self.v_unitigs.truncate(cur.nxt_insert);
        }
        if cur.v_kmers_sz < self.v_kmers.len() {
            self.v_kmers.truncate(cur.v_kmers_sz);
        }
        (split, deleted)
    }

    /// Replace the unitig at `cur.pos` by the segments in `sp` (half-open
    /// k-mer intervals of saturated coverage). The original slot is reused
    /// for the first long segment; further long segments go to
    /// `cur.nxt_insert`, single-k-mer segments to the short (or abundant)
    /// storage. Returns true when no segment survived and the unitig was
    /// only deleted.
    pub fn split_unitig(&mut self, cur: &mut SplitCursor, sp: &[(usize, usize)]) -> bool {
        let k = self.k();
        let (str_ascii, coveragesum, low, ccov_size) = {
            let u = self.long_at(cur.pos);
            (
                u.seq.to_string().into_bytes(),
                u.coveragesum,
                u.ccov.low_coverage_info(),
                u.ccov.size(),
            )
        };

        let mut first_long = true;
        let deleted = sp.is_empty();

        if !sp.is_empty() {
            let totalcoverage = coveragesum.saturating_sub(low.1);
            for &(start, end) in sp {
                let len_kmers = end - start;
                let seg = &str_ascii[start..end + k - 1];
                let cov_tmp =
                    totalcoverage * len_kmers as u64 / (ccov_size - low.0) as u64;

                if seg.len() == k {
                    if self.add_unitig(seg, cur.v_kmers_sz) {
                        let rep = Kmer::from_ascii(seg).unwrap().rep(k);
                        self.h_kmers_ccov
                            .get_mut(&rep)
                            .expect("segment just promoted")
                            .set_full();
                    } else {
                        self.v_kmers[cur.v_kmers_sz].ccov.set_full();
                        cur.v_kmers_sz += 1;
                    }
                } else if first_long {
                    // reuse the original slot for the first long segment
                    self.delete_unitig(false, false, cur.pos);
                    self.add_unitig(seg, cur.pos);
                    let u = self.v_unitigs[cur.pos].as_mut().unwrap();
                    u.initialize_coverage(true, k);
                    u.coveragesum = cov_tmp;
                    first_long = false;
                } else {
                    self.add_unitig(seg, cur.nxt_insert);
                    let u = self.v_unitigs[cur.nxt_insert].as_mut().unwrap();
                    u.initialize_coverage(true, k);
                    u.coveragesum = cov_tmp;
                    cur.nxt_insert += 1;
                }
            }
        }

        if first_long {
            // no long segment reused the slot: fill the hole with the last
            // live unitig and tombstone the vacated slot
            cur.nxt_insert -= 1;
            if cur.pos != cur.nxt_insert {
                self.swap_unitigs(false, cur.pos, cur.nxt_insert);
                if cur.nxt_insert >= cur.v_unitigs_sz {
                    // the slot filler was a fresh split segment, already done
                    cur.pos += 1;
                } else {
                    cur.v_unitigs_sz -= 1;
                }
            } else {
                cur.v_unitigs_sz -= 1;
            }
            self.delete_unitig(false, false, cur.nxt_insert);
        } else {
            cur.pos += 1;
        }

        deleted
    }

    /// Split the long unitig `id` right before k-mer position `dist`,
    /// producing two full-coverage segments. Helper for tip repair and for
    /// exercising split/join round trips.
    pub fn split_at(&mut self, id: usize, dist: usize) {
        let num_kmers = self.long_at(id).num_kmers(self.k());
        assert!(dist > 0 && dist < num_kmers);
        let mut cur = SplitCursor {
            pos: id,
            nxt_insert: self.v_unitigs.len(),
            v_unitigs_sz: self.v_unitigs.len(),
            v_kmers_sz: self.v_kmers.len(),
        };
        let sp = [(0, dist), (dist, num_kmers)];
        self.split_unitig(&mut cur, &sp);
        if cur.nxt_insert < self.v_unitigs.len() {
            self.v_unitigs.truncate(cur.nxt_insert);
        }
        if cur.v_kmers_sz < self.v_kmers.len() {
            self.v_kmers.truncate(cur.v_kmers_sz);
        }
    }

    // -----------------------------------------------------------------------
    // Joining
    // -----------------------------------------------------------------------

    /// The unique forward successor of extremity k-mer `a`, provided the
    /// join is unambiguous on both sides: exactly one successor of `a`
    /// exists in the store, it belongs to a different unitig, and it has
    /// exactly one predecessor (which is `a`).
    pub fn check_join(&self, a: Kmer, cm_a: &UnitigMap) -> Option<Kmer> {
        let k = self.k();

        let mut fw_count = 0usize;
        let mut fw_cand = None;
        let mut cm_cand = None;
        for b in 0..4u64 {
            let fw = a.forward_base(k, b);
            if let Some(cm) = self.find(fw, true) {
                fw_count += 1;
                if fw_count > 1 {
                    break;
                }
                fw_cand = Some(fw);
                cm_cand = Some(cm);
            }
        }
        if fw_count != 1 {
            return None;
        }
        let fw_cand = fw_cand.unwrap();
        let cm_cand = cm_cand.unwrap();

        let cand_head = self.head_kmer(cm_cand.kind, cm_cand.id);
        let ac_head = self.head_kmer(cm_a.kind, cm_a.id);
        if cand_head == ac_head {
            // hairpin, loop, or mobius loop onto the same unitig
            return None;
        }

        let fw_cpy = fw_cand.twin(k);
        let mut bw_count = 0usize;
        for b in 0..4u64 {
            if self.find(fw_cpy.forward_base(k, b), true).is_some() {
                bw_count += 1;
                if bw_count > 1 {
                    break;
                }
            }
        }
        if bw_count == 1 {
            Some(fw_cand)
        } else {
            None
        }
    }

    /// Join every unambiguous pair of adjacent unitigs. With `v_joins`,
    /// only the neighborhoods of the given k-mers are considered (and the
    /// list is drained); otherwise every extremity in the store is a
    /// candidate. Returns the number of joins performed.
    pub fn join_all_unitigs(&mut self, mut v_joins: Option<&mut Vec<Kmer>>) -> usize {
        let k = self.k();
        let mut joined = 0usize;
        let mut v_unitigs_size = self.v_unitigs.len();
        let mut v_kmers_size = self.v_kmers.len();

        let mut joins: crate::graph::hash_table::SlotTable<Kmer, Kmer> =
            crate::graph::hash_table::SlotTable::new();

        match v_joins.as_deref_mut() {
            None => {
                for slot in self.h_kmers_ccov.occupied_slots() {
                    let tail = *self.h_kmers_ccov.entry_at(slot).unwrap().0;
                    let head_twin = tail.twin(k);
                    let cm = UnitigMap {
                        kind: UnitigKind::Abundant,
                        id: slot,
                        dist: 0,
                        len: 1,
                        size: k,
                        strand: true,
                    };
                    if joins.get(&tail).is_none() {
                        if let Some(fw) = self.check_join(tail, &cm) {
                            joins.insert(fw.twin(k), tail);
                        }
                    }
                    if joins.get(&head_twin).is_none() {
                        if let Some(bw) = self.check_join(head_twin, &cm) {
                            joins.insert(bw.twin(k), head_twin);
                        }
                    }
                }
                for i in 0..v_kmers_size {
                    let tail = self.v_kmers[i].km;
                    if tail.is_deleted() {
                        continue;
                    }
                    let head_twin = tail.twin(k);
                    let cm = UnitigMap {
                        kind: UnitigKind::Short,
                        id: i,
                        dist: 0,
                        len: 1,
                        size: k,
                        strand: true,
                    };
                    if joins.get(&tail).is_none() {
                        if let Some(fw) = self.check_join(tail, &cm) {
                            joins.insert(fw.twin(k), tail);
                        }
                    }
                    if joins.get(&head_twin).is_none() {
                        if let Some(bw) = self.check_join(head_twin, &cm) {
                            joins.insert(bw.twin(k), head_twin);
                        }
                    }
                }
                for i in 0..v_unitigs_size {
                    let (head_twin, tail, size) = {
                        let u = self.long_at(i);
                        (
                            u.seq.get_kmer(0, k).twin(k),
                            u.seq.get_kmer(u.seq.len() - k, k),
                            u.seq.len(),
                        )
                    };
                    let cm = UnitigMap {
                        kind: UnitigKind::Long,
                        id: i,
                        dist: 0,
                        len: 1,
                        size,
                        strand: true,
                    };
                    if joins.get(&tail).is_none() {
                        if let Some(fw) = self.check_join(tail, &cm) {
                            joins.insert(fw.twin(k), tail);
                        }
                    }
                    if joins.get(&head_twin).is_none() {
                        if let Some(bw) = self.check_join(head_twin, &cm) {
                            joins.insert(bw.twin(k), head_twin);
                        }
                    }
                }
            }
            Some(v) => {
                for i in 0..v.len() {
                    let mut km = v[i];
                    let Some(cm) = self.find(km, true) else { continue };
                    if cm.kind == UnitigKind::Long {
                        if (cm.dist == 0 && cm.strand) || (cm.dist != 0 && !cm.strand) {
                            km = km.twin(k);
                        }
                        if let Some(fw) = self.check_join(km, &cm) {
                            joins.insert(fw.twin(k), km);
                        }
                    } else {
                        if let Some(fw) = self.check_join(km, &cm) {
                            joins.insert(fw.twin(k), km);
                        }
                        let km2 = km.twin(k);
                        if let Some(fw) = self.check_join(km2, &cm) {
                            joins.insert(fw.twin(k), km2);
                        }
                    }
                }
                v.clear();
            }
        }

        for slot in joins.occupied_slots() {
            let (key, head) = {
                let (key, head) = joins.entry_at(slot).unwrap();
                (*key, *head)
            };
            let tail = key.twin(k);

            let Some(mut cm_head) = self.find(head, true) else { continue };
            let Some(mut cm_tail) = self.find(tail, true) else { continue };

            let cm_head_head = self.head_kmer(cm_head.kind, cm_head.id);
            let cm_tail_head = self.head_kmer(cm_tail.kind, cm_tail.id);
            if cm_head_head == cm_tail_head {
                // hairpin, loop, or mobius loop: a sequence cannot join itself
                continue;
            }

            // both k-mers must still be extremities, in a known orientation
            let len_k_head = cm_head.kind != UnitigKind::Long;
            let head_at_tail = !len_k_head && {
                let u = self.long_at(cm_head.id);
                head == u.seq.get_kmer(u.seq.len() - k, k)
            };
            let head_dir = if (len_k_head && head == cm_head_head) || head_at_tail {
                true
            } else if head.twin(k) == cm_head_head {
                false
            } else {
                continue;
            };

            let len_k_tail = cm_tail.kind != UnitigKind::Long;
            let tail_twin_at_tail = !len_k_tail && {
                let u = self.long_at(cm_tail.id);
                tail.twin(k) == u.seq.get_kmer(u.seq.len() - k, k)
            };
            let tail_dir = if tail == cm_tail_head {
                true
            } else if len_k_tail {
                if tail.twin(k) == cm_tail_head {
                    false
                } else {
                    continue;
                }
            } else if tail_twin_at_tail {
                false
            } else {
                continue;
            };

            // assemble the joined sequence with the right orientations
            let head_seq: Vec<u8> = if head_dir {
                if len_k_head {
                    cm_head_head.to_string(k).into_bytes()
                } else {
                    self.long_at(cm_head.id).seq.to_string().into_bytes()
                }
            } else if len_k_head {
                cm_head_head.twin(k).to_string(k).into_bytes()
            } else {
                self.long_at(cm_head.id).seq.rev().to_string().into_bytes()
            };
            let tail_seq: Vec<u8> = if tail_dir {
                if len_k_tail {
                    cm_tail_head.to_string(k).into_bytes()
                } else {
                    self.long_at(cm_tail.id).seq.to_string().into_bytes()
                }
            } else if len_k_tail {
                cm_tail_head.twin(k).to_string(k).into_bytes()
            } else {
                self.long_at(cm_tail.id).seq.rev().to_string().into_bytes()
            };
            debug_assert_eq!(
                &head_seq[head_seq.len() + 1 - k..],
                &tail_seq[..k - 1],
                "join candidates must overlap by k-1 bases"
            );
            let mut join_seq = head_seq;
            join_seq.extend_from_slice(&tail_seq[k - 1..]);

            // combined coverage
            let covsum_of = |st: &Self, cm: &UnitigMap| -> u64 {
                match cm.kind {
                    UnitigKind::Short => {
                        let cc = &st.v_kmers[cm.id].ccov;
                        if cc.is_full() {
                            CompressedCoverage::COV_FULL as u64
                        } else {
                            cc.cov_at(0) as u64
                        }
                    }
                    UnitigKind::Abundant => {
                        let cc = st.h_kmers_ccov.entry_at(cm.id).unwrap().1;
                        if cc.is_full() {
                            CompressedCoverage::COV_FULL as u64
                        } else {
                            cc.cov_at(0) as u64
                        }
                    }
                    UnitigKind::Long => st.long_at(cm.id).coveragesum,
                }
            };
            let covsum = covsum_of(self, &cm_head) + covsum_of(self, &cm_tail);

            // delete the two sources, keeping indices of the other patched
            if cm_head.kind == UnitigKind::Short {
                v_kmers_size -= 1;
                if cm_head.id != v_kmers_size {
                    self.swap_unitigs(true, cm_head.id, v_kmers_size);
                    if cm_tail.kind == UnitigKind::Short && v_kmers_size == cm_tail.id {
                        cm_tail.id = cm_head.id;
                    }
                }
                self.delete_unitig(true, false, v_kmers_size);
            } else if cm_head.kind == UnitigKind::Abundant {
                self.delete_unitig(false, true, cm_head.id);
            }

            if cm_tail.kind == UnitigKind::Short {
                v_kmers_size -= 1;
                if cm_tail.id != v_kmers_size {
                    self.swap_unitigs(true, cm_tail.id, v_kmers_size);
                    if cm_head.kind == UnitigKind::Short && v_kmers_size == cm_head.id {
                        cm_head.id = cm_tail.id;
                    }
                }
                self.delete_unitig(true, false, v_kmers_size);
            } else if cm_tail.kind == UnitigKind::Abundant {
                self.delete_unitig(false, true, cm_tail.id);
            }

            let target_id;
            if len_k_head && len_k_tail {
                self.add_unitig(&join_seq, v_unitigs_size);
                target_id = v_unitigs_size;
                v_unitigs_size += 1;
            } else if len_k_head {
                self.delete_unitig(false, false, cm_tail.id);
                self.add_unitig(&join_seq, cm_tail.id);
                target_id = cm_tail.id;
            } else {
                if !len_k_tail {
                    v_unitigs_size -= 1;
                    if cm_tail.id != v_unitigs_size {
                        self.swap_unitigs(false, cm_tail.id, v_unitigs_size);
                        if v_unitigs_size == cm_head.id {
                            cm_head.id = cm_tail.id;
                        }
                    }
                    self.delete_unitig(false, false, v_unitigs_size);
                }
                self.delete_unitig(false, false, cm_head.id);
                self.add_unitig(&join_seq, cm_head.id);
                target_id = cm_head.id;
            }

            let num_kmers = join_seq.len() + 1 - k;
            let u = self.v_unitigs[target_id].as_mut().unwrap();
            u.coveragesum = covsum;
            if covsum >= CompressedCoverage::COV_FULL as u64 * num_kmers as u64 {
                u.ccov.set_full();
            }
            joined += 1;
        }

        if v_unitigs_size < self.v_unitigs.len() {
            self.v_unitigs.truncate(v_unitigs_size);
        }
        if v_kmers_size < self.v_kmers.len() {
            self.v_kmers.truncate(v_kmers_size);
        }
        joined
    }

    // -----------------------------------------------------------------------
    // Tip and isolated-unitig removal
    // -----------------------------------------------------------------------

    /// Delete unitigs shorter than k k-mers whose total neighbor count is at
    /// most the clipping limit (1 when clipping tips, 0 when only removing
    /// isolated unitigs). For each clipped pendant tip, the surviving
    /// neighbor k-mer is appended to `v` for a later targeted join pass.
    /// Returns the number of removed unitigs.
    pub fn remove_unitigs(
        &mut self,
        rm_isolated: bool,
        clip_tips: bool,
        v: &mut Vec<Kmer>,
    ) -> usize {
        if !rm_isolated && !clip_tips {
            return 0;
        }
        let rm_and_clip = rm_isolated && clip_tips;
        let k = self.k();
        let lim = if clip_tips { 1 } else { 0 };
        let mut removed = 0usize;

        let mut v_unitigs_sz = self.v_unitigs.len();
        let mut j = 0usize;
        while j < v_unitigs_sz {
            let (head, tail, num_kmers) = {
                let u = self.long_at(j);
                (
                    u.seq.get_kmer(0, k),
                    u.seq.get_kmer(u.seq.len() - k, k),
                    u.num_kmers(k),
                )
            };
            if num_kmers >= k {
                j += 1;
                continue;
            }
            let (nb_pred, km_pred) = self.count_neighbors(head, false, lim);
            if nb_pred > lim {
                j += 1;
                continue;
            }
            let (nb_succ, km_succ) = self.count_neighbors(tail, true, lim);
            let total = nb_pred + nb_succ;
            if (rm_and_clip && total <= lim) || (!rm_and_clip && total == lim) {
                removed += 1;
                v_unitigs_sz -= 1;
                if j != v_unitigs_sz {
                    self.swap_unitigs(false, j, v_unitigs_sz);
                } else {
                    j += 1;
                }
                if clip_tips && total == lim {
                    v.push(km_succ.or(km_pred).unwrap());
                }
            } else {
                j += 1;
            }
        }

        let mut v_kmers_sz = self.v_kmers.len();
        let mut j = 0usize;
        while j < v_kmers_sz {
            let km = self.v_kmers[j].km;
            if km.is_deleted() {
                j += 1;
                continue;
            }
            let (nb_pred, km_pred) = self.count_neighbors(km, false, lim);
            if nb_pred > lim {
                j += 1;
                continue;
            }
            let (nb_succ, km_succ) = self.count_neighbors(km, true, lim);
            let total = nb_pred + nb_succ;
            if (rm_and_clip && total <= lim) || (!rm_and_clip && total == lim) {
                removed += 1;
                v_kmers_sz -= 1;
                if j != v_kmers_sz {
                    self.swap_unitigs(true, j, v_kmers_sz);
                } else {
                    j += 1;
                }
                if clip_tips && total == lim {
                    v.push(km_succ.or(km_pred).unwrap());
                }
            } else {
                j += 1;
            }
        }

        let mut doomed_abundant = Vec::new();
        for slot in self.h_kmers_ccov.occupied_slots() {
            let km = *self.h_kmers_ccov.entry_at(slot).unwrap().0;
            let (nb_pred, km_pred) = self.count_neighbors(km, false, lim);
            if nb_pred > lim {
                continue;
            }
            let (nb_succ, km_succ) = self.count_neighbors(km, true, lim);
            let total = nb_pred + nb_succ;
            if (rm_and_clip && total <= lim) || (!rm_and_clip && total == lim) {
                removed += 1;
                doomed_abundant.push(slot);
                if clip_tips && total == lim {
                    v.push(km_succ.or(km_pred).unwrap());
                }
            }
        }

        for j in v_unitigs_sz..self.v_unitigs.len() {
            self.delete_unitig(false, false, j);
        }
        self.v_unitigs.truncate(v_unitigs_sz);
        for j in v_kmers_sz..self.v_kmers.len() {
            self.delete_unitig(true, false, j);
        }
        self.v_kmers.truncate(v_kmers_sz);
        for slot in doomed_abundant {
            self.delete_unitig(false, true, slot);
        }

        removed
    }

    /// Count stored neighbors of `km` in one direction, stopping once the
    /// count exceeds `lim`; also reports the last neighbor seen.
    fn count_neighbors(
        &self,
        km: Kmer,
        forward: bool,
        lim: usize,
    ) -> (usize, Option<Kmer>) {
        let k = self.k();
        let mut nb = 0usize;
        let mut last = None;
        for b in 0..4u64 {
            if nb > lim {
                break;
            }
            let n = if forward {
                km.forward_base(k, b)
            } else {
                km.backward_base(k, b)
            };
            if self.find(n, true).is_some() {
                nb += 1;
                last = Some(n);
            }
        }
        (nb, last)
    }

    // -----------------------------------------------------------------------
    // False-positive tip repair
    // -----------------------------------------------------------------------

    /// For every recorded candidate tip that actually made it into the
    /// store, locate its unique neighbor; if that neighbor sits in the
    /// interior of a long unitig, split the unitig at the attachment point
    /// so the tip hangs off a clean extremity.
    pub fn check_fp_tips(&mut self, ignored_km_tips: &[Kmer]) {
        let k = self.k();
        let mut cur = SplitCursor {
            pos: 0,
            nxt_insert: self.v_unitigs.len(),
            v_unitigs_sz: self.v_unitigs.len(),
            v_kmers_sz: self.v_kmers.len(),
        };

        for &km in ignored_km_tips {
            if self.find(km, true).is_none() {
                continue;
            }
            let mut not_found = true;

            for b in 0..4u64 {
                if !not_found {
                    break;
                }
                let bw = km.backward_base(k, b);
                if let Some(mut cm) = self.find(bw, false) {
                    if cm.kind != UnitigKind::Long {
                        continue;
                    }
                    if cm.strand {
                        cm.dist += 1;
                    }
                    if cm.dist != 0 && cm.dist != cm.size + 1 - k {
                        let sp = [(0, cm.dist), (cm.dist, cm.size + 1 - k)];
                        cur.pos = cm.id;
                        self.split_unitig(&mut cur, &sp);
                    }
                    not_found = false;
                }
            }

            for b in 0..4u64 {
                if !not_found {
                    break;
                }
                let fw = km.forward_base(k, b);
                if let Some(mut cm) = self.find(fw, false) {
                    if cm.kind != UnitigKind::Long {
                        continue;
                    }
                    if !cm.strand {
                        cm.dist += 1;
                    }
                    if cm.dist != 0 && cm.dist != cm.size + 1 - k {
                        let sp = [(0, cm.dist), (cm.dist, cm.size + 1 - k)];
                        cur.pos = cm.id;
                        self.split_unitig(&mut cur, &sp);
                    }
                    not_found = false;
                }
            }
        }

        if cur.nxt_insert < self.v_unitigs.len() {
            self.v_unitigs.truncate(cur.nxt_insert);
        }
        if cur.v_kmers_sz < self.v_kmers.len() {
            self.v_kmers.truncate(cur.v_kmers_sz);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn km(s: &[u8]) -> Kmer {
        Kmer::from_ascii(s).unwrap()
    }

    /// A store holding one saturated long unitig.
    fn store_with_full(seqs: &[&[u8]]) -> UnitigStore {
        let k = 5;
        let mut st = UnitigStore::new(k, 3);
        let mut longs = 0usize;
        let mut shorts = 0usize;
        for s in seqs {
            if s.len() == k {
                st.add_unitig(s, shorts);
                st.v_kmers[shorts].ccov.set_full();
                shorts += 1;
            } else {
                st.add_unitig(s, longs);
                let u = st.v_unitigs[longs].as_mut().unwrap();
                u.ccov.set_full();
                u.coveragesum = 2 * (s.len() + 1 - k) as u64;
                longs += 1;
            }
        }
        st
    }

    #[test]
    fn test_split_all_noop_when_full() {
        let mut st = store_with_full(&[b"ACCGTGATTA"]);
        let (split, deleted) = st.split_all_unitigs();
        assert_eq!((split, deleted), (0, 0));
        assert_eq!(st.num_longs(), 1);
        st.check_index_coherence().unwrap();
    }

    #[test]
    fn test_split_deletes_uncovered() {
        let mut st = UnitigStore::new(5, 3);
        st.add_unitig(b"ACCGTGATTA", 0);
        // coverage never recorded: everything is low
        let (split, deleted) = st.split_all_unitigs();
        assert_eq!((split, deleted), (0, 1));
        assert_eq!(st.num_longs(), 0);
        assert!(st.find(km(b"ACCGT"), false).is_none());
        st.check_index_coherence().unwrap();
    }

    #[test]
    fn test_split_keeps_covered_segment() {
        let mut st = UnitigStore::new(5, 3);
        st.add_unitig(b"ACCGTGATTA", 0);
        {
            let u = st.v_unitigs[0].as_mut().unwrap();
            // saturate k-mer positions 0..=2 only (6 k-mers total)
            u.ccov.cover(0, 2);
            u.ccov.cover(0, 2);
            u.coveragesum = 6;
        }
        let (split, deleted) = st.split_all_unitigs();
        assert_eq!((split, deleted), (1, 0));
        assert_eq!(st.num_longs(), 1);
        // surviving segment covers k-mer starts 0..=2: ACCGTGA
        assert!(st.find(km(b"ACCGT"), false).is_some());
        assert!(st.find(km(b"CGTGA"), false).is_some());
        assert!(st.find(km(b"GATTA"), false).is_none());
        assert!(st.long_at(0).ccov.is_full());
        st.check_index_coherence().unwrap();
    }

    #[test]
    fn test_split_then_join_restores() {
        let mut st = store_with_full(&[b"ACCGTGATTACAGT"]);
        let original = st.long_at(0).seq.to_string();

        st.split_at(0, 5);
        assert_eq!(st.num_longs(), 2);
        st.check_index_coherence().unwrap();

        let joined = st.join_all_unitigs(None);
        assert_eq!(joined, 1);
        assert_eq!(st.num_longs(), 1);
        let restored = st.long_at(0).seq.to_string();
        let twin = st.long_at(0).seq.rev().to_string();
        assert!(restored == original || twin == original);
        st.check_index_coherence().unwrap();
    }

    #[test]
    fn test_join_idempotent() {
        let mut st = store_with_full(&[b"ACCGTGATTACAGT"]);
        st.split_at(0, 5);
        assert_eq!(st.join_all_unitigs(None), 1);
        assert_eq!(st.join_all_unitigs(None), 0);
    }

    #[test]
    fn test_join_does_not_cross_branch() {
        // GATTA and CATTA both precede ATTAC: the junction is ambiguous
        let mut st = store_with_full(&[b"ATTACAGTCC", b"GATTA", b"CATTA"]);
        assert_eq!(st.join_all_unitigs(None), 0);
        assert_eq!(st.num_longs(), 1);
        assert_eq!(st.num_shorts(), 2);
        st.check_index_coherence().unwrap();
    }

    #[test]
    fn test_clip_tip_and_rejoin() {
        // backbone ACCGTGATTA + ATTACAGT split at the junction by the side
        // tip CATTA; clipping the tip must report the junction k-mer and a
        // targeted join must reunite the backbone
        let mut st = store_with_full(&[b"ACCGTGATTA", b"ATTACAGT", b"CATTA"]);
        st.check_index_coherence().unwrap();

        let mut seeds = Vec::new();
        let removed = st.remove_unitigs(false, true, &mut seeds);
        assert_eq!(removed, 1);
        assert!(st.find(km(b"CATTA"), false).is_none());
        assert_eq!(seeds, vec![km(b"ATTAC")]);
        assert_eq!(st.num_longs(), 2);
        st.check_index_coherence().unwrap();

        let joined = st.join_all_unitigs(Some(&mut seeds));
        assert_eq!(joined, 1);
        assert!(seeds.is_empty());
        assert_eq!(st.num_longs(), 1);
        let merged = st.long_at(0).seq.to_string();
        let want = "ACCGTGATTACAGT";
        let want_rc = "ACTGTAATCACGGT";
        assert!(merged == want || merged == want_rc, "got {merged}");
        st.check_index_coherence().unwrap();
    }

    #[test]
    fn test_remove_isolated() {
        let mut st = store_with_full(&[b"GGCCAATTGG", b"ACCGT"]);
        // ACCGT is isolated; the long unitig has >= k k-mers and is immune
        let mut seeds = Vec::new();
        let removed = st.remove_unitigs(true, false, &mut seeds);
        assert_eq!(removed, 1);
        assert!(seeds.is_empty());
        assert_eq!(st.num_shorts(), 0);
        assert_eq!(st.num_longs(), 1);
        st.check_index_coherence().unwrap();
    }

    #[test]
    fn test_check_fp_tips_splits_interior_attachment() {
        // tip GATTA attaches forward onto ATTAC, which sits mid-unitig
        let mut st = store_with_full(&[b"CCATTACAGT", b"GATTA"]);
        st.check_index_coherence().unwrap();

        let tips = vec![km(b"GATTA").rep(5)];
        st.check_fp_tips(&tips);
        st.check_index_coherence().unwrap();

        // the long unitig was split at the attachment offset into CCATTA
        // and ATTACAGT; the tip itself is untouched
        assert_eq!(st.num_longs(), 2);
        assert_eq!(st.num_shorts(), 1);
        let um = st.find(km(b"ATTAC"), true).expect("attachment now an extremity");
        assert_eq!(um.dist, 0);
    }
}
