//! GFA v1 output (and a minimal reader for round trips).
//!
//! Segments are numbered from 1: long unitigs first in slot order, then
//! single-k-mer unitigs, then abundant k-mers in table order. Links come
//! from probing the four possible neighbors of every extremity of every
//! unitig (self-loops included): a head-side hit is written as
//! `L A - B s`, a tail-side hit as `L A + B s`. A line whose symmetric
//! rendering (`b, !db, a, !da`) was already written is suppressed, so no
//! link is double-counted.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::graph::hash_table::SlotTable;
use crate::graph::store::{UnitigKind, UnitigMap, UnitigStore};
use crate::kmer::Kmer;

/// One parsed `S` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GfaSegment {
    pub id: usize,
    pub seq: String,
    pub cov: u64,
}

/// Parsed GFA content: segments plus raw link lines.
#[derive(Debug, Default)]
pub struct GfaContent {
    pub segments: Vec<GfaSegment>,
    pub links: Vec<String>,
}

/// Write the graph to `path` as GFA v1.
pub fn write_gfa(store: &UnitigStore, path: &Path) -> Result<()> {
    let k = store.k();
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut w = BufWriter::new(file);

    writeln!(w, "H\tVN:Z:1.0")?;

    let v_unitigs_sz = store.v_unitigs.len();
    let v_kmers_sz = store.v_kmers.len();

    // S records, long then short then abundant
    for (i, u) in store.v_unitigs.iter().enumerate() {
        let u = u.as_ref().expect("graph is compact at write time");
        writeln!(
            w,
            "S\t{}\t{}\tLN:i:{}\tXC:i:{}",
            i + 1,
            u.seq.to_string(),
            u.seq.len(),
            u.coveragesum
        )?;
    }
    for (i, e) in store.v_kmers.iter().enumerate() {
        let cov = if e.ccov.is_full() {
            crate::graph::coverage::CompressedCoverage::COV_FULL
        } else {
            e.ccov.cov_at(0)
        };
        writeln!(
            w,
            "S\t{}\t{}\tLN:i:{}\tXC:i:{}",
            i + 1 + v_unitigs_sz,
            e.km.to_string(k),
            k,
            cov
        )?;
    }
    let mut idmap: SlotTable<Kmer, usize> = SlotTable::with_capacity(store.num_abundant());
    let mut next_label = v_unitigs_sz + v_kmers_sz;
    for (_, km, cc) in store.h_kmers_ccov.iter() {
        next_label += 1;
        idmap.insert(*km, next_label);
        let cov = if cc.is_full() {
            crate::graph::coverage::CompressedCoverage::COV_FULL
        } else {
            cc.cov_at(0)
        };
        writeln!(
            w,
            "S\t{}\t{}\tLN:i:{}\tXC:i:{}",
            next_label,
            km.to_string(k),
            k,
            cov
        )?;
    }

    // L records: probe the four possible neighbors of each extremity
    let label_of = |cand: &UnitigMap, probed: Kmer| -> usize {
        match cand.kind {
            UnitigKind::Long => cand.id + 1,
            UnitigKind::Short => cand.id + 1 + v_unitigs_sz,
            UnitigKind::Abundant => *idmap
                .get(&probed.rep(k))
                .expect("abundant neighbor has a label"),
        }
    };

    let mut seen: HashSet<(usize, bool, usize, bool), ahash::RandomState> =
        HashSet::default();
    let mut links: Vec<(usize, bool, usize, bool)> = Vec::new();
    let mut push_edge = |seen: &mut HashSet<(usize, bool, usize, bool), ahash::RandomState>,
                         links: &mut Vec<(usize, bool, usize, bool)>,
                         from: (usize, bool),
                         to: (usize, bool)| {
        let edge = (from.0, from.1, to.0, to.1);
        let flipped = (to.0, !to.1, from.0, !from.1);
        if seen.contains(&flipped) {
            return;
        }
        if seen.insert(edge) {
            links.push(edge);
        }
    };

    let mut probe_extremities = |label: usize, head: Kmer, tail: Kmer| {
        for b in 0..4u64 {
            let n = head.backward_base(k, b);
            if let Some(cand) = store.find(n, true) {
                push_edge(
                    &mut seen,
                    &mut links,
                    (label, false),
                    (label_of(&cand, n), cand.strand),
                );
            }
        }
        for b in 0..4u64 {
            let n = tail.forward_base(k, b);
            if let Some(cand) = store.find(n, true) {
                push_edge(
                    &mut seen,
                    &mut links,
                    (label, true),
                    (label_of(&cand, n), cand.strand),
                );
            }
        }
    };

    for (i, u) in store.v_unitigs.iter().enumerate() {
        let u = u.as_ref().unwrap();
        let head = u.seq.get_kmer(0, k);
        let tail = u.seq.get_kmer(u.seq.len() - k, k);
        probe_extremities(i + 1, head, tail);
    }
    for (i, e) in store.v_kmers.iter().enumerate() {
        probe_extremities(i + 1 + v_unitigs_sz, e.km, e.km);
    }
    for (_, km, _) in store.h_kmers_ccov.iter() {
        let label = *idmap.get(km).unwrap();
        probe_extremities(label, *km, *km);
    }

    for (a, da, b, db) in links {
        writeln!(
            w,
            "L\t{}\t{}\t{}\t{}\t{}M",
            a,
            if da { '+' } else { '-' },
            b,
            if db { '+' } else { '-' },
            k - 1
        )?;
    }

    w.flush()?;
    Ok(())
}

/// Parse a GFA v1 file back into its segments and raw link lines.
pub fn read_gfa(path: &Path) -> Result<GfaContent> {
    let file = File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut content = GfaContent::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        match fields[0] {
            "H" => {}
            "S" => {
                if fields.len() < 3 {
                    bail!("malformed S record at line {}", lineno + 1);
                }
                let id: usize = fields[1]
                    .parse()
                    .with_context(|| format!("bad segment id at line {}", lineno + 1))?;
                let seq = fields[2].to_string();
                let mut cov = 0u64;
                for tag in &fields[3..] {
                    if let Some(v) = tag.strip_prefix("XC:i:") {
                        cov = v
                            .parse()
                            .with_context(|| format!("bad XC tag at line {}", lineno + 1))?;
                    }
                }
                content.segments.push(GfaSegment { id, seq, cov });
            }
            "L" => content.links.push(line.clone()),
            _ => {}
        }
    }
    Ok(content)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::UnitigStore;

    #[test]
    fn test_write_then_read_segments() {
        let mut st = UnitigStore::new(5, 3);
        st.add_unitig(b"ACCGTGATTA", 0);
        st.v_unitigs[0].as_mut().unwrap().coveragesum = 12;
        st.add_unitig(b"CATTA", 0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.gfa");
        write_gfa(&st, &path).unwrap();

        let content = read_gfa(&path).unwrap();
        assert_eq!(content.segments.len(), 2);
        assert_eq!(content.segments[0].id, 1);
        assert_eq!(content.segments[0].seq, "ACCGTGATTA");
        assert_eq!(content.segments[0].cov, 12);
        assert_eq!(content.segments[1].id, 2);
        assert_eq!(content.segments[1].seq, "CATTA");
    }

    #[test]
    fn test_link_rendered_from_both_endpoints() {
        // CATTA -> ATTACAGT: discovered by the long unitig's head probe and
        // by the short unitig's tail probe, two renderings of one overlap
        let mut st = UnitigStore::new(5, 3);
        st.add_unitig(b"ATTACAGT", 0);
        st.add_unitig(b"CATTA", 0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.gfa");
        write_gfa(&st, &path).unwrap();

        let content = read_gfa(&path).unwrap();
        assert_eq!(content.segments.len(), 2);
        assert_eq!(
            content.links,
            vec![
                "L\t1\t-\t2\t+\t4M".to_string(),
                "L\t2\t+\t1\t+\t4M".to_string(),
            ]
        );
    }

    #[test]
    fn test_self_loop_links_not_double_counted() {
        // a homopolymer loops onto itself; each extremity probe finds it
        // once, and the two lines are distinct renderings, not duplicates
        let mut st = UnitigStore::new(4, 2);
        st.add_unitig(b"AAAA", 0);
        st.mark_self_loop(true, false, 0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.gfa");
        write_gfa(&st, &path).unwrap();

        let content = read_gfa(&path).unwrap();
        assert_eq!(content.segments.len(), 1);
        assert_eq!(
            content.links,
            vec![
                "L\t1\t-\t1\t+\t3M".to_string(),
                "L\t1\t+\t1\t+\t3M".to_string(),
            ]
        );
    }
}
