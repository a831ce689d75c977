//! Graph construction pipeline.
//!
//! Three sequential passes over the input followed by surgery rounds:
//!
//! 1. a counting pass sizes the bloom filter;
//! 2. a fill pass inserts every k-mer of every read into the filter;
//! 3. a construction pass walks each read, jump-mapping k-mers that already
//!    belong to stored unitigs and seeding walker extensions for the rest.
//!
//! A freshly built unitig is left un-consumed at its seed position so the
//! next loop iteration maps the read onto it again; read-supported k-mers
//! therefore reach saturation coverage and survive the coverage split.
//! After construction: coverage splitting, repair around recorded
//! false-positive tips, a global join pass, and (optionally) tip clipping /
//! isolated-unitig removal with a targeted re-join.

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::graph::bloom::BlockedBloomFilter;
use crate::graph::store::UnitigStore;
use crate::graph::walker::{bloom_key, Walker};
use crate::graph::GraphConfig;
use crate::io::file_parser::FileParser;
use crate::kmer::{Kmer, KmerScanner};
use crate::minimizer::{window_min_hash, MinHashIterator};

/// Summary counters from one build run.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub nb_reads: u64,
    pub nb_kmer_positions: u64,
    pub nb_split: usize,
    pub nb_deleted: usize,
    pub nb_joined: usize,
    pub nb_removed: usize,
    pub nb_long: usize,
    pub nb_short: usize,
    pub nb_abundant: usize,
}

/// Build the compacted graph from the given sequence files into `store`.
pub fn build_graph(
    store: &mut UnitigStore,
    cfg: &GraphConfig,
    files: &[PathBuf],
) -> Result<BuildStats> {
    let k = store.k();
    let g = store.g();
    let mut stats = BuildStats::default();

    // pass 1: size the filter
    let mut parser = FileParser::open(files)?;
    while let Some((seq, _)) = parser.read_next()? {
        stats.nb_reads += 1;
        stats.nb_kmer_positions += KmerScanner::new(seq.as_bytes(), k).count() as u64;
    }
    info!(
        "{} reads, {} k-mer positions",
        stats.nb_reads, stats.nb_kmer_positions
    );

    // pass 2: fill the filter
    let mut bf = BlockedBloomFilter::new(
        stats.nb_kmer_positions as usize,
        cfg.bloom_bits_per_kmer,
        cfg.bloom_hashes,
    );
    let mut parser = FileParser::open(files)?;
    while let Some((seq, _)) = parser.read_next()? {
        let bytes = seq.as_bytes();
        for (pos, km) in KmerScanner::new(bytes, k) {
            let block = bf.get_block(window_min_hash(&bytes[pos..pos + k], g));
            bf.insert(bloom_key(km, k), block);
        }
    }
    info!("bloom filter filled ({} blocks)", bf.num_blocks());

    // pass 3: construct unitigs
    let walker = Walker::new(&bf, k, g);
    let mut ignored_tips: Vec<Kmer> = Vec::new();
    let mut parser = FileParser::open(files)?;
    while let Some((seq, _)) = parser.read_next()? {
        let bytes = seq.as_bytes();
        if bytes.len() < k {
            continue;
        }
        let scan = MinHashIterator::new(bytes, k, g);
        let mut pos = 0usize;
        while pos + k <= bytes.len() {
            let Some(km) = Kmer::from_ascii(&bytes[pos..pos + k]) else {
                pos += 1;
                continue;
            };
            if let Some(um) = store.find_unitig(km, bytes, pos, &scan) {
                store.map_read(&um);
                pos += um.len;
            } else if walker.bf_has(km) {
                if !add_unitig_sequence(store, &walker, km, bytes, pos, &scan, &mut ignored_tips)
                {
                    pos += 1;
                }
                // on success the same position is revisited and maps onto
                // the new unitig
            } else {
                pos += 1;
            }
        }
    }
    info!(
        "constructed {} unitigs ({} long, {} short, {} abundant)",
        store.unitig_count(),
        store.num_longs(),
        store.num_shorts(),
        store.num_abundant()
    );

    let (split, deleted) = store.split_all_unitigs();
    stats.nb_split = split;
    stats.nb_deleted = deleted;
    info!("coverage split: {split} split, {deleted} deleted");

    ignored_tips.sort_unstable();
    ignored_tips.dedup();
    if !ignored_tips.is_empty() {
        info!("checking {} candidate tips", ignored_tips.len());
        store.check_fp_tips(&ignored_tips);
    }

    stats.nb_joined = store.join_all_unitigs(None);
    info!("joined {} unitig pairs", stats.nb_joined);

    if cfg.clip_tips || cfg.rm_isolated {
        let mut seeds = Vec::new();
        stats.nb_removed = store.remove_unitigs(cfg.rm_isolated, cfg.clip_tips, &mut seeds);
        let rejoined = store.join_all_unitigs(Some(&mut seeds));
        stats.nb_joined += rejoined;
        info!(
            "removed {} unitigs, re-joined {} pairs",
            stats.nb_removed, rejoined
        );
    }

    stats.nb_long = store.num_longs();
    stats.nb_short = store.num_shorts();
    stats.nb_abundant = store.num_abundant();
    Ok(stats)
}

/// Extend `km` into its maximal unitig and insert it, recording coverage for
/// the stretch of the read it was seeded from. Returns false when the seed
/// could not be mapped even after insertion.
fn add_unitig_sequence(
    store: &mut UnitigStore,
    walker: &Walker,
    km: Kmer,
    read: &[u8],
    pos: usize,
    scan: &MinHashIterator,
    ignored_tips: &mut Vec<Kmer>,
) -> bool {
    let k = store.k();
    let (s, self_loop, _is_isolated) = walker.find_unitig_sequence(km, ignored_tips);

    if self_loop {
        // a loop or hairpin: cover what exists, insert once if nothing does
        let mut found_any = false;
        for (_, km2) in KmerScanner::new(&s, k) {
            if let Some(um) = store.find(km2, false) {
                store.map_read(&um);
                found_any = true;
            }
        }
        if !found_any {
            let is_short = s.len() == k;
            let id = if is_short {
                store.v_kmers.len()
            } else {
                store.v_unitigs.len()
            };
            let is_abundant = store.add_unitig(&s, id);
            store.mark_self_loop(is_short && !is_abundant, is_abundant, id);
            for (_, km2) in KmerScanner::new(&s, k) {
                if let Some(um) = store.find(km2, false) {
                    store.map_read(&um);
                }
            }
        }
        // the seed itself can remain uncovered when the loop was only
        // partially present; the caller must then move on
        return store.find(km, false).is_some();
    }

    let mut cm = store.find_unitig(km, read, pos, scan);
    if cm.is_none() {
        let id = if s.len() == k {
            store.v_kmers.len()
        } else {
            store.v_unitigs.len()
        };
        store.add_unitig(&s, id);
        cm = store.find_unitig(km, read, pos, scan);
    }
    match cm {
        Some(um) => {
            store.map_read(&um);
            true
        }
        None => false,
    }
}
