//! Parallel read → unitig color attachment.
//!
//! Files are processed one at a time: a pool of scoped workers pulls
//! batches of read windows from a mutex-guarded reader, maps each window's
//! k-mers onto stored unitigs (jump-extending along the window so one
//! lookup covers a run of k-mers), and adds the file's color to the
//! resolved color set under that slot's lock. Between files, and once more
//! at the end, every color set is compacted.
//!
//! Long reads are sliced into windows of [`WINDOW_LEN`] bases overlapping
//! by `k - 1`, so every k-mer of the read appears in exactly one window.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{anyhow, ensure, Context, Result};
use parking_lot::Mutex;
use tracing::info;

use crate::color::storage::ColorStorage;
use crate::graph::store::UnitigStore;
use crate::io::file_parser::FileParser;
use crate::kmer::{Kmer, KmerScanner};
use crate::minimizer::MinHashIterator;

/// Window length for long-read slicing.
const WINDOW_LEN: usize = 1000;

/// Windows pulled per lock acquisition.
const BATCH_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// Window source
// ---------------------------------------------------------------------------

/// Shared, mutex-guarded source of read windows for one file at a time.
struct WindowSource {
    parser: FileParser,
    /// A read pulled past the current file boundary, served first when the
    /// next file starts.
    pending: Option<(String, usize)>,
    k: usize,
}

impl WindowSource {
    /// Pull the next batch of windows belonging to `file_id` into `out`.
    /// Returns false once the file is drained.
    fn next_batch(&mut self, file_id: usize, out: &mut Vec<String>) -> Result<bool> {
        out.clear();
        while out.len() < BATCH_SIZE {
            let item = match self.pending.take() {
                Some(x) => Some(x),
                None => self.parser.read_next()?,
            };
            match item {
                None => break,
                Some((seq, fid)) if fid != file_id => {
                    self.pending = Some((seq, fid));
                    break;
                }
                Some((seq, _)) => slice_windows(&seq, self.k, out),
            }
        }
        Ok(!out.is_empty())
    }
}

/// Slice `seq` into overlapping windows so each k-mer lands in exactly one.
fn slice_windows(seq: &str, k: usize, out: &mut Vec<String>) {
    if seq.len() <= WINDOW_LEN {
        out.push(seq.to_string());
        return;
    }
    let stride = WINDOW_LEN - (k - 1);
    let mut start = 0usize;
    while start + k <= seq.len() {
        let end = (start + WINDOW_LEN).min(seq.len());
        out.push(seq[start..end].to_string());
        if end == seq.len() {
            break;
        }
        start += stride;
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Map every read of every file onto the graph, attaching each file's index
/// as a color to the color sets of the unitigs its k-mers land on.
pub fn map_colors(
    store: &UnitigStore,
    storage: &ColorStorage,
    files: &[PathBuf],
    nb_threads: usize,
) -> Result<()> {
    let parser = FileParser::open(files)?;
    let source = Mutex::new(WindowSource {
        parser,
        pending: None,
        k: store.k(),
    });
    let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    for file_id in 0..files.len() {
        crossbeam::scope(|scope| {
            for _ in 0..nb_threads.max(1) {
                scope.spawn(|_| {
                    let mut batch: Vec<String> = Vec::new();
                    loop {
                        let more = {
                            let mut src = source.lock();
                            src.next_batch(file_id, &mut batch)
                        };
                        match more {
                            Ok(true) => {
                                for w in &batch {
                                    process_window(store, storage, w.as_bytes(), file_id as u32);
                                }
                            }
                            Ok(false) => break,
                            Err(e) => {
                                let mut slot = first_error.lock();
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                                break;
                            }
                        }
                    }
                });
            }
        })
        .map_err(|e| anyhow!("color mapping worker panicked: {e:?}"))?;

        if let Some(e) = first_error.lock().take() {
            return Err(e);
        }
        storage.optimize_all();
        info!("colored file {} of {}", file_id + 1, files.len());
    }

    storage.optimize_all();
    Ok(())
}

/// Map one window's k-mers and add `color` to each hit unitig's set.
fn process_window(store: &UnitigStore, storage: &ColorStorage, bytes: &[u8], color: u32) {
    let k = store.k();
    if bytes.len() < k {
        return;
    }
    let scan = MinHashIterator::new(bytes, k, store.g());
    let mut pos = 0usize;
    while pos + k <= bytes.len() {
        let Some(km) = Kmer::from_ascii(&bytes[pos..pos + k]) else {
            pos += 1;
            continue;
        };
        match store.find_unitig(km, bytes, pos, &scan) {
            Some(um) => {
                let head = store.head_kmer(um.kind, um.id);
                if let Some(slot) = storage.slot_of(um.kind, um.id, head, k) {
                    storage.add_color(slot, color);
                }
                pos += um.len;
            }
            None => pos += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Verify the attached colors against a ground-truth table built directly
/// from the input: for every k-mer of file `i` that is present in the
/// graph, the color set of its unitig must contain `i`.
pub fn check_colors(
    store: &UnitigStore,
    storage: &ColorStorage,
    files: &[PathBuf],
) -> Result<()> {
    let k = store.k();
    let mut truth: HashMap<u64, HashSet<u32>, ahash::RandomState> = HashMap::default();

    let mut parser = FileParser::open(files)?;
    while let Some((seq, fid)) = parser.read_next()? {
        for (_, km) in KmerScanner::new(seq.as_bytes(), k) {
            truth
                .entry(km.rep(k).bits())
                .or_default()
                .insert(fid as u32);
        }
    }

    for (bits, colors) in &truth {
        let km = Kmer::from_bits(*bits);
        let Some(um) = store.find(km, false) else {
            // dropped by coverage surgery; nothing to check
            continue;
        };
        let head = store.head_kmer(um.kind, um.id);
        let got = storage
            .colors_of(um.kind, um.id, head, k)
            .with_context(|| format!("unitig of {} has no color slot", km.to_string(k)))?;
        for c in colors {
            ensure!(
                got.contains(c),
                "k-mer {} is missing color {c}",
                km.to_string(k)
            );
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
