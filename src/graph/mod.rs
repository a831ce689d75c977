//! The compacted de Bruijn graph: configuration, the unitig store, and the
//! build pipeline around it.

pub mod bloom;
pub mod build;
pub mod coverage;
pub mod hash_table;
pub mod ops;
pub mod store;
pub mod unitig;
pub mod walker;

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tracing::warn;

use crate::kmer::MAX_K;
pub use build::BuildStats;
pub use store::{UnitigKind, UnitigMap, UnitigStore};

// ---------------------------------------------------------------------------
// GraphConfig
// ---------------------------------------------------------------------------

/// Per-graph configuration. `k` and `g` are fixed for the lifetime of the
/// graph and recorded with any serialized output.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// K-mer length, `1 < g < k <= MAX_K`.
    pub k: usize,
    /// Minimizer length.
    pub g: usize,
    /// Worker threads for the color phase.
    pub threads: usize,
    /// Clip pendant tips after the first join pass.
    pub clip_tips: bool,
    /// Remove isolated short unitigs after the first join pass.
    pub rm_isolated: bool,
    /// Bloom filter sizing, bits per distinct k-mer position.
    pub bloom_bits_per_kmer: usize,
    /// Probe bits per bloom filter key.
    pub bloom_hashes: usize,
    /// Seed for color-slot hashing.
    pub seed: u64,
}

impl GraphConfig {
    pub fn new(k: usize, g: usize) -> Self {
        Self {
            k,
            g,
            threads: 1,
            clip_tips: false,
            rm_isolated: false,
            bloom_bits_per_kmer: 16,
            bloom_hashes: 4,
            seed: 1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.k < 3 || self.k > MAX_K {
            bail!("k-mer length {} out of range (3..={})", self.k, MAX_K);
        }
        if self.g < 1 || self.g >= self.k {
            bail!(
                "minimizer length {} out of range (1..{} for k = {})",
                self.g,
                self.k,
                self.k
            );
        }
        if self.threads == 0 {
            bail!("thread count must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CompactedDbg
// ---------------------------------------------------------------------------

/// Handle over one compacted graph.
///
/// Construction with invalid parameters does not fail loudly; it produces a
/// handle whose `invalid` flag is set, and every subsequent operation on it
/// returns an error without touching anything.
pub struct CompactedDbg {
    cfg: GraphConfig,
    store: Option<UnitigStore>,
    invalid: bool,
}

impl CompactedDbg {
    pub fn new(cfg: GraphConfig) -> Self {
        match cfg.validate() {
            Ok(()) => {
                let store = UnitigStore::new(cfg.k, cfg.g);
                Self {
                    cfg,
                    store: Some(store),
                    invalid: false,
                }
            }
            Err(e) => {
                warn!("invalid graph parameters: {e:#}");
                Self {
                    cfg,
                    store: None,
                    invalid: true,
                }
            }
        }
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.cfg.k
    }

    #[inline]
    pub fn g(&self) -> usize {
        self.cfg.g
    }

    #[inline]
    pub fn config(&self) -> &GraphConfig {
        &self.cfg
    }

    /// The unitig store. Panics on an invalid handle; use the build/write
    /// entry points for fallible access.
    pub fn store(&self) -> &UnitigStore {
        self.store.as_ref().expect("graph handle is invalid")
    }

    pub fn store_mut(&mut self) -> &mut UnitigStore {
        self.store.as_mut().expect("graph handle is invalid")
    }

    /// Build the graph from the given sequence files.
    pub fn build(&mut self, files: &[PathBuf]) -> Result<BuildStats> {
        if self.invalid {
            bail!("graph handle is invalid; construction refused");
        }
        let store = self.store.as_mut().unwrap();
        build::build_graph(store, &self.cfg, files)
    }

    /// Write the graph to `path` in GFA v1.
    pub fn write_gfa(&self, path: &Path) -> Result<()> {
        if self.invalid {
            bail!("graph handle is invalid; nothing to write");
        }
        crate::io::gfa::write_gfa(self.store.as_ref().unwrap(), path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(GraphConfig::new(5, 3).validate().is_ok());
        assert!(GraphConfig::new(5, 5).validate().is_err());
        assert!(GraphConfig::new(5, 0).validate().is_err());
        assert!(GraphConfig::new(64, 21).validate().is_err());
        assert!(GraphConfig::new(2, 1).validate().is_err());
    }

    #[test]
    fn test_invalid_handle_refuses_operations() {
        let mut graph = CompactedDbg::new(GraphConfig::new(5, 7));
        assert!(graph.is_invalid());
        assert!(graph.build(&[]).is_err());
        assert!(graph.write_gfa(Path::new("/dev/null")).is_err());
    }
}
