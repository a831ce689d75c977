use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::color::{check_colors, map_colors, ColorStorage};
use crate::graph::{CompactedDbg, GraphConfig};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Input sequence files (FASTA/FASTQ, optionally gzip-compressed)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// K-mer length
    #[arg(short = 'k', long)]
    pub klen: usize,
    /// Minimizer length (default k - 6)
    #[arg(short = 'g', long)]
    pub glen: Option<usize>,
    /// Number of worker threads for the color phase
    #[arg(short = 't', long, default_value = "1")]
    pub threads: usize,
    /// Output prefix (writes <prefix>.gfa, <prefix>.bfg_colors,
    /// <prefix>.stats.json)
    #[arg(short = 'o', long)]
    pub output: String,
    /// Precomputed color file to load instead of mapping reads
    #[arg(long)]
    pub colors_in: Option<PathBuf>,
    /// Skip color annotation entirely
    #[arg(long)]
    pub no_colors: bool,
    /// Clip pendant tips after the first join pass
    #[arg(long)]
    pub clip_tips: bool,
    /// Remove isolated short unitigs after the first join pass
    #[arg(long)]
    pub rm_isolated: bool,
    /// Bloom filter size, bits per k-mer position
    #[arg(long, default_value = "16")]
    pub bloom_bits: usize,
    /// Hash seed for color-slot assignment
    #[arg(short = 's', long, default_value = "1")]
    pub seed: u64,
}

pub fn run(args: BuildArgs) -> Result<()> {
    let g = args.glen.unwrap_or_else(|| args.klen.saturating_sub(6));
    let mut cfg = GraphConfig::new(args.klen, g);
    cfg.threads = args.threads;
    cfg.clip_tips = args.clip_tips;
    cfg.rm_isolated = args.rm_isolated;
    cfg.bloom_bits_per_kmer = args.bloom_bits;
    cfg.seed = args.seed;
    cfg.validate()?;

    let mut graph = CompactedDbg::new(cfg);
    let stats = graph.build(&args.files)?;

    let gfa_path = PathBuf::from(format!("{}.gfa", args.output));
    graph.write_gfa(&gfa_path)?;
    info!("graph written to {}", gfa_path.display());

    if !args.no_colors {
        let storage = match &args.colors_in {
            Some(path) => {
                info!("loading precomputed colors from {}", path.display());
                ColorStorage::read(path, graph.store())?
            }
            None => {
                let storage =
                    ColorStorage::new(graph.store(), args.files.len() as u32, args.seed);
                storage.assign_all(graph.store(), args.threads);
                map_colors(graph.store(), &storage, &args.files, args.threads)?;
                check_colors(graph.store(), &storage, &args.files)?;
                storage
            }
        };
        let colors_path = PathBuf::from(format!("{}.bfg_colors", args.output));
        storage.write(&colors_path)?;
        info!(
            "colors written to {} ({} sets, {} overflow)",
            colors_path.display(),
            storage.nb_color_sets(),
            storage.nb_overflow()
        );
    }

    let stats_path = PathBuf::from(format!("{}.stats.json", args.output));
    let json = serde_json::json!({
        "k": graph.k(),
        "g": graph.g(),
        "nb_reads": stats.nb_reads,
        "nb_kmer_positions": stats.nb_kmer_positions,
        "nb_long_unitigs": stats.nb_long,
        "nb_short_unitigs": stats.nb_short,
        "nb_abundant_kmers": stats.nb_abundant,
        "nb_split": stats.nb_split,
        "nb_deleted": stats.nb_deleted,
        "nb_joined": stats.nb_joined,
        "nb_removed": stats.nb_removed,
    });
    let stats_file = std::fs::File::create(&stats_path)
        .with_context(|| format!("failed to create {}", stats_path.display()))?;
    serde_json::to_writer_pretty(stats_file, &json)
        .context("failed to write build stats")?;

    Ok(())
}
