//! End-to-end color annotation scenarios.

use std::io::Write;
use std::path::PathBuf;

use nautilus_rs::color::{check_colors, map_colors, ColorStorage};
use nautilus_rs::graph::{CompactedDbg, GraphConfig};
use nautilus_rs::kmer::Kmer;

fn write_fasta(dir: &tempfile::TempDir, name: &str, reads: &[&str]) -> PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    for (i, r) in reads.iter().enumerate() {
        writeln!(f, ">r{i}").unwrap();
        writeln!(f, "{r}").unwrap();
    }
    path
}

/// Build a two-file graph and attach colors with the given worker count.
fn colored_graph(nb_threads: usize) -> (CompactedDbg, ColorStorage, Vec<PathBuf>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    // file 0 carries the backbone plus a private unitig, file 1 overlaps
    // the backbone's tail
    let a = write_fasta(&dir, "a.fa", &["GATTACAGT", "CCGGAAT"]);
    let b = write_fasta(&dir, "b.fa", &["TTACAGTCC"]);
    let files = vec![a, b];

    let mut graph = CompactedDbg::new(GraphConfig::new(5, 3));
    graph.build(&files).unwrap();
    graph.store().check_index_coherence().unwrap();

    let storage = ColorStorage::new(graph.store(), files.len() as u32, 1);
    storage.assign_all(graph.store(), nb_threads);
    map_colors(graph.store(), &storage, &files, nb_threads).unwrap();
    (graph, storage, files, dir)
}

fn colors_of_kmer(
    graph: &CompactedDbg,
    storage: &ColorStorage,
    km: &[u8],
) -> Vec<u32> {
    let st = graph.store();
    let um = st
        .find(Kmer::from_ascii(km).unwrap(), false)
        .expect("k-mer is in the graph");
    let head = st.head_kmer(um.kind, um.id);
    storage
        .colors_of(um.kind, um.id, head, st.k())
        .expect("unitig has a color slot")
}

#[test]
fn scenario_shared_unitig_gets_both_colors() {
    let (graph, storage, files, _dir) = colored_graph(1);

    // the backbone is touched by both files
    assert_eq!(colors_of_kmer(&graph, &storage, b"GATTA"), vec![0, 1]);
    assert_eq!(colors_of_kmer(&graph, &storage, b"TTACA"), vec![0, 1]);
    // the private unitig only by file 0
    assert_eq!(colors_of_kmer(&graph, &storage, b"CCGGA"), vec![0]);

    check_colors(graph.store(), &storage, &files).unwrap();
}

#[test]
fn scenario_colors_with_worker_pool() {
    // same outcome under a multi-threaded mapping phase
    let (graph, storage, files, _dir) = colored_graph(4);
    assert_eq!(colors_of_kmer(&graph, &storage, b"GATTA"), vec![0, 1]);
    assert_eq!(colors_of_kmer(&graph, &storage, b"CCGGA"), vec![0]);
    check_colors(graph.store(), &storage, &files).unwrap();
}

#[test]
fn color_file_round_trip() {
    let (graph, storage, _files, dir) = colored_graph(1);
    storage.optimize_all();

    let path = dir.path().join("out.bfg_colors");
    storage.write(&path).unwrap();

    let back = ColorStorage::read(&path, graph.store()).unwrap();
    assert_eq!(back.nb_colors(), 2);
    assert_eq!(back.nb_color_sets(), storage.nb_color_sets());
}

#[test]
fn long_reads_are_windowed() {
    // a read much longer than the slicing window still colors every k-mer
    let dir = tempfile::tempdir().unwrap();
    let unit = "ACCGTGATTACAGTCCGGAAT";
    let long_read: String = unit.chars().cycle().take(2100).collect();
    let a = write_fasta(&dir, "a.fa", &[&long_read]);
    let files = vec![a.clone()];

    let mut graph = CompactedDbg::new(GraphConfig::new(9, 5));
    graph.build(&files).unwrap();

    let storage = ColorStorage::new(graph.store(), 1, 1);
    storage.assign_all(graph.store(), 2);
    map_colors(graph.store(), &storage, &files, 2).unwrap();
    check_colors(graph.store(), &storage, &files).unwrap();
}
