//! Multi-file sequence input.
//!
//! `FileParser` drains a list of FASTA/FASTQ files (plain, or compressed in
//! anything niffler can sniff) strictly in order, yielding each sequence
//! uppercased together with the index of the file it came from. The format
//! of each file is detected from its first byte after decompression.

use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use paraseq::{fasta, fastq, Record};

enum FormatReader {
    Fasta {
        reader: fasta::Reader<Box<dyn Read + Send>>,
        records: fasta::RecordSet,
    },
    Fastq {
        reader: fastq::Reader<Box<dyn Read + Send>>,
        records: fastq::RecordSet,
    },
}

/// Sequential reader over a list of sequence files.
pub struct FileParser {
    paths: Vec<PathBuf>,
    next_file: usize,
    current: Option<(FormatReader, usize)>,
    queue: VecDeque<(String, usize)>,
}

impl FileParser {
    /// Prepare a parser over `paths`; files are opened lazily, one at a
    /// time, in the given order.
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        if paths.is_empty() {
            bail!("no input files specified");
        }
        Ok(Self {
            paths: paths.to_vec(),
            next_file: 0,
            current: None,
            queue: VecDeque::new(),
        })
    }

    /// Number of input files.
    pub fn num_files(&self) -> usize {
        self.paths.len()
    }

    /// The next sequence and its source file index, or `None` once every
    /// file is exhausted. Sequences are uppercased; file indices are
    /// monotonically non-decreasing.
    pub fn read_next(&mut self) -> Result<Option<(String, usize)>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Ok(Some(item));
            }
            if self.current.is_none() {
                if self.next_file >= self.paths.len() {
                    return Ok(None);
                }
                let file_id = self.next_file;
                self.next_file += 1;
                match Self::open_file(&self.paths[file_id])? {
                    Some(fr) => self.current = Some((fr, file_id)),
                    None => continue, // empty file
                }
            }

            let (fr, file_id) = self.current.as_mut().unwrap();
            let more = match fr {
                FormatReader::Fasta { reader, records } => {
                    if records.fill(reader)? {
                        for rec in records.iter() {
                            let rec = rec?;
                            self.queue.push_back((to_upper_string(&rec.seq())?, *file_id));
                        }
                        true
                    } else {
                        false
                    }
                }
                FormatReader::Fastq { reader, records } => {
                    if records.fill(reader)? {
                        for rec in records.iter() {
                            let rec = rec?;
                            self.queue.push_back((to_upper_string(&rec.seq())?, *file_id));
                        }
                        true
                    } else {
                        false
                    }
                }
            };
            if !more {
                self.current = None;
            }
        }
    }

    /// Open one file with transparent decompression and detect its format
    /// from the first byte. Returns `None` for an empty file.
    fn open_file(path: &PathBuf) -> Result<Option<FormatReader>> {
        let (mut inner, _format) = niffler::send::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut first = [0u8; 1];
        let n = inner
            .read(&mut first)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if n == 0 {
            return Ok(None);
        }

        let chained: Box<dyn Read + Send> =
            Box::new(std::io::Cursor::new([first[0]]).chain(inner));
        match first[0] {
            b'>' => {
                let reader = fasta::Reader::new(chained);
                let records = reader.new_record_set();
                Ok(Some(FormatReader::Fasta { reader, records }))
            }
            b'@' => {
                let reader = fastq::Reader::new(chained);
                let records = reader.new_record_set();
                Ok(Some(FormatReader::Fastq { reader, records }))
            }
            other => bail!(
                "{}: unrecognized sequence format (leading byte {:?})",
                path.display(),
                other as char
            ),
        }
    }
}

fn to_upper_string(seq: &[u8]) -> Result<String> {
    String::from_utf8(seq.to_ascii_uppercase()).context("sequence is not valid UTF-8")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_fasta_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(&dir, "a.fa", ">r1\ngattaca\n>r2\nACGT\n");
        let mut parser = FileParser::open(&[p]).unwrap();
        assert_eq!(
            parser.read_next().unwrap(),
            Some(("GATTACA".to_string(), 0))
        );
        assert_eq!(parser.read_next().unwrap(), Some(("ACGT".to_string(), 0)));
        assert_eq!(parser.read_next().unwrap(), None);
    }

    #[test]
    fn test_fastq_detected() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(&dir, "a.fq", "@r1\nacgtacgt\n+\nIIIIIIII\n");
        let mut parser = FileParser::open(&[p]).unwrap();
        assert_eq!(
            parser.read_next().unwrap(),
            Some(("ACGTACGT".to_string(), 0))
        );
        assert_eq!(parser.read_next().unwrap(), None);
    }

    #[test]
    fn test_file_ids_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(&dir, "a.fa", ">x\nAAAA\n");
        let b = write_file(&dir, "b.fa", ">y\nCCCC\n>z\nGGGG\n");
        let mut parser = FileParser::open(&[a, b]).unwrap();
        let mut ids = Vec::new();
        while let Some((_, id)) = parser.read_next().unwrap() {
            ids.push(id);
        }
        assert_eq!(ids, vec![0, 1, 1]);
    }

    #[test]
    fn test_no_files_rejected() {
        assert!(FileParser::open(&[]).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(&dir, "a.txt", "not a sequence file\n");
        let mut parser = FileParser::open(&[p]).unwrap();
        assert!(parser.read_next().is_err());
    }
}
