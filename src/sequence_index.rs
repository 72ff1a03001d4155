use crate::error::{NlmsaError, Result};
use crate::paf::open_text_reader;
use crate::seqidx::SequenceIndex;
use crate::SeqId;
use log::debug;
use rustc_hash::FxHashMap;
use std::io::BufRead;
use std::path::Path;

// Trait for sequence fetching, the only way the conservation filter sees letters
pub trait SequenceSource: Sync {
    fn fetch_sequence(&self, seq: SeqId, start: i64, stop: i64) -> Result<Vec<u8>>;
}

/// Sequences held in memory, keyed by registry id.
#[derive(Debug, Default, Clone)]
pub struct InMemorySequences {
    seqs: FxHashMap<SeqId, Vec<u8>>,
}

impl InMemorySequences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: SeqId, seq: impl Into<Vec<u8>>) {
        self.seqs.insert(id, seq.into());
    }

    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    /// Load every record of the given FASTA files (plain or BGZF), registering
    /// names and lengths in `seq_index`.
    pub fn from_fasta_files(files: &[String], seq_index: &mut SequenceIndex) -> Result<Self> {
        if files.is_empty() {
            return Err(NlmsaError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "No input files provided",
            )));
        }

        // Handle compound extensions like .fa.gz, .fasta.gz, .fna.gz
        let get_full_extension = |path: &str| -> String {
            let p = Path::new(path);
            let file_name = p.file_name().and_then(|s| s.to_str()).unwrap_or("");
            match [".fa.gz", ".fasta.gz", ".fna.gz"]
                .iter()
                .find(|ext| file_name.ends_with(*ext))
            {
                Some(ext) => ext[1..].to_string(),
                None => p
                    .extension()
                    .and_then(|s| s.to_str())
                    .unwrap_or("")
                    .to_string(),
            }
        };

        let mut sequences = Self::new();
        for file in files {
            let ext = get_full_extension(file);
            if !matches!(
                ext.as_str(),
                "fa" | "fasta" | "fna" | "fa.gz" | "fasta.gz" | "fna.gz"
            ) {
                return Err(NlmsaError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Unsupported file extension: {}", ext),
                )));
            }
            let reader = open_text_reader(file)?;
            sequences.read_fasta(reader, seq_index)?;
            debug!("Loaded sequences from {}", file);
        }
        Ok(sequences)
    }

    fn read_fasta<R: BufRead>(&mut self, reader: R, seq_index: &mut SequenceIndex) -> Result<()> {
        let mut name: Option<String> = None;
        let mut seq: Vec<u8> = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end();
            if let Some(header) = line.strip_prefix('>') {
                if let Some(prev) = name.take() {
                    self.finish_record(&prev, std::mem::take(&mut seq), seq_index);
                }
                let id = header.split_whitespace().next().ok_or(NlmsaError::Parse {
                    line: i + 1,
                    message: "FASTA header without a name".to_string(),
                })?;
                name = Some(id.to_string());
            } else if !line.is_empty() {
                if name.is_none() {
                    return Err(NlmsaError::Parse {
                        line: i + 1,
                        message: "sequence data before the first FASTA header".to_string(),
                    });
                }
                seq.extend_from_slice(line.as_bytes());
            }
        }
        if let Some(prev) = name {
            self.finish_record(&prev, seq, seq_index);
        }
        Ok(())
    }

    fn finish_record(&mut self, name: &str, seq: Vec<u8>, seq_index: &mut SequenceIndex) {
        let id = seq_index.get_or_insert_id(name, Some(seq.len() as i64));
        self.seqs.insert(id, seq);
    }
}

impl SequenceSource for InMemorySequences {
    fn fetch_sequence(&self, seq: SeqId, start: i64, stop: i64) -> Result<Vec<u8>> {
        let letters = self.seqs.get(&seq).ok_or(NlmsaError::NotFound(seq))?;
        if start < 0 || start > stop || stop > letters.len() as i64 {
            return Err(NlmsaError::MalformedInterval(format!(
                "{}:{}-{} outside sequence of length {}",
                seq,
                start,
                stop,
                letters.len()
            )));
        }
        Ok(letters[start as usize..stop as usize].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fetch_bounds() {
        let mut seqs = InMemorySequences::new();
        seqs.insert(3, "ACGTACGT");
        assert_eq!(seqs.fetch_sequence(3, 2, 5).unwrap(), b"GTA".to_vec());
        assert!(matches!(
            seqs.fetch_sequence(4, 0, 1),
            Err(NlmsaError::NotFound(4))
        ));
        assert!(seqs.fetch_sequence(3, 5, 9).is_err());
    }

    #[test]
    fn test_load_fasta() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("seqs.fa");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, ">chr1 description\nACGT\nAC\n>chr2\nTTTT").unwrap();
        drop(file);

        let mut seq_index = SequenceIndex::new();
        let seqs = InMemorySequences::from_fasta_files(
            &[path.to_string_lossy().to_string()],
            &mut seq_index,
        )
        .unwrap();
        assert_eq!(seqs.len(), 2);
        let chr1 = seq_index.get_id("chr1").unwrap();
        assert_eq!(seq_index.get_len_from_id(chr1), Some(6));
        assert_eq!(seqs.fetch_sequence(chr1, 3, 6).unwrap(), b"TAC".to_vec());
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let mut seq_index = SequenceIndex::new();
        assert!(InMemorySequences::from_fasta_files(&["reads.agc".to_string()], &mut seq_index)
            .is_err());
    }
}
