//! PAF (Pairwise Alignment Format) ingestion
//!
//! Turns PAF lines into raw alignment tuples for the store. Supports both
//! uncompressed and BGZF-compressed files.

use crate::alignment_record::AlignmentTuple;
use crate::edge::Edge;
use crate::error::{NlmsaError, Result};
use crate::interval::Orientation;
use crate::seqidx::SequenceIndex;
use crate::store::{AlignmentStore, AlignmentStoreBuilder};
use crate::SeqId;
use log::{debug, info};
use noodles::bgzf;
use std::fs::File;
use std::io::{BufRead, BufReader, Error as IoError, Read, Seek, SeekFrom};
use std::num::{NonZeroUsize, ParseIntError};

#[derive(Debug)]
pub enum ParseErr {
    NotEnoughFields,
    IoError(IoError),
    InvalidField(ParseIntError),
    InvalidStrand,
    InvalidFormat(String),
}

impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErr::NotEnoughFields => write!(f, "Not enough fields in PAF record"),
            ParseErr::IoError(e) => write!(f, "IO error: {}", e),
            ParseErr::InvalidField(e) => write!(f, "Invalid field: {}", e),
            ParseErr::InvalidStrand => write!(f, "Invalid strand"),
            ParseErr::InvalidFormat(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ParseErr {}

const BGZF_HEADER_SIZE: usize = 18;

/// Check whether a file starts with a valid BGZF header.
/// Returns `Ok(false)` for regular gzip, too-small files, or plain text.
fn is_bgzf<R: Read + Seek>(reader: &mut R) -> std::io::Result<bool> {
    let mut header = [0u8; BGZF_HEADER_SIZE];
    let result = match reader.read_exact(&mut header) {
        Ok(()) => {
            Ok(header[0..2] == [0x1f, 0x8b]      // gzip magic
                && header[2] == 0x08              // DEFLATE
                && header[3] == 0x04              // FEXTRA
                && header[10..12] == [0x06, 0x00] // XLEN=6
                && header[12..14] == [b'B', b'C'] // BC subfield
                && header[14..16] == [0x02, 0x00]) // SLEN=2
        }
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    };
    reader.seek(SeekFrom::Start(0))?;
    result
}

/// Open a text file for line reading; `.gz`/`.bgz` files must be BGZF.
pub fn open_text_reader(path: &str) -> std::io::Result<Box<dyn BufRead>> {
    open_text_reader_with_threads(path, NonZeroUsize::MIN)
}

/// Like [`open_text_reader`], decompressing BGZF blocks on `threads` workers.
pub fn open_text_reader_with_threads(
    path: &str,
    threads: NonZeroUsize,
) -> std::io::Result<Box<dyn BufRead>> {
    let mut file = File::open(path)?;
    if ![".gz", ".bgz"].iter().any(|e| path.ends_with(e)) {
        return Ok(Box::new(BufReader::new(file)));
    }
    if !is_bgzf(&mut file)? {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "'{}' is regular gzip, not BGZF. Convert with: zcat '{}' | bgzip > {}",
                path,
                path,
                path.trim_end_matches(".gz")
            ),
        ));
    }
    if threads.get() > 1 {
        debug!("Reading {} with {} BGZF workers", path, threads);
        Ok(Box::new(BufReader::new(
            bgzf::io::MultithreadedReader::with_worker_count(threads, file),
        )))
    } else {
        Ok(Box::new(bgzf::io::Reader::new(file)))
    }
}

/// The columns of a PAF line the index uses.
#[derive(Debug, Clone, PartialEq)]
pub struct PafRecord {
    pub query_name: String,
    pub query_length: i64,
    pub query_start: i64,
    pub query_end: i64,
    pub strand: Orientation,
    pub target_name: String,
    pub target_length: i64,
    pub target_start: i64,
    pub target_end: i64,
    pub residue_matches: i64,
    pub block_len: i64,
    pub mapq: i64,
}

impl PafRecord {
    /// Scores carried into the store: mapping quality, identity over the
    /// alignment block and the shorter side's share of the longer one.
    pub fn edge(&self) -> Edge {
        let q = self.query_end - self.query_start;
        let t = self.target_end - self.target_start;
        let p_identity = if self.block_len > 0 {
            self.residue_matches as f64 / self.block_len as f64
        } else {
            0.0
        };
        Edge::scores(self.mapq as f64, p_identity, q.min(t) as f64 / q.max(t) as f64)
    }

    /// Register both names and return the query id with the tuple to insert.
    pub fn into_tuple(self, seq_index: &mut SequenceIndex) -> (SeqId, AlignmentTuple) {
        let edge = self.edge();
        let query_id = seq_index.get_or_insert_id(&self.query_name, Some(self.query_length));
        let target_id = seq_index.get_or_insert_id(&self.target_name, Some(self.target_length));
        let tuple = AlignmentTuple::new(
            self.query_start,
            self.query_end,
            target_id,
            self.target_start,
            self.target_end,
        )
        .with_orientation(self.strand)
        .with_edge(edge);
        (query_id, tuple)
    }
}

/// Parse a single PAF line
fn parse_paf_line(line: &str) -> std::result::Result<PafRecord, ParseErr> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 12 {
        return Err(ParseErr::NotEnoughFields);
    }
    let int = |i: usize| fields[i].parse::<i64>().map_err(ParseErr::InvalidField);

    let strand_char = fields[4]
        .chars()
        .next()
        .ok_or_else(|| ParseErr::InvalidFormat("Expected '+' or '-' for strand".to_string()))?;
    let strand = match strand_char {
        '+' => Orientation::Forward,
        '-' => Orientation::Reverse,
        _ => return Err(ParseErr::InvalidStrand),
    };

    Ok(PafRecord {
        query_name: fields[0].to_string(),
        query_length: int(1)?,
        query_start: int(2)?,
        query_end: int(3)?,
        strand,
        target_name: fields[5].to_string(),
        target_length: int(6)?,
        target_start: int(7)?,
        target_end: int(8)?,
        residue_matches: int(9)?,
        block_len: int(10)?,
        mapq: int(11)?,
    })
}

pub fn parse_paf<R: BufRead>(
    reader: R,
    seq_index: &mut SequenceIndex,
) -> Result<Vec<(SeqId, AlignmentTuple)>> {
    let mut tuples = Vec::new();
    for (i, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| NlmsaError::Parse {
            line: i + 1,
            message: ParseErr::IoError(e).to_string(),
        })?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record = parse_paf_line(&line).map_err(|e| NlmsaError::Parse {
            line: i + 1,
            message: e.to_string(),
        })?;
        tuples.push(record.into_tuple(seq_index));
    }
    Ok(tuples)
}

/// Parse a PAF file with automatic format detection (compressed or uncompressed)
pub fn parse_paf_file(
    paf_file: &str,
    threads: NonZeroUsize,
    seq_index: &mut SequenceIndex,
) -> Result<Vec<(SeqId, AlignmentTuple)>> {
    let reader = open_text_reader_with_threads(paf_file, threads)?;
    let tuples = parse_paf(reader, seq_index)?;
    debug!("Parsed {} alignments from {}", tuples.len(), paf_file);
    Ok(tuples)
}

/// Build a frozen store from PAF files, query sequences as sources.
pub fn build_store(
    paf_files: &[String],
    threads: NonZeroUsize,
    bidirectional: bool,
    seq_index: &mut SequenceIndex,
) -> Result<AlignmentStore> {
    let mut builder = if bidirectional {
        AlignmentStoreBuilder::bidirectional()
    } else {
        AlignmentStoreBuilder::new()
    };
    for paf_file in paf_files {
        for (query_id, tuple) in parse_paf_file(paf_file, threads, seq_index)? {
            builder.insert_tuple(query_id, tuple)?;
        }
    }
    info!(
        "Loaded {} alignments from {} PAF file(s)",
        builder.len(),
        paf_files.len()
    );
    Ok(builder.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeInfo;
    use std::io::Cursor;

    #[test]
    fn test_parse_paf_valid() {
        let line = "seq1\t100\t0\t100\t+\tseq2\t100\t0\t100\t60\t100\t255";
        let record = parse_paf_line(line).unwrap();
        assert_eq!(record.query_name, "seq1");
        assert_eq!(record.strand, Orientation::Forward);
        assert_eq!(record.mapq, 255);

        let mut seq_index = SequenceIndex::new();
        let (query_id, tuple) = record.into_tuple(&mut seq_index);
        // IDs should be 0 and 1 as they're the first entries in the SequenceIndex
        assert_eq!(query_id, seq_index.get_id("seq1").unwrap());
        assert_eq!(tuple.target_id, seq_index.get_id("seq2").unwrap());
        assert_eq!(seq_index.get_len_from_id(query_id), Some(100));
        let edge = tuple.edge.unwrap();
        assert_eq!(edge.percent_identity().unwrap(), 0.6);
        assert_eq!(edge.percent_aligned().unwrap(), 1.0);
    }

    #[test]
    fn test_parse_paf_with_tags() {
        let line = "seq1\t100\t0\t100\t-\tseq2\t100\t0\t100\t60\t100\t255\tcg:Z:10=";
        let record = parse_paf_line(line).unwrap();
        assert_eq!(record.strand, Orientation::Reverse);
    }

    #[test]
    fn test_parse_paf_invalid() {
        // it's got a character 'z' in the length field
        let line = "seq1\t100\t0\t100\t+\tseq2\t100\tz\t100\t60\t100\t255\tcg:Z:10M";
        assert!(matches!(
            parse_paf_line(line),
            Err(ParseErr::InvalidField(_))
        ));
        let short = "seq1\t100\t0\t100\t+";
        assert!(matches!(parse_paf_line(short), Err(ParseErr::NotEnoughFields)));
        let strand = "seq1\t100\t0\t100\t*\tseq2\t100\t0\t100\t60\t100\t255";
        assert!(matches!(parse_paf_line(strand), Err(ParseErr::InvalidStrand)));
    }

    #[test]
    fn test_parse_reports_line_numbers() {
        let text = "seq1\t100\t0\t100\t+\tseq2\t100\t0\t100\t60\t100\t255\n\nbroken\n";
        let mut seq_index = SequenceIndex::new();
        match parse_paf(Cursor::new(text), &mut seq_index) {
            Err(NlmsaError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_build_store_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("aln.paf");
        std::fs::write(
            &path,
            "a\t1000\t0\t100\t-\tb\t2000\t500\t600\t90\t100\t60\n",
        )
        .unwrap();
        let mut seq_index = SequenceIndex::new();
        let store = build_store(
            &[path.to_string_lossy().to_string()],
            NonZeroUsize::MIN,
            true,
            &mut seq_index,
        )
        .unwrap();
        assert_eq!(store.len(), 2);
        let b = seq_index.get_id("b").unwrap();
        let back: Vec<_> = store
            .query(&crate::interval::Interval::new(b, 500, 510).unwrap())
            .unwrap()
            .collect();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].orientation(), Orientation::Reverse);
    }

    #[test]
    fn test_plain_gzip_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("aln.paf.gz");
        // gzip magic without the BGZF extra field
        std::fs::write(&path, [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        assert!(open_text_reader(&path.to_string_lossy()).is_err());
    }
}
