//! Text dump of a frozen store.
//!
//! A dump is a directory holding `index.tsv` with one `id name length` row per
//! registered sequence, and one `<id>.tsv` per indexed path with a
//! `start end target_id target_start target_end [key=value ...]` row per stored
//! record. Reverse-strand targets are written as `-stop -start`. Header lines in
//! `index.tsv` start with `#`: `#bidirectional` and `#lpo <id>`.
//!
//! Payload columns are typed: `key:i=`, `key:f=` and `key:s=` for attribute
//! maps (`.` for an empty one) and untagged `score=`, `pIdentity=`, `pAligned=`
//! for scores, so every edge reloads as the same variant.
//!
//! Record files may be BGZF-compressed (`<id>.tsv.gz`).

use crate::alignment_record::AlignmentTuple;
use crate::edge::Edge;
use crate::error::{NlmsaError, Result};
use crate::paf::open_text_reader;
use crate::seqidx::SequenceIndex;
use crate::store::{AlignmentStore, AlignmentStoreBuilder};
use crate::SeqId;
use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

pub const INDEX_FILE: &str = "index.tsv";
const BIDIRECTIONAL_TAG: &str = "#bidirectional";
const LPO_TAG: &str = "#lpo";

pub fn write_dump(dir: &Path, store: &AlignmentStore, seq_index: &SequenceIndex) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let mut index = BufWriter::new(File::create(dir.join(INDEX_FILE))?);
    if store.is_bidirectional() {
        writeln!(index, "{}", BIDIRECTIONAL_TAG)?;
    }
    for id in store.lpo_paths() {
        writeln!(index, "{}\t{}", LPO_TAG, id)?;
    }
    for (id, name, length) in seq_index.iter() {
        match length {
            Some(len) => writeln!(index, "{}\t{}\t{}", id, name, len)?,
            None => writeln!(index, "{}\t{}\t.", id, name)?,
        }
    }
    index.flush()?;

    for path in store.paths() {
        let mut out = BufWriter::new(File::create(dir.join(format!("{}.tsv", path)))?);
        for record in store.get(path)?.walk() {
            let (ts, te) = record.target.oriented_coords();
            write!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                record.src.start, record.src.stop, record.target.seq, ts, te
            )?;
            if let Some(edge) = &record.edge {
                for column in edge.to_columns() {
                    write!(out, "\t{}", column)?;
                }
            }
            writeln!(out)?;
        }
        out.flush()?;
    }
    info!(
        "Dumped {} paths ({} records) to {}",
        store.n_paths(),
        store.len(),
        dir.display()
    );
    Ok(())
}

struct IndexHeader {
    bidirectional: bool,
    lpo: Vec<SeqId>,
    seq_index: SequenceIndex,
}

fn parse_field<T: std::str::FromStr>(field: &str, line: usize, what: &str) -> Result<T> {
    field.parse::<T>().map_err(|_| NlmsaError::Parse {
        line,
        message: format!("invalid {} '{}'", what, field),
    })
}

fn read_index<R: BufRead>(reader: R) -> Result<IndexHeader> {
    let mut header = IndexHeader {
        bidirectional: false,
        lpo: Vec::new(),
        seq_index: SequenceIndex::new(),
    };
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let n = i + 1;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        match fields[0] {
            BIDIRECTIONAL_TAG => header.bidirectional = true,
            LPO_TAG => {
                let id = fields.get(1).ok_or(NlmsaError::Parse {
                    line: n,
                    message: "LPO tag without a path id".to_string(),
                })?;
                header.lpo.push(parse_field(id, n, "path id")?);
            }
            _ if fields.len() == 3 => {
                let id: SeqId = parse_field(fields[0], n, "sequence id")?;
                let length = match fields[2] {
                    "." => None,
                    len => Some(parse_field(len, n, "sequence length")?),
                };
                if header.seq_index.get_or_insert_id(fields[1], length) != id {
                    return Err(NlmsaError::Parse {
                        line: n,
                        message: format!("sequence {} is out of order or duplicated", fields[1]),
                    });
                }
            }
            _ => {
                return Err(NlmsaError::Parse {
                    line: n,
                    message: "expected id, name and length".to_string(),
                })
            }
        }
    }
    Ok(header)
}

fn read_records<R: BufRead>(reader: R, path: SeqId, builder: &mut AlignmentStoreBuilder) -> Result<()> {
    builder.ensure_path(path);
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let n = i + 1;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 5 {
            return Err(NlmsaError::Parse {
                line: n,
                message: format!("expected at least 5 columns, found {}", fields.len()),
            });
        }
        let mut tuple = AlignmentTuple::new(
            parse_field(fields[0], n, "start")?,
            parse_field(fields[1], n, "end")?,
            parse_field(fields[2], n, "target id")?,
            parse_field(fields[3], n, "target start")?,
            parse_field(fields[4], n, "target end")?,
        );
        if fields.len() > 5 {
            let edge = Edge::from_columns(&fields[5..]).map_err(|e| match e {
                NlmsaError::Parse { message, .. } => NlmsaError::Parse { line: n, message },
                other => other,
            })?;
            tuple = tuple.with_edge(edge);
        }
        // mirrored records were dumped too, so rows go in as stored
        builder.insert_record(tuple.into_record(path)?)?;
    }
    Ok(())
}

/// Load a dump written by [`write_dump`] and freeze it.
pub fn read_dump(dir: &Path) -> Result<(AlignmentStore, SequenceIndex)> {
    let index_path = dir.join(INDEX_FILE);
    let header = read_index(open_text_reader(&index_path.to_string_lossy())?)?;

    let mut builder = if header.bidirectional {
        AlignmentStoreBuilder::bidirectional()
    } else {
        AlignmentStoreBuilder::new()
    };
    for (id, name, _) in header.seq_index.iter() {
        let plain = dir.join(format!("{}.tsv", id));
        let compressed = dir.join(format!("{}.tsv.gz", id));
        let file = if plain.exists() {
            plain
        } else if compressed.exists() {
            compressed
        } else {
            continue;
        };
        debug!("Reading records for {} from {}", name, file.display());
        read_records(open_text_reader(&file.to_string_lossy())?, id, &mut builder)?;
    }
    for id in header.lpo {
        builder.mark_lpo(id);
    }
    Ok((builder.freeze(), header.seq_index))
}
