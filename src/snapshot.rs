//! Binary snapshot of a frozen store and its sequence registry.

use crate::error::{NlmsaError, Result};
use crate::seqidx::SequenceIndex;
use crate::store::AlignmentStore;
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8] = b"NLMSAIX1";

pub fn write_snapshot<W: Write>(
    mut writer: W,
    store: &AlignmentStore,
    seq_index: &SequenceIndex,
) -> Result<()> {
    writer.write_all(MAGIC)?;
    bincode::serde::encode_into_std_write(
        (seq_index, store),
        &mut writer,
        bincode::config::standard(),
    )
    .map_err(|e| NlmsaError::Serialization(format!("Failed to encode index: {e:?}")))?;
    writer.flush()?;
    Ok(())
}

pub fn read_snapshot<R: Read>(mut reader: R) -> Result<(AlignmentStore, SequenceIndex)> {
    let mut magic_buf = [0u8; 8];
    reader.read_exact(&mut magic_buf)?;
    if magic_buf != MAGIC {
        return Err(NlmsaError::Serialization(
            "Invalid magic bytes - not a valid NLMSA index file".to_string(),
        ));
    }
    let (seq_index, store): (SequenceIndex, AlignmentStore) =
        bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| NlmsaError::Serialization(format!("Failed to decode index: {e:?}")))?;
    Ok((store, seq_index))
}

pub fn save(path: &Path, store: &AlignmentStore, seq_index: &SequenceIndex) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    write_snapshot(writer, store, seq_index)?;
    info!("Saved index with {} records to {}", store.len(), path.display());
    Ok(())
}

pub fn load(path: &Path) -> Result<(AlignmentStore, SequenceIndex)> {
    let reader = BufReader::new(File::open(path)?);
    let (store, seq_index) = read_snapshot(reader)?;
    info!("Loaded index with {} records from {}", store.len(), path.display());
    Ok((store, seq_index))
}
