use crate::SeqId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Bidirectional map between sequence names and the integer ids used as path
/// identities in the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceIndex {
    name_to_id: FxHashMap<String, SeqId>,
    names: Vec<String>,
    lengths: Vec<Option<i64>>,
}

impl SequenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_id(&mut self, name: &str, length: Option<i64>) -> SeqId {
        let id = match self.name_to_id.get(name) {
            Some(&id) => id,
            None => {
                let id = self.names.len() as SeqId;
                self.name_to_id.insert(name.to_owned(), id);
                self.names.push(name.to_owned());
                self.lengths.push(None);
                id
            }
        };
        if length.is_some() {
            self.lengths[id as usize] = length;
        }
        id
    }

    pub fn get_id(&self, name: &str) -> Option<SeqId> {
        self.name_to_id.get(name).copied()
    }

    pub fn get_name(&self, id: SeqId) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn get_len_from_id(&self, id: SeqId) -> Option<i64> {
        self.lengths.get(id as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// `(id, name, length)` in id order.
    pub fn iter(&self) -> impl Iterator<Item = (SeqId, &str, Option<i64>)> {
        self.names
            .iter()
            .zip(self.lengths.iter())
            .enumerate()
            .map(|(id, (name, len))| (id as SeqId, name.as_str(), *len))
    }
}
