// lib.rs
pub mod alignment_record;
pub mod conservation;
pub mod context;
pub mod dump;
pub mod edge;
pub mod error;
pub mod forest;
pub mod index;
pub mod intersect;
pub mod interval;
pub mod paf;
pub mod seqidx;
pub mod sequence_index;
pub mod slice;
pub mod snapshot;
pub mod store;
pub mod transform;

pub use error::{NlmsaError, Result};

/// Path identity: the registry id of a sequence.
pub type SeqId = u32;
