//! Textual persistence of the full sequence record set.
//!
//! The sequencer reads the whole set, mutates one record, and rewrites the
//! whole set on every mutating call. That keeps crash consistency simple;
//! the O(n) rewrite is fine because n is the number of drives authorized
//! on one device.

use std::collections::HashMap;

use crate::error::Result;
use crate::sequence::NonceSequence;

/// Converts the record set to and from its on-disk textual form. Records
/// are keyed by `"driveId:authId"`.
pub trait SequenceSerializer: Send + Sync {
    fn serialize(&self, sequences: &HashMap<String, NonceSequence>) -> Result<String>;

    fn deserialize(&self, contents: &str) -> Result<HashMap<String, NonceSequence>>;
}

/// JSON record set serializer.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSequenceSerializer;

impl SequenceSerializer for JsonSequenceSerializer {
    fn serialize(&self, sequences: &HashMap<String, NonceSequence>) -> Result<String> {
        Ok(serde_json::to_string_pretty(sequences)?)
    }

    fn deserialize(&self, contents: &str) -> Result<HashMap<String, NonceSequence>> {
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(contents)?)
    }
}
