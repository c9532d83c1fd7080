//! JSON wire records exchanged between replicas.
//!
//! Replicas ship documents to each other as [`MemoryRecord`] JSON. Every
//! field carries its full CRDT state, so `from_json(to_json(doc))` yields
//! a document equal to `doc` and the receiver can merge it directly.
//!
//! [`MemoryRecord`]: engram_crdt::MemoryRecord

use engram_crdt::MemoryDocument;

use crate::error::StorageError;

/// Serialize a document as a JSON wire record.
pub fn to_json(doc: &MemoryDocument) -> Result<String, StorageError> {
    serde_json::to_string(doc).map_err(|e| StorageError::Codec(e.to_string()))
}

/// Parse a JSON wire record. Malformed or inconsistent records are
/// rejected with [`StorageError::Codec`].
pub fn from_json(json: &str) -> Result<MemoryDocument, StorageError> {
    serde_json::from_str(json).map_err(|e| StorageError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_crdt::MemoryType;

    #[test]
    fn json_roundtrip() {
        let mut doc = MemoryDocument::with_timestamp("m1", "hello", MemoryType::Semantic, "a1", 3);
        doc.add_tag("greeting", "a1");
        doc.set_importance(0.4, "a1").unwrap();

        let json = to_json(&doc).unwrap();
        assert_eq!(from_json(&json).unwrap(), doc);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(from_json("{not json"), Err(StorageError::Codec(_))));
    }
}
