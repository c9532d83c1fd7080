//! Versioned binary envelope for values at rest.
//!
//! Binary format (3 bytes overhead):
//! ```text
//! [MAGIC: 0xE6][VERSION: u8][KIND: u8][PAYLOAD: N bytes]
//! ```
//!
//! The payload is postcard-encoded.

use engram_crdt::{RecordKind, Versioned};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{EnvelopeError, StorageError};

/// Magic byte identifying engram serialized data.
pub const MAGIC_BYTE: u8 = 0xE6;

/// Size of the version envelope header in bytes.
pub const ENVELOPE_HEADER_SIZE: usize = 3;

/// A version envelope wrapping serialized data.
///
/// # Example
///
/// ```
/// use engram_store::envelope::Envelope;
/// use engram_crdt::RecordKind;
///
/// let envelope = Envelope::new(1, RecordKind::Document, b"payload".to_vec());
/// let bytes = envelope.to_bytes();
/// let decoded = Envelope::from_bytes(&bytes).unwrap();
///
/// assert_eq!(decoded.version, 1);
/// assert_eq!(decoded.kind, RecordKind::Document);
/// assert_eq!(decoded.payload, b"payload");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Schema version of the payload.
    pub version: u8,
    /// Kind of record contained.
    pub kind: RecordKind,
    /// Serialized record.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(version: u8, kind: RecordKind, payload: Vec<u8>) -> Self {
        Self {
            version,
            kind,
            payload,
        }
    }

    /// Serialize the envelope to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ENVELOPE_HEADER_SIZE + self.payload.len());
        bytes.push(MAGIC_BYTE);
        bytes.push(self.version);
        bytes.push(self.kind as u8);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse an envelope from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        if data.len() < ENVELOPE_HEADER_SIZE {
            return Err(EnvelopeError::TooShort);
        }
        if data[0] != MAGIC_BYTE {
            return Err(EnvelopeError::InvalidMagic(data[0]));
        }

        let kind = RecordKind::from_byte(data[2]).ok_or(EnvelopeError::UnknownKind(data[2]))?;
        Ok(Self {
            version: data[1],
            kind,
            payload: data[ENVELOPE_HEADER_SIZE..].to_vec(),
        })
    }
}

/// Encode a value with postcard inside an envelope stamped with its
/// current version.
pub fn encode<T: Serialize + Versioned>(value: &T) -> Result<Vec<u8>, StorageError> {
    let payload = postcard::to_allocvec(value).map_err(|e| StorageError::Codec(e.to_string()))?;
    Ok(Envelope::new(T::CURRENT_VERSION, T::KIND, payload).to_bytes())
}

/// Decode a value written by [`encode`].
///
/// Rejects envelopes of another kind and versions newer than this build
/// knows.
pub fn decode<T: DeserializeOwned + Versioned>(data: &[u8]) -> Result<T, StorageError> {
    let envelope = Envelope::from_bytes(data)?;
    if envelope.kind != T::KIND {
        return Err(EnvelopeError::WrongKind {
            expected: T::KIND,
            found: envelope.kind,
        }
        .into());
    }
    if envelope.version > T::CURRENT_VERSION {
        return Err(EnvelopeError::UnsupportedVersion {
            kind: T::KIND,
            found: envelope.version,
            supported: T::CURRENT_VERSION,
        }
        .into());
    }
    postcard::from_bytes(&envelope.payload).map_err(|e| StorageError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_crdt::{MemoryDocument, MemoryType};

    #[test]
    fn roundtrip() {
        let original = Envelope::new(3, RecordKind::Document, b"test-payload".to_vec());
        let decoded = Envelope::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn header_size() {
        let bytes = Envelope::new(1, RecordKind::Document, vec![]).to_bytes();
        assert_eq!(bytes.len(), ENVELOPE_HEADER_SIZE);
    }

    #[test]
    fn rejects_bad_headers() {
        assert_eq!(Envelope::from_bytes(&[MAGIC_BYTE]), Err(EnvelopeError::TooShort));
        assert_eq!(
            Envelope::from_bytes(&[0xCF, 1, 1]),
            Err(EnvelopeError::InvalidMagic(0xCF))
        );
        assert_eq!(
            Envelope::from_bytes(&[MAGIC_BYTE, 1, 77]),
            Err(EnvelopeError::UnknownKind(77))
        );
    }

    #[test]
    fn document_roundtrip() {
        let mut doc = MemoryDocument::with_timestamp("m1", "hi", MemoryType::Episodic, "a", 1);
        doc.add_tag("t", "a");
        let bytes = encode(&doc).unwrap();
        assert_eq!(bytes[0], MAGIC_BYTE);
        let back: MemoryDocument = decode(&bytes).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn newer_versions_are_rejected() {
        let doc = MemoryDocument::with_timestamp("m1", "hi", MemoryType::Episodic, "a", 1);
        let mut bytes = encode(&doc).unwrap();
        bytes[1] = u8::MAX;
        let err = decode::<MemoryDocument>(&bytes).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Envelope(EnvelopeError::UnsupportedVersion { found: 255, .. })
        ));
    }
}
