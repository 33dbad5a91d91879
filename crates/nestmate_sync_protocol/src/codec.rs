//! CBOR encoding for change batches and payload digests.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::ChangeRecord;
use crate::value::Payload;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Format version written into every encoded change batch.
pub const FORMAT_VERSION: u16 = 1;

#[derive(Serialize)]
struct BatchRef<'a> {
    format_version: u16,
    records: &'a [ChangeRecord],
}

#[derive(Deserialize)]
struct Batch {
    format_version: u16,
    records: Vec<ChangeRecord>,
}

/// Encodes change records as a versioned CBOR batch.
pub fn encode_changes(records: &[ChangeRecord]) -> ProtocolResult<Vec<u8>> {
    let batch = BatchRef {
        format_version: FORMAT_VERSION,
        records,
    };
    let mut out = Vec::new();
    ciborium::into_writer(&batch, &mut out).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes a batch produced by [`encode_changes`].
pub fn decode_changes(bytes: &[u8]) -> ProtocolResult<Vec<ChangeRecord>> {
    let batch: Batch =
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::decode(e.to_string()))?;
    if batch.format_version != FORMAT_VERSION {
        return Err(ProtocolError::decode(format!(
            "unsupported format version {} (expected {FORMAT_VERSION})",
            batch.format_version
        )));
    }
    Ok(batch.records)
}

/// SHA-256 digest of a payload's canonical CBOR encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadDigest([u8; 32]);

impl PayloadDigest {
    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the digest as lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for PayloadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadDigest({})", &self.to_hex()[..12])
    }
}

/// Computes the digest of a payload.
///
/// Fields are encoded in name order, so equal payloads always share a digest.
pub fn payload_digest(payload: &Payload) -> ProtocolResult<PayloadDigest> {
    let mut encoded = Vec::new();
    ciborium::into_writer(payload, &mut encoded)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(PayloadDigest(Sha256::digest(&encoded).into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EntityType;
    use crate::value::{Timestamp, Value};

    #[test]
    fn batch_roundtrip() {
        let records = vec![
            ChangeRecord::create(
                "u1",
                EntityType::Expense,
                "e1",
                Payload::new()
                    .with("amount", 1250)
                    .with("spent_at", Timestamp::from_millis(1_700_000_000_000))
                    .with("memo", Value::Null),
                Timestamp::from_millis(10),
            ),
            ChangeRecord::delete("u1", EntityType::Task, "t1", Timestamp::from_millis(11)),
        ];

        let bytes = encode_changes(&records).unwrap();
        let decoded = decode_changes(&bytes).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn nested_maps_survive_batch_roundtrip() {
        let meta = Value::Map(
            [
                ("$ts".to_string(), Value::Integer(5)),
                ("x".to_string(), Value::Integer(1)),
            ]
            .into_iter()
            .collect(),
        );
        let records = vec![ChangeRecord::update(
            "u1",
            EntityType::Note,
            "n1",
            Payload::new()
                .with("meta", meta)
                .with("edited", Timestamp::from_millis(5)),
            Timestamp::from_millis(20),
        )];

        let decoded = decode_changes(&encode_changes(&records).unwrap()).unwrap();
        assert_eq!(decoded, records);
        assert_eq!(
            decoded[0].payload.get("edited").and_then(Value::as_timestamp),
            Some(Timestamp::from_millis(5))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode_changes(&[0xff, 0x00, 0x13]),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn rejects_future_format() {
        #[derive(Serialize)]
        struct Future {
            format_version: u16,
            records: Vec<ChangeRecord>,
        }
        let mut bytes = Vec::new();
        ciborium::into_writer(
            &Future {
                format_version: FORMAT_VERSION + 1,
                records: Vec::new(),
            },
            &mut bytes,
        )
        .unwrap();

        let err = decode_changes(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported format version"));
    }

    #[test]
    fn digest_tracks_content() {
        let a = Payload::new().with("title", "rent").with("amount", 900);
        let b = Payload::new().with("amount", 900).with("title", "rent");
        let c = Payload::new().with("title", "rent").with("amount", 901);

        assert_eq!(payload_digest(&a).unwrap(), payload_digest(&b).unwrap());
        assert_ne!(payload_digest(&a).unwrap(), payload_digest(&c).unwrap());
        assert_eq!(payload_digest(&a).unwrap().to_hex().len(), 64);
    }
}
