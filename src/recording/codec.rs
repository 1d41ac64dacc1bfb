use mongodb::bson::{Bson, Document};

use super::CodecError;
use crate::sample::Sample;

/// Field holding the sample timestamp (float seconds).
pub const TIMESTAMP_FIELD: &str = "t";
/// Field holding the array of op documents.
pub const OPS_FIELD: &str = "o";

/// Builds the on-disk document for a sample: `{ t: double, o: [op, ...] }`.
pub fn sample_to_document(sample: &Sample) -> Document {
    let ops: Vec<Bson> = sample.ops.iter().cloned().map(Bson::Document).collect();

    let mut doc = Document::new();
    doc.insert(TIMESTAMP_FIELD, Bson::Double(sample.timestamp));
    doc.insert(OPS_FIELD, Bson::Array(ops));
    doc
}

/// Encodes a sample into one self-delimiting BSON document.
pub fn encode_sample(sample: &Sample) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(64 + 128 * sample.ops.len());
    sample_to_document(sample).to_writer(&mut buf)?;
    Ok(buf)
}

/// Interprets a decoded document as a sample.
///
/// `t` may be stored as a double or an integer. A missing `o` means the
/// tick saw no ops; anything else in `o` must be a document.
pub fn decode_sample(mut doc: Document) -> Result<Sample, CodecError> {
    let timestamp = match doc.get(TIMESTAMP_FIELD) {
        Some(Bson::Double(t)) => *t,
        Some(Bson::Int32(t)) => f64::from(*t),
        Some(Bson::Int64(t)) => *t as f64,
        Some(other) => {
            return Err(CodecError::InvalidSample(format!(
                "`{TIMESTAMP_FIELD}` must be numeric, found {:?}",
                other.element_type()
            )))
        }
        None => {
            return Err(CodecError::InvalidSample(format!(
                "missing `{TIMESTAMP_FIELD}` field"
            )))
        }
    };

    let ops = match doc.remove(OPS_FIELD) {
        None | Some(Bson::Null) => Vec::new(),
        Some(Bson::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Bson::Document(op) => Ok(op),
                other => Err(CodecError::InvalidSample(format!(
                    "`{OPS_FIELD}[{i}]` is {:?}, expected a document",
                    other.element_type()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(CodecError::InvalidSample(format!(
                "`{OPS_FIELD}` must be an array, found {:?}",
                other.element_type()
            )))
        }
    };

    Ok(Sample { timestamp, ops })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_round_trip_with_nested_ops() {
        let sample = Sample::new(
            1_700_000_000.25,
            vec![
                doc! {
                    "ns": "shop.orders",
                    "op": "query",
                    "query": { "$or": [ { "a": { "$gt": 1 } }, { "b": [1, 2, { "c": "d" }] } ] },
                    "locks": { "Global": { "r": 1_i64 } },
                },
                doc! { "op": "insert", "microsecs_running": 12_i64 },
            ],
        );

        let bytes = encode_sample(&sample).unwrap();
        let decoded = decode_sample(Document::from_reader(&bytes[..]).unwrap()).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn test_round_trip_empty_sample() {
        let sample = Sample::new(3.0, vec![]);
        let bytes = encode_sample(&sample).unwrap();
        let decoded = decode_sample(Document::from_reader(&bytes[..]).unwrap()).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn test_decode_accepts_integer_timestamp_and_missing_ops() {
        let sample = decode_sample(doc! { "t": 12_i64 }).unwrap();
        assert_eq!(sample.timestamp, 12.0);
        assert!(sample.ops.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        assert!(matches!(
            decode_sample(doc! { "o": [] }),
            Err(CodecError::InvalidSample(_))
        ));
        assert!(matches!(
            decode_sample(doc! { "t": "now", "o": [] }),
            Err(CodecError::InvalidSample(_))
        ));
        assert!(matches!(
            decode_sample(doc! { "t": 1.0, "o": [1, 2] }),
            Err(CodecError::InvalidSample(_))
        ));
    }
}
