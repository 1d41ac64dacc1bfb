use std::io::{ErrorKind, Read, Write};

use mongodb::bson::Document;

use super::codec::{decode_sample, encode_sample};
use super::CodecError;
use crate::sample::Sample;

/// Smallest legal BSON document: length prefix plus trailing NUL.
const MIN_DOCUMENT_LEN: usize = 5;

/// Upper bound on a single sample document. Far above what `currentOp`
/// returns in practice; a larger prefix means the stream is garbage.
const MAX_DOCUMENT_LEN: usize = 64 * 1024 * 1024;

// ─── Writer ──────────────────────────────────────────────────────

/// Appends encoded samples to a byte sink, one document each.
pub struct RecordingWriter<W: Write> {
    inner: W,
    written: u64,
    bytes: u64,
}

impl<W: Write> RecordingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
            bytes: 0,
        }
    }

    pub fn write_sample(&mut self, sample: &Sample) -> Result<(), CodecError> {
        let buf = encode_sample(sample)?;
        self.inner.write_all(&buf)?;
        self.written += 1;
        self.bytes += buf.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.inner.flush()?;
        Ok(())
    }

    /// Number of samples written so far.
    pub fn samples_written(&self) -> u64 {
        self.written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

// ─── Reader ──────────────────────────────────────────────────────

/// Lazily decodes samples from a recording.
///
/// Ends cleanly at EOF on a document boundary. Any truncated or malformed
/// document yields one `CodecError::Corrupt`, a failing reader one
/// `CodecError::Read`, and then the iterator stops. Both carry the
/// document index and byte offset.
pub struct RecordingReader<R: Read> {
    inner: R,
    index: usize,
    offset: u64,
    done: bool,
}

impl<R: Read> RecordingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            index: 0,
            offset: 0,
            done: false,
        }
    }

    /// Number of samples decoded so far.
    pub fn samples_read(&self) -> usize {
        self.index
    }

    fn corrupt(&self, reason: impl Into<String>) -> CodecError {
        CodecError::Corrupt {
            index: self.index,
            offset: self.offset,
            reason: reason.into(),
        }
    }

    fn read_failed(&self, source: std::io::Error) -> CodecError {
        CodecError::Read {
            index: self.index,
            offset: self.offset,
            source,
        }
    }

    fn read_next(&mut self) -> Result<Option<Sample>, CodecError> {
        let mut prefix = [0u8; 4];
        let got = read_up_to(&mut self.inner, &mut prefix).map_err(|e| self.read_failed(e))?;
        if got == 0 {
            return Ok(None);
        }
        if got < prefix.len() {
            return Err(self.corrupt(format!("truncated length prefix ({got} of 4 bytes)")));
        }

        let declared = i32::from_le_bytes(prefix);
        let len = usize::try_from(declared).unwrap_or(0);
        if !(MIN_DOCUMENT_LEN..=MAX_DOCUMENT_LEN).contains(&len) {
            return Err(self.corrupt(format!("invalid document length {declared}")));
        }

        let mut buf = vec![0u8; len];
        buf[..4].copy_from_slice(&prefix);
        let body = read_up_to(&mut self.inner, &mut buf[4..]).map_err(|e| self.read_failed(e))?;
        if body < len - 4 {
            return Err(self.corrupt(format!(
                "truncated document: expected {len} bytes, found {}",
                body + 4
            )));
        }

        let doc = Document::from_reader(&buf[..])
            .map_err(|e| self.corrupt(format!("undecodable document: {e}")))?;
        let sample = decode_sample(doc).map_err(|e| self.corrupt(e.to_string()))?;

        self.index += 1;
        self.offset += len as u64;
        Ok(Some(sample))
    }
}

impl<R: Read> Iterator for RecordingReader<R> {
    type Item = Result<Sample, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(sample)) => Some(Ok(sample)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Reads until `buf` is full or EOF, returning how many bytes arrived.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, std::io::Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn samples() -> Vec<Sample> {
        vec![
            Sample::new(1.0, vec![doc! { "ns": "a.b", "op": "query" }]),
            Sample::new(2.0, vec![]),
            Sample::new(3.0, vec![doc! { "ns": "a.c" }, doc! { "ns": "a.d", "desc": "conn7" }]),
        ]
    }

    fn recording(samples: &[Sample]) -> Vec<u8> {
        let mut writer = RecordingWriter::new(Vec::new());
        for s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.flush().unwrap();
        assert_eq!(writer.samples_written(), samples.len() as u64);
        writer.into_inner()
    }

    #[test]
    fn test_stream_preserves_order() {
        let input = samples();
        let bytes = recording(&input);

        let decoded: Vec<Sample> = RecordingReader::new(&bytes[..])
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_empty_stream() {
        let mut reader = RecordingReader::new(&[][..]);
        assert!(reader.next().is_none());
        assert_eq!(reader.samples_read(), 0);
    }

    #[test]
    fn test_truncated_body_is_reported_with_position() {
        let bytes = recording(&samples());
        let first_len = encode_sample(&samples()[0]).unwrap().len();
        let cut = &bytes[..bytes.len() - 3];

        let results: Vec<_> = RecordingReader::new(cut).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        match &results[2] {
            Err(CodecError::Corrupt { index, offset, .. }) => {
                assert_eq!(*index, 2);
                let second_len = encode_sample(&samples()[1]).unwrap().len();
                assert_eq!(*offset, (first_len + second_len) as u64);
            }
            other => panic!("expected corrupt error, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_prefix() {
        let mut bytes = recording(&samples()[..1]);
        bytes.extend_from_slice(&[0x10, 0x00]);

        let results: Vec<_> = RecordingReader::new(&bytes[..]).collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[1],
            Err(CodecError::Corrupt { index: 1, .. })
        ));
    }

    #[test]
    fn test_garbage_length_stops_iteration() {
        let bytes = [0xff, 0xff, 0xff, 0x7f, 0, 0, 0, 0];
        let mut reader = RecordingReader::new(&bytes[..]);
        assert!(matches!(reader.next(), Some(Err(CodecError::Corrupt { .. }))));
        assert!(reader.next().is_none());
    }

    /// A source that fails every read, like a yanked device.
    struct Unplugged;

    impl Read for Unplugged {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn test_read_failure_carries_position() {
        let bytes = recording(&samples()[..1]);
        let first_len = bytes.len() as u64;

        let results: Vec<_> = RecordingReader::new((&bytes[..]).chain(Unplugged)).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(err @ CodecError::Read { index, offset, .. }) => {
                assert_eq!(*index, 1);
                assert_eq!(*offset, first_len);
                assert!(err.to_string().contains("device gone"));
            }
            other => panic!("expected read error, got {other:?}"),
        }
    }
}
