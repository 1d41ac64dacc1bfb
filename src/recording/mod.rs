//! Recording file format: a plain concatenation of BSON documents, one per
//! sample, readable forward-only without loading the whole file.

pub mod codec;
pub mod stream;

pub use codec::{decode_sample, encode_sample};
pub use stream::{RecordingReader, RecordingWriter};

use thiserror::Error;

/// Errors raised while writing or reading a recording.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("recording I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding sample: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("invalid sample document: {0}")]
    InvalidSample(String),

    #[error("reading recording at document #{index} (byte offset {offset}): {source}")]
    Read {
        index: usize,
        offset: u64,
        source: std::io::Error,
    },

    #[error("corrupt recording at document #{index} (byte offset {offset}): {reason}")]
    Corrupt {
        index: usize,
        offset: u64,
        reason: String,
    },
}
