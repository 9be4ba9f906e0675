//! Error types for block store operations.

use std::io;

use thiserror::Error;

use stowage_car::wire::cid::CidFormatError;
use stowage_car::wire::v1::header::HeaderFormatError;
use stowage_car::wire::v1::section::SectionFormatError;
use stowage_car::wire::v2::index::IndexFormatError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the block store.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested key is not present in the store.
    #[error("block not found")]
    NotFound,

    /// The archive version is neither 1 nor 2.
    #[error("unsupported car version: {0}")]
    UnsupportedVersion(u64),

    /// The file does not start with a CARv2 pragma.
    #[error("not a CARv2 archive")]
    NotACarV2,

    /// The backing ended mid-section or mid-header.
    #[error("backing ended mid-record")]
    Truncated,

    /// A CID could not be decoded.
    #[error("invalid CID: {0}")]
    BadCid(#[from] CidFormatError),

    /// A zero-length section was encountered without opting in to treating it
    /// as end of data.
    #[error("zero-length section not allowed by default; see ReadOptions::zero_length_section_as_eof")]
    MalformedPadding,

    /// The CARv2 header region was only partially written.
    #[error("corrupt CARv2 header; cannot resume from file")]
    CorruptHeader,

    /// A section failed to decode in the middle of the data payload.
    #[error("corrupt data payload: {0}")]
    CorruptPayload(SectionFormatError),

    /// Resumption roots do not match the roots recorded in the file.
    #[error("cannot resume on file with mismatching data header")]
    RootMismatch,

    /// Resumption data padding does not match the padding on file.
    #[error("data padding mismatch on resumption; expected {expected} but got {actual}")]
    PaddingMismatch {
        /// Padding recorded on file.
        expected: u64,
        /// Padding derived from the given options.
        actual: u64,
    },

    /// The store has been finalized and accepts no further operations.
    #[error("cannot use the store after finalization")]
    Finalized,

    /// `finalize` was called more than once.
    #[error("finalize called twice")]
    FinalizedTwice,

    /// A write was attempted on a read-only store.
    #[error("write attempted on a read-only store")]
    WriteOnReadOnly,

    /// The embedded sorted index could not be decoded.
    #[error("invalid index: {0}")]
    BadIndex(#[from] IndexFormatError),

    /// An archive header could not be decoded.
    #[error("invalid archive header: {0}")]
    BadHeader(HeaderFormatError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
