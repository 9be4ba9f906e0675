use std::io::{self, Read};

use serde::{Deserialize, Serialize};

use crate::wire::cid::{RawCid, RawLink};
use crate::wire::varint::UnsignedVarint;

/// Upper bound on the encoded header we are willing to decode.
///
/// Headers are tiny in practice; this only guards the decoder against garbage
/// length prefixes.
pub const MAX_HEADER_SIZE: usize = 32 << 20;

/// CAR v1 Header structure
///
/// # Fields
/// - `version`: The version of the CAR format (should be 1 for CAR v1)
/// - `roots`: A vector of root CIDs in raw byte format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarHeader {
    version: u64,
    roots: Vec<RawLink>,
}

impl CarHeader {
    /// Creates a new CAR v1 header with the specified root CIDs
    pub fn new(roots: Vec<RawCid>) -> Self {
        let roots = roots.into_iter().map(RawLink::new).collect();
        CarHeader { roots, version: 1 }
    }

    /// Returns the version of the CAR format
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns a reference to the vector of root CIDs
    pub fn roots(&self) -> &[RawLink] {
        &self.roots
    }

    /// Returns the root CIDs unwrapped from their link form
    pub fn root_cids(&self) -> Vec<RawCid> {
        self.roots.iter().map(|link| link.cid().clone()).collect()
    }

    /// Checks if there are no root CIDs in the header
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Two headers match when their version and root lists are equal, in order.
    pub fn matches(&self, other: &CarHeader) -> bool {
        self.version == other.version && self.roots == other.roots
    }

    /// Encodes the header as it appears on disk: a varint length prefix followed
    /// by the CBOR map.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        ciborium::ser::into_writer(self, &mut body)
            .expect("Failed to serialize CAR header -- it is a bug if this happens");
        let mut bytes = UnsignedVarint(body.len() as u64).encode();
        bytes.extend_from_slice(&body);
        bytes
    }

    /// Reads a length-prefixed header from a positioned byte stream.
    ///
    /// # Returns
    ///
    /// * Ok((CarHeader, bytes_read)) - Parsed header and the total bytes consumed,
    ///   including the length prefix
    /// * Err(HeaderFormatError) - Error occurred during header reading
    pub fn read_from<R: Read>(r: &mut R) -> Result<(Self, usize), HeaderFormatError> {
        let (body, consumed) = read_frame(r)?;
        let header: CarHeader =
            ciborium::de::from_reader(body.as_slice()).map_err(HeaderFormatError::InvalidCbor)?;
        Ok((header, consumed))
    }
}

/// Minimal view of a header used to probe the archive version.
///
/// Both the CAR v1 header and the CAR v2 pragma are length-prefixed CBOR maps
/// carrying a `version` entry, so either can be probed this way.
#[derive(Deserialize)]
struct VersionProbe {
    version: u64,
}

/// Reads the format version from the start of an archive.
pub fn read_version<R: Read>(r: &mut R) -> Result<u64, HeaderFormatError> {
    let (body, _) = read_frame(r)?;
    let probe: VersionProbe =
        ciborium::de::from_reader(body.as_slice()).map_err(HeaderFormatError::InvalidCbor)?;
    Ok(probe.version)
}

/// Reads one varint-length-prefixed frame.
fn read_frame<R: Read>(r: &mut R) -> Result<(Vec<u8>, usize), HeaderFormatError> {
    let (length, varint_size) = match UnsignedVarint::read_from(r) {
        Ok(Some((length, varint_size))) => (length.0 as usize, varint_size),
        Ok(None) => return Err(HeaderFormatError::Truncated),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(HeaderFormatError::Truncated)
        }
        Err(e) => return Err(HeaderFormatError::Io(e)),
    };
    if length > MAX_HEADER_SIZE {
        return Err(HeaderFormatError::TooLarge(length));
    }
    let mut body = vec![0u8; length];
    match r.read_exact(&mut body) {
        Ok(()) => Ok((body, varint_size + length)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(HeaderFormatError::Truncated),
        Err(e) => Err(HeaderFormatError::Io(e)),
    }
}

/// Errors related to header encoding and decoding
#[derive(thiserror::Error, Debug)]
pub enum HeaderFormatError {
    /// The stream ended before the header was complete
    #[error("header cut short")]
    Truncated,
    /// The length prefix exceeds the decode limit
    #[error("header of {0} bytes exceeds the decode limit")]
    TooLarge(usize),
    /// The header body is not a valid CBOR map
    #[error("invalid header encoding")]
    InvalidCbor(#[source] ciborium::de::Error<io::Error>),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
