use std::io::{self, Read};

use crate::wire::cid::{CidFormatError, RawCid};
use crate::wire::varint::UnsignedVarint;

/// Largest section we are willing to decode.
///
/// Blocks of several megabytes are legitimate; this bound only guards the
/// decoders against garbage length prefixes.
pub const MAX_SECTION_SIZE: usize = 128 << 20;

/// A Block represents a data block in a CAR file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block(Vec<u8>);

impl Block {
    pub fn new(data: Vec<u8>) -> Self {
        Block(data)
    }

    pub fn data(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A Section represents a section in a CAR v1 payload,
/// which includes the length prefix, CID, and data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// CID of the block
    cid: RawCid,
    /// Data block
    block: Block,
}

/// Frame data of a section read without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionMeta {
    /// CID of the block
    pub cid: RawCid,
    /// Value of the length prefix: CID bytes plus payload bytes
    pub length: u64,
    /// Bytes consumed by the length prefix and the CID together
    pub header_size: usize,
}

impl SectionMeta {
    /// Size of the block payload that follows the CID.
    pub fn payload_size(&self) -> u64 {
        self.length - self.cid.bytes().len() as u64
    }

    /// Total on-disk size of the section, including the length prefix.
    pub fn total_size(&self) -> u64 {
        let varint_size = self.header_size - self.cid.bytes().len();
        varint_size as u64 + self.length
    }
}

impl Section {
    /// Creates a new Section
    pub fn new(cid: RawCid, block: Block) -> Self {
        Section { cid, block }
    }

    /// Returns the value of the section's length prefix: CID bytes plus payload bytes
    pub fn length(&self) -> u64 {
        (self.cid.bytes().len() + self.block.len()) as u64
    }

    /// Returns the CID of the section
    pub fn cid(&self) -> &RawCid {
        &self.cid
    }

    /// Returns the data block of the section
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Unwraps the section into its CID and block
    pub fn into_parts(self) -> (RawCid, Block) {
        (self.cid, self.block)
    }

    /// Encodes a section frame for the given CID and payload.
    pub fn encode(cid: &RawCid, data: &[u8]) -> Vec<u8> {
        let length = (cid.bytes().len() + data.len()) as u64;
        let mut bytes = UnsignedVarint(length).encode();
        bytes.reserve(length as usize);
        bytes.extend_from_slice(cid.bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    /// Converts the Section into bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        Self::encode(&self.cid, self.block.data())
    }

    /// Tries to read a Section from the given bytes
    ///
    /// # Returns
    ///
    /// * Ok((Section, total_section_size)) - Successfully read the section and the whole size of the section
    /// * Err(SectionFormatError) - Error occurred during parsing
    pub fn try_read_bytes(bytes: &[u8]) -> Result<(Self, usize), SectionFormatError> {
        let (length, varint_size) = match UnsignedVarint::decode(bytes) {
            Some((varint, size)) => (varint.0, size),
            None => {
                if bytes.len() > 16 {
                    return Err(SectionFormatError::InvalidSize(MAX_SECTION_SIZE + 1));
                } else {
                    return Err(SectionFormatError::InsufficientData);
                }
            }
        };
        if length == 0 {
            return Err(SectionFormatError::ZeroLength);
        }
        // Validate length
        if length as usize > MAX_SECTION_SIZE {
            return Err(SectionFormatError::InvalidSize(length as usize));
        }
        // Try to read the CID
        let cid_start = varint_size;
        let (cid, cid_size) = match RawCid::try_read_bytes(&bytes[cid_start..]) {
            Ok((cid, size)) => (cid, size),
            Err(CidFormatError::InsufficientData) => {
                return Err(SectionFormatError::InsufficientData);
            }
            Err(e) => return Err(SectionFormatError::InvalidCid(e)),
        };
        // Calculate block size
        let block_size = match (length as usize).checked_sub(cid_size) {
            Some(size) => size,
            None => return Err(SectionFormatError::InvalidSize(length as usize)),
        };
        if bytes.len() < varint_size + cid_size + block_size {
            return Err(SectionFormatError::InsufficientData);
        }
        // Read the block data
        let block_start = varint_size + cid_size;
        let block_data = &bytes[block_start..block_start + block_size];
        let block = Block::new(block_data.to_vec());
        Ok((
            Section::new(cid, block),
            varint_size + cid_size + block_size,
        ))
    }

    /// Reads the next section from a positioned byte stream.
    ///
    /// ## Returns
    /// - `Ok(Some((Section, bytes_read)))` on success.
    /// - `Ok(None)` at end of data: either a clean end of stream before the length
    ///   prefix, or a zero-length section when `zero_len_as_eof` is set.
    /// - `Err(SectionFormatError::ZeroLength)` on a zero-length section otherwise.
    pub fn read_from<R: Read>(
        r: &mut R,
        zero_len_as_eof: bool,
    ) -> Result<Option<(Self, usize)>, SectionFormatError> {
        let meta = match Self::read_meta_from(r, zero_len_as_eof)? {
            Some(meta) => meta,
            None => return Ok(None),
        };
        let mut data = vec![0u8; meta.payload_size() as usize];
        match r.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(SectionFormatError::InsufficientData)
            }
            Err(e) => return Err(SectionFormatError::Io(e)),
        }
        let consumed = meta.header_size + data.len();
        Ok(Some((Section::new(meta.cid, Block::new(data)), consumed)))
    }

    /// Reads the frame of the next section, leaving the payload unconsumed.
    ///
    /// This is the workhorse of payload scans: callers skip over the payload using
    /// [SectionMeta::total_size] instead of reading it. End-of-data conventions are
    /// the same as for [Section::read_from].
    pub fn read_meta_from<R: Read>(
        r: &mut R,
        zero_len_as_eof: bool,
    ) -> Result<Option<SectionMeta>, SectionFormatError> {
        let (length, varint_size) = match UnsignedVarint::read_from(r) {
            Ok(Some((length, varint_size))) => (length.0, varint_size),
            Ok(None) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(SectionFormatError::InsufficientData)
            }
            Err(e) => return Err(SectionFormatError::Io(e)),
        };
        if length == 0 {
            if zero_len_as_eof {
                return Ok(None);
            }
            return Err(SectionFormatError::ZeroLength);
        }
        if length as usize > MAX_SECTION_SIZE {
            return Err(SectionFormatError::InvalidSize(length as usize));
        }
        let (cid, cid_size) = match RawCid::read_from(r) {
            Ok((cid, size)) => (cid, size),
            Err(CidFormatError::InsufficientData) => {
                return Err(SectionFormatError::InsufficientData)
            }
            Err(CidFormatError::Io(e)) => return Err(SectionFormatError::Io(e)),
            Err(e) => return Err(SectionFormatError::InvalidCid(e)),
        };
        if (length as usize) < cid_size {
            return Err(SectionFormatError::InvalidSize(length as usize));
        }
        Ok(Some(SectionMeta {
            cid,
            length,
            header_size: varint_size + cid_size,
        }))
    }
}

/// Errors related to Section parsing
#[derive(thiserror::Error, Debug)]
pub enum SectionFormatError {
    /// Not enough data to parse the section
    #[error("Insufficient data for Section")]
    InsufficientData,

    /// Invalid CID format
    #[error("Invalid CID format: {0}")]
    InvalidCid(#[source] CidFormatError),

    /// Invalid size or length
    #[error("Invalid size or length: {0}")]
    InvalidSize(usize),

    /// A zero-length section, which is only valid as padding
    #[error("Zero-length section")]
    ZeroLength,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
