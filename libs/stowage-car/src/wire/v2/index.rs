//! # Index structure for CAR v2 files
//!
//! This module defines the index structure used in CAR v2 files,
//! which allows for efficient lookup of blocks by their CIDs.
//!
//! Two index types are defined in the CAR v2 specification:
//! - 0x0400 - IndexSorted: a sorted index of all the blocks in the CAR file, identified by their raw hash digest (not CID) and offset in the file.
//! - 0x0401 - MultihashIndexSorted: a sorted index of all the blocks in the CAR file, similarly identified but the hash function is also specified.
//!
//! The index is stored at the end of the CAR v2 file, and its start offset is indicated in the CAR v2 header.
//! The first bytes of the index indicate its type (LEB128 varint).
//!
//! ## MultihashIndexSorted (0x0401)
//!
//! This is the form written here. Entries are grouped into buckets by multihash
//! code (u64, LEB128 varint), smallest code first. Each bucket carries the width
//! of an entry (digest size + 8 bytes for the offset) as u32le and the number of
//! entries in the bucket as u64le, followed by the entries themselves: the raw
//! digest immediately followed by the offset as u64le. Entries within a bucket
//! are sorted by digest; entries with equal digests keep their original order.
//!
//! Offsets recorded in the index point at the first byte of a section's length
//! prefix, relative to the start of the data payload.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crate::wire::cid::RawCid;
use crate::wire::varint::UnsignedVarint;

/// Lookup contract shared by every index form.
///
/// Implemented by the persisted sorted index in this module and by in-memory
/// indexes built during a write session. Code performing lookups should not
/// need to know which form it holds.
pub trait Index {
    /// Visits the recorded offset of every entry whose multihash matches `key`.
    ///
    /// The visitor returns `false` to stop the iteration early. When no entry
    /// matches, `Err(NotFound)` is returned and the visitor is never called.
    fn get_all(&self, key: &RawCid, visit: &mut dyn FnMut(u64) -> bool) -> Result<(), NotFound>;
}

/// Lookup miss returned by [Index::get_all].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("key not found in index")]
pub struct NotFound;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enum representing the type of index in a CAR v2 file
pub enum IndexType {
    /// IndexSorted type (0x0400)
    IndexSorted = 0x0400,
    /// MultihashIndexSorted type (0x0401)
    MultihashIndexSorted = 0x0401,
}

impl IndexType {
    /// Creates an IndexType from a u64 value
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0x0400 => Some(IndexType::IndexSorted),
            0x0401 => Some(IndexType::MultihashIndexSorted),
            _ => None,
        }
    }
}

/// Represents a single entry in the CAR v2 index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Raw hash digest of the block
    pub digest: Vec<u8>,
    /// Offset of the block section relative to the start of the data payload
    pub offset: u64,
}

/// One bucket of entries sharing a multihash code.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Bucket {
    /// Width of each entry: digest size plus 8 bytes for the offset
    width: u32,
    /// Entries sorted by digest
    entries: Vec<IndexEntry>,
}

/// The persisted, digest-sorted index form of a CAR v2 archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultihashIndexSorted {
    /// Buckets keyed by multihash code, smallest first.
    buckets: BTreeMap<u64, Bucket>,
}

impl MultihashIndexSorted {
    /// Creates an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all buckets
    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Builds the index from `(multihash code, digest, offset)` records.
    ///
    /// Records are stable-sorted by digest within each code bucket, so records
    /// with equal digests keep the order they were given in. All digests under
    /// one code must share a length.
    pub fn from_records(
        records: Vec<(u64, Vec<u8>, u64)>,
    ) -> Result<Self, IndexFormatError> {
        let mut grouped: BTreeMap<u64, Vec<IndexEntry>> = BTreeMap::new();
        for (code, digest, offset) in records {
            grouped
                .entry(code)
                .or_default()
                .push(IndexEntry { digest, offset });
        }
        let mut buckets = BTreeMap::new();
        for (code, mut entries) in grouped {
            let digest_size = entries[0].digest.len();
            if entries.iter().any(|e| e.digest.len() != digest_size) {
                return Err(IndexFormatError::MixedDigestLength(code));
            }
            entries.sort_by(|a, b| a.digest.cmp(&b.digest));
            buckets.insert(
                code,
                Bucket {
                    width: digest_size as u32 + 8,
                    entries,
                },
            );
        }
        Ok(MultihashIndexSorted { buckets })
    }

    /// Writes the index in its on-disk form.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&UnsignedVarint(IndexType::MultihashIndexSorted as u64).encode())?;
        for (code, bucket) in &self.buckets {
            w.write_all(&UnsignedVarint(*code).encode())?;
            w.write_all(&bucket.width.to_le_bytes())?;
            w.write_all(&(bucket.entries.len() as u64).to_le_bytes())?;
            for entry in &bucket.entries {
                w.write_all(&entry.digest)?;
                w.write_all(&entry.offset.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Reads an index from a positioned byte stream, consuming it until end of data.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, IndexFormatError> {
        let codec = match UnsignedVarint::read_from(r).map_err(eof_as_truncated)? {
            Some((codec, _)) => codec.0,
            None => return Err(IndexFormatError::Truncated),
        };
        match IndexType::from_u64(codec) {
            Some(IndexType::MultihashIndexSorted) => {}
            Some(IndexType::IndexSorted) => {
                return Err(IndexFormatError::UnsupportedIndexType(codec))
            }
            None => return Err(IndexFormatError::UnknownIndexType(codec)),
        }
        let mut buckets = BTreeMap::new();
        loop {
            let code = match UnsignedVarint::read_from(r).map_err(eof_as_truncated)? {
                Some((code, _)) => code.0,
                None => break, // the index runs to the end of its region
            };
            let mut width = [0u8; 4];
            read_exact(r, &mut width)?;
            let width = u32::from_le_bytes(width);
            if width <= 8 {
                return Err(IndexFormatError::BadEntryWidth(width));
            }
            let mut count = [0u8; 8];
            read_exact(r, &mut count)?;
            let count = u64::from_le_bytes(count);
            let mut entries = Vec::new();
            for _ in 0..count {
                let mut digest = vec![0u8; width as usize - 8];
                read_exact(r, &mut digest)?;
                let mut offset = [0u8; 8];
                read_exact(r, &mut offset)?;
                entries.push(IndexEntry {
                    digest,
                    offset: u64::from_le_bytes(offset),
                });
            }
            if buckets.insert(code, Bucket { width, entries }).is_some() {
                return Err(IndexFormatError::DuplicateBucket(code));
            }
        }
        Ok(MultihashIndexSorted { buckets })
    }
}

impl Index for MultihashIndexSorted {
    fn get_all(&self, key: &RawCid, visit: &mut dyn FnMut(u64) -> bool) -> Result<(), NotFound> {
        let (code, digest) = key.multihash_parts().ok_or(NotFound)?;
        let bucket = self.buckets.get(&code).ok_or(NotFound)?;
        let start = bucket
            .entries
            .partition_point(|e| e.digest.as_slice() < digest);
        let mut found = false;
        for entry in &bucket.entries[start..] {
            if entry.digest != digest {
                break;
            }
            found = true;
            if !visit(entry.offset) {
                return Ok(());
            }
        }
        if found {
            Ok(())
        } else {
            Err(NotFound)
        }
    }
}

fn eof_as_truncated(e: io::Error) -> IndexFormatError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        IndexFormatError::Truncated
    } else {
        IndexFormatError::Io(e)
    }
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), IndexFormatError> {
    r.read_exact(buf).map_err(eof_as_truncated)
}

/// Errors related to index encoding and decoding
#[derive(thiserror::Error, Debug)]
pub enum IndexFormatError {
    /// The stream ended before the index was complete
    #[error("index cut short")]
    Truncated,
    /// The index codec is recognized but not readable here
    #[error("unsupported index type {0:#06x}")]
    UnsupportedIndexType(u64),
    /// The index codec is not recognized at all
    #[error("unknown index type {0:#06x}")]
    UnknownIndexType(u64),
    /// A bucket declares an entry width that cannot hold an offset
    #[error("invalid index entry width {0}")]
    BadEntryWidth(u32),
    /// The same multihash code appears in two buckets
    #[error("duplicate index bucket for multihash code {0:#x}")]
    DuplicateBucket(u64),
    /// Digests of differing lengths under one multihash code
    #[error("mixed digest lengths under multihash code {0:#x}")]
    MixedDigestLength(u64),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
