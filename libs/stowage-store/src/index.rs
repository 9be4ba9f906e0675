//! The in-memory insertion index of a write session.
//!
//! While blocks are being put, the store tracks each key and the payload
//! offset of its section in an append-only multimap keyed by multihash. On
//! finalization the map is flattened into the digest-sorted on-disk form.
//! The same structure doubles as the ephemeral index generated by scanning
//! an archive that carries none.

use std::collections::HashMap;

use tracing::debug;

use stowage_car::wire::cid::{CidFormatError, RawCid};
use stowage_car::wire::v1::section::{Section, SectionFormatError};
use stowage_car::wire::v2::index::{Index, MultihashIndexSorted, NotFound};

use crate::error::{Error, Result};
use crate::options::ReadOptions;
use crate::source::{DataSource, SourceReader};

/// One recorded block.
#[derive(Debug, Clone)]
struct IndexRecord {
    /// Offset of the first byte of the section's length prefix, relative to
    /// the start of the data payload.
    offset: u64,
    /// The full CID the block was recorded under.
    cid: RawCid,
}

/// Append-only multimap from key to payload offsets, in insertion order.
#[derive(Debug, Default)]
pub struct InsertionIndex {
    /// Records in insertion order.
    records: Vec<IndexRecord>,
    /// Record positions keyed by multihash bytes.
    by_hash: HashMap<Vec<u8>, Vec<usize>>,
}

impl InsertionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records `cid` at `offset`. Existing entries for the same key are kept;
    /// the new entry is appended after them.
    pub fn insert_no_replace(&mut self, cid: &RawCid, offset: u64) {
        let position = self.records.len();
        self.by_hash
            .entry(cid.multihash().to_vec())
            .or_default()
            .push(position);
        self.records.push(IndexRecord {
            offset,
            cid: cid.clone(),
        });
    }

    /// Returns the offset of the first entry hash-matching `cid`, if any.
    pub fn get_any(&self, cid: &RawCid) -> Option<u64> {
        let positions = self.by_hash.get(cid.multihash())?;
        positions.first().map(|&p| self.records[p].offset)
    }

    /// Whether an entry with exactly this CID, codec included, is recorded.
    pub fn has_exact(&self, cid: &RawCid) -> bool {
        match self.by_hash.get(cid.multihash()) {
            Some(positions) => positions.iter().any(|&p| self.records[p].cid == *cid),
            None => false,
        }
    }

    /// Flattens the index into its persistable digest-sorted form.
    pub fn flatten(&self) -> Result<MultihashIndexSorted> {
        let mut records = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let (code, digest) = record
                .cid
                .multihash_parts()
                .ok_or(Error::BadCid(CidFormatError::UnsupportedVersion))?;
            records.push((code, digest.to_vec(), record.offset));
        }
        MultihashIndexSorted::from_records(records).map_err(Error::BadIndex)
    }
}

impl Index for InsertionIndex {
    fn get_all(
        &self,
        key: &RawCid,
        visit: &mut dyn FnMut(u64) -> bool,
    ) -> std::result::Result<(), NotFound> {
        let positions = self.by_hash.get(key.multihash()).ok_or(NotFound)?;
        for &position in positions {
            if !visit(self.records[position].offset) {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// What a payload scan produced.
pub(crate) struct ScanOutcome {
    /// Index over every complete section found.
    pub(crate) index: InsertionIndex,
    /// Offset one past the last complete section, relative to the payload
    /// start. This is where the next section would begin.
    pub(crate) cursor: u64,
}

/// Walks the sections of a data payload, recording each key and section start.
///
/// The scan starts at `start` (just past the v1 payload header) and stops at a
/// clean end of data, at a zero-length section when the option allows it, or at
/// a torn tail: a section whose frame decodes but whose bytes run past the end
/// of the payload. Torn tails are left unindexed so that a resumed write
/// session overwrites them. Structural decode failures are fatal.
pub(crate) fn scan_payload(
    src: &DataSource,
    start: u64,
    opts: &ReadOptions,
) -> Result<ScanOutcome> {
    let payload_end = src.len()?;
    let mut index = InsertionIndex::new();
    let mut reader = SourceReader::new(src.clone(), start);
    let mut cursor = start;
    loop {
        reader.seek_to(cursor);
        match Section::read_meta_from(&mut reader, opts.zero_length_section_as_eof) {
            Ok(None) => break,
            Ok(Some(meta)) => {
                let total = meta.total_size();
                if cursor + total > payload_end {
                    debug!(offset = cursor, "ignoring torn section tail");
                    break;
                }
                index.insert_no_replace(&meta.cid, cursor);
                cursor += total;
            }
            Err(SectionFormatError::InsufficientData) => {
                debug!(offset = cursor, "ignoring torn section tail");
                break;
            }
            Err(SectionFormatError::ZeroLength) => return Err(Error::MalformedPadding),
            Err(SectionFormatError::Io(e)) => return Err(Error::Io(e)),
            Err(e) => return Err(Error::CorruptPayload(e)),
        }
    }
    Ok(ScanOutcome { index, cursor })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(codec: u8, fill: u8) -> RawCid {
        let mut bytes = vec![0x01, codec, 0x12, 0x20];
        bytes.extend_from_slice(&[fill; 32]);
        RawCid::new(bytes)
    }

    #[test]
    fn test_insert_and_get_any() {
        let mut index = InsertionIndex::new();
        assert!(index.get_any(&cid(0x55, 0xAA)).is_none());
        index.insert_no_replace(&cid(0x55, 0xAA), 0);
        index.insert_no_replace(&cid(0x55, 0xBB), 59);
        assert_eq!(index.get_any(&cid(0x55, 0xAA)), Some(0));
        assert_eq!(index.get_any(&cid(0x55, 0xBB)), Some(59));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_get_any_matches_by_multihash() {
        let mut index = InsertionIndex::new();
        index.insert_no_replace(&cid(0x55, 0xAA), 7);
        // Same multihash under a different codec still resolves.
        assert_eq!(index.get_any(&cid(0x71, 0xAA)), Some(7));
    }

    #[test]
    fn test_has_exact_requires_whole_cid() {
        let mut index = InsertionIndex::new();
        index.insert_no_replace(&cid(0x55, 0xAA), 7);
        assert!(index.has_exact(&cid(0x55, 0xAA)));
        assert!(!index.has_exact(&cid(0x71, 0xAA)));
    }

    #[test]
    fn test_get_all_insertion_order() {
        let mut index = InsertionIndex::new();
        index.insert_no_replace(&cid(0x55, 0xAA), 40);
        index.insert_no_replace(&cid(0x71, 0xAA), 10);
        index.insert_no_replace(&cid(0x55, 0xBB), 90);
        let mut offsets = Vec::new();
        index
            .get_all(&cid(0x55, 0xAA), &mut |offset| {
                offsets.push(offset);
                true
            })
            .unwrap();
        assert_eq!(offsets, vec![40, 10]);
    }

    #[test]
    fn test_flatten_keeps_duplicate_order() {
        let mut index = InsertionIndex::new();
        index.insert_no_replace(&cid(0x55, 0xAA), 40);
        index.insert_no_replace(&cid(0x71, 0xAA), 10);
        let flat = index.flatten().unwrap();
        let mut offsets = Vec::new();
        flat.get_all(&cid(0x55, 0xAA), &mut |offset| {
            offsets.push(offset);
            true
        })
        .unwrap();
        assert_eq!(offsets, vec![40, 10]);
    }
}
