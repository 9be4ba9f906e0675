//! Incremental read-write store writing a self-indexed CAR v2 archive.
//!
//! Blocks are written to the file as soon as they are put, while the index is
//! kept in memory and grown incrementally. Finalizing the store flattens the
//! index into its sorted on-disk form and writes the v2 header; until then the
//! header region stays zeroed, which is what makes an aborted session
//! resumable: reopening the file re-indexes the sections already on disk and
//! continues appending where the last complete section ended.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use stowage_car::wire::cid::RawCid;
use stowage_car::wire::v1::header::CarHeader;
use stowage_car::wire::v1::section::{Block, Section};
use stowage_car::wire::v2::header::{CarV2Header, HEADER_SIZE};
use stowage_car::wire::v2::{CAR_V2_PRAGMA, PRAGMA_SIZE};

use crate::error::{Error, Result};
use crate::index::{scan_payload, InsertionIndex};
use crate::options::{ReadOptions, WriteOptions};
use crate::read::{header_err, AllKeys, Blockstore, Cancellation, ReadOnly, Repo, RepoIndex};
use crate::source::{DataSource, SourceReader};
use crate::sync::RwLock;

/// A read-write CAR block store over a single file.
///
/// The store embeds a [ReadOnly] view over the same file, so blocks can be
/// read back as soon as they are put. [ReadWrite::finalize] must be called
/// once writing is done; it writes the sorted index and the v2 header, after
/// which every operation on the store fails. Dropping the store without
/// finalizing leaves the file in its resumable, unfinalized state.
pub struct ReadWrite {
    ro: ReadOnly,
    file: Arc<File>,
    wopts: WriteOptions,
}

impl ReadWrite {
    /// Opens a read-write store at `path` with the given roots, creating the
    /// file if it does not exist.
    ///
    /// A fresh file is laid out as pragma, zeroed v2 header region, optional
    /// data padding, and the v1 payload header carrying `roots`. A non-empty
    /// file is resumed instead: it must carry a valid pragma and a payload
    /// header matching `roots`, and its data padding must match
    /// [WriteOptions::data_padding]. Resumption re-indexes every complete
    /// section on file, including those of a previously finalized archive,
    /// whose sorted index is discarded.
    pub fn open(
        path: impl AsRef<Path>,
        roots: Vec<RawCid>,
        ropts: ReadOptions,
        wopts: WriteOptions,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let size = file.metadata()?.len();
        let file = Arc::new(file);
        let data_offset = PRAGMA_SIZE + HEADER_SIZE + wopts.data_padding;
        let source = DataSource::new(file.clone());
        let backing = source.slice(data_offset, None);
        let (index, cursor) = if size == 0 {
            init(&file, &roots, data_offset)?
        } else {
            resume(&file, &source, &backing, &roots, data_offset, &ropts)?
        };
        Ok(ReadWrite {
            ro: ReadOnly {
                repo: RwLock::new(Repo {
                    backing,
                    index: RepoIndex::Insertion(index),
                    cursor: Some(cursor),
                    finalized: false,
                }),
                opts: ropts,
            },
            file,
            wopts,
        })
    }

    /// Absolute offset of the data payload within the file.
    fn data_offset(&self) -> u64 {
        PRAGMA_SIZE + HEADER_SIZE + self.wopts.data_padding
    }

    /// Stores one block.
    pub fn put(&self, key: &RawCid, data: &[u8]) -> Result<()> {
        self.put_many(&[(key.clone(), Block::new(data.to_vec()))])
    }

    /// Stores a batch of blocks.
    ///
    /// Sections land on disk in the order given, and each block is visible to
    /// reads as soon as this call returns. Unless
    /// [WriteOptions::allow_duplicate_puts] is set, blocks already present
    /// under the effective matching policy are skipped.
    pub fn put_many(&self, blocks: &[(RawCid, Block)]) -> Result<()> {
        let mut repo = self.ro.repo.write();
        if repo.finalized {
            return Err(Error::Finalized);
        }
        let repo = &mut *repo;
        let mut cursor = match repo.cursor {
            Some(cursor) => cursor,
            None => unreachable!("write sessions always track a cursor"),
        };
        for (key, block) in blocks {
            if !self.wopts.allow_duplicate_puts {
                let duplicate = if self.ro.opts.use_whole_cids {
                    repo.index.insertion().has_exact(key)
                } else {
                    repo.index.insertion().get_any(key).is_some()
                };
                if duplicate {
                    continue;
                }
            }
            let section = Section::encode(key, block.data());
            write_all_at(&self.file, self.data_offset() + cursor, &section)?;
            repo.index.insertion_mut().insert_no_replace(key, cursor);
            cursor += section.len() as u64;
        }
        repo.cursor = Some(cursor);
        Ok(())
    }

    /// Finalizes the archive, writing the sorted index and the v2 header.
    ///
    /// Must be called exactly once per session, whether or not any blocks were
    /// put. The header is written last so that a crash mid-finalization leaves
    /// the file unfinalized and resumable. The file is flushed to the medium
    /// before this call returns; afterwards every operation on the store fails
    /// and the file handle is released when the store is dropped.
    pub fn finalize(&self) -> Result<()> {
        let mut repo = self.ro.repo.write();
        if repo.finalized {
            return Err(Error::FinalizedTwice);
        }
        let data_size = match repo.cursor {
            Some(cursor) => cursor,
            None => unreachable!("write sessions always track a cursor"),
        };
        let flat = repo.index.insertion().flatten()?;
        let data_offset = self.data_offset();
        let index_offset = data_offset + data_size + self.wopts.index_padding;
        let mut index_bytes = Vec::new();
        flat.write_to(&mut index_bytes)?;
        write_all_at(&self.file, index_offset, &index_bytes)?;
        // The index must run to the end of the file; drop any detritus left
        // over from an aborted session that the payload did not overwrite.
        self.file.set_len(index_offset + index_bytes.len() as u64)?;
        let mut header = CarV2Header::new().with_data_padding(self.wopts.data_padding);
        header.data_size = data_size;
        header.index_offset = index_offset;
        // The header is written last: a crash before this point leaves
        // data_size zero, which resumption reads as "not finalized".
        write_all_at(&self.file, PRAGMA_SIZE, &header.encode())?;
        self.file.sync_all()?;
        repo.finalized = true;
        debug!(data_size, index_offset, "archive finalized");
        Ok(())
    }

    /// Whether the store contains a block for the given key.
    pub fn has(&self, key: &RawCid) -> Result<bool> {
        self.ro.has(key)
    }

    /// Returns the block stored under the given key.
    pub fn get(&self, key: &RawCid) -> Result<Block> {
        self.ro.get(key)
    }

    /// Returns the payload size of the block stored under the given key.
    pub fn get_size(&self, key: &RawCid) -> Result<usize> {
        self.ro.get_size(key)
    }

    /// Returns the root CIDs this session was opened with, as recorded in the
    /// payload header.
    pub fn roots(&self) -> Result<Vec<RawCid>> {
        self.ro.roots()
    }

    /// Returns a lazy iterator over every key written so far, in payload
    /// order. See [ReadOnly::all_keys].
    pub fn all_keys(&self, cancel: Cancellation) -> Result<AllKeys<'_>> {
        self.ro.all_keys(cancel)
    }
}

impl Blockstore for ReadWrite {
    fn has(&self, key: &RawCid) -> Result<bool> {
        ReadWrite::has(self, key)
    }

    fn get(&self, key: &RawCid) -> Result<Block> {
        ReadWrite::get(self, key)
    }

    fn get_size(&self, key: &RawCid) -> Result<usize> {
        ReadWrite::get_size(self, key)
    }

    fn put(&self, key: &RawCid, data: &[u8]) -> Result<()> {
        ReadWrite::put(self, key, data)
    }

    fn put_many(&self, blocks: &[(RawCid, Block)]) -> Result<()> {
        ReadWrite::put_many(self, blocks)
    }
}

/// Lays out a fresh file: pragma, zeroed header region, payload header.
fn init(file: &File, roots: &[RawCid], data_offset: u64) -> Result<(InsertionIndex, u64)> {
    write_all_at(file, 0, CAR_V2_PRAGMA)?;
    // The v2 header region stays zeroed: data_size == 0 marks the archive as
    // not finalized.
    write_all_at(file, PRAGMA_SIZE, &[0u8; HEADER_SIZE as usize])?;
    let header_bytes = CarHeader::new(roots.to_vec()).encode();
    write_all_at(file, data_offset, &header_bytes)?;
    Ok((InsertionIndex::new(), header_bytes.len() as u64))
}

/// Reconstructs writer state from a non-empty file.
fn resume(
    file: &File,
    source: &DataSource,
    backing: &DataSource,
    roots: &[RawCid],
    data_offset: u64,
    ropts: &ReadOptions,
) -> Result<(InsertionIndex, u64)> {
    let mut pragma = [0u8; PRAGMA_SIZE as usize];
    match source.read_exact_at(0, &mut pragma) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(Error::Truncated),
        Err(e) => return Err(e.into()),
    }
    if &pragma[..] != CAR_V2_PRAGMA {
        return Err(Error::NotACarV2);
    }

    let mut header_bytes = [0u8; HEADER_SIZE as usize];
    match source.read_exact_at(PRAGMA_SIZE, &mut header_bytes) {
        Ok(()) => {
            let header = CarV2Header::from(header_bytes);
            if header.data_offset != 0 {
                if header.data_offset != data_offset {
                    return Err(Error::PaddingMismatch {
                        expected: header.data_offset.saturating_sub(PRAGMA_SIZE + HEADER_SIZE),
                        actual: data_offset - PRAGMA_SIZE - HEADER_SIZE,
                    });
                }
                if header.data_size != 0 {
                    // The file was finalized. The sorted index cannot be
                    // turned back into an insertion index, so drop it and
                    // regenerate from the payload.
                    debug!(
                        data_size = header.data_size,
                        "truncating finalized archive for resumption"
                    );
                    file.set_len(header.data_offset + header.data_size)?;
                } else {
                    // A recorded data offset without a data size means the
                    // header region itself was torn mid-write.
                    return Err(Error::CorruptHeader);
                }
                unfinalize(file)?;
            }
        }
        // A header region that was never fully written reads as unfinalized.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
        Err(e) => return Err(e.into()),
    }

    let mut reader = SourceReader::new(backing.clone(), 0);
    let (header, consumed) = CarHeader::read_from(&mut reader).map_err(header_err)?;
    if !header.matches(&CarHeader::new(roots.to_vec())) {
        return Err(Error::RootMismatch);
    }

    let outcome = scan_payload(backing, consumed as u64, ropts)?;
    debug!(
        blocks = outcome.index.len(),
        cursor = outcome.cursor,
        "resumed write session"
    );
    Ok((outcome.index, outcome.cursor))
}

/// Zeroes the v2 header region so that a later abort leaves the file in the
/// non-finalized state again.
fn unfinalize(file: &File) -> io::Result<()> {
    write_all_at(file, PRAGMA_SIZE, &[0u8; HEADER_SIZE as usize])
}

#[cfg(unix)]
fn write_all_at(file: &File, offset: u64, buf: &[u8]) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut offset: u64, mut buf: &[u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_write(buf, offset)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "failed to write whole buffer",
            ));
        }
        offset += n as u64;
        buf = &buf[n..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use stowage_car::wire::v2::index::MultihashIndexSorted;

    fn cid(codec: u8, fill: u8) -> RawCid {
        let mut bytes = vec![0x01, codec, 0x12, 0x20];
        bytes.extend_from_slice(&[fill; 32]);
        RawCid::new(bytes)
    }

    fn tmp() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.car");
        (dir, path)
    }

    fn open_default(path: &Path, roots: Vec<RawCid>) -> ReadWrite {
        ReadWrite::open(path, roots, ReadOptions::default(), WriteOptions::default()).unwrap()
    }

    #[test]
    fn test_write_finalize_reopen_read_only() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);
        let k2 = cid(0x55, 0xBB);

        let store = open_default(&path, vec![root.clone()]);
        store.put(&k1, b"abc").unwrap();
        store.put(&k2, b"de").unwrap();
        // Blocks are visible to reads within the same session.
        assert!(store.has(&k1).unwrap());
        assert_eq!(store.get(&k2).unwrap().data(), b"de");
        store.finalize().unwrap();
        drop(store);

        // Inspect the on-file layout.
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..11], CAR_V2_PRAGMA);
        let header = CarV2Header::from(<[u8; 40]>::try_from(&bytes[11..51]).unwrap());
        let payload_header_size = CarHeader::new(vec![root.clone()]).encode().len() as u64;
        let expected_data_size = payload_header_size
            + Section::encode(&k1, b"abc").len() as u64
            + Section::encode(&k2, b"de").len() as u64;
        assert_eq!(header.data_offset, 51);
        assert_eq!(header.data_size, expected_data_size);
        assert_eq!(header.index_offset, 51 + expected_data_size);
        let mut index_region = &bytes[header.index_offset as usize..];
        let index = MultihashIndexSorted::read_from(&mut index_region).unwrap();
        assert_eq!(index.len(), 2);

        // Reopen read-only; the embedded index serves lookups.
        let store = ReadOnly::open(&path, ReadOptions::default()).unwrap();
        assert_eq!(store.roots().unwrap(), vec![root]);
        assert_eq!(store.get(&k1).unwrap().data(), b"abc");
        assert_eq!(store.get(&k2).unwrap().data(), b"de");
        assert!(!store.has(&cid(0x55, 0x99)).unwrap());
    }

    #[test]
    fn test_resume_after_abort() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);

        let store = open_default(&path, vec![root.clone()]);
        store.put(&k1, b"x").unwrap();
        drop(store); // abort without finalizing

        let store = open_default(&path, vec![root.clone()]);
        assert_eq!(store.get(&k1).unwrap().data(), b"x");
        drop(store);

        let other_root = cid(0x71, 0x02);
        let result = ReadWrite::open(
            &path,
            vec![other_root],
            ReadOptions::default(),
            WriteOptions::default(),
        );
        assert!(matches!(result, Err(Error::RootMismatch)));
    }

    #[test]
    fn test_dedup_by_multihash() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k_cbor = cid(0x71, 0xAA);
        let k_raw = cid(0x55, 0xAA);

        let store = open_default(&path, vec![root]);
        store.put(&k_cbor, b"first").unwrap();
        store.put(&k_raw, b"second").unwrap(); // same multihash: skipped
        let keys: Vec<_> = store.all_keys(Cancellation::new()).unwrap().collect();
        assert_eq!(keys.len(), 1);
        assert_eq!(store.get(&k_raw).unwrap().data(), b"first");
    }

    #[test]
    fn test_whole_cids_stores_both_codecs() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k_cbor = cid(0x71, 0xAA);
        let k_raw = cid(0x55, 0xAA);

        let ropts = ReadOptions::default().with_use_whole_cids(true);
        let store =
            ReadWrite::open(&path, vec![root], ropts, WriteOptions::default()).unwrap();
        store.put(&k_cbor, b"dag-cbor").unwrap();
        store.put(&k_raw, b"raw").unwrap();
        assert_eq!(store.get(&k_cbor).unwrap().data(), b"dag-cbor");
        assert_eq!(store.get(&k_raw).unwrap().data(), b"raw");
        let keys: Vec<_> = store.all_keys(Cancellation::new()).unwrap().collect();
        assert_eq!(keys, vec![k_cbor, k_raw]);
    }

    #[test]
    fn test_duplicate_puts_allowed_when_opted_in() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);

        let wopts = WriteOptions::default().with_allow_duplicate_puts(true);
        let store = ReadWrite::open(&path, vec![root], ReadOptions::default(), wopts).unwrap();
        store.put(&k1, b"a").unwrap();
        store.put(&k1, b"a").unwrap();
        let keys: Vec<_> = store.all_keys(Cancellation::new()).unwrap().collect();
        assert_eq!(keys.len(), 2);
        store.finalize().unwrap();
    }

    #[test]
    fn test_resume_finalized_archive() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);
        let k2 = cid(0x71, 0xBB);

        let store = open_default(&path, vec![root.clone()]);
        store.put(&k1, b"one").unwrap();
        store.finalize().unwrap();
        drop(store);
        let finalized_len = std::fs::metadata(&path).unwrap().len();

        // Resumption drops the sorted index and truncates back to the data.
        let store = open_default(&path, vec![root.clone()]);
        assert!(std::fs::metadata(&path).unwrap().len() < finalized_len);
        assert_eq!(store.get(&k1).unwrap().data(), b"one");
        store.put(&k2, b"two").unwrap();
        store.finalize().unwrap();
        drop(store);

        let store = ReadOnly::open(&path, ReadOptions::default()).unwrap();
        assert_eq!(store.get(&k1).unwrap().data(), b"one");
        assert_eq!(store.get(&k2).unwrap().data(), b"two");
        let keys: Vec<_> = store.all_keys(Cancellation::new()).unwrap().collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_resume_padding_mismatch() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);

        let store = open_default(&path, vec![root.clone()]);
        store.put(&cid(0x71, 0xAA), b"x").unwrap();
        store.finalize().unwrap();
        drop(store);

        let wopts = WriteOptions::default().with_data_padding(8);
        let result = ReadWrite::open(&path, vec![root], ReadOptions::default(), wopts);
        match result {
            Err(Error::PaddingMismatch { expected, actual }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 8);
            }
            other => panic!("expected PaddingMismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_data_padding_round_trip() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);

        let wopts = WriteOptions::default()
            .with_data_padding(16)
            .with_index_padding(4);
        let store =
            ReadWrite::open(&path, vec![root.clone()], ReadOptions::default(), wopts).unwrap();
        store.put(&k1, b"padded").unwrap();
        drop(store);

        // Resuming with the same padding works.
        let store =
            ReadWrite::open(&path, vec![root.clone()], ReadOptions::default(), wopts).unwrap();
        assert_eq!(store.get(&k1).unwrap().data(), b"padded");
        store.finalize().unwrap();
        drop(store);

        let bytes = std::fs::read(&path).unwrap();
        let header = CarV2Header::from(<[u8; 40]>::try_from(&bytes[11..51]).unwrap());
        assert_eq!(header.data_offset, 51 + 16);
        assert_eq!(header.index_offset, header.data_offset + header.data_size + 4);

        let store = ReadOnly::open(&path, ReadOptions::default()).unwrap();
        assert_eq!(store.get(&k1).unwrap().data(), b"padded");
    }

    #[test]
    fn test_resume_overwrites_torn_tail() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);
        let k2 = cid(0x71, 0xBB);

        let store = open_default(&path, vec![root.clone()]);
        store.put(&k1, b"kept").unwrap();
        drop(store);

        // Simulate a crash mid-section: a length prefix promising more bytes
        // than the file holds.
        use std::io::Write;
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x30, 0x01, 0x71, 0x12]).unwrap();
        drop(file);

        let store = open_default(&path, vec![root.clone()]);
        assert!(store.has(&k1).unwrap());
        // The torn bytes were not indexed.
        let keys: Vec<_> = store.all_keys(Cancellation::new()).unwrap().collect();
        assert_eq!(keys.len(), 1);
        // The next put overwrites them.
        store.put(&k2, b"overwrites the tail").unwrap();
        assert_eq!(store.get(&k2).unwrap().data(), b"overwrites the tail");
        store.finalize().unwrap();
        drop(store);

        let store = ReadOnly::open(&path, ReadOptions::default()).unwrap();
        assert_eq!(store.get(&k1).unwrap().data(), b"kept");
        assert_eq!(store.get(&k2).unwrap().data(), b"overwrites the tail");
    }

    #[test]
    fn test_resume_zero_length_section_policies() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);

        let store = open_default(&path, vec![root.clone()]);
        store.put(&k1, b"x").unwrap();
        drop(store);

        use std::io::Write;
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x00]).unwrap();
        drop(file);

        // The resumption scanner fails hard on null padding by default.
        let result = ReadWrite::open(
            &path,
            vec![root.clone()],
            ReadOptions::default(),
            WriteOptions::default(),
        );
        assert!(matches!(result, Err(Error::MalformedPadding)));

        // With the option set, the zero-length section ends the payload and
        // the next put overwrites it.
        let ropts = ReadOptions::default().with_zero_length_section_as_eof(true);
        let store =
            ReadWrite::open(&path, vec![root.clone()], ropts, WriteOptions::default()).unwrap();
        assert!(store.has(&k1).unwrap());
        let k2 = cid(0x71, 0xBB);
        store.put(&k2, b"y").unwrap();
        assert_eq!(store.get(&k2).unwrap().data(), b"y");
    }

    #[test]
    fn test_finalized_store_rejects_everything() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);

        let store = open_default(&path, vec![root]);
        store.put(&k1, b"x").unwrap();
        store.finalize().unwrap();

        assert!(matches!(store.finalize(), Err(Error::FinalizedTwice)));
        assert!(matches!(store.put(&k1, b"x"), Err(Error::Finalized)));
        assert!(matches!(store.get(&k1), Err(Error::Finalized)));
        assert!(matches!(store.has(&k1), Err(Error::Finalized)));
        assert!(matches!(store.get_size(&k1), Err(Error::Finalized)));
        assert!(matches!(store.roots(), Err(Error::Finalized)));
        assert!(store.all_keys(Cancellation::new()).is_err());
    }

    #[test]
    fn test_resume_corrupt_header() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);

        // A header recording a data offset but no data size is a torn write.
        let mut header = CarV2Header::new();
        header.data_size = 0;
        let mut bytes = CAR_V2_PRAGMA.to_vec();
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(&CarHeader::new(vec![root.clone()]).encode());
        std::fs::write(&path, &bytes).unwrap();

        let result = ReadWrite::open(
            &path,
            vec![root],
            ReadOptions::default(),
            WriteOptions::default(),
        );
        assert!(matches!(result, Err(Error::CorruptHeader)));
    }

    #[test]
    fn test_resume_rejects_foreign_file() {
        let (_dir, path) = tmp();
        std::fs::write(&path, b"this is not a car archive").unwrap();
        let result = ReadWrite::open(
            &path,
            vec![cid(0x71, 0x01)],
            ReadOptions::default(),
            WriteOptions::default(),
        );
        assert!(matches!(result, Err(Error::NotACarV2)));
    }

    #[test]
    fn test_unfinalized_file_opens_read_only() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);

        let store = open_default(&path, vec![root.clone()]);
        store.put(&k1, b"x").unwrap();
        drop(store);

        // An unfinalized v2 archive has no index; one is generated by scan.
        let store = ReadOnly::open(&path, ReadOptions::default()).unwrap();
        assert_eq!(store.roots().unwrap(), vec![root]);
        assert_eq!(store.get(&k1).unwrap().data(), b"x");
    }

    #[test]
    fn test_finalize_empty_store() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);

        let store = open_default(&path, vec![root.clone()]);
        store.finalize().unwrap();
        drop(store);

        let store = ReadOnly::open(&path, ReadOptions::default()).unwrap();
        assert_eq!(store.roots().unwrap(), vec![root]);
        assert!(!store.has(&cid(0x71, 0xAA)).unwrap());
        assert_eq!(store.all_keys(Cancellation::new()).unwrap().count(), 0);
    }

    #[test]
    fn test_put_many_keeps_order() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);
        let k2 = cid(0x71, 0xBB);
        let k3 = cid(0x71, 0xCC);

        let store = open_default(&path, vec![root]);
        store
            .put_many(&[
                (k1.clone(), Block::new(b"1".to_vec())),
                (k2.clone(), Block::new(b"2".to_vec())),
                (k3.clone(), Block::new(b"3".to_vec())),
            ])
            .unwrap();
        let keys: Vec<_> = store.all_keys(Cancellation::new()).unwrap().collect();
        assert_eq!(
            keys,
            vec![k1.raw_projection(), k2.raw_projection(), k3.raw_projection()]
        );
    }

    #[test]
    fn test_multi_megabyte_block_round_trip() {
        let (_dir, path) = tmp();
        let root = cid(0x71, 0x01);
        let k1 = cid(0x71, 0xAA);
        let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| i as u8).collect();

        let store = open_default(&path, vec![root.clone()]);
        store.put(&k1, &payload).unwrap();
        assert_eq!(store.get_size(&k1).unwrap(), payload.len());
        store.finalize().unwrap();
        drop(store);

        let store = ReadOnly::open(&path, ReadOptions::default()).unwrap();
        assert_eq!(store.get(&k1).unwrap().data(), payload.as_slice());
    }
}
