//! Read-only access to a CAR-backed block store.
//!
//! A [ReadOnly] store answers lookups over a CAR v1 or v2 byte source through
//! an [Index]. The index is either supplied by the caller, loaded from the
//! archive when one is embedded, or generated by scanning the payload.
//!
//! All store state sits behind a single read-write lock: lookups and key scans
//! take the shared mode, while mutations performed by the read-write variant
//! take the exclusive mode. The key scan holds its shared lock for the whole
//! lifetime of the returned iterator.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use stowage_car::wire::cid::RawCid;
use stowage_car::wire::v1::header::{self, CarHeader, HeaderFormatError};
use stowage_car::wire::v1::section::{Block, Section, SectionFormatError, SectionMeta};
use stowage_car::wire::v2::header::CarV2Header;
use stowage_car::wire::v2::index::{Index, MultihashIndexSorted, NotFound};
use stowage_car::wire::v2::PRAGMA_SIZE;

use crate::error::{Error, Result};
use crate::index::{scan_payload, InsertionIndex};
use crate::options::ReadOptions;
use crate::source::{DataSource, ReadAt, SourceReader};
use crate::sync::{RwLock, RwLockReadGuard};

/// The operations exposed by every block store variant.
pub trait Blockstore {
    /// Whether the store contains a block for the given key.
    fn has(&self, key: &RawCid) -> Result<bool>;

    /// Returns the block stored under the given key.
    fn get(&self, key: &RawCid) -> Result<Block>;

    /// Returns the payload size of the block stored under the given key.
    fn get_size(&self, key: &RawCid) -> Result<usize>;

    /// Stores one block.
    fn put(&self, key: &RawCid, data: &[u8]) -> Result<()>;

    /// Stores a batch of blocks.
    fn put_many(&self, blocks: &[(RawCid, Block)]) -> Result<()>;
}

/// Store state guarded by the single read-write lock.
pub(crate) struct Repo {
    /// View of the data payload: a v1 header followed by sections.
    pub(crate) backing: DataSource,
    /// The content index over the payload.
    pub(crate) index: RepoIndex,
    /// Write cursor relative to the payload start; `None` outside write
    /// sessions. Bounds payload scans while a session is open, since bytes
    /// past the cursor are detritus from earlier aborted sessions.
    pub(crate) cursor: Option<u64>,
    /// Set once the archive has been finalized; every operation fails
    /// afterwards.
    pub(crate) finalized: bool,
}

impl Repo {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.finalized {
            Err(Error::Finalized)
        } else {
            Ok(())
        }
    }
}

/// Which index form the store holds. Lookup code only sees the [Index]
/// capability.
pub(crate) enum RepoIndex {
    Sorted(MultihashIndexSorted),
    Insertion(InsertionIndex),
}

impl RepoIndex {
    pub(crate) fn insertion(&self) -> &InsertionIndex {
        match self {
            RepoIndex::Insertion(index) => index,
            RepoIndex::Sorted(_) => {
                unreachable!("write sessions always hold an insertion index")
            }
        }
    }

    pub(crate) fn insertion_mut(&mut self) -> &mut InsertionIndex {
        match self {
            RepoIndex::Insertion(index) => index,
            RepoIndex::Sorted(_) => {
                unreachable!("write sessions always hold an insertion index")
            }
        }
    }
}

impl Index for RepoIndex {
    fn get_all(
        &self,
        key: &RawCid,
        visit: &mut dyn FnMut(u64) -> bool,
    ) -> std::result::Result<(), NotFound> {
        match self {
            RepoIndex::Sorted(index) => index.get_all(key, visit),
            RepoIndex::Insertion(index) => index.get_all(key, visit),
        }
    }
}

/// A read-only CAR block store.
///
/// Constructed over any [ReadAt] byte source holding a CAR v1 or v2 archive.
/// The backing is released when the store is dropped; [ReadOnly::close] makes
/// that explicit.
pub struct ReadOnly {
    pub(crate) repo: RwLock<Repo>,
    pub(crate) opts: ReadOptions,
}

impl ReadOnly {
    /// Creates a store over `source` with an optional pre-built index.
    ///
    /// The archive version is probed from the first bytes:
    /// - a v1 archive is served as-is, scanning it for an index if none was
    ///   given;
    /// - a v2 archive is narrowed to its data payload, using the embedded
    ///   index when the header records one and scanning otherwise.
    pub fn new<S: ReadAt + 'static>(
        source: S,
        index: Option<MultihashIndexSorted>,
        opts: ReadOptions,
    ) -> Result<Self> {
        Self::from_source(DataSource::new(Arc::new(source)), index, opts)
    }

    /// Opens a read-only store from a CAR file, either v1 or v2.
    ///
    /// If the archive does not embed an index, an ephemeral one is generated
    /// in memory by scanning the payload.
    pub fn open(path: impl AsRef<Path>, opts: ReadOptions) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(file, None, opts)
    }

    pub(crate) fn from_source(
        source: DataSource,
        index: Option<MultihashIndexSorted>,
        opts: ReadOptions,
    ) -> Result<Self> {
        let mut probe = SourceReader::new(source.clone(), 0);
        let version = header::read_version(&mut probe).map_err(header_err)?;
        let (backing, index) = match version {
            1 => {
                let index = match index {
                    Some(index) => RepoIndex::Sorted(index),
                    None => RepoIndex::Insertion(generate_index(&source, &opts)?),
                };
                (source, index)
            }
            2 => {
                let mut reader = SourceReader::new(source.clone(), PRAGMA_SIZE);
                let v2 = CarV2Header::read_from(&mut reader).map_err(eof_as_truncated)?;
                // A zero data size marks an unfinalized archive; its payload
                // then runs to the end of the source.
                let limit = if v2.data_size != 0 {
                    Some(v2.data_size)
                } else {
                    None
                };
                let backing = source.slice(v2.data_offset, limit);
                let index = match index {
                    Some(index) => RepoIndex::Sorted(index),
                    None if v2.has_index() => {
                        let mut reader = SourceReader::new(source.clone(), v2.index_offset);
                        RepoIndex::Sorted(MultihashIndexSorted::read_from(&mut reader)?)
                    }
                    None => RepoIndex::Insertion(generate_index(&backing, &opts)?),
                };
                (backing, index)
            }
            version => return Err(Error::UnsupportedVersion(version)),
        };
        Ok(ReadOnly {
            repo: RwLock::new(Repo {
                backing,
                index,
                cursor: None,
                finalized: false,
            }),
            opts,
        })
    }

    /// Whether the store contains a block for the given key.
    pub fn has(&self, key: &RawCid) -> Result<bool> {
        let repo = self.repo.read();
        repo.check_open()?;
        Ok(lookup(&repo, key, self.opts.use_whole_cids)?.is_some())
    }

    /// Returns the block stored under the given key.
    pub fn get(&self, key: &RawCid) -> Result<Block> {
        let repo = self.repo.read();
        repo.check_open()?;
        let (offset, meta) =
            lookup(&repo, key, self.opts.use_whole_cids)?.ok_or(Error::NotFound)?;
        let mut reader =
            SourceReader::new(repo.backing.clone(), offset + meta.header_size as u64);
        let mut data = vec![0u8; meta.payload_size() as usize];
        match reader.read_exact(&mut data) {
            Ok(()) => Ok(Block::new(data)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::Truncated),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Returns the payload size of the block stored under the given key.
    pub fn get_size(&self, key: &RawCid) -> Result<usize> {
        let repo = self.repo.read();
        repo.check_open()?;
        let (_, meta) = lookup(&repo, key, self.opts.use_whole_cids)?.ok_or(Error::NotFound)?;
        Ok(meta.payload_size() as usize)
    }

    /// Returns the root CIDs recorded in the archive's payload header.
    pub fn roots(&self) -> Result<Vec<RawCid>> {
        let repo = self.repo.read();
        repo.check_open()?;
        let (header, _) = read_payload_header(&repo)?;
        Ok(header.root_cids())
    }

    /// Returns a lazy iterator over every key recorded in the payload, in
    /// payload order.
    ///
    /// Under the default options each key is projected onto the raw codec,
    /// exposing only the recorded multihash; with
    /// [ReadOptions::use_whole_cids] the original CIDs are emitted.
    ///
    /// The iterator holds the store's shared lock until it is dropped, fully
    /// consumed, or cancelled through `cancel`; exclusive operations such as
    /// `put` and `finalize` block for that long. Decode failures terminate
    /// the iteration silently.
    pub fn all_keys(&self, cancel: Cancellation) -> Result<AllKeys<'_>> {
        let repo = self.repo.read();
        repo.check_open()?;
        let (_, consumed) = read_payload_header(&repo)?;
        let reader = SourceReader::new(repo.backing.clone(), consumed);
        let end = repo.cursor;
        Ok(AllKeys {
            reader,
            pos: consumed,
            end,
            whole_cids: self.opts.use_whole_cids,
            zero_len_as_eof: self.opts.zero_length_section_as_eof,
            cancel,
            done: false,
            _repo: repo,
        })
    }

    /// Releases the store and its backing source.
    ///
    /// This is the same as dropping the store; the borrow checker already
    /// guarantees that no [AllKeys] iterator is still outstanding.
    pub fn close(self) {}
}

/// Reads the v1 payload header from the start of the backing.
///
/// The header size is recomputed on every call rather than cached, since the
/// payload start is the only authoritative anchor.
fn read_payload_header(repo: &Repo) -> Result<(CarHeader, u64)> {
    let mut reader = SourceReader::new(repo.backing.clone(), 0);
    let (header, consumed) = CarHeader::read_from(&mut reader).map_err(header_err)?;
    Ok((header, consumed as u64))
}

fn generate_index(payload: &DataSource, opts: &ReadOptions) -> Result<InsertionIndex> {
    let mut reader = SourceReader::new(payload.clone(), 0);
    let (_, consumed) = CarHeader::read_from(&mut reader).map_err(header_err)?;
    Ok(scan_payload(payload, consumed as u64, opts)?.index)
}

/// Resolves `key` to the offset and frame of its section, if present.
///
/// The index is consulted for every candidate offset of the key's multihash.
/// Under whole-CID matching a codec mismatch keeps the iteration going; under
/// multihash matching the first candidate decides.
fn lookup(repo: &Repo, key: &RawCid, whole_cids: bool) -> Result<Option<(u64, SectionMeta)>> {
    let mut found: Option<(u64, SectionMeta)> = None;
    let mut failed: Option<Error> = None;
    let outcome = repo.index.get_all(key, &mut |offset| {
        let mut reader = SourceReader::new(repo.backing.clone(), offset);
        match Section::read_meta_from(&mut reader, false) {
            Ok(Some(meta)) => {
                let matched = if whole_cids {
                    meta.cid == *key
                } else {
                    meta.cid.hash_equal(key)
                };
                if matched {
                    found = Some((offset, meta));
                    false
                } else {
                    // Only whole-CID matching keeps looking past a mismatch.
                    whole_cids
                }
            }
            Ok(None) => {
                failed = Some(Error::Truncated);
                false
            }
            Err(e) => {
                failed = Some(section_err(e));
                false
            }
        }
    });
    if let Some(e) = failed {
        return Err(e);
    }
    match outcome {
        Ok(()) => Ok(found),
        Err(NotFound) => Ok(None),
    }
}

pub(crate) fn section_err(e: SectionFormatError) -> Error {
    match e {
        SectionFormatError::InsufficientData => Error::Truncated,
        SectionFormatError::InvalidCid(e) => Error::BadCid(e),
        SectionFormatError::ZeroLength => Error::MalformedPadding,
        SectionFormatError::Io(e) => Error::Io(e),
        e @ SectionFormatError::InvalidSize(_) => Error::CorruptPayload(e),
    }
}

pub(crate) fn header_err(e: HeaderFormatError) -> Error {
    match e {
        HeaderFormatError::Truncated => Error::Truncated,
        HeaderFormatError::Io(e) => Error::Io(e),
        e => Error::BadHeader(e),
    }
}

fn eof_as_truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Truncated
    } else {
        Error::Io(e)
    }
}

impl Blockstore for ReadOnly {
    fn has(&self, key: &RawCid) -> Result<bool> {
        ReadOnly::has(self, key)
    }

    fn get(&self, key: &RawCid) -> Result<Block> {
        ReadOnly::get(self, key)
    }

    fn get_size(&self, key: &RawCid) -> Result<usize> {
        ReadOnly::get_size(self, key)
    }

    fn put(&self, _key: &RawCid, _data: &[u8]) -> Result<()> {
        Err(Error::WriteOnReadOnly)
    }

    fn put_many(&self, _blocks: &[(RawCid, Block)]) -> Result<()> {
        Err(Error::WriteOnReadOnly)
    }
}

/// Cancellation signal for [ReadOnly::all_keys].
///
/// Clone the token to keep one half for cancelling while the other is handed
/// to the iterator.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the key scan to stop at the next step.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Lazy iterator over the keys of an archive, in payload order.
///
/// Produced by [ReadOnly::all_keys]. Holds the store's shared lock for its
/// whole lifetime.
pub struct AllKeys<'a> {
    reader: SourceReader,
    /// Position of the next section, relative to the payload start.
    pos: u64,
    /// Payload end when scanning a live write session; bytes past it are
    /// detritus and must not be decoded.
    end: Option<u64>,
    whole_cids: bool,
    zero_len_as_eof: bool,
    cancel: Cancellation,
    done: bool,
    _repo: RwLockReadGuard<'a, Repo>,
}

impl Iterator for AllKeys<'_> {
    type Item = RawCid;

    fn next(&mut self) -> Option<RawCid> {
        if self.done {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.done = true;
            return None;
        }
        if let Some(end) = self.end {
            if self.pos >= end {
                self.done = true;
                return None;
            }
        }
        self.reader.seek_to(self.pos);
        match Section::read_meta_from(&mut self.reader, self.zero_len_as_eof) {
            Ok(Some(meta)) => {
                let total = meta.total_size();
                if let Some(end) = self.end {
                    if self.pos + total > end {
                        self.done = true;
                        return None;
                    }
                }
                self.pos += total;
                if self.whole_cids {
                    Some(meta.cid)
                } else {
                    Some(meta.cid.raw_projection())
                }
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                // Decode failures end the walk without surfacing an error;
                // log them so they are not lost entirely.
                warn!(offset = self.pos, error = %e, "key scan stopped on undecodable section");
                self.done = true;
                None
            }
        }
    }
}
