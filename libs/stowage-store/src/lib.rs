//! A content-addressed block store backed by a single CAR file.
//!
//! Two store variants are provided on top of the wire codecs of
//! [`stowage_car`]:
//!
//! - [ReadOnly] serves `has` / `get` / `get_size` / `roots` and a lazy,
//!   cancellable key scan over an existing CAR v1 or v2 archive, backed by any
//!   random-access byte source. Lookups go through an index: the one embedded
//!   in a finalized v2 archive, a caller-supplied one, or an ephemeral index
//!   generated by scanning the payload.
//! - [ReadWrite] maintains an incremental write session over a CAR v2 file.
//!   Blocks hit the disk as soon as they are put and are immediately readable
//!   back; the index grows in memory and is only written out, together with
//!   the v2 header, by [ReadWrite::finalize]. Until finalization the header
//!   region stays zeroed, so a crashed session can be resumed: reopening the
//!   file re-indexes the sections already written and continues where the
//!   last complete section ended.
//!
//! Both variants serve concurrent readers; a single read-write lock per store
//! excludes mutations while reads are in flight, including a key scan that is
//! still being drained.

pub mod error;
pub mod index;
pub mod options;
pub mod read;
pub mod source;
mod sync;
pub mod write;

pub use error::{Error, Result};
pub use index::InsertionIndex;
pub use options::{ReadOptions, WriteOptions};
pub use read::{AllKeys, Blockstore, Cancellation, ReadOnly};
pub use write::ReadWrite;

pub use stowage_car::wire::v1::section::Block;
pub use stowage_car::RawCid;
