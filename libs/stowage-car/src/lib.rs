//! stowage-car is a Rust library for reading and writing the wire format of CAR
//! (Content Addressable aRchive) files, which are used in the IPFS ecosystem to
//! store collections of content-addressed data.
//!
//! The library covers both the CAR v1 and CAR v2 formats: the length-prefixed
//! CBOR header, the section framing around each block, the fixed v2 pragma and
//! header, and the digest-sorted index embedded in finalized v2 archives.
//!
//! The main philosophy of the library is to provide a simple and efficient API
//! for working with CAR files, while staying close to the underlying
//! specifications and formats. All codecs operate on byte slices or positioned
//! byte streams and perform no file I/O of their own, so they can be driven from
//! files, memory buffers or network streams alike.
//!
//! Higher-level concerns such as block lookup, deduplication and write-session
//! resumption are built on top of these codecs by `stowage-store`.
//!
//! ## Alternatives
//!
//! Alternatives to this library include:
//! - [rs-car](https://crates.io/crates/rs-car)
//! - [rust-car](https://crates.io/crates/rust-car)
//! - [blockless-car](https://crates.io/crates/blockless-car)

pub mod wire;

pub use wire::cid::{RawCid, RawLink};
pub use wire::v1::header::CarHeader;
pub use wire::v1::section::{Block, Section, SectionMeta};
pub use wire::v2::header::CarV2Header;
pub use wire::v2::index::{Index, MultihashIndexSorted, NotFound};
pub use wire::v2::CAR_V2_PRAGMA;
