use std::io::{self, Read};

use ciborium::Value;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::wire::varint::UnsignedVarint;

/// Multicodec tag for raw binary data.
pub const RAW_CODEC: u64 = 0x55;

/// Multicodec tag implied by a CIDv0 (DagProtobuf).
pub const DAG_PB_CODEC: u64 = 0x70;

/// Upper bound on a multihash digest we are willing to decode from a stream.
const MAX_DIGEST_SIZE: usize = 1024;

/// Represents a raw CID (Content Identifier) in byte format
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RawCid(Vec<u8>);

impl RawCid {
    /// Creates a new RawCid from a vector of bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        RawCid(bytes)
    }

    /// Creates a RawCid from a hexadecimal string representation
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        Ok(RawCid::new(bytes))
    }

    /// Returns the byte representation of the RawCid
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the multicodec tag of the content this CID addresses.
    ///
    /// A CIDv0 has no explicit codec and is reported as DagProtobuf.
    pub fn codec(&self) -> u64 {
        if self.0.starts_with(&[0x12, 0x20]) {
            return DAG_PB_CODEC;
        }
        if self.0.first() == Some(&0x01) {
            if let Some((codec, _)) = UnsignedVarint::decode(&self.0[1..]) {
                return codec.0;
            }
        }
        0
    }

    /// Returns the multihash portion of the CID.
    ///
    /// A CIDv0 is a bare multihash, so the whole byte sequence is returned. For a CIDv1
    /// the version byte and the codec varint are stripped. Unrecognized byte sequences
    /// are returned whole.
    pub fn multihash(&self) -> &[u8] {
        if self.0.starts_with(&[0x12, 0x20]) {
            return &self.0;
        }
        if self.0.first() == Some(&0x01) {
            if let Some((_, codec_size)) = UnsignedVarint::decode(&self.0[1..]) {
                return &self.0[1 + codec_size..];
            }
        }
        &self.0
    }

    /// Splits the multihash into its algorithm code and digest bytes.
    ///
    /// Returns `None` if the multihash cannot be parsed or its recorded digest length
    /// does not match the remaining bytes.
    pub fn multihash_parts(&self) -> Option<(u64, &[u8])> {
        let mh = self.multihash();
        let (code, code_size) = UnsignedVarint::decode(mh)?;
        let (len, len_size) = UnsignedVarint::decode(&mh[code_size..])?;
        let digest = mh.get(code_size + len_size..)?;
        if digest.len() as u64 != len.0 {
            return None;
        }
        Some((code.0, digest))
    }

    /// Two CIDs are hash-equal when their multihash bytes match, regardless of codec.
    pub fn hash_equal(&self, other: &RawCid) -> bool {
        self.multihash() == other.multihash()
    }

    /// Builds a CIDv1 with the raw codec carrying this CID's multihash.
    ///
    /// This is the key form emitted by multihash-keyed stores that do not track the
    /// original codec of a block.
    pub fn raw_projection(&self) -> RawCid {
        let mh = self.multihash();
        let mut bytes = Vec::with_capacity(2 + mh.len());
        bytes.push(0x01);
        bytes.extend_from_slice(&UnsignedVarint(RAW_CODEC).encode());
        bytes.extend_from_slice(mh);
        RawCid(bytes)
    }

    pub fn try_read_bytes(bytes: &[u8]) -> Result<(Self, usize), CidFormatError> {
        if bytes.len() < 2 {
            return Err(CidFormatError::InsufficientData);
        }
        // Handle CIDv0 (DagProtobuf, SHA256-256, 32 bytes hash) - prefix Qm...
        if bytes.starts_with(&[0x12, 0x20]) {
            if bytes.len() < 34 {
                return Err(CidFormatError::InsufficientData);
            }
            let cid_bytes = bytes[..34].to_vec();
            return Ok((RawCid::new(cid_bytes), 34));
        }
        // Handle CIDv1 (multibase, multicodec, multihash)
        if bytes[0] == 0x01 {
            // Read the multicodec
            let (_multicodec, mc_size) = match UnsignedVarint::decode(&bytes[1..]) {
                Some((mc, size)) => (mc.0, size),
                None => return Err(CidFormatError::InsufficientData),
            };
            // Read the multihash
            let mh_start = 1 + mc_size;
            let (_mh_code, mh_code_size) = match UnsignedVarint::decode(&bytes[mh_start..]) {
                Some((code, size)) => (code.0, size),
                None => return Err(CidFormatError::InsufficientData),
            };
            let mh_len_start = mh_start + mh_code_size;
            let (mh_len, mh_len_size) = match UnsignedVarint::decode(&bytes[mh_len_start..]) {
                Some((len, size)) => (len.0 as usize, size),
                None => return Err(CidFormatError::InsufficientData),
            };
            if mh_len > MAX_DIGEST_SIZE {
                return Err(CidFormatError::InvalidLength(mh_len));
            }
            let total_cid_size = 1 + mc_size + mh_code_size + mh_len_size + mh_len;
            if bytes.len() < total_cid_size {
                return Err(CidFormatError::InsufficientData);
            }
            let cid_bytes = bytes[..total_cid_size].to_vec();
            return Ok((RawCid::new(cid_bytes), total_cid_size));
        }
        // Otherwise it is not supported yet
        Err(CidFormatError::UnsupportedVersion)
    }

    /// Reads a CID from a positioned byte stream.
    ///
    /// ## Returns
    /// - `Ok((RawCid, bytes_read))` on success.
    /// - `Err(CidFormatError::InsufficientData)` if the stream ended inside the CID.
    pub fn read_from<R: Read>(r: &mut R) -> Result<(Self, usize), CidFormatError> {
        let first = read_one(r)?;
        let mut bytes = vec![first];
        if first == 0x12 {
            // CIDv0: 0x12 0x20 followed by a 32-byte SHA2-256 digest.
            let second = read_one(r)?;
            bytes.push(second);
            if second != 0x20 {
                return Err(CidFormatError::UnsupportedVersion);
            }
            bytes.resize(34, 0);
            fill(r, &mut bytes[2..])?;
            return Ok((RawCid::new(bytes), 34));
        }
        if first != 0x01 {
            return Err(CidFormatError::UnsupportedVersion);
        }
        let _codec = read_uvarint(r, &mut bytes)?;
        let _mh_code = read_uvarint(r, &mut bytes)?;
        let mh_len = read_uvarint(r, &mut bytes)? as usize;
        if mh_len > MAX_DIGEST_SIZE {
            return Err(CidFormatError::InvalidLength(mh_len));
        }
        let digest_start = bytes.len();
        bytes.resize(digest_start + mh_len, 0);
        fill(r, &mut bytes[digest_start..])?;
        let total = bytes.len();
        Ok((RawCid::new(bytes), total))
    }
}

fn read_one<R: Read>(r: &mut R) -> Result<u8, CidFormatError> {
    let mut byte = [0u8; 1];
    fill(r, &mut byte)?;
    Ok(byte[0])
}

fn fill<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), CidFormatError> {
    match r.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CidFormatError::InsufficientData),
        Err(e) => Err(CidFormatError::Io(e)),
    }
}

/// Reads a LEB128 varint, appending the consumed bytes to `out`.
fn read_uvarint<R: Read>(r: &mut R, out: &mut Vec<u8>) -> Result<u64, CidFormatError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = read_one(r)?;
        out.push(byte);
        if shift >= 64 {
            return Err(CidFormatError::InvalidLength(out.len()));
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

impl std::fmt::Debug for RawCid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawCid({})", hex::encode(&self.0))
    }
}

impl std::fmt::Display for RawCid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawCid({})", hex::encode(&self.0))
    }
}

/// A CID as it appears inside CBOR structures such as the CAR v1 header.
///
/// Links are encoded as CBOR tag 42 wrapping the CID bytes prefixed by a single
/// `0x00` multibase identity byte.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RawLink(RawCid);

impl RawLink {
    /// Creates a new RawLink wrapping the given CID
    pub fn new(cid: RawCid) -> Self {
        RawLink(cid)
    }

    /// Returns the wrapped CID
    pub fn cid(&self) -> &RawCid {
        &self.0
    }

    /// Unwraps the link into its CID
    pub fn into_cid(self) -> RawCid {
        self.0
    }
}

impl From<RawCid> for RawLink {
    fn from(cid: RawCid) -> Self {
        RawLink(cid)
    }
}

impl Serialize for RawLink {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut bytes = Vec::with_capacity(1 + self.0 .0.len());
        bytes.push(0x00);
        bytes.extend_from_slice(self.0.bytes());
        let value = Value::Tag(42, Box::new(Value::Bytes(bytes)));
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RawLink {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Value::Tag(42, boxed_value) = value {
            if let Value::Bytes(bytes) = *boxed_value {
                // The leading multibase identity byte is not part of the CID itself.
                let cid_bytes = match bytes.split_first() {
                    Some((0x00, rest)) => rest.to_vec(),
                    _ => bytes,
                };
                return Ok(RawLink(RawCid::new(cid_bytes)));
            }
        }
        Err(D::Error::custom("Invalid CID link format"))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CidFormatError {
    #[error("Insufficient data for CID")]
    InsufficientData,
    #[error("Unsupported CID version")]
    UnsupportedVersion,
    #[error("Invalid CID length: {0}")]
    InvalidLength(usize),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::{RawCid, RawLink, DAG_PB_CODEC, RAW_CODEC};

    #[test]
    fn test_raw_link_serialization() {
        let link = RawLink::new(RawCid::new(vec![0x01, 0x55, 0x02, 0x03, 0x04]));

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&link, &mut buf).unwrap();
        let expected = vec![0xD8, 0x2A, 0x46, 0x00, 0x01, 0x55, 0x02, 0x03, 0x04]; // Tag 42
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_raw_link_deserialization() {
        let data = vec![0xD8, 0x2A, 0x46, 0x00, 0x01, 0x55, 0x02, 0x03, 0x04]; // Tag 42
        let link: RawLink = ciborium::de::from_reader(data.as_slice()).unwrap();
        let expected = RawLink::new(RawCid::new(vec![0x01, 0x55, 0x02, 0x03, 0x04]));
        assert_eq!(link, expected);
    }

    #[test]
    fn test_raw_link_deserialization_invalid_tag() {
        let invalid_data = vec![0xD8, 0x1A, 0x46, 0x00, 0x01, 0x55, 0x02, 0x03, 0x04]; // Tag 1 instead of 42
        let result: Result<RawLink, _> = ciborium::de::from_reader(invalid_data.as_slice());
        assert!(result.is_err());
    }

    #[test]
    fn test_raw_cid_bin_parsing_cidv0() {
        let cidv0_bytes =
            hex::decode("12200E7071C59DF3B9454D1D18A15270AA36D54F89606A576DC621757AFD44AD1D2E")
                .unwrap();
        let (parsed_cidv0, size_v0) = RawCid::try_read_bytes(&cidv0_bytes).unwrap();
        assert_eq!(size_v0, 34);
        assert_eq!(parsed_cidv0.bytes(), &cidv0_bytes[..34]);
    }

    #[test]
    fn test_raw_cid_bin_parsing_cidv1() {
        let cidv1_bytes = vec![
            1, 112, 18, 32, 44, 95, 104, 130, 98, 224, 236, 232, 86, 154, 166, 249, 77, 96, 170,
            213, 92, 168, 217, 216, 55, 52, 228, 167, 67, 13, 12, 255, 101, 136, 236, 43,
        ];
        let (parsed_cidv1, size_v1) = RawCid::try_read_bytes(&cidv1_bytes).unwrap();
        assert_eq!(size_v1, cidv1_bytes.len());
        assert_eq!(parsed_cidv1.bytes(), &cidv1_bytes[..]);
    }

    #[test]
    fn test_raw_cid_bin_parsing_cidv1_insufficient() {
        let cidv1_bytes = vec![
            1, 112, 18, 32, 44, 95, 104, 130, 98, 224, 236, 232, 86, 154, 166, 249, 77, 96, 170,
            213, 92, 168, 217, 216, 55, 52, 228, 167, 67, 13, 12, 255, 101, 136,
        ];
        let result = RawCid::try_read_bytes(&cidv1_bytes);
        assert!(matches!(
            result,
            Err(super::CidFormatError::InsufficientData)
        ));
    }

    #[test]
    fn test_raw_cid_stream_reading_matches_slice_parsing() {
        let cidv1_bytes = vec![
            1, 113, 18, 32, 44, 95, 104, 130, 98, 224, 236, 232, 86, 154, 166, 249, 77, 96, 170,
            213, 92, 168, 217, 216, 55, 52, 228, 167, 67, 13, 12, 255, 101, 136, 236, 43,
        ];
        let mut r = cidv1_bytes.as_slice();
        let (streamed, size) = RawCid::read_from(&mut r).unwrap();
        let (sliced, slice_size) = RawCid::try_read_bytes(&cidv1_bytes).unwrap();
        assert_eq!(streamed, sliced);
        assert_eq!(size, slice_size);
    }

    #[test]
    fn test_raw_cid_multihash_parts() {
        let cid = RawCid::from_hex(
            "01711220f88bc853804cf294fe417e4fa83028689fcdb1b1592c5102e1474dbc200fab8b",
        )
        .unwrap();
        assert_eq!(cid.codec(), 0x71);
        let (code, digest) = cid.multihash_parts().unwrap();
        assert_eq!(code, 0x12);
        assert_eq!(digest.len(), 32);
        assert_eq!(digest[0], 0xF8);
    }

    #[test]
    fn test_raw_cid_multihash_of_cidv0() {
        let cid = RawCid::from_hex(
            "12200E7071C59DF3B9454D1D18A15270AA36D54F89606A576DC621757AFD44AD1D2E",
        )
        .unwrap();
        assert_eq!(cid.multihash(), cid.bytes());
        assert_eq!(cid.codec(), DAG_PB_CODEC);
    }

    #[test]
    fn test_raw_cid_raw_projection() {
        let dag_cbor = RawCid::from_hex(
            "01711220f88bc853804cf294fe417e4fa83028689fcdb1b1592c5102e1474dbc200fab8b",
        )
        .unwrap();
        let raw = dag_cbor.raw_projection();
        assert_eq!(raw.codec(), RAW_CODEC);
        assert_eq!(raw.multihash(), dag_cbor.multihash());
        assert!(raw.hash_equal(&dag_cbor));
        assert_ne!(raw, dag_cbor);
    }
}
