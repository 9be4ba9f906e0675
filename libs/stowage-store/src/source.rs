//! Random-access byte sources backing a store.
//!
//! A store reads its archive through the [ReadAt] capability so that files and
//! in-memory buffers can back it alike. [DataSource] layers a sub-range view on
//! top, which is how the data payload of a CARv2 file is exposed without the
//! surrounding pragma, header and index regions. [SourceReader] adapts a
//! [DataSource] to [std::io::Read] for the positioned codecs of `stowage-car`.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

/// A byte source that can be read at arbitrary offsets.
pub trait ReadAt: Send + Sync {
    /// Reads up to `buf.len()` bytes at the given absolute offset.
    ///
    /// A return of `Ok(0)` for a non-empty `buf` signals end of data.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total size of the source in bytes.
    fn size(&self) -> io::Result<u64>;
}

#[cfg(unix)]
impl ReadAt for File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

#[cfg(windows)]
impl ReadAt for File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.as_slice().read_at(offset, buf)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }
}

/// A cheaply clonable view of a region of a byte source.
///
/// Offsets passed to a `DataSource` are relative to its base; reads past the
/// optional limit report end of data.
#[derive(Clone)]
pub struct DataSource {
    inner: Arc<dyn ReadAt>,
    base: u64,
    limit: Option<u64>,
}

impl DataSource {
    /// Creates a view over the whole of `inner`.
    pub fn new(inner: Arc<dyn ReadAt>) -> Self {
        DataSource {
            inner,
            base: 0,
            limit: None,
        }
    }

    /// Creates a sub-view starting `base` bytes into this view, optionally
    /// bounded to `limit` bytes.
    pub fn slice(&self, base: u64, limit: Option<u64>) -> Self {
        DataSource {
            inner: self.inner.clone(),
            base: self.base + base,
            limit,
        }
    }

    /// Reads up to `buf.len()` bytes at `offset` within the view.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let cap = match self.limit {
            Some(limit) => {
                if offset >= limit {
                    return Ok(0);
                }
                buf.len().min((limit - offset) as usize)
            }
            None => buf.len(),
        };
        self.inner.read_at(self.base + offset, &mut buf[..cap])
    }

    /// Reads exactly `buf.len()` bytes at `offset`, failing with
    /// [io::ErrorKind::UnexpectedEof] if the view ends first.
    pub fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(offset, buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "source ended before the read completed",
                    ))
                }
                Ok(n) => {
                    offset += n as u64;
                    buf = &mut buf[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Number of bytes visible through the view.
    pub fn len(&self) -> io::Result<u64> {
        let total = self.inner.size()?;
        let available = total.saturating_sub(self.base);
        Ok(match self.limit {
            Some(limit) => available.min(limit),
            None => available,
        })
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("base", &self.base)
            .field("limit", &self.limit)
            .finish()
    }
}

/// Size of the internal read buffer.
const CHUNK_SIZE: usize = 8 * 1024;

/// A buffered reader positioned inside a [DataSource].
///
/// Tracks its absolute position within the view so that codecs consuming it can
/// be repositioned between records without re-opening anything.
pub struct SourceReader {
    src: DataSource,
    pos: u64,
    buf: Vec<u8>,
    /// Position of the first buffered byte.
    buf_pos: u64,
}

impl SourceReader {
    pub fn new(src: DataSource, pos: u64) -> Self {
        SourceReader {
            src,
            pos,
            buf: Vec::new(),
            buf_pos: 0,
        }
    }

    /// Current position within the view.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Repositions the reader. Buffered bytes stay valid and are reused when
    /// the new position falls inside them.
    pub fn seek_to(&mut self, pos: u64) {
        self.pos = pos;
    }
}

impl Read for SourceReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        // Serve from the buffer when the position falls inside it.
        if self.pos >= self.buf_pos && self.pos < self.buf_pos + self.buf.len() as u64 {
            let start = (self.pos - self.buf_pos) as usize;
            let n = (self.buf.len() - start).min(out.len());
            out[..n].copy_from_slice(&self.buf[start..start + n]);
            self.pos += n as u64;
            return Ok(n);
        }
        // Large reads bypass the buffer entirely.
        if out.len() >= CHUNK_SIZE {
            let n = self.src.read_at(self.pos, out)?;
            self.pos += n as u64;
            return Ok(n);
        }
        self.buf.resize(CHUNK_SIZE, 0);
        let n = self.src.read_at(self.pos, &mut self.buf)?;
        self.buf.truncate(n);
        self.buf_pos = self.pos;
        if n == 0 {
            return Ok(0);
        }
        let n = n.min(out.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(bytes: &[u8]) -> DataSource {
        DataSource::new(Arc::new(bytes.to_vec()))
    }

    #[test]
    fn test_data_source_slice_and_limit() {
        let src = source(b"0123456789");
        let view = src.slice(2, Some(5));
        assert_eq!(view.len().unwrap(), 5);

        let mut buf = [0u8; 10];
        let n = view.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"23456");

        let n = view.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"6");
        assert_eq!(view.read_at(5, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_data_source_limit_beyond_eof() {
        let src = source(b"0123");
        let view = src.slice(2, Some(100));
        assert_eq!(view.len().unwrap(), 2);
    }

    #[test]
    fn test_data_source_read_exact_at_short() {
        let src = source(b"0123");
        let mut buf = [0u8; 8];
        let err = src.read_exact_at(0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_source_reader_sequential_and_seek() {
        let src = source(b"hello world");
        let mut reader = SourceReader::new(src, 0);
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(reader.position(), 5);

        reader.seek_to(6);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"world");
    }
}
