use std::{
    io::{Error, ErrorKind, Read, Seek, SeekFrom},
    sync::Arc,
};

use bytes::Bytes;
use zarrs::storage::{ReadableStorageTraits, StoreKey, byte_range::ByteRange};

/// Minimum number of bytes fetched per request to the underlying store.
pub const DEFAULT_READ_AHEAD: u64 = 64 * 1024;

/// Provides [`Read`] and [`Seek`] over a single value of a readable store.
///
/// Reads are served with byte range requests to the store.
/// The most recent response is kept, and each request fetches at least `read_ahead` bytes,
/// so the many small reads made while parsing a zip index do not each become a request.
pub struct StorageValueReader<TStorage: ?Sized> {
    storage: Arc<TStorage>,
    key: StoreKey,
    size: u64,
    pos: u64,
    read_ahead: u64,
    buffer: Bytes,
    buffer_start: u64,
}

impl<TStorage: ?Sized + ReadableStorageTraits> StorageValueReader<TStorage> {
    /// Create a reader for the value at `key`, which is `size` bytes long.
    pub fn new(storage: Arc<TStorage>, key: StoreKey, size: u64) -> Self {
        Self {
            storage,
            key,
            size,
            pos: 0,
            read_ahead: DEFAULT_READ_AHEAD,
            buffer: Bytes::new(),
            buffer_start: 0,
        }
    }

    /// Set the minimum request size.
    #[must_use]
    pub fn with_read_ahead(mut self, read_ahead: u64) -> Self {
        self.read_ahead = read_ahead.max(1);
        self
    }

    fn buffered(&self) -> Option<&[u8]> {
        let offset = self.pos.checked_sub(self.buffer_start)?;
        let offset = usize::try_from(offset).ok()?;
        (offset < self.buffer.len()).then(|| &self.buffer[offset..])
    }

    fn fill(&mut self, wanted: u64) -> std::io::Result<()> {
        let length = wanted.max(self.read_ahead).min(self.size - self.pos);
        log::trace!("reading {length} bytes at {} of {}", self.pos, self.key.as_str());
        let bytes = self
            .storage
            .get_partial(&self.key, ByteRange::FromStart(self.pos, Some(length)))
            .map_err(Error::other)?
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("{} not found", self.key.as_str())))?;
        if bytes.is_empty() {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("no bytes returned for {} at {}", self.key.as_str(), self.pos),
            ));
        }
        self.buffer = bytes;
        self.buffer_start = self.pos;
        Ok(())
    }
}

impl<TStorage: ?Sized + ReadableStorageTraits> Read for StorageValueReader<TStorage> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() || self.pos >= self.size {
            return Ok(0);
        }
        if self.buffered().is_none() {
            self.fill(buf.len() as u64)?;
        }
        let Some(available) = self.buffered() else {
            return Ok(0);
        };
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<TStorage: ?Sized + ReadableStorageTraits> Seek for StorageValueReader<TStorage> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let invalid = || Error::from(ErrorKind::InvalidInput);
        self.pos = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(offset) => {
                let pos = i64::try_from(self.pos).map_err(|_| invalid())? + offset;
                u64::try_from(pos).map_err(|_| invalid())?
            }
            SeekFrom::End(offset) => {
                let pos = i64::try_from(self.size).map_err(|_| invalid())? + offset;
                u64::try_from(pos).map_err(|_| invalid())?
            }
        };
        Ok(self.pos)
    }
}
