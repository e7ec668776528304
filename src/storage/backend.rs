//! Storage backends - byte-addressed durable media under the [`Pager`].
//!
//! The pager only needs positioned reads and writes plus a durability barrier,
//! so backends stay small:
//! - [`FileStorage`] - a single file on the local filesystem
//! - [`MemoryStorage`] - a shared in-memory buffer, used by tests and
//!   throwaway databases; its [`MemoryHandle`] can inspect the bytes and inject
//!   write failures
//!
//! [`Pager`]: crate::storage::Pager

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::Result;

/// A durable, byte-addressed medium.
///
/// Writes must be all-or-nothing for a single call; the pager never issues a
/// write larger than one page.
pub trait Storage: Send {
    /// Fill `buf` with the bytes at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`, extending the medium if needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Block until previous writes are durable.
    fn sync(&mut self) -> Result<()>;

    /// Current size of the medium in bytes.
    fn size(&self) -> Result<u64>;
}

/// File-backed storage.
pub struct FileStorage {
    file: File,
}

impl FileStorage {
    /// Create a new file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Open an existing file.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl Storage for FileStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?; // fsync for durability
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[derive(Default)]
struct MemoryInner {
    data: Vec<u8>,
    fail_writes: bool,
    /// Writes allowed before every later write fails.
    write_budget: Option<u64>,
    writes: u64,
}

/// In-memory storage.
///
/// Cloning the [`MemoryHandle`] returned by [`MemoryStorage::handle`] gives a
/// test access to the same bytes after the storage has been handed to a pager.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a handle sharing this storage's bytes.
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Storage for MemoryStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let inner = self.inner.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > inner.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of storage").into());
        }
        buf.copy_from_slice(&inner.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes || inner.write_budget == Some(0) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure").into());
        }
        if let Some(budget) = inner.write_budget.as_mut() {
            *budget -= 1;
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > inner.data.len() {
            inner.data.resize(end, 0);
        }
        inner.data[start..end].copy_from_slice(data);
        inner.writes += 1;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.inner.lock().data.len() as u64)
    }
}

/// Shared view of a [`MemoryStorage`].
#[derive(Clone)]
pub struct MemoryHandle {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryHandle {
    /// Make every following write fail (`true`) or succeed (`false`).
    ///
    /// A failed write leaves the stored bytes untouched.
    pub fn fail_writes(&self, fail: bool) {
        let mut inner = self.inner.lock();
        inner.fail_writes = fail;
        inner.write_budget = None;
    }

    /// Let the next `n` writes succeed, then fail every write until
    /// [`MemoryHandle::fail_writes`] resets it.
    pub fn fail_writes_after(&self, n: u64) {
        let mut inner = self.inner.lock();
        inner.fail_writes = false;
        inner.write_budget = Some(n);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Copy of `len` stored bytes at `offset` (zero-padded past the end).
    pub fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let inner = self.inner.lock();
        let mut out = vec![0u8; len];
        let start = (offset as usize).min(inner.data.len());
        let end = (offset as usize + len).min(inner.data.len());
        out[..end - start].copy_from_slice(&inner.data[start..end]);
        out
    }

    /// Total stored bytes.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A storage over the same bytes, for reopening a store.
    pub fn storage(&self) -> MemoryStorage {
        MemoryStorage {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Overwrite stored bytes directly, bypassing failure injection.
    pub fn corrupt(&self, offset: u64, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        let start = offset as usize;
        inner.data[start..start + bytes.len()].copy_from_slice(bytes);
    }
}
