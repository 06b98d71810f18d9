//! In-memory source opener that tracks open handles

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use streampool_lib::SourceOpener;
use symphonia::core::io::MediaSource;

#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.files.lock().insert(path.into(), content.into());
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.opens() - self.closes()
    }
}

impl SourceOpener for MemoryFs {
    fn open(&self, path: &Path) -> io::Result<Box<dyn MediaSource>> {
        let content = self
            .files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountedSource {
            inner: Cursor::new(content),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct CountedSource {
    inner: Cursor<Vec<u8>>,
    closes: Arc<AtomicUsize>,
}

impl Read for CountedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for CountedSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl MediaSource for CountedSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.inner.get_ref().len() as u64)
    }
}

impl Drop for CountedSource {
    fn drop(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
