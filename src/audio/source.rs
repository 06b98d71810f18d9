// Source handles for compressed audio
// A source is any symphonia `MediaSource`; closing it is dropping it

use std::fs::File;
use std::io;
use std::path::Path;

use symphonia::core::io::MediaSource;

/// Opens the compressed container behind a path.
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> io::Result<Box<dyn MediaSource>>;
}

/// Opens sources from the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystem;

impl SourceOpener for FileSystem {
    fn open(&self, path: &Path) -> io::Result<Box<dyn MediaSource>> {
        let file = File::open(path)?;
        Ok(Box::new(file))
    }
}
