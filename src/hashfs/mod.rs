// src/hashfs/mod.rs

//! Content-addressed view of the build tree.
//!
//! Paths are exec-root relative. The scheduler treats "exists per HashFS" as
//! proof that a target is a source leaf; the builder reads and removes
//! depfiles through it and records step outputs after execution.
//!
//! - [`memory::MemHashFs`] keeps everything in memory (tests, dry runs).
//! - [`disk::DiskHashFs`] is backed by the real filesystem.

pub mod disk;
pub mod memory;

use std::fmt::Debug;
use std::io::Read;
use std::time::SystemTime;

use blake3::Hasher;
use thiserror::Error;

pub use disk::DiskHashFs;
pub use memory::MemHashFs;

#[derive(Error, Debug)]
pub enum HashFsError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl HashFsError {
    pub fn is_not_found(&self) -> bool {
        match self {
            HashFsError::NotFound(_) => true,
            HashFsError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
        }
    }
}

/// What HashFS knows about a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub is_dir: bool,
    pub size: u64,
    pub mtime: SystemTime,
    /// blake3 hex digest of the contents; `None` for directories.
    pub digest: Option<String>,
}

/// Abstract content-addressed filesystem.
pub trait HashFs: Send + Sync + Debug {
    fn stat(&self, path: &str) -> Result<FileEntry, HashFsError>;
    fn read_file(&self, path: &str) -> Result<Vec<u8>, HashFsError>;
    fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), HashFsError>;
    fn remove(&self, path: &str) -> Result<(), HashFsError>;

    /// Drop any cached state for `path` and stat it again. Used after a local
    /// process has written the path behind HashFS's back.
    fn refresh(&self, path: &str) -> Result<FileEntry, HashFsError>;

    /// Make sure the given paths are materialized on disk.
    fn flush(&self, paths: &[String]) -> Result<(), HashFsError>;

    fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }
}

/// blake3 hex digest of an in-memory buffer.
pub fn digest_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// blake3 hex digest of a reader, streamed in 8 KiB chunks.
pub fn digest_reader(mut reader: impl Read) -> std::io::Result<String> {
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
