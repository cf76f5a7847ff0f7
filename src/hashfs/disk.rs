// src/hashfs/disk.rs

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::debug;

use super::{digest_bytes, digest_reader, FileEntry, HashFs, HashFsError};
use crate::path::clean;

/// Disk-backed HashFS rooted at the exec root.
///
/// Stat results (including the blake3 digest) are cached until the path is
/// written, removed or refreshed. Content written through [`HashFs::write_file`]
/// stays in memory until [`HashFs::flush`] asks for it on disk, which lets
/// remote outputs be materialized only when a local step needs them.
#[derive(Debug)]
pub struct DiskHashFs {
    root: PathBuf,
    state: Mutex<DiskState>,
}

#[derive(Debug, Default)]
struct DiskState {
    stats: HashMap<String, FileEntry>,
    dirty: HashMap<String, Vec<u8>>,
}

impl DiskHashFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(DiskState::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn io_err(path: &str, source: std::io::Error) -> HashFsError {
        if source.kind() == std::io::ErrorKind::NotFound {
            HashFsError::NotFound(path.to_string())
        } else {
            HashFsError::Io {
                path: path.to_string(),
                source,
            }
        }
    }

    fn stat_disk(&self, path: &str) -> Result<FileEntry, HashFsError> {
        let abs = self.abs(path);
        let meta = fs::metadata(&abs).map_err(|e| Self::io_err(path, e))?;
        let mtime = meta.modified().map_err(|e| Self::io_err(path, e))?;

        if meta.is_dir() {
            return Ok(FileEntry {
                is_dir: true,
                size: 0,
                mtime,
                digest: None,
            });
        }

        let file = File::open(&abs).map_err(|e| Self::io_err(path, e))?;
        let digest = digest_reader(file).map_err(|e| Self::io_err(path, e))?;
        debug!(path = %path, digest = %digest, "hashed file");
        Ok(FileEntry {
            is_dir: false,
            size: meta.len(),
            mtime,
            digest: Some(digest),
        })
    }
}

impl HashFs for DiskHashFs {
    fn stat(&self, path: &str) -> Result<FileEntry, HashFsError> {
        let path = clean(path);
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = state.stats.get(&path) {
                return Ok(entry.clone());
            }
        }
        // Hash without the lock; a write that landed meanwhile wins.
        let entry = self.stat_disk(&path)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.stats.entry(path).or_insert(entry).clone())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, HashFsError> {
        let path = clean(path);
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(data) = state.dirty.get(&path) {
                return Ok(data.clone());
            }
        }
        fs::read(self.abs(&path)).map_err(|e| Self::io_err(&path, e))
    }

    fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), HashFsError> {
        let path = clean(path);
        let entry = FileEntry {
            is_dir: false,
            size: contents.len() as u64,
            mtime: SystemTime::now(),
            digest: Some(digest_bytes(contents)),
        };
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.stats.insert(path.clone(), entry);
        state.dirty.insert(path, contents.to_vec());
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), HashFsError> {
        let path = clean(path);
        let was_dirty = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.stats.remove(&path);
            state.dirty.remove(&path).is_some()
        };
        match fs::remove_file(self.abs(&path)) {
            Ok(()) => Ok(()),
            Err(e) if was_dirty && e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }

    fn refresh(&self, path: &str) -> Result<FileEntry, HashFsError> {
        let path = clean(path);
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.stats.remove(&path);
            state.dirty.remove(&path);
        }
        self.stat(&path)
    }

    fn flush(&self, paths: &[String]) -> Result<(), HashFsError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for path in paths {
            let path = clean(path);
            let Some(data) = state.dirty.remove(&path) else {
                continue;
            };
            let abs = self.abs(&path);
            if let Some(parent) = abs.parent() {
                fs::create_dir_all(parent).map_err(|e| Self::io_err(&path, e))?;
            }
            fs::write(&abs, &data).map_err(|e| Self::io_err(&path, e))?;
            if let Ok(mtime) = fs::metadata(&abs).and_then(|m| m.modified()) {
                if let Some(entry) = state.stats.get_mut(&path) {
                    entry.mtime = mtime;
                }
            }
            debug!(path = %path, bytes = data.len(), "flushed file to disk");
        }
        Ok(())
    }
}
