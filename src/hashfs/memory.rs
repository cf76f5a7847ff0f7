// src/hashfs/memory.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use super::{digest_bytes, FileEntry, HashFs, HashFsError};
use crate::path::clean;

#[derive(Debug, Clone)]
enum MemEntry {
    File { data: Vec<u8>, mtime: SystemTime },
    Dir { mtime: SystemTime },
}

/// In-memory HashFS.
///
/// Every write gets a strictly increasing mtime so ordering-based up-to-date
/// checks behave deterministically. Parent directories are created implicitly.
#[derive(Debug, Clone)]
pub struct MemHashFs {
    inner: Arc<Mutex<MemState>>,
}

#[derive(Debug)]
struct MemState {
    entries: HashMap<String, MemEntry>,
    clock: SystemTime,
}

impl Default for MemHashFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemHashFs {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ".".to_string(),
            MemEntry::Dir {
                mtime: SystemTime::UNIX_EPOCH,
            },
        );
        Self {
            inner: Arc::new(Mutex::new(MemState {
                entries,
                clock: SystemTime::UNIX_EPOCH,
            })),
        }
    }

    pub fn add_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.insert_file(&clean(path), contents.into());
    }

    /// Paths of all regular files, sorted.
    pub fn files(&self) -> Vec<String> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut files: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, MemEntry::File { .. }))
            .map(|(p, _)| p.clone())
            .collect();
        files.sort();
        files
    }
}

impl MemState {
    fn tick(&mut self) -> SystemTime {
        self.clock += Duration::from_secs(1);
        self.clock
    }

    fn insert_file(&mut self, path: &str, data: Vec<u8>) {
        let mtime = self.tick();
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.ensure_dir(parent, mtime);
        }
        self.entries
            .insert(path.to_string(), MemEntry::File { data, mtime });
    }

    fn ensure_dir(&mut self, path: &str, mtime: SystemTime) {
        let mut current = String::new();
        for comp in path.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(comp);
            self.entries
                .entry(current.clone())
                .or_insert(MemEntry::Dir { mtime });
        }
    }

    fn entry_of(&self, path: &str) -> Result<FileEntry, HashFsError> {
        match self.entries.get(path) {
            Some(MemEntry::File { data, mtime }) => Ok(FileEntry {
                is_dir: false,
                size: data.len() as u64,
                mtime: *mtime,
                digest: Some(digest_bytes(data)),
            }),
            Some(MemEntry::Dir { mtime }) => Ok(FileEntry {
                is_dir: true,
                size: 0,
                mtime: *mtime,
                digest: None,
            }),
            None => Err(HashFsError::NotFound(path.to_string())),
        }
    }
}

impl HashFs for MemHashFs {
    fn stat(&self, path: &str) -> Result<FileEntry, HashFsError> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.entry_of(&clean(path))
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, HashFsError> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let path = clean(path);
        match state.entries.get(&path) {
            Some(MemEntry::File { data, .. }) => Ok(data.clone()),
            Some(MemEntry::Dir { .. }) => Err(HashFsError::Io {
                path,
                source: std::io::Error::other("is a directory"),
            }),
            None => Err(HashFsError::NotFound(path)),
        }
    }

    fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), HashFsError> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.insert_file(&clean(path), contents.to_vec());
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), HashFsError> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let path = clean(path);
        match state.entries.remove(&path) {
            Some(_) => Ok(()),
            None => Err(HashFsError::NotFound(path)),
        }
    }

    fn refresh(&self, path: &str) -> Result<FileEntry, HashFsError> {
        self.stat(path)
    }

    fn flush(&self, _paths: &[String]) -> Result<(), HashFsError> {
        Ok(())
    }
}
