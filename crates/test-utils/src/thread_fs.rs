//! A `MemHashFs` wrapper that remembers which threads called `stat`.

use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use siso::hashfs::{FileEntry, HashFs, HashFsError, MemHashFs};

/// Forwards everything to the wrapped `MemHashFs`. `stat` calls also log the
/// calling thread, so tests can check hashing stays off async workers.
#[derive(Debug, Clone)]
pub struct ThreadTrackingFs {
    inner: MemHashFs,
    stat_threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl ThreadTrackingFs {
    pub fn new(inner: MemHashFs) -> Self {
        Self {
            inner,
            stat_threads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Thread of every `stat` call so far, in call order.
    pub fn stat_threads(&self) -> Vec<ThreadId> {
        self.stat_threads.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.stat_threads.lock().unwrap().clear();
    }
}

impl HashFs for ThreadTrackingFs {
    fn stat(&self, path: &str) -> Result<FileEntry, HashFsError> {
        self.stat_threads
            .lock()
            .unwrap()
            .push(std::thread::current().id());
        self.inner.stat(path)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, HashFsError> {
        self.inner.read_file(path)
    }

    fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), HashFsError> {
        self.inner.write_file(path, contents)
    }

    fn remove(&self, path: &str) -> Result<(), HashFsError> {
        self.inner.remove(path)
    }

    fn refresh(&self, path: &str) -> Result<FileEntry, HashFsError> {
        self.inner.refresh(path)
    }

    fn flush(&self, paths: &[String]) -> Result<(), HashFsError> {
        self.inner.flush(paths)
    }
}
