// src/path/mod.rs

//! Path handling for the build.
//!
//! Commands run in a working directory (`dir`, e.g. `out/Default`) below the
//! exec root, and emit paths relative to it. Everything the scheduler stores
//! (graph paths, HashFS keys, deps log entries) is exec-root relative.
//! [`ExecPaths`] converts between the two and interns the results.
//!
//! There are two flavours of conversion:
//! - [`ExecPaths::from_wd`] is strict and returns a [`PathError`].
//! - [`ExecPaths::maybe_from_wd`] never fails; it logs a warning and returns
//!   the input unchanged. Dependency discovery uses this one, since compilers
//!   report paths we never validated.

pub mod interner;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::warn;

pub use interner::Interner;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path {path:?} (relative to {dir:?}) escapes the exec root")]
    OutsideExecRoot { path: String, dir: String },
}

/// Exec-root / working-directory path conversions, memoized per build.
#[derive(Debug)]
pub struct ExecPaths {
    exec_root: PathBuf,
    /// Cleaned, slash-separated form of `exec_root` used for prefix matching.
    root_str: String,
    dir: String,
    interner: Interner,
    from_wd_cache: Mutex<HashMap<String, Arc<str>>>,
}

impl ExecPaths {
    /// `exec_root` should be absolute; `dir` is relative to it.
    pub fn new(exec_root: impl Into<PathBuf>, dir: &str) -> Self {
        let exec_root = exec_root.into();
        let root_str = clean(&exec_root.to_string_lossy());
        let dir = clean(dir);
        Self {
            exec_root,
            root_str,
            dir,
            interner: Interner::new(),
            from_wd_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn exec_root(&self) -> &Path {
        &self.exec_root
    }

    /// Working directory relative to the exec root.
    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn intern(&self, s: &str) -> Arc<str> {
        self.interner.intern(s)
    }

    /// Absolute on-disk location of an exec-root relative path.
    pub fn abs(&self, path: &str) -> PathBuf {
        if is_abs(path) {
            PathBuf::from(path)
        } else {
            self.exec_root.join(path)
        }
    }

    /// Convert a working-directory relative path into an exec-root relative
    /// one.
    ///
    /// Absolute paths under the exec root are made relative to it; absolute
    /// paths elsewhere are returned unchanged. Results are cached, and equal
    /// inputs return the same interned `Arc<str>`.
    pub fn from_wd(&self, path: &str) -> Result<Arc<str>, PathError> {
        let path = to_slash(path);
        {
            let cache = self.from_wd_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(path.as_ref()) {
                return Ok(Arc::clone(hit));
            }
        }

        let resolved = if is_abs(&path) {
            let cleaned = clean(&path);
            if cleaned == self.root_str {
                ".".to_string()
            } else if let Some(rest) = cleaned
                .strip_prefix(self.root_str.as_str())
                .and_then(|r| r.strip_prefix('/'))
            {
                rest.to_string()
            } else {
                path.to_string()
            }
        } else {
            let joined = clean(&format!("{}/{}", self.dir, path));
            if joined == ".." || joined.starts_with("../") {
                return Err(PathError::OutsideExecRoot {
                    path: path.to_string(),
                    dir: self.dir.clone(),
                });
            }
            joined
        };

        let interned = self.interner.intern(&resolved);
        let mut cache = self.from_wd_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(path.into_owned(), Arc::clone(&interned));
        Ok(interned)
    }

    /// Lenient variant of [`from_wd`](Self::from_wd).
    pub fn maybe_from_wd(&self, path: &str) -> Arc<str> {
        match self.from_wd(path) {
            Ok(p) => p,
            Err(err) => {
                warn!(path = %path, error = %err, "failed to convert path to exec-root relative");
                self.interner.intern(path)
            }
        }
    }

    /// Convert an exec-root relative path into one relative to the working
    /// directory (e.g. `src/foo.cc` -> `../../src/foo.cc`).
    pub fn to_wd(&self, path: &str) -> String {
        if is_abs(path) {
            return path.to_string();
        }
        let target = clean(path);
        let dir_parts: Vec<&str> = components(&self.dir);
        let target_parts: Vec<&str> = components(&target);

        let common = dir_parts
            .iter()
            .zip(target_parts.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let mut out: Vec<&str> = Vec::new();
        for _ in common..dir_parts.len() {
            out.push("..");
        }
        out.extend_from_slice(&target_parts[common..]);

        if out.is_empty() {
            ".".to_string()
        } else {
            out.join("/")
        }
    }
}

fn components(path: &str) -> Vec<&str> {
    if path == "." {
        return Vec::new();
    }
    path.split('/').filter(|c| !c.is_empty()).collect()
}

fn is_abs(path: &str) -> bool {
    path.starts_with('/') || Path::new(path).is_absolute()
}

fn to_slash(path: &str) -> std::borrow::Cow<'_, str> {
    if path.contains('\\') {
        std::borrow::Cow::Owned(path.replace('\\', "/"))
    } else {
        std::borrow::Cow::Borrowed(path)
    }
}

/// Lexically clean a slash-separated path: drop `.` and empty components and
/// fold `..` into its parent where possible.
pub fn clean(path: &str) -> String {
    let path = to_slash(path);
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => match parts.last() {
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                _ => {
                    if !rooted {
                        parts.push("..");
                    }
                }
            },
            c => parts.push(c),
        }
    }

    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_folds_dots() {
        assert_eq!(clean("out/Default/../../src/./a.cc"), "src/a.cc");
        assert_eq!(clean("../x"), "../x");
        assert_eq!(clean("/a/../../b"), "/b");
        assert_eq!(clean(""), ".");
        assert_eq!(clean("a//b/"), "a/b");
    }

    #[test]
    fn to_wd_walks_up_from_dir() {
        let paths = ExecPaths::new("/src", "out/Default");
        assert_eq!(paths.to_wd("src/foo.cc"), "../../src/foo.cc");
        assert_eq!(paths.to_wd("out/Default/obj/foo.o"), "obj/foo.o");
        assert_eq!(paths.to_wd("out/Default"), ".");
        assert_eq!(paths.to_wd("/usr/include/stdio.h"), "/usr/include/stdio.h");
    }
}
