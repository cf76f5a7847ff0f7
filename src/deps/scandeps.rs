// src/deps/scandeps.rs

//! In-process include scanner.
//!
//! Produces a superset of the headers a C/C++ compile may read, without
//! running the preprocessor. It follows `#include`, `#include_next` and
//! `#import` directives, including macro includes whose macro is given by a
//! `-D` define. Unresolvable includes are skipped: system headers outside the
//! tree and conditionally compiled includes are expected.
//!
//! Include directories and sysroots are reported even when nothing was found
//! in them; the compiler needs them to exist in the execution sandbox.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::hashfs::HashFs;
use crate::path::clean;

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*#\s*(?:include|include_next|import)\s*(?:([<"])([^>"]+)[>"]|([A-Za-z_][A-Za-z0-9_]*))"#)
        .expect("include regex is valid")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("scan canceled")]
    Canceled,

    #[error("source file not found: {0}")]
    MissingSource(String),
}

/// Everything the scanner needs to know about one compile, with all paths
/// exec-root relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub sources: Vec<String>,
    /// Files force-included with `-include`.
    pub forced: Vec<String>,
    /// `-iquote` directories, searched for `"..."` includes only.
    pub quote_dirs: Vec<String>,
    /// `-I` / `-isystem` directories, in command-line order.
    pub include_dirs: Vec<String>,
    pub sysroots: Vec<String>,
    pub defines: BTreeMap<String, String>,
}

/// Result of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
    pub sysroots: Vec<String>,
    pub defines: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Include {
    Quoted(String),
    Angled(String),
    Macro(String),
}

/// Include scanner with a per-file directive cache.
#[derive(Debug)]
pub struct Scanner {
    hashfs: Arc<dyn HashFs>,
    cache: Mutex<HashMap<String, Arc<Vec<Include>>>>,
}

impl Scanner {
    pub fn new(hashfs: Arc<dyn HashFs>) -> Self {
        Self {
            hashfs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn scan(
        &self,
        cancel: &CancellationToken,
        req: &ScanRequest,
    ) -> Result<ScanResult, ScanError> {
        let mut search: Vec<String> = req.include_dirs.clone();
        for sysroot in req.sysroots.iter() {
            search.push(clean(&format!("{sysroot}/usr/include")));
        }

        let mut files: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        for source in req.sources.iter().chain(req.forced.iter()) {
            let source = clean(source);
            if !self.hashfs.exists(&source) {
                return Err(ScanError::MissingSource(source));
            }
            if files.insert(source.clone()) {
                queue.push_back(source);
            }
        }

        while let Some(file) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(ScanError::Canceled);
            }

            let includes = self.includes_of(&file);
            let dir = parent_dir(&file);

            for inc in includes.iter() {
                let resolved = match inc {
                    Include::Quoted(name) => self
                        .resolve_in(&dir, name)
                        .or_else(|| self.resolve_search(&req.quote_dirs, name))
                        .or_else(|| self.resolve_search(&search, name)),
                    Include::Angled(name) => self.resolve_search(&search, name),
                    Include::Macro(name) => match req.defines.get(name) {
                        Some(value) => match parse_include_value(value) {
                            Some(Include::Quoted(n)) => self
                                .resolve_in(&dir, &n)
                                .or_else(|| self.resolve_search(&req.quote_dirs, &n))
                                .or_else(|| self.resolve_search(&search, &n)),
                            Some(Include::Angled(n)) => self.resolve_search(&search, &n),
                            _ => None,
                        },
                        None => None,
                    },
                };

                match resolved {
                    Some(path) => {
                        if files.insert(path.clone()) {
                            trace!(from = %file, include = %path, "found include");
                            queue.push_back(path);
                        }
                    }
                    None => trace!(from = %file, include = ?inc, "unresolved include"),
                }
            }
        }

        let mut dirs: Vec<String> = Vec::new();
        for d in req.quote_dirs.iter().chain(req.include_dirs.iter()) {
            let d = clean(d);
            if !dirs.contains(&d) {
                dirs.push(d);
            }
        }

        debug!(
            sources = req.sources.len(),
            files = files.len(),
            dirs = dirs.len(),
            sysroots = req.sysroots.len(),
            "include scan finished"
        );

        Ok(ScanResult {
            files: files.into_iter().collect(),
            dirs,
            sysroots: req.sysroots.iter().map(|s| clean(s)).collect(),
            defines: req.defines.clone(),
        })
    }

    fn includes_of(&self, file: &str) -> Arc<Vec<Include>> {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(file) {
                return Arc::clone(hit);
            }
        }

        let includes = match self.hashfs.read_file(file) {
            Ok(data) => parse_includes(&String::from_utf8_lossy(&data)),
            Err(err) => {
                debug!(file = %file, error = %err, "unable to read file for include scan");
                Vec::new()
            }
        };
        let includes = Arc::new(includes);
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(file.to_string(), Arc::clone(&includes));
        includes
    }

    fn resolve_in(&self, dir: &str, name: &str) -> Option<String> {
        let candidate = clean(&format!("{dir}/{name}"));
        if candidate.starts_with("../") {
            return None;
        }
        self.is_file(&candidate).then_some(candidate)
    }

    fn resolve_search(&self, dirs: &[String], name: &str) -> Option<String> {
        dirs.iter().find_map(|d| self.resolve_in(d, name))
    }

    fn is_file(&self, path: &str) -> bool {
        matches!(self.hashfs.stat(path), Ok(entry) if !entry.is_dir)
    }
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}

fn parse_include_value(value: &str) -> Option<Include> {
    let value = value.trim();
    if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        return Some(Include::Quoted(inner.to_string()));
    }
    if let Some(inner) = value.strip_prefix('<').and_then(|v| v.strip_suffix('>')) {
        return Some(Include::Angled(inner.to_string()));
    }
    None
}

fn parse_includes(content: &str) -> Vec<Include> {
    content
        .lines()
        .filter_map(|line| {
            let caps = INCLUDE_RE.captures(line)?;
            if let Some(name) = caps.get(3) {
                return Some(Include::Macro(name.as_str().to_string()));
            }
            let name = caps.get(2)?.as_str().to_string();
            match caps.get(1).map(|m| m.as_str()) {
                Some("<") => Some(Include::Angled(name)),
                _ => Some(Include::Quoted(name)),
            }
        })
        .collect()
}
