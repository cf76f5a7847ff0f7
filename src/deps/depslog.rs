use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::types::DepsLogMode;

/// Name of the deps log file, kept in the build's working directory:
///
/// `<exec_root>/<dir>/.siso_deps`
pub const DEPS_LOG_FILE: &str = ".siso_deps";

/// Deps recorded for one output by a previous run of its step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepsRecord {
    /// [`Cmd::cmd_hash`](crate::step::Cmd::cmd_hash) of the command that
    /// produced the deps. A mismatch means the record is stale.
    pub cmd_hash: String,
    /// Exec-root relative paths.
    pub deps: Vec<String>,
}

/// Abstract storage for discovered deps, keyed by primary output.
pub trait DepsLogStore: Send + Sync + std::fmt::Debug {
    fn get(&self, output: &str) -> Option<DepsRecord>;
    fn record(&self, output: &str, record: DepsRecord) -> Result<()>;
    /// Persist whatever was recorded since the last flush.
    fn flush(&self) -> Result<()>;
}

/// Open the deps log for a build running in `build_dir`.
pub fn open(mode: DepsLogMode, build_dir: &Path) -> Result<Arc<dyn DepsLogStore>> {
    match mode {
        DepsLogMode::File => Ok(Arc::new(FileDepsLog::open(build_dir.join(DEPS_LOG_FILE))?)),
        DepsLogMode::Memory => Ok(Arc::new(MemoryDepsLog::new())),
    }
}

/// Deps log persisted as one line per output:
///
/// `<output>\t<cmd_hash>\t<dep1>\t<dep2>...`
///
/// The whole file is read at startup and rewritten on flush.
#[derive(Debug)]
pub struct FileDepsLog {
    path: PathBuf,
    state: Mutex<FileState>,
}

#[derive(Debug, Default)]
struct FileState {
    map: HashMap<String, DepsRecord>,
    dirty: bool,
}

impl FileDepsLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        let map = load_all(&path)?;
        debug!(path = ?path, entries = map.len(), "loaded deps log");
        Ok(Self {
            path,
            state: Mutex::new(FileState { map, dirty: false }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DepsLogStore for FileDepsLog {
    fn get(&self, output: &str) -> Option<DepsRecord> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.map.get(output).cloned()
    }

    fn record(&self, output: &str, record: DepsRecord) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.map.get(output) != Some(&record) {
            state.map.insert(output.to_string(), record);
            state.dirty = true;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.dirty {
            return Ok(());
        }
        save_all(&self.path, &state.map)?;
        state.dirty = false;
        info!(path = ?self.path, entries = state.map.len(), "stored deps log (file)");
        Ok(())
    }
}

/// Deps log that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryDepsLog {
    map: Mutex<HashMap<String, DepsRecord>>,
}

impl MemoryDepsLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DepsLogStore for MemoryDepsLog {
    fn get(&self, output: &str) -> Option<DepsRecord> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.get(output).cloned()
    }

    fn record(&self, output: &str, record: DepsRecord) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(output.to_string(), record);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn load_all(path: &Path) -> Result<HashMap<String, DepsRecord>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let file = File::open(path).with_context(|| format!("opening deps log at {:?}", path))?;
    let reader = BufReader::new(file);

    let mut map = HashMap::new();
    for (lineno, line_res) in reader.lines().enumerate() {
        let line = line_res?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        match (fields.next(), fields.next()) {
            (Some(output), Some(cmd_hash)) if !output.is_empty() => {
                map.insert(
                    output.to_string(),
                    DepsRecord {
                        cmd_hash: cmd_hash.to_string(),
                        deps: fields.filter(|d| !d.is_empty()).map(str::to_string).collect(),
                    },
                );
            }
            _ => warn!(path = ?path, line = lineno + 1, "skipping malformed deps log line"),
        }
    }

    Ok(map)
}

fn save_all(path: &Path, map: &HashMap<String, DepsRecord>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating deps log directory at {:?}", parent))?;
    }

    let file = File::create(path).with_context(|| format!("creating deps log at {:?}", path))?;
    let mut writer = BufWriter::new(file);

    let mut outputs: Vec<&String> = map.keys().collect();
    outputs.sort();
    for output in outputs {
        let record = &map[output];
        write!(writer, "{}\t{}", output, record.cmd_hash)?;
        for dep in record.deps.iter() {
            write!(writer, "\t{dep}")?;
        }
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}
