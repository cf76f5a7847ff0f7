// src/deps/gcc.rs

//! Dependency handling for gcc/clang style compiles.

use tracing::warn;

use crate::deps::depfile;
use crate::deps::scandeps::ScanRequest;
use crate::deps::DepsError;
use crate::hashfs::HashFs;
use crate::path::ExecPaths;
use crate::step::Cmd;

const SOURCE_EXTS: &[&str] = &[
    "c", "cc", "cpp", "cxx", "c++", "m", "mm", "S", "s", "C",
];

/// Flags whose value is the next argument and that carry no include info.
const FLAGS_WITH_VALUE: &[&str] = &[
    "-o", "-MF", "-MT", "-MQ", "-x", "-arch", "-target", "-Xclang", "-Xlinker",
    "-main-file-name", "-mllvm",
];

/// Build a scan request from a compile command line. Paths in the command are
/// relative to the working directory and get converted to exec-root relative.
pub fn scan_request(cmd: &Cmd, paths: &ExecPaths) -> ScanRequest {
    let mut req = ScanRequest::default();
    let to_root = |p: &str| paths.maybe_from_wd(p).to_string();

    let mut args = cmd.args().iter().skip(1);
    while let Some(arg) = args.next() {
        let arg = arg.as_str();
        if let Some(v) = take_value(arg, "-isystem", &mut args) {
            req.include_dirs.push(to_root(&v));
        } else if let Some(v) = take_value(arg, "-iquote", &mut args) {
            req.quote_dirs.push(to_root(&v));
        } else if let Some(v) = take_value(arg, "-isysroot", &mut args) {
            req.sysroots.push(to_root(&v));
        } else if let Some(v) = arg.strip_prefix("--sysroot=") {
            req.sysroots.push(to_root(v));
        } else if arg == "--sysroot" {
            if let Some(v) = args.next() {
                req.sysroots.push(to_root(v));
            }
        } else if arg == "-include" {
            if let Some(v) = args.next() {
                req.forced.push(to_root(v));
            }
        } else if let Some(v) = take_value(arg, "-I", &mut args)
            .or_else(|| take_value(arg, "/I", &mut args))
        {
            req.include_dirs.push(to_root(&v));
        } else if let Some(v) = take_value(arg, "-D", &mut args)
            .or_else(|| take_value(arg, "/D", &mut args))
        {
            let (name, value) = match v.split_once('=') {
                Some((n, val)) => (n.to_string(), val.to_string()),
                None => (v.clone(), "1".to_string()),
            };
            req.defines.insert(name, value);
        } else if FLAGS_WITH_VALUE.contains(&arg) {
            args.next();
        } else if !arg.starts_with('-') && is_source(arg) {
            req.sources.push(to_root(arg));
        }
    }

    req
}

/// `-Ifoo` -> `foo`, `-I foo` -> `foo` (consuming the next argument).
fn take_value<'a, I>(arg: &str, flag: &str, rest: &mut I) -> Option<String>
where
    I: Iterator<Item = &'a String>,
{
    if arg == flag {
        return rest.next().cloned();
    }
    arg.strip_prefix(flag)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn is_source(arg: &str) -> bool {
    arg.rsplit_once('.')
        .is_some_and(|(_, ext)| SOURCE_EXTS.contains(&ext))
}

/// With `-gsplit-dwarf` (or `=split`) the compiler writes a `.dwo` next to
/// every `.o`. Declare those so the build records them. `=single` keeps the
/// debug info in the object and adds nothing. Idempotent.
pub fn fix_outputs_for_split_dwarf(cmd: Cmd) -> Cmd {
    if !cmd.has_arg("-gsplit-dwarf") && !cmd.has_arg("-gsplit-dwarf=split") {
        return cmd;
    }
    let dwos: Vec<String> = cmd
        .outputs()
        .iter()
        .filter_map(|out| out.strip_suffix(".o"))
        .map(|stem| format!("{stem}.dwo"))
        .collect();
    cmd.with_outputs(dwos)
}

/// Read, parse and delete the depfile a finished compile wrote. Returned
/// paths are exec-root relative.
pub fn deps_after_run(
    hashfs: &dyn HashFs,
    paths: &ExecPaths,
    cmd: &Cmd,
) -> Result<Vec<String>, DepsError> {
    let Some(path) = cmd.depfile() else {
        return Err(DepsError::MissingDeps {
            path: cmd.id().to_string(),
            reason: "no depfile declared for gcc deps".to_string(),
        });
    };

    let data = hashfs.read_file(path).map_err(|err| DepsError::MissingDeps {
        path: path.to_string(),
        reason: err.to_string(),
    })?;

    let deps = depfile::parse(&data).map_err(|err| DepsError::MissingDeps {
        path: path.to_string(),
        reason: err.to_string(),
    })?;

    if let Err(err) = hashfs.remove(path) {
        warn!(depfile = %path, error = %err, "failed to remove depfile");
    }

    Ok(deps
        .iter()
        .map(|d| paths.maybe_from_wd(d).to_string())
        .collect())
}
