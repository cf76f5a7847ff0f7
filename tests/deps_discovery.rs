// tests/deps_discovery.rs

mod common;

use std::sync::Arc;

use common::{Harness, EXEC_ROOT};
use siso::deps::{DepsDiscoverer, DepsError, DepsLogStore, DepsMode};
use siso::graph::StepDef;
use siso::hashfs::{HashFs, MemHashFs};
use siso::path::ExecPaths;
use siso::step::Cmd;
use siso_test_utils::builders::{ManifestBuilder, StepBuilder};
use siso_test_utils::thread_fs::ThreadTrackingFs;
use siso_test_utils::{init_tracing, with_timeout};
use tokio_util::sync::CancellationToken;

fn gcc_def(args: &str, outputs: &[&str], depfile: Option<&str>) -> StepDef {
    StepDef {
        id: "cc".to_string(),
        args: args.split_whitespace().map(|s| s.to_string()).collect(),
        inputs: vec!["src/a.c".to_string()],
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        depfile: depfile.map(|s| s.to_string()),
        deps: DepsMode::Gcc,
        ..StepDef::default()
    }
}

fn discoverer(fs: &MemHashFs, dir: &str) -> DepsDiscoverer {
    DepsDiscoverer::new(
        Arc::new(fs.clone()),
        Arc::new(ExecPaths::new(EXEC_ROOT, dir)),
        2,
    )
}

#[test]
fn test_depfile_is_parsed_and_removed() {
    init_tracing();
    let fs = MemHashFs::new();
    fs.add_file("a.o.d", "a.o: a.h \\\n  b.h\n");
    let cmd = Cmd::from_step_def(&gcc_def("cc -c a.c -o a.o", &["a.o"], Some("a.o.d")), ".");

    let found = discoverer(&fs, ".").after_run(&cmd, b"").unwrap();
    assert_eq!(found.deps, vec!["a.h", "b.h"]);
    assert!(!fs.exists("a.o.d"), "depfile should be consumed");
}

#[test]
fn test_depfile_paths_become_exec_root_relative() {
    init_tracing();
    let fs = MemHashFs::new();
    fs.add_file("out/obj/a.o.d", "obj/a.o: ../src/a.h gen/b.h /usr/include/stdio.h ../../etc/x.h\n");
    let cmd = Cmd::from_step_def(
        &gcc_def("cc -c ../src/a.c -o obj/a.o", &["out/obj/a.o"], Some("out/obj/a.o.d")),
        "out",
    );

    let found = discoverer(&fs, "out").after_run(&cmd, b"").unwrap();
    // Paths escaping the exec root are kept as reported.
    assert_eq!(
        found.deps,
        vec!["src/a.h", "out/gen/b.h", "/usr/include/stdio.h", "../../etc/x.h"]
    );
}

#[test]
fn test_missing_or_malformed_depfile_is_missing_deps() {
    init_tracing();
    let fs = MemHashFs::new();
    let cmd = Cmd::from_step_def(&gcc_def("cc -c a.c -o a.o", &["a.o"], Some("a.o.d")), ".");
    let deps = discoverer(&fs, ".");

    let err = deps.after_run(&cmd, b"").unwrap_err();
    assert!(matches!(err, DepsError::MissingDeps { ref path, .. } if path == "a.o.d"));

    fs.add_file("a.o.d", "this is not a depfile");
    let err = deps.after_run(&cmd, b"").unwrap_err();
    assert!(matches!(err, DepsError::MissingDeps { .. }));

    let no_depfile = Cmd::from_step_def(&gcc_def("cc -c a.c -o a.o", &["a.o"], None), ".");
    assert!(matches!(
        deps.after_run(&no_depfile, b"").unwrap_err(),
        DepsError::MissingDeps { .. }
    ));
}

#[test]
fn test_msvc_show_includes_are_stripped_from_stdout() {
    init_tracing();
    let fs = MemHashFs::new();
    let def = StepDef {
        id: "cl".to_string(),
        args: vec!["cl.exe".to_string(), "/showIncludes".to_string()],
        deps: DepsMode::Msvc,
        ..StepDef::default()
    };
    let cmd = Cmd::from_step_def(&def, ".");
    let stdout = b"a.cc\r\nNote: including file: src\\a.h\r\nNote: including file:   src\\b.h\r\n";

    let found = discoverer(&fs, ".").after_run(&cmd, stdout).unwrap();
    assert_eq!(found.deps, vec!["src/a.h", "src/b.h"]);
    assert_eq!(String::from_utf8_lossy(&found.stdout), "a.cc\r\n");
}

#[test]
fn test_split_dwarf_outputs_are_added_once() {
    init_tracing();
    let fs = MemHashFs::new();
    let deps = discoverer(&fs, ".");
    let cmd = Cmd::from_step_def(
        &gcc_def("clang -gsplit-dwarf -c a.c -o obj/a.o", &["obj/a.o"], None),
        ".",
    );

    let once = deps.fix_outputs(cmd);
    assert_eq!(once.outputs(), &["obj/a.o".to_string(), "obj/a.dwo".to_string()]);

    let twice = deps.fix_outputs(once.clone());
    assert_eq!(twice.outputs(), once.outputs());
}

#[test]
fn test_single_file_split_dwarf_adds_no_dwo() {
    let fs = MemHashFs::new();
    let deps = discoverer(&fs, ".");

    let single = Cmd::from_step_def(
        &gcc_def("clang -gsplit-dwarf=single -c a.c -o obj/a.o", &["obj/a.o"], None),
        ".",
    );
    assert_eq!(deps.fix_outputs(single).outputs(), &["obj/a.o".to_string()]);

    let split = Cmd::from_step_def(
        &gcc_def("clang -gsplit-dwarf=split -c a.c -o obj/a.o", &["obj/a.o"], None),
        ".",
    );
    assert_eq!(
        deps.fix_outputs(split).outputs(),
        &["obj/a.o".to_string(), "obj/a.dwo".to_string()]
    );
}

#[test]
fn test_without_split_dwarf_outputs_are_untouched() {
    let fs = MemHashFs::new();
    let cmd = Cmd::from_step_def(&gcc_def("clang -c a.c -o a.o", &["a.o"], None), ".");
    let fixed = discoverer(&fs, ".").fix_outputs(cmd);
    assert_eq!(fixed.outputs(), &["a.o".to_string()]);
}

#[tokio::test]
async fn test_scan_adds_headers_as_tool_inputs() {
    init_tracing();
    let fs = MemHashFs::new();
    fs.add_file("src/a.c", "#include \"a.h\"\n#include <sys/b.h>\n");
    fs.add_file("src/a.h", "#pragma once\n");
    fs.add_file("include/sys/b.h", "int b;\n");

    let cmd = Cmd::from_step_def(
        &gcc_def("clang -Iinclude -c src/a.c -o a.o", &["a.o"], Some("a.o.d")),
        ".",
    );
    let scanned = with_timeout(discoverer(&fs, ".").scan(&CancellationToken::new(), cmd))
        .await
        .unwrap();

    assert!(scanned.tool_inputs().iter().any(|p| p == "src/a.h"));
    assert!(scanned.tool_inputs().iter().any(|p| p == "include/sys/b.h"));
}

#[tokio::test]
async fn test_scan_reads_files_on_the_blocking_pool() {
    init_tracing();
    let fs = MemHashFs::new();
    fs.add_file("src/a.c", "#include \"a.h\"\n");
    fs.add_file("src/a.h", "int a;\n");
    let tracked = ThreadTrackingFs::new(fs);
    let deps = DepsDiscoverer::new(
        Arc::new(tracked.clone()),
        Arc::new(ExecPaths::new(EXEC_ROOT, ".")),
        1,
    );

    let cmd = Cmd::from_step_def(&gcc_def("clang -c src/a.c -o a.o", &["a.o"], None), ".");
    let scanned = with_timeout(deps.scan(&CancellationToken::new(), cmd))
        .await
        .unwrap();
    assert!(scanned.tool_inputs().iter().any(|p| p == "src/a.h"));

    let runtime_thread = std::thread::current().id();
    let threads = tracked.stat_threads();
    assert!(!threads.is_empty());
    assert!(threads.iter().all(|t| *t != runtime_thread));
}

#[tokio::test]
async fn test_scan_is_a_noop_without_deps_mode() {
    let fs = MemHashFs::new();
    let def = StepDef {
        id: "stamp".to_string(),
        args: vec!["touch".to_string(), "stamp".to_string()],
        ..StepDef::default()
    };
    let cmd = Cmd::from_step_def(&def, ".");
    let scanned = with_timeout(discoverer(&fs, ".").scan(&CancellationToken::new(), cmd.clone()))
        .await
        .unwrap();
    assert_eq!(scanned, cmd);
}

#[tokio::test]
async fn test_scan_without_source_is_an_error() {
    let fs = MemHashFs::new();
    let cmd = Cmd::from_step_def(&gcc_def("clang -o app a.o b.o", &["app"], None), ".");
    let err = with_timeout(discoverer(&fs, ".").scan(&CancellationToken::new(), cmd))
        .await
        .unwrap_err();
    assert!(matches!(err, DepsError::Scan(_)));
}

#[test]
fn test_from_wd_interns_and_passes_outside_paths_through() {
    let paths = ExecPaths::new(EXEC_ROOT, "out/Default");

    let a = paths.from_wd("../../src/a.cc").unwrap();
    let b = paths.from_wd("../../src/a.cc").unwrap();
    assert_eq!(&*a, "src/a.cc");
    assert!(Arc::ptr_eq(&a, &b));

    let inside = paths.from_wd("/work/src/b.cc").unwrap();
    assert_eq!(&*inside, "src/b.cc");

    let outside = paths.from_wd("/usr/include/stdio.h").unwrap();
    assert_eq!(&*outside, "/usr/include/stdio.h");

    assert!(paths.from_wd("../../../etc/passwd").is_err());
    assert_eq!(&*paths.maybe_from_wd("../../../etc/passwd"), "../../../etc/passwd");

    assert_eq!(paths.to_wd("src/a.cc"), "../../src/a.cc");
}

#[tokio::test]
async fn test_build_records_depfile_deps_in_log() {
    init_tracing();
    let cfg = ManifestBuilder::new()
        .with_step(
            "cc",
            StepBuilder::new("cc -MMD -MF a.o.d -c src/a.c -o a.o")
                .input("src/a.c")
                .output("a.o")
                .depfile("a.o.d")
                .build(),
        )
        .build();
    let h = Harness::new(cfg).with_sources(&["src/a.c", "src/a.h"]);
    h.local.depfile("cc", "a.o: src/a.c src/a.h\n");

    with_timeout(h.build(&[])).await.unwrap();

    let record = h.depslog.get("a.o").expect("deps recorded");
    assert_eq!(record.deps, vec!["src/a.c", "src/a.h"]);
    assert!(!h.fs.exists("a.o.d"));
}

#[tokio::test]
async fn test_bad_depfile_is_tolerated_unless_strict() {
    init_tracing();
    let manifest = |strict: bool| {
        ManifestBuilder::new()
            .with_strict_deps(strict)
            .with_step(
                "cc",
                StepBuilder::new("cc -c src/a.c -o a.o")
                    .input("src/a.c")
                    .output("a.o")
                    .depfile("a.o.d")
                    .build(),
            )
            .build()
    };

    // No depfile written: lenient mode succeeds without recording deps.
    let h = Harness::new(manifest(false)).with_sources(&["src/a.c"]);
    with_timeout(h.build(&[])).await.unwrap();
    assert!(h.depslog.get("a.o").is_none());

    let h = Harness::new(manifest(true)).with_sources(&["src/a.c"]);
    let res = with_timeout(h.build(&[])).await;
    assert!(res.is_err());
}
