// tests/error_handling.rs

use std::io::Write;
use tempfile::NamedTempFile;
use siso::config::load_and_validate;
use siso::deps::DepsMode;
use siso::errors::SisoError;
use siso::types::DepsLogMode;

fn manifest(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn test_step_cycle_returns_structured_error() {
    let file = manifest(
        r#"
[step.a]
command = ["gen", "a"]
inputs = ["b.out"]
outputs = ["a.out"]

[step.b]
command = ["gen", "b"]
inputs = ["a.out"]
outputs = ["b.out"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(SisoError::GraphCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains('a') || msg.contains('b'));
        }
        Err(e) => panic!("Expected GraphCycle error, got: {e:?}"),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_step_consuming_its_own_output_is_a_cycle() {
    let file = manifest(
        r#"
[step.a]
command = ["gen"]
inputs = ["a.out"]
outputs = ["a.out"]
"#,
    );

    assert!(matches!(
        load_and_validate(file.path()),
        Err(SisoError::GraphCycle(_))
    ));
}

#[test]
fn test_unknown_pool_returns_config_error() {
    let file = manifest(
        r#"
[step.link]
command = ["ld", "-o", "app"]
outputs = ["app"]
pool = "link_pool"
"#,
    );

    match load_and_validate(file.path()) {
        Err(SisoError::ConfigError(msg)) => {
            assert!(msg.contains("unknown pool"));
            assert!(msg.contains("link_pool"));
        }
        Err(e) => panic!("Expected ConfigError, got: {e:?}"),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_duplicate_output_returns_config_error() {
    let file = manifest(
        r#"
[step.a]
command = ["gen"]
outputs = ["gen/x.h"]

[step.b]
command = ["gen"]
outputs = ["./gen/x.h"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(SisoError::ConfigError(msg)) => assert!(msg.contains("gen/x.h")),
        Err(e) => panic!("Expected ConfigError, got: {e:?}"),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_zero_limits_are_rejected() {
    let file = manifest(
        r#"
[config]
parallelism = 0

[step.a]
command = ["true"]
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(SisoError::ConfigError(msg)) if msg.contains("parallelism")
    ));

    let file = manifest(
        r#"
[pool.p]
depth = 0

[step.a]
command = ["true"]
pool = "p"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(SisoError::ConfigError(msg)) if msg.contains("depth")
    ));
}

#[test]
fn test_empty_manifest_returns_config_error() {
    let file = manifest("[config]\nparallelism = 2\n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(SisoError::ConfigError(_))
    ));
}

#[test]
fn test_invalid_toml_returns_toml_error() {
    let file = manifest("[step.a\ncommand = \n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(SisoError::TomlError(_))
    ));
}

#[test]
fn test_missing_manifest_returns_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let res = load_and_validate(dir.path().join("Siso.toml"));
    assert!(matches!(res, Err(SisoError::IoError(_))));
}

#[test]
fn test_valid_manifest_round_trips_settings() {
    let file = manifest(
        r#"
[config]
dir = "out/Default"
parallelism = 8
remote = true
keep_going = 0
deps_log = "memory"

[pool.link]
depth = 2

[input_deps]
"toolchain" = ["bin/clang", "lib/libc.so"]

[step.cc]
command = ["clang", "-c", "../../src/a.c", "-o", "obj/a.o"]
inputs = ["src/a.c"]
tool_inputs = ["toolchain"]
outputs = ["out/Default/obj/a.o"]
depfile = "out/Default/obj/a.o.d"
deps = "gcc"
remote = true

[step.link]
command = ["ld", "-o", "app", "obj/a.o"]
inputs = ["out/Default/obj/a.o"]
outputs = ["out/Default/app"]
pool = "link"
"#,
    );

    let cfg = load_and_validate(file.path()).expect("valid manifest");
    assert_eq!(cfg.config.dir, "out/Default");
    assert_eq!(cfg.config.parallelism, 8);
    assert!(cfg.config.remote);
    assert_eq!(cfg.config.keep_going, 0);
    assert_eq!(cfg.config.deps_log, DepsLogMode::Memory);
    assert_eq!(cfg.pool["link"].depth, 2);
    assert_eq!(cfg.input_deps["toolchain"].len(), 2);
    assert_eq!(cfg.step["cc"].deps, DepsMode::Gcc);
    assert!(cfg.step["cc"].remote);
    assert_eq!(cfg.step["link"].pool.as_deref(), Some("link"));
}
