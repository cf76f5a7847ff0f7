// tests/fs_abstraction.rs

use std::fs;

use siso::hashfs::{digest_bytes, DiskHashFs, HashFs, MemHashFs};

#[test]
fn test_disk_writes_stay_in_memory_until_flushed() {
    let dir = tempfile::tempdir().unwrap();
    let hashfs = DiskHashFs::new(dir.path());

    hashfs.write_file("out/gen/a.h", b"#define A 1\n").unwrap();
    assert!(!dir.path().join("out/gen/a.h").exists());

    let entry = hashfs.stat("out/gen/a.h").unwrap();
    assert_eq!(entry.size, 12);
    assert_eq!(entry.digest.as_deref(), Some(digest_bytes(b"#define A 1\n").as_str()));
    assert_eq!(hashfs.read_file("out/gen/a.h").unwrap(), b"#define A 1\n");

    hashfs.flush(&["out/gen/a.h".to_string()]).unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("out/gen/a.h")).unwrap(),
        "#define A 1\n"
    );
}

#[test]
fn test_disk_stat_is_cached_until_refresh() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "one").unwrap();
    let hashfs = DiskHashFs::new(dir.path());

    let first = hashfs.stat("a.txt").unwrap();
    fs::write(dir.path().join("a.txt"), "three").unwrap();
    assert_eq!(hashfs.stat("a.txt").unwrap(), first);

    let refreshed = hashfs.refresh("a.txt").unwrap();
    assert_eq!(refreshed.size, 5);
    assert_ne!(refreshed.digest, first.digest);
}

#[test]
fn test_disk_missing_paths_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let hashfs = DiskHashFs::new(dir.path());

    assert!(hashfs.stat("nope.h").unwrap_err().is_not_found());
    assert!(!hashfs.exists("nope.h"));
    assert!(hashfs.remove("nope.h").unwrap_err().is_not_found());
}

#[test]
fn test_disk_directories_have_no_digest() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("include/sys")).unwrap();
    let hashfs = DiskHashFs::new(dir.path());

    let entry = hashfs.stat("include/sys").unwrap();
    assert!(entry.is_dir);
    assert!(entry.digest.is_none());
}

#[test]
fn test_memory_fs_orders_writes() {
    let fs = MemHashFs::new();
    fs.add_file("src/a.c", "a");
    fs.add_file("a.o", "o");

    let src = fs.stat("src/a.c").unwrap();
    let obj = fs.stat("a.o").unwrap();
    assert!(obj.mtime > src.mtime);
    assert!(fs.stat("src").unwrap().is_dir);
    assert_eq!(fs.files(), vec!["a.o", "src/a.c"]);
}
