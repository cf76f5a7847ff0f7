// src/deps/msvc.rs

//! `cl.exe /showIncludes` output handling.

const SHOW_INCLUDES_PREFIX: &str = "Note: including file:";

/// Split compiler stdout into the included paths and the remaining output.
///
/// Include lines are removed from the output the user sees. Paths are
/// returned as printed, deduplicated in order of first appearance.
pub fn parse_show_includes(stdout: &[u8]) -> (Vec<String>, Vec<u8>) {
    let text = String::from_utf8_lossy(stdout);
    let mut deps: Vec<String> = Vec::new();
    let mut rest = String::new();

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        match trimmed.strip_prefix(SHOW_INCLUDES_PREFIX) {
            Some(path) => {
                let path = path.trim().replace('\\', "/");
                if !path.is_empty() && !deps.contains(&path) {
                    deps.push(path);
                }
            }
            None => rest.push_str(line),
        }
    }

    (deps, rest.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_include_notes() {
        let out = b"foo.cc\r\nNote: including file: ..\\..\\src\\foo.h\r\nNote: including file:  ..\\..\\src\\bar.h\r\nwarning C4996\r\nNote: including file: ..\\..\\src\\foo.h\r\n";
        let (deps, rest) = parse_show_includes(out);
        assert_eq!(deps, vec!["../../src/foo.h", "../../src/bar.h"]);
        assert_eq!(rest, b"foo.cc\r\nwarning C4996\r\n");
    }
}
