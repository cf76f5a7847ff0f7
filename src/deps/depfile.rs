//! Makefile-style dependency file parser.
//!
//! Compilers invoked with `-MD`/`-MMD` write rules like:
//! ```make
//! obj/foo.o: ../../src/foo.cc \
//!   ../../src/foo.h ../../src/my\ file.h
//! ../../src/foo.h:
//! ```
//!
//! Escaping rules:
//! - `\ ` is a literal space, `\\` a literal backslash, `\#` a literal hash
//! - `\` at end of line continues the line
//! - `$$` is a literal `$`
//!
//! A `:` only separates targets from deps when followed by whitespace or end of
//! input, so `C:\foo.h` style paths survive. Rules with no deps (the phony
//! header rules `-MP` emits) contribute nothing.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DepfileError {
    #[error("depfile is empty")]
    Empty,

    #[error("depfile has no rule (missing ':' after targets)")]
    MissingColon,

    #[error("invalid UTF-8 in depfile")]
    InvalidUtf8,
}

/// Parse raw depfile bytes.
pub fn parse(content: &[u8]) -> Result<Vec<String>, DepfileError> {
    let content = std::str::from_utf8(content).map_err(|_| DepfileError::InvalidUtf8)?;
    parse_str(content)
}

/// Parse depfile text and return the deduplicated dependency list, in order of
/// first appearance.
pub fn parse_str(content: &str) -> Result<Vec<String>, DepfileError> {
    if content.trim().is_empty() {
        return Err(DepfileError::Empty);
    }

    let mut deps: Vec<String> = Vec::new();
    let mut saw_rule = false;
    let mut saw_target = false;
    let mut in_deps = false;
    let mut token = String::new();
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if !in_deps && is_separator(chars.peek().copied()) => {
                if !token.is_empty() {
                    saw_target = true;
                    token.clear();
                }
                if !saw_target {
                    return Err(DepfileError::MissingColon);
                }
                in_deps = true;
                saw_rule = true;
            }
            '\\' => match chars.peek() {
                Some('\n') => {
                    chars.next();
                    flush_token(&mut token, in_deps, &mut deps, &mut saw_target);
                }
                Some('\r') => {
                    chars.next();
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    flush_token(&mut token, in_deps, &mut deps, &mut saw_target);
                }
                Some(' ') => {
                    chars.next();
                    token.push(' ');
                }
                Some('\\') => {
                    chars.next();
                    token.push('\\');
                }
                Some('#') => {
                    chars.next();
                    token.push('#');
                }
                _ => token.push('\\'),
            },
            '$' if chars.peek() == Some(&'$') => {
                chars.next();
                token.push('$');
            }
            ' ' | '\t' | '\r' => {
                flush_token(&mut token, in_deps, &mut deps, &mut saw_target);
            }
            '\n' => {
                flush_token(&mut token, in_deps, &mut deps, &mut saw_target);
                if !in_deps && saw_target {
                    // Targets with no ':' on this line.
                    return Err(DepfileError::MissingColon);
                }
                in_deps = false;
                saw_target = false;
            }
            _ => token.push(ch),
        }
    }

    flush_token(&mut token, in_deps, &mut deps, &mut saw_target);
    if !saw_rule || (!in_deps && saw_target) {
        return Err(DepfileError::MissingColon);
    }

    let mut seen = std::collections::HashSet::new();
    deps.retain(|dep| seen.insert(dep.clone()));
    Ok(deps)
}

fn is_separator(next: Option<char>) -> bool {
    matches!(next, None | Some(' ') | Some('\t') | Some('\n') | Some('\r'))
}

fn flush_token(token: &mut String, in_deps: bool, deps: &mut Vec<String>, saw_target: &mut bool) {
    if token.is_empty() {
        return;
    }
    if in_deps {
        deps.push(std::mem::take(token));
    } else {
        *saw_target = true;
        token.clear();
    }
}
