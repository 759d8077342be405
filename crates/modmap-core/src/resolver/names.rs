//! Specifier string utilities.
//!
//! Nothing here touches shared state: prefix matching for maps and packages,
//! `paths` alias application, and URL-style resolution of relative and
//! absolute specifiers against a parent.

use crate::error::{Error, Result};
use indexmap::IndexMap;

/// Find the most specific key of `map` that `name` starts with.
///
/// A key matches when it equals `name` or is followed in `name` by `/`.
/// More `/`-separated segments wins; ties go to the earliest key.
#[must_use]
pub fn get_map_match<'m, V>(map: &'m IndexMap<String, V>, name: &str) -> Option<&'m str> {
    let mut best: Option<&str> = None;
    let mut best_len = 0;

    for key in map.keys() {
        if !is_boundary_prefix(name, key) {
            continue;
        }
        let segments = key.split('/').count();
        if segments <= best_len {
            continue;
        }
        best = Some(key);
        best_len = segments;
    }

    best
}

/// Whether `prefix` is `name` itself or a prefix of `name` ending at a `/`.
#[must_use]
pub fn is_boundary_prefix(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix) && (name.len() == prefix.len() || name.as_bytes()[prefix.len()] == b'/')
}

/// Apply `paths` aliasing to `name`.
///
/// An exact key returns its value. Otherwise a rule whose value ends in `/`
/// (or is empty) matches when `name` agrees with the key up to the key's
/// final character; the remainder of `name` is appended to the value.
/// Wildcards are not expanded.
#[must_use]
pub fn apply_paths(paths: &IndexMap<String, String>, name: &str) -> Option<String> {
    if let Some(exact) = paths.get(name) {
        return Some(exact.clone());
    }

    let name_bytes = name.as_bytes();
    for (key, value) in paths {
        let Some(&key_last) = key.as_bytes().last() else {
            continue;
        };
        let stem = key.len() - 1;

        let directory_value = value.is_empty() || value.ends_with('/');
        let stem_matches = name_bytes.len() >= stem && name_bytes[..stem] == key.as_bytes()[..stem];
        let separator_agrees = name_bytes.len() < key.len() || name_bytes[key.len() - 1] == key_last;

        if !(directory_value && stem_matches && separator_agrees) {
            continue;
        }

        let mut out = value.strip_suffix('/').unwrap_or(value).to_string();
        if name.len() > key.len() {
            if !value.is_empty() {
                out.push('/');
            }
            out.push_str(&name[key.len()..]);
        }
        return Some(out);
    }

    None
}

/// Whether `spec` is a plain name (not relative, absolute or a URL).
#[must_use]
pub fn is_plain(spec: &str) -> bool {
    matches!(resolve_if_not_plain(spec, Some("file:///")), Ok(None))
}

/// Resolve `rel` against `parent` unless `rel` is a plain name.
///
/// Relative (`./`, `../`, `.`, `..`), root-relative (`/`), protocol-relative
/// (`//`) and scheme-qualified specifiers resolve; plain names return `None`.
/// Backslashes are treated as `/`. Dot segments are collapsed textually so
/// characters such as `#` and `{` survive untouched.
pub fn resolve_if_not_plain(rel: &str, parent: Option<&str>) -> Result<Option<String>> {
    let mut rel = rel.trim().replace('\\', "/");
    let parent_protocol = parent
        .and_then(|p| p.find(':').map(|i| &p[..=i]))
        .unwrap_or("");

    let bytes = rel.as_bytes();
    let first = bytes.first().copied();
    let second = bytes.get(1).copied();

    if first == Some(b'/') && second == Some(b'/') {
        if parent_protocol.is_empty() {
            return Err(Error::invalid_specifier(&rel, parent));
        }
        return Ok(Some(format!("{parent_protocol}{rel}")));
    }

    let is_relative = match (first, second) {
        (Some(b'.'), Some(b'/')) => true,
        (Some(b'.'), Some(b'.')) => match bytes.get(2) {
            Some(b'/') => true,
            None => {
                rel.push('/');
                true
            }
            _ => false,
        },
        (Some(b'.'), None) => {
            rel.push('/');
            true
        }
        (Some(b'/'), _) => true,
        _ => false,
    };

    if is_relative {
        return resolve_relative(&rel, parent, parent_protocol).map(Some);
    }

    if let Some(colon) = rel.find(':') {
        // C:\x style Windows paths become file URLs
        let b = rel.as_bytes();
        if colon == 1 && b.get(2) == Some(&b'/') && b[0].is_ascii_alphabetic() {
            return Ok(Some(format!("file:///{rel}")));
        }
        return Ok(Some(rel));
    }

    Ok(None)
}

fn resolve_relative(rel: &str, parent: Option<&str>, parent_protocol: &str) -> Result<String> {
    let parent_url = parent.unwrap_or_default();
    let parent_is_plain = parent_protocol.is_empty()
        || parent_url.as_bytes().get(parent_protocol.len()) != Some(&b'/');

    let pathname: &str = if parent_is_plain {
        if parent.is_none() {
            return Err(Error::invalid_specifier(rel, parent));
        }
        parent_url
    } else if parent_url.as_bytes().get(parent_protocol.len() + 1) == Some(&b'/') {
        if parent_protocol == "file:" {
            parent_url.get(8..).unwrap_or_default()
        } else {
            let after_scheme = &parent_url[parent_protocol.len() + 2..];
            after_scheme
                .find('/')
                .map_or("", |i| &after_scheme[i + 1..])
        }
    } else {
        &parent_url[parent_protocol.len() + 1..]
    };

    if rel.starts_with('/') {
        if parent_is_plain {
            return Err(Error::invalid_specifier(rel, parent));
        }
        let origin_len = parent_url.len().saturating_sub(pathname.len() + 1);
        return Ok(format!("{}{rel}", &parent_url[..origin_len]));
    }

    let directory = pathname.rfind('/').map_or("", |i| &pathname[..=i]);
    let segmented = format!("{directory}{rel}");
    let seg = segmented.as_bytes();

    let mut output: Vec<&str> = Vec::new();
    let mut segment_start: Option<usize> = None;
    let mut i = 0;

    while i < seg.len() {
        if let Some(start) = segment_start {
            if seg[i] == b'/' {
                output.push(&segmented[start..=i]);
                segment_start = None;
            }
            i += 1;
            continue;
        }

        if seg[i] == b'.' {
            let next = seg.get(i + 1).copied();
            if next == Some(b'.') && (seg.get(i + 2) == Some(&b'/') || i + 2 == seg.len()) {
                output.pop();
                i += 2;
            } else if next == Some(b'/') || i + 1 == seg.len() {
                i += 1;
            } else {
                segment_start = Some(i);
                i += 1;
                continue;
            }

            // backtracking above a plain parent
            if parent_is_plain && output.is_empty() {
                return Err(Error::invalid_specifier(rel, parent));
            }
            i += 1;
            continue;
        }

        segment_start = Some(i);
        i += 1;
    }

    if let Some(start) = segment_start {
        output.push(&segmented[start..]);
    }

    let origin = &parent_url[..parent_url.len() - pathname.len()];
    Ok(format!("{origin}{}", output.concat()))
}
