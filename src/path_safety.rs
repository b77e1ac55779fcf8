//! Pure predicate gating every filesystem path the core touches.
//!
//! `is_path_safe` rejects NUL bytes, traversal-pattern substrings, shell
//! metacharacters and environment-variable expansion patterns, then requires
//! that the path's canonical resolution sit under the staging root or the
//! process working directory.

use std::path::{Path, PathBuf};

const TRAVERSAL_PATTERNS: &[&str] = &[
    "..", "%2e%2e", "%252e%252e", "..%2f", "%2f..", "..\\", "..%5c", ".%00.",
];

const SHELL_METACHARACTERS: &[char] = &[
    '$', '`', '|', ';', '&', '<', '>', '(', ')', '{', '}', '[', ']', '!', '#', '*', '?', '~',
    '\n', '\r',
];

/// Returns true iff `path` is safe for the core to operate on, given
/// `staging_root` (already canonicalized) as the permitted root.
pub fn is_path_safe(path: &str, staging_root: &Path) -> bool {
    if path.is_empty() || path.as_bytes().contains(&0) || path.contains('\0') {
        return false;
    }

    let lowered = path.to_ascii_lowercase();
    if TRAVERSAL_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
    {
        return false;
    }

    // `$` is a shell metacharacter in its own right, so any `$NAME` or
    // `${...}` environment-variable expansion attempt is already rejected
    // above without needing a dedicated pattern check.
    if path.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
        return false;
    }

    let candidate = PathBuf::from(path);
    let resolved = match dunce_canonicalize(&candidate) {
        Some(resolved) => resolved,
        None => return false,
    };

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(_) => return false,
    };

    resolved == staging_root
        || resolved.starts_with(staging_root)
        || resolved == cwd
        || resolved.starts_with(&cwd)
}

/// Canonicalizes a path without requiring it to exist: resolves the deepest
/// existing ancestor and reattaches the remaining components lexically.
fn dunce_canonicalize(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Some(resolved);
    }

    let mut existing = path;
    let mut tail = Vec::new();
    loop {
        match existing.parent() {
            Some(parent) => {
                if let Some(name) = existing.file_name() {
                    tail.push(name.to_owned());
                }
                existing = parent;
                if let Ok(resolved) = existing.canonicalize() {
                    let mut result = resolved;
                    for component in tail.into_iter().rev() {
                        result.push(component);
                    }
                    return Some(result);
                }
            }
            None => return None,
        }
    }
}
