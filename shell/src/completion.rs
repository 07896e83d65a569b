//! Tab completion: builtin names, `PATH` executables and filesystem entries.
//!
//! Every lookup returns *suffixes*, the part of a candidate that follows what the user
//! already typed. Results are deduplicated and sorted.

use crate::env::Environment;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

/// Suffix meaning "the token names a directory, append a slash".
pub const DIRECTORY_SUFFIX: &str = "/";

/// Completion source for the line editor.
#[derive(Debug, Clone, Default)]
pub struct Completer {
    builtins: Vec<String>,
}

impl Completer {
    pub fn new<I, S>(builtins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            builtins: builtins.into_iter().map(Into::into).collect(),
        }
    }

    /// Candidate suffixes for `token`.
    ///
    /// `is_command` tells whether the token is in command position. Arguments and
    /// anything that looks like a path complete against the filesystem; command names
    /// complete against builtins and `PATH`.
    pub fn complete(&self, token: &str, is_command: bool, env: &Environment) -> Vec<String> {
        let suffixes = if !is_command || looks_like_path(token, env) {
            path_suffixes(token, env)
        } else if token.is_empty() {
            BTreeSet::new()
        } else {
            let mut suffixes = self.builtin_suffixes(token);
            suffixes.extend(executable_suffixes(token, env));
            suffixes
        };
        tracing::debug!(token, is_command, found = suffixes.len(), "completion");
        suffixes.into_iter().collect()
    }

    fn builtin_suffixes(&self, prefix: &str) -> BTreeSet<String> {
        self.builtins
            .iter()
            .filter_map(|name| name.strip_prefix(prefix))
            .map(str::to_string)
            .collect()
    }
}

fn looks_like_path(token: &str, env: &Environment) -> bool {
    if token.is_empty() {
        return false;
    }
    token.contains('/')
        || token.starts_with('.')
        || token.starts_with('~')
        || env.resolve_path(token).exists()
}

/// Completes `token` against the entries of the directory it points into.
fn path_suffixes(token: &str, env: &Environment) -> BTreeSet<String> {
    let mut suffixes = BTreeSet::new();

    if !token.is_empty() && !token.ends_with('/') && env.resolve_path(token).is_dir() {
        suffixes.insert(DIRECTORY_SUFFIX.to_string());
        return suffixes;
    }

    let expanded = env.expand_home(token);
    let (dir, base) = match expanded.rfind('/') {
        Some(0) => ("/", &expanded[1..]),
        Some(idx) => (&expanded[..idx], &expanded[idx + 1..]),
        None => (".", expanded.as_str()),
    };
    let dir = env.resolve_path(dir);

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!(dir = %dir.display(), %err, "can't list directory");
            return suffixes;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(rest) = name.strip_prefix(base) else {
            continue;
        };
        if entry.path().is_dir() {
            suffixes.insert(format!("{rest}/"));
        } else {
            suffixes.insert(rest.to_string());
        }
    }
    suffixes
}

/// Scans every `PATH` directory on its own thread and collects matching executables.
fn executable_suffixes(prefix: &str, env: &Environment) -> BTreeSet<String> {
    let Some(path_var) = env.get_var("PATH") else {
        return BTreeSet::new();
    };
    let dirs: Vec<PathBuf> = std::env::split_paths(&path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .collect();

    let (tx, rx) = mpsc::channel::<String>();
    thread::scope(|scope| {
        for dir in &dirs {
            let tx = tx.clone();
            scope.spawn(move || scan_executables(dir, prefix, &tx));
        }
    });
    drop(tx);

    rx.into_iter().collect()
}

fn scan_executables(dir: &Path, prefix: &str, tx: &mpsc::Sender<String>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!(dir = %dir.display(), %err, "skipping PATH entry");
            return;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(rest) = name.strip_prefix(prefix) else {
            continue;
        };
        if is_executable(&entry.path()) {
            // The receiver lives until every scanner has been joined.
            let _ = tx.send(rest.to_string());
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Longest string every candidate starts with, compared character by character.
pub fn longest_common_prefix<S: AsRef<str>>(candidates: &[S]) -> String {
    let Some((first, rest)) = candidates.split_first() else {
        return String::new();
    };
    let mut prefix: Vec<char> = first.as_ref().chars().collect();
    for candidate in rest {
        let common = prefix
            .iter()
            .zip(candidate.as_ref().chars())
            .take_while(|(a, b)| **a == *b)
            .count();
        prefix.truncate(common);
        if prefix.is_empty() {
            break;
        }
    }
    prefix.into_iter().collect()
}

/// Backslash-escapes characters the parser would otherwise interpret.
pub fn escape(suffix: &str) -> String {
    let mut out = String::with_capacity(suffix.len());
    for c in suffix.chars() {
        if matches!(c, ' ' | '\t' | '\'' | '"' | '\\' | '$' | '>') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
