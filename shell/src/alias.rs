//! Alias table and its `name='command text'` file format.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Mapping from alias name to the command text it stands for.
///
/// Kept sorted so listings and the persisted file are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    aliases: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, command: impl Into<String>) {
        self.aliases.insert(name.into(), command.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.aliases.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Replaces the first word of `line` with its alias text, repeatedly.
    ///
    /// A name is expanded at most once per line, so `alias ls='ls -F'` and cycles such as
    /// `alias a=b`, `alias b=a` terminate.
    pub fn expand<'a>(&self, line: &'a str) -> Cow<'a, str> {
        let mut expanded: HashSet<&str> = HashSet::new();
        let mut current = Cow::Borrowed(line);

        loop {
            let trimmed = current.trim_start();
            let end = trimmed.find([' ', '\t']).unwrap_or(trimmed.len());
            let Some((name, command)) = self.aliases.get_key_value(&trimmed[..end]) else {
                return current;
            };
            if !expanded.insert(name.as_str()) {
                return current;
            }
            let next = format!("{command}{}", &trimmed[end..]);
            current = Cow::Owned(next);
        }
    }

    /// Loads aliases from `path`. A missing file is an empty table; malformed lines are
    /// skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("can't read aliases from {}", path.display()));
            }
        };

        let mut table = Self::new();
        for line in data.lines() {
            match parse_line(line) {
                Some((name, command)) => table.set(name, command),
                None => {
                    if !line.trim().is_empty() && !line.trim_start().starts_with('#') {
                        tracing::debug!(line, "skipping malformed alias line");
                    }
                }
            }
        }
        Ok(table)
    }

    /// Writes every alias to `path`, one `name='command text'` per line.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("can't create {}", parent.display()))?;
        }
        let mut file = fs::File::create(path)
            .with_context(|| format!("can't write aliases to {}", path.display()))?;
        for (name, command) in self.iter() {
            writeln!(file, "{}", format_line(name, command))?;
        }
        Ok(())
    }
}

/// `name='command text'`
pub fn format_line(name: &str, command: &str) -> String {
    format!("{name}='{command}'")
}

/// Parses one `name='command text'` line.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let (name, value) = line.split_once('=')?;
    if !is_valid_name(name) {
        return None;
    }
    let command = value.strip_prefix('\'')?.strip_suffix('\'')?;
    Some((name, command))
}

/// Alias names are single non-empty words without quotes or `=`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '=' | '\'' | '"' | '$' | '>' | '\\'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, &str)]) -> AliasTable {
        let mut table = AliasTable::new();
        for (name, command) in pairs {
            table.set(*name, *command);
        }
        table
    }

    #[test]
    fn test_expand_replaces_first_word_only() {
        let table = table(&[("ll", "ls -la"), ("x", "never")]);
        assert_eq!(table.expand("ll  /tmp x"), "ls -la  /tmp x");
        assert_eq!(table.expand("echo ll"), "echo ll");
    }

    #[test]
    fn test_expand_chains_through_aliases() {
        let table = table(&[("l", "ll -h"), ("ll", "ls -l")]);
        assert_eq!(table.expand("l ."), "ls -l -h .");
    }

    #[test]
    fn test_expand_stops_on_self_reference_and_cycles() {
        let table = table(&[("ls", "ls -F"), ("a", "b 1"), ("b", "a 2")]);
        assert_eq!(table.expand("ls"), "ls -F");
        assert_eq!(table.expand("a"), "a 2 1");
    }

    #[test]
    fn test_expand_without_match_borrows() {
        let table = table(&[("ll", "ls -la")]);
        assert!(matches!(table.expand("pwd"), Cow::Borrowed("pwd")));
    }

    #[test]
    fn test_parse_line_shapes() {
        assert_eq!(parse_line("ll='ls -la'"), Some(("ll", "ls -la")));
        assert_eq!(parse_line("  g='git status'  "), Some(("g", "git status")));
        assert_eq!(parse_line("q=''"), Some(("q", "")));
        assert_eq!(parse_line("ll=ls -la"), None);
        assert_eq!(parse_line("ll=\"ls\""), None);
        assert_eq!(parse_line("='x'"), None);
        assert_eq!(parse_line("# comment"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = AliasTable::load(&dir.path().join("aliases")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("aliases");

        let original = table(&[("ll", "ls -la"), ("gs", "git status")]);
        original.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "gs='git status'\nll='ls -la'\n");
        assert_eq!(AliasTable::load(&path).unwrap(), original);
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases");
        fs::write(&path, "ll='ls -la'\nbroken\n\n# note\nbad=unquoted\n").unwrap();

        let table = AliasTable::load(&path).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("ll"), Some("ls -la"));
    }
}
