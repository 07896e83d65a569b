use crate::command::ExitCode;
use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

/// Mutable, user-level view of the process environment used by the shell.
///
/// The environment contains:
/// - `vars`: variables visible to `$NAME` expansion and to spawned commands.
/// - `current_dir`: the working directory for command execution and path completion.
/// - `exit_code`: set by `exit`; the read loop stops once it is present.
///
/// `vars` is the source of truth for the session. `export` and `source` write here
/// instead of mutating the process environment, and children receive the map
/// explicitly when they are spawned.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Key-value store of environment variables (e.g., PATH, HOME).
    pub vars: HashMap<String, String>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
    /// Exit requested by a builtin, with the code the process should end with.
    pub exit_code: Option<ExitCode>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            vars,
            current_dir,
            exit_code: None,
        }
    }

    /// An environment with no variables at all, rooted at `current_dir`.
    pub fn empty(current_dir: impl Into<PathBuf>) -> Self {
        Self {
            vars: HashMap::new(),
            current_dir: current_dir.into(),
            exit_code: None,
        }
    }

    /// Get the value of a variable from the session map.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    /// Set or override a variable in `self.vars`.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Home directory: `$HOME` first, then the platform lookup.
    pub fn home_dir(&self) -> Option<PathBuf> {
        self.get_var("HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
    }

    /// Expand a leading `~` (alone or followed by `/`) to the home directory.
    ///
    /// Anything else, including `~user`, is returned unchanged.
    pub fn expand_home(&self, path: &str) -> String {
        let rest = match path.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => return path.to_string(),
        };
        match self.home_dir() {
            Some(home) => format!("{}{}", home.to_string_lossy().trim_end_matches('/'), rest),
            None => path.to_string(),
        }
    }

    /// Resolve `path` against `current_dir` after home expansion.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let expanded = PathBuf::from(self.expand_home(path));
        if expanded.is_absolute() {
            expanded
        } else {
            self.current_dir.join(expanded)
        }
    }
}
