//! Shell settings, resolved from defaults, `QUILL_*` variables and command-line flags.
//!
//! Settings can change while the shell runs (`export`, `source`). Builtins send the
//! current variables to a reloader thread, which rebuilds the [`Config`] and swaps it
//! into the shared slot; readers take a snapshot whenever they need one.

use crate::env::Environment;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;

pub const ENV_HOME: &str = "QUILL_HOME";
pub const ENV_PROMPT_SYMBOL: &str = "QUILL_PROMPT_SYMBOL";
pub const ENV_AUTOCOMPLETE: &str = "QUILL_ENABLE_AUTOCOMPLETE";
pub const ENV_MAX_HISTORY_SIZE: &str = "QUILL_MAX_HISTORY_SIZE";
pub const ENV_HISTORY_FILE: &str = "QUILL_HISTORY_FILE";
pub const ENV_ALIAS_FILE: &str = "QUILL_ALIAS_FILE";
pub const ENV_LOG_FILE: &str = "QUILL_LOG_FILE";
pub const ENV_LOG_LEVEL: &str = "QUILL_LOG_LEVEL";

const DEFAULT_HOME: &str = "~/.quill";
const DEFAULT_PROMPT_SYMBOL: &str = "$";
const DEFAULT_MAX_HISTORY_SIZE: usize = 1000;
const DEFAULT_HISTORY_FILE: &str = "history";
const DEFAULT_ALIAS_FILE: &str = "aliases";
const DEFAULT_LOG_FILE: &str = "quill.log";
const RC_FILE: &str = "quillrc";
const RC_TEMPLATE: &str = "# quill startup file\n\
# Lines of the form NAME=VALUE set variables; anything else runs as a command.\n";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} is not a positive number")]
    InvalidNumber { var: &'static str, value: String },

    #[error("invalid value for {var}: {value:?} (expected true or false)")]
    InvalidBool { var: &'static str, value: String },

    #[error("unknown log level {0:?}")]
    InvalidLogLevel(String),

    #[error("can't determine the home directory")]
    NoHomeDir,

    #[error("can't prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Settings given on the command line. They win over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub home: Option<PathBuf>,
    pub log_level: Option<String>,
    pub no_autocomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub prompt_symbol: String,
    pub autocomplete: bool,
    pub max_history_size: usize,
    /// Directory holding the rc file and, by default, every other file below.
    pub home: PathBuf,
    pub history_file: PathBuf,
    pub alias_file: PathBuf,
    pub log_file: PathBuf,
    pub log_level: LevelFilter,
}

impl Config {
    /// Builds the settings from the shell's variables and the command-line flags.
    ///
    /// Relative file names are resolved inside the home directory.
    pub fn load(env: &Environment, overrides: &Overrides) -> Result<Self, ConfigError> {
        let var = |name: &str| env.get_var(name);

        let home = match &overrides.home {
            Some(home) => home.clone(),
            None => {
                let raw = var(ENV_HOME).unwrap_or_else(|| DEFAULT_HOME.to_string());
                let expanded = env.expand_home(&raw);
                if expanded.starts_with('~') {
                    return Err(ConfigError::NoHomeDir);
                }
                PathBuf::from(expanded)
            }
        };

        let max_history_size = match var(ENV_MAX_HISTORY_SIZE) {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidNumber {
                        var: ENV_MAX_HISTORY_SIZE,
                        value,
                    });
                }
            },
            None => DEFAULT_MAX_HISTORY_SIZE,
        };

        let autocomplete = match var(ENV_AUTOCOMPLETE) {
            Some(value) => parse_bool(ENV_AUTOCOMPLETE, value)?,
            None => true,
        } && !overrides.no_autocomplete;

        let level = overrides
            .log_level
            .clone()
            .or_else(|| var(ENV_LOG_LEVEL))
            .unwrap_or_else(|| "info".to_string());
        let log_level = match LevelFilter::from_str(level.trim()) {
            Ok(filter) => filter,
            Err(_) => return Err(ConfigError::InvalidLogLevel(level)),
        };

        let file = |name: &str, default: &str| {
            let raw = var(name).unwrap_or_else(|| default.to_string());
            resolve_in(&home, &env.expand_home(&raw))
        };

        Ok(Self {
            prompt_symbol: var(ENV_PROMPT_SYMBOL)
                .unwrap_or_else(|| DEFAULT_PROMPT_SYMBOL.to_string()),
            autocomplete,
            max_history_size,
            history_file: file(ENV_HISTORY_FILE, DEFAULT_HISTORY_FILE),
            alias_file: file(ENV_ALIAS_FILE, DEFAULT_ALIAS_FILE),
            log_file: file(ENV_LOG_FILE, DEFAULT_LOG_FILE),
            log_level,
            home,
        })
    }

    pub fn rc_file(&self) -> PathBuf {
        self.home.join(RC_FILE)
    }

    /// Creates the home directory and a commented rc file if they are missing.
    pub fn ensure_home(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.home).map_err(|source| ConfigError::Io {
            path: self.home.clone(),
            source,
        })?;

        let rc = self.rc_file();
        if !rc.exists() {
            fs::write(&rc, RC_TEMPLATE).map_err(|source| ConfigError::Io {
                path: rc.clone(),
                source,
            })?;
            tracing::info!(path = %rc.display(), "created rc file");
        }
        Ok(())
    }
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidBool { var, value }),
    }
}

fn resolve_in(home: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}

/// Shared, reloadable [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    shared: Arc<RwLock<Config>>,
    overrides: Arc<Overrides>,
    reloads: Option<Sender<HashMap<String, String>>>,
}

impl ConfigHandle {
    /// A handle that reloads synchronously until [`ConfigHandle::spawn_reloader`] is
    /// called.
    pub fn new(config: Config, overrides: Overrides) -> Self {
        Self {
            shared: Arc::new(RwLock::new(config)),
            overrides: Arc::new(overrides),
            reloads: None,
        }
    }

    pub fn snapshot(&self) -> Config {
        self.shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Starts the reloader thread. Reload requests from every clone made afterwards
    /// go through it. The thread ends when all those clones are dropped.
    pub fn spawn_reloader(&mut self) -> io::Result<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel::<HashMap<String, String>>();
        let shared = Arc::clone(&self.shared);
        let overrides = Arc::clone(&self.overrides);

        let handle = thread::Builder::new()
            .name("config-reloader".into())
            .spawn(move || {
                for vars in rx {
                    apply(&shared, &overrides, vars);
                }
                tracing::debug!("config reloader stopped");
            })?;
        self.reloads = Some(tx);
        Ok(handle)
    }

    /// Asks for the settings to be rebuilt from `env`'s variables.
    pub fn request_reload(&self, env: &Environment) {
        let vars = env.vars.clone();
        match &self.reloads {
            Some(tx) => {
                if tx.send(vars).is_err() {
                    tracing::warn!("config reloader is gone; reload skipped");
                }
            }
            None => apply(&self.shared, &self.overrides, vars),
        }
    }
}

fn apply(shared: &RwLock<Config>, overrides: &Overrides, vars: HashMap<String, String>) {
    let mut env = Environment::empty("/");
    env.vars = vars;
    match Config::load(&env, overrides) {
        Ok(config) => {
            tracing::info!(?config, "config reloaded");
            *shared.write().unwrap_or_else(PoisonError::into_inner) = config;
        }
        Err(err) => tracing::warn!(%err, "config reload failed; keeping previous settings"),
    }
}
