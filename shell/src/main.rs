use anyhow::{Context, Result};
use argh::FromArgs;
use quill_shell::alias::AliasTable;
use quill_shell::completion::Completer;
use quill_shell::config::{Config, ConfigHandle, Overrides};
use quill_shell::editor::LineEditor;
use quill_shell::env::Environment;
use quill_shell::terminal::TerminalSource;
use quill_shell::{Shell, ShellError, ShellState, logging};
use std::io;
use std::path::PathBuf;

#[derive(FromArgs)]
/// quill, a small interactive shell.
struct Args {
    #[argh(option)]
    /// directory holding the startup, history, alias and log files (default: $QUILL_HOME or ~/.quill).
    home: Option<PathBuf>,

    #[argh(option)]
    /// log level: off, error, warn, info, debug or trace.
    log_level: Option<String>,

    #[argh(switch)]
    /// disable Tab completion.
    no_autocomplete: bool,
}

fn main() {
    let args: Args = argh::from_env();
    let code = match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("quill: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> Result<i32> {
    let overrides = Overrides {
        home: args.home,
        log_level: args.log_level,
        no_autocomplete: args.no_autocomplete,
    };
    let env = Environment::new();
    let config = Config::load(&env, &overrides).context("invalid configuration")?;
    config.ensure_home()?;
    let _guard = logging::init(&config.log_file, config.log_level)?;
    tracing::info!(home = %config.home.display(), "quill starting");

    let mut handle = ConfigHandle::new(config.clone(), overrides);
    let reloader = handle
        .spawn_reloader()
        .context("can't start the config reloader")?;

    let mut state = ShellState::new(env, handle.clone());
    if let Err(err) = state.history.load(&config.history_file) {
        tracing::warn!(error = format!("{err:#}"), "history not loaded");
    }
    match AliasTable::load(&config.alias_file) {
        Ok(aliases) => state.aliases = aliases,
        Err(err) => tracing::warn!(error = format!("{err:#}"), "aliases not loaded"),
    }

    let mut shell = Shell::with_default_commands(state);
    if let Err(err) = shell.source(&config.rc_file()) {
        tracing::warn!(error = format!("{err:#}"), "startup file failed");
        eprintln!("quill: {err:#}");
    }

    let (source, inputs) = TerminalSource::stdin().context("can't read the terminal")?;
    #[cfg(unix)]
    let _signals = quill_shell::terminal::SignalListener::spawn(inputs)
        .context("can't install signal handlers")?;
    #[cfg(not(unix))]
    drop(inputs);

    let completer = Completer::new(shell.builtin_names().iter().copied());
    let mut editor = LineEditor::new(source, io::stdout(), handle.clone(), completer);
    let result = shell.repl(&mut editor);

    let history_file = shell.state.config.snapshot().history_file;
    if let Err(err) = shell.state.history.save(&history_file) {
        tracing::warn!(error = format!("{err:#}"), "history not saved");
    }

    let code = match result {
        Ok(code) => code,
        Err(ShellError::ReadFailure(err)) => {
            tracing::error!(%err, "terminal read failed");
            eprintln!("quill: {err}");
            1
        }
        Err(err) => return Err(err.into()),
    };

    drop(editor);
    drop(shell);
    drop(handle);
    if reloader.join().is_err() {
        tracing::warn!("config reloader panicked");
    }
    tracing::info!(code, "quill exiting");
    Ok(code)
}
