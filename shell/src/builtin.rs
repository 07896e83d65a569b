use crate::alias;
use crate::command::{Arity, CommandFactory, ExecutableCommand, ExitCode, Stdout};
use crate::env::Environment;
use crate::error::CommandError;
use crate::external::find_command_path;
use crate::interpreter::{Factory, ShellState};
use crate::lexer;
use anyhow::{Context, Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::Write;
use std::process::Command;

/// Escape sequence that homes the cursor and clears the screen.
pub const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Number of arguments accepted, checked before the arguments are parsed.
    fn arity() -> Arity;

    /// Executes the command using provided output streams and shell state.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        mut stdout: Box<dyn Stdout>,
        mut stderr: Box<dyn Stdout>,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        let result = T::execute(*self, &mut stdout, &mut stderr, state);
        stdout.flush()?;
        match result {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(stderr, "{e:#}")?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        mut stdout: Box<dyn Stdout>,
        mut stderr: Box<dyn Stdout>,
        _state: &mut ShellState,
    ) -> Result<ExitCode> {
        if self.is_error {
            writeln!(stderr, "{}", self.output.trim_end())?;
            Ok(1)
        } else {
            writeln!(stdout, "{}", self.output.trim_end())?;
            Ok(0)
        }
    }
}

struct WrongArity(CommandError);

impl ExecutableCommand for WrongArity {
    fn execute(
        self: Box<Self>,
        _stdout: Box<dyn Stdout>,
        mut stderr: Box<dyn Stdout>,
        _state: &mut ShellState,
    ) -> Result<ExitCode> {
        writeln!(stderr, "{}", self.0)?;
        Ok(2)
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(
        &self,
        _state: &ShellState,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        if name != T::name() {
            return None;
        }
        if !T::arity().accepts(args.len()) {
            return Some(Box::new(WrongArity(CommandError::ArityMismatch {
                name: T::name(),
                expected: T::arity().describe(),
                got: args.len(),
            })));
        }
        Some(match T::from_args(&[name], args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        })
    }

    fn builtin_name(&self) -> Option<&'static str> {
        Some(T::name())
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn arity() -> Arity {
        Arity::Exact(0)
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", state.env.current_dir.to_string_lossy())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute, relative to the current directory or starting with ~. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn arity() -> Arity {
        Arity::Range(0, 1)
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        let env = &mut state.env;
        let new_dir = match &self.target {
            Some(t) if !t.is_empty() => env.resolve_path(t),
            _ => env
                .home_dir()
                .ok_or_else(|| anyhow!("cd: no target and HOME not set"))?,
        };

        if !new_dir.is_dir() {
            bail!("cd: {}: No such file or directory", new_dir.display());
        }

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: can't canonicalize {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;
        env.set_var("OLDPWD", env.current_dir.to_string_lossy().to_string());
        env.set_var("PWD", canonical.to_string_lossy().to_string());
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell with the given status (0 when omitted).
pub struct Exit {
    #[argh(positional)]
    /// exit status.
    pub code: Option<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn arity() -> Arity {
        Arity::Range(0, 1)
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        let code = match &self.code {
            Some(code) => code
                .trim()
                .parse::<ExitCode>()
                .map_err(|_| anyhow!("exit: {code}: numeric argument required"))?,
            None => 0,
        };
        state.env.exit_code = Some(code);
        Ok(code)
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn arity() -> Arity {
        Arity::AtLeast(0)
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _state: &mut ShellState,
    ) -> Result<ExitCode> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Describe how each name would be interpreted as a command.
pub struct Type {
    #[argh(positional, greedy)]
    /// command names to look up.
    pub names: Vec<String>,
}

impl BuiltinCommand for Type {
    fn name() -> &'static str {
        "type"
    }

    fn arity() -> Arity {
        Arity::AtLeast(1)
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        let mut status = 0;
        let search_paths = state.env.get_var("PATH").unwrap_or_default();
        for name in &self.names {
            if let Some(command) = state.aliases.get(name) {
                writeln!(stdout, "{name} is aliased to `{command}'")?;
            } else if state.builtins.contains(&name.as_str()) {
                writeln!(stdout, "{name} is a shell builtin")?;
            } else if let Some(path) =
                find_command_path(&search_paths, &state.env.current_dir, name)
            {
                writeln!(stdout, "{name} is {}", path.display())?;
            } else {
                writeln!(stderr, "{name}: not found")?;
                status = 1;
            }
        }
        Ok(status)
    }
}

#[derive(FromArgs)]
/// Clear the terminal screen.
pub struct Clear {}

impl BuiltinCommand for Clear {
    fn name() -> &'static str {
        "clear"
    }

    fn arity() -> Arity {
        Arity::Exact(0)
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _state: &mut ShellState,
    ) -> Result<ExitCode> {
        write!(stdout, "{CLEAR_SCREEN}")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Set shell variables passed to every command. Without arguments, list them.
pub struct Export {
    #[argh(positional, greedy)]
    /// assignments of the form NAME=VALUE.
    pub assignments: Vec<String>,
}

impl BuiltinCommand for Export {
    fn name() -> &'static str {
        "export"
    }

    fn arity() -> Arity {
        Arity::AtLeast(0)
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        if self.assignments.is_empty() {
            let mut vars: Vec<_> = state.env.vars.iter().collect();
            vars.sort();
            for (key, value) in vars {
                writeln!(stdout, "{key}={value}")?;
            }
            return Ok(0);
        }

        for assignment in &self.assignments {
            let (key, value) = assignment
                .split_once('=')
                .unwrap_or((assignment.as_str(), ""));
            if !is_variable_name(key) {
                bail!("export: `{assignment}': not a valid identifier");
            }
            if assignment.contains('=') || state.env.get_var(key).is_none() {
                state.env.set_var(key, value);
            }
        }
        state.config.request_reload(&state.env);
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Define or show aliases. Without arguments, list all of them.
pub struct Alias {
    #[argh(positional, greedy)]
    /// NAME to show, or NAME=COMMAND to define.
    pub definitions: Vec<String>,
}

impl BuiltinCommand for Alias {
    fn name() -> &'static str {
        "alias"
    }

    fn arity() -> Arity {
        Arity::AtLeast(0)
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        if self.definitions.is_empty() {
            for (name, command) in state.aliases.iter() {
                writeln!(stdout, "alias {}", alias::format_line(name, command))?;
            }
            return Ok(0);
        }

        let mut status = 0;
        let mut changed = false;
        for definition in &self.definitions {
            match definition.split_once('=') {
                Some((name, command)) => {
                    if !alias::is_valid_name(name) {
                        writeln!(stderr, "alias: `{name}': invalid alias name")?;
                        status = 1;
                        continue;
                    }
                    state.aliases.set(name, command);
                    changed = true;
                }
                None => match state.aliases.get(definition) {
                    Some(command) => {
                        writeln!(stdout, "alias {}", alias::format_line(definition, command))?
                    }
                    None => {
                        writeln!(stderr, "alias: {definition}: not found")?;
                        status = 1;
                    }
                },
            }
        }

        if changed {
            persist_aliases(state)?;
        }
        Ok(status)
    }
}

#[derive(FromArgs)]
/// Remove aliases.
pub struct Unalias {
    #[argh(positional, greedy)]
    /// alias names to remove.
    pub names: Vec<String>,
}

impl BuiltinCommand for Unalias {
    fn name() -> &'static str {
        "unalias"
    }

    fn arity() -> Arity {
        Arity::AtLeast(1)
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        let mut status = 0;
        let mut changed = false;
        for name in &self.names {
            if state.aliases.remove(name).is_some() {
                changed = true;
            } else {
                writeln!(stderr, "unalias: {name}: not found")?;
                status = 1;
            }
        }
        if changed {
            persist_aliases(state)?;
        }
        Ok(status)
    }
}

fn persist_aliases(state: &ShellState) -> Result<()> {
    state.aliases.save(&state.config.snapshot().alias_file)
}

#[derive(FromArgs)]
/// Show the command history, numbered from the oldest entry.
pub struct History {
    #[argh(positional)]
    /// only show the last N entries.
    pub count: Option<String>,
}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn arity() -> Arity {
        Arity::Range(0, 1)
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        let total = state.history.len();
        let count = match &self.count {
            Some(count) => count
                .trim()
                .parse::<usize>()
                .map_err(|_| anyhow!("history: {count}: numeric argument required"))?,
            None => total,
        };

        let skip = total.saturating_sub(count);
        for (index, entry) in state.history.entries().enumerate().skip(skip) {
            writeln!(stdout, "{:>5}  {}", index + 1, entry)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Read and run each line of the given files.
/// NAME=VALUE lines set variables, anything else runs through `sh -c`.
pub struct Source {
    #[argh(positional, greedy)]
    /// files to read.
    pub files: Vec<String>,
}

impl BuiltinCommand for Source {
    fn name() -> &'static str {
        "source"
    }

    fn arity() -> Arity {
        Arity::AtLeast(1)
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        let mut status = 0;
        for file in &self.files {
            let path = state.env.resolve_path(file);
            let text = fs::read_to_string(&path)
                .with_context(|| format!("source: can't read {}", path.display()))?;
            for line in text.lines() {
                let code = source_line(line, stdout, stderr, &mut state.env)?;
                if code != 0 {
                    status = code;
                }
            }
        }
        state.config.request_reload(&state.env);
        Ok(status)
    }
}

/// Runs one line of a sourced file.
fn source_line(
    line: &str,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    env: &mut Environment,
) -> Result<ExitCode> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(0);
    }

    if let Some((key, value)) = parse_assignment(line) {
        let value = match lexer::scan(value, env) {
            Ok(scan) => scan
                .words
                .into_iter()
                .map(|w| w.text)
                .collect::<Vec<_>>()
                .join(" "),
            Err(_) => value.trim_matches(['"', '\'']).to_string(),
        };
        env.set_var(key, value);
        return Ok(0);
    }

    let output = Command::new("sh")
        .arg("-c")
        .arg(line)
        .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&env.current_dir)
        .output()
        .with_context(|| format!("source: can't run {line:?}"))?;
    stdout.write_all(&output.stdout)?;
    stderr.write_all(&output.stderr)?;
    if !output.status.success() {
        tracing::warn!(line, status = ?output.status, "sourced command failed");
    }
    Ok(output.status.code().unwrap_or(1))
}

/// `[export ]NAME=VALUE`
fn parse_assignment(line: &str) -> Option<(&str, &str)> {
    let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
    let (key, value) = line.split_once('=')?;
    is_variable_name(key).then_some((key, value.trim()))
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
