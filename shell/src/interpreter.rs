use crate::alias::AliasTable;
use crate::command::{CommandFactory, ExitCode, Stdout};
use crate::config::ConfigHandle;
use crate::editor::{LineEditor, ReadOutcome};
use crate::env::Environment;
use crate::error::ShellError;
use crate::history::History;
use crate::parser::{self, CommandDescriptor, Redirect, Stream};
use crate::terminal::EventSource;
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only support commands defined in this crate: BuiltinCommand and ExternalCommand.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// Everything commands and the line editor can see and change.
pub struct ShellState {
    pub env: Environment,
    pub aliases: AliasTable,
    pub history: History,
    pub config: ConfigHandle,
    /// Names answered by builtin factories, for `type` and completion.
    pub builtins: Vec<&'static str>,
}

impl ShellState {
    /// State with empty aliases and a history sized from `config`.
    pub fn new(env: Environment, config: ConfigHandle) -> Self {
        let capacity = config.snapshot().max_history_size;
        Self {
            env,
            aliases: AliasTable::new(),
            history: History::new(capacity),
            config,
            builtins: Vec::new(),
        }
    }
}

/// An interactive shell that can execute built-in and external commands.
///
/// The shell owns a [`ShellState`] and a list of [`CommandFactory`] objects that are
/// queried, in order, to create commands by name. See [`Shell::with_default_commands`]
/// for the factories included out of the box.
pub struct Shell {
    pub state: ShellState,
    commands: Vec<Box<dyn CommandFactory>>,
}

impl Shell {
    /// Create a new shell with a custom set of command factories.
    pub fn new(mut state: ShellState, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        state.builtins = commands.iter().filter_map(|f| f.builtin_name()).collect();
        Self { state, commands }
    }

    /// A shell with every builtin and the external command launcher.
    pub fn with_default_commands(state: ShellState) -> Self {
        use crate::builtin::{
            Alias, Cd, Clear, Echo, Exit, Export, History as HistoryCommand, Pwd, Source, Type,
            Unalias,
        };
        use crate::external::ExternalCommand;
        Self::new(
            state,
            vec![
                Box::new(Factory::<Exit>::default()),
                Box::new(Factory::<Echo>::default()),
                Box::new(Factory::<Pwd>::default()),
                Box::new(Factory::<Cd>::default()),
                Box::new(Factory::<Type>::default()),
                Box::new(Factory::<Clear>::default()),
                Box::new(Factory::<Export>::default()),
                Box::new(Factory::<Alias>::default()),
                Box::new(Factory::<Unalias>::default()),
                Box::new(Factory::<HistoryCommand>::default()),
                Box::new(Factory::<Source>::default()),
                Box::new(Factory::<ExternalCommand>::default()),
            ],
        )
    }

    pub fn builtin_names(&self) -> &[&'static str] {
        &self.state.builtins
    }

    /// Run a single command invocation by name with arguments.
    ///
    /// Unknown commands print `NAME: not found` and return 127.
    pub fn run(
        &mut self,
        name: &str,
        args: &[&str],
        stdout: Box<dyn Stdout>,
        mut stderr: Box<dyn Stdout>,
    ) -> Result<ExitCode> {
        for factory in &self.commands {
            if let Some(cmd) = factory.try_create(&self.state, name, args) {
                return cmd.execute(stdout, stderr, &mut self.state);
            }
        }
        tracing::debug!(name, "command not found");
        writeln!(stderr, "{name}: not found")?;
        Ok(127)
    }

    /// Runs a parsed command, sending the redirected stream to its target file.
    pub fn execute_with(
        &mut self,
        command: &CommandDescriptor,
        mut stdout: Box<dyn Stdout>,
        mut stderr: Box<dyn Stdout>,
    ) -> Result<ExitCode> {
        let Some((name, args)) = command.split_first() else {
            return Ok(0);
        };

        if let Some(redirect) = &command.redirect {
            let file = self.open_redirect(redirect)?;
            match redirect.stream {
                Stream::Stdout => stdout = Box::new(file),
                Stream::Stderr => stderr = Box::new(file),
            }
        }
        self.run(name, &args, stdout, stderr)
    }

    fn open_redirect(&self, redirect: &Redirect) -> Result<fs::File> {
        let path = self.state.env.resolve_path(&redirect.target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("can't create {}", parent.display()))?;
        }
        let mut options = OpenOptions::new();
        options.create(true);
        if redirect.truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        options
            .open(&path)
            .with_context(|| format!("can't open {}", path.display()))
    }

    /// Sources `path` on the process's own streams, as done for the startup file.
    pub fn source(&mut self, path: &Path) -> Result<ExitCode> {
        use crate::builtin::{BuiltinCommand, Source};
        let source = Source {
            files: vec![path.to_string_lossy().into_owned()],
        };
        BuiltinCommand::execute(source, &mut io::stdout(), &mut io::stderr(), &mut self.state)
    }

    /// Parses and runs one line with the given streams.
    ///
    /// A line that doesn't parse is reported on `stderr` and returns 1.
    pub fn run_line_with(
        &mut self,
        line: &str,
        stdout: Box<dyn Stdout>,
        mut stderr: Box<dyn Stdout>,
    ) -> Result<ExitCode> {
        let command = match parser::parse(line, &self.state.aliases, &self.state.env) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!(%err, line, "rejected line");
                writeln!(stderr, "quill: {err}")?;
                return Ok(1);
            }
        };
        self.execute_with(&command, stdout, stderr)
    }

    /// Parses and runs one line on the process's own stdout and stderr.
    pub fn run_line(&mut self, line: &str) -> ExitCode {
        match self.run_line_with(line, Box::new(io::stdout()), Box::new(io::stderr())) {
            Ok(code) => code,
            Err(err) => {
                tracing::warn!(error = format!("{err:#}"), line, "command failed");
                eprintln!("quill: {err:#}");
                1
            }
        }
    }

    /// The read-eval-print loop.
    ///
    /// Returns the code the process should exit with, either requested by `exit` or by
    /// a terminating signal. A terminal that can't be read is an error.
    pub fn repl<S: EventSource, W: Write>(
        &mut self,
        editor: &mut LineEditor<S, W>,
    ) -> Result<ExitCode, ShellError> {
        let mut carried = String::new();
        loop {
            if let Some(code) = self.state.env.exit_code {
                return Ok(code);
            }

            let config = self.state.config.snapshot();
            if self.state.history.capacity() != config.max_history_size.max(1) {
                self.state.history.set_capacity(config.max_history_size);
            }

            let outcome = editor.read_line(&mut self.state.history, &self.state.env, &carried)?;
            carried.clear();
            match outcome {
                ReadOutcome::Submitted(line) => {
                    if let Err(err) = self.state.history.save(&config.history_file) {
                        tracing::warn!(error = format!("{err:#}"), "can't save history");
                    }
                    let code = self.run_line(&line);
                    tracing::debug!(line, code, "line finished");
                }
                ReadOutcome::Pending(buffer) => carried = buffer,
                ReadOutcome::Interrupted => {}
                ReadOutcome::Exit(code) => {
                    tracing::info!(code, "exit requested by signal");
                    return Ok(code);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Completer;
    use crate::config::{Config, Overrides};
    use crate::input::{Event, control};
    use crate::io_adapters::MemWriter;
    use crate::terminal::Input;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn shell_in(dir: &Path) -> Shell {
        let mut env = Environment::empty(dir);
        env.set_var("HOME", dir.to_string_lossy().to_string());
        env.set_var("PATH", "/bin:/usr/bin");
        env.set_var("QUILL_HOME", dir.join(".quill").to_string_lossy().to_string());
        let config = Config::load(&env, &Overrides::default()).unwrap();
        let state = ShellState::new(env, ConfigHandle::new(config, Overrides::default()));
        Shell::with_default_commands(state)
    }

    fn text(buf: &Rc<RefCell<Vec<u8>>>) -> String {
        String::from_utf8(buf.borrow().clone()).unwrap()
    }

    fn run(shell: &mut Shell, line: &str) -> (ExitCode, String, String) {
        let (out, out_buf) = MemWriter::with_handle();
        let (err, err_buf) = MemWriter::with_handle();
        let code = shell
            .run_line_with(line, Box::new(out), Box::new(err))
            .unwrap();
        (code, text(&out_buf), text(&err_buf))
    }

    #[test]
    fn test_builtin_names_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell_in(dir.path());
        assert!(shell.builtin_names().contains(&"echo"));
        assert!(shell.builtin_names().contains(&"source"));
        assert_eq!(shell.builtin_names().len(), 11);
    }

    #[test]
    fn test_echo_hello_world() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        assert_eq!(
            run(&mut shell, "echo Hello, World!"),
            (0, "Hello, World!\n".into(), String::new())
        );
        assert_eq!(run(&mut shell, "echo 'a  b'").1, "a  b\n");
    }

    #[test]
    fn test_empty_line_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        assert_eq!(run(&mut shell, "   "), (0, String::new(), String::new()));
    }

    #[test]
    fn test_unknown_command_is_127() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        assert_eq!(
            run(&mut shell, "definitely_not_a_command_zz"),
            (127, String::new(), "definitely_not_a_command_zz: not found\n".into())
        );
    }

    #[test]
    fn test_parse_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        let (code, _, err) = run(&mut shell, "echo 'a");
        assert_eq!(code, 1);
        assert_eq!(err, "quill: unterminated single quotes\n");

        let (_, _, err) = run(&mut shell, "echo a >");
        assert_eq!(err, "quill: missing target for redirection\n");
    }

    #[test]
    fn test_arity_mismatch_is_2() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        let (code, _, err) = run(&mut shell, "pwd extra");
        assert_eq!(code, 2);
        assert_eq!(err, "pwd: wrong number of arguments (expected 0, got 1)\n");
    }

    #[test]
    fn test_redirect_truncates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());

        let (code, out, _) = run(&mut shell, "echo hi > logs/out.txt");
        assert_eq!(code, 0);
        assert!(out.is_empty());
        let path = dir.path().join("logs/out.txt");
        assert_eq!(fs::read_to_string(&path).unwrap(), "hi\n");

        run(&mut shell, "echo there 1>> logs/out.txt");
        assert_eq!(fs::read_to_string(&path).unwrap(), "hi\nthere\n");

        run(&mut shell, "echo again > logs/out.txt");
        assert_eq!(fs::read_to_string(&path).unwrap(), "again\n");
    }

    #[test]
    fn test_stderr_redirect_captures_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());

        let (code, _, err) = run(&mut shell, "cd missing_dir 2> err.log");
        assert_eq!(code, 1);
        assert!(err.is_empty());
        let logged = fs::read_to_string(dir.path().join("err.log")).unwrap();
        assert!(logged.contains("No such file or directory"));
    }

    #[test]
    #[cfg(unix)]
    fn test_external_command_writes_to_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        fs::write(dir.path().join("file"), "contents\n").unwrap();

        let (code, _, _) = run(&mut shell, "cat file > copy");
        assert_eq!(code, 0);
        assert_eq!(
            fs::read_to_string(dir.path().join("copy")).unwrap(),
            "contents\n"
        );

        let (code, _, _) = run(&mut shell, "cat nope 2> err.log");
        assert_ne!(code, 0);
        assert!(
            !fs::read_to_string(dir.path().join("err.log"))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_external_exit_status_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        assert_eq!(run(&mut shell, "sh -c 'exit 3'").0, 3);
    }

    #[test]
    fn test_aliases_expand_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        shell.state.aliases.set("greet", "echo hello");
        assert_eq!(run(&mut shell, "greet world").1, "hello world\n");
    }

    #[test]
    fn test_variables_expand_from_shell_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        run(&mut shell, "export NAME=quill");
        assert_eq!(run(&mut shell, "echo \"hi $NAME\"").1, "hi quill\n");
    }

    #[test]
    fn test_source_applies_rc_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        let rc = dir.path().join("quill rc");
        fs::write(&rc, "QUILL_PROMPT_SYMBOL='>'\nGREETING=hi\n").unwrap();

        assert_eq!(shell.source(&rc).unwrap(), 0);
        assert_eq!(shell.state.env.get_var("GREETING"), Some("hi".into()));
        assert_eq!(shell.state.config.snapshot().prompt_symbol, ">");
    }

    #[test]
    fn test_exit_sets_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        run(&mut shell, "exit 4");
        assert_eq!(shell.state.env.exit_code, Some(4));
    }

    struct ScriptedSource {
        inputs: VecDeque<Input>,
    }

    impl EventSource for ScriptedSource {
        fn next_input(&mut self) -> Input {
            self.inputs.pop_front().unwrap_or_else(|| {
                Input::Failed(io::Error::new(io::ErrorKind::UnexpectedEof, "script ended"))
            })
        }
    }

    fn line(text: &str) -> Vec<Input> {
        text.chars()
            .map(|c| Input::Key(Event::from_char(c)))
            .chain([Input::Key(Event::Control(control::ENTER))])
            .collect()
    }

    fn repl(shell: &mut Shell, inputs: Vec<Input>) -> (Result<ExitCode, ShellError>, String) {
        let source = ScriptedSource {
            inputs: inputs.into(),
        };
        let completer = Completer::new(shell.builtin_names().iter().copied());
        let config = shell.state.config.clone();
        let mut editor = LineEditor::new(source, Vec::new(), config, completer).without_raw_mode();
        let result = shell.repl(&mut editor);
        (result, String::from_utf8(editor.output().clone()).unwrap())
    }

    #[test]
    fn test_repl_carries_buffer_after_listing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("alpha"), "").unwrap();
        fs::write(dir.path().join("beta"), "").unwrap();
        let mut shell = shell_in(dir.path());

        let mut inputs: Vec<Input> = "echo "
            .chars()
            .map(|c| Input::Key(Event::from_char(c)))
            .collect();
        inputs.push(Input::Key(Event::Control(control::TAB)));
        inputs.push(Input::Key(Event::Control(control::TAB)));
        inputs.extend(line("x"));
        inputs.push(Input::Terminate(143));

        let (result, out) = repl(&mut shell, inputs);
        assert_eq!(result.unwrap(), 143);
        assert!(out.contains("alpha"));
        assert!(out.contains("beta"));
        assert!(out.contains("\r$ echo x\x1b[K"));
        assert_eq!(shell.state.history.entries().collect::<Vec<_>>(), vec!["echo x"]);
    }

    #[test]
    fn test_repl_returns_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());

        let mut inputs = line("exit 3");
        inputs.extend(line("echo unreachable"));
        let (result, _) = repl(&mut shell, inputs);
        assert_eq!(result.unwrap(), 3);
        assert_eq!(shell.state.history.entries().collect::<Vec<_>>(), vec!["exit 3"]);
    }

    #[test]
    fn test_repl_applies_history_size_from_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());

        let mut inputs = line("export QUILL_MAX_HISTORY_SIZE=1");
        inputs.extend(line("echo a"));
        inputs.extend(line("echo b"));
        inputs.push(Input::Terminate(143));

        let (result, _) = repl(&mut shell, inputs);
        assert_eq!(result.unwrap(), 143);
        assert_eq!(shell.state.history.capacity(), 1);
        assert_eq!(shell.state.history.entries().collect::<Vec<_>>(), vec!["echo b"]);
    }

    #[test]
    fn test_repl_stops_on_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());

        let (result, out) = repl(&mut shell, vec![Input::Terminate(143)]);
        assert_eq!(result.unwrap(), 143);
        assert!(out.starts_with("\r$ "));
        assert_eq!(shell.state.history.len(), 0);
    }

    #[test]
    fn test_repl_reports_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_in(dir.path());

        let (result, _) = repl(&mut shell, Vec::new());
        assert!(matches!(result, Err(ShellError::ReadFailure(_))));
    }
}
