use crate::command::{CommandFactory, ExecutableCommand, ExitCode, Stdout};
use crate::interpreter::{Factory, ShellState};
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

/// Command that is not a builtin.
pub struct ExternalCommand {
    name: OsString,
    args: Vec<OsString>,
}

impl ExternalCommand {
    pub fn new(name: OsString, args: Vec<OsString>) -> Self {
        Self { name, args }
    }
}

impl CommandFactory for Factory<ExternalCommand> {
    fn try_create(
        &self,
        state: &ShellState,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        let env = &state.env;
        let search_paths = env.get_var("PATH").unwrap_or_default();
        let executable = find_command_path(&search_paths, &env.current_dir, name)?;
        Some(Box::new(ExternalCommand::new(
            executable.into_os_string(),
            args.iter().map(|arg| env.expand_home(arg).into()).collect(),
        )))
    }
}

impl ExecutableCommand for ExternalCommand {
    fn execute(
        self: Box<Self>,
        stdout: Box<dyn Stdout>,
        stderr: Box<dyn Stdout>,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        let env = &state.env;
        tracing::debug!(command = ?self.name, args = ?self.args, "spawning");
        let mut child = std::process::Command::new(&self.name)
            .args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(stdout.stdio())
            .stderr(stderr.stdio())
            .env_clear()
            .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&env.current_dir)
            .spawn()
            .with_context(|| format!("{}: can't start", self.name.to_string_lossy()))?;
        let exit_status = child.wait()?;
        match exit_status.code() {
            Some(x) => Ok(x),
            None => Ok(terminated_by_signal(exit_status)),
        }
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> i32 {
    -1
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Anything with a separator (`./foo`, `bin/sh`): resolved against `cwd`.
/// - Single path component: searched in each directory of `search_paths` (PATH),
///   first existing match wins.
/// - Empty path: returns `None`.
pub fn find_command_path(search_paths: &str, cwd: &Path, path: &str) -> Option<PathBuf> {
    if path.is_empty() {
        return None;
    }

    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return find_by_path(candidate.to_path_buf());
    }

    let mut components = candidate.components();
    match (components.next(), components.next()) {
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()),
        _ => find_by_path(cwd.join(candidate)),
    }
}

fn find_in_path(search_paths: &str, cmd: &std::ffi::OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .find_map(|dir| find_by_path(dir.join(cmd)))
}

fn find_by_path(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}
