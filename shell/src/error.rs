//! Error types shared by the parser, the line editor and the builtins.

use std::io;
use thiserror::Error;

/// Errors produced while turning a finished line into a [`crate::CommandDescriptor`].
///
/// The line is rejected and the user is re-prompted with the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unterminated single quotes")]
    UnterminatedSingleQuote,

    #[error("unterminated double quotes")]
    UnterminatedDoubleQuote,

    /// A digit other than `1` or `2` was used as a redirection stream selector.
    #[error("unsupported stream for redirection: {0}")]
    UnsupportedStream(char),

    #[error("missing target for redirection")]
    MissingRedirectTarget,
}

/// Errors that end the interactive read loop.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The terminal device could not be read (closed, EOF, or an I/O error).
    /// The caller decides whether this ends the process.
    #[error("failed to read from terminal: {0}")]
    ReadFailure(#[source] io::Error),

    /// Writing to the terminal failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors reported by builtins as command output, never as a crash.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{name}: wrong number of arguments (expected {expected}, got {got})")]
    ArityMismatch {
        name: &'static str,
        expected: String,
        got: usize,
    },
}
