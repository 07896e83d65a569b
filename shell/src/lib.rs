//! quill: a small interactive shell.
//!
//! The crate is split the way a line travels through it. Key presses are decoded by
//! [`input`] on a terminal thread ([`terminal`]), edited into a line by [`editor`]
//! with help from [`history`] and [`completion`], parsed by [`parser`] and finally run
//! by the [`Shell`] through builtin or external command factories.
//!
//! The main entry point is [`Shell`], which owns a [`ShellState`] and executes lines
//! with [`Shell::run_line`] or interactively with [`Shell::repl`]. The public modules
//! [`command`] and [`env`] expose traits and types for implementing your own commands
//! and for interacting with the session environment.

pub mod alias;
mod builtin;
pub mod command;
pub mod completion;
pub mod config;
pub mod editor;
pub mod env;
pub mod error;
mod external;
pub mod history;
pub mod input;
mod interpreter;
mod io_adapters;
mod lexer;
pub mod logging;
pub mod parser;
pub mod terminal;

pub use error::{CommandError, ParseError, ShellError};
pub use external::find_command_path;
pub use interpreter::{Shell, ShellState};
pub use io_adapters::MemWriter;
pub use parser::{CommandDescriptor, parse};
