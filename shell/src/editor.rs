//! The interactive line editor.
//!
//! Each key press mutates the buffer and redraws the whole prompt line: carriage
//! return, prompt, buffer, clear to end of line, then the cursor is walked back over
//! the part of the buffer that lies after it. Widths are measured in terminal columns.

use crate::completion::{Completer, escape, longest_common_prefix};
use crate::config::{Config, ConfigHandle};
use crate::env::Environment;
use crate::error::ShellError;
use crate::history::History;
use crate::input::{Event, control};
use crate::parser::{self, OpenQuote, TokenAt};
use crate::terminal::{EventSource, Input, RawMode};
use crossterm::cursor::{MoveLeft, MoveRight};
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use std::io::{self, Write};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const BELL: &str = "\x07";
const NEWLINE: &str = "\r\n";

/// How a call to [`LineEditor::read_line`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Enter (or Ctrl+L, as `clear`) was pressed.
    Submitted(String),
    /// Completion candidates were listed; read again starting from this buffer.
    Pending(String),
    /// Ctrl+C or SIGINT abandoned the line.
    Interrupted,
    /// A terminating signal arrived; the shell should exit with this code.
    Exit(i32),
}

pub struct LineEditor<S, W> {
    source: S,
    out: W,
    config: ConfigHandle,
    completer: Completer,
    raw_mode: bool,
    buffer: Vec<char>,
    cursor: usize,
    /// The buffer differs from the history entry it was recalled from.
    edited: bool,
    /// The previous key was a Tab that found several candidates and no common prefix.
    tab_pending: bool,
}

impl<S: EventSource, W: Write> LineEditor<S, W> {
    pub fn new(source: S, out: W, config: ConfigHandle, completer: Completer) -> Self {
        Self {
            source,
            out,
            config,
            completer,
            raw_mode: true,
            buffer: Vec::new(),
            cursor: 0,
            edited: false,
            tab_pending: false,
        }
    }

    /// Leaves the terminal mode alone while reading; for scripted sources.
    pub fn without_raw_mode(mut self) -> Self {
        self.raw_mode = false;
        self
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Reads one line, starting with `initial` already in the buffer.
    pub fn read_line(
        &mut self,
        history: &mut History,
        env: &Environment,
        initial: &str,
    ) -> Result<ReadOutcome, ShellError> {
        let _raw = if self.raw_mode {
            Some(RawMode::enable()?)
        } else {
            None
        };
        self.source.begin_line();

        self.buffer = initial.chars().collect();
        self.cursor = self.buffer.len();
        self.tab_pending = false;
        if initial.is_empty() {
            self.edited = false;
            history.reset_cursor();
        }
        let prompt = self.config.snapshot().prompt_symbol;
        self.render(&prompt)?;

        loop {
            let input = self.source.next_input();
            let config = self.config.snapshot();
            match input {
                Input::Key(event) => {
                    if let Some(outcome) = self.handle_key(event, &config, history, env)? {
                        return Ok(outcome);
                    }
                }
                Input::Interrupt => return Ok(self.interrupt(history)?),
                Input::Terminate(code) => {
                    self.write(NEWLINE)?;
                    return Ok(ReadOutcome::Exit(code));
                }
                Input::Failed(err) => return Err(ShellError::ReadFailure(err)),
            }
        }
    }

    fn handle_key(
        &mut self,
        event: Event,
        config: &Config,
        history: &mut History,
        env: &Environment,
    ) -> io::Result<Option<ReadOutcome>> {
        let prompt = config.prompt_symbol.as_str();
        if event != Event::Control(control::TAB) {
            self.tab_pending = false;
        }

        match event {
            Event::Char(c) => {
                self.buffer.insert(self.cursor, c);
                self.cursor += 1;
                self.edited = true;
                self.render(prompt)?;
            }
            Event::Control(control::BACKSPACE | control::CTRL_H) => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.buffer.remove(self.cursor);
                    self.edited = true;
                    self.render(prompt)?;
                }
            }
            Event::ArrowLeft => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    let width = column_width(self.buffer[self.cursor]);
                    if width > 0 {
                        queue!(self.out, MoveLeft(width))?;
                        self.out.flush()?;
                    }
                }
            }
            Event::ArrowRight => {
                if self.cursor < self.buffer.len() {
                    let width = column_width(self.buffer[self.cursor]);
                    self.cursor += 1;
                    if width > 0 {
                        queue!(self.out, MoveRight(width))?;
                        self.out.flush()?;
                    }
                }
            }
            Event::ArrowUp => match history.browse_up(&self.buffer, self.edited) {
                Some(entry) => self.load(entry, prompt)?,
                None => self.write(BELL)?,
            },
            Event::ArrowDown => match history.browse_down(&self.buffer, self.edited) {
                Some(entry) => self.load(entry, prompt)?,
                None => self.write(BELL)?,
            },
            Event::Control(control::TAB) => return self.complete(config, env),
            Event::Control(control::ENTER | control::LINE_FEED) => {
                self.write(NEWLINE)?;
                let line: String = self.buffer.iter().collect();
                history.commit(&line, self.edited);
                tracing::debug!(line, "line submitted");
                return Ok(Some(ReadOutcome::Submitted(line)));
            }
            Event::Control(control::CTRL_L) => {
                return Ok(Some(ReadOutcome::Submitted("clear".to_string())));
            }
            Event::Control(control::CTRL_C) => return self.interrupt(history).map(Some),
            Event::Control(code) => tracing::debug!(code, "ignoring control key"),
        }
        Ok(None)
    }

    fn complete(&mut self, config: &Config, env: &Environment) -> io::Result<Option<ReadOutcome>> {
        if !config.autocomplete {
            self.write(BELL)?;
            return Ok(None);
        }

        let token = parser::token_at(&self.buffer, self.cursor, env);
        let candidates = self.completer.complete(&token.text, token.is_command, env);
        let prompt = config.prompt_symbol.as_str();

        match candidates.as_slice() {
            [] => {
                self.tab_pending = false;
                self.write(BELL)?;
            }
            [only] => {
                let mut insert = quote(&token, only);
                if !only.ends_with('/') {
                    match token.open_quote {
                        Some(OpenQuote::Single) => insert.push('\''),
                        Some(OpenQuote::Double) => insert.push('"'),
                        None => {}
                    }
                    insert.push(' ');
                }
                self.splice(token.end, &insert);
                self.tab_pending = false;
                self.render(prompt)?;
            }
            several => {
                let common = longest_common_prefix(several);
                if !common.is_empty() {
                    self.splice(token.end, &quote(&token, &common));
                    self.tab_pending = false;
                    self.render(prompt)?;
                } else if !self.tab_pending {
                    self.tab_pending = true;
                    self.write(BELL)?;
                } else {
                    self.tab_pending = false;
                    let stem = token.text.rsplit('/').next().unwrap_or_default();
                    let listing = several
                        .iter()
                        .map(|suffix| format!("{stem}{suffix}"))
                        .collect::<Vec<_>>()
                        .join("  ");
                    self.write(&format!("{NEWLINE}{listing}{NEWLINE}"))?;
                    return Ok(Some(ReadOutcome::Pending(self.buffer.iter().collect())));
                }
            }
        }
        Ok(None)
    }

    fn interrupt(&mut self, history: &mut History) -> io::Result<ReadOutcome> {
        self.write("^C")?;
        self.write(NEWLINE)?;
        self.buffer.clear();
        self.cursor = 0;
        history.reset_cursor();
        Ok(ReadOutcome::Interrupted)
    }

    fn load(&mut self, entry: Vec<char>, prompt: &str) -> io::Result<()> {
        self.buffer = entry;
        self.cursor = self.buffer.len();
        self.edited = false;
        self.render(prompt)
    }

    fn splice(&mut self, at: usize, text: &str) {
        let at = at.min(self.buffer.len());
        let inserted: Vec<char> = text.chars().collect();
        self.cursor = at + inserted.len();
        self.buffer.splice(at..at, inserted);
        self.edited = true;
    }

    fn render(&mut self, prompt: &str) -> io::Result<()> {
        let line: String = self.buffer.iter().collect();
        let tail: String = self.buffer[self.cursor..].iter().collect();
        let back = u16::try_from(tail.width()).unwrap_or(u16::MAX);

        queue!(
            self.out,
            Print('\r'),
            Print(prompt),
            Print(' '),
            Print(&line),
            Clear(ClearType::UntilNewLine)
        )?;
        if back > 0 {
            queue!(self.out, MoveLeft(back))?;
        }
        self.out.flush()
    }

    fn write(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())?;
        self.out.flush()
    }
}

fn column_width(c: char) -> u16 {
    c.width().unwrap_or(0) as u16
}

/// Escapes a completion suffix for the quote context it is inserted into.
///
/// Inside single quotes nothing can be escaped, so a `'` closes the quote, adds an
/// escaped quote and reopens it.
fn quote(token: &TokenAt, suffix: &str) -> String {
    match token.open_quote {
        Some(OpenQuote::Single) => suffix.replace('\'', r"'\''"),
        Some(OpenQuote::Double) => {
            let mut out = String::with_capacity(suffix.len());
            for c in suffix.chars() {
                if matches!(c, '"' | '\\' | '$') {
                    out.push('\\');
                }
                out.push(c);
            }
            out
        }
        None => escape(suffix),
    }
}
