//! Lexical analysis of a single command line.
//!
//! The scanner walks the line once, left to right, with three flags (inside single
//! quotes, inside double quotes, escaping the next character). It resolves quotes and
//! backslashes, expands `$NAME` / `${NAME}`, and stops at the first unquoted `>` to
//! read the redirection that ends the command.
//!
//! Every word remembers the character range it was read from, so the line editor can
//! find the word under the cursor and insert completions at its end.

use crate::env::Environment;
use crate::error::ParseError;
use std::ops::Range;

/// Output stream selected by a redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stream {
    #[default]
    Stdout,
    Stderr,
}

/// Output redirection at the end of a command: `[digit]> target` or `[digit]>> target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Target path, trimmed of surrounding spaces and quotes.
    pub target: String,
    /// Which of the command's streams goes to the target.
    pub stream: Stream,
    /// `>` truncates the target, `>>` appends to it.
    pub truncate: bool,
}

/// A quote-resolved word and the character range of the line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Word {
    pub text: String,
    pub span: Range<usize>,
}

/// Which quote was still open when the line ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenQuote {
    Single,
    Double,
}

/// Everything the scanner found on a line.
#[derive(Debug, Default)]
pub(crate) struct Scan {
    pub words: Vec<Word>,
    pub redirect: Option<Redirect>,
    /// Character range of the redirect target (only when it is non-empty).
    pub redirect_span: Option<Range<usize>>,
    pub open_quote: Option<OpenQuote>,
}

struct LexingFSM<'env> {
    input: Vec<char>,
    pos: usize,
    env: &'env Environment,
    /// Lenient scans never fail: unterminated quotes and bad redirections are
    /// tolerated so a half-typed line can still be inspected.
    lenient: bool,
    in_single_quote: bool,
    in_double_quote: bool,
    escaping: bool,
    current: String,
    current_start: Option<usize>,
    out: Scan,
}

impl<'env> LexingFSM<'env> {
    fn new(line: &str, env: &'env Environment, lenient: bool) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            env,
            lenient,
            in_single_quote: false,
            in_double_quote: false,
            escaping: false,
            current: String::new(),
            current_start: None,
            out: Scan::default(),
        }
    }

    fn make_words(mut self) -> Result<Scan, ParseError> {
        while let Some(ch) = self.read_char() {
            let at = self.pos - 1;

            if self.escaping {
                self.push(ch, at);
                self.escaping = false;
                continue;
            }

            match ch {
                '\\' => self.handle_backslash(at),
                '\'' if self.in_double_quote => self.push(ch, at),
                '\'' => {
                    self.mark_start(at);
                    self.in_single_quote = !self.in_single_quote;
                }
                '"' if self.in_single_quote => self.push(ch, at),
                '"' => {
                    self.mark_start(at);
                    self.in_double_quote = !self.in_double_quote;
                }
                ' ' | '\t' if self.is_quoted() => self.push(ch, at),
                ' ' | '\t' => self.finish_word(at),
                '>' if self.is_quoted() => self.push(ch, at),
                '>' => return self.read_redirect(at),
                '$' if self.in_single_quote => self.push(ch, at),
                '$' => self.expand_variable(at),
                c => self.push(c, at),
            }
        }

        self.finish_word(self.input.len());
        self.finish()
    }

    fn finish(mut self) -> Result<Scan, ParseError> {
        self.out.open_quote = if self.in_single_quote {
            Some(OpenQuote::Single)
        } else if self.in_double_quote {
            Some(OpenQuote::Double)
        } else {
            None
        };

        match self.out.open_quote {
            Some(OpenQuote::Single) if !self.lenient => Err(ParseError::UnterminatedSingleQuote),
            Some(OpenQuote::Double) if !self.lenient => Err(ParseError::UnterminatedDoubleQuote),
            _ => Ok(self.out),
        }
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn is_quoted(&self) -> bool {
        self.in_single_quote || self.in_double_quote
    }

    fn mark_start(&mut self, at: usize) {
        self.current_start.get_or_insert(at);
    }

    fn push(&mut self, ch: char, at: usize) {
        self.mark_start(at);
        self.current.push(ch);
    }

    /// Ends the word in progress at `end`. Words that resolved to nothing (`''`, an
    /// unset `$VAR`) are dropped.
    fn finish_word(&mut self, end: usize) {
        if let Some(start) = self.current_start.take() {
            if !self.current.is_empty() {
                self.out.words.push(Word {
                    text: std::mem::take(&mut self.current),
                    span: start..end,
                });
            }
        }
        self.current.clear();
    }

    fn handle_backslash(&mut self, at: usize) {
        if self.in_single_quote {
            self.push('\\', at);
            return;
        }

        if self.in_double_quote {
            // Only `$`, `"` and `\` can be escaped inside double quotes.
            match self.peek_char() {
                Some('$' | '"' | '\\') => {
                    self.mark_start(at);
                    self.escaping = true;
                }
                _ => self.push('\\', at),
            }
            return;
        }

        self.mark_start(at);
        self.escaping = true;
    }

    /// Called with `pos` just past the `$`.
    fn expand_variable(&mut self, at: usize) {
        self.mark_start(at);

        let name = match self.peek_char() {
            Some('{') => {
                let open = self.pos;
                let close = self.input[open + 1..].iter().position(|c| *c == '}');
                match close {
                    Some(len) => {
                        let name: String = self.input[open + 1..open + 1 + len].iter().collect();
                        self.pos = open + len + 2;
                        name
                    }
                    None => {
                        self.current.push('$');
                        return;
                    }
                }
            }
            Some(c) if is_name_char(c) => {
                let begin = self.pos;
                while self.peek_char().is_some_and(is_name_char) {
                    self.pos += 1;
                }
                self.input[begin..self.pos].iter().collect()
            }
            _ => {
                self.current.push('$');
                return;
            }
        };

        if let Some(value) = self.env.get_var(&name) {
            self.current.push_str(&value);
        }
    }

    /// Reads `>` / `>>` and the target. Nothing after the operator is scanned as words.
    fn read_redirect(mut self, at: usize) -> Result<Scan, ParseError> {
        let mut stream = Stream::Stdout;

        // A lone digit glued to the operator (`2>`) selects the stream.
        let selector = match (self.current_start, self.current.chars().next()) {
            (Some(start), Some(digit))
                if start + 1 == at && self.current.len() == 1 && digit.is_ascii_digit() =>
            {
                Some(digit)
            }
            _ => None,
        };

        match selector {
            Some('1') => {}
            Some('2') => stream = Stream::Stderr,
            Some(other) if !self.lenient => return Err(ParseError::UnsupportedStream(other)),
            Some(_) => {}
            None => self.finish_word(at),
        }
        if selector.is_some() {
            self.current.clear();
            self.current_start = None;
        }

        let mut truncate = true;
        if self.peek_char() == Some('>') {
            truncate = false;
            self.pos += 1;
        }

        let rest = &self.input[self.pos..];
        let is_trimmed = |c: char| matches!(c, ' ' | '\t' | '"' | '\'');
        let lead = rest.iter().take_while(|c| is_trimmed(**c)).count();
        let trail = rest[lead..].iter().rev().take_while(|c| is_trimmed(**c)).count();
        let target: String = rest[lead..rest.len() - trail].iter().collect();

        if target.is_empty() {
            if !self.lenient {
                return Err(ParseError::MissingRedirectTarget);
            }
        } else {
            let start = self.pos + lead;
            self.out.redirect_span = Some(start..self.input.len() - trail);
        }

        self.out.redirect = Some(Redirect {
            target,
            stream,
            truncate,
        });
        Ok(self.out)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Scans a finished line. Unterminated quotes and malformed redirections are errors.
pub(crate) fn scan(line: &str, env: &Environment) -> Result<Scan, ParseError> {
    LexingFSM::new(line, env, false).make_words()
}

/// Scans a line that may still be in the middle of being typed.
pub(crate) fn scan_lenient(line: &str, env: &Environment) -> Scan {
    // Lenient scans have no error paths.
    LexingFSM::new(line, env, true)
        .make_words()
        .unwrap_or_default()
}
