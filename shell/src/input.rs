//! Decoding raw terminal bytes into key events.

use std::collections::VecDeque;
use std::io::{self, Read};

/// Single-byte control codes the line editor reacts to.
pub mod control {
    pub const CTRL_C: u8 = 3;
    pub const CTRL_H: u8 = 8;
    pub const TAB: u8 = 9;
    pub const LINE_FEED: u8 = 10;
    pub const CTRL_L: u8 = 12;
    pub const ENTER: u8 = 13;
    pub const ESC: u8 = 27;
    pub const BACKSPACE: u8 = 127;
}

/// One decoded key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Char(char),
    /// C0 control characters and DEL, by byte value.
    Control(u8),
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
}

impl Event {
    /// Classifies a single rune.
    pub fn from_char(c: char) -> Self {
        match c {
            '\0'..='\x1f' | '\x7f' => Event::Control(c as u8),
            c => Event::Char(c),
        }
    }
}

/// Reads UTF-8 encoded runes one at a time. Malformed sequences become U+FFFD.
pub struct RuneReader<R> {
    inner: R,
    pushback: Option<u8>,
}

impl<R: Read> RuneReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pushback: None,
        }
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        if let Some(byte) = self.pushback.take() {
            return Ok(byte);
        }
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(_) => return Ok(buf[0]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    pub fn read_rune(&mut self) -> io::Result<char> {
        let lead = self.read_byte()?;
        let len = match lead {
            0x00..=0x7f => return Ok(lead as char),
            0xc2..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf4 => 4,
            _ => return Ok(char::REPLACEMENT_CHARACTER),
        };

        let mut bytes = [lead, 0, 0, 0];
        for slot in bytes.iter_mut().take(len).skip(1) {
            let byte = self.read_byte()?;
            if byte & 0xc0 != 0x80 {
                // Not a continuation byte: it starts the next rune.
                self.pushback = Some(byte);
                return Ok(char::REPLACEMENT_CHARACTER);
            }
            *slot = byte;
        }

        Ok(std::str::from_utf8(&bytes[..len])
            .ok()
            .and_then(|s| s.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER))
    }
}

/// Turns runes into [`Event`]s, folding `ESC [ A..D` into arrow keys.
pub struct EventDecoder<R> {
    runes: RuneReader<R>,
    queued: VecDeque<Event>,
    deferred: Option<io::Error>,
}

impl<R: Read> EventDecoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            runes: RuneReader::new(inner),
            queued: VecDeque::new(),
            deferred: None,
        }
    }

    /// Next event in input order.
    ///
    /// A read failure in the middle of an escape sequence first yields the runes
    /// already read and reports the failure on the following call.
    pub fn next_event(&mut self) -> io::Result<Event> {
        if let Some(event) = self.queued.pop_front() {
            return Ok(event);
        }
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let first = self.runes.read_rune()?;
        if first != control::ESC as char {
            return Ok(Event::from_char(first));
        }

        let escape = Event::Control(control::ESC);
        let second = match self.runes.read_rune() {
            Ok(c) => c,
            Err(err) => {
                self.deferred = Some(err);
                return Ok(escape);
            }
        };
        if second != '[' {
            self.queued.push_back(Event::from_char(second));
            return Ok(escape);
        }

        let third = match self.runes.read_rune() {
            Ok(c) => c,
            Err(err) => {
                self.queued.push_back(Event::Char('['));
                self.deferred = Some(err);
                return Ok(escape);
            }
        };
        let arrow = match third {
            'A' => Event::ArrowUp,
            'B' => Event::ArrowDown,
            'C' => Event::ArrowRight,
            'D' => Event::ArrowLeft,
            other => {
                self.queued.push_back(Event::Char('['));
                self.queued.push_back(Event::from_char(other));
                return Ok(escape);
            }
        };
        tracing::trace!(?arrow, "decoded escape sequence");
        Ok(arrow)
    }
}
