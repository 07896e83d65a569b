//! Terminal plumbing: raw mode, the input thread and the signal listener.
//!
//! Key presses and signals arrive on one bounded queue, so the line editor blocks in a
//! single place and sees them in the order they happened. The input thread only reads
//! from the terminal when the editor asks for the next event; while a command runs,
//! nobody is reading and the child gets every keystroke.

use crate::input::{Event, EventDecoder};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};

const QUEUE_CAPACITY: usize = 64;

/// What the line editor can be woken up by.
#[derive(Debug)]
pub enum Input {
    Key(Event),
    /// SIGINT.
    Interrupt,
    /// SIGTERM, SIGHUP or SIGQUIT, carrying the exit code `128 + signal`.
    Terminate(i32),
    /// The terminal can't be read any more.
    Failed(io::Error),
}

/// A stream of inputs for the line editor.
pub trait EventSource {
    /// Called when a new line starts, before the first `next_input`.
    fn begin_line(&mut self) {}

    /// Blocks until the next input is available.
    fn next_input(&mut self) -> Input;
}

/// Keeps the terminal in raw mode while alive.
pub struct RawMode {
    _private: (),
}

impl RawMode {
    pub fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(err) = crossterm::terminal::disable_raw_mode() {
            tracing::warn!(%err, "failed to restore terminal mode");
        }
    }
}

/// Inputs from the terminal thread and the signal thread.
pub struct TerminalSource {
    inputs: Receiver<Input>,
    requests: SyncSender<()>,
    /// Inputs that arrived between lines and still belong to the user.
    pending: VecDeque<Input>,
    /// A read was requested and its answer has not arrived yet.
    outstanding: bool,
    _reader: JoinHandle<()>,
}

impl TerminalSource {
    /// Starts reading `reader` on a background thread.
    ///
    /// Returns the source and a sender that other producers (the signal listener)
    /// use to feed the same queue.
    pub fn spawn<R>(reader: R) -> io::Result<(Self, SyncSender<Input>)>
    where
        R: Read + Send + 'static,
    {
        let (input_tx, inputs) = mpsc::sync_channel(QUEUE_CAPACITY);
        let (requests, request_rx) = mpsc::sync_channel(1);

        let tx = input_tx.clone();
        let reader = thread::Builder::new()
            .name("terminal-input".into())
            .spawn(move || read_on_demand(reader, request_rx, tx))?;

        let source = Self {
            inputs,
            requests,
            pending: VecDeque::new(),
            outstanding: false,
            _reader: reader,
        };
        Ok((source, input_tx))
    }

    /// Starts reading the process's standard input.
    pub fn stdin() -> io::Result<(Self, SyncSender<Input>)> {
        Self::spawn(io::stdin())
    }

    fn accept(&mut self, input: &Input) {
        if matches!(input, Input::Key(_) | Input::Failed(_)) {
            self.outstanding = false;
        }
    }
}

impl EventSource for TerminalSource {
    fn begin_line(&mut self) {
        loop {
            match self.inputs.try_recv() {
                Ok(Input::Interrupt) => tracing::debug!("dropping stale interrupt"),
                Ok(input) => {
                    self.accept(&input);
                    self.pending.push_back(input);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    fn next_input(&mut self) -> Input {
        if let Some(input) = self.pending.pop_front() {
            return input;
        }

        if !self.outstanding {
            if self.requests.send(()).is_err() {
                return Input::Failed(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "terminal reader has stopped",
                ));
            }
            self.outstanding = true;
        }

        match self.inputs.recv() {
            Ok(input) => {
                self.accept(&input);
                input
            }
            Err(_) => Input::Failed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "input queue closed",
            )),
        }
    }
}

fn read_on_demand<R: Read>(reader: R, requests: Receiver<()>, inputs: SyncSender<Input>) {
    let mut decoder = EventDecoder::new(reader);
    while requests.recv().is_ok() {
        let input = match decoder.next_event() {
            Ok(event) => Input::Key(event),
            Err(err) => Input::Failed(err),
        };
        let failed = matches!(input, Input::Failed(_));
        if inputs.send(input).is_err() || failed {
            break;
        }
    }
    tracing::debug!("terminal reader stopped");
}

/// Forwards SIGINT, SIGTERM, SIGHUP and SIGQUIT into the input queue.
#[cfg(unix)]
pub struct SignalListener {
    handle: signal_hook::iterator::Handle,
    thread: Option<JoinHandle<()>>,
}

#[cfg(unix)]
impl SignalListener {
    pub fn spawn(inputs: SyncSender<Input>) -> io::Result<Self> {
        use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGQUIT])?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("signals".into())
            .spawn(move || {
                for signal in signals.forever() {
                    let input = match signal {
                        SIGINT => Input::Interrupt,
                        other => Input::Terminate(128 + other),
                    };
                    tracing::debug!(signal, "signal received");
                    if inputs.send(input).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

#[cfg(unix)]
impl Drop for SignalListener {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
