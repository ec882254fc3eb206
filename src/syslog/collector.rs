//! Drains the log channel and routes each message to stdout or stderr sinks.
use std::{
    fmt, io,
    io::Write,
    sync::mpsc::{Receiver, TryRecvError},
    thread::{self, JoinHandle},
};

use tracing::{debug, warn};

use super::SyslogMessage;

/// Output stream a message is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Byte sink owned by the collector thread.
pub type Sink = Box<dyn Write + Send>;

/// Policy hook for sink write failures. The collector keeps running either way.
pub trait SinkErrorHandler: Send {
    fn handle(&mut self, stream: LogStream, err: &io::Error);
}

impl<F> SinkErrorHandler for F
where
    F: FnMut(LogStream, &io::Error) + Send,
{
    fn handle(&mut self, stream: LogStream, err: &io::Error) {
        self(stream, err)
    }
}

/// Default handler: report through the diagnostic log.
#[derive(Debug, Default, Clone, Copy)]
pub struct WarnOnSinkError;

impl SinkErrorHandler for WarnOnSinkError {
    fn handle(&mut self, stream: LogStream, err: &io::Error) {
        warn!("Failed to write task log line to {stream}: {err}");
    }
}

/// Totals reported when the collector finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectorStats {
    /// Messages written to the stdout sink.
    pub stdout_messages: u64,
    /// Messages written to the stderr sink.
    pub stderr_messages: u64,
    /// Writes or flushes that failed.
    pub write_errors: u64,
    /// Messages discarded by the listener because the channel was full.
    pub dropped_messages: u64,
}

impl CollectorStats {
    /// Messages the collector received, whether or not the write succeeded.
    pub fn received(&self) -> u64 {
        self.stdout_messages + self.stderr_messages
    }
}

/// Single consumer of the log channel.
pub struct Collector {
    stdout: Sink,
    stderr: Sink,
    on_error: Box<dyn SinkErrorHandler>,
    line: Vec<u8>,
}

impl Collector {
    /// Creates a collector writing to the given sinks.
    pub fn new(stdout: Sink, stderr: Sink) -> Self {
        Self {
            stdout,
            stderr,
            on_error: Box::new(WarnOnSinkError),
            line: Vec::new(),
        }
    }

    /// Replaces the sink error policy.
    pub fn with_error_handler(mut self, handler: impl SinkErrorHandler + 'static) -> Self {
        self.on_error = Box::new(handler);
        self
    }

    /// Runs the collector on its own thread.
    pub fn spawn(self, rx: Receiver<SyslogMessage>) -> io::Result<JoinHandle<CollectorStats>> {
        thread::Builder::new()
            .name("syslog-collector".into())
            .spawn(move || self.run(rx))
    }

    /// Drains `rx` until every sender is gone and the buffer is empty.
    pub fn run(mut self, rx: Receiver<SyslogMessage>) -> CollectorStats {
        let mut stats = CollectorStats::default();

        loop {
            let message = match rx.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) => {
                    self.flush(&mut stats);
                    match rx.recv() {
                        Ok(message) => message,
                        Err(_) => break,
                    }
                }
                Err(TryRecvError::Disconnected) => break,
            };
            self.route(message, &mut stats);
        }

        self.flush(&mut stats);
        debug!(
            "Log collector finished: {} stdout, {} stderr, {} write errors",
            stats.stdout_messages, stats.stderr_messages, stats.write_errors
        );
        stats
    }

    fn route(&mut self, message: SyslogMessage, stats: &mut CollectorStats) {
        let stream = if message.is_error() {
            stats.stderr_messages += 1;
            LogStream::Stderr
        } else {
            stats.stdout_messages += 1;
            LogStream::Stdout
        };

        self.line.clear();
        self.line.extend_from_slice(&message.message);
        self.line.push(b'\n');

        let sink = match stream {
            LogStream::Stdout => &mut self.stdout,
            LogStream::Stderr => &mut self.stderr,
        };
        if let Err(err) = sink.write_all(&self.line) {
            stats.write_errors += 1;
            self.on_error.handle(stream, &err);
        }
    }

    fn flush(&mut self, stats: &mut CollectorStats) {
        for (stream, sink) in [
            (LogStream::Stdout, &mut self.stdout),
            (LogStream::Stderr, &mut self.stderr),
        ] {
            if let Err(err) = sink.flush() {
                stats.write_errors += 1;
                self.on_error.handle(stream, &err);
            }
        }
    }
}
