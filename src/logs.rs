//! Sinks receiving relayed task output.
use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter};
use std::path::Path;

use tracing::debug;

use crate::syslog::{LogStream, Sink};

/// Opens the sink for one task stream.
///
/// # Arguments
/// * `path` - Optional log file, opened in append mode. Parent directories are created.
/// * `stream` - Which stream this sink serves; selects logvisor's own stdout or stderr
///   when no file is given.
///
/// # Returns
/// * A boxed writer suitable for the log collector.
pub fn open_sink(path: Option<&Path>, stream: LogStream) -> io::Result<Sink> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            let file: File = OpenOptions::new().create(true).append(true).open(path)?;
            debug!("Writing task {stream} to {}", path.display());
            Ok(Box::new(LineWriter::new(file)))
        }
        None => match stream {
            LogStream::Stdout => Ok(Box::new(io::stdout())),
            LogStream::Stderr => Ok(Box::new(io::stderr())),
        },
    }
}
