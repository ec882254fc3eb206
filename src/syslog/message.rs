//! In-memory representation and decoding of a single syslog frame.

use strum_macros::{AsRefStr, Display, EnumString};

use crate::{constants::MAX_PRIORITY, error::ParseError};

const BSD_TIMESTAMP_LEN: usize = 15;
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Syslog severity levels (RFC 5424 section 6.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[repr(u8)]
pub enum Severity {
    #[strum(serialize = "emerg", serialize = "emergency")]
    Emergency = 0,
    Alert = 1,
    #[strum(serialize = "crit", serialize = "critical")]
    Critical = 2,
    #[strum(serialize = "err", serialize = "error")]
    Error = 3,
    #[strum(serialize = "warning", serialize = "warn")]
    Warning = 4,
    Notice = 5,
    #[strum(serialize = "info", serialize = "informational")]
    Informational = 6,
    Debug = 7,
}

impl Severity {
    /// Severity encoded in the low three bits of a priority value.
    pub const fn from_priority(priority: u8) -> Self {
        match priority & 0x07 {
            0 => Self::Emergency,
            1 => Self::Alert,
            2 => Self::Critical,
            3 => Self::Error,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Informational,
            _ => Self::Debug,
        }
    }

    /// Numeric severity code.
    pub const fn code(&self) -> u8 {
        *self as u8
    }
}

/// One decoded syslog record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogMessage {
    /// Severity from the priority tag.
    pub severity: Severity,
    /// Facility code (0-23) from the priority tag.
    pub facility: u8,
    /// Message body without header or trailing newline.
    pub message: Vec<u8>,
}

impl SyslogMessage {
    pub fn new(severity: Severity, message: impl Into<Vec<u8>>) -> Self {
        Self {
            severity,
            facility: crate::constants::DEFAULT_FACILITY,
            message: message.into(),
        }
    }

    /// Whether this message belongs on the error stream.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Decodes a frame: `<PRI>` tag, optional RFC 5424 or RFC 3164 header, message.
pub fn parse(frame: &[u8]) -> Result<SyslogMessage, ParseError> {
    let frame = trim_trailing(frame);
    if frame.is_empty() {
        return Err(ParseError::Empty);
    }
    if frame[0] != b'<' {
        return Err(ParseError::MissingPriority);
    }

    let close = frame
        .iter()
        .take(5)
        .position(|b| *b == b'>')
        .ok_or(ParseError::MissingPriority)?;
    let digits = &frame[1..close];
    let priority = parse_priority(digits)?;
    let rest = &frame[close + 1..];

    let body = match rest.strip_prefix(b"1 ") {
        Some(header) => rfc5424_body(header).unwrap_or(rest),
        None => rfc3164_body(rest),
    };

    Ok(SyslogMessage {
        severity: Severity::from_priority(priority),
        facility: priority >> 3,
        message: body.to_vec(),
    })
}

fn parse_priority(digits: &[u8]) -> Result<u8, ParseError> {
    let text = String::from_utf8_lossy(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidPriority(text.into_owned()));
    }
    match text.parse::<u8>() {
        Ok(value) if value <= MAX_PRIORITY => Ok(value),
        _ => Err(ParseError::InvalidPriority(text.into_owned())),
    }
}

fn trim_trailing(frame: &[u8]) -> &[u8] {
    let end = frame
        .iter()
        .rposition(|b| !matches!(b, b'\n' | b'\r' | b'\0'))
        .map_or(0, |idx| idx + 1);
    &frame[..end]
}

/// `TIMESTAMP HOSTNAME APP-NAME PROCID MSGID SD [MSG]` after the version.
fn rfc5424_body(header: &[u8]) -> Option<&[u8]> {
    let mut rest = header;
    for _ in 0..5 {
        let space = rest.iter().position(|b| *b == b' ')?;
        rest = &rest[space + 1..];
    }

    let after_sd = if let Some(stripped) = rest.strip_prefix(b"-") {
        stripped
    } else if rest.first() == Some(&b'[') {
        skip_structured_data(rest)?
    } else {
        return None;
    };

    let msg = after_sd.strip_prefix(b" ").unwrap_or(after_sd);
    Some(msg.strip_prefix(UTF8_BOM).unwrap_or(msg))
}

/// Skips one or more `[...]` elements, honouring `\]` escapes in values.
fn skip_structured_data(mut rest: &[u8]) -> Option<&[u8]> {
    while rest.first() == Some(&b'[') {
        let mut idx = 1;
        let mut escaped = false;
        loop {
            let byte = *rest.get(idx)?;
            match byte {
                b'\\' if !escaped => escaped = true,
                b']' if !escaped => break,
                _ => escaped = false,
            }
            idx += 1;
        }
        rest = &rest[idx + 1..];
    }
    Some(rest)
}

/// `TIMESTAMP [HOSTNAME] TAG: MSG`. Without a recognizable timestamp the whole
/// remainder is the message.
fn rfc3164_body(rest: &[u8]) -> &[u8] {
    let after_timestamp = if is_bsd_timestamp(rest) {
        &rest[BSD_TIMESTAMP_LEN..]
    } else if let Some(token_end) = iso_timestamp_end(rest) {
        &rest[token_end..]
    } else {
        return rest;
    };
    let after_timestamp = after_timestamp.strip_prefix(b" ").unwrap_or(after_timestamp);

    match find_tag_end(after_timestamp) {
        Some(idx) => &after_timestamp[idx + 2..],
        None => after_timestamp,
    }
}

/// `Mmm dd hh:mm:ss`, day padded with a space.
fn is_bsd_timestamp(rest: &[u8]) -> bool {
    if rest.len() < BSD_TIMESTAMP_LEN {
        return false;
    }
    let ts = &rest[..BSD_TIMESTAMP_LEN];
    let month_ok = MONTHS.iter().any(|m| ts.starts_with(m.as_bytes()));
    let day_ok = ts[3] == b' '
        && (ts[4] == b' ' || ts[4].is_ascii_digit())
        && ts[5].is_ascii_digit()
        && ts[6] == b' ';
    let time_ok = ts[7..]
        .iter()
        .enumerate()
        .all(|(i, b)| if i == 2 || i == 5 { *b == b':' } else { b.is_ascii_digit() });
    month_ok && day_ok && time_ok
}

/// End index of a leading `YYYY-MM-DDThh:mm:ss...` token.
fn iso_timestamp_end(rest: &[u8]) -> Option<usize> {
    let end = rest.iter().position(|b| *b == b' ').unwrap_or(rest.len());
    let token = &rest[..end];
    let looks_iso = token.len() >= 19
        && token[..4].iter().all(u8::is_ascii_digit)
        && token[4] == b'-'
        && token[7] == b'-'
        && token[10] == b'T'
        && token[13] == b':';
    looks_iso.then_some(end)
}

/// Finds the `: ` that closes `[hostname ]tag[pid]`. The header holds at most one space.
fn find_tag_end(header: &[u8]) -> Option<usize> {
    let mut spaces = 0;
    for (idx, window) in header.windows(2).enumerate() {
        if window == b": " {
            return (idx > 0).then_some(idx);
        }
        if window[0] == b' ' {
            spaces += 1;
            if spaces > 1 {
                return None;
            }
        }
    }
    None
}
