use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// Severity of a log record, ordered from the most verbose to the most critical.
///
/// `Disabled` as a logger threshold silences everything. `Unset` tags records
/// that carry no level at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
    Disabled,
    Unset,
}

impl Severity {
    /// Lower-case name, empty for `Disabled` and `Unset`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
            Severity::Panic => "panic",
            Severity::Disabled | Severity::Unset => "",
        }
    }
}

/// Pino numeric level code for `level`.
///
/// Panic is not part of pino itself and gets the next free slot, `70`.
/// An empty string means the record has no level field.
pub fn to_external_level(level: Severity) -> &'static str {
    match level {
        Severity::Trace => "10",
        Severity::Debug => "20",
        Severity::Info => "30",
        Severity::Warn => "40",
        Severity::Error => "50",
        Severity::Fatal => "60",
        Severity::Panic => "70",
        Severity::Disabled | Severity::Unset => "",
    }
}

/// Parses a case-insensitive level name. An empty name selects `Info`.
pub fn parse_level(name: &str) -> Result<Severity> {
    if name.is_empty() {
        return Ok(Severity::Info);
    }

    match name.to_ascii_lowercase().as_str() {
        "trace" => Ok(Severity::Trace),
        "debug" => Ok(Severity::Debug),
        "info" => Ok(Severity::Info),
        "warn" => Ok(Severity::Warn),
        "error" => Ok(Severity::Error),
        "fatal" => Ok(Severity::Fatal),
        "panic" => Ok(Severity::Panic),
        _ => Err(Error::UnrecognizedLevel(name.to_string())),
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_level(s)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "log")]
impl From<log::Level> for Severity {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Severity::Error,
            log::Level::Warn => Severity::Warn,
            log::Level::Info => Severity::Info,
            log::Level::Debug => Severity::Debug,
            log::Level::Trace => Severity::Trace,
        }
    }
}

#[cfg(feature = "log")]
impl From<Severity> for log::LevelFilter {
    fn from(level: Severity) -> Self {
        match level {
            Severity::Trace | Severity::Unset => log::LevelFilter::Trace,
            Severity::Debug => log::LevelFilter::Debug,
            Severity::Info => log::LevelFilter::Info,
            Severity::Warn => log::LevelFilter::Warn,
            Severity::Error | Severity::Fatal | Severity::Panic => log::LevelFilter::Error,
            Severity::Disabled => log::LevelFilter::Off,
        }
    }
}
