use std::{
    env,
    error::Error as StdError,
    fmt, fs,
    io::{self, Write},
    process,
    str::FromStr,
    sync::{Arc, Mutex, PoisonError},
};

use serde::Serialize;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use crate::error::Result;
use crate::level::{Severity, parse_level, to_external_level};

pub const LEVEL_KEY: &str = "level";
pub const TIME_KEY: &str = "time";
pub const PID_KEY: &str = "pid";
pub const HOSTNAME_KEY: &str = "hostname";
pub const MESSAGE_KEY: &str = "msg";
pub const ERROR_KEY: &str = "error";

/// Environment variable read by [`LoggerOptions::from_env`] for the level name.
pub const LEVEL_ENV: &str = "LOG_LEVEL";
/// Environment variable read by [`LoggerOptions::from_env`] for the timestamp unit.
pub const TIMESTAMP_UNIT_ENV: &str = "LOG_TIMESTAMP_UNIT";

/// Resolution of the `time` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampUnit {
    /// Unix time in whole seconds, e.g. `1700000000`.
    #[default]
    Seconds,
    /// Unix time in milliseconds, e.g. `1700000000123`.
    Milliseconds,
}

impl TimestampUnit {
    fn now(self) -> i64 {
        let now = OffsetDateTime::now_utc();
        match self {
            TimestampUnit::Seconds => now.unix_timestamp(),
            TimestampUnit::Milliseconds => (now.unix_timestamp_nanos() / 1_000_000) as i64,
        }
    }
}

impl FromStr for TimestampUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s" | "sec" | "seconds" => Ok(TimestampUnit::Seconds),
            "ms" | "millis" | "milliseconds" => Ok(TimestampUnit::Milliseconds),
            other => Err(format!("unknown timestamp unit {other}")),
        }
    }
}

/// Options accepted by [`Logger::new`].
///
/// ```rust
/// use pinolog::{Logger, LoggerOptions, TimestampUnit};
///
/// let logger = Logger::new(
///     LoggerOptions::new()
///         .level("debug")
///         .timestamp_unit(TimestampUnit::Milliseconds)
///         .writer(std::io::stderr()),
/// )
/// .unwrap();
/// logger.info().msg("ready");
/// ```
#[derive(Default)]
pub struct LoggerOptions {
    level: String,
    timestamp_unit: TimestampUnit,
    writer: Option<Box<dyn Write + Send>>,
}

impl LoggerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `LOG_LEVEL` and `LOG_TIMESTAMP_UNIT`.
    ///
    /// A missing level keeps the `info` default and an unknown timestamp unit
    /// keeps seconds. An unknown level name is reported by [`Logger::new`].
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](LoggerOptions::from_env) with variables resolved by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::new();
        if let Some(level) = lookup(LEVEL_ENV) {
            options.level = level;
        }
        if let Some(unit) = lookup(TIMESTAMP_UNIT_ENV).and_then(|unit| unit.parse().ok()) {
            options.timestamp_unit = unit;
        }
        options
    }

    /// Level name, see [`parse_level`](crate::parse_level). Empty means `info`.
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn timestamp_unit(mut self, unit: TimestampUnit) -> Self {
        self.timestamp_unit = unit;
        self
    }

    /// Output sink. Defaults to standard output.
    pub fn writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }
}

impl fmt::Debug for LoggerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerOptions")
            .field("level", &self.level)
            .field("timestamp_unit", &self.timestamp_unit)
            .field("writer", &self.writer.as_ref().map(|_| "..."))
            .finish()
    }
}

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Debug, Clone, Copy)]
struct Format {
    timestamp_unit: TimestampUnit,
}

/// Leveled logger producing pino-compatible JSON lines.
///
/// Cloning is cheap. Children created with [`child`](Logger::child) or
/// [`with`](Logger::with) share the parent's sink and formatting and add their
/// own fields to every record.
#[derive(Clone)]
pub struct Logger {
    sink: Sink,
    format: Format,
    level: Severity,
    context: Arc<Map<String, Value>>,
}

impl Logger {
    /// Builds a logger from `options`.
    ///
    /// Fails only when the level name is not recognized.
    pub fn new(options: LoggerOptions) -> Result<Self> {
        let level = parse_level(&options.level)?;
        let writer = options
            .writer
            .unwrap_or_else(|| Box::new(io::stdout()) as Box<dyn Write + Send>);

        Ok(Self::build(writer, level, options.timestamp_unit))
    }

    fn build(writer: Box<dyn Write + Send>, level: Severity, timestamp_unit: TimestampUnit) -> Self {
        let mut context = Map::new();
        context.insert(PID_KEY.to_string(), Value::from(process::id()));

        // lookup failures just leave the field out
        let hostname = hostname();
        if !hostname.is_empty() {
            context.insert(HOSTNAME_KEY.to_string(), Value::String(hostname));
        }

        Logger {
            sink: Arc::new(Mutex::new(writer)),
            format: Format { timestamp_unit },
            level,
            context: Arc::new(context),
        }
    }

    pub fn level(&self) -> Severity {
        self.level
    }

    pub fn timestamp_unit(&self) -> TimestampUnit {
        self.format.timestamp_unit
    }

    /// Whether a record at `level` would be written.
    pub fn enabled(&self, level: Severity) -> bool {
        match (self.level, level) {
            (Severity::Disabled, _) | (_, Severity::Disabled) => false,
            (_, Severity::Unset) | (Severity::Unset, _) => true,
            (threshold, level) => level >= threshold,
        }
    }

    /// Same sink and fields, different threshold.
    pub fn with_level(&self, level: Severity) -> Logger {
        Logger {
            level,
            ..self.clone()
        }
    }

    /// Derives a logger that adds `fields` to every record.
    pub fn child(&self, fields: Map<String, Value>) -> Logger {
        let mut context = (*self.context).clone();
        context.extend(fields);

        Logger {
            context: Arc::new(context),
            ..self.clone()
        }
    }

    /// Derives a logger with a single extra field.
    pub fn with<V: Serialize>(&self, key: &str, value: V) -> Logger {
        let mut fields = Map::new();
        fields.insert(key.to_string(), to_value(value));
        self.child(fields)
    }

    /// Fields carried by this logger, `pid` and `hostname` included.
    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// Writes a record with `fields` at `level`.
    pub fn log(&self, level: Severity, fields: Map<String, Value>, msg: &str) {
        self.entry(level).extend(fields).msg(msg)
    }

    /// Starts a record at `level`. Nothing is collected when the level is filtered out.
    pub fn entry(&self, level: Severity) -> Entry<'_> {
        Entry {
            logger: self,
            level,
            fields: self.enabled(level).then(Map::new),
        }
    }

    pub fn trace(&self) -> Entry<'_> {
        self.entry(Severity::Trace)
    }

    pub fn debug(&self) -> Entry<'_> {
        self.entry(Severity::Debug)
    }

    pub fn info(&self) -> Entry<'_> {
        self.entry(Severity::Info)
    }

    pub fn warn(&self) -> Entry<'_> {
        self.entry(Severity::Warn)
    }

    pub fn error(&self) -> Entry<'_> {
        self.entry(Severity::Error)
    }

    /// Tags the record as fatal. The process keeps running.
    pub fn fatal(&self) -> Entry<'_> {
        self.entry(Severity::Fatal)
    }

    /// Tags the record as panic. Nothing unwinds.
    pub fn panic(&self) -> Entry<'_> {
        self.entry(Severity::Panic)
    }

    pub fn flush(&self) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = sink.flush();
    }

    fn write(&self, level: Severity, fields: Map<String, Value>, msg: &str) {
        let mut record = Map::with_capacity(self.context.len() + fields.len() + 3);

        let code = to_external_level(level);
        if !code.is_empty() {
            record.insert(LEVEL_KEY.to_string(), Value::from(code));
        }
        record.insert(
            TIME_KEY.to_string(),
            Value::from(self.format.timestamp_unit.now()),
        );
        for (key, value) in self.context.iter() {
            record.insert(key.clone(), value.clone());
        }
        record.extend(fields);
        if !msg.is_empty() {
            record.insert(MESSAGE_KEY.to_string(), Value::from(msg));
        }

        let Ok(mut line) = serde_json::to_vec(&Value::Object(record)) else {
            return;
        };
        line.push(b'\n');

        // one write per record keeps concurrent lines whole
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = sink.write_all(&line);
    }
}

impl Default for Logger {
    /// Info level, timestamps in seconds, standard output.
    fn default() -> Self {
        Self::build(Box::new(io::stdout()), Severity::Info, TimestampUnit::Seconds)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("timestamp_unit", &self.format.timestamp_unit)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// A record under construction, written by [`msg`](Entry::msg).
#[must_use = "a record is only written by calling `msg` or `send`"]
pub struct Entry<'a> {
    logger: &'a Logger,
    level: Severity,
    fields: Option<Map<String, Value>>,
}

impl Entry<'_> {
    pub fn enabled(&self) -> bool {
        self.fields.is_some()
    }

    pub fn field<V: Serialize>(mut self, key: &str, value: V) -> Self {
        if let Some(fields) = self.fields.as_mut() {
            fields.insert(key.to_string(), to_value(value));
        }
        self
    }

    /// Merges the top-level keys of a value that serializes to an object.
    pub fn fields<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        if let Some(fields) = self.fields.as_mut() {
            if let Ok(Value::Object(object)) = serde_json::to_value(value) {
                fields.extend(object);
            }
        }
        self
    }

    pub fn extend(mut self, extra: Map<String, Value>) -> Self {
        if let Some(fields) = self.fields.as_mut() {
            fields.extend(extra);
        }
        self
    }

    /// Attaches `err` as a plain message under `error`.
    pub fn err<E: StdError + ?Sized>(self, err: &E) -> Self {
        self.field(ERROR_KEY, err.to_string())
    }

    /// Attaches `err` under `error` together with its chain of sources.
    pub fn stack<E: StdError + ?Sized>(self, err: &E) -> Self {
        let mut stack = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push(Value::String(cause.to_string()));
            source = cause.source();
        }

        self.field(
            ERROR_KEY,
            json!({ "message": err.to_string(), "stack": stack }),
        )
    }

    pub fn msg(self, msg: impl fmt::Display) {
        if let Some(fields) = self.fields {
            self.logger.write(self.level, fields, &msg.to_string());
        }
    }

    /// Writes the record without a message.
    pub fn send(self) {
        self.msg("")
    }
}

fn to_value<V: Serialize>(value: V) -> Value {
    serde_json::to_value(value).unwrap_or_else(|err| Value::String(err.to_string()))
}

fn hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .find_map(|var| env::var(var).ok().filter(|name| !name.is_empty()))
        .or_else(|| fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}
