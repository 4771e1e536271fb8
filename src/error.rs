use thiserror::Error;

/// Errors produced while configuring loggers and middlewares.
///
/// Only construction-time failures ever reach the caller. Failures that happen
/// while serving a request are logged and swallowed.
#[derive(Debug, Error)]
pub enum Error {
    /// A level name that is neither empty nor one of the known severities.
    #[error("level {0} is not recognized")]
    UnrecognizedLevel(String),

    /// The operating system random source could not produce a request id.
    #[error("random source failed: {0}")]
    RandomGeneration(#[from] getrandom::Error),

    /// An exclusion pattern that is not a valid regular expression.
    #[error("invalid exclusion pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
