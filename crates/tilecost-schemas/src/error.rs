//! Error types for the record formats.

use std::backtrace::Backtrace;
use std::fmt;

/// Error raised when a feature line cannot be decoded.
///
/// Uses the struct-plus-private-kind pattern: callers classify with the
/// `is_xxx()` helpers and never match on the variants directly.
#[derive(Debug)]
pub struct FeatureError {
    kind: FeatureErrorKind,
    line: String,
    backtrace: Backtrace,
}

#[derive(Debug)]
enum FeatureErrorKind {
    /// The feature marker is absent.
    Malformed,
    /// A token is not a non-negative integer.
    InvalidNumber(String),
    /// A required field is missing.
    Truncated(&'static str),
    /// `run_count * loop_count * total_size` is zero.
    ZeroWorkload,
}

impl FeatureError {
    fn new(kind: FeatureErrorKind, line: &str) -> Self {
        Self {
            kind,
            line: line.to_string(),
            backtrace: Backtrace::capture(),
        }
    }

    pub(crate) fn malformed(line: &str) -> Self {
        Self::new(FeatureErrorKind::Malformed, line)
    }

    pub(crate) fn invalid_number(token: &str, line: &str) -> Self {
        Self::new(FeatureErrorKind::InvalidNumber(token.to_string()), line)
    }

    pub(crate) fn truncated(field: &'static str, line: &str) -> Self {
        Self::new(FeatureErrorKind::Truncated(field), line)
    }

    pub(crate) fn zero_workload(line: &str) -> Self {
        Self::new(FeatureErrorKind::ZeroWorkload, line)
    }

    /// Returns true if the line lacks the feature marker.
    pub fn is_malformed(&self) -> bool {
        matches!(self.kind, FeatureErrorKind::Malformed)
    }

    /// Returns true if a token failed to parse as an integer.
    pub fn is_invalid_number(&self) -> bool {
        matches!(self.kind, FeatureErrorKind::InvalidNumber(_))
    }

    /// Returns true if metadata or payload fields are missing.
    pub fn is_truncated(&self) -> bool {
        matches!(self.kind, FeatureErrorKind::Truncated(_))
    }

    /// Returns true if the record describes an empty workload.
    pub fn is_zero_workload(&self) -> bool {
        matches!(self.kind, FeatureErrorKind::ZeroWorkload)
    }

    /// The offending line.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FeatureErrorKind::Malformed => {
                write!(f, "not a feature line: {}", self.line)
            }
            FeatureErrorKind::InvalidNumber(token) => {
                write!(f, "invalid integer `{token}` in: {}", self.line)
            }
            FeatureErrorKind::Truncated(field) => {
                write!(f, "missing {field} in: {}", self.line)
            }
            FeatureErrorKind::ZeroWorkload => {
                write!(f, "zero workload size in: {}", self.line)
            }
        }
    }
}

impl std::error::Error for FeatureError {}

/// Error raised while reading a raw log or a preprocessed file.
#[derive(Debug)]
pub struct RecordError {
    kind: RecordErrorKind,
    backtrace: Backtrace,
}

#[derive(Debug)]
enum RecordErrorKind {
    /// A feature line failed to decode.
    Feature(FeatureError),
    /// A feature line at `line_no` has no value line after it.
    MissingValue { line_no: usize },
    /// The value line at `line_no` could not be parsed.
    InvalidValue { line_no: usize, text: String },
    /// I/O error while reading.
    Io(std::io::Error),
}

impl RecordError {
    fn new(kind: RecordErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    pub(crate) fn missing_value(line_no: usize) -> Self {
        Self::new(RecordErrorKind::MissingValue { line_no })
    }

    pub(crate) fn invalid_value(line_no: usize, text: &str) -> Self {
        Self::new(RecordErrorKind::InvalidValue {
            line_no,
            text: text.trim_end().to_string(),
        })
    }

    /// Returns true if a feature line failed to decode.
    pub fn is_feature(&self) -> bool {
        matches!(self.kind, RecordErrorKind::Feature(_))
    }

    /// Returns true if the underlying feature line lacked the marker.
    pub fn is_malformed_feature(&self) -> bool {
        matches!(&self.kind, RecordErrorKind::Feature(e) if e.is_malformed())
    }

    /// Returns true if the file ended between a feature and its value.
    pub fn is_missing_value(&self) -> bool {
        matches!(self.kind, RecordErrorKind::MissingValue { .. })
    }

    /// Returns true if a value line did not parse.
    pub fn is_invalid_value(&self) -> bool {
        matches!(self.kind, RecordErrorKind::InvalidValue { .. })
    }

    /// Returns true if reading failed.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, RecordErrorKind::Io(_))
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RecordErrorKind::Feature(e) => write!(f, "{e}"),
            RecordErrorKind::MissingValue { line_no } => {
                write!(f, "line {line_no}: feature line has no value line")
            }
            RecordErrorKind::InvalidValue { line_no, text } => {
                write!(f, "line {line_no}: invalid value line `{text}`")
            }
            RecordErrorKind::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            RecordErrorKind::Feature(e) => Some(e),
            RecordErrorKind::Io(e) => Some(e),
            RecordErrorKind::MissingValue { .. }
            | RecordErrorKind::InvalidValue { .. } => None,
        }
    }
}

impl From<FeatureError> for RecordError {
    fn from(err: FeatureError) -> Self {
        Self::new(RecordErrorKind::Feature(err))
    }
}

impl From<std::io::Error> for RecordError {
    fn from(err: std::io::Error) -> Self {
        Self::new(RecordErrorKind::Io(err))
    }
}
