//! Error types for the tilecost-label crate.

use std::backtrace::Backtrace;
use std::fmt;

use tilecost_schemas::{FeatureError, RecordError};

/// Error type for labeling operations.
#[derive(Debug)]
pub struct LabelError {
    kind: LabelErrorKind,
    backtrace: Backtrace,
}

/// Internal error variants. Not exposed publicly; use `is_xxx()` methods.
#[derive(Debug)]
pub(crate) enum LabelErrorKind {
    /// The labeling configuration is unusable.
    Config(String),
    /// A measurement's feature line could not be normalized.
    Feature(FeatureError),
    /// A normalized cost is not a positive finite number.
    InvalidCost { line: String, cost: f64 },
    /// Reading the raw log failed.
    Record(RecordError),
    /// Writing the preprocessed file failed.
    Io(std::io::Error),
}

impl LabelError {
    /// Creates an error from an error kind, capturing a backtrace.
    pub(crate) fn new(kind: LabelErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::new(LabelErrorKind::Config(reason.into()))
    }

    /// Returns true if the configuration was rejected.
    pub fn is_config(&self) -> bool {
        matches!(self.kind, LabelErrorKind::Config(_))
    }

    /// Returns true if a feature line could not be decoded or normalized.
    pub fn is_feature(&self) -> bool {
        matches!(self.kind, LabelErrorKind::Feature(_))
            || matches!(&self.kind, LabelErrorKind::Record(e) if e.is_feature())
    }

    /// Returns true if a cost could not be placed on the clustering scale.
    pub fn is_invalid_cost(&self) -> bool {
        matches!(self.kind, LabelErrorKind::InvalidCost { .. })
    }

    /// Returns true if the raw log was structurally broken.
    pub fn is_record(&self) -> bool {
        matches!(self.kind, LabelErrorKind::Record(_))
    }

    /// Returns true if writing output failed.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, LabelErrorKind::Io(_))
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for LabelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelErrorKind::Config(reason) => {
                write!(f, "invalid label configuration: {reason}")
            }
            LabelErrorKind::Feature(err) => write!(f, "{err}"),
            LabelErrorKind::InvalidCost { line, cost } => {
                write!(f, "normalized cost {cost} cannot be clustered: {line}")
            }
            LabelErrorKind::Record(err) => {
                write!(f, "failed to read raw log: {err}")
            }
            LabelErrorKind::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl fmt::Display for LabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for LabelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            LabelErrorKind::Feature(err) => Some(err),
            LabelErrorKind::Record(err) => Some(err),
            LabelErrorKind::Io(err) => Some(err),
            LabelErrorKind::Config(_) | LabelErrorKind::InvalidCost { .. } => {
                None
            }
        }
    }
}

impl From<FeatureError> for LabelError {
    fn from(err: FeatureError) -> Self {
        Self::new(LabelErrorKind::Feature(err))
    }
}

impl From<RecordError> for LabelError {
    fn from(err: RecordError) -> Self {
        Self::new(LabelErrorKind::Record(err))
    }
}

impl From<std::io::Error> for LabelError {
    fn from(err: std::io::Error) -> Self {
        Self::new(LabelErrorKind::Io(err))
    }
}
