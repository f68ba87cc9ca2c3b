//! Error types for the tilecost-model crate.

use std::backtrace::Backtrace;
use std::fmt;
use std::path::PathBuf;

use tilecost_boost::BoostError;
use tilecost_schemas::{FeatureError, RecordError, StructuralKey};

/// Error type for training, model persistence, and prediction.
#[derive(Debug)]
pub struct ModelError {
    kind: ModelErrorKind,
    backtrace: Backtrace,
}

/// Internal error variants. Not exposed publicly; use `is_xxx()` methods.
#[derive(Debug)]
pub(crate) enum ModelErrorKind {
    /// No model was trained for this key.
    UnknownKey(StructuralKey),
    /// The training configuration is unusable.
    Config(String),
    /// A feature line could not be decoded.
    Feature(FeatureError),
    /// The preprocessed file is structurally broken.
    Record(RecordError),
    /// A sample's cost cannot be turned into a regression target.
    InvalidCost { line: String, cost: f64 },
    /// Records sharing a key disagree on feature vector length.
    InconsistentFeatures {
        key: StructuralKey,
        expected: usize,
        actual: usize,
    },
    /// Fitting or evaluating a regressor failed.
    Boost {
        key: StructuralKey,
        source: BoostError,
    },
    /// The manifest is malformed.
    Manifest {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    /// Reading or writing model files failed.
    Io(std::io::Error),
}

impl ModelError {
    /// Creates an error from an error kind, capturing a backtrace.
    pub(crate) fn new(kind: ModelErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    pub(crate) fn boost(key: &StructuralKey, source: BoostError) -> Self {
        Self::new(ModelErrorKind::Boost {
            key: key.clone(),
            source,
        })
    }

    pub(crate) fn manifest(
        path: impl Into<PathBuf>,
        line: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(ModelErrorKind::Manifest {
            path: path.into(),
            line,
            reason: reason.into(),
        })
    }

    /// Returns true if no model exists for the requested key.
    pub fn is_unknown_key(&self) -> bool {
        matches!(self.kind, ModelErrorKind::UnknownKey(_))
    }

    /// Returns true if the configuration was rejected.
    pub fn is_config(&self) -> bool {
        matches!(self.kind, ModelErrorKind::Config(_))
    }

    /// Returns true if a feature line could not be decoded.
    pub fn is_feature(&self) -> bool {
        matches!(self.kind, ModelErrorKind::Feature(_))
            || matches!(&self.kind, ModelErrorKind::Record(e) if e.is_feature())
    }

    /// Returns true if a feature line lacked the marker.
    pub fn is_malformed_feature(&self) -> bool {
        match &self.kind {
            ModelErrorKind::Feature(e) => e.is_malformed(),
            ModelErrorKind::Record(e) => e.is_malformed_feature(),
            _ => false,
        }
    }

    /// Returns true if the preprocessed file could not be read.
    pub fn is_record(&self) -> bool {
        matches!(self.kind, ModelErrorKind::Record(_))
    }

    /// Returns true if a cost could not be used as a target.
    pub fn is_invalid_cost(&self) -> bool {
        matches!(self.kind, ModelErrorKind::InvalidCost { .. })
    }

    /// Returns true if feature lengths differed within one key.
    pub fn is_inconsistent_features(&self) -> bool {
        matches!(self.kind, ModelErrorKind::InconsistentFeatures { .. })
    }

    /// Returns true if the regression library reported an error.
    pub fn is_boost(&self) -> bool {
        matches!(self.kind, ModelErrorKind::Boost { .. })
    }

    /// Returns true if the manifest was malformed.
    pub fn is_manifest(&self) -> bool {
        matches!(self.kind, ModelErrorKind::Manifest { .. })
    }

    /// Returns true if a filesystem operation failed.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ModelErrorKind::Io(_))
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for ModelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelErrorKind::UnknownKey(key) => {
                write!(f, "no model trained for key [{key}]")
            }
            ModelErrorKind::Config(reason) => {
                write!(f, "invalid training configuration: {reason}")
            }
            ModelErrorKind::Feature(err) => write!(f, "{err}"),
            ModelErrorKind::Record(err) => {
                write!(f, "failed to read samples: {err}")
            }
            ModelErrorKind::InvalidCost { line, cost } => {
                write!(f, "cost {cost} has no logarithm: {line}")
            }
            ModelErrorKind::InconsistentFeatures {
                key,
                expected,
                actual,
            } => write!(
                f,
                "key [{key}] mixes feature vectors of length {expected} \
                 and {actual}"
            ),
            ModelErrorKind::Boost { key, source } => {
                write!(f, "model for key [{key}]: {source}")
            }
            ModelErrorKind::Manifest { path, line, reason } => {
                write!(f, "{}:{line}: {reason}", path.display())
            }
            ModelErrorKind::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ModelErrorKind::Feature(err) => Some(err),
            ModelErrorKind::Record(err) => Some(err),
            ModelErrorKind::Boost { source, .. } => Some(source),
            ModelErrorKind::Io(err) => Some(err),
            ModelErrorKind::UnknownKey(_)
            | ModelErrorKind::Config(_)
            | ModelErrorKind::InvalidCost { .. }
            | ModelErrorKind::InconsistentFeatures { .. }
            | ModelErrorKind::Manifest { .. } => None,
        }
    }
}

impl From<FeatureError> for ModelError {
    fn from(err: FeatureError) -> Self {
        Self::new(ModelErrorKind::Feature(err))
    }
}

impl From<RecordError> for ModelError {
    fn from(err: RecordError) -> Self {
        Self::new(ModelErrorKind::Record(err))
    }
}

impl From<std::io::Error> for ModelError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ModelErrorKind::Io(err))
    }
}
