//! Error types for the tilecost-boost crate.

use std::backtrace::Backtrace;
use std::fmt;

/// Error type for fitting, prediction and model serialization.
#[derive(Debug)]
pub struct BoostError {
    kind: BoostErrorKind,
    backtrace: Backtrace,
}

/// Internal error variants. Not exposed publicly; use `is_xxx()` methods.
#[derive(Debug)]
pub(crate) enum BoostErrorKind {
    /// No training rows were supplied.
    EmptyTrainingSet,
    /// Row and target counts differ.
    LengthMismatch { rows: usize, targets: usize },
    /// A row has the wrong number of features.
    FeatureCount { expected: usize, actual: usize },
    /// A target is NaN or infinite.
    NonFiniteTarget,
    /// A parameter is outside its valid range.
    InvalidParam { name: &'static str, value: f64 },
    /// Failed to serialize the model.
    Serialization(serde_json::Error),
    /// Failed to deserialize the model.
    Deserialization(serde_json::Error),
    /// A deserialized model is structurally unusable.
    InvalidModel(String),
}

impl BoostError {
    /// Creates an error from an error kind, capturing a backtrace.
    pub(crate) fn new(kind: BoostErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    pub(crate) fn feature_count(expected: usize, actual: usize) -> Self {
        Self::new(BoostErrorKind::FeatureCount { expected, actual })
    }

    pub(crate) fn invalid_param(name: &'static str, value: f64) -> Self {
        Self::new(BoostErrorKind::InvalidParam { name, value })
    }

    /// Returns true if there was nothing to train on.
    pub fn is_empty_training_set(&self) -> bool {
        matches!(self.kind, BoostErrorKind::EmptyTrainingSet)
    }

    /// Returns true if rows and targets have different lengths.
    pub fn is_length_mismatch(&self) -> bool {
        matches!(self.kind, BoostErrorKind::LengthMismatch { .. })
    }

    /// Returns true if a row had the wrong number of features.
    pub fn is_feature_count(&self) -> bool {
        matches!(self.kind, BoostErrorKind::FeatureCount { .. })
    }

    /// Returns true if a target was NaN or infinite.
    pub fn is_non_finite_target(&self) -> bool {
        matches!(self.kind, BoostErrorKind::NonFiniteTarget)
    }

    /// Returns true if a parameter was out of range.
    pub fn is_invalid_param(&self) -> bool {
        matches!(self.kind, BoostErrorKind::InvalidParam { .. })
    }

    /// Returns true if the model could not be written.
    pub fn is_serialization(&self) -> bool {
        matches!(self.kind, BoostErrorKind::Serialization(_))
    }

    /// Returns true if the model could not be read back.
    pub fn is_deserialization(&self) -> bool {
        matches!(self.kind, BoostErrorKind::Deserialization(_))
    }

    /// Returns true if a loaded model failed its structural checks.
    pub fn is_invalid_model(&self) -> bool {
        matches!(self.kind, BoostErrorKind::InvalidModel(_))
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for BoostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoostErrorKind::EmptyTrainingSet => {
                write!(f, "training set is empty")
            }
            BoostErrorKind::LengthMismatch { rows, targets } => {
                write!(f, "{rows} rows but {targets} targets")
            }
            BoostErrorKind::FeatureCount { expected, actual } => {
                write!(f, "expected {expected} features, got {actual}")
            }
            BoostErrorKind::NonFiniteTarget => {
                write!(f, "training target is not finite")
            }
            BoostErrorKind::InvalidParam { name, value } => {
                write!(f, "invalid parameter {name} = {value}")
            }
            BoostErrorKind::Serialization(err) => {
                write!(f, "failed to serialize model: {err}")
            }
            BoostErrorKind::Deserialization(err) => {
                write!(f, "failed to deserialize model: {err}")
            }
            BoostErrorKind::InvalidModel(reason) => {
                write!(f, "invalid model: {reason}")
            }
        }
    }
}

impl fmt::Display for BoostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for BoostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            BoostErrorKind::Serialization(err)
            | BoostErrorKind::Deserialization(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_deserialization() {
        let json_err =
            serde_json::from_str::<String>("not valid json").unwrap_err();
        let err = BoostError::new(BoostErrorKind::Deserialization(json_err));
        assert!(err.is_deserialization());
        assert!(!err.is_serialization());
        assert!(err.to_string().contains("failed to deserialize model"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_feature_count_display() {
        let err = BoostError::feature_count(3, 2);
        assert!(err.is_feature_count());
        assert_eq!(err.to_string(), "expected 3 features, got 2");
        assert!(err.source().is_none());
        let _ = err.backtrace();
    }
}
