//! Error types for the tilecost-collect crate.

use std::backtrace::Backtrace;
use std::fmt;
use std::path::PathBuf;

use tilecost_schemas::RecordError;

/// Error type for sample collection.
#[derive(Debug)]
pub struct CollectError {
    kind: CollectErrorKind,
    backtrace: Backtrace,
}

/// Internal error variants. Not exposed publicly; use `is_xxx()` methods.
#[derive(Debug)]
pub(crate) enum CollectErrorKind {
    /// The collector configuration is unusable.
    Config(String),
    /// The workload list could not be parsed.
    Workload(serde_json::Error),
    /// A progress file is missing or unreadable.
    Progress { path: PathBuf, reason: String },
    /// The child's measurement output is malformed.
    Measurements { path: PathBuf, source: RecordError },
    /// The child could not be started or waited on.
    Launch(std::io::Error),
    /// The child exited with a positive status.
    ChildFailed { case: u32, part: u32, code: i32 },
    /// The case hit its consecutive failure limit.
    GaveUp { case: u32, attempts: u32 },
    /// Filesystem access in the training directory failed.
    Io(std::io::Error),
}

impl CollectError {
    /// Creates an error from an error kind, capturing a backtrace.
    pub(crate) fn new(kind: CollectErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::new(CollectErrorKind::Config(reason.into()))
    }

    pub(crate) fn progress(
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(CollectErrorKind::Progress {
            path: path.into(),
            reason: reason.into(),
        })
    }

    /// Returns true if the configuration was rejected.
    pub fn is_config(&self) -> bool {
        matches!(self.kind, CollectErrorKind::Config(_))
    }

    /// Returns true if the workload list was malformed.
    pub fn is_workload(&self) -> bool {
        matches!(self.kind, CollectErrorKind::Workload(_))
    }

    /// Returns true if a progress file was missing or unreadable.
    pub fn is_progress(&self) -> bool {
        matches!(self.kind, CollectErrorKind::Progress { .. })
    }

    /// Returns true if the child wrote malformed measurements.
    pub fn is_measurements(&self) -> bool {
        matches!(self.kind, CollectErrorKind::Measurements { .. })
    }

    /// Returns true if the child process could not be run at all.
    pub fn is_launch(&self) -> bool {
        matches!(self.kind, CollectErrorKind::Launch(_))
    }

    /// Returns true if the child reported a non-recoverable failure.
    pub fn is_child_failed(&self) -> bool {
        matches!(self.kind, CollectErrorKind::ChildFailed { .. })
    }

    /// Returns true if a case was abandoned after repeated failures.
    pub fn is_gave_up(&self) -> bool {
        matches!(self.kind, CollectErrorKind::GaveUp { .. })
    }

    /// Returns true if a filesystem operation failed.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, CollectErrorKind::Io(_))
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for CollectErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectErrorKind::Config(reason) => {
                write!(f, "invalid collector configuration: {reason}")
            }
            CollectErrorKind::Workload(err) => {
                write!(f, "failed to parse workloads: {err}")
            }
            CollectErrorKind::Progress { path, reason } => {
                write!(f, "bad progress file {}: {reason}", path.display())
            }
            CollectErrorKind::Measurements { path, source } => {
                write!(f, "bad measurements in {}: {source}", path.display())
            }
            CollectErrorKind::Launch(err) => {
                write!(f, "failed to run child process: {err}")
            }
            CollectErrorKind::ChildFailed { case, part, code } => {
                write!(
                    f,
                    "child failed on part #{part} of case #{case} \
                     with exit code {code}"
                )
            }
            CollectErrorKind::GaveUp { case, attempts } => {
                write!(
                    f,
                    "gave up on case #{case} after {attempts} \
                     unsuccessful launches"
                )
            }
            CollectErrorKind::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            CollectErrorKind::Workload(err) => Some(err),
            CollectErrorKind::Measurements { source, .. } => Some(source),
            CollectErrorKind::Launch(err) | CollectErrorKind::Io(err) => {
                Some(err)
            }
            CollectErrorKind::Config(_)
            | CollectErrorKind::Progress { .. }
            | CollectErrorKind::ChildFailed { .. }
            | CollectErrorKind::GaveUp { .. } => None,
        }
    }
}

impl From<std::io::Error> for CollectError {
    fn from(err: std::io::Error) -> Self {
        Self::new(CollectErrorKind::Io(err))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_gave_up_display() {
        let err = CollectError::new(CollectErrorKind::GaveUp {
            case: 3,
            attempts: 5,
        });
        assert!(err.is_gave_up());
        assert!(!err.is_child_failed());
        assert_eq!(
            err.to_string(),
            "gave up on case #3 after 5 unsuccessful launches"
        );
        assert!(err.source().is_none());
    }

    #[test]
    fn test_io_has_source() {
        let err = CollectError::from(std::io::Error::other("disk full"));
        assert!(err.is_io());
        assert!(err.source().is_some());
        let _ = err.backtrace();
    }
}
