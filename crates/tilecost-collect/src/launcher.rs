//! Running one workload part in an isolated child process.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{CollectError, CollectErrorKind};
use crate::workload::Workload;

/// Environment variable naming the training directory.
pub const ENV_TRAIN_DIR: &str = "CM_TRAIN_DIR";

/// Environment variable holding the workload as JSON.
pub const ENV_WORKLOAD: &str = "TILECOST_WORKLOAD";

/// Environment variable holding the timing iteration count.
pub const ENV_ITERATIONS: &str = "TILECOST_ITERATIONS";

/// Environment variable holding the 1-based case number.
pub const ENV_CASE: &str = "TILECOST_CASE";

/// Environment variable holding the 1-based part number.
pub const ENV_PART: &str = "TILECOST_PART";

/// Environment variable forwarding the collector's log level.
pub const ENV_VERBOSITY: &str = "TILECOST_VERBOSITY";

/// How often a child with a deadline is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything a child needs to run one part.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub train_dir: &'a Path,
    pub workload: &'a Workload,
    pub iterations: u32,
    pub case: u32,
    pub part: u32,
}

/// How a child run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Exit status 0: the part finished and its progress files are valid.
    Completed,
    /// Killed by a signal, negative exit code, or timed out. The part can
    /// be retried.
    Crashed { reason: String },
    /// Positive exit code: the child itself reported an error.
    Failed { code: i32 },
}

impl LaunchOutcome {
    /// Classifies a child's exit status.
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => LaunchOutcome::Completed,
            Some(code) if code < 0 => LaunchOutcome::Crashed {
                reason: format!("exit code {code}"),
            },
            Some(code) => LaunchOutcome::Failed { code },
            None => LaunchOutcome::Crashed {
                reason: format!("terminated ({status})"),
            },
        }
    }
}

/// Runs one workload part to completion.
pub trait Launcher {
    /// Blocks until the child for `request` has exited.
    ///
    /// An `Err` means the child could not be run at all; crashes are
    /// reported through [`LaunchOutcome::Crashed`].
    fn launch(
        &mut self,
        request: &LaunchRequest<'_>,
    ) -> Result<LaunchOutcome, CollectError>;
}

impl<L: Launcher + ?Sized> Launcher for &mut L {
    fn launch(
        &mut self,
        request: &LaunchRequest<'_>,
    ) -> Result<LaunchOutcome, CollectError> {
        (**self).launch(request)
    }
}

/// Launches an external compiler driver as a child process.
///
/// The request is passed through environment variables; see the `ENV_*`
/// constants in this module.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    verbosity: String,
    timeout: Option<Duration>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            verbosity: String::new(),
            timeout: None,
        }
    }

    /// Extra arguments passed to the program on every launch.
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Log level forwarded as [`ENV_VERBOSITY`].
    #[must_use]
    pub fn verbosity(mut self, level: impl Into<String>) -> Self {
        self.verbosity = level.into();
        self
    }

    /// Kills a child that runs longer than `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(
        &self,
        request: &LaunchRequest<'_>,
    ) -> Result<Command, CollectError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(ENV_TRAIN_DIR, request.train_dir)
            .env(ENV_WORKLOAD, request.workload.to_json()?)
            .env(ENV_ITERATIONS, request.iterations.to_string())
            .env(ENV_CASE, request.case.to_string())
            .env(ENV_PART, request.part.to_string())
            .env(ENV_VERBOSITY, &self.verbosity);
        Ok(cmd)
    }
}

impl Launcher for ProcessLauncher {
    fn launch(
        &mut self,
        request: &LaunchRequest<'_>,
    ) -> Result<LaunchOutcome, CollectError> {
        debug!(
            program = %self.program.display(),
            case = request.case,
            part = request.part,
            "launching child"
        );
        let child = self
            .command(request)?
            .spawn()
            .map_err(|e| CollectError::new(CollectErrorKind::Launch(e)))?;

        let outcome = match self.timeout {
            None => wait(child)?,
            Some(limit) => wait_timeout(child, limit)?,
        };
        debug!(?outcome, "child exited");
        Ok(outcome)
    }
}

fn wait(mut child: Child) -> Result<LaunchOutcome, CollectError> {
    let status = child
        .wait()
        .map_err(|e| CollectError::new(CollectErrorKind::Launch(e)))?;
    Ok(LaunchOutcome::from_status(status))
}

fn wait_timeout(
    mut child: Child,
    limit: Duration,
) -> Result<LaunchOutcome, CollectError> {
    let launch_err =
        |e: std::io::Error| CollectError::new(CollectErrorKind::Launch(e));
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().map_err(launch_err)? {
            return Ok(LaunchOutcome::from_status(status));
        }
        if Instant::now() >= deadline {
            warn!(pid = child.id(), ?limit, "child timed out, killing it");
            // The child may exit between try_wait and kill.
            if let Err(e) = child.kill() {
                debug!(error = %e, "kill failed");
            }
            child.wait().map_err(launch_err)?;
            return Ok(LaunchOutcome::Crashed {
                reason: format!("timed out after {limit:?}"),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}
