//! Per-case retry state machine.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use tracing::{info, info_span, warn};

use crate::error::{CollectError, CollectErrorKind};
use crate::launcher::{LaunchOutcome, LaunchRequest, Launcher};
use crate::progress::{ProgressFiles, wipe_dir};
use crate::workload::Workload;

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct CollectConfig {
    /// Directory shared with the child: progress files and the raw log.
    pub train_dir: PathBuf,
    /// Timing iterations the child averages over for each tile plan.
    pub iterations: u32,
    /// Consecutive unsuccessful launches tolerated before giving up.
    pub max_attempts: u32,
    /// Remove regular files from `train_dir` before the first case.
    pub fresh: bool,
}

impl CollectConfig {
    /// Rejects configurations the collector cannot run with.
    pub fn validate(&self) -> Result<(), CollectError> {
        if self.train_dir.as_os_str().is_empty() {
            return Err(CollectError::config("training directory is empty"));
        }
        if self.iterations == 0 {
            return Err(CollectError::config("iterations must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(CollectError::config(
                "max_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Where a case is in its collection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseState {
    /// Not launched yet.
    Pending,
    /// About to launch `part`.
    Running { part: u32 },
    /// Relaunching `part` after a crash; `attempt` counts consecutive
    /// unsuccessful launches.
    FailedRetry { part: u32, attempt: u32 },
    /// Every tile plan was tested.
    Done,
    /// Too many consecutive unsuccessful launches.
    GaveUp { attempts: u32 },
}

/// What happened while collecting one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseReport {
    /// 1-based case number, also the raw log's case tag.
    pub case: u32,
    /// Workload name.
    pub name: String,
    /// Parts that completed cleanly.
    pub parts: u32,
    /// Child launches, including crashed ones.
    pub launches: u32,
    /// Launches that crashed.
    pub crashes: u32,
    /// Tile plans enumerated for the case.
    pub total_tiles: usize,
    /// Measurement pairs appended to the raw log.
    pub samples: usize,
    /// Tile plans the child marked as failed.
    pub failed_tiles: usize,
}

impl fmt::Display for CaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4}  {:<32} {:>5} {:>8} {:>7} {:>7} {:>8} {:>6}",
            self.case,
            self.name,
            self.parts,
            self.launches,
            self.crashes,
            self.total_tiles,
            self.samples,
            self.failed_tiles,
        )
    }
}

/// Reports for every collected case.
#[derive(Debug, Clone, Default)]
pub struct CollectSummary {
    pub cases: Vec<CaseReport>,
}

impl CollectSummary {
    /// Writes a per-case table followed by totals.
    pub fn write_report(&self, mut w: impl Write) -> std::io::Result<()> {
        writeln!(
            w,
            "{:>4}  {:<32} {:>5} {:>8} {:>7} {:>7} {:>8} {:>6}",
            "Case",
            "Workload",
            "Parts",
            "Launches",
            "Crashes",
            "Tiles",
            "Samples",
            "Failed"
        )?;
        writeln!(w, "{}", "-".repeat(86))?;
        for case in &self.cases {
            writeln!(w, "{case}")?;
        }
        let launches: u32 = self.cases.iter().map(|c| c.launches).sum();
        let crashes: u32 = self.cases.iter().map(|c| c.crashes).sum();
        let samples: usize = self.cases.iter().map(|c| c.samples).sum();
        writeln!(
            w,
            "\n{} cases, {launches} launches, {crashes} crashes, \
             {samples} samples",
            self.cases.len()
        )
    }
}

/// Drives the child process through every case of a training run.
pub struct Collector<L> {
    config: CollectConfig,
    launcher: L,
    progress: ProgressFiles,
}

impl<L: Launcher> Collector<L> {
    /// Validates `config` and prepares the training directory.
    pub fn new(
        config: CollectConfig,
        launcher: L,
    ) -> Result<Self, CollectError> {
        config.validate()?;
        if config.fresh {
            let removed = wipe_dir(&config.train_dir)?;
            info!(
                dir = %config.train_dir.display(),
                removed,
                "wiped training directory"
            );
        } else {
            std::fs::create_dir_all(&config.train_dir)?;
        }
        let progress = ProgressFiles::new(&config.train_dir);
        Ok(Self {
            config,
            launcher,
            progress,
        })
    }

    /// The progress files in the training directory.
    pub fn progress(&self) -> &ProgressFiles {
        &self.progress
    }

    /// Collects every workload in order. Cases are numbered from 1.
    ///
    /// Stops at the first case that fails or gives up.
    pub fn run(
        &mut self,
        workloads: &[Workload],
    ) -> Result<CollectSummary, CollectError> {
        let mut summary = CollectSummary::default();
        for (case, workload) in (1u32..).zip(workloads) {
            info!(
                tensors = workload.tensors().count(),
                "running {case}/{}: {}",
                workloads.len(),
                workload.name
            );
            summary.cases.push(self.collect_case(case, workload)?);
        }
        Ok(summary)
    }

    /// Runs parts of one case until every tile plan has been tested.
    ///
    /// Crashed parts are relaunched; the progress files are kept so the
    /// child can skip the plan that crashed it. A launch is unsuccessful
    /// when it neither tests nor builds a plan past the furthest one seen
    /// so far, whether it crashed or exited cleanly. Only consecutive
    /// unsuccessful launches count toward `max_attempts`.
    pub fn collect_case(
        &mut self,
        case: u32,
        workload: &Workload,
    ) -> Result<CaseReport, CollectError> {
        let _span = info_span!("case", case, name = %workload.name).entered();
        self.progress.clear_case()?;

        let mut report = CaseReport {
            case,
            name: workload.name.clone(),
            parts: 0,
            launches: 0,
            crashes: 0,
            total_tiles: 0,
            samples: 0,
            failed_tiles: 0,
        };
        let mut total_tiles: Option<usize> = None;
        let mut last_tested = self.progress.last_tested()?;
        let mut last_built = self.progress.last_built()?;
        let mut attempts = 0;
        let mut state = CaseState::Pending;

        loop {
            state = match state {
                CaseState::Pending => CaseState::Running { part: 1 },
                CaseState::Running { part }
                | CaseState::FailedRetry { part, .. } => {
                    info!(
                        "building and running tile plans part #{part} \
                         of case #{case}"
                    );
                    let request = LaunchRequest {
                        train_dir: &self.config.train_dir,
                        workload,
                        iterations: self.config.iterations,
                        case,
                        part,
                    };
                    report.launches += 1;
                    let outcome = self.launcher.launch(&request)?;
                    let crashed =
                        matches!(outcome, LaunchOutcome::Crashed { .. });
                    report.samples += self.progress.harvest(case, crashed)?;
                    let tested = self.progress.last_tested()?;
                    let built = self.progress.last_built()?;
                    let advanced = tested > last_tested || built > last_built;
                    last_tested = last_tested.max(tested);
                    last_built = last_built.max(built);

                    match outcome {
                        LaunchOutcome::Completed => {
                            report.parts += 1;
                            let total = match total_tiles {
                                Some(total) => total,
                                None => *total_tiles
                                    .insert(self.progress.total_tiles()?),
                            };
                            if tested >= tile_count(total) - 1 {
                                CaseState::Done
                            } else if advanced {
                                attempts = 0;
                                CaseState::Running { part: part + 1 }
                            } else {
                                attempts += 1;
                                warn!(
                                    part,
                                    tested, total, "part tested no new plans"
                                );
                                self.next_after_failure(
                                    part + 1,
                                    attempts,
                                )
                            }
                        }
                        LaunchOutcome::Crashed { reason } => {
                            report.crashes += 1;
                            attempts = if advanced { 0 } else { attempts + 1 };
                            let first_generated =
                                self.progress.first_generated()?;
                            warn!(
                                %reason,
                                ?first_generated,
                                attempts,
                                "failed to build tile plan #{}",
                                built + 1
                            );
                            self.progress.clear_part_output()?;
                            self.next_after_failure(part, attempts)
                        }
                        LaunchOutcome::Failed { code } => {
                            return Err(CollectError::new(
                                CollectErrorKind::ChildFailed {
                                    case,
                                    part,
                                    code,
                                },
                            ));
                        }
                    }
                }
                CaseState::Done => {
                    report.total_tiles = total_tiles.unwrap_or_default();
                    report.failed_tiles = self.progress.failed_tiles()?.len();
                    info!(
                        parts = report.parts,
                        launches = report.launches,
                        samples = report.samples,
                        "case done"
                    );
                    return Ok(report);
                }
                CaseState::GaveUp { attempts } => {
                    return Err(CollectError::new(CollectErrorKind::GaveUp {
                        case,
                        attempts,
                    }));
                }
            };
        }
    }

    fn next_after_failure(&self, part: u32, attempts: u32) -> CaseState {
        if attempts >= self.config.max_attempts {
            CaseState::GaveUp { attempts }
        } else {
            CaseState::FailedRetry {
                part,
                attempt: attempts,
            }
        }
    }
}

fn tile_count(total: usize) -> i64 {
    i64::try_from(total).unwrap_or(i64::MAX)
}
