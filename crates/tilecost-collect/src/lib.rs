//! Harvests tile timing samples by driving an external compiler.
//!
//! The compiler explores tiling candidates for a workload, times each one,
//! and writes a measurement pair per candidate. Exploring a bad candidate
//! can crash or hang it, so every workload part runs in its own child
//! process and the collector only looks at shared files once the child has
//! exited:
//!
//! ```text
//! Pending → Running{part} → Done
//!              │    ▲
//!              ▼    │
//!         FailedRetry{part} → GaveUp
//! ```
//!
//! A crashed part is relaunched with the same progress files, which lets
//! the child skip the tile plan that killed it. A clean part that leaves
//! untested plans is followed by the next part. Measurements from every
//! launch are tagged with the case number and appended to the raw log
//! ([`MEASURE_FILE`]) read by the labeler.
//!
//! The child itself is abstracted behind [`Launcher`]; [`ProcessLauncher`]
//! runs a real program, and tests substitute a scripted one.

mod collector;
mod error;
mod launcher;
mod progress;
mod workload;

#[doc(inline)]
pub use crate::collector::{
    CaseReport, CaseState, CollectConfig, CollectSummary, Collector,
};
#[doc(inline)]
pub use crate::error::CollectError;
#[doc(inline)]
pub use crate::launcher::{
    ENV_CASE, ENV_ITERATIONS, ENV_PART, ENV_TRAIN_DIR, ENV_VERBOSITY,
    ENV_WORKLOAD, LaunchOutcome, LaunchRequest, Launcher, ProcessLauncher,
};
#[doc(inline)]
pub use crate::progress::{
    FAILED_TILE_FILE, FIRST_GENERATED_FILE, LAST_BUILT_FILE,
    LAST_TESTED_FILE, MEASURE_FILE, PART_MEASURE_FILE, PLAN_FILE,
    ProgressFiles, wipe_dir,
};
#[doc(inline)]
pub use crate::workload::{Workload, WorkloadInput, load_workloads};
