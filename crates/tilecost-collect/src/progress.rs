//! Progress files shared with the child process.
//!
//! The child writes these into the training directory while it builds and
//! times tile plans; the collector only reads them after the child exits.
//!
//! | file | contents |
//! |---|---|
//! | `plan` | one line per enumerated tile plan |
//! | `last_tested` | index of the last plan that was timed |
//! | `last_built` | index of the last plan that was compiled |
//! | `first_generated` | index of the first plan generated in this part |
//! | `failed_tile` | plan indices the child gave up on, one per line |
//! | `part_measure` | raw measurement pairs produced by this part |

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tilecost_schemas::{read_measurements, write_measurement};
use tracing::{debug, warn};

use crate::error::{CollectError, CollectErrorKind};

/// Tile plan list; its line count is the total tile count.
pub const PLAN_FILE: &str = "plan";
/// Index of the last tile plan that was timed.
pub const LAST_TESTED_FILE: &str = "last_tested";
/// Index of the last tile plan that was compiled.
pub const LAST_BUILT_FILE: &str = "last_built";
/// Index of the first tile plan generated by the current part.
pub const FIRST_GENERATED_FILE: &str = "first_generated";
/// Tile plans the child skips after they crashed it.
pub const FAILED_TILE_FILE: &str = "failed_tile";
/// Measurement pairs written by the current part.
pub const PART_MEASURE_FILE: &str = "part_measure";
/// Append-only raw log handed to the labeler.
pub const MEASURE_FILE: &str = "measure";

const CASE_FILES: [&str; 6] = [
    PLAN_FILE,
    LAST_TESTED_FILE,
    LAST_BUILT_FILE,
    FIRST_GENERATED_FILE,
    FAILED_TILE_FILE,
    PART_MEASURE_FILE,
];

/// Reader for the progress files in one training directory.
#[derive(Debug, Clone)]
pub struct ProgressFiles {
    dir: PathBuf,
}

impl ProgressFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The training directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of a file in the training directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Removes every per-case file so the next case starts from tile 0.
    pub fn clear_case(&self) -> Result<(), CollectError> {
        for name in CASE_FILES {
            remove_if_exists(&self.path(name))?;
        }
        Ok(())
    }

    /// Removes the current part's measurement output.
    pub fn clear_part_output(&self) -> Result<(), CollectError> {
        remove_if_exists(&self.path(PART_MEASURE_FILE))
    }

    /// Number of tile plans enumerated for the current case.
    pub fn total_tiles(&self) -> Result<usize, CollectError> {
        let path = self.path(PLAN_FILE);
        let text = fs::read_to_string(&path).map_err(|e| {
            CollectError::progress(&path, format!("cannot read: {e}"))
        })?;
        Ok(text.lines().count())
    }

    /// Index of the last timed plan, or -1 before anything was timed.
    pub fn last_tested(&self) -> Result<i64, CollectError> {
        Ok(self.read_index(LAST_TESTED_FILE)?.unwrap_or(-1))
    }

    /// Index of the last compiled plan, falling back to
    /// [`last_tested`](Self::last_tested) when the child never built one.
    pub fn last_built(&self) -> Result<i64, CollectError> {
        match self.read_index(LAST_BUILT_FILE)? {
            Some(idx) => Ok(idx),
            None => self.last_tested(),
        }
    }

    /// Index of the first plan generated by the last part, if recorded.
    pub fn first_generated(&self) -> Result<Option<i64>, CollectError> {
        self.read_index(FIRST_GENERATED_FILE)
    }

    /// Plans the child has marked as failed, in the order it marked them.
    pub fn failed_tiles(&self) -> Result<Vec<i64>, CollectError> {
        let path = self.path(FAILED_TILE_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| parse_index(&path, line))
            .collect()
    }

    /// Moves the current part's measurements into the raw log.
    ///
    /// Each feature line is validated and tagged with `case`. After a
    /// crash the child may have died mid-write, so `crashed` drops an
    /// unterminated last line and a dangling feature line instead of
    /// failing. Returns the number of pairs appended.
    pub fn harvest(
        &self,
        case: u32,
        crashed: bool,
    ) -> Result<usize, CollectError> {
        let path = self.path(PART_MEASURE_FILE);
        let mut text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        if crashed {
            text = complete_pairs(&text);
        }

        let measurements =
            read_measurements(text.as_bytes()).map_err(|source| {
                CollectError::new(CollectErrorKind::Measurements {
                    path: path.clone(),
                    source,
                })
            })?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(MEASURE_FILE))?;
        let mut log = BufWriter::new(log);
        for m in &measurements {
            write_measurement(&mut log, &m.record.with_case(case), m.elapsed)?;
        }
        log.flush()?;

        fs::remove_file(&path)?;
        debug!(case, count = measurements.len(), "harvested measurements");
        Ok(measurements.len())
    }

    fn read_index(&self, name: &str) -> Result<Option<i64>, CollectError> {
        let path = self.path(name);
        match fs::read_to_string(&path) {
            Ok(text) => parse_index(&path, &text).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Removes every regular file in `dir`, creating `dir` if needed.
///
/// Subdirectories are left alone.
pub fn wipe_dir(dir: &Path) -> Result<usize, CollectError> {
    fs::create_dir_all(dir)?;
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn remove_if_exists(path: &Path) -> Result<(), CollectError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn parse_index(path: &Path, text: &str) -> Result<i64, CollectError> {
    let token = text.split_whitespace().next().unwrap_or_default();
    token.parse().map_err(|_| {
        CollectError::progress(path, format!("`{token}` is not a tile index"))
    })
}

/// Keeps only the complete feature/value pairs of a partially written file.
fn complete_pairs(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    if !text.is_empty() && !text.ends_with('\n') {
        lines.pop();
    }
    // A blank line ends the log; nothing after it counts.
    if let Some(end) = lines.iter().position(|l| l.trim().is_empty()) {
        lines.truncate(end);
    }
    if lines.len() % 2 == 1 {
        let dropped = lines.pop().unwrap_or_default();
        warn!(line = dropped, "dropping measurement cut short by a crash");
    }
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn setup() -> (TempDir, ProgressFiles) {
        let dir = TempDir::new().unwrap();
        let progress = ProgressFiles::new(dir.path());
        (dir, progress)
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let (_dir, progress) = setup();
        assert_eq!(progress.last_tested().unwrap(), -1);
        assert_eq!(progress.last_built().unwrap(), -1);
        assert_eq!(progress.first_generated().unwrap(), None);
        assert!(progress.failed_tiles().unwrap().is_empty());
        assert!(progress.total_tiles().unwrap_err().is_progress());
    }

    #[test]
    fn test_last_built_falls_back_to_last_tested() {
        let (_dir, progress) = setup();
        fs::write(progress.path(LAST_TESTED_FILE), "7").unwrap();
        assert_eq!(progress.last_built().unwrap(), 7);
        fs::write(progress.path(LAST_BUILT_FILE), "9\n").unwrap();
        assert_eq!(progress.last_built().unwrap(), 9);
    }

    #[test]
    fn test_total_tiles_counts_plan_lines() {
        let (_dir, progress) = setup();
        fs::write(progress.path(PLAN_FILE), "a\nb\nc\n").unwrap();
        assert_eq!(progress.total_tiles().unwrap(), 3);
    }

    #[test]
    fn test_garbage_index_is_an_error() {
        let (_dir, progress) = setup();
        fs::write(progress.path(LAST_TESTED_FILE), "soon").unwrap();
        assert!(progress.last_tested().unwrap_err().is_progress());
    }

    #[test]
    fn test_failed_tiles() {
        let (_dir, progress) = setup();
        fs::write(progress.path(FAILED_TILE_FILE), "4\n11\n").unwrap();
        assert_eq!(progress.failed_tiles().unwrap(), vec![4, 11]);
    }

    #[test]
    fn test_clear_case_removes_progress() {
        let (_dir, progress) = setup();
        for name in CASE_FILES {
            fs::write(progress.path(name), "0").unwrap();
        }
        fs::write(progress.path(MEASURE_FILE), "keep").unwrap();
        progress.clear_case().unwrap();
        for name in CASE_FILES {
            assert!(!progress.path(name).exists(), "{name} survived");
        }
        assert!(progress.path(MEASURE_FILE).exists());
    }

    #[test]
    fn test_harvest_tags_and_appends() {
        let (_dir, progress) = setup();
        fs::write(progress.path(MEASURE_FILE), "").unwrap();
        fs::write(
            progress.path(PART_MEASURE_FILE),
            "1 1 features:0 1 4 0\n0.5\n2 1 features:0 1 4 0\n0.25\n",
        )
        .unwrap();
        assert_eq!(progress.harvest(3, false).unwrap(), 2);
        assert!(!progress.path(PART_MEASURE_FILE).exists());
        assert_eq!(
            fs::read_to_string(progress.path(MEASURE_FILE)).unwrap(),
            "@3 1 1 features:0 1 4 0\n0.5\n@3 2 1 features:0 1 4 0\n0.25\n"
        );
        // Nothing left to harvest.
        assert_eq!(progress.harvest(3, false).unwrap(), 0);
    }

    #[test]
    fn test_harvest_after_crash_drops_partial_pair() {
        let (_dir, progress) = setup();
        fs::write(
            progress.path(PART_MEASURE_FILE),
            "1 1 features:0 1 4 0\n0.5\n1 1 features:0 1 8 0\n0.",
        )
        .unwrap();
        assert_eq!(progress.harvest(1, true).unwrap(), 1);
    }

    #[test]
    fn test_harvest_rejects_malformed_lines() {
        let (_dir, progress) = setup();
        fs::write(progress.path(PART_MEASURE_FILE), "1 1 0 1 4 0\n0.5\n")
            .unwrap();
        assert!(progress.harvest(1, false).unwrap_err().is_measurements());
    }

    #[test]
    fn test_complete_pairs() {
        assert_eq!(complete_pairs(""), "");
        assert_eq!(complete_pairs("a\n1\nb\n"), "a\n1\n");
        assert_eq!(complete_pairs("a\n1\nb\n2"), "a\n1\n");
        assert_eq!(complete_pairs("a\n1\n\nb\n"), "a\n1\n");
    }

    #[test]
    fn test_wipe_dir_keeps_subdirectories() {
        let dir = TempDir::new().unwrap();
        let train = dir.path().join("train");
        assert_eq!(wipe_dir(&train).unwrap(), 0);
        fs::write(train.join("plan"), "x").unwrap();
        fs::create_dir(train.join("models")).unwrap();
        assert_eq!(wipe_dir(&train).unwrap(), 1);
        assert!(train.join("models").is_dir());
    }
}
