//! Structural key to regressor mapping and its on-disk layout.
//!
//! A saved store is a directory holding one JSON model per key
//! (`0.dat`, `1.dat`, ...) and a [`MANIFEST_FILE`] listing them:
//!
//! ```text
//! 0 2
//! 0.dat
//! 1 3 2
//! 1.dat
//! ```
//!
//! Each entry is a line of space-joined key integers followed by a line
//! naming the model file. The manifest ends at EOF or at the first empty
//! line.
//!
//! Saving never overwrites a model file the current manifest names: new
//! models take the lowest free indices, the manifest is swapped in by a
//! rename, and only then are the files of the previous store removed.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tilecost_boost::Booster;
use tilecost_schemas::StructuralKey;
use tracing::{debug, info, warn};

use crate::error::{ModelError, ModelErrorKind};

/// Manifest file name inside a model directory.
pub const MANIFEST_FILE: &str = "model_list";

/// Trained regressors keyed by structural key, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelStore {
    models: IndexMap<StructuralKey, Booster>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `model` under `key`, returning any model it replaces.
    pub fn set_model(
        &mut self,
        key: StructuralKey,
        model: Booster,
    ) -> Option<Booster> {
        self.models.insert(key, model)
    }

    /// The model trained for `key`.
    pub fn get_model(
        &self,
        key: &StructuralKey,
    ) -> Result<&Booster, ModelError> {
        self.models.get(key).ok_or_else(|| {
            ModelError::new(ModelErrorKind::UnknownKey(key.clone()))
        })
    }

    pub fn model_exists(&self, key: &StructuralKey) -> bool {
        self.models.contains_key(key)
    }

    /// Keys in insertion (and manifest) order.
    pub fn keys(&self) -> impl Iterator<Item = &StructuralKey> {
        self.models.keys()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Replaces the store saved in `dir` with this one.
    ///
    /// Model files go to names the existing manifest does not use, and the
    /// manifest is written to a temporary name and renamed into place. A
    /// failed save leaves the previous store loadable and unchanged.
    pub fn save(&self, dir: &Path) -> Result<(), ModelError> {
        fs::create_dir_all(dir)?;

        let in_use = manifest_files(&dir.join(MANIFEST_FILE))?;
        let names: Vec<String> = (0usize..)
            .map(|idx| format!("{idx}.dat"))
            .filter(|name| !in_use.contains(name))
            .take(self.len())
            .collect();

        let mut written = Vec::with_capacity(names.len());
        let mut manifest = String::new();
        for ((key, model), file_name) in self.models.iter().zip(&names) {
            let path = dir.join(file_name);
            written.push(path.clone());
            if let Err(e) = write_model(&path, key, model) {
                discard(&written);
                return Err(e);
            }
            manifest.push_str(&format!("{key}\n{file_name}\n"));
            debug!(%key, file = %file_name, "saved model");
        }

        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        let committed = fs::write(&tmp, manifest)
            .and_then(|()| fs::rename(&tmp, dir.join(MANIFEST_FILE)));
        if let Err(e) = committed {
            discard(&written);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        let keep: HashSet<&str> = names.iter().map(String::as_str).collect();
        remove_stale_models(dir, &keep);
        info!(
            dir = %dir.display(),
            models = self.len(),
            "saved model store"
        );
        Ok(())
    }

    /// Reads a store previously written by [`save`](Self::save).
    pub fn load(dir: &Path) -> Result<Self, ModelError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let reader = BufReader::new(File::open(&manifest_path)?);
        let mut lines = reader.lines().enumerate();
        let mut store = Self::new();

        while let Some((idx, key_line)) = lines.next() {
            let key_line = key_line?;
            if key_line.trim().is_empty() {
                break;
            }
            let key = key_line.parse::<StructuralKey>().map_err(|e| {
                ModelError::manifest(&manifest_path, idx + 1, e.to_string())
            })?;

            let Some((idx, file_line)) = lines.next() else {
                return Err(ModelError::manifest(
                    &manifest_path,
                    idx + 2,
                    format!("key [{key}] has no model file"),
                ));
            };
            let file_name = file_line?;
            let file_name = file_name.trim();
            if file_name.is_empty() || file_name.contains(['/', '\\']) {
                return Err(ModelError::manifest(
                    &manifest_path,
                    idx + 1,
                    format!("`{file_name}` is not a model file name"),
                ));
            }

            let file = BufReader::new(File::open(dir.join(file_name))?);
            let model = Booster::load_json(file)
                .map_err(|e| ModelError::boost(&key, e))?;
            if store.set_model(key.clone(), model).is_some() {
                return Err(ModelError::manifest(
                    &manifest_path,
                    idx,
                    format!("key [{key}] is listed twice"),
                ));
            }
        }

        info!(
            dir = %dir.display(),
            models = store.len(),
            "loaded model store"
        );
        Ok(store)
    }
}

fn write_model(
    path: &Path,
    key: &StructuralKey,
    model: &Booster,
) -> Result<(), ModelError> {
    let mut w = BufWriter::new(File::create(path)?);
    model
        .save_json(&mut w)
        .map_err(|e| ModelError::boost(key, e))?;
    w.flush()?;
    Ok(())
}

/// Model file names listed by the manifest at `path`, if there is one.
///
/// Only the file-name lines matter here, so malformed key lines are not
/// an error.
fn manifest_files(path: &Path) -> io::Result<HashSet<String>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(HashSet::new());
        }
        Err(e) => return Err(e),
    };
    Ok(text
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .skip(1)
        .step_by(2)
        .map(|line| line.trim().to_string())
        .collect())
}

/// Best-effort removal of files written by a save that did not commit.
fn discard(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

/// Removes `<index>.dat` files in `dir` that are not in `keep`.
fn remove_stale_models(dir: &Path, keep: &HashSet<&str>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "cannot list old models: {e}");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let is_model = name.strip_suffix(".dat").is_some_and(|idx| {
            !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit())
        });
        if !is_model || keep.contains(name) {
            continue;
        }
        if let Err(e) = fs::remove_file(entry.path()) {
            warn!(file = name, "cannot remove old model: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::collection::{btree_set, vec};
    use proptest::prelude::*;
    use tempfile::TempDir;
    use tilecost_boost::{BoostParams, Dataset, fit};

    use super::*;

    fn booster(scale: f64) -> Booster {
        let rows: Vec<Vec<f64>> =
            (0..8).map(|i| vec![f64::from(i), 2.0]).collect();
        let targets: Vec<f64> =
            (0..8).map(|i| scale * f64::from(i)).collect();
        let params = BoostParams {
            num_rounds: 16,
            ..BoostParams::default()
        };
        fit(Dataset::new(&rows, &targets), None, &params)
            .unwrap()
            .booster
    }

    fn store() -> ModelStore {
        let mut store = ModelStore::new();
        store.set_model(StructuralKey::new([0, 2]), booster(1.0));
        store.set_model(StructuralKey::new([1, 3, 2]), booster(-3.0));
        store
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let saved = store();
        saved.save(dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap(),
            "0 2\n0.dat\n1 3 2\n1.dat\n"
        );
        assert!(!dir.path().join("model_list.tmp").exists());

        let loaded = ModelStore::load(dir.path()).unwrap();
        assert_eq!(
            loaded.keys().collect::<Vec<_>>(),
            saved.keys().collect::<Vec<_>>()
        );
        let probe = [3.5, 2.0];
        for key in saved.keys() {
            let before = saved.get_model(key).unwrap().predict(&probe);
            let after = loaded.get_model(key).unwrap().predict(&probe);
            let (before, after) = (before.unwrap(), after.unwrap());
            assert_eq!(before.to_bits(), after.to_bits());
        }
    }

    #[test]
    fn test_blank_line_ends_manifest() {
        let dir = TempDir::new().unwrap();
        store().save(dir.path()).unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            "0 2\n0.dat\n\n1 3 2\n1.dat\n",
        )
        .unwrap();
        let loaded = ModelStore::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.model_exists(&StructuralKey::new([0, 2])));
        assert!(!loaded.model_exists(&StructuralKey::new([1, 3, 2])));
    }

    #[test]
    fn test_unknown_key() {
        let err = store()
            .get_model(&StructuralKey::new([9, 9]))
            .unwrap_err();
        assert!(err.is_unknown_key());
    }

    #[test]
    fn test_dangling_key_line() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "0 2\n").unwrap();
        let err = ModelStore::load(dir.path()).unwrap_err();
        assert!(err.is_manifest());
        assert!(err.to_string().ends_with(":2: key [0 2] has no model file"));
    }

    #[test]
    fn test_bad_key_line() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "zero two\n0.dat\n")
            .unwrap();
        assert!(ModelStore::load(dir.path()).unwrap_err().is_manifest());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        assert!(ModelStore::load(dir.path()).unwrap_err().is_io());
    }

    #[test]
    fn test_set_model_replaces() {
        let mut store = store();
        let old = store.set_model(StructuralKey::new([0, 2]), booster(5.0));
        assert!(old.is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_failed_save_keeps_previous_store() {
        let dir = TempDir::new().unwrap();
        let mut first = ModelStore::new();
        first.set_model(StructuralKey::new([0, 2]), booster(1.0));
        first.save(dir.path()).unwrap();

        // A directory squatting on the next free name makes the save fail.
        fs::create_dir(dir.path().join("1.dat")).unwrap();
        let mut second = ModelStore::new();
        second.set_model(StructuralKey::new([0, 2]), booster(-3.0));
        second.set_model(StructuralKey::new([1, 3, 2]), booster(2.0));
        assert!(second.save(dir.path()).is_err());

        let loaded = ModelStore::load(dir.path()).unwrap();
        assert_eq!(loaded, first);
        let key = StructuralKey::new([0, 2]);
        let probe = [5.0, 2.0];
        assert_eq!(
            loaded.get_model(&key).unwrap().predict(&probe).unwrap(),
            first.get_model(&key).unwrap().predict(&probe).unwrap()
        );
        assert!(!dir.path().join("model_list.tmp").exists());
    }

    #[test]
    fn test_resave_replaces_store_wholesale() {
        let dir = TempDir::new().unwrap();
        store().save(dir.path()).unwrap();

        let mut smaller = ModelStore::new();
        smaller.set_model(StructuralKey::new([4, 1]), booster(2.0));
        smaller.save(dir.path()).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap(),
            "4 1\n2.dat\n"
        );
        assert!(!dir.path().join("0.dat").exists());
        assert!(!dir.path().join("1.dat").exists());
        let loaded = ModelStore::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded.model_exists(&StructuralKey::new([0, 2])));

        // The next save reuses the freed indices.
        store().save(dir.path()).unwrap();
        assert!(dir.path().join("0.dat").exists());
        assert!(!dir.path().join("2.dat").exists());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Any saved store reloads with the same keys and predictions.
        #[test]
        fn test_manifest_round_trip(
            keys in btree_set(vec(0u64..64, 1..4), 1..5),
            probe in 0.0f64..8.0,
        ) {
            let mut saved = ModelStore::new();
            for (i, key) in keys.into_iter().enumerate() {
                let scale = f64::from(u32::try_from(i).unwrap()) - 1.5;
                saved.set_model(StructuralKey::new(key), booster(scale));
            }
            let dir = TempDir::new().unwrap();
            saved.save(dir.path()).unwrap();
            let loaded = ModelStore::load(dir.path()).unwrap();

            prop_assert_eq!(
                loaded.keys().collect::<Vec<_>>(),
                saved.keys().collect::<Vec<_>>()
            );
            for key in saved.keys() {
                let before =
                    saved.get_model(key).unwrap().predict(&[probe, 2.0]);
                let after =
                    loaded.get_model(key).unwrap().predict(&[probe, 2.0]);
                prop_assert_eq!(
                    before.unwrap().to_bits(),
                    after.unwrap().to_bits()
                );
            }
        }
    }
}
