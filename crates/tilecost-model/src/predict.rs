//! Scoring feature lines with a loaded model store.

use std::io::BufRead;
use std::path::Path;

use tilecost_schemas::{StructuralKey, decode};

use crate::error::ModelError;
use crate::store::ModelStore;

/// One scored feature line.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Key of the model that produced the score.
    pub key: StructuralKey,
    /// Predicted cost on the scale the model was trained on.
    pub value: f64,
}

/// Predicts costs for feature lines using the model of their key.
///
/// There is no fallback model: a line whose key was never trained is an
/// error.
#[derive(Debug, Clone)]
pub struct Predictor {
    store: ModelStore,
}

impl Predictor {
    pub fn new(store: ModelStore) -> Self {
        Self { store }
    }

    /// Loads the store saved in `dir`.
    pub fn load(dir: &Path) -> Result<Self, ModelError> {
        ModelStore::load(dir).map(Self::new)
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Scores a single feature line.
    pub fn predict_line(&self, line: &str) -> Result<Prediction, ModelError> {
        let record = decode(line)?;
        let model = self.store.get_model(record.key())?;
        let value = model
            .predict(record.features())
            .map_err(|e| ModelError::boost(record.key(), e))?;
        Ok(Prediction {
            key: record.key().clone(),
            value,
        })
    }

    /// Scores every non-blank line of a test-data file, in order.
    pub fn predict_reader(
        &self,
        reader: impl BufRead,
    ) -> Result<Vec<Prediction>, ModelError> {
        let mut predictions = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            predictions.push(self.predict_line(&line)?);
        }
        Ok(predictions)
    }
}
