//! Fits one regressor per structural key.

use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use rayon::prelude::*;
use tilecost_boost::{BoostParams, Dataset, fit, holdout_split};
use tilecost_schemas::{LabeledMeasurement, StructuralKey, read_labeled};
use tracing::{debug, info, info_span};

use crate::error::{ModelError, ModelErrorKind};
use crate::store::ModelStore;

/// Quantity the regressors learn to predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrainTarget {
    /// Natural log of the normalized cost.
    #[default]
    LogCost,
    /// The performance class assigned by the labeler.
    Class,
}

impl FromStr for TrainTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log-cost" => Ok(Self::LogCost),
            "class" => Ok(Self::Class),
            _ => Err(format!(
                "unknown target `{s}`, expected `log-cost` or `class`"
            )),
        }
    }
}

impl fmt::Display for TrainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LogCost => "log-cost",
            Self::Class => "class",
        })
    }
}

/// Which rows the reported RMSE is measured on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Evaluation {
    /// Fit on every row and report RMSE on those same rows.
    #[default]
    TrainingSet,
    /// Hold out about `fraction` of each key's rows, fit on the rest, and
    /// report RMSE on the held-out rows.
    Holdout { fraction: f64, seed: u64 },
}

/// Training configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainConfig {
    pub params: BoostParams,
    pub target: TrainTarget,
    pub evaluation: Evaluation,
}

impl TrainConfig {
    /// Rejects configurations that cannot train.
    pub fn validate(&self) -> Result<(), ModelError> {
        if let Evaluation::Holdout { fraction, .. } = self.evaluation
            && !(fraction > 0.0 && fraction < 1.0)
        {
            return Err(ModelError::new(ModelErrorKind::Config(format!(
                "holdout fraction {fraction} is not between 0 and 1"
            ))));
        }
        Ok(())
    }
}

/// Fit statistics for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyReport {
    pub key: StructuralKey,
    /// Rows the model was fitted on.
    pub train_rows: usize,
    /// Rows the RMSE was measured on.
    pub eval_rows: usize,
    /// Feature vector length.
    pub features: usize,
    /// RMSE after the last boosting round.
    pub rmse: f64,
}

/// Result of a training run.
#[derive(Debug, Clone)]
pub struct Training {
    pub store: ModelStore,
    /// One report per key, in first-seen order.
    pub reports: Vec<KeyReport>,
}

impl Training {
    /// Writes the per-key fit statistics.
    pub fn write_report(&self, mut w: impl Write) -> std::io::Result<()> {
        writeln!(w, "Models trained: {}", self.reports.len())?;
        if self.reports.is_empty() {
            return Ok(());
        }
        writeln!(
            w,
            "\n{:<16} {:>8} {:>8} {:>8} {:>12}",
            "Key", "Train", "Eval", "Features", "RMSE"
        )?;
        writeln!(w, "{}", "-".repeat(56))?;
        for r in &self.reports {
            writeln!(
                w,
                "{:<16} {:>8} {:>8} {:>8} {:>12.6}",
                r.key.to_string(),
                r.train_rows,
                r.eval_rows,
                r.features,
                r.rmse
            )?;
        }
        Ok(())
    }
}

/// Rows and targets for one key.
#[derive(Debug, Default)]
struct KeySamples {
    rows: Vec<Vec<f64>>,
    targets: Vec<f64>,
}

/// Fits one model per structural key in `samples`.
///
/// Keys are fitted in parallel; results do not depend on the thread count.
pub fn train(
    samples: &[LabeledMeasurement],
    config: &TrainConfig,
) -> Result<Training, ModelError> {
    config.validate()?;
    let groups = group_by_key(samples, config.target)?;
    info!(samples = samples.len(), keys = groups.len(), "training");

    let fitted = groups
        .into_iter()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(key, data)| fit_key(key, &data, config))
        .collect::<Result<Vec<_>, _>>()?;

    let mut store = ModelStore::new();
    let mut reports = Vec::with_capacity(fitted.len());
    for (report, booster) in fitted {
        store.set_model(report.key.clone(), booster);
        reports.push(report);
    }
    Ok(Training { store, reports })
}

/// Reads a preprocessed file, trains, and saves the store into `dir`.
///
/// Nothing is written unless every key was fitted.
pub fn run(
    input: impl BufRead,
    dir: &Path,
    config: &TrainConfig,
) -> Result<Training, ModelError> {
    let samples = read_labeled(input)?;
    let training = train(&samples, config)?;
    training.store.save(dir)?;
    Ok(training)
}

fn group_by_key(
    samples: &[LabeledMeasurement],
    target: TrainTarget,
) -> Result<IndexMap<StructuralKey, KeySamples>, ModelError> {
    let mut groups: IndexMap<StructuralKey, KeySamples> = IndexMap::new();
    for sample in samples {
        let m = &sample.measurement;
        let y = match target {
            TrainTarget::LogCost => {
                let cost = m.normalized_cost()?;
                if !(cost > 0.0 && cost.is_finite()) {
                    return Err(ModelError::new(ModelErrorKind::InvalidCost {
                        line: m.line.clone(),
                        cost,
                    }));
                }
                cost.ln()
            }
            TrainTarget::Class => {
                f64::from(u32::try_from(sample.class).unwrap_or(u32::MAX))
            }
        };

        let key = m.record.key();
        let features = m.record.features();
        let group = groups.entry(key.clone()).or_default();
        if let Some(first) = group.rows.first()
            && first.len() != features.len()
        {
            return Err(ModelError::new(
                ModelErrorKind::InconsistentFeatures {
                    key: key.clone(),
                    expected: first.len(),
                    actual: features.len(),
                },
            ));
        }
        group.rows.push(features.to_vec());
        group.targets.push(y);
    }
    Ok(groups)
}

fn fit_key(
    key: StructuralKey,
    data: &KeySamples,
    config: &TrainConfig,
) -> Result<(KeyReport, tilecost_boost::Booster), ModelError> {
    let _span = info_span!("fit", %key).entered();
    let features = data.rows.first().map_or(0, Vec::len);

    let (train_rows, train_targets, eval_rows, eval_targets);
    let (train, eval) = match config.evaluation {
        Evaluation::TrainingSet => {
            let all = Dataset::new(&data.rows, &data.targets);
            (all, all)
        }
        Evaluation::Holdout { fraction, seed } => {
            let (fit_idx, eval_idx) =
                holdout_split(data.rows.len(), fraction, seed);
            if eval_idx.is_empty() {
                debug!("too few rows to hold out; evaluating on training set");
            }
            let pick = |idx: &[usize]| {
                let rows: Vec<Vec<f64>> =
                    idx.iter().map(|&i| data.rows[i].clone()).collect();
                let targets: Vec<f64> =
                    idx.iter().map(|&i| data.targets[i]).collect();
                (rows, targets)
            };
            (train_rows, train_targets) = pick(&fit_idx);
            (eval_rows, eval_targets) = if eval_idx.is_empty() {
                pick(&fit_idx)
            } else {
                pick(&eval_idx)
            };
            (
                Dataset::new(&train_rows, &train_targets),
                Dataset::new(&eval_rows, &eval_targets),
            )
        }
    };

    let result = fit(train, Some(eval), &config.params)
        .map_err(|e| ModelError::boost(&key, e))?;
    let rmse = result.final_rmse().unwrap_or_default();
    info!(
        rows = train.rows.len(),
        eval_rows = eval.rows.len(),
        trees = result.booster.num_trees(),
        rmse,
        "fitted model"
    );
    let report = KeyReport {
        key,
        train_rows: train.rows.len(),
        eval_rows: eval.rows.len(),
        features,
        rmse,
    };
    Ok((report, result.booster))
}
