//! Gradient-boosted regression trees with a squared-error objective.
//!
//! This crate provides a focused implementation of the boosting loop used
//! by the tile cost model: depth-wise trees grown by exact greedy split
//! search, xgboost-style L1/L2 regularized gains and leaf weights, and
//! seeded row subsampling. Inputs are dense `f64` rows of equal length.
//!
//! Fitted models serialize to JSON through [`Booster::save_json`] and
//! [`Booster::load_json`].

mod error;
mod tree;

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[doc(inline)]
pub use crate::error::BoostError;
use crate::error::BoostErrorKind;
use crate::tree::{Tree, TreeBuilder};

/// How often the per-round evaluation metric is logged.
const LOG_EVERY: usize = 64;

/// Parameters controlling the boosting loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostParams {
    /// Maximum tree depth.
    pub max_depth: usize,
    /// Minimum hessian sum (row count for squared error) per child.
    pub min_child_weight: f64,
    /// Learning rate applied to every leaf weight.
    pub eta: f64,
    /// Fraction of rows sampled per round (0 < subsample <= 1).
    pub subsample: f64,
    /// L1 regularization on leaf weights.
    pub alpha: f64,
    /// L2 regularization on leaf weights.
    pub lambda: f64,
    /// Fraction of features considered per tree (0 < colsample <= 1).
    pub colsample_bytree: f64,
    /// Number of boosting rounds.
    pub num_rounds: usize,
    /// RNG seed for row and column sampling.
    pub seed: u64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            max_depth: 16,
            min_child_weight: 1.0,
            eta: 0.1,
            subsample: 0.5,
            alpha: 0.1,
            lambda: 1.0,
            colsample_bytree: 1.0,
            num_rounds: 1024,
            seed: 0x74_69_6c_65_63_6f_73_74, // "tilecost"
        }
    }
}

impl BoostParams {
    fn validate(&self) -> Result<(), BoostError> {
        let unit = |v: f64| v > 0.0 && v <= 1.0;
        if !unit(self.subsample) {
            return Err(BoostError::invalid_param("subsample", self.subsample));
        }
        if !unit(self.colsample_bytree) {
            return Err(BoostError::invalid_param(
                "colsample_bytree",
                self.colsample_bytree,
            ));
        }
        if !(self.eta > 0.0 && self.eta.is_finite()) {
            return Err(BoostError::invalid_param("eta", self.eta));
        }
        if self.alpha < 0.0 || self.lambda < 0.0 || self.min_child_weight < 0.0
        {
            return Err(BoostError::new(BoostErrorKind::InvalidParam {
                name: "regularization",
                value: self.alpha.min(self.lambda).min(self.min_child_weight),
            }));
        }
        Ok(())
    }
}

/// A borrowed dense dataset: `rows[i]` has target `targets[i]`.
#[derive(Debug, Clone, Copy)]
pub struct Dataset<'a> {
    /// Feature rows; all of the same length.
    pub rows: &'a [Vec<f64>],
    /// Regression targets.
    pub targets: &'a [f64],
}

impl<'a> Dataset<'a> {
    /// Pairs rows with targets.
    pub fn new(rows: &'a [Vec<f64>], targets: &'a [f64]) -> Self {
        Self { rows, targets }
    }

    fn validate(&self, num_features: usize) -> Result<(), BoostError> {
        if self.rows.len() != self.targets.len() {
            return Err(BoostError::new(BoostErrorKind::LengthMismatch {
                rows: self.rows.len(),
                targets: self.targets.len(),
            }));
        }
        if let Some(row) = self.rows.iter().find(|r| r.len() != num_features)
        {
            return Err(BoostError::feature_count(num_features, row.len()));
        }
        if self.targets.iter().any(|t| !t.is_finite()) {
            return Err(BoostError::new(BoostErrorKind::NonFiniteTarget));
        }
        Ok(())
    }
}

/// A fitted ensemble of regression trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    base_score: f64,
    num_features: usize,
    trees: Vec<Tree>,
}

impl Booster {
    /// Number of features every input row must have.
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Number of trees in the ensemble.
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Predicts the target for one feature row.
    pub fn predict(&self, features: &[f64]) -> Result<f64, BoostError> {
        if features.len() != self.num_features {
            return Err(BoostError::feature_count(
                self.num_features,
                features.len(),
            ));
        }
        Ok(self.predict_unchecked(features))
    }

    fn predict_unchecked(&self, features: &[f64]) -> f64 {
        self.base_score
            + self.trees.iter().map(|t| t.predict(features)).sum::<f64>()
    }

    /// Serializes the booster as JSON.
    pub fn save_json(&self, w: impl Write) -> Result<(), BoostError> {
        serde_json::to_writer(w, self)
            .map_err(|e| BoostError::new(BoostErrorKind::Serialization(e)))
    }

    /// Deserializes a booster written by [`Booster::save_json`].
    ///
    /// Every tree is checked before it is trusted, so a truncated or
    /// edited file fails here instead of in [`predict`](Self::predict).
    pub fn load_json(r: impl Read) -> Result<Self, BoostError> {
        let booster: Self = serde_json::from_reader(r).map_err(|e| {
            BoostError::new(BoostErrorKind::Deserialization(e))
        })?;
        for (i, tree) in booster.trees.iter().enumerate() {
            tree.check(booster.num_features).map_err(|reason| {
                BoostError::new(BoostErrorKind::InvalidModel(format!(
                    "tree {i}: {reason}"
                )))
            })?;
        }
        Ok(booster)
    }
}

/// Result of boosting.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// The fitted model.
    pub booster: Booster,
    /// Evaluation-set RMSE after each round (empty without an eval set).
    pub eval_rmse: Vec<f64>,
}

impl FitResult {
    /// RMSE on the evaluation set after the last round.
    pub fn final_rmse(&self) -> Option<f64> {
        self.eval_rmse.last().copied()
    }
}

/// Fits a booster on `train`, reporting RMSE on `eval` after every round.
///
/// The evaluation set only feeds the reported metric; it never influences
/// the fitted trees.
pub fn fit(
    train: Dataset<'_>,
    eval: Option<Dataset<'_>>,
    params: &BoostParams,
) -> Result<FitResult, BoostError> {
    params.validate()?;
    let Some(first) = train.rows.first() else {
        return Err(BoostError::new(BoostErrorKind::EmptyTrainingSet));
    };
    let num_features = first.len();
    train.validate(num_features)?;
    if let Some(eval) = &eval {
        eval.validate(num_features)?;
    }

    let n = train.rows.len();
    #[expect(
        clippy::cast_precision_loss,
        reason = "row counts only need approximate precision"
    )]
    let base_score = train.targets.iter().sum::<f64>() / n as f64;

    let mut predictions = vec![base_score; n];
    let mut eval_predictions =
        eval.map(|e| vec![base_score; e.rows.len()]);
    let mut gradients = vec![0.0; n];
    let mut eval_rmse = Vec::new();
    let mut trees = Vec::with_capacity(params.num_rounds);
    let mut rng = XorShift64::new(params.seed);

    for round in 0..params.num_rounds {
        for ((g, &p), &y) in
            gradients.iter_mut().zip(&predictions).zip(train.targets)
        {
            *g = p - y;
        }

        let mut sample = sample_rows(&mut rng, n, params.subsample);
        let features =
            sample_features(&mut rng, num_features, params.colsample_bytree);
        let tree = TreeBuilder::new(train.rows, &gradients, &features, params)
            .build(&mut sample);

        for (p, row) in predictions.iter_mut().zip(train.rows) {
            *p += tree.predict(row);
        }
        if let (Some(eval), Some(preds)) = (&eval, &mut eval_predictions) {
            for (p, row) in preds.iter_mut().zip(eval.rows) {
                *p += tree.predict(row);
            }
            let rmse = rmse_of(preds, eval.targets);
            if round % LOG_EVERY == 0 || round + 1 == params.num_rounds {
                debug!(round, rmse, "eval");
            }
            eval_rmse.push(rmse);
        }
        trees.push(tree);
    }

    Ok(FitResult {
        booster: Booster {
            base_score,
            num_features,
            trees,
        },
        eval_rmse,
    })
}

/// Root-mean-square error of `booster` on `data`.
pub fn rmse(booster: &Booster, data: Dataset<'_>) -> Result<f64, BoostError> {
    data.validate(booster.num_features)?;
    let predictions: Vec<f64> = data
        .rows
        .iter()
        .map(|row| booster.predict_unchecked(row))
        .collect();
    Ok(rmse_of(&predictions, data.targets))
}

fn rmse_of(predictions: &[f64], targets: &[f64]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let sum: f64 = predictions
        .iter()
        .zip(targets)
        .map(|(p, y)| (p - y).powi(2))
        .sum();
    #[expect(
        clippy::cast_precision_loss,
        reason = "row counts only need approximate precision"
    )]
    let n = targets.len() as f64;
    (sum / n).sqrt()
}

/// Bernoulli row sampling; never returns an empty sample.
fn sample_rows(rng: &mut XorShift64, n: usize, fraction: f64) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n).collect();
    }
    let mut sample: Vec<usize> =
        (0..n).filter(|_| rng.next_f64() < fraction).collect();
    if sample.is_empty() {
        sample.push(rng.next_usize(n));
    }
    sample
}

/// Picks `ceil(count * fraction)` distinct features, at least one.
fn sample_features(
    rng: &mut XorShift64,
    count: usize,
    fraction: f64,
) -> Vec<usize> {
    let mut all: Vec<usize> = (0..count).collect();
    if fraction >= 1.0 || count == 0 {
        return all;
    }
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        reason = "fraction is in (0, 1], so the product is within count"
    )]
    let keep = ((count as f64 * fraction).ceil() as usize).clamp(1, count);
    // Partial Fisher-Yates shuffle.
    for i in 0..keep {
        let j = i + rng.next_usize(count - i);
        all.swap(i, j);
    }
    all.truncate(keep);
    all.sort_unstable();
    all
}

/// Splits `0..n` into `(train, holdout)` index sets.
///
/// About `n * fraction` rows are held out, chosen by a seeded shuffle.
/// With two or more rows both sets are non-empty. Indices in each set are
/// ascending.
pub fn holdout_split(
    n: usize,
    fraction: f64,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..n).collect();
    if n < 2 || fraction <= 0.0 {
        return (order, Vec::new());
    }
    let mut rng = XorShift64::new(seed);
    for i in (1..n).rev() {
        order.swap(i, rng.next_usize(i + 1));
    }
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        reason = "the product is clamped to 1..n"
    )]
    let held = ((n as f64 * fraction).round() as usize).clamp(1, n - 1);
    let mut holdout = order.split_off(n - held);
    order.sort_unstable();
    holdout.sort_unstable();
    (order, holdout)
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 {
                0xdead_beef_cafe_f00d
            } else {
                seed
            },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_usize(&mut self, upper: usize) -> usize {
        if upper <= 1 {
            return 0;
        }
        let upper_u64 = u64::try_from(upper).unwrap_or(u64::MAX);
        let value = self.next_u64() % upper_u64;
        usize::try_from(value).unwrap_or(0)
    }

    /// Uniform in `[0, 1)`.
    #[expect(
        clippy::cast_precision_loss,
        reason = "53-bit mantissa is exactly representable"
    )]
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let rows: Vec<Vec<f64>> =
            (0..20).map(|i| vec![f64::from(i), 1.0]).collect();
        let targets = (0..20)
            .map(|i| if i < 10 { 0.0 } else { 10.0 })
            .collect();
        (rows, targets)
    }

    #[test]
    fn test_fits_step_function() {
        let (rows, targets) = step_data();
        let params = BoostParams {
            num_rounds: 200,
            ..BoostParams::default()
        };
        let result = fit(Dataset::new(&rows, &targets), None, &params)
            .unwrap();
        let low = result.booster.predict(&[2.0, 1.0]).unwrap();
        let high = result.booster.predict(&[17.0, 1.0]).unwrap();
        assert!(low < 1.0, "low = {low}");
        assert!(high > 9.0, "high = {high}");
        assert!(result.eval_rmse.is_empty());
    }

    #[test]
    fn test_eval_rmse_decreases() {
        let (rows, targets) = step_data();
        let data = Dataset::new(&rows, &targets);
        let params = BoostParams {
            num_rounds: 100,
            subsample: 1.0,
            ..BoostParams::default()
        };
        let result = fit(data, Some(data), &params).unwrap();
        assert_eq!(result.eval_rmse.len(), 100);
        let first = result.eval_rmse[0];
        let last = result.final_rmse().unwrap();
        assert!(last < first, "first = {first}, last = {last}");
        let direct = rmse(&result.booster, data).unwrap();
        assert!((direct - last).abs() < 1e-9);
    }

    #[test]
    fn test_constant_target() {
        let rows = vec![vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![4.0, 4.0, 4.0];
        let result =
            fit(Dataset::new(&rows, &targets), None, &BoostParams::default())
                .unwrap();
        let p = result.booster.predict(&[10.0]).unwrap();
        assert!((p - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_same_seed_same_model() {
        let (rows, targets) = step_data();
        let params = BoostParams {
            num_rounds: 20,
            ..BoostParams::default()
        };
        let a = fit(Dataset::new(&rows, &targets), None, &params).unwrap();
        let b = fit(Dataset::new(&rows, &targets), None, &params).unwrap();
        assert_eq!(a.booster, b.booster);
    }

    #[test]
    fn test_json_roundtrip_predicts_identically() {
        let (rows, targets) = step_data();
        let params = BoostParams {
            num_rounds: 30,
            ..BoostParams::default()
        };
        let booster = fit(Dataset::new(&rows, &targets), None, &params)
            .unwrap()
            .booster;
        let mut buf = Vec::new();
        booster.save_json(&mut buf).unwrap();
        let loaded = Booster::load_json(buf.as_slice()).unwrap();
        for row in &rows {
            assert_eq!(
                booster.predict(row).unwrap().to_bits(),
                loaded.predict(row).unwrap().to_bits()
            );
        }
    }

    #[test]
    fn test_load_rejects_broken_trees() {
        let load = |trees: &str| {
            let json = format!(
                r#"{{"base_score":0.0,"num_features":2,"trees":[{trees}]}}"#
            );
            Booster::load_json(json.as_bytes())
        };
        let leaf = r#"{"type":"leaf","value":1.0}"#;
        let split = |feature: usize, left: usize, right: usize| {
            format!(
                r#"{{"type":"split","feature":{feature},"threshold":0.5,"left":{left},"right":{right}}}"#
            )
        };

        let ok = format!(r#"{{"nodes":[{},{leaf},{leaf}]}}"#, split(1, 1, 2));
        assert_eq!(load(&ok).unwrap().predict(&[0.0, 0.0]).unwrap(), 1.0);

        let cases = [
            r#"{"nodes":[]}"#.to_string(),
            // Child past the end.
            format!(r#"{{"nodes":[{},{leaf}]}}"#, split(0, 1, 2)),
            // Child pointing back at the root would loop forever.
            format!(r#"{{"nodes":[{},{leaf}]}}"#, split(0, 1, 0)),
            // Feature the rows do not have.
            format!(r#"{{"nodes":[{},{leaf},{leaf}]}}"#, split(2, 1, 2)),
        ];
        for tree in &cases {
            let err = load(tree).unwrap_err();
            assert!(err.is_invalid_model(), "{tree}: {err}");
        }
        // Truncated file.
        assert!(
            Booster::load_json(&br#"{"base_score":0.0,"num_"#[..])
                .unwrap_err()
                .is_deserialization()
        );
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let rows = vec![vec![1.0, 2.0], vec![1.0]];
        let targets = vec![0.0, 1.0];
        let err = fit(Dataset::new(&rows, &targets), None, &BoostParams::default())
            .unwrap_err();
        assert!(err.is_feature_count());
    }

    #[test]
    fn test_rejects_empty_and_bad_params() {
        let err = fit(Dataset::new(&[], &[]), None, &BoostParams::default())
            .unwrap_err();
        assert!(err.is_empty_training_set());

        let rows = vec![vec![1.0]];
        let params = BoostParams {
            subsample: 0.0,
            ..BoostParams::default()
        };
        let err =
            fit(Dataset::new(&rows, &[1.0]), None, &params).unwrap_err();
        assert!(err.is_invalid_param());
    }

    #[test]
    fn test_predict_checks_width() {
        let rows = vec![vec![1.0, 2.0]];
        let booster =
            fit(Dataset::new(&rows, &[1.0]), None, &BoostParams::default())
                .unwrap()
                .booster;
        assert!(booster.predict(&[1.0]).unwrap_err().is_feature_count());
        assert_eq!(booster.num_features(), 2);
    }

    #[test]
    fn test_sample_features_distinct() {
        let mut rng = XorShift64::new(7);
        let picked = sample_features(&mut rng, 10, 0.35);
        assert_eq!(picked.len(), 4);
        let mut dedup = picked.clone();
        dedup.dedup();
        assert_eq!(dedup, picked);
    }

    #[test]
    fn test_holdout_split() {
        let (train, holdout) = holdout_split(10, 0.2, 3);
        assert_eq!(train.len(), 8);
        assert_eq!(holdout.len(), 2);
        let mut all: Vec<usize> =
            train.iter().chain(&holdout).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
        assert_eq!(holdout_split(10, 0.2, 3), (train, holdout));

        assert_eq!(holdout_split(1, 0.5, 3), (vec![0], vec![]));
        let (train, holdout) = holdout_split(2, 0.99, 3);
        assert_eq!((train.len(), holdout.len()), (1, 1));
    }

    #[test]
    fn test_sample_rows_never_empty() {
        let mut rng = XorShift64::new(1);
        for _ in 0..100 {
            assert!(!sample_rows(&mut rng, 1, 0.01).is_empty());
        }
    }
}
