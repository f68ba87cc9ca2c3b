//! Per-key cost regressors for tile plans.
//!
//! Feature records are only comparable when they share a
//! [`StructuralKey`](tilecost_schemas::StructuralKey), so the model is
//! really a family of regressors, one per key:
//!
//! 1. [`train`] groups labeled samples by key and fits a gradient-boosted
//!    tree ensemble to each group.
//! 2. [`ModelStore`] holds the fitted ensembles and persists them as a
//!    manifest plus one model file per key.
//! 3. [`Predictor`] reloads a store and scores new feature lines with the
//!    model of their key.
//!
//! By default the regressors learn `ln(normalized cost)`, so predictions
//! are comparable across workloads of different sizes.

mod error;
mod predict;
mod store;
mod train;

#[doc(inline)]
pub use crate::error::ModelError;
#[doc(inline)]
pub use crate::predict::{Prediction, Predictor};
#[doc(inline)]
pub use crate::store::{MANIFEST_FILE, ModelStore};
#[doc(inline)]
pub use crate::train::{
    Evaluation, KeyReport, TrainConfig, TrainTarget, Training, run, train,
};
