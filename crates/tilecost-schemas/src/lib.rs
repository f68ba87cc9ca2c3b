//! Record formats shared by every stage of the tile cost-model pipeline.
//!
//! The compiler's instrumentation describes each tiled block with a single
//! feature line. That line travels unchanged from the collector's raw log,
//! through the labeler's preprocessed file, into the trainer and finally
//! the predictor. This crate owns the codec for that line and the two
//! alternating-line file formats built on top of it:
//!
//! - **Raw log** (collector → labeler): feature line, then elapsed seconds.
//! - **Preprocessed file** (labeler → trainer): feature line, then
//!   `<elapsed> <class>`.
//!
//! Keeping the formats in one crate means the stages cannot drift apart on
//! what a well-formed record looks like.

mod error;
mod feature;
mod measurement;
#[cfg(test)]
mod testutil;

#[doc(inline)]
pub use error::{FeatureError, RecordError};
#[doc(inline)]
pub use feature::*;
#[doc(inline)]
pub use measurement::*;
