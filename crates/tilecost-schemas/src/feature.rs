//! Feature line codec.
//!
//! A feature line looks like this:
//!
//! ```text
//! [@<case>] <run_count> <loop_count> features:<direction> <buffer_count> <total_size> <num_constraints> <stride> <min> <max> ...
//! ```
//!
//! Everything before [`MARKER`] is run metadata. Everything after it is the
//! payload, optionally split into groups with `;` when the instrumentation
//! nests sub-vectors. The first two payload integers form the
//! [`StructuralKey`]; the rest are the regression features.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FeatureError;

/// Literal separating run metadata from the feature payload.
pub const MARKER: &str = "features:";

/// Prefix of the optional case tag written by the collector.
pub const CASE_TAG: char = '@';

/// Separator between nested payload groups.
pub const GROUP_SEPARATOR: char = ';';

/// Key grouping feature records that share one regression model.
///
/// Holds `direction` and `buffer_count`, plus the payload group count when
/// the payload is nested. Records with equal keys always produce feature
/// vectors of the same length.
///
/// Displays and parses as space-joined integers, which is also the form
/// used in the model manifest.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct StructuralKey(Vec<u64>);

impl StructuralKey {
    /// Creates a key from its integer components.
    pub fn new(parts: impl Into<Vec<u64>>) -> Self {
        Self(parts.into())
    }

    /// Returns the key components.
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

impl fmt::Display for StructuralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for StructuralKey {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split_whitespace()
            .map(|token| parse_int(token, s))
            .collect::<Result<Vec<_>, _>>()?;
        if parts.is_empty() {
            return Err(FeatureError::truncated("structural key", s));
        }
        Ok(Self(parts))
    }
}

/// A decoded feature line.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    case: Option<u32>,
    run_count: u64,
    loop_count: u64,
    groups: Vec<Vec<u64>>,
    key: StructuralKey,
    features: Vec<f64>,
}

impl FeatureRecord {
    /// Case identifier the collector tagged this record with, if any.
    pub fn case(&self) -> Option<u32> {
        self.case
    }

    /// Number of work groups the tile was executed with.
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Number of accumulation iterations per work group.
    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    /// Structural key selecting the regression model.
    pub fn key(&self) -> &StructuralKey {
        &self.key
    }

    /// Flattened regression features (payload minus the key fields).
    pub fn features(&self) -> &[f64] {
        &self.features
    }

    /// Number of elements touched by the tile.
    pub fn total_size(&self) -> u64 {
        self.groups
            .iter()
            .flatten()
            .nth(2)
            .copied()
            .unwrap_or_default()
    }

    /// Normalizes an elapsed time by the workload size.
    ///
    /// Returns `elapsed / (run_count * loop_count * total_size)`. A record
    /// whose workload size is zero cannot be normalized.
    pub fn normalized_cost(&self, elapsed: f64) -> Result<f64, FeatureError> {
        let workload = self
            .run_count
            .checked_mul(self.loop_count)
            .and_then(|n| n.checked_mul(self.total_size()))
            .filter(|&n| n > 0)
            .ok_or_else(|| FeatureError::zero_workload(&self.to_line()))?;
        #[expect(
            clippy::cast_precision_loss,
            reason = "workload sizes are far below 2^52"
        )]
        let workload = workload as f64;
        Ok(elapsed / workload)
    }

    /// Returns a copy of this record tagged with `case`.
    #[must_use]
    pub fn with_case(&self, case: u32) -> Self {
        Self {
            case: Some(case),
            ..self.clone()
        }
    }

    /// Formats the record back into a feature line (without newline).
    pub fn to_line(&self) -> String {
        let mut line = String::new();
        if let Some(case) = self.case {
            line.push_str(&format!("{CASE_TAG}{case} "));
        }
        line.push_str(&format!(
            "{} {} {MARKER}",
            self.run_count, self.loop_count
        ));
        let groups: Vec<String> = self
            .groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        line.push_str(&groups.join(&format!(" {GROUP_SEPARATOR} ")));
        line
    }
}

/// Decodes a feature line.
///
/// # Errors
///
/// - [`FeatureError::is_malformed`] when the line has no [`MARKER`]
/// - [`FeatureError::is_invalid_number`] when a token is not an integer
/// - [`FeatureError::is_truncated`] when metadata or payload fields are
///   missing
pub fn decode(line: &str) -> Result<FeatureRecord, FeatureError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let Some((meta, payload)) = line.split_once(MARKER) else {
        return Err(FeatureError::malformed(line));
    };

    let mut tokens = meta.split_whitespace().peekable();
    let case = match tokens.next_if(|t| t.starts_with(CASE_TAG)) {
        Some(tag) => {
            let id = parse_int(&tag[CASE_TAG.len_utf8()..], line)?;
            Some(
                u32::try_from(id)
                    .map_err(|_| FeatureError::invalid_number(tag, line))?,
            )
        }
        None => None,
    };
    let run_count = tokens
        .next()
        .ok_or_else(|| FeatureError::truncated("run_count", line))
        .and_then(|t| parse_int(t, line))?;
    let loop_count = tokens
        .next()
        .ok_or_else(|| FeatureError::truncated("loop_count", line))
        .and_then(|t| parse_int(t, line))?;

    let groups = payload
        .split(GROUP_SEPARATOR)
        .map(|group| {
            group
                .split_whitespace()
                .map(|t| parse_int(t, line))
                .collect::<Result<Vec<_>, _>>()
        })
        .filter(|group| group.as_ref().map_or(true, |g| !g.is_empty()))
        .collect::<Result<Vec<_>, _>>()?;

    let flat: Vec<u64> = groups.iter().flatten().copied().collect();
    // direction, buffer_count, total_size, num_constraints
    if flat.len() < 4 {
        return Err(FeatureError::truncated("feature payload", line));
    }

    let mut key = vec![flat[0], flat[1]];
    if groups.len() > 1 {
        key.push(groups.len() as u64);
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "feature values are tile extents and strides"
    )]
    let features = flat[2..].iter().map(|&v| v as f64).collect();

    Ok(FeatureRecord {
        case,
        run_count,
        loop_count,
        groups,
        key: StructuralKey(key),
        features,
    })
}

/// Decodes only the structural key of a feature line.
pub fn decode_key(line: &str) -> Result<StructuralKey, FeatureError> {
    decode(line).map(|record| record.key)
}

fn parse_int(token: &str, line: &str) -> Result<u64, FeatureError> {
    token
        .parse()
        .map_err(|_| FeatureError::invalid_number(token, line))
}
