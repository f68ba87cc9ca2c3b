//! Turns raw tile timings into labeled training samples.
//!
//! Each measurement's elapsed time is divided by its workload size to get a
//! size-independent normalized cost. Measurements are then partitioned into
//! groups, and within each group the costs are clustered into `K`
//! performance classes. Classes are re-ranked by ascending mean cost so that
//! class 0 is always the fastest and class `K - 1` the slowest, which keeps
//! labels comparable between groups and between runs.
//!
//! Two grouping modes ([`Grouping`]) and two clustering strategies
//! ([`ClusterStrategy`]) are available; any combination may be selected.
//!
//! ## Usage
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! use tilecost_label::{LabelConfig, run};
//!
//! let input = BufReader::new(File::open("measure").unwrap());
//! let output = File::create("preprocessed").unwrap();
//! let labeling = run(input, output, &LabelConfig::default()).unwrap();
//! labeling.write_report(std::io::stderr()).unwrap();
//! ```

mod cluster;
mod error;

use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;

use indexmap::IndexMap;
use tilecost_schemas::{
    LabeledMeasurement, Measurement, StructuralKey, read_measurements,
    write_labeled,
};
use tracing::{debug_span, info, warn};

#[doc(inline)]
pub use crate::cluster::{
    Cluster, GaussianMixture, KMeans, KMeansFit, cluster_means, rank_clusters,
};
#[doc(inline)]
pub use crate::error::LabelError;
use crate::error::LabelErrorKind;

/// How measurements are partitioned before clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Grouping {
    /// One group per collector case tag; untagged records share a group.
    #[default]
    Case,
    /// One group per structural key.
    StructuralKey,
}

/// Which clustering algorithm assigns classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterStrategy {
    /// Nearest of `K` 1-D centroids.
    #[default]
    KMeans,
    /// Hard assignment from an EM-fitted Gaussian mixture.
    GaussianMixture,
}

/// Scale the normalized costs are clustered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostScale {
    /// `log10(cost)`; costs must be positive.
    #[default]
    Log10,
    /// The normalized cost itself.
    Raw,
}

macro_rules! impl_choice {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(format!(
                        "unknown value `{s}`, expected one of: {}",
                        [$($name),+].join(", ")
                    )),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $name,)+
                })
            }
        }
    };
}

impl_choice!(Grouping { Case => "case", StructuralKey => "key" });
impl_choice!(ClusterStrategy {
    KMeans => "kmeans",
    GaussianMixture => "gmm",
});
impl_choice!(CostScale { Log10 => "log10", Raw => "raw" });

/// Labeling configuration.
#[derive(Debug, Clone, Copy)]
pub struct LabelConfig {
    /// Number of performance classes `K`.
    pub num_classes: usize,
    /// Partitioning mode.
    pub grouping: Grouping,
    /// Clustering algorithm.
    pub strategy: ClusterStrategy,
    /// Scale to cluster on.
    pub scale: CostScale,
    /// Iteration cap for the clustering algorithm.
    pub max_iterations: usize,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            num_classes: 4,
            grouping: Grouping::default(),
            strategy: ClusterStrategy::default(),
            scale: CostScale::default(),
            max_iterations: 300,
        }
    }
}

impl LabelConfig {
    /// Rejects configurations that cannot produce labels.
    pub fn validate(&self) -> Result<(), LabelError> {
        if self.num_classes == 0 {
            return Err(LabelError::config("num_classes must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(LabelError::config("max_iterations must be at least 1"));
        }
        Ok(())
    }

    fn clusterer(&self) -> Box<dyn Cluster> {
        match self.strategy {
            ClusterStrategy::KMeans => Box::new(KMeans {
                max_iterations: self.max_iterations,
                ..KMeans::default()
            }),
            ClusterStrategy::GaussianMixture => Box::new(GaussianMixture {
                max_iterations: self.max_iterations,
                ..GaussianMixture::default()
            }),
        }
    }
}

/// Identifies one clustering group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupId {
    /// Collector case; `None` for untagged records.
    Case(Option<u32>),
    /// Structural key.
    Key(StructuralKey),
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupId::Case(Some(case)) => write!(f, "case {case}"),
            GroupId::Case(None) => write!(f, "case (untagged)"),
            GroupId::Key(key) => write!(f, "key [{key}]"),
        }
    }
}

/// Per-group label balance.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    /// The group.
    pub group: GroupId,
    /// Samples per class.
    pub counts: Vec<usize>,
    /// Mean normalized cost per class; `None` for empty classes.
    pub mean_costs: Vec<Option<f64>>,
}

impl fmt::Display for GroupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<24}", self.group.to_string())?;
        for (count, mean) in self.counts.iter().zip(&self.mean_costs) {
            match mean {
                Some(mean) => write!(f, "  {count:>6} @ {mean:<12.4e}")?,
                None => write!(f, "  {count:>6} @ {:<12}", "-")?,
            }
        }
        Ok(())
    }
}

/// Result of labeling a set of measurements.
#[derive(Debug, Clone)]
pub struct Labeling {
    /// Labeled samples in input order.
    pub labeled: Vec<LabeledMeasurement>,
    /// Label balance per group, in first-seen order.
    pub groups: Vec<GroupSummary>,
}

impl Labeling {
    /// Writes the per-group class counts and mean costs.
    pub fn write_report(&self, mut w: impl Write) -> std::io::Result<()> {
        writeln!(w, "Samples labeled: {}", self.labeled.len())?;
        writeln!(w, "Groups:          {}", self.groups.len())?;
        if self.groups.is_empty() {
            return Ok(());
        }
        writeln!(w, "\n{:<24}  count @ mean cost per class", "Group")?;
        writeln!(w, "{}", "-".repeat(72))?;
        for group in &self.groups {
            writeln!(w, "{group}")?;
        }
        Ok(())
    }
}

/// Labels measurements according to `config`.
///
/// Output order matches input order. Groups that end up with classes of no
/// members are legal; those classes report a count of 0.
pub fn label(
    measurements: Vec<Measurement>,
    config: &LabelConfig,
) -> Result<Labeling, LabelError> {
    config.validate()?;
    let k = config.num_classes;

    let costs = measurements
        .iter()
        .map(Measurement::normalized_cost)
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups: IndexMap<GroupId, Vec<usize>> = IndexMap::new();
    for (idx, m) in measurements.iter().enumerate() {
        let id = match config.grouping {
            Grouping::Case => GroupId::Case(m.record.case()),
            Grouping::StructuralKey => GroupId::Key(m.record.key().clone()),
        };
        groups.entry(id).or_default().push(idx);
    }

    let clusterer = config.clusterer();
    let mut classes = vec![0usize; measurements.len()];
    let mut summaries = Vec::with_capacity(groups.len());

    for (group, members) in groups {
        let _span = debug_span!("label_group", %group).entered();
        let group_costs: Vec<f64> = members.iter().map(|&i| costs[i]).collect();
        let values = group_costs
            .iter()
            .zip(&members)
            .map(|(&cost, &i)| scaled(cost, config.scale, &measurements[i]))
            .collect::<Result<Vec<_>, _>>()?;

        let raw = clusterer.assign(&values, k);
        let rank = rank_clusters(&raw, &group_costs, k);
        let group_classes: Vec<usize> = raw.iter().map(|&c| rank[c]).collect();
        for (&i, &class) in members.iter().zip(&group_classes) {
            classes[i] = class;
        }

        let mut counts = vec![0usize; k];
        for &class in &group_classes {
            counts[class] += 1;
        }
        let mean_costs = cluster_means(&group_classes, &group_costs, k);
        if counts.iter().any(|&c| c == 0) {
            warn!(%group, ?counts, "some classes are empty");
        }
        info!(%group, samples = members.len(), ?counts, "labeled group");

        summaries.push(GroupSummary {
            group,
            counts,
            mean_costs,
        });
    }

    let labeled = measurements
        .into_iter()
        .zip(classes)
        .map(|(measurement, class)| LabeledMeasurement { measurement, class })
        .collect();

    Ok(Labeling {
        labeled,
        groups: summaries,
    })
}

/// Reads a raw log, labels it, and writes the preprocessed file.
pub fn run(
    input: impl BufRead,
    mut output: impl Write,
    config: &LabelConfig,
) -> Result<Labeling, LabelError> {
    let measurements = read_measurements(input)?;
    info!(count = measurements.len(), "read measurements");
    let labeling = label(measurements, config)?;
    write_labeled(&mut output, &labeling.labeled)?;
    output.flush()?;
    Ok(labeling)
}

fn scaled(
    cost: f64,
    scale: CostScale,
    measurement: &Measurement,
) -> Result<f64, LabelError> {
    let value = match scale {
        CostScale::Log10 if cost > 0.0 => cost.log10(),
        CostScale::Log10 => f64::NAN,
        CostScale::Raw => cost,
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(LabelError::new(LabelErrorKind::InvalidCost {
            line: measurement.line.clone(),
            cost,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use proptest::collection::vec;
    use proptest::prelude::*;

    use super::*;

    /// A measurement with unit workload, so normalized cost == elapsed.
    fn unit(case: Option<u32>, stride: u64, elapsed: f64) -> Measurement {
        let tag = case.map(|c| format!("@{c} ")).unwrap_or_default();
        Measurement::new(
            &format!("{tag}1 1 features:0 1 1 0 {stride} 0 3"),
            elapsed,
        )
        .unwrap()
    }

    fn scenario() -> Vec<Measurement> {
        [1.0, 1.0, 1.0, 100.0, 100.0, 100.0]
            .into_iter()
            .enumerate()
            .map(|(i, cost)| unit(None, if i < 3 { 1 } else { 8 }, cost))
            .collect()
    }

    fn config(strategy: ClusterStrategy, k: usize) -> LabelConfig {
        LabelConfig {
            num_classes: k,
            strategy,
            ..LabelConfig::default()
        }
    }

    #[test]
    fn test_two_class_scenario_kmeans() {
        let labeling =
            label(scenario(), &config(ClusterStrategy::KMeans, 2)).unwrap();
        let classes: Vec<usize> =
            labeling.labeled.iter().map(|l| l.class).collect();
        assert_eq!(classes, vec![0, 0, 0, 1, 1, 1]);
        let summary = &labeling.groups[0];
        assert_eq!(summary.counts, vec![3, 3]);
        assert_eq!(summary.mean_costs, vec![Some(1.0), Some(100.0)]);
    }

    #[test]
    fn test_two_class_scenario_mixture() {
        let labeling = label(
            scenario(),
            &config(ClusterStrategy::GaussianMixture, 2),
        )
        .unwrap();
        let classes: Vec<usize> =
            labeling.labeled.iter().map(|l| l.class).collect();
        assert_eq!(classes, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_labels_ignore_input_order() {
        let mut input = scenario();
        input.reverse();
        let labeling =
            label(input, &config(ClusterStrategy::KMeans, 2)).unwrap();
        let classes: Vec<usize> =
            labeling.labeled.iter().map(|l| l.class).collect();
        assert_eq!(classes, vec![1, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_empty_classes_are_reported() {
        let input =
            vec![unit(None, 1, 1.0), unit(None, 1, 1.0), unit(None, 2, 100.0)];
        for strategy in
            [ClusterStrategy::KMeans, ClusterStrategy::GaussianMixture]
        {
            let labeling = label(input.clone(), &config(strategy, 4)).unwrap();
            let summary = &labeling.groups[0];
            assert_eq!(summary.counts.iter().sum::<usize>(), 3);
            assert_eq!(summary.counts[2..], [0, 0]);
            assert_eq!(summary.mean_costs[2..], [None, None]);
        }
    }

    #[test]
    fn test_groups_by_case() {
        let input = vec![
            unit(Some(1), 1, 1.0),
            unit(Some(2), 1, 50.0),
            unit(Some(1), 1, 9.0),
            unit(Some(2), 1, 500.0),
        ];
        let labeling =
            label(input, &config(ClusterStrategy::KMeans, 2)).unwrap();
        let classes: Vec<usize> =
            labeling.labeled.iter().map(|l| l.class).collect();
        // Each case gets its own fastest/slowest split.
        assert_eq!(classes, vec![0, 0, 1, 1]);
        assert_eq!(labeling.groups.len(), 2);
        assert_eq!(labeling.groups[0].group, GroupId::Case(Some(1)));
    }

    #[test]
    fn test_groups_by_key() {
        let a = Measurement::new("1 1 features:0 1 1 0 1 0 3", 1.0).unwrap();
        let b = Measurement::new("1 1 features:1 1 1 0 1 0 3", 1.0).unwrap();
        let cfg = LabelConfig {
            grouping: Grouping::StructuralKey,
            ..LabelConfig::default()
        };
        let labeling = label(vec![a, b], &cfg).unwrap();
        assert_eq!(labeling.groups.len(), 2);
        assert_eq!(
            labeling.groups[1].group,
            GroupId::Key(StructuralKey::new([1, 1]))
        );
    }

    #[test]
    fn test_zero_cost_rejected_on_log_scale() {
        let err = label(vec![unit(None, 1, 0.0)], &LabelConfig::default())
            .unwrap_err();
        assert!(err.is_invalid_cost());

        let cfg = LabelConfig {
            scale: CostScale::Raw,
            ..LabelConfig::default()
        };
        assert!(label(vec![unit(None, 1, 0.0)], &cfg).is_ok());
    }

    #[test]
    fn test_zero_classes_rejected() {
        let err = label(Vec::new(), &config(ClusterStrategy::KMeans, 0))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_run_writes_preprocessed_file() {
        let raw = "\
1 1 features:0 1 1 0 1 0 3
1
1 1 features:0 1 1 0 8 0 3
100
";
        let mut out = Vec::new();
        let labeling = run(
            Cursor::new(raw),
            &mut out,
            &config(ClusterStrategy::KMeans, 2),
        )
        .unwrap();
        assert_eq!(labeling.labeled.len(), 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1 1 features:0 1 1 0 1 0 3\n1 0\n1 1 features:0 1 1 0 8 0 3\n100 1\n"
        );

        let mut report = Vec::new();
        labeling.write_report(&mut report).unwrap();
        let report = String::from_utf8(report).unwrap();
        assert!(report.contains("Samples labeled: 2"));
        assert!(report.contains("case (untagged)"));
    }

    #[test]
    fn test_run_rejects_malformed_log() {
        let err = run(
            Cursor::new("1 1 0 1 1 0\n1\n"),
            Vec::new(),
            &LabelConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_feature());
    }

    #[test]
    fn test_choice_parsing() {
        assert_eq!(
            "gmm".parse::<ClusterStrategy>(),
            Ok(ClusterStrategy::GaussianMixture)
        );
        assert_eq!("key".parse::<Grouping>(), Ok(Grouping::StructuralKey));
        assert_eq!(CostScale::Raw.to_string(), "raw");
        assert!("median".parse::<ClusterStrategy>().is_err());
    }

    proptest! {
        /// Class means never decrease with class index.
        #[test]
        fn test_class_means_are_monotone(
            costs in vec(1e-6f64..1e3, 1..40),
            k in 1usize..6,
            mixture in any::<bool>(),
        ) {
            let input: Vec<Measurement> =
                costs.iter().map(|&c| unit(None, 1, c)).collect();
            let strategy = if mixture {
                ClusterStrategy::GaussianMixture
            } else {
                ClusterStrategy::KMeans
            };
            let labeling = label(input, &config(strategy, k)).unwrap();
            let means: Vec<f64> = labeling.groups[0]
                .mean_costs
                .iter()
                .flatten()
                .copied()
                .collect();
            for pair in means.windows(2) {
                prop_assert!(pair[0] <= pair[1], "means = {:?}", means);
            }
            // Empty classes only ever trail populated ones.
            let counts = &labeling.groups[0].counts;
            let populated = counts.iter().take_while(|&&c| c > 0).count();
            prop_assert!(counts[populated..].iter().all(|&c| c == 0));
        }
    }
}
