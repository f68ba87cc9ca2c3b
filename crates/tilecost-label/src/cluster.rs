//! One-dimensional clustering strategies and class re-ranking.

use std::cmp::Ordering;

/// Assigns 1-D values to `k` clusters.
///
/// Cluster indices returned by an implementation carry no meaning beyond
/// identity; [`rank_clusters`] turns them into ordered classes.
pub trait Cluster {
    /// Returns one raw cluster index in `0..k` per value.
    fn assign(&self, values: &[f64], k: usize) -> Vec<usize>;
}

/// Lloyd's k-means on a line.
///
/// Initial centers are spread over the quantiles of the distinct values, so
/// the result is deterministic. With fewer distinct values than clusters,
/// the surplus clusters stay empty.
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Stop once no center moves further than this.
    pub tolerance: f64,
}

/// Fitted k-means state.
#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// Raw cluster per value.
    pub assignments: Vec<usize>,
    /// Final centers; an empty cluster keeps its initial center.
    pub centers: Vec<f64>,
}

impl KMeans {
    /// Runs k-means and returns assignments with centers.
    pub fn fit(&self, values: &[f64], k: usize) -> KMeansFit {
        let mut centers = initial_centers(values, k);
        let mut assignments = nearest(values, &centers);

        for _ in 0..self.max_iterations {
            let mut sums = vec![0.0; k];
            let mut counts = vec![0usize; k];
            for (&v, &c) in values.iter().zip(&assignments) {
                sums[c] += v;
                counts[c] += 1;
            }

            let mut shift = 0.0f64;
            for ((center, sum), count) in
                centers.iter_mut().zip(&sums).zip(&counts)
            {
                if *count == 0 {
                    continue;
                }
                #[expect(
                    clippy::cast_precision_loss,
                    reason = "cluster sizes only need approximate precision"
                )]
                let mean = sum / *count as f64;
                shift = shift.max((mean - *center).abs());
                *center = mean;
            }

            assignments = nearest(values, &centers);
            if shift <= self.tolerance {
                break;
            }
        }

        KMeansFit {
            assignments,
            centers,
        }
    }
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            tolerance: 1e-9,
        }
    }
}

impl Cluster for KMeans {
    fn assign(&self, values: &[f64], k: usize) -> Vec<usize> {
        self.fit(values, k).assignments
    }
}

/// Gaussian mixture on a line, fitted with expectation-maximization.
///
/// Components start from a k-means fit. Each value is then hard-assigned
/// to the component with the highest responsibility.
#[derive(Debug, Clone, Copy)]
pub struct GaussianMixture {
    /// EM iteration cap.
    pub max_iterations: usize,
    /// Stop once the mean log-likelihood improves by less than this.
    pub tolerance: f64,
    /// Added to every variance so point masses stay finite.
    pub reg_covar: f64,
}

impl Default for GaussianMixture {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-3,
            reg_covar: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Component {
    weight: f64,
    mean: f64,
    variance: f64,
}

impl Component {
    fn log_density(&self, x: f64) -> f64 {
        let diff = x - self.mean;
        self.weight.max(f64::MIN_POSITIVE).ln()
            - 0.5 * (std::f64::consts::TAU * self.variance).ln()
            - diff * diff / (2.0 * self.variance)
    }
}

impl GaussianMixture {
    fn init(&self, values: &[f64], k: usize) -> Vec<Component> {
        let kmeans = KMeans::default().fit(values, k);
        let overall = variance(values, mean(values));
        #[expect(
            clippy::cast_precision_loss,
            reason = "sample counts only need approximate precision"
        )]
        let n = values.len() as f64;

        (0..k)
            .map(|j| {
                let members: Vec<f64> = values
                    .iter()
                    .zip(&kmeans.assignments)
                    .filter(|&(_, &c)| c == j)
                    .map(|(&v, _)| v)
                    .collect();
                let center = kmeans.centers[j];
                let spread = if members.len() < 2 {
                    overall
                } else {
                    variance(&members, center)
                };
                #[expect(
                    clippy::cast_precision_loss,
                    reason = "sample counts only need approximate precision"
                )]
                let weight = members.len() as f64 / n;
                Component {
                    weight,
                    mean: center,
                    variance: spread + self.reg_covar,
                }
            })
            .collect()
    }

    /// Runs EM and returns the hard assignment per value.
    fn fit(&self, values: &[f64], k: usize) -> Vec<usize> {
        let mut components = self.init(values, k);
        let mut resp = vec![vec![0.0; k]; values.len()];
        let mut prev_ll = f64::NEG_INFINITY;
        #[expect(
            clippy::cast_precision_loss,
            reason = "sample counts only need approximate precision"
        )]
        let n = values.len() as f64;

        for _ in 0..self.max_iterations {
            // E-step.
            let mut ll = 0.0;
            for (row, &x) in resp.iter_mut().zip(values) {
                for (r, c) in row.iter_mut().zip(&components) {
                    *r = c.log_density(x);
                }
                let lse = log_sum_exp(row);
                for r in row.iter_mut() {
                    *r = (*r - lse).exp();
                }
                ll += lse;
            }
            ll /= n;

            // M-step. Components with no responsibility keep their
            // parameters; only their weight drops.
            for (j, component) in components.iter_mut().enumerate() {
                let mass: f64 = resp.iter().map(|row| row[j]).sum();
                component.weight = mass / n;
                if mass <= f64::EPSILON {
                    continue;
                }
                let mu = resp
                    .iter()
                    .zip(values)
                    .map(|(row, &x)| row[j] * x)
                    .sum::<f64>()
                    / mass;
                let var = resp
                    .iter()
                    .zip(values)
                    .map(|(row, &x)| row[j] * (x - mu).powi(2))
                    .sum::<f64>()
                    / mass;
                component.mean = mu;
                component.variance = var + self.reg_covar;
            }

            if (ll - prev_ll).abs() < self.tolerance {
                break;
            }
            prev_ll = ll;
        }

        values
            .iter()
            .map(|&x| {
                components
                    .iter()
                    .map(|c| c.log_density(x))
                    .enumerate()
                    .max_by(|(ia, a), (ib, b)| {
                        // Prefer the lower index on ties.
                        a.total_cmp(b).then_with(|| ib.cmp(ia))
                    })
                    .map_or(0, |(j, _)| j)
            })
            .collect()
    }
}

impl Cluster for GaussianMixture {
    fn assign(&self, values: &[f64], k: usize) -> Vec<usize> {
        self.fit(values, k)
    }
}

/// Maps raw cluster indices to classes ordered by ascending mean cost.
///
/// `costs` are the raw normalized costs the ordering is based on, one per
/// assignment. Returns `rank[raw] = class`. Empty clusters have no mean and
/// are ranked after every populated cluster.
pub fn rank_clusters(
    assignments: &[usize],
    costs: &[f64],
    k: usize,
) -> Vec<usize> {
    let means = cluster_means(assignments, costs, k);
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| match (means[a], means[b]) {
        (Some(x), Some(y)) => x.total_cmp(&y).then(a.cmp(&b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(&b),
    });
    let mut rank = vec![0; k];
    for (class, raw) in order.into_iter().enumerate() {
        rank[raw] = class;
    }
    rank
}

/// Mean of `costs` per cluster; `None` for clusters with no members.
#[expect(
    clippy::cast_precision_loss,
    reason = "cluster sizes only need approximate precision"
)]
pub fn cluster_means(
    assignments: &[usize],
    costs: &[f64],
    k: usize,
) -> Vec<Option<f64>> {
    let mut sums = vec![0.0; k];
    let mut counts = vec![0usize; k];
    for (&c, &cost) in assignments.iter().zip(costs) {
        sums[c] += cost;
        counts[c] += 1;
    }
    sums.into_iter()
        .zip(counts)
        .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
        .collect()
}

fn initial_centers(values: &[f64], k: usize) -> Vec<f64> {
    let mut distinct = values.to_vec();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();

    let d = distinct.len();
    if d == 0 {
        return vec![0.0; k];
    }
    if d <= k {
        let last = distinct[d - 1];
        distinct.resize(k, last);
        return distinct;
    }
    if k == 1 {
        return vec![distinct[d / 2]];
    }
    (0..k).map(|i| distinct[i * (d - 1) / (k - 1)]).collect()
}

/// Nearest center per value; ties go to the lower index.
fn nearest(values: &[f64], centers: &[f64]) -> Vec<usize> {
    values
        .iter()
        .map(|&v| {
            let mut best = 0;
            for (j, &c) in centers.iter().enumerate().skip(1) {
                if (v - c).abs() < (v - centers[best]).abs() {
                    best = j;
                }
            }
            best
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[expect(
        clippy::cast_precision_loss,
        reason = "sample counts only need approximate precision"
    )]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

fn variance(values: &[f64], center: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[expect(
        clippy::cast_precision_loss,
        reason = "sample counts only need approximate precision"
    )]
    let n = values.len() as f64;
    values.iter().map(|v| (v - center).powi(2)).sum::<f64>() / n
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}
