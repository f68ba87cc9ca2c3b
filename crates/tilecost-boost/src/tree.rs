//! Regression tree storage and depth-wise growth.

use serde::{Deserialize, Serialize};

use crate::BoostParams;

/// Gains at or below this are treated as no improvement.
const MIN_GAIN: f64 = 1e-12;

/// One node of a flattened tree. Children are indices into `Tree::nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A regression tree; leaf values already include the learning rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Checks the layout `predict` relies on: a root exists, every split
    /// reads a feature below `num_features`, and children come after
    /// their parent, so every walk ends at a leaf.
    pub(crate) fn check(&self, num_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        let len = self.nodes.len();
        for (idx, node) in self.nodes.iter().enumerate() {
            let Node::Split {
                feature,
                left,
                right,
                ..
            } = *node
            else {
                continue;
            };
            if feature >= num_features {
                return Err(format!(
                    "node {idx} splits on feature {feature} of {num_features}"
                ));
            }
            for child in [left, right] {
                if child <= idx || child >= len {
                    return Err(format!(
                        "node {idx} has child {child} outside {}..{len}",
                        idx + 1
                    ));
                }
            }
        }
        Ok(())
    }

    /// Walks from the root: `features[f] < threshold` goes left.
    pub(crate) fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if features[feature] < threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

/// Grows one tree on the current gradients.
///
/// With a squared-error objective every hessian is 1, so a node's hessian
/// sum is its row count.
pub(crate) struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    gradients: &'a [f64],
    features: &'a [usize],
    params: &'a BoostParams,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl<'a> TreeBuilder<'a> {
    pub(crate) fn new(
        rows: &'a [Vec<f64>],
        gradients: &'a [f64],
        features: &'a [usize],
        params: &'a BoostParams,
    ) -> Self {
        Self {
            rows,
            gradients,
            features,
            params,
            nodes: Vec::new(),
        }
    }

    /// Builds a tree over the sampled row indices.
    pub(crate) fn build(mut self, sample: &mut [usize]) -> Tree {
        self.grow(sample, 0);
        Tree { nodes: self.nodes }
    }

    fn grow(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let grad_sum: f64 = indices.iter().map(|&i| self.gradients[i]).sum();
        #[expect(
            clippy::cast_precision_loss,
            reason = "row counts only need approximate precision"
        )]
        let hess_sum = indices.len() as f64;

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.leaf_value(grad_sum, hess_sum),
        });

        if depth >= self.params.max_depth || indices.len() < 2 {
            return idx;
        }
        let Some(best) = self.best_split(indices, grad_sum, hess_sum) else {
            return idx;
        };

        let mid = partition(indices, |i| {
            self.rows[i][best.feature] < best.threshold
        });
        let (left_rows, right_rows) = indices.split_at_mut(mid);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    /// Exact greedy search over every sampled feature.
    fn best_split(
        &self,
        indices: &[usize],
        grad_sum: f64,
        hess_sum: f64,
    ) -> Option<BestSplit> {
        let parent_score = self.score(grad_sum, hess_sum);
        let min_weight = self.params.min_child_weight;
        let mut best: Option<BestSplit> = None;
        let mut order: Vec<usize> = indices.to_vec();

        for &feature in self.features {
            order.sort_by(|&a, &b| {
                self.rows[a][feature].total_cmp(&self.rows[b][feature])
            });

            let mut left_grad = 0.0;
            for k in 1..order.len() {
                left_grad += self.gradients[order[k - 1]];
                let prev = self.rows[order[k - 1]][feature];
                let next = self.rows[order[k]][feature];
                if prev >= next {
                    continue;
                }

                #[expect(
                    clippy::cast_precision_loss,
                    reason = "row counts only need approximate precision"
                )]
                let left_hess = k as f64;
                let right_hess = hess_sum - left_hess;
                if left_hess < min_weight || right_hess < min_weight {
                    continue;
                }

                let gain = self.score(left_grad, left_hess)
                    + self.score(grad_sum - left_grad, right_hess)
                    - parent_score;
                if gain > MIN_GAIN
                    && best.as_ref().is_none_or(|b| gain > b.gain)
                {
                    best = Some(BestSplit {
                        feature,
                        threshold: prev + (next - prev) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }

    /// Structure score `T(G)^2 / (H + lambda)`.
    fn score(&self, grad: f64, hess: f64) -> f64 {
        let t = threshold_l1(grad, self.params.alpha);
        t * t / (hess + self.params.lambda)
    }

    /// Optimal leaf weight `-T(G) / (H + lambda)`, scaled by eta.
    fn leaf_value(&self, grad: f64, hess: f64) -> f64 {
        let weight =
            -threshold_l1(grad, self.params.alpha) / (hess + self.params.lambda);
        weight * self.params.eta
    }
}

/// Soft-thresholds a gradient sum by the L1 penalty.
fn threshold_l1(grad: f64, alpha: f64) -> f64 {
    if grad > alpha {
        grad - alpha
    } else if grad < -alpha {
        grad + alpha
    } else {
        0.0
    }
}

/// Moves entries satisfying `pred` to the front; returns their count.
fn partition(indices: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for i in 0..indices.len() {
        if pred(indices[i]) {
            indices.swap(mid, i);
            mid += 1;
        }
    }
    mid
}
