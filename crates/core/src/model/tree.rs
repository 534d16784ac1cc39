use crate::error::ModelError;
use serde::{Deserialize, Serialize};

/// Relative tolerance for `cover(parent) == cover(left) + cover(right)`.
const COVER_TOLERANCE: f64 = 1e-6;

/// One arena slot. Children are indices into the same tree's node array.
///
/// `cover` is the (weighted) number of training rows that reached the node; the
/// attribution engine uses it as the reference distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Self::Split { cover, .. } | Self::Leaf { cover, .. } => *cover,
        }
    }
}

/// A decision tree stored as an arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Checks that the arena is a well-formed tree over `feature_count` inputs.
    ///
    /// Children must sit after their parent, so the arena can't contain cycles, and
    /// every non-root node must have exactly one parent.
    pub fn validate(&self, feature_count: usize) -> Result<(), ModelError> {
        let invalid = |msg: String| Err(ModelError::InvalidArtifact(msg));

        if self.nodes.is_empty() {
            return invalid("tree has no nodes".to_string());
        }

        let mut parents = vec![0usize; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            let cover = node.cover();
            if !cover.is_finite() || cover <= 0.0 {
                return invalid(format!("node {index} has non-positive cover {cover}"));
            }

            match *node {
                Node::Leaf { value, .. } => {
                    if !value.is_finite() {
                        return invalid(format!("leaf {index} has non-finite value"));
                    }
                }
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    cover,
                } => {
                    if feature >= feature_count {
                        return invalid(format!(
                            "node {index} splits on feature {feature}, model has {feature_count}"
                        ));
                    }
                    if !threshold.is_finite() {
                        return invalid(format!("node {index} has non-finite threshold"));
                    }
                    for child in [left, right] {
                        if child <= index || child >= self.nodes.len() {
                            return invalid(format!(
                                "node {index} points at child {child} outside ({index}, {})",
                                self.nodes.len()
                            ));
                        }
                        parents[child] += 1;
                    }
                    if left == right {
                        return invalid(format!("node {index} has identical children"));
                    }

                    let children = self.nodes[left].cover() + self.nodes[right].cover();
                    if (children - cover).abs() > COVER_TOLERANCE * cover {
                        return invalid(format!(
                            "node {index} cover {cover} differs from its children's {children}"
                        ));
                    }
                }
            }
        }

        if let Some(orphan) = (1..self.nodes.len()).find(|&i| parents[i] != 1) {
            return invalid(format!(
                "node {orphan} has {} parents; expected exactly one",
                parents[orphan]
            ));
        }

        Ok(())
    }

    /// Leaf value reached by `x`. Assumes [`Tree::validate`] passed.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                Node::Leaf { value, .. } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if x[feature] < threshold { left } else { right };
                }
            }
        }
    }

    /// Cover-weighted mean leaf value: the tree's output with no feature known.
    pub fn expected_value(&self) -> f64 {
        let root = self.nodes[0].cover();
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Leaf { value, cover } => Some(value * cover),
                Node::Split { .. } => None,
            })
            .sum::<f64>()
            / root
    }
}
