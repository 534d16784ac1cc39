//! Exact Shapley values for one decision tree (path-dependent TreeSHAP).
//!
//! The walk visits every node once per path. Each level keeps a small buffer
//! describing the unique features split on so far, together with the fraction of
//! training cover ("zero") and of this input ("one") that flows down the path.
//! Recursion depth equals the tree depth.

use crate::model::{Node, Tree};

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// Adds `scale * φ(tree, x)` into `phi`.
pub(crate) fn accumulate(tree: &Tree, x: &[f64], scale: f64, phi: &mut [f64]) {
    let walk = Walk { tree, x, scale };
    walk.recurse(0, &[], 1.0, 1.0, None, phi);
}

struct Walk<'a> {
    tree: &'a Tree,
    x: &'a [f64],
    scale: f64,
}

impl Walk<'_> {
    fn recurse(
        &self,
        node: usize,
        parent_path: &[PathElement],
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
        phi: &mut [f64],
    ) {
        let mut path = Vec::with_capacity(parent_path.len() + 1);
        path.extend_from_slice(parent_path);
        extend(&mut path, zero_fraction, one_fraction, feature);
        let depth = path.len() - 1;

        match *self.tree.node(node) {
            Node::Leaf { value, .. } => {
                for i in 1..=depth {
                    let element = path[i];
                    if let Some(f) = element.feature {
                        let w = unwound_path_sum(&path, i);
                        phi[f] += self.scale
                            * w
                            * (element.one_fraction - element.zero_fraction)
                            * value;
                    }
                }
            }
            Node::Split {
                feature: split,
                threshold,
                left,
                right,
                cover,
            } => {
                let (hot, cold) = if self.x[split] < threshold {
                    (left, right)
                } else {
                    (right, left)
                };
                let hot_zero = self.tree.node(hot).cover() / cover;
                let cold_zero = self.tree.node(cold).cover() / cover;

                // A feature already on the path is unwound so it is counted once.
                let mut incoming_zero = 1.0;
                let mut incoming_one = 1.0;
                if let Some(k) = (1..=depth).find(|&k| path[k].feature == Some(split)) {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind(&mut path, k);
                }

                self.recurse(
                    hot,
                    &path,
                    hot_zero * incoming_zero,
                    incoming_one,
                    Some(split),
                    phi,
                );
                self.recurse(
                    cold,
                    &path,
                    cold_zero * incoming_zero,
                    0.0,
                    Some(split),
                    phi,
                );
            }
        }
    }
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });

    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / denom;
    }
}

/// Removes `path[index]`, undoing its effect on the remaining weights.
fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denom = (depth + 1) as f64;

    let mut next_one_portion = path[depth].weight;
    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            next_one_portion =
                tmp - path[i].weight * zero_fraction * (depth - i) as f64 / denom;
        } else {
            path[i].weight = path[i].weight * denom / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.truncate(depth);
}

/// Total permutation weight of the path with `path[index]` removed.
fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denom = (depth + 1) as f64;

    let mut next_one_portion = path[depth].weight;
    let mut total = 0.0;
    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].weight - tmp * zero_fraction * ((depth - i) as f64 / denom);
        } else if zero_fraction != 0.0 {
            total += (path[i].weight / zero_fraction) / ((depth - i) as f64 / denom);
        }
    }
    total
}
