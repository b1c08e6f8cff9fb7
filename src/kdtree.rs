//! Nearest-neighbor index over glyph average colors.
//!
//! A small fixed-dimension (3, one per RGB channel) k-d tree. The tree is
//! built once per [`GlyphIndex`](crate::GlyphIndex) and queried once per
//! character cell, so build cost is irrelevant next to query cost.

use std::str::FromStr;

use crate::error::CastError;

/// Lp norm used to rank candidate glyph colors against a target pixel color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    /// L1 norm (p = 1).
    #[default]
    Manhattan,
    /// L2 norm (p = 2).
    Euclidean,
}

impl FromStr for DistanceMetric {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manhattan" => Ok(Self::Manhattan),
            "euclidean" => Ok(Self::Euclidean),
            other => Err(CastError::InvalidDistanceMetric(other.to_string())),
        }
    }
}

impl DistanceMetric {
    /// Comparable cost between two points. Euclidean skips the square root:
    /// ranking is unchanged and the axis bound below stays consistent.
    fn cost(self, a: [f32; 3], b: [f32; 3]) -> f32 {
        match self {
            Self::Manhattan => {
                (a[0] - b[0]).abs() + (a[1] - b[1]).abs() + (a[2] - b[2]).abs()
            }
            Self::Euclidean => {
                let d = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
                d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
            }
        }
    }

    /// Lower bound on the cost of any point on the far side of a splitting
    /// plane `diff` away along one axis.
    fn axis_cost(self, diff: f32) -> f32 {
        match self {
            Self::Manhattan => diff.abs(),
            Self::Euclidean => diff * diff,
        }
    }
}

const NONE: i32 = -1;

struct Node {
    point: [f32; 3],
    /// Caller-supplied payload, resolved back to a character by the owner.
    item: u32,
    axis: u8,
    left: i32,
    right: i32,
}

/// Immutable 3-d tree supporting exact nearest-neighbor queries under
/// either supported metric.
pub struct KdTree {
    nodes: Vec<Node>,
    root: i32,
}

impl KdTree {
    /// Builds a tree from `(point, payload)` pairs.
    pub fn build(points: Vec<([f32; 3], u32)>) -> Self {
        let mut nodes = Vec::with_capacity(points.len());
        let mut items = points;
        let root = Self::build_rec(&mut nodes, &mut items, 0);
        Self { nodes, root }
    }

    fn build_rec(nodes: &mut Vec<Node>, items: &mut [([f32; 3], u32)], depth: u8) -> i32 {
        if items.is_empty() {
            return NONE;
        }
        let axis = depth % 3;
        let mid = items.len() / 2;
        items.select_nth_unstable_by(mid, |a, b| {
            a.0[axis as usize].total_cmp(&b.0[axis as usize])
        });
        let (point, item) = items[mid];
        let id = nodes.len() as i32;
        nodes.push(Node {
            point,
            item,
            axis,
            left: NONE,
            right: NONE,
        });
        let (lo, rest) = items.split_at_mut(mid);
        let hi = &mut rest[1..];
        let left = Self::build_rec(nodes, lo, depth + 1);
        let right = Self::build_rec(nodes, hi, depth + 1);
        let node = &mut nodes[id as usize];
        node.left = left;
        node.right = right;
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Payload of the point nearest to `target`, or `None` for an empty tree.
    pub fn nearest(&self, target: [f32; 3], metric: DistanceMetric) -> Option<u32> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best = (f32::INFINITY, 0u32);
        self.nearest_rec(self.root, target, metric, &mut best);
        Some(best.1)
    }

    fn nearest_rec(
        &self,
        id: i32,
        target: [f32; 3],
        metric: DistanceMetric,
        best: &mut (f32, u32),
    ) {
        if id == NONE {
            return;
        }
        let node = &self.nodes[id as usize];
        let cost = metric.cost(node.point, target);
        if cost < best.0 {
            *best = (cost, node.item);
        }
        let axis = node.axis as usize;
        let diff = target[axis] - node.point[axis];
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        self.nearest_rec(near, target, metric, best);
        if metric.axis_cost(diff) < best.0 {
            self.nearest_rec(far, target, metric, best);
        }
    }
}
