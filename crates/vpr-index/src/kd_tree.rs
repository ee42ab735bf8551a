use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Arena node of the tree. Leaves reference a range of `KdTree::order`.
#[derive(Debug, Clone)]
enum Node {
    Leaf {
        start: usize,
        end: usize,
    },
    Split {
        dim: usize,
        value: f32,
        left: usize,
        right: usize,
    },
}

/// A point of the tree together with its squared distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Neighbor {
    /// Row of the point in the data matrix.
    pub index: usize,
    /// Tie-break key, smaller wins on equal distance.
    pub key: u32,
    /// Squared Euclidean distance.
    pub dist_sq: f32,
}

impl Neighbor {
    fn closer_than(&self, other: &Neighbor) -> bool {
        match self.dist_sq.total_cmp(&other.dist_sq) {
            Ordering::Less => true,
            Ordering::Equal => self.key < other.key,
            Ordering::Greater => false,
        }
    }
}

/// Pending branch in best-bin-first order: smallest lower bound first.
#[derive(Debug, PartialEq)]
struct Branch {
    bound: f32,
    node: usize,
}

impl Eq for Branch {}

impl Ord for Branch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bound
            .total_cmp(&other.bound)
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for Branch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// K-d tree over a dense row-major `f32` matrix.
///
/// Splits on the dimension of largest spread at the median; leaves hold up to
/// `leaf_size` rows.
#[derive(Debug, Clone)]
pub(crate) struct KdTree {
    nodes: Vec<Node>,
    order: Vec<usize>,
    root: usize,
}

impl KdTree {
    pub fn build(data: &[f32], dim: usize, leaf_size: usize) -> Self {
        let rows = data.len() / dim;
        let mut tree = Self {
            nodes: Vec::with_capacity(2 * rows / leaf_size.max(1) + 1),
            order: (0..rows).collect(),
            root: 0,
        };
        tree.root = tree.build_node(data, dim, leaf_size.max(1), 0, rows);
        tree
    }

    fn build_node(
        &mut self,
        data: &[f32],
        dim: usize,
        leaf_size: usize,
        start: usize,
        end: usize,
    ) -> usize {
        if end - start <= leaf_size {
            return self.push(Node::Leaf { start, end });
        }

        // dimension of largest spread
        let mut split_dim = 0;
        let mut best_spread = 0.0f32;
        for d in 0..dim {
            let (lo, hi) = self.order[start..end]
                .iter()
                .map(|&i| data[i * dim + d])
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            if hi - lo > best_spread {
                best_spread = hi - lo;
                split_dim = d;
            }
        }
        if best_spread <= 0.0 {
            // all rows identical
            return self.push(Node::Leaf { start, end });
        }

        self.order[start..end].sort_by(|&a, &b| {
            data[a * dim + split_dim]
                .total_cmp(&data[b * dim + split_dim])
                .then(a.cmp(&b))
        });
        let mid = start + (end - start) / 2;
        let value = data[self.order[mid] * dim + split_dim];

        let node = self.push(Node::Leaf { start, end });
        let left = self.build_node(data, dim, leaf_size, start, mid);
        let right = self.build_node(data, dim, leaf_size, mid, end);
        self.nodes[node] = Node::Split {
            dim: split_dim,
            value,
            left,
            right,
        };
        node
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// The two nearest rows to `query`, nearest first.
    ///
    /// `keys[row]` breaks ties between equidistant rows. With `max_checks`
    /// set, the search stops after that many rows have been compared and the
    /// result is approximate.
    pub fn nearest_two(
        &self,
        data: &[f32],
        dim: usize,
        keys: &[u32],
        query: &[f32],
        max_checks: Option<usize>,
    ) -> (Option<Neighbor>, Option<Neighbor>) {
        let mut best: [Option<Neighbor>; 2] = [None, None];
        let mut checks = 0usize;
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(Branch {
            bound: 0.0,
            node: self.root,
        }));

        while let Some(Reverse(Branch { bound, node })) = heap.pop() {
            if let Some(worst) = &best[1] {
                if bound > worst.dist_sq {
                    break;
                }
            }
            if let Some(limit) = max_checks {
                if checks >= limit && best[0].is_some() {
                    break;
                }
            }

            // descend to a leaf, queueing the far side of every split
            let mut current = node;
            loop {
                match &self.nodes[current] {
                    Node::Split {
                        dim: d,
                        value,
                        left,
                        right,
                    } => {
                        let diff = query[*d] - value;
                        let (near, far) = if diff < 0.0 {
                            (*left, *right)
                        } else {
                            (*right, *left)
                        };
                        heap.push(Reverse(Branch {
                            bound: bound.max(diff * diff),
                            node: far,
                        }));
                        current = near;
                    }
                    Node::Leaf { start, end } => {
                        for &row in &self.order[*start..*end] {
                            let candidate = Neighbor {
                                index: row,
                                key: keys[row],
                                dist_sq: squared_distance(&data[row * dim..(row + 1) * dim], query),
                            };
                            insert_best(&mut best, candidate);
                        }
                        checks += end - start;
                        break;
                    }
                }
            }
        }

        (best[0], best[1])
    }
}

fn insert_best(best: &mut [Option<Neighbor>; 2], candidate: Neighbor) {
    match best[0] {
        None => best[0] = Some(candidate),
        Some(first) if candidate.closer_than(&first) => {
            best[1] = Some(first);
            best[0] = Some(candidate);
        }
        Some(_) => match best[1] {
            Some(second) if !candidate.closer_than(&second) => {}
            _ => best[1] = Some(candidate),
        },
    }
}

#[inline]
pub(crate) fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
