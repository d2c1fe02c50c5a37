use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rayon::prelude::*;
use tracing::debug;
use vsearch_core::{Descriptor, FeatureVector, DESCRIPTOR_LEN};

use crate::IndexConfig;
use crate::error::{IndexError, IndexResult};

/// Deepest tree the recursive search will walk
pub const MAX_DEPTH: usize = DESCRIPTOR_LEN;

/// Subsets at least this large compute split variances on the thread pool
const PARALLEL_VARIANCE_MIN: usize = 4096;

/// Tree node. Leaves carry no split dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexNode {
    /// Offset of the node's feature in `SpatialIndex::features`
    pub point: u32,
    pub split_dim: Option<usize>,
    pub split_value: f32,
    pub left: Option<u32>,
    pub right: Option<u32>,
}

impl IndexNode {
    /// Split dimension with leaves reported as -1
    pub fn split_dimension(&self) -> isize {
        self.split_dim.map_or(-1, |d| d as isize)
    }

    pub fn is_leaf(&self) -> bool {
        self.split_dim.is_none()
    }
}

/// One k-nearest-neighbour result
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    pub feature: &'a FeatureVector,
    /// Offset in `SpatialIndex::features`
    pub index: usize,
    /// Euclidean descriptor distance
    pub distance: f32,
}

/// Immutable KD-tree over feature descriptors.
///
/// Nodes refer to features by offset; the descriptors themselves are stored
/// once in `features`.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    features: Vec<FeatureVector>,
    nodes: Vec<IndexNode>,
    root: u32,
    depth: usize,
    config: IndexConfig,
}

struct WorkItem {
    start: usize,
    end: usize,
    depth: usize,
    parent: Option<(u32, bool)>,
}

impl SpatialIndex {
    /// Build the tree with median splits. Near the root the split dimension
    /// is the one of highest variance, deeper levels cycle through dimensions.
    pub fn build(features: Vec<FeatureVector>, config: IndexConfig) -> IndexResult<Self> {
        if features.is_empty() {
            return Err(IndexError::Empty);
        }

        let mut order: Vec<u32> = (0..features.len() as u32).collect();
        let mut nodes: Vec<IndexNode> = Vec::with_capacity(features.len());
        let mut max_depth = 0;
        let mut stack = vec![WorkItem {
            start: 0,
            end: features.len(),
            depth: 0,
            parent: None,
        }];

        while let Some(item) = stack.pop() {
            if item.depth >= MAX_DEPTH {
                return Err(IndexError::DepthExceeded {
                    depth: item.depth + 1,
                    limit: MAX_DEPTH,
                });
            }
            max_depth = max_depth.max(item.depth + 1);
            let subset = &mut order[item.start..item.end];

            let node_id = nodes.len() as u32;
            let node = if subset.len() == 1 {
                IndexNode {
                    point: subset[0],
                    split_dim: None,
                    split_value: 0.0,
                    left: None,
                    right: None,
                }
            } else {
                let dim = if item.depth < config.variance_split_depth {
                    Self::highest_variance_dim(&features, subset)
                } else {
                    item.depth % DESCRIPTOR_LEN
                };
                let mid = subset.len() / 2;
                subset.select_nth_unstable_by(mid, |&a, &b| {
                    features[a as usize].descriptor[dim]
                        .total_cmp(&features[b as usize].descriptor[dim])
                        .then(a.cmp(&b))
                });
                let point = subset[mid];

                let median = item.start + mid;
                if median > item.start {
                    stack.push(WorkItem {
                        start: item.start,
                        end: median,
                        depth: item.depth + 1,
                        parent: Some((node_id, true)),
                    });
                }
                if median + 1 < item.end {
                    stack.push(WorkItem {
                        start: median + 1,
                        end: item.end,
                        depth: item.depth + 1,
                        parent: Some((node_id, false)),
                    });
                }

                IndexNode {
                    point,
                    split_dim: Some(dim),
                    split_value: features[point as usize].descriptor[dim],
                    left: None,
                    right: None,
                }
            };
            nodes.push(node);

            if let Some((parent, is_left)) = item.parent {
                let parent = &mut nodes[parent as usize];
                if is_left {
                    parent.left = Some(node_id);
                } else {
                    parent.right = Some(node_id);
                }
            }
        }

        debug!(
            features = features.len(),
            depth = max_depth,
            "spatial index built"
        );

        Ok(Self {
            features,
            nodes,
            root: 0,
            depth: max_depth,
            config,
        })
    }

    /// Dimension of largest variance over the subset; ties resolve to the lowest dimension
    fn highest_variance_dim(features: &[FeatureVector], subset: &[u32]) -> usize {
        let n = subset.len() as f64;
        let variance = |dim: usize| {
            let (sum, sum_sq) = subset.iter().fold((0.0f64, 0.0f64), |(s, sq), &i| {
                let v = features[i as usize].descriptor[dim] as f64;
                (s + v, sq + v * v)
            });
            let mean = sum / n;
            sum_sq / n - mean * mean
        };

        let variances: Vec<f64> = if subset.len() >= PARALLEL_VARIANCE_MIN {
            (0..DESCRIPTOR_LEN).into_par_iter().map(variance).collect()
        } else {
            (0..DESCRIPTOR_LEN).map(variance).collect()
        };

        variances
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (dim, &v)| if v > best.1 { (dim, v) } else { best })
            .0
    }

    /// The `k` nearest features, nearest first. Exact unless `max_checks` is configured.
    pub fn knn(&self, query: &Descriptor, k: usize) -> Vec<Neighbor<'_>> {
        if k == 0 {
            return Vec::new();
        }

        let mut search = KnnSearch {
            query,
            k,
            heap: BinaryHeap::with_capacity(k + 1),
            checks_left: self.config.max_checks.unwrap_or(usize::MAX),
        };
        self.search(self.root, &mut search);

        search
            .heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| Neighbor {
                feature: &self.features[entry.index as usize],
                index: entry.index as usize,
                distance: entry.distance.sqrt(),
            })
            .collect()
    }

    fn search(&self, node_id: u32, search: &mut KnnSearch<'_>) {
        if search.checks_left == 0 {
            return;
        }
        search.checks_left -= 1;

        let node = &self.nodes[node_id as usize];
        let distance = self.features[node.point as usize].squared_distance(search.query);
        search.offer(HeapEntry {
            distance,
            index: node.point,
        });

        let Some(dim) = node.split_dim else {
            return;
        };
        let diff = search.query[dim] - node.split_value;
        let (near, far) = if diff <= 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(near) = near {
            self.search(near, search);
        }
        if let Some(far) = far {
            if search.heap.len() < search.k || diff * diff < search.worst() {
                self.search(far, search);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of levels from root to deepest leaf
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn features(&self) -> &[FeatureVector] {
        &self.features
    }

    pub fn nodes(&self) -> &[IndexNode] {
        &self.nodes
    }

    pub fn root(&self) -> &IndexNode {
        &self.nodes[self.root as usize]
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }
}

/// Bounded max-heap state threaded through one query
struct KnnSearch<'q> {
    query: &'q Descriptor,
    k: usize,
    heap: BinaryHeap<HeapEntry>,
    checks_left: usize,
}

impl KnnSearch<'_> {
    fn offer(&mut self, entry: HeapEntry) {
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if entry < *worst {
                *worst = entry;
            }
        }
    }

    fn worst(&self) -> f32 {
        self.heap.peek().map_or(f32::INFINITY, |e| e.distance)
    }
}

/// Squared distance ordered with ties broken by feature offset
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    distance: f32,
    index: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.index.cmp(&other.index))
    }
}
