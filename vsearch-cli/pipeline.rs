use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use vsearch_core::{FeatureVector, ImageId};
use vsearch_index::Neighbor;
use vsearch_verify::{Candidate, Correspondence};

use crate::error::{SearchError, SearchResult};

/// Stages of one query, executed strictly in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Extract,
    IndexLookup,
    Aggregate,
    Verify,
    Rank,
    Done,
}

impl PipelineStage {
    pub fn next(self) -> Self {
        match self {
            PipelineStage::Extract => PipelineStage::IndexLookup,
            PipelineStage::IndexLookup => PipelineStage::Aggregate,
            PipelineStage::Aggregate => PipelineStage::Verify,
            PipelineStage::Verify => PipelineStage::Rank,
            PipelineStage::Rank | PipelineStage::Done => PipelineStage::Done,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Extract => "EXTRACT",
            PipelineStage::IndexLookup => "INDEX_LOOKUP",
            PipelineStage::Aggregate => "AGGREGATE",
            PipelineStage::Verify => "VERIFY",
            PipelineStage::Rank => "RANK",
            PipelineStage::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation flag shared between a query and its caller
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Fail with `Cancelled(stage)` if cancellation was requested before `stage` starts
    pub fn checkpoint(&self, stage: PipelineStage) -> SearchResult<()> {
        if self.is_cancelled() {
            Err(SearchError::Cancelled(stage))
        } else {
            Ok(())
        }
    }
}

/// Caller-supplied per-query options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryOptions {
    /// Results scoring below this are dropped. Values above 1 return nothing.
    pub similarity_threshold: f32,
    pub max_results: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.0,
            max_results: 10,
        }
    }
}

impl QueryOptions {
    pub fn new(similarity_threshold: f32, max_results: usize) -> Self {
        Self {
            similarity_threshold,
            max_results,
        }
    }

    pub fn validate(&self) -> SearchResult<()> {
        if !(self.similarity_threshold.is_finite() && self.similarity_threshold >= 0.0) {
            return Err(SearchError::InvalidOptions(format!(
                "similarity_threshold must be a non-negative number, got {}",
                self.similarity_threshold
            )));
        }
        if self.max_results == 0 {
            return Err(SearchError::InvalidOptions("max_results must be at least 1".into()));
        }
        Ok(())
    }
}

/// Group KNN results by owning image.
///
/// Per (query feature, image) only the nearest neighbour counts, and each
/// indexed feature is claimed by at most one query feature, the nearest.
/// Neighbours beyond `max_distance` are ignored.
pub fn aggregate_candidates(
    query_features: &[FeatureVector],
    neighbors: &[Vec<Neighbor<'_>>],
    max_distance: f32,
) -> Vec<Candidate> {
    // indexed feature -> best correspondence claiming it
    let mut claims: HashMap<usize, (ImageId, Correspondence)> = HashMap::new();

    for (qi, (query, found)) in query_features.iter().zip(neighbors).enumerate() {
        let mut seen_owners: Vec<ImageId> = Vec::with_capacity(found.len());
        for n in found.iter().filter(|n| n.distance <= max_distance) {
            if seen_owners.contains(&n.feature.owner) {
                continue;
            }
            seen_owners.push(n.feature.owner);

            let candidate = Correspondence {
                query: query.position(),
                indexed: n.feature.position(),
                distance: n.distance,
                query_feature: qi,
                indexed_feature: n.index,
            };
            claims
                .entry(n.index)
                .and_modify(|(_, existing)| {
                    if (candidate.distance, candidate.query_feature) < (existing.distance, existing.query_feature) {
                        *existing = candidate;
                    }
                })
                .or_insert((n.feature.owner, candidate));
        }
    }

    let mut by_image: BTreeMap<ImageId, Vec<Correspondence>> = BTreeMap::new();
    for (owner, corr) in claims.into_values() {
        by_image.entry(owner).or_default().push(corr);
    }

    by_image
        .into_iter()
        .map(|(image_id, mut correspondences)| {
            correspondences.sort_by_key(|c| (c.query_feature, c.indexed_feature));
            Candidate {
                image_id,
                correspondences,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsearch_core::DESCRIPTOR_LEN;

    fn create_test_feature(x: f32, owner: ImageId) -> FeatureVector {
        FeatureVector {
            x,
            y: x * 2.0,
            scale: 1.0,
            orientation: 0.0,
            descriptor: [0.0; DESCRIPTOR_LEN],
            owner,
        }
    }

    #[test]
    fn test_stage_order() {
        let mut stage = PipelineStage::Extract;
        let mut seen = vec![stage];
        while stage != PipelineStage::Done {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[1].to_string(), "INDEX_LOOKUP");
    }

    #[test]
    fn test_cancellation_checkpoint() {
        let token = CancellationToken::new();
        assert!(token.checkpoint(PipelineStage::Verify).is_ok());
        token.clone().cancel();
        assert!(matches!(
            token.checkpoint(PipelineStage::Verify),
            Err(SearchError::Cancelled(PipelineStage::Verify))
        ));
    }

    #[test]
    fn test_query_options_validation() {
        assert!(QueryOptions::default().validate().is_ok());
        assert!(QueryOptions::new(1.1, 5).validate().is_ok());
        assert!(QueryOptions::new(-0.1, 5).validate().is_err());
        assert!(QueryOptions::new(f32::NAN, 5).validate().is_err());
        assert!(matches!(
            QueryOptions::new(0.5, 0).validate(),
            Err(SearchError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_aggregation_rules() {
        let indexed = vec![
            create_test_feature(1.0, 10),
            create_test_feature(2.0, 10),
            create_test_feature(3.0, 20),
        ];
        let queries = vec![create_test_feature(5.0, 0), create_test_feature(6.0, 0)];
        let neighbors = vec![
            // Two neighbours in image 10: only the nearest counts
            vec![
                Neighbor { feature: &indexed[0], index: 0, distance: 0.1 },
                Neighbor { feature: &indexed[1], index: 1, distance: 0.2 },
                Neighbor { feature: &indexed[2], index: 2, distance: 0.3 },
            ],
            // Competes for indexed feature 0 with a worse distance; image 20 is too far
            vec![
                Neighbor { feature: &indexed[0], index: 0, distance: 0.15 },
                Neighbor { feature: &indexed[2], index: 2, distance: 0.9 },
            ],
        ];

        let candidates = aggregate_candidates(&queries, &neighbors, 0.7);
        assert_eq!(candidates.len(), 2);

        assert_eq!(candidates[0].image_id, 10);
        assert_eq!(candidates[0].correspondences.len(), 1);
        let c = candidates[0].correspondences[0];
        assert_eq!((c.query_feature, c.indexed_feature), (0, 0));
        assert_eq!(c.indexed.x, 1.0);

        assert_eq!(candidates[1].image_id, 20);
        assert_eq!(candidates[1].correspondences.len(), 1);
        assert_eq!(candidates[1].correspondences[0].query_feature, 0);
    }
}
