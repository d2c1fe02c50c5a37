use tracing::trace;
use vsearch_core::{ImageMatch, Point};
use vsearch_verify::homography::{conditioning_score, project};
use vsearch_verify::{RansacConfig, VerifiedMatch};

use crate::error::{SearchError, SearchResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Weights of the combined score and the perspective bound of the geometric score
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RankingConfig {
    pub feature_weight: f32,
    pub geometric_weight: f32,
    pub global_weight: f32,
    /// Projective coefficient magnitude at which the geometric score reaches 0
    pub max_perspective: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            feature_weight: 0.5,
            geometric_weight: 0.3,
            global_weight: 0.2,
            max_perspective: 0.002,
        }
    }
}

impl RankingConfig {
    /// Weights must be non-negative and sum to 1 so scores stay in [0, 1]
    pub fn validate(&self) -> SearchResult<()> {
        let weights = [self.feature_weight, self.geometric_weight, self.global_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SearchError::Config(format!("ranking weights must be non-negative, got {weights:?}")));
        }
        let sum: f32 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(SearchError::Config(format!("ranking weights must sum to 1, got {sum}")));
        }
        if !(self.max_perspective.is_finite() && self.max_perspective > 0.0) {
            return Err(SearchError::Config("ranking.max_perspective must be positive".into()));
        }
        Ok(())
    }
}

/// A verified candidate with its whole-image similarity to the query
#[derive(Debug, Clone)]
pub struct RankCandidate {
    pub verified: VerifiedMatch,
    pub global_score: f32,
}

/// Fuses verification results into scored, boxed results
#[derive(Debug, Clone)]
pub struct Ranker {
    config: RankingConfig,
    /// Area scale change at which the geometric score reaches 0.
    /// Shared with the verifier's plausibility bound.
    max_scale_change: f64,
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new(RankingConfig::default())
    }
}

impl Ranker {
    pub fn new(config: RankingConfig) -> Self {
        Self {
            config,
            max_scale_change: RansacConfig::default().max_scale_change,
        }
    }

    /// Score scale changes against the same bound RANSAC rejects hypotheses with
    pub fn with_max_scale_change(mut self, scale: f64) -> Self {
        self.max_scale_change = scale;
        self
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    pub fn max_scale_change(&self) -> f64 {
        self.max_scale_change
    }

    /// Score, drop those below `threshold`, order best first and keep `max_results`
    pub fn rank(
        &self,
        candidates: Vec<RankCandidate>,
        query_feature_count: usize,
        query_size: (usize, usize),
        threshold: f32,
        max_results: usize,
    ) -> Vec<ImageMatch> {
        let mut matches: Vec<ImageMatch> = candidates
            .into_iter()
            .filter_map(|c| self.score(c, query_feature_count, query_size))
            .filter(|m| m.score >= threshold)
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.image_id.cmp(&b.image_id)));
        matches.truncate(max_results);
        matches
    }

    fn score(
        &self,
        candidate: RankCandidate,
        query_feature_count: usize,
        query_size: (usize, usize),
    ) -> Option<ImageMatch> {
        let cfg = &self.config;
        let verified = &candidate.verified;

        let feature_score = if query_feature_count == 0 {
            0.0
        } else {
            (verified.inlier_count() as f32 / query_feature_count as f32).min(1.0)
        };
        let geometric_score =
            conditioning_score(&verified.homography, self.max_scale_change, cfg.max_perspective) as f32;
        let global_score = candidate.global_score.clamp(0.0, 1.0);

        let score = (cfg.feature_weight * feature_score
            + cfg.geometric_weight * geometric_score
            + cfg.global_weight * global_score)
            .clamp(0.0, 1.0);

        let Some(bounding_box) = Self::bounding_box(verified, query_size) else {
            trace!(image_id = verified.image_id, "query corners project to infinity, dropped");
            return None;
        };

        Some(ImageMatch {
            image_id: verified.image_id,
            score,
            feature_score,
            geometric_score,
            global_score,
            inlier_count: verified.inlier_count(),
            bounding_box,
        })
    }

    /// Query corners (TL, TR, BR, BL) mapped into the matched image
    fn bounding_box(verified: &VerifiedMatch, (width, height): (usize, usize)) -> Option<[Point; 4]> {
        let (w, h) = (width as f64, height as f64);
        let corners = [
            Point::new(0.0, 0.0),
            Point::new(w, 0.0),
            Point::new(w, h),
            Point::new(0.0, h),
        ];
        let mut projected = [Point::default(); 4];
        for (out, corner) in projected.iter_mut().zip(corners) {
            *out = project(&verified.homography, corner)?;
        }
        Some(projected)
    }
}
