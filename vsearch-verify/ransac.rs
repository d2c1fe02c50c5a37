//! RANSAC homography estimation with an injectable random source.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::trace;
use vsearch_core::{ImageId, Point};

use crate::homography;
use crate::{Candidate, Correspondence, Rejection, VerifiedMatch};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Points needed for a homography hypothesis
const SAMPLE_SIZE: usize = 4;

/// Configuration for RANSAC verification.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RansacConfig {
    /// Hard cap on hypotheses.
    /// Default: 1000
    pub max_iterations: usize,

    /// Reprojection error (pixels) below which a correspondence is an inlier.
    /// Default: 3.0
    pub inlier_threshold: f64,

    /// Stop once the inlier fraction exceeds this.
    /// Default: 0.8
    pub early_termination_ratio: f32,

    /// Inliers required to accept a candidate.
    /// Default: 10
    pub min_inliers: usize,

    /// Correspondences required to attempt verification (never below 4).
    /// Default: 4
    pub min_correspondences: usize,

    /// Largest area scale change a hypothesis may imply, in either direction.
    /// Default: 8.0
    pub max_scale_change: f64,

    /// Base seed; each candidate image derives its own stream from it.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            inlier_threshold: 3.0,
            early_termination_ratio: 0.8,
            min_inliers: 10,
            min_correspondences: SAMPLE_SIZE,
            max_scale_change: 8.0,
            seed: 0x5EED,
        }
    }
}

impl RansacConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter for maximum iterations.
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Builder-style setter for inlier threshold.
    pub fn with_inlier_threshold(mut self, pixels: f64) -> Self {
        self.inlier_threshold = pixels;
        self
    }

    /// Builder-style setter for early termination ratio.
    pub fn with_early_termination_ratio(mut self, ratio: f32) -> Self {
        self.early_termination_ratio = ratio;
        self
    }

    /// Builder-style setter for the inlier floor.
    pub fn with_min_inliers(mut self, count: usize) -> Self {
        self.min_inliers = count;
        self
    }

    /// Builder-style setter for minimum correspondences.
    pub fn with_min_correspondences(mut self, count: usize) -> Self {
        self.min_correspondences = count;
        self
    }

    /// Builder-style setter for the scale sanity bound.
    pub fn with_max_scale_change(mut self, scale: f64) -> Self {
        self.max_scale_change = scale;
        self
    }

    /// Builder-style setter for the base seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn required_correspondences(&self) -> usize {
        self.min_correspondences.max(SAMPLE_SIZE)
    }
}

/// Best hypothesis so far
struct Hypothesis {
    homography: nalgebra::Matrix3<f64>,
    inliers: Vec<usize>,
}

/// Validates candidates with RANSAC over 4-point homographies
#[derive(Debug, Clone, Default)]
pub struct GeometricVerifier {
    config: RansacConfig,
}

impl GeometricVerifier {
    pub fn new(config: RansacConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RansacConfig {
        &self.config
    }

    /// Deterministic generator for one candidate image, independent of
    /// the order in which candidates are verified
    pub fn rng_for(&self, image_id: ImageId) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.config.seed ^ image_id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    /// Verify with the candidate's own seeded generator
    pub fn verify(&self, candidate: &Candidate) -> Result<VerifiedMatch, Rejection> {
        let mut rng = self.rng_for(candidate.image_id);
        self.verify_with_rng(candidate, &mut rng)
    }

    /// Verify drawing samples from `rng`
    pub fn verify_with_rng<R: Rng + ?Sized>(
        &self,
        candidate: &Candidate,
        rng: &mut R,
    ) -> Result<VerifiedMatch, Rejection> {
        let cfg = &self.config;
        let corrs = &candidate.correspondences;
        let n = corrs.len();

        let required = cfg.required_correspondences();
        if n < required {
            return Err(Rejection::InsufficientCorrespondences { found: n, required });
        }

        let threshold_sq = cfg.inlier_threshold * cfg.inlier_threshold;
        let mut best: Option<Hypothesis> = None;
        let mut iterations = 0;
        let mut terminated_early = false;

        while iterations < cfg.max_iterations {
            iterations += 1;

            let sample = rand::seq::index::sample(rng, n, SAMPLE_SIZE);
            let src: Vec<Point> = sample.iter().map(|i| corrs[i].query).collect();
            let dst: Vec<Point> = sample.iter().map(|i| corrs[i].indexed).collect();
            if homography::is_degenerate(&src) || homography::is_degenerate(&dst) {
                continue;
            }

            let Some(h) = homography::estimate(&src, &dst) else {
                continue;
            };
            if !homography::is_plausible(&h, cfg.max_scale_change) {
                continue;
            }

            let inliers = Self::inliers(&h, corrs, threshold_sq);
            if best.as_ref().is_none_or(|b| inliers.len() > b.inliers.len()) {
                let count = inliers.len();
                best = Some(Hypothesis {
                    homography: h,
                    inliers,
                });
                if count as f32 / n as f32 > cfg.early_termination_ratio {
                    terminated_early = true;
                    break;
                }
            }
        }

        let Some(best) = best else {
            trace!(image_id = candidate.image_id, iterations, "no plausible hypothesis");
            return Err(Rejection::VerificationFailed {
                inliers: 0,
                required: cfg.min_inliers,
            });
        };

        if best.inliers.len() < cfg.min_inliers {
            return Err(if terminated_early {
                Rejection::VerificationFailed {
                    inliers: best.inliers.len(),
                    required: cfg.min_inliers,
                }
            } else {
                Rejection::RandomnessExhausted {
                    iterations,
                    best_inliers: best.inliers.len(),
                }
            });
        }

        let best = self.refit(best, corrs, threshold_sq);
        trace!(
            image_id = candidate.image_id,
            inliers = best.inliers.len(),
            total = n,
            iterations,
            "candidate verified"
        );

        Ok(VerifiedMatch {
            image_id: candidate.image_id,
            homography: best.homography,
            inliers: best.inliers.iter().map(|&i| corrs[i]).collect(),
            total_correspondences: n,
            iterations,
        })
    }

    /// Least-squares fit over the inlier set, kept only if it loses no inliers
    fn refit(&self, best: Hypothesis, corrs: &[Correspondence], threshold_sq: f64) -> Hypothesis {
        let src: Vec<Point> = best.inliers.iter().map(|&i| corrs[i].query).collect();
        let dst: Vec<Point> = best.inliers.iter().map(|&i| corrs[i].indexed).collect();

        match homography::estimate(&src, &dst) {
            Some(h) if homography::is_plausible(&h, self.config.max_scale_change) => {
                let inliers = Self::inliers(&h, corrs, threshold_sq);
                if inliers.len() >= best.inliers.len() {
                    Hypothesis {
                        homography: h,
                        inliers,
                    }
                } else {
                    best
                }
            }
            _ => best,
        }
    }

    fn inliers(h: &nalgebra::Matrix3<f64>, corrs: &[Correspondence], threshold_sq: f64) -> Vec<usize> {
        corrs
            .iter()
            .enumerate()
            .filter(|(_, c)| homography::reprojection_error_sq(h, c.query, c.indexed) < threshold_sq)
            .map(|(i, _)| i)
            .collect()
    }
}
