//! Geometric verification of candidate image matches.
//!
//! A candidate is a bag of feature correspondences between the query and one
//! corpus image. RANSAC searches for a single planar homography explaining
//! enough of them; candidates that fail are dropped by the caller.

pub mod homography;
pub mod ransac;

pub use ransac::{GeometricVerifier, RansacConfig};

use nalgebra::Matrix3;
use thiserror::Error;
use vsearch_core::{ImageId, Point};

/// Matched pair of features, query side first
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub query: Point,
    pub indexed: Point,
    /// Descriptor distance
    pub distance: f32,
    /// Offset of the query feature in the query's feature list
    pub query_feature: usize,
    /// Offset of the indexed feature in the spatial index
    pub indexed_feature: usize,
}

/// All correspondences gathered for one corpus image during a query
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub image_id: ImageId,
    pub correspondences: Vec<Correspondence>,
}

/// Candidate that passed verification
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedMatch {
    pub image_id: ImageId,
    /// Maps query image coordinates into the matched image
    pub homography: Matrix3<f64>,
    pub inliers: Vec<Correspondence>,
    pub total_correspondences: usize,
    pub iterations: usize,
}

impl VerifiedMatch {
    pub fn inlier_count(&self) -> usize {
        self.inliers.len()
    }

    pub fn inlier_ratio(&self) -> f32 {
        if self.total_correspondences == 0 {
            0.0
        } else {
            self.inliers.len() as f32 / self.total_correspondences as f32
        }
    }
}

/// Why a candidate was dropped. Never surfaced to search callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("{found} correspondences, at least {required} required")]
    InsufficientCorrespondences { found: usize, required: usize },
    #[error("best model has {inliers} inliers, at least {required} required")]
    VerificationFailed { inliers: usize, required: usize },
    #[error("no model reached the inlier floor after {iterations} iterations (best {best_inliers})")]
    RandomnessExhausted { iterations: usize, best_inliers: usize },
}
