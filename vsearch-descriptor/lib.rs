//! Rotation-normalized gradient histogram descriptors.

pub mod signature;

pub use signature::GlobalSignature;

use rayon::prelude::*;
use std::f32::consts::{SQRT_2, TAU};
use tracing::trace;
use vsearch_core::{Descriptor, FeatureVector, ImageId, Keypoint, Plane, ScaleSpace, DESCRIPTOR_LEN};

/// Spatial cells per side of the descriptor grid
const GRID: usize = 4;
/// Orientation bins per cell
const BINS: usize = 8;
/// Width of one spatial cell in units of keypoint sigma
const CELL_SCALE: f32 = 3.0;

const _: () = assert!(GRID * GRID * BINS == DESCRIPTOR_LEN);

pub struct DescriptorGenerator {
    clip_threshold: f32,
}

impl Default for DescriptorGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorGenerator {
    pub fn new() -> Self {
        Self { clip_threshold: 0.2 }
    }

    /// Cap on any single component between the two normalizations
    pub fn with_clip_threshold(mut self, clip: f32) -> Self {
        self.clip_threshold = clip;
        self
    }

    pub fn clip_threshold(&self) -> f32 {
        self.clip_threshold
    }

    /// Describe every keypoint, dropping the ones whose patch has no gradient
    pub fn generate(&self, space: &ScaleSpace, keypoints: &[Keypoint], owner: ImageId) -> Vec<FeatureVector> {
        let features: Vec<FeatureVector> = keypoints
            .par_iter()
            .filter_map(|kp| {
                self.describe(space, kp).map(|descriptor| FeatureVector {
                    x: kp.x,
                    y: kp.y,
                    scale: kp.sigma,
                    orientation: kp.angle,
                    descriptor,
                    owner,
                })
            })
            .collect();

        trace!(
            owner,
            keypoints = keypoints.len(),
            features = features.len(),
            "descriptors generated"
        );
        features
    }

    /// 4x4x8 histogram of gradients in a patch rotated to the keypoint
    /// orientation, trilinearly interpolated and normalized twice
    pub fn describe(&self, space: &ScaleSpace, kp: &Keypoint) -> Option<Descriptor> {
        let plane = space.octaves.get(kp.octave)?.gaussians.get(kp.layer)?;
        let raw = Self::gradient_histogram(plane, kp);
        self.normalize(raw)
    }

    fn gradient_histogram(plane: &Plane, kp: &Keypoint) -> [f32; DESCRIPTOR_LEN] {
        let mut hist = [0.0f32; DESCRIPTOR_LEN];
        let (ox, oy) = kp.octave_position();
        let (cx, cy) = (ox.round() as isize, oy.round() as isize);
        let hist_width = CELL_SCALE * kp.octave_sigma();
        let (w, h) = (plane.width as isize, plane.height as isize);

        let diagonal = ((w * w + h * h) as f32).sqrt();
        let radius = (hist_width * SQRT_2 * (GRID as f32 + 1.0) * 0.5)
            .round()
            .min(diagonal) as isize;

        let (sin_t, cos_t) = kp.angle.sin_cos();
        let (sin_t, cos_t) = (sin_t / hist_width, cos_t / hist_width);
        let half = GRID as f32 / 2.0;
        let exp_scale = -1.0 / (0.5 * (GRID * GRID) as f32);

        for i in -radius..=radius {
            for j in -radius..=radius {
                let c_rot = j as f32 * cos_t + i as f32 * sin_t;
                let r_rot = -(j as f32) * sin_t + i as f32 * cos_t;
                let rbin = r_rot + half - 0.5;
                let cbin = c_rot + half - 0.5;
                if rbin <= -1.0 || rbin >= GRID as f32 || cbin <= -1.0 || cbin >= GRID as f32 {
                    continue;
                }

                let (x, y) = (cx + j, cy + i);
                if x < 1 || x > w - 2 || y < 1 || y > h - 2 {
                    continue;
                }
                let (xu, yu) = (x as usize, y as usize);
                let gx = plane.get(xu + 1, yu) - plane.get(xu - 1, yu);
                let gy = plane.get(xu, yu + 1) - plane.get(xu, yu - 1);
                let magnitude = (gx * gx + gy * gy).sqrt();
                if magnitude == 0.0 {
                    continue;
                }

                let weight = ((c_rot * c_rot + r_rot * r_rot) * exp_scale).exp();
                let obin = ((gy.atan2(gx) - kp.angle) * BINS as f32 / TAU).rem_euclid(BINS as f32);
                Self::accumulate(&mut hist, rbin, cbin, obin, magnitude * weight);
            }
        }

        hist
    }

    /// Spread one sample over the eight neighbouring (row, column, orientation) bins
    fn accumulate(hist: &mut [f32; DESCRIPTOR_LEN], rbin: f32, cbin: f32, obin: f32, value: f32) {
        let (r0, c0, o0) = (rbin.floor(), cbin.floor(), obin.floor());
        let (dr, dc, d_o) = (rbin - r0, cbin - c0, obin - o0);
        let (r0, c0, o0) = (r0 as isize, c0 as isize, o0 as usize);

        for (r_off, r_weight) in [(0, 1.0 - dr), (1, dr)] {
            let r = r0 + r_off;
            if r < 0 || r >= GRID as isize {
                continue;
            }
            for (c_off, c_weight) in [(0, 1.0 - dc), (1, dc)] {
                let c = c0 + c_off;
                if c < 0 || c >= GRID as isize {
                    continue;
                }
                for (o_off, o_weight) in [(0, 1.0 - d_o), (1, d_o)] {
                    let o = (o0 + o_off) % BINS;
                    let idx = (r as usize * GRID + c as usize) * BINS + o;
                    hist[idx] += value * r_weight * c_weight * o_weight;
                }
            }
        }
    }

    /// Unit-normalize, clip large components, then unit-normalize again
    fn normalize(&self, mut hist: [f32; DESCRIPTOR_LEN]) -> Option<Descriptor> {
        let norm = l2_norm(&hist);
        if norm <= f64::EPSILON {
            return None;
        }
        let clip = self.clip_threshold as f64 * norm;
        for v in hist.iter_mut() {
            *v = (*v as f64).min(clip) as f32;
        }

        let norm = l2_norm(&hist);
        if norm <= f64::EPSILON {
            return None;
        }
        for v in hist.iter_mut() {
            *v = (*v as f64 / norm) as f32;
        }
        Some(hist)
    }
}

fn l2_norm(values: &[f32]) -> f64 {
    values.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt()
}
