use nalgebra::{Matrix3, Vector3};
use std::f32::consts::TAU;
use vsearch_core::{Keypoint, Plane, ScaleSpace, SiftConfig};

use crate::types::Extremum;
use crate::utils::{circular_peaks, parabolic_peak_offset, smooth_circular_histogram};

/// Interpolation steps before an extremum is abandoned
pub const MAX_INTERPOLATION_STEPS: usize = 5;

/// Bins of the orientation histogram (10 degrees each)
pub const ORIENTATION_BINS: usize = 36;

/// Gaussian window of the orientation histogram relative to keypoint sigma
const ORIENTATION_SIGMA_FACTOR: f32 = 1.5;

/// Subpixel refinement, low-contrast and edge rejection, orientation assignment
pub struct KeypointRefinement;

impl KeypointRefinement {
    /// Fit a 3-D quadratic around the extremum and move it until the offset
    /// stays inside the sample cell. Returns `None` when the point drifts out
    /// of bounds, fails to converge, has low contrast or lies on an edge.
    pub fn refine_extremum(space: &ScaleSpace, cfg: &SiftConfig, ext: Extremum) -> Option<Keypoint> {
        let octave = space.octaves.get(ext.octave)?;
        let s = space.scales_per_octave as isize;
        let (w, h) = (octave.width() as isize, octave.height() as isize);

        let (mut x, mut y, mut layer) = (ext.x as isize, ext.y as isize, ext.layer as isize);
        let mut converged = None;

        for _ in 0..MAX_INTERPOLATION_STEPS {
            let dogs = &octave.dogs[(layer - 1) as usize..=(layer + 1) as usize];
            let (gradient, hessian) = Self::derivatives(dogs, x, y);
            let offset = -hessian.lu().solve(&gradient)?;

            if offset.iter().all(|v| v.abs() < 0.5) {
                converged = Some((offset, gradient, hessian, dogs[1].get(x as usize, y as usize)));
                break;
            }

            x += offset[0].round() as isize;
            y += offset[1].round() as isize;
            layer += offset[2].round() as isize;

            if layer < 1 || layer > s || x < 1 || x > w - 2 || y < 1 || y > h - 2 {
                return None;
            }
        }

        let (offset, gradient, hessian, centre) = converged?;

        let value = centre + 0.5 * gradient.dot(&offset);
        if value.abs() * (s as f32) < cfg.contrast_threshold {
            return None;
        }

        if Self::is_edge(&hessian, cfg.edge_threshold) {
            return None;
        }

        let pixel_size = octave.pixel_size();
        Some(Keypoint {
            x: (x as f32 + offset[0]) * pixel_size,
            y: (y as f32 + offset[1]) * pixel_size,
            octave: ext.octave,
            layer: layer as usize,
            sigma: space.layer_sigma(layer as f32 + offset[2]) * pixel_size,
            angle: 0.0,
            response: value.abs(),
        })
    }

    /// Principal curvature ratio test on the spatial 2x2 Hessian
    pub fn is_edge(hessian: &Matrix3<f32>, edge_threshold: f32) -> bool {
        let (dxx, dyy, dxy) = (hessian[(0, 0)], hessian[(1, 1)], hessian[(0, 1)]);
        let trace = dxx + dyy;
        let det = dxx * dyy - dxy * dxy;
        let r = edge_threshold;
        det <= 0.0 || trace * trace * r >= (r + 1.0) * (r + 1.0) * det
    }

    /// Central-difference gradient and Hessian over three adjacent DoG layers
    fn derivatives(dogs: &[Plane], x: isize, y: isize) -> (Vector3<f32>, Matrix3<f32>) {
        let at = |l: usize, dx: isize, dy: isize| dogs[l].get((x + dx) as usize, (y + dy) as usize);
        let c = at(1, 0, 0);

        let gradient = Vector3::new(
            0.5 * (at(1, 1, 0) - at(1, -1, 0)),
            0.5 * (at(1, 0, 1) - at(1, 0, -1)),
            0.5 * (at(2, 0, 0) - at(0, 0, 0)),
        );

        let dxx = at(1, 1, 0) + at(1, -1, 0) - 2.0 * c;
        let dyy = at(1, 0, 1) + at(1, 0, -1) - 2.0 * c;
        let dss = at(2, 0, 0) + at(0, 0, 0) - 2.0 * c;
        let dxy = 0.25 * (at(1, 1, 1) - at(1, -1, 1) - at(1, 1, -1) + at(1, -1, -1));
        let dxs = 0.25 * (at(2, 1, 0) - at(2, -1, 0) - at(0, 1, 0) + at(0, -1, 0));
        let dys = 0.25 * (at(2, 0, 1) - at(2, 0, -1) - at(0, 0, 1) + at(0, 0, -1));

        let hessian = Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss);
        (gradient, hessian)
    }

    /// One keypoint per dominant orientation; secondary peaks reaching
    /// `peak_ratio` of the strongest produce extra keypoints at the same place
    pub fn assign_orientations(space: &ScaleSpace, kp: &Keypoint, peak_ratio: f32) -> Vec<Keypoint> {
        let Some(gaussian) = space
            .octaves
            .get(kp.octave)
            .and_then(|o| o.gaussians.get(kp.layer))
        else {
            return Vec::new();
        };

        let hist = Self::orientation_histogram(gaussian, kp);
        let smoothed = smooth_circular_histogram(&hist);
        let max = smoothed.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return vec![*kp];
        }

        circular_peaks(&smoothed, peak_ratio * max)
            .into_iter()
            .map(|i| {
                let left = smoothed[(i + ORIENTATION_BINS - 1) % ORIENTATION_BINS];
                let right = smoothed[(i + 1) % ORIENTATION_BINS];
                let bin = i as f32 + parabolic_peak_offset(left, smoothed[i], right);
                Keypoint {
                    angle: (bin * TAU / ORIENTATION_BINS as f32).rem_euclid(TAU),
                    ..*kp
                }
            })
            .collect()
    }

    /// Gaussian and magnitude weighted gradient orientation histogram
    pub fn orientation_histogram(gaussian: &Plane, kp: &Keypoint) -> [f32; ORIENTATION_BINS] {
        let mut hist = [0.0f32; ORIENTATION_BINS];
        let (ox, oy) = kp.octave_position();
        let (cx, cy) = (ox.round() as isize, oy.round() as isize);
        let window = ORIENTATION_SIGMA_FACTOR * kp.octave_sigma();
        let radius = (3.0 * window).round() as isize;
        let denom = 2.0 * window * window;
        let (w, h) = (gaussian.width as isize, gaussian.height as isize);

        for dy in -radius..=radius {
            let y = cy + dy;
            if y < 1 || y > h - 2 {
                continue;
            }
            for dx in -radius..=radius {
                let x = cx + dx;
                if x < 1 || x > w - 2 {
                    continue;
                }
                let (xu, yu) = (x as usize, y as usize);
                let gx = gaussian.get(xu + 1, yu) - gaussian.get(xu - 1, yu);
                let gy = gaussian.get(xu, yu + 1) - gaussian.get(xu, yu - 1);
                let magnitude = (gx * gx + gy * gy).sqrt();
                if magnitude == 0.0 {
                    continue;
                }
                let weight = (-((dx * dx + dy * dy) as f32) / denom).exp();
                let bin = (gy.atan2(gx) * ORIENTATION_BINS as f32 / TAU).round() as isize;
                hist[bin.rem_euclid(ORIENTATION_BINS as isize) as usize] += weight * magnitude;
            }
        }

        hist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_keypoint() -> Keypoint {
        Keypoint {
            x: 16.0,
            y: 16.0,
            octave: 0,
            layer: 1,
            sigma: 2.0,
            angle: 0.0,
            response: 0.1,
        }
    }

    #[test]
    fn test_edge_rejection() {
        // Strong curvature along x only
        let ridge = Matrix3::new(-1.0, 0.0, 0.0, 0.0, -0.01, 0.0, 0.0, 0.0, -1.0);
        assert!(KeypointRefinement::is_edge(&ridge, 10.0));

        let blob = Matrix3::new(-1.0, 0.0, 0.0, 0.0, -0.9, 0.0, 0.0, 0.0, -1.0);
        assert!(!KeypointRefinement::is_edge(&blob, 10.0));

        // Saddle points have negative determinant
        let saddle = Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0);
        assert!(KeypointRefinement::is_edge(&saddle, 10.0));
    }

    #[test]
    fn test_orientation_of_horizontal_ramp() {
        let mut plane = Plane::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                plane.data[y * 32 + x] = x as f32 / 32.0;
            }
        }
        let hist = KeypointRefinement::orientation_histogram(&plane, &create_test_keypoint());
        let peak = hist
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(0));
    }

    #[test]
    fn test_orientation_of_vertical_ramp() {
        let mut plane = Plane::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                plane.data[y * 32 + x] = y as f32 / 32.0;
            }
        }
        let hist = KeypointRefinement::orientation_histogram(&plane, &create_test_keypoint());
        let peak = hist
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        // +y gradient points a quarter turn from +x
        assert_eq!(peak, Some(ORIENTATION_BINS / 4));
    }

    #[test]
    fn test_flat_patch_keeps_single_keypoint() {
        let space = ScaleSpace {
            octaves: vec![vsearch_core::Octave {
                index: 0,
                gaussians: vec![Plane::new(32, 32); 6],
                dogs: vec![Plane::new(32, 32); 5],
            }],
            scales_per_octave: 3,
            sigma: 1.6,
        };
        let kps = KeypointRefinement::assign_orientations(&space, &create_test_keypoint(), 0.8);
        assert_eq!(kps.len(), 1);
        assert_eq!(kps[0].angle, 0.0);
    }
}
