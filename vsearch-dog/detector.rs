use std::collections::HashSet;

use rayon::prelude::*;
use tracing::debug;
use vsearch_core::{Image, Keypoint, Octave, ScaleSpace};

use crate::config::DetectorConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::pyramid::ImagePyramid;
use crate::refinement::KeypointRefinement;
use crate::types::{Detection, Extremum};

/// Multi-octave Difference-of-Gaussian keypoint detector
#[derive(Debug, Clone)]
pub struct DogDetector {
    cfg: DetectorConfig,
}

impl DogDetector {
    /// Creates a new detector with validation
    pub fn new(cfg: DetectorConfig) -> ExtractResult<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    /// Validates image data before processing
    pub fn validate_image(img: &Image) -> ExtractResult<()> {
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err(ExtractError::InvalidImageSize { width, height });
        }
        let expected_len = width * height;
        if img.pixels().len() != expected_len {
            return Err(ExtractError::InvalidImageData {
                expected_len,
                actual_len: img.pixels().len(),
            });
        }
        Ok(())
    }

    /// Build the scale space. Images smaller than one octave yield an empty space.
    pub fn build_scale_space(&self, img: &Image) -> ExtractResult<ScaleSpace> {
        Self::validate_image(img)?;
        let levels = ImagePyramid::generate_octave_levels(
            img.width(),
            img.height(),
            self.cfg.core.octaves,
            self.cfg.min_image_size,
        );
        Ok(ImagePyramid::build_scale_space(img, &self.cfg.core, &levels))
    }

    /// Detect oriented keypoints, strongest response first
    pub fn detect_keypoints(&self, img: &Image) -> ExtractResult<Vec<Keypoint>> {
        Ok(self.detect(img)?.keypoints)
    }

    /// Detect keypoints and hand back the scale space they were found in
    pub fn detect(&self, img: &Image) -> ExtractResult<Detection> {
        let scale_space = self.build_scale_space(img)?;
        if scale_space.is_empty() {
            debug!(
                width = img.width(),
                height = img.height(),
                "image smaller than one octave, no keypoints"
            );
            return Ok(Detection {
                scale_space,
                keypoints: Vec::new(),
            });
        }

        let extrema: Vec<Extremum> = scale_space
            .octaves
            .par_iter()
            .flat_map_iter(|octave| self.find_extrema(octave, scale_space.scales_per_octave))
            .collect();

        let refined: Vec<Keypoint> = extrema
            .par_iter()
            .filter_map(|ext| KeypointRefinement::refine_extremum(&scale_space, &self.cfg.core, *ext))
            .collect();

        // Neighbouring extrema can converge on the same refined location
        let mut seen = HashSet::with_capacity(refined.len());
        let unique: Vec<Keypoint> = refined
            .into_iter()
            .filter(|kp| seen.insert((kp.octave, kp.layer, kp.x.to_bits(), kp.y.to_bits())))
            .collect();

        let mut keypoints: Vec<Keypoint> = unique
            .par_iter()
            .flat_map_iter(|kp| {
                KeypointRefinement::assign_orientations(&scale_space, kp, self.cfg.orientation_peak_ratio)
            })
            .collect();

        keypoints.sort_by(|a, b| {
            b.response
                .total_cmp(&a.response)
                .then(a.y.total_cmp(&b.y))
                .then(a.x.total_cmp(&b.x))
                .then(a.angle.total_cmp(&b.angle))
        });
        if let Some(max) = self.cfg.max_features {
            keypoints.truncate(max);
        }

        debug!(
            extrema = extrema.len(),
            keypoints = keypoints.len(),
            octaves = scale_space.octaves.len(),
            "DoG detection finished"
        );

        Ok(Detection {
            scale_space,
            keypoints,
        })
    }

    /// 3x3x3 extrema of the interior DoG layers of one octave.
    /// Ties with a neighbour still count, so a plateau yields several extrema
    /// that refinement later collapses. Border pixels lack a full neighbourhood
    /// and are never reported.
    pub fn find_extrema(&self, octave: &Octave, scales_per_octave: usize) -> Vec<Extremum> {
        let (w, h) = (octave.width(), octave.height());
        if w < 3 || h < 3 {
            return Vec::new();
        }
        // Cheap prefilter before refinement
        let threshold = 0.5 * self.cfg.core.contrast_threshold / scales_per_octave as f32;
        let mut extrema = Vec::new();

        for layer in 1..=scales_per_octave {
            let (below, current, above) = (&octave.dogs[layer - 1], &octave.dogs[layer], &octave.dogs[layer + 1]);
            for y in 1..h - 1 {
                for x in 1..w - 1 {
                    let value = current.get(x, y);
                    if value.abs() <= threshold {
                        continue;
                    }
                    let is_extremum = [below, current, above].iter().all(|plane| {
                        (y - 1..=y + 1).all(|ny| {
                            (x - 1..=x + 1).all(|nx| {
                                let n = plane.get(nx, ny);
                                if value > 0.0 { n <= value } else { n >= value }
                            })
                        })
                    });
                    if is_extremum {
                        extrema.push(Extremum {
                            octave: octave.index,
                            layer,
                            x,
                            y,
                            value,
                        });
                    }
                }
            }
        }

        extrema
    }
}
