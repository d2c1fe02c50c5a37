use vsearch_core::SiftConfig;
use crate::config::DetectorConfig;
use crate::detector::DogDetector;
use crate::error::ExtractResult;

/// Builder for creating a validated `DogDetector`
#[derive(Debug, Clone)]
pub struct DetectorBuilder {
    config: SiftConfig,
    min_image_size: usize,
    orientation_peak_ratio: f32,
    max_features: Option<usize>,
}

impl Default for DetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::from_config(DetectorConfig::default())
    }

    /// Upper bound on pyramid octaves
    pub fn octaves(mut self, octaves: usize) -> Self {
        self.config.octaves = octaves;
        self
    }

    /// Number of scale intervals per octave
    pub fn scales_per_octave(mut self, scales: usize) -> Self {
        self.config.scales_per_octave = scales;
        self
    }

    /// Base blur of each octave
    pub fn sigma(mut self, sigma: f32) -> Self {
        self.config.sigma = sigma;
        self
    }

    /// Blur already present in input images
    pub fn assumed_blur(mut self, blur: f32) -> Self {
        self.config.assumed_blur = blur;
        self
    }

    /// Minimum DoG contrast of a keypoint
    pub fn contrast_threshold(mut self, threshold: f32) -> Self {
        self.config.contrast_threshold = threshold;
        self
    }

    /// Principal curvature ratio for edge rejection
    pub fn edge_threshold(mut self, threshold: f32) -> Self {
        self.config.edge_threshold = threshold;
        self
    }

    /// Set the number of threads for parallel processing
    pub fn threads(mut self, n_threads: usize) -> Self {
        self.config.n_threads = n_threads;
        self
    }

    /// Smallest octave side length
    pub fn min_image_size(mut self, size: usize) -> Self {
        self.min_image_size = size;
        self
    }

    /// Fraction of the strongest orientation peak that spawns another keypoint
    pub fn orientation_peak_ratio(mut self, ratio: f32) -> Self {
        self.orientation_peak_ratio = ratio;
        self
    }

    /// Keep only the `n` strongest keypoints
    pub fn max_features(mut self, n: usize) -> Self {
        self.max_features = Some(n);
        self
    }

    /// Apply fast preset (optimized for speed)
    pub fn preset_fast(self) -> Self {
        Self::from_config(DetectorConfig::fast_preset())
    }

    /// Apply precision preset (denser scale sampling)
    pub fn preset_precision(self) -> Self {
        Self::from_config(DetectorConfig::precision_preset())
    }

    /// Build the detector, validating every setting
    pub fn build(self) -> ExtractResult<DogDetector> {
        DogDetector::new(self.to_config())
    }

    /// Generate summary of current configuration
    pub fn summary(&self) -> String {
        format!(
            "DetectorBuilder: octaves={}, scales={}, sigma={:.2}, contrast={:.3}, edge={:.1}, threads={}, min_size={}, peak_ratio={:.2}",
            self.config.octaves,
            self.config.scales_per_octave,
            self.config.sigma,
            self.config.contrast_threshold,
            self.config.edge_threshold,
            self.config.n_threads,
            self.min_image_size,
            self.orientation_peak_ratio,
        )
    }

    /// Create builder from existing configuration
    pub fn from_config(config: DetectorConfig) -> Self {
        Self {
            config: config.core,
            min_image_size: config.min_image_size,
            orientation_peak_ratio: config.orientation_peak_ratio,
            max_features: config.max_features,
        }
    }

    /// Convert back to a plain configuration
    pub fn to_config(&self) -> DetectorConfig {
        DetectorConfig {
            core: self.config.clone(),
            min_image_size: self.min_image_size,
            orientation_peak_ratio: self.orientation_peak_ratio,
            max_features: self.max_features,
            ..DetectorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;

    #[test]
    fn test_builder_roundtrip() {
        let builder = DetectorBuilder::new()
            .octaves(2)
            .scales_per_octave(4)
            .contrast_threshold(0.02)
            .max_features(100);
        let config = builder.to_config();
        assert_eq!(config.core.octaves, 2);
        assert_eq!(config.core.scales_per_octave, 4);
        assert_eq!(config.max_features, Some(100));
        assert!(builder.summary().contains("scales=4"));
    }

    #[test]
    fn test_builder_rejects_invalid() {
        let result = DetectorBuilder::new().orientation_peak_ratio(0.0).build();
        assert!(matches!(result, Err(ExtractError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_preset() {
        let detector = DetectorBuilder::new().preset_fast().build().unwrap();
        assert_eq!(detector.config().max_features, Some(500));
    }
}
