use vsearch_core::SiftConfig;
use crate::error::{ExtractError, ExtractResult};

#[cfg(feature = "serde")]
use serde::{Serialize, Deserialize};

/// Complete detector configuration with all settings
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorConfig {
    /// Core scale-space configuration
    pub core: SiftConfig,
    /// Octaves stop once either side would drop below this
    pub min_image_size: usize,
    /// Secondary orientation peaks reaching this fraction of the strongest spawn extra keypoints
    pub orientation_peak_ratio: f32,
    /// Keep only the strongest responses when set
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub max_features: Option<usize>,
    /// Metadata
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub name: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub description: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub version: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::balanced_preset()
    }
}

impl DetectorConfig {
    /// Balanced preset: the classic 4 octave, 3 scale configuration
    pub fn balanced_preset() -> Self {
        Self {
            core: SiftConfig::default(),
            min_image_size: 16,
            orientation_peak_ratio: 0.8,
            max_features: None,
            name: None,
            description: None,
            version: None,
        }
    }

    /// Fast preset optimized for indexing throughput
    pub fn fast_preset() -> Self {
        Self {
            core: SiftConfig {
                octaves: 3,
                scales_per_octave: 2,
                contrast_threshold: 0.06,
                ..SiftConfig::default()
            },
            max_features: Some(500),
            name: Some("Fast".to_string()),
            description: Some("Fewer octaves and a higher contrast floor, capped at 500 features".to_string()),
            version: Some("1.0".to_string()),
            ..Self::balanced_preset()
        }
    }

    /// Precision preset for small or low-contrast corpora
    pub fn precision_preset() -> Self {
        Self {
            core: SiftConfig {
                octaves: 5,
                scales_per_octave: 4,
                contrast_threshold: 0.03,
                ..SiftConfig::default()
            },
            name: Some("Precision".to_string()),
            description: Some("Dense scale sampling with a low contrast floor".to_string()),
            version: Some("1.0".to_string()),
            ..Self::balanced_preset()
        }
    }

    /// Add metadata to configuration
    pub fn with_metadata(mut self, name: &str, description: &str) -> Self {
        self.name = Some(name.to_string());
        self.description = Some(description.to_string());
        self.version = Some("1.0".to_string());
        self
    }

    /// Generate human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "DetectorConfig: octaves={}, scales={}, sigma={:.2}, contrast={:.3}, edge={:.1}, peak_ratio={:.2}, max_features={}",
            self.core.octaves,
            self.core.scales_per_octave,
            self.core.sigma,
            self.core.contrast_threshold,
            self.core.edge_threshold,
            self.orientation_peak_ratio,
            self.max_features.map_or("unbounded".to_string(), |n| n.to_string()),
        )
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> ExtractResult<()> {
        let core = &self.core;
        if core.octaves == 0 {
            return Err(ExtractError::InvalidConfig("octaves must be at least 1".into()));
        }
        if core.scales_per_octave == 0 {
            return Err(ExtractError::InvalidConfig("scales_per_octave must be at least 1".into()));
        }
        if !(core.sigma.is_finite() && core.sigma > 0.0) {
            return Err(ExtractError::InvalidConfig(format!("sigma must be positive, got {}", core.sigma)));
        }
        if !(core.assumed_blur.is_finite() && core.assumed_blur >= 0.0) {
            return Err(ExtractError::InvalidConfig(format!(
                "assumed_blur must be non-negative, got {}",
                core.assumed_blur
            )));
        }
        if !(core.contrast_threshold.is_finite() && core.contrast_threshold >= 0.0) {
            return Err(ExtractError::InvalidConfig(format!(
                "contrast_threshold must be non-negative, got {}",
                core.contrast_threshold
            )));
        }
        if !(core.edge_threshold.is_finite() && core.edge_threshold > 0.0) {
            return Err(ExtractError::InvalidConfig(format!(
                "edge_threshold must be positive, got {}",
                core.edge_threshold
            )));
        }
        if self.min_image_size < 3 {
            return Err(ExtractError::InvalidConfig("min_image_size must be at least 3".into()));
        }
        if !(self.orientation_peak_ratio > 0.0 && self.orientation_peak_ratio <= 1.0) {
            return Err(ExtractError::InvalidConfig(format!(
                "orientation_peak_ratio must be in (0, 1], got {}",
                self.orientation_peak_ratio
            )));
        }
        if self.max_features == Some(0) {
            return Err(ExtractError::InvalidConfig("max_features must be at least 1".into()));
        }
        Ok(())
    }
}
