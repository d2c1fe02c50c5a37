use vsearch_dog::DetectorConfig;
use vsearch_index::IndexConfig;
use vsearch_verify::RansacConfig;

use crate::error::{SearchError, SearchResult};
use crate::ranker::RankingConfig;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Settings for every stage of the search engine
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SearchConfig {
    /// Neighbours fetched per query feature
    pub knn_k: usize,
    /// Neighbours further than this (descriptor L2) never become correspondences
    pub max_descriptor_distance: f32,
    pub detector: DetectorConfig,
    pub index: IndexConfig,
    pub ransac: RansacConfig,
    pub ranking: RankingConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            knn_k: 5,
            max_descriptor_distance: 0.7,
            detector: DetectorConfig::default(),
            index: IndexConfig::default(),
            ransac: RansacConfig::default(),
            ranking: RankingConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Faster indexing with fewer features per image
    pub fn fast_preset() -> Self {
        Self {
            detector: DetectorConfig::fast_preset(),
            index: IndexConfig::default().with_max_checks(512),
            ..Self::default()
        }
    }

    /// Generate human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "SearchConfig: k={}, max_distance={:.2}, ransac=[iterations={}, threshold={:.1}px, min_inliers={}], weights=[{:.2}, {:.2}, {:.2}]\n  {}",
            self.knn_k,
            self.max_descriptor_distance,
            self.ransac.max_iterations,
            self.ransac.inlier_threshold,
            self.ransac.min_inliers,
            self.ranking.feature_weight,
            self.ranking.geometric_weight,
            self.ranking.global_weight,
            self.detector.summary(),
        )
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> SearchResult<()> {
        self.detector
            .validate()
            .map_err(|e| SearchError::Config(e.to_string()))?;

        if self.knn_k == 0 {
            return Err(SearchError::Config("knn_k must be at least 1".into()));
        }
        if !(self.max_descriptor_distance.is_finite() && self.max_descriptor_distance > 0.0) {
            return Err(SearchError::Config(format!(
                "max_descriptor_distance must be positive, got {}",
                self.max_descriptor_distance
            )));
        }
        if self.index.max_checks == Some(0) {
            return Err(SearchError::Config("index.max_checks must be at least 1".into()));
        }

        let ransac = &self.ransac;
        if ransac.max_iterations == 0 {
            return Err(SearchError::Config("ransac.max_iterations must be at least 1".into()));
        }
        if !(ransac.inlier_threshold.is_finite() && ransac.inlier_threshold > 0.0) {
            return Err(SearchError::Config(format!(
                "ransac.inlier_threshold must be positive, got {}",
                ransac.inlier_threshold
            )));
        }
        if !(ransac.early_termination_ratio > 0.0 && ransac.early_termination_ratio <= 1.0) {
            return Err(SearchError::Config(format!(
                "ransac.early_termination_ratio must be in (0, 1], got {}",
                ransac.early_termination_ratio
            )));
        }
        if !(ransac.max_scale_change.is_finite() && ransac.max_scale_change > 1.0) {
            return Err(SearchError::Config(format!(
                "ransac.max_scale_change must exceed 1, got {}",
                ransac.max_scale_change
            )));
        }

        self.ranking.validate()
    }

    /// Save configuration to JSON file
    #[cfg(feature = "serde")]
    pub fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> SearchResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load configuration from JSON file
    #[cfg(feature = "serde")]
    pub fn load_json<P: AsRef<std::path::Path>>(path: P) -> SearchResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Save configuration to TOML file
    #[cfg(feature = "serde")]
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> SearchResult<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Load configuration from TOML file
    #[cfg(feature = "serde")]
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> SearchResult<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Load from a `.json` or `.toml` file, chosen by extension
    #[cfg(feature = "serde")]
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> SearchResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::load_json(path),
            Some("toml") => Self::load_toml(path),
            other => Err(SearchError::Config(format!(
                "unsupported config extension {:?} (expected .json or .toml)",
                other.unwrap_or("")
            ))),
        }
    }

    /// Serialize to JSON string
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> SearchResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SearchError::Config(e.to_string()))
    }

    /// Deserialize from JSON string
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> SearchResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| SearchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML string
    #[cfg(feature = "serde")]
    pub fn to_toml(&self) -> SearchResult<String> {
        toml::to_string_pretty(self).map_err(|e| SearchError::Config(e.to_string()))
    }

    /// Deserialize from TOML string
    #[cfg(feature = "serde")]
    pub fn from_toml(toml_str: &str) -> SearchResult<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| SearchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(SearchConfig::default().validate().is_ok());
        assert!(SearchConfig::fast_preset().validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = SearchConfig::default();
        assert_eq!(config.knn_k, 5);
        assert_eq!(config.ransac.max_iterations, 1000);
        assert_eq!(config.ransac.early_termination_ratio, 0.8);
        assert_eq!(config.ransac.min_inliers, 10);
        assert_eq!(config.index.variance_split_depth, 10);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = SearchConfig::default();
        config.knn_k = 0;
        assert!(matches!(config.validate(), Err(SearchError::Config(_))));

        let mut config = SearchConfig::default();
        config.ransac.early_termination_ratio = 0.0;
        assert!(matches!(config.validate(), Err(SearchError::Config(_))));

        let mut config = SearchConfig::default();
        config.detector.core.octaves = 0;
        assert!(matches!(config.validate(), Err(SearchError::Config(_))));

        let mut config = SearchConfig::default();
        config.ranking.global_weight = 0.7;
        assert!(matches!(config.validate(), Err(SearchError::Config(_))));
    }

    #[test]
    fn test_summary() {
        let summary = SearchConfig::default().summary();
        assert!(summary.contains("k=5"));
        assert!(summary.contains("DetectorConfig"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_and_toml_roundtrip() {
        let mut config = SearchConfig::fast_preset();
        config.ransac.seed = 99;

        let restored = SearchConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored, config);

        let restored = SearchConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(restored, config);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_detector_section_roundtrip_and_validation() {
        let mut config = SearchConfig::default();
        config.detector = DetectorConfig::precision_preset().with_metadata("Custom", "Test config");
        let restored = SearchConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(restored.detector, config.detector);

        config.detector.core.octaves = 0;
        let toml_str = config.to_toml().unwrap();
        assert!(matches!(SearchConfig::from_toml(&toml_str), Err(SearchError::Config(_))));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SearchConfig::from_toml("knn_k = 3\n").unwrap();
        assert_eq!(config.knn_k, 3);
        assert_eq!(config.ransac, RansacConfig::default());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_unknown_extension_rejected() {
        assert!(matches!(SearchConfig::load("settings.yaml"), Err(SearchError::Config(_))));
    }
}
