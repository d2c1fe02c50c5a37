use tracing::debug;
use vsearch_core::{FeatureVector, Image, Keypoint};
use vsearch_descriptor::DescriptorGenerator;
use vsearch_dog::{DetectorConfig, DogDetector, ExtractResult};

/// DoG keypoint detection followed by descriptor generation
pub struct FeatureExtractor {
    detector: DogDetector,
    descriptors: DescriptorGenerator,
}

impl FeatureExtractor {
    /// Create an extractor with the given detector configuration
    pub fn new(config: DetectorConfig) -> ExtractResult<Self> {
        Ok(Self {
            detector: DogDetector::new(config)?,
            descriptors: DescriptorGenerator::new(),
        })
    }

    /// Extract unit-norm feature vectors owned by `img`.
    /// An image without usable structure yields an empty list.
    pub fn extract(&self, img: &Image) -> ExtractResult<Vec<FeatureVector>> {
        let detection = self.detector.detect(img)?;
        let features = self
            .descriptors
            .generate(&detection.scale_space, &detection.keypoints, img.id());
        debug!(
            image_id = img.id(),
            keypoints = detection.keypoints.len(),
            features = features.len(),
            "features extracted"
        );
        Ok(features)
    }

    /// Detect keypoints only
    pub fn detect_keypoints(&self, img: &Image) -> ExtractResult<Vec<Keypoint>> {
        self.detector.detect_keypoints(img)
    }

    /// Get detector configuration
    pub fn config(&self) -> &DetectorConfig {
        self.detector.config()
    }
}
