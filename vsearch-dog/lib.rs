//! Difference-of-Gaussian keypoint detection.
//!
//! Builds a Gaussian scale space, finds 3x3x3 DoG extrema, refines them to
//! subpixel accuracy, rejects low-contrast and edge responses and assigns one
//! keypoint per dominant gradient orientation.

pub mod builder;
pub mod config;
pub mod detector;
pub mod error;
pub mod pyramid;
pub mod refinement;
pub mod types;
pub mod utils;

pub use builder::DetectorBuilder;
pub use config::DetectorConfig;
pub use detector::DogDetector;
pub use error::{ExtractError, ExtractResult};
pub use pyramid::ImagePyramid;
pub use refinement::KeypointRefinement;
pub use types::{Detection, Extremum, OctaveLevel};
