use vsearch_core::{Keypoint, ScaleSpace};

/// Raw 3x3x3 DoG extremum before subpixel refinement
#[derive(Debug, Clone, Copy)]
pub struct Extremum {
    pub octave: usize,
    /// DoG layer, always in `1..=scales_per_octave`
    pub layer: usize,
    pub x: usize,
    pub y: usize,
    pub value: f32,
}

/// Geometry of one pyramid octave
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OctaveLevel {
    pub index: usize,
    /// Downsampling factor relative to the input image
    pub scale: f32,
    pub width: usize,
    pub height: usize,
}

/// Scale space plus the keypoints found in it
#[derive(Debug, Clone)]
pub struct Detection {
    pub scale_space: ScaleSpace,
    pub keypoints: Vec<Keypoint>,
}
