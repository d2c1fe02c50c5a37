use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Caller-assigned identifier of a corpus image
pub type ImageId = u64;

/// Dimensionality of a local feature descriptor (4x4 cells x 8 orientation bins)
pub const DESCRIPTOR_LEN: usize = 128;

/// Gradient-histogram descriptor, unit L2 norm once generated
pub type Descriptor = [f32; DESCRIPTOR_LEN];

/// Row-major 8-bit grayscale raster. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    id: ImageId,
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    metadata: BTreeMap<String, String>,
}

impl Image {
    pub fn new(id: ImageId, width: usize, height: usize, pixels: Vec<u8>) -> Self {
        Self {
            id,
            width,
            height,
            pixels,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach an opaque metadata entry (source path, thumbnail key, ...)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Non-zero dimensions and a pixel buffer of exactly `width * height` bytes
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.width * self.height
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }
}

/// Single-channel floating point plane, intensities in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_image(img: &Image) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            data: img.pixels().iter().map(|&p| p as f32 / 255.0).collect(),
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Sample with coordinates clamped to the plane edge
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let xx = x.clamp(0, self.width as isize - 1) as usize;
        let yy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[yy * self.width + xx]
    }

    /// Keep every second pixel in both directions
    pub fn downsample_half(&self) -> Plane {
        let width = self.width / 2;
        let height = self.height / 2;
        let mut out = Plane::new(width, height);
        for y in 0..height {
            for x in 0..width {
                out.data[y * width + x] = self.get(x * 2, y * 2);
            }
        }
        out
    }
}

/// One octave of the scale space: `s + 3` Gaussian layers and `s + 2` DoG layers
#[derive(Debug, Clone)]
pub struct Octave {
    pub index: usize,
    pub gaussians: Vec<Plane>,
    pub dogs: Vec<Plane>,
}

impl Octave {
    pub fn width(&self) -> usize {
        self.gaussians.first().map_or(0, |g| g.width)
    }

    pub fn height(&self) -> usize {
        self.gaussians.first().map_or(0, |g| g.height)
    }

    /// Size of one octave pixel in base image pixels
    pub fn pixel_size(&self) -> f32 {
        (1usize << self.index) as f32
    }
}

/// Multi-octave Gaussian / Difference-of-Gaussian pyramid
#[derive(Debug, Clone)]
pub struct ScaleSpace {
    pub octaves: Vec<Octave>,
    pub scales_per_octave: usize,
    pub sigma: f32,
}

impl ScaleSpace {
    /// Blur of a (possibly fractional) layer, relative to its own octave
    pub fn layer_sigma(&self, layer: f32) -> f32 {
        self.sigma * 2f32.powf(layer / self.scales_per_octave as f32)
    }

    pub fn is_empty(&self) -> bool {
        self.octaves.is_empty()
    }
}

/// Scale-space extremum after refinement and orientation assignment
#[derive(Debug, Clone, Copy)]
pub struct Keypoint {
    /// Subpixel x in base image coordinates
    pub x: f32,
    /// Subpixel y in base image coordinates
    pub y: f32,
    pub octave: usize,
    /// Gaussian layer nearest to the refined scale
    pub layer: usize,
    /// Absolute blur sigma in base image pixels
    pub sigma: f32,
    /// Dominant gradient orientation (radians)
    pub angle: f32,
    /// |DoG| at the refined extremum
    pub response: f32,
}

impl Keypoint {
    /// Position in the coordinates of the keypoint's own octave
    pub fn octave_position(&self) -> (f32, f32) {
        let size = (1usize << self.octave) as f32;
        (self.x / size, self.y / size)
    }

    /// Blur sigma measured in octave pixels
    pub fn octave_sigma(&self) -> f32 {
        self.sigma / (1usize << self.octave) as f32
    }
}

/// 2-D point in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Local feature owned by exactly one image
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureVector {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub orientation: f32,
    #[cfg_attr(feature = "serde", serde(with = "descriptor_serde"))]
    pub descriptor: Descriptor,
    pub owner: ImageId,
}

impl FeatureVector {
    pub fn position(&self) -> Point {
        Point::new(self.x as f64, self.y as f64)
    }

    #[inline]
    pub fn squared_distance(&self, other: &Descriptor) -> f32 {
        squared_distance(&self.descriptor, other)
    }

    pub fn descriptor_norm(&self) -> f32 {
        self.descriptor
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt() as f32
    }
}

/// Squared Euclidean distance between two descriptors
#[inline]
pub fn squared_distance(a: &Descriptor, b: &Descriptor) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Ranked search result
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImageMatch {
    pub image_id: ImageId,
    /// Combined score in [0, 1]
    pub score: f32,
    pub feature_score: f32,
    pub geometric_score: f32,
    pub global_score: f32,
    pub inlier_count: usize,
    /// Query image corners projected into the matched image (TL, TR, BR, BL)
    pub bounding_box: [Point; 4],
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SiftConfig {
    /// Upper bound on octaves; small images get fewer
    pub octaves: usize,
    pub scales_per_octave: usize,
    /// Blur of the first layer of every octave
    pub sigma: f32,
    /// Blur assumed present in the input image
    pub assumed_blur: f32,
    /// Minimum |DoG| (scaled by scales_per_octave) of a keypoint
    pub contrast_threshold: f32,
    /// Maximum principal curvature ratio before a point counts as an edge
    pub edge_threshold: f32,
    pub n_threads: usize,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            octaves: 4,
            scales_per_octave: 3,
            sigma: 1.6,
            assumed_blur: 0.5,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            n_threads: num_cpus::get().max(1),
        }
    }
}

/// Initialize Rayon thread pool with the specified number of threads
pub fn init_thread_pool(n_threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()
}

#[cfg(feature = "serde")]
mod descriptor_serde {
    use super::Descriptor;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Descriptor, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(d.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Descriptor, D::Error> {
        let values = Vec::<f32>::deserialize(d)?;
        let len = values.len();
        values
            .try_into()
            .map_err(|_| D::Error::invalid_length(len, &"128 descriptor values"))
    }
}
