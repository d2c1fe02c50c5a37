use rayon::prelude::*;
use vsearch_core::{Image, Octave, Plane, ScaleSpace, SiftConfig};

use crate::types::OctaveLevel;

/// Gaussian and Difference-of-Gaussian pyramid construction
pub struct ImagePyramid;

impl ImagePyramid {
    /// Generate octave geometry, halving until an octave would drop below `min_size`
    pub fn generate_octave_levels(
        width: usize,
        height: usize,
        max_octaves: usize,
        min_size: usize,
    ) -> Vec<OctaveLevel> {
        let mut levels = Vec::new();
        let (mut w, mut h) = (width, height);

        while w >= min_size && h >= min_size && levels.len() < max_octaves {
            levels.push(OctaveLevel {
                index: levels.len(),
                scale: (1usize << levels.len()) as f32,
                width: w,
                height: h,
            });
            w /= 2;
            h /= 2;
        }

        levels
    }

    /// Incremental blur applied to reach each Gaussian layer from the previous one.
    /// Entry 0 is the total blur of the first layer.
    pub fn layer_sigmas(cfg: &SiftConfig) -> Vec<f32> {
        let s = cfg.scales_per_octave;
        let k = 2f32.powf(1.0 / s as f32);
        let mut sigmas = Vec::with_capacity(s + 3);
        sigmas.push(cfg.sigma);
        for i in 1..s + 3 {
            let prev = cfg.sigma * k.powi(i as i32 - 1);
            let total = prev * k;
            sigmas.push((total * total - prev * prev).sqrt());
        }
        sigmas
    }

    /// Build the full scale space for the given octave geometry
    pub fn build_scale_space(img: &Image, cfg: &SiftConfig, levels: &[OctaveLevel]) -> ScaleSpace {
        let s = cfg.scales_per_octave;
        let sigmas = Self::layer_sigmas(cfg);
        let mut octaves: Vec<Octave> = Vec::with_capacity(levels.len());

        for level in levels {
            let base = match octaves.last() {
                // Layer `s` of the previous octave carries twice the base blur
                Some(prev) => prev.gaussians[s].downsample_half(),
                None => {
                    let initial = (cfg.sigma * cfg.sigma - cfg.assumed_blur * cfg.assumed_blur)
                        .max(0.01)
                        .sqrt();
                    Self::gaussian_blur(&Plane::from_image(img), initial)
                }
            };
            debug_assert_eq!((base.width, base.height), (level.width, level.height));

            let mut gaussians = Vec::with_capacity(s + 3);
            gaussians.push(base);
            for sigma in sigmas.iter().skip(1) {
                let next = Self::gaussian_blur(&gaussians[gaussians.len() - 1], *sigma);
                gaussians.push(next);
            }

            let dogs = gaussians
                .windows(2)
                .map(|pair| Self::difference(&pair[1], &pair[0]))
                .collect();

            octaves.push(Octave {
                index: level.index,
                gaussians,
                dogs,
            });
        }

        ScaleSpace {
            octaves,
            scales_per_octave: s,
            sigma: cfg.sigma,
        }
    }

    /// Separable Gaussian blur with clamped borders
    pub fn gaussian_blur(plane: &Plane, sigma: f32) -> Plane {
        let kernel = Self::gaussian_kernel(sigma);
        let radius = (kernel.len() / 2) as isize;
        let (w, h) = (plane.width, plane.height);
        if w == 0 || h == 0 {
            return plane.clone();
        }

        let mut horizontal = Plane::new(w, h);
        horizontal
            .data
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = kernel
                        .iter()
                        .enumerate()
                        .map(|(k, &weight)| {
                            weight * plane.get_clamped(x as isize + k as isize - radius, y as isize)
                        })
                        .sum();
                }
            });

        let mut blurred = Plane::new(w, h);
        blurred
            .data
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = kernel
                        .iter()
                        .enumerate()
                        .map(|(k, &weight)| {
                            weight * horizontal.get_clamped(x as isize, y as isize + k as isize - radius)
                        })
                        .sum();
                }
            });

        blurred
    }

    /// Normalized 1-D Gaussian kernel covering +-3 sigma
    pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
        let radius = (3.0 * sigma).ceil().max(1.0) as isize;
        let denom = 2.0 * sigma * sigma;
        let mut kernel: Vec<f32> = (-radius..=radius)
            .map(|i| (-((i * i) as f32) / denom).exp())
            .collect();
        let sum: f32 = kernel.iter().sum();
        for v in kernel.iter_mut() {
            *v /= sum;
        }
        kernel
    }

    fn difference(upper: &Plane, lower: &Plane) -> Plane {
        Plane {
            width: upper.width,
            height: upper.height,
            data: upper
                .data
                .iter()
                .zip(lower.data.iter())
                .map(|(a, b)| a - b)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> SiftConfig {
        SiftConfig {
            n_threads: 1,
            ..SiftConfig::default()
        }
    }

    #[test]
    fn test_octave_levels_halve() {
        let levels = ImagePyramid::generate_octave_levels(128, 96, 8, 16);
        let sizes: Vec<_> = levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, vec![(128, 96), (64, 48), (32, 24)]);
        assert_eq!(levels[2].scale, 4.0);
    }

    #[test]
    fn test_octave_levels_respect_max() {
        assert_eq!(ImagePyramid::generate_octave_levels(1024, 1024, 4, 16).len(), 4);
    }

    #[test]
    fn test_octave_levels_too_small() {
        assert!(ImagePyramid::generate_octave_levels(15, 200, 4, 16).is_empty());
    }

    #[test]
    fn test_layer_sigmas_compose_geometrically() {
        let cfg = create_test_config();
        let sigmas = ImagePyramid::layer_sigmas(&cfg);
        assert_eq!(sigmas.len(), cfg.scales_per_octave + 3);

        // Accumulated blur after layer s doubles the base sigma
        let total_sq: f32 = sigmas
            .iter()
            .take(cfg.scales_per_octave + 1)
            .map(|s| s * s)
            .sum();
        assert!((total_sq.sqrt() - 2.0 * cfg.sigma).abs() < 1e-3);
    }

    #[test]
    fn test_kernel_normalized() {
        let kernel = ImagePyramid::gaussian_kernel(1.6);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(kernel.len() % 2, 1);
    }

    #[test]
    fn test_blur_preserves_constant_plane() {
        let plane = Plane {
            width: 10,
            height: 7,
            data: vec![0.5; 70],
        };
        let blurred = ImagePyramid::gaussian_blur(&plane, 2.0);
        assert!(blurred.data.iter().all(|v| (v - 0.5).abs() < 1e-5));
    }

    #[test]
    fn test_scale_space_shape() {
        let cfg = create_test_config();
        let img = Image::new(1, 64, 48, vec![128; 64 * 48]);
        let levels = ImagePyramid::generate_octave_levels(64, 48, cfg.octaves, 16);
        let space = ImagePyramid::build_scale_space(&img, &cfg, &levels);

        assert_eq!(space.octaves.len(), 2);
        for octave in &space.octaves {
            assert_eq!(octave.gaussians.len(), cfg.scales_per_octave + 3);
            assert_eq!(octave.dogs.len(), cfg.scales_per_octave + 2);
        }
        assert_eq!((space.octaves[1].width(), space.octaves[1].height()), (32, 24));
        // Flat input has no DoG response
        assert!(space.octaves[0].dogs.iter().all(|d| d.data.iter().all(|v| v.abs() < 1e-5)));
    }
}
