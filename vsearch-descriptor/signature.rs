use vsearch_core::Image;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Intensity histogram bins (32 levels of 8 grey values each)
pub const HISTOGRAM_BINS: usize = 32;
/// Thumbnail grid side
pub const THUMBNAIL_SIDE: usize = 8;

/// Whole-image appearance summary used for the global similarity score
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GlobalSignature {
    /// Normalized intensity histogram, sums to 1
    pub histogram: Vec<f32>,
    /// Row-major block means in [0, 1]
    pub thumbnail: Vec<f32>,
}

impl GlobalSignature {
    pub fn compute(img: &Image) -> Self {
        let mut histogram = vec![0.0f32; HISTOGRAM_BINS];
        for &p in img.pixels() {
            histogram[(p as usize * HISTOGRAM_BINS) / 256] += 1.0;
        }
        let total = img.pixels().len() as f32;
        if total > 0.0 {
            histogram.iter_mut().for_each(|v| *v /= total);
        }

        Self {
            histogram,
            thumbnail: Self::thumbnail(img),
        }
    }

    fn thumbnail(img: &Image) -> Vec<f32> {
        let (w, h) = (img.width(), img.height());
        let mut sums = vec![0.0f64; THUMBNAIL_SIDE * THUMBNAIL_SIDE];
        let mut counts = vec![0usize; THUMBNAIL_SIDE * THUMBNAIL_SIDE];

        for y in 0..h {
            let cy = y * THUMBNAIL_SIDE / h;
            for x in 0..w {
                let cell = cy * THUMBNAIL_SIDE + x * THUMBNAIL_SIDE / w;
                sums[cell] += img.pixel(x, y) as f64;
                counts[cell] += 1;
            }
        }

        let overall = if w * h > 0 {
            sums.iter().sum::<f64>() / (w * h) as f64
        } else {
            0.0
        };

        // Images narrower than the grid leave cells empty
        sums.iter()
            .zip(&counts)
            .map(|(&sum, &count)| {
                let mean = if count > 0 { sum / count as f64 } else { overall };
                (mean / 255.0) as f32
            })
            .collect()
    }

    /// Similarity in [0, 1]: half histogram intersection, half thumbnail agreement
    pub fn similarity(&self, other: &GlobalSignature) -> f32 {
        let intersection: f32 = self
            .histogram
            .iter()
            .zip(&other.histogram)
            .map(|(a, b)| a.min(*b))
            .sum();

        let mad = if self.thumbnail.len() == other.thumbnail.len() && !self.thumbnail.is_empty() {
            self.thumbnail
                .iter()
                .zip(&other.thumbnail)
                .map(|(a, b)| (a - b).abs())
                .sum::<f32>()
                / self.thumbnail.len() as f32
        } else {
            1.0
        };

        (0.5 * intersection + 0.5 * (1.0 - mad)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(w: usize, h: usize) -> Image {
        let pixels = (0..w * h).map(|i| ((i % w) * 255 / w.max(1)) as u8).collect();
        Image::new(1, w, h, pixels)
    }

    #[test]
    fn test_histogram_sums_to_one() {
        let sig = GlobalSignature::compute(&gradient_image(40, 30));
        let total: f32 = sig.histogram.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(sig.thumbnail.len(), THUMBNAIL_SIDE * THUMBNAIL_SIDE);
    }

    #[test]
    fn test_identical_images_score_one() {
        let sig = GlobalSignature::compute(&gradient_image(64, 64));
        assert!((sig.similarity(&sig) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_inverted_image_scores_lower() {
        let img = gradient_image(64, 64);
        let inverted = Image::new(2, 64, 64, img.pixels().iter().map(|p| 255 - p).collect());
        let dark = Image::new(3, 64, 64, vec![10; 64 * 64]);

        let a = GlobalSignature::compute(&img);
        let b = GlobalSignature::compute(&inverted);
        let c = GlobalSignature::compute(&dark);
        assert!(a.similarity(&b) < 1.0);
        assert!(a.similarity(&c) < a.similarity(&a));
        assert!((a.similarity(&b) - b.similarity(&a)).abs() < 1e-6);
    }

    #[test]
    fn test_small_image_fills_empty_cells() {
        let img = Image::new(1, 3, 2, vec![255; 6]);
        let sig = GlobalSignature::compute(&img);
        assert!(sig.thumbnail.iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }
}
