use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::rect::Rect;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Instant;
use vsearch_cli::{DetectorBuilder, Image, ImageId, QueryOptions, SearchConfig, SearchEngine};

const SIZE: u32 = 256;

fn scene(seed: u64) -> GrayImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut canvas = GrayImage::from_pixel(SIZE, SIZE, Luma([100]));
    for _ in 0..80 {
        let shade = Luma([rng.random_range(0..=255u8)]);
        let (x, y) = (rng.random_range(32..224i32), rng.random_range(32..224i32));
        if rng.random::<bool>() {
            draw_filled_circle_mut(&mut canvas, (x, y), rng.random_range(3..12), shade);
        } else {
            let rect = Rect::at(x, y).of_size(rng.random_range(4..20), rng.random_range(4..20));
            draw_filled_rect_mut(&mut canvas, rect, shade);
        }
    }
    canvas
}

fn to_image(id: ImageId, gray: GrayImage) -> Image {
    let (w, h) = gray.dimensions();
    Image::new(id, w as usize, h as usize, gray.into_raw())
        .with_metadata("name", format!("scene-{}", id))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔎 Visual Similarity Search Demo");
    println!("================================\n");

    // Corpus: five unrelated scenes plus rotated copies of scene 0
    let base = scene(0);
    let mut corpus: Vec<Image> = (0..5).map(|i| to_image(i, scene(i))).collect();
    for (offset, degrees) in [(0u64, 5.0f32), (1, 15.0), (2, 30.0)] {
        let turned = rotate_about_center(&base, degrees.to_radians(), Interpolation::Bilinear, Luma([100]));
        corpus.push(to_image(10 + offset, turned));
    }
    println!("📚 Corpus: {} images of {}x{}", corpus.len(), SIZE, SIZE);

    for (label, detector) in [
        ("balanced", DetectorBuilder::new()),
        ("fast", DetectorBuilder::new().preset_fast()),
        ("precision", DetectorBuilder::new().preset_precision()),
    ] {
        println!("\n⚙️  Detector preset: {}", label);
        let config = SearchConfig {
            detector: detector.to_config(),
            ..SearchConfig::default()
        };
        let engine = SearchEngine::new(config)?;

        let start = Instant::now();
        let features = engine.index_corpus(&corpus)?;
        let snapshot = engine.build_index(features)?;
        println!(
            "   Indexed {} features (tree depth {}) in {:.2?}",
            snapshot.feature_count(),
            snapshot.index().depth(),
            start.elapsed()
        );

        let query = to_image(999, base.clone());
        let start = Instant::now();
        let results = engine.query(&query, QueryOptions::new(0.1, 5))?;
        println!("   Query took {:.2?}", start.elapsed());

        for m in &results {
            println!(
                "   #{:<3} score {:.3}  inliers {:>4}  box TL ({:.0}, {:.0})",
                m.image_id, m.score, m.inlier_count, m.bounding_box[0].x, m.bounding_box[0].y
            );
        }
        if results.is_empty() {
            println!("   No matches above threshold");
        }
    }

    println!("\n✅ Done");
    Ok(())
}
