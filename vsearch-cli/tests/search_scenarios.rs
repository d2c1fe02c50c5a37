//! End-to-end search over small synthetic corpora.

use std::thread;

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::rect::Rect;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vsearch_cli::{
    CancellationToken, Image, ImageId, ImageMatch, PipelineStage, QueryOptions, SearchConfig, SearchEngine,
    SearchError,
};
use vsearch_index::IndexError;

const SIZE: u32 = 192;
const BACKGROUND: u8 = 90;

/// Random disks and rectangles kept away from the border so rotation does
/// not cut them off
fn textured(seed: u64) -> GrayImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut canvas = GrayImage::from_pixel(SIZE, SIZE, Luma([BACKGROUND]));
    for _ in 0..45 {
        let shade = Luma([rng.random_range(0..=255u8)]);
        let x = rng.random_range(28..164i32);
        let y = rng.random_range(28..164i32);
        if rng.random::<bool>() {
            draw_filled_circle_mut(&mut canvas, (x, y), rng.random_range(3..10), shade);
        } else {
            let w = rng.random_range(4..16u32);
            let h = rng.random_range(4..16u32);
            draw_filled_rect_mut(&mut canvas, Rect::at(x, y).of_size(w, h), shade);
        }
    }
    canvas
}

fn rotated(src: &GrayImage, degrees: f32) -> GrayImage {
    rotate_about_center(src, degrees.to_radians(), Interpolation::Bilinear, Luma([BACKGROUND]))
}

fn to_image(id: ImageId, gray: GrayImage) -> Image {
    let (w, h) = gray.dimensions();
    Image::new(id, w as usize, h as usize, gray.into_raw())
}

const A: ImageId = 0;
const A_ROTATED: ImageId = 1;
const B: ImageId = 2;
const QUERY: ImageId = 1000;

fn corpus() -> Vec<Image> {
    let a = textured(7);
    vec![
        to_image(A_ROTATED, rotated(&a, 10.0)),
        to_image(A, a),
        to_image(B, textured(99)),
    ]
}

fn indexed_engine(images: &[Image]) -> SearchEngine {
    let engine = SearchEngine::new(SearchConfig::default()).unwrap();
    let features = engine.index_corpus(images).unwrap();
    engine.build_index(features).unwrap();
    engine
}

fn position(results: &[ImageMatch], id: ImageId) -> Option<usize> {
    results.iter().position(|m| m.image_id == id)
}

#[test]
fn identical_image_ranks_first() {
    let engine = indexed_engine(&corpus());
    let query = to_image(QUERY, textured(7));

    let results = engine.query(&query, QueryOptions::default()).unwrap();
    assert!(!results.is_empty());

    let best = &results[0];
    assert_eq!(best.image_id, A);
    assert!(best.score >= 0.95, "score {}", best.score);
    assert!(best.score <= 1.0);

    // The box of an identical image hugs the image corners
    let corners = [(0.0, 0.0), (SIZE as f64, 0.0), (SIZE as f64, SIZE as f64), (0.0, SIZE as f64)];
    for (p, (x, y)) in best.bounding_box.iter().zip(corners) {
        assert!((p.x - x).abs() < 2.0 && (p.y - y).abs() < 2.0, "corner {:?}", p);
    }
}

#[test]
fn rotated_copy_outranks_unrelated_image() {
    let engine = indexed_engine(&corpus());
    let query = to_image(QUERY, textured(7));

    let results = engine.query(&query, QueryOptions::default()).unwrap();
    let rotated_at = position(&results, A_ROTATED).expect("rotated copy verified");
    if let Some(unrelated_at) = position(&results, B) {
        assert!(rotated_at < unrelated_at);
    }
    assert!(results[rotated_at].inlier_count >= 10);
}

#[test]
fn threshold_above_one_returns_nothing() {
    let engine = indexed_engine(&corpus());
    let query = to_image(QUERY, textured(7));
    let results = engine.query(&query, QueryOptions::new(1.1, 10)).unwrap();
    assert!(results.is_empty());
}

#[test]
fn max_results_truncates() {
    let engine = indexed_engine(&corpus());
    let query = to_image(QUERY, textured(7));
    let results = engine.query(&query, QueryOptions::new(0.0, 1)).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].image_id, A);
}

#[test]
fn repeated_queries_agree() {
    let engine = indexed_engine(&corpus());
    let query = to_image(QUERY, textured(7));
    let first = engine.query(&query, QueryOptions::default()).unwrap();
    let second = engine.query(&query, QueryOptions::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn empty_corpus_is_unavailable() {
    let engine = SearchEngine::new(SearchConfig::default()).unwrap();
    assert!(matches!(
        engine.build_index(Vec::new()),
        Err(SearchError::Index(IndexError::Empty))
    ));
    let query = to_image(QUERY, textured(7));
    assert!(matches!(
        engine.query(&query, QueryOptions::default()),
        Err(SearchError::IndexUnavailable)
    ));
}

#[test]
fn cancelled_before_start() {
    let engine = indexed_engine(&corpus());
    let token = CancellationToken::new();
    token.cancel();
    let query = to_image(QUERY, textured(7));
    assert!(matches!(
        engine.query_with_cancel(&query, QueryOptions::default(), &token),
        Err(SearchError::Cancelled(PipelineStage::Extract))
    ));
}

#[test]
fn queries_survive_concurrent_rebuild() {
    let images = corpus();
    let engine = indexed_engine(&images[..2]);
    let query = to_image(QUERY, textured(7));
    let full = engine.index_corpus(&images).unwrap();

    thread::scope(|s| {
        let readers: Vec<_> = (0..3)
            .map(|_| {
                s.spawn(|| {
                    for _ in 0..2 {
                        let results = engine.query(&query, QueryOptions::default()).unwrap();
                        assert_eq!(results[0].image_id, A);
                    }
                })
            })
            .collect();
        s.spawn(|| engine.build_index(full.clone()).unwrap());
        for reader in readers {
            reader.join().unwrap();
        }
    });

    let snapshot = engine.snapshot().unwrap();
    assert_eq!(snapshot.image_count(), 3);
    assert_eq!(snapshot.generation(), 2);
}
