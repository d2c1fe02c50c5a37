//! Visual similarity search.
//!
//! Corpus images go through [`SearchEngine::index_corpus`] and
//! [`SearchEngine::build_index`]; queries run
//! EXTRACT, INDEX_LOOKUP, AGGREGATE, VERIFY and RANK against the current
//! snapshot and return scored matches with bounding boxes.

pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod pipeline;
pub mod ranker;

use std::path::Path;

pub use config::SearchConfig;
pub use engine::{CorpusSnapshot, ImageFeatures, IndexHandle, SearchEngine};
pub use error::{SearchError, SearchResult};
pub use extractor::FeatureExtractor;
pub use pipeline::{aggregate_candidates, CancellationToken, PipelineStage, QueryOptions};
pub use ranker::{RankCandidate, Ranker, RankingConfig};

pub use vsearch_core::{self, init_thread_pool, FeatureVector, Image, ImageId, ImageMatch, Point};
pub use vsearch_descriptor::GlobalSignature;
pub use vsearch_dog::{DetectorBuilder, DetectorConfig};
pub use vsearch_index::IndexConfig;
pub use vsearch_verify::RansacConfig;

/// Decode any format supported by `image` into a grayscale corpus image
pub fn decode_image<P: AsRef<Path>>(path: P, id: ImageId) -> SearchResult<Image> {
    let path = path.as_ref();
    let luma = image::open(path)
        .map_err(|e| SearchError::Decode {
            path: path.display().to_string(),
            message: e.to_string(),
        })?
        .to_luma8();
    let (width, height) = luma.dimensions();
    Ok(Image::new(id, width as usize, height as usize, luma.into_raw())
        .with_metadata("path", path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_missing_file() {
        assert!(matches!(
            decode_image("does/not/exist.png", 1),
            Err(SearchError::Decode { .. })
        ));
    }

    #[test]
    fn test_decode_roundtrip_png() {
        let path = std::env::temp_dir().join(format!("vsearch_decode_{}.png", std::process::id()));
        let gray = image::GrayImage::from_fn(12, 7, |x, y| image::Luma([(x * 10 + y) as u8]));
        gray.save(&path).unwrap();

        let img = decode_image(&path, 5).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!((img.width(), img.height()), (12, 7));
        assert_eq!(img.pixel(3, 2), 32);
        assert_eq!(img.id(), 5);
        assert!(img.metadata().contains_key("path"));
    }
}
