use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::{debug, info, instrument, trace, warn};
use vsearch_core::{FeatureVector, Image, ImageId, ImageMatch};
use vsearch_descriptor::GlobalSignature;
use vsearch_index::{Neighbor, SpatialIndex};
use vsearch_verify::{GeometricVerifier, VerifiedMatch};

use crate::config::SearchConfig;
use crate::error::{SearchError, SearchResult};
use crate::extractor::FeatureExtractor;
use crate::pipeline::{aggregate_candidates, CancellationToken, PipelineStage, QueryOptions};
use crate::ranker::{RankCandidate, Ranker};

/// Everything extracted from one corpus image, ready for indexing
#[derive(Debug, Clone)]
pub struct ImageFeatures {
    pub image_id: ImageId,
    pub width: usize,
    pub height: usize,
    pub features: Vec<FeatureVector>,
    pub signature: GlobalSignature,
}

/// Immutable corpus state seen by queries
#[derive(Debug)]
pub struct CorpusSnapshot {
    index: SpatialIndex,
    signatures: HashMap<ImageId, GlobalSignature>,
    generation: u64,
}

impl CorpusSnapshot {
    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn signature(&self, image_id: ImageId) -> Option<&GlobalSignature> {
        self.signatures.get(&image_id)
    }

    pub fn image_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn feature_count(&self) -> usize {
        self.index.len()
    }

    /// Increases with every successful build of the owning engine
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Shared handle to a built snapshot
pub type IndexHandle = Arc<CorpusSnapshot>;

/// Indexing and query entry points over one logical corpus.
///
/// Queries run against whichever snapshot was current when they started.
/// Builds happen off to the side and replace the snapshot in one swap.
pub struct SearchEngine {
    config: SearchConfig,
    extractor: FeatureExtractor,
    verifier: GeometricVerifier,
    ranker: Ranker,
    current: RwLock<Option<IndexHandle>>,
    build_lock: Mutex<()>,
    generation: AtomicU64,
}

impl SearchEngine {
    pub fn new(config: SearchConfig) -> SearchResult<Self> {
        config.validate()?;
        Ok(Self {
            extractor: FeatureExtractor::new(config.detector.clone())?,
            verifier: GeometricVerifier::new(config.ransac.clone()),
            ranker: Ranker::new(config.ranking.clone()).with_max_scale_change(config.ransac.max_scale_change),
            config,
            current: RwLock::new(None),
            build_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Extract features and the global signature of one corpus image
    pub fn submit_image(&self, img: &Image) -> SearchResult<ImageFeatures> {
        let features = self.extractor.extract(img)?;
        Ok(ImageFeatures {
            image_id: img.id(),
            width: img.width(),
            height: img.height(),
            features,
            signature: GlobalSignature::compute(img),
        })
    }

    /// Extract many images on the worker pool
    #[instrument(skip_all, fields(images = images.len()))]
    pub fn index_corpus(&self, images: &[Image]) -> SearchResult<Vec<ImageFeatures>> {
        let corpus = images
            .par_iter()
            .map(|img| self.submit_image(img))
            .collect::<SearchResult<Vec<_>>>()?;
        info!(
            features = corpus.iter().map(|c| c.features.len()).sum::<usize>(),
            "corpus extracted"
        );
        Ok(corpus)
    }

    /// Build a new snapshot and make it current. On failure the previous
    /// snapshot stays in place.
    #[instrument(skip_all, fields(images = corpus.len()))]
    pub fn build_index(&self, corpus: Vec<ImageFeatures>) -> SearchResult<IndexHandle> {
        let _guard = self.build_lock.lock();

        let mut signatures = HashMap::with_capacity(corpus.len());
        let mut features = Vec::with_capacity(corpus.iter().map(|c| c.features.len()).sum());
        for entry in corpus {
            if signatures.insert(entry.image_id, entry.signature).is_some() {
                warn!(image_id = entry.image_id, "image submitted twice, features merged");
            }
            features.extend(entry.features);
        }

        let index = SpatialIndex::build(features, self.config.index.clone())?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = Arc::new(CorpusSnapshot {
            index,
            signatures,
            generation,
        });
        self.install(handle.clone());

        info!(
            generation,
            images = handle.image_count(),
            features = handle.feature_count(),
            depth = handle.index().depth(),
            "index snapshot installed"
        );
        Ok(handle)
    }

    /// Make a previously built snapshot current
    pub fn install(&self, handle: IndexHandle) {
        *self.current.write() = Some(handle);
    }

    /// Snapshot new queries will use, if any
    pub fn snapshot(&self) -> Option<IndexHandle> {
        self.current.read().clone()
    }

    pub fn query(&self, img: &Image, options: QueryOptions) -> SearchResult<Vec<ImageMatch>> {
        self.query_with_cancel(img, options, &CancellationToken::new())
    }

    /// Run the query pipeline, checking `cancel` before each stage up to verification
    #[instrument(skip_all, fields(image_id = img.id()))]
    pub fn query_with_cancel(
        &self,
        img: &Image,
        options: QueryOptions,
        cancel: &CancellationToken,
    ) -> SearchResult<Vec<ImageMatch>> {
        options.validate()?;
        let snapshot = self.snapshot().ok_or(SearchError::IndexUnavailable)?;

        let mut stage = PipelineStage::Extract;
        cancel.checkpoint(stage)?;
        let features = self.extractor.extract(img)?;
        if features.is_empty() {
            debug!("query has no features");
            return Ok(Vec::new());
        }

        stage = stage.next();
        cancel.checkpoint(stage)?;
        let k = self.config.knn_k;
        let neighbors: Vec<Vec<Neighbor<'_>>> = features
            .par_iter()
            .map(|f| snapshot.index().knn(&f.descriptor, k))
            .collect();

        stage = stage.next();
        cancel.checkpoint(stage)?;
        let candidates = aggregate_candidates(&features, &neighbors, self.config.max_descriptor_distance);
        debug!(candidates = candidates.len(), "correspondences aggregated");

        stage = stage.next();
        cancel.checkpoint(stage)?;
        let verified: Vec<VerifiedMatch> = candidates
            .par_iter()
            .filter_map(|candidate| match self.verifier.verify(candidate) {
                Ok(matched) => Some(matched),
                Err(rejection) => {
                    trace!(image_id = candidate.image_id, %rejection, "candidate rejected");
                    None
                }
            })
            .collect();

        stage = stage.next();
        debug_assert_eq!(stage, PipelineStage::Rank);
        let query_signature = GlobalSignature::compute(img);
        let ranked: Vec<RankCandidate> = verified
            .into_iter()
            .map(|verified| RankCandidate {
                global_score: snapshot
                    .signature(verified.image_id)
                    .map_or(0.0, |s| query_signature.similarity(s)),
                verified,
            })
            .collect();

        let results = self.ranker.rank(
            ranked,
            features.len(),
            (img.width(), img.height()),
            options.similarity_threshold,
            options.max_results,
        );
        debug!(
            features = features.len(),
            candidates = candidates.len(),
            results = results.len(),
            generation = snapshot.generation(),
            "query finished"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsearch_index::IndexError;

    fn create_test_engine() -> SearchEngine {
        SearchEngine::new(SearchConfig::default()).unwrap()
    }

    fn blob_image(id: ImageId, offset: i32) -> Image {
        let size = 96;
        let pixels = (0..size * size)
            .map(|i| {
                let (x, y) = ((i % size) as i32, (i / size) as i32);
                let near = |cx: i32, cy: i32, r: i32| (x - cx).pow(2) + (y - cy).pow(2) <= r * r;
                if near(25 + offset, 30, 5) || near(60, 35 + offset, 7) || near(40, 70, 4) { 230 } else { 25 }
            })
            .collect();
        Image::new(id, size, size, pixels)
    }

    #[test]
    fn test_query_before_build_is_unavailable() {
        let engine = create_test_engine();
        assert!(matches!(
            engine.query(&blob_image(1, 0), QueryOptions::default()),
            Err(SearchError::IndexUnavailable)
        ));
    }

    #[test]
    fn test_empty_build_keeps_previous_snapshot() {
        let engine = create_test_engine();
        assert!(matches!(
            engine.build_index(Vec::new()),
            Err(SearchError::Index(IndexError::Empty))
        ));
        assert!(engine.snapshot().is_none());

        let corpus = engine.index_corpus(&[blob_image(1, 0)]).unwrap();
        let first = engine.build_index(corpus).unwrap();
        assert_eq!(first.generation(), 1);

        assert!(engine.build_index(Vec::new()).is_err());
        let current = engine.snapshot().unwrap();
        assert!(Arc::ptr_eq(&current, &first));
    }

    #[test]
    fn test_rebuild_swaps_snapshot() {
        let engine = create_test_engine();
        let old = engine
            .build_index(engine.index_corpus(&[blob_image(1, 0)]).unwrap())
            .unwrap();
        let new = engine
            .build_index(engine.index_corpus(&[blob_image(1, 0), blob_image(2, 6)]).unwrap())
            .unwrap();

        assert_eq!(old.image_count(), 1);
        assert_eq!(new.image_count(), 2);
        assert!(new.generation() > old.generation());
        assert!(Arc::ptr_eq(&engine.snapshot().unwrap(), &new));
    }

    #[test]
    fn test_ranker_shares_ransac_scale_bound() {
        let mut config = SearchConfig::default();
        config.ransac = config.ransac.with_max_scale_change(3.5);
        let engine = SearchEngine::new(config).unwrap();
        assert_eq!(engine.ranker.max_scale_change(), 3.5);
    }

    #[test]
    fn test_invalid_options_fail_fast() {
        let engine = create_test_engine();
        assert!(matches!(
            engine.query(&blob_image(1, 0), QueryOptions::new(0.5, 0)),
            Err(SearchError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_cancelled_query() {
        let engine = create_test_engine();
        engine
            .build_index(engine.index_corpus(&[blob_image(1, 0)]).unwrap())
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            engine.query_with_cancel(&blob_image(1, 0), QueryOptions::default(), &token),
            Err(SearchError::Cancelled(PipelineStage::Extract))
        ));
    }

    #[test]
    fn test_featureless_query_is_empty() {
        let engine = create_test_engine();
        engine
            .build_index(engine.index_corpus(&[blob_image(1, 0)]).unwrap())
            .unwrap();
        let blank = Image::new(9, 64, 64, vec![128; 64 * 64]);
        assert!(engine.query(&blank, QueryOptions::default()).unwrap().is_empty());
    }
}
