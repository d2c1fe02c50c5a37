use thiserror::Error;
use vsearch_dog::ExtractError;
use vsearch_index::IndexError;

use crate::pipeline::PipelineStage;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Feature extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("Index build failed: {0}")]
    Index(#[from] IndexError),
    #[error("No index has been built yet")]
    IndexUnavailable,
    #[error("Invalid query options: {0}")]
    InvalidOptions(String),
    #[error("Query cancelled before {0}")]
    Cancelled(PipelineStage),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Could not decode image {path}: {message}")]
    Decode { path: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SearchResult<T> = Result<T, SearchError>;
