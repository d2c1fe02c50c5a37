use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    #[error("Cannot build an index from zero features")]
    Empty,
    #[error("Tree depth {depth} exceeds the limit of {limit}")]
    DepthExceeded { depth: usize, limit: usize },
}

pub type IndexResult<T> = Result<T, IndexError>;
