use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("Unsupported artifact: {0}")]
    Unsupported(String),

    #[error("Artifact too large: {size} bytes exceeds limit of {limit} bytes")]
    Oversized { size: usize, limit: usize },
}
