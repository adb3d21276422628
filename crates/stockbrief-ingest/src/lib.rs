pub mod budget;
pub mod error;
pub mod ingestor;
pub mod tabular;

pub use budget::{truncate_text, TRUNCATION_MARKER};
pub use error::IngestError;
pub use ingestor::{ArtifactIngestor, IngestOutcome};
