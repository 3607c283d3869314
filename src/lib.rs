pub mod models;
pub mod processing;
pub mod validation;
pub mod utils;
pub mod field_extractor;

pub use field_extractor::FieldExtractor;
pub use models::{DocumentExtraction, DocumentReport, ExtractionConfig, OcrInput, OcrToken};
pub use utils::ExtractionError;
