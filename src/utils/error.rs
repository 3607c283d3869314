use thiserror::Error;

/// Document-level failures. Field-level data-quality outcomes (absence,
/// out-of-range values, ambiguous laterality) are not errors and never
/// surface through this type.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Malformed OCR input: {0}")]
    MalformedInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl ExtractionError {
    /// True when the document should be flagged for manual review rather
    /// than treated as a pipeline fault.
    pub fn needs_manual_review(&self) -> bool {
        matches!(self, ExtractionError::MalformedInput(_))
    }
}
