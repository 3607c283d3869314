pub mod cascade;
pub mod clustering;
pub mod extractors;
pub mod field_correction;
pub mod normalize;
pub mod tables;
pub mod tokens;

pub use cascade::{MarkerSet, PatternCascade};
pub use clustering::{cluster_rows, Row};
pub use extractors::{FieldFamily, PatternMatcher};
pub use field_correction::CandidateResolver;
pub use normalize::{normalize, normalized_lines};
pub use tables::{classify_report, TableExtractor};
pub use tokens::{group_lines, parse_tesseract_tsv};
