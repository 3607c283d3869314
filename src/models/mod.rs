pub mod data;
pub mod rules;

pub use data::*;
pub use rules::{Bounds, ExtractionConfig, Region, TableLayout, Vocabulary, WindowConfig};
