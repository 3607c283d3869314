use crate::models::{BoundingBox, FieldKind};
use crate::utils::ExtractionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Inclusive plausibility bounds for a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Bounds { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Declared physical ranges per field. `None` means the field carries no
/// numeric value (the intraocular-lens flag).
pub fn default_bounds(field: FieldKind) -> Option<Bounds> {
    match field {
        FieldKind::VisualAcuityNaked | FieldKind::VisualAcuityCorrected => {
            Some(Bounds::new(0.0, 2.5))
        }
        FieldKind::IntraocularLens => None,
        FieldKind::IntraocularPressure => Some(Bounds::new(0.0, 80.0)),
        FieldKind::RefractionSphere | FieldKind::RefractionCylinder => {
            Some(Bounds::new(-30.0, 30.0))
        }
        FieldKind::RefractionAxis => Some(Bounds::new(0.0, 180.0)),
        FieldKind::RnflTotal | FieldKind::RnflSuperior | FieldKind::RnflInferior => {
            Some(Bounds::new(30.0, 200.0))
        }
        FieldKind::RimArea | FieldKind::DiscArea => Some(Bounds::new(0.0, 4.0)),
        FieldKind::CupVolume => Some(Bounds::new(0.0, 1.5)),
        FieldKind::SignalStrength => Some(Bounds::new(20.0, 100.0)),
    }
}

/// Non-numeric values a field may legitimately carry.
pub fn allowed_sentinels(field: FieldKind) -> &'static [&'static str] {
    match field {
        FieldKind::VisualAcuityCorrected => &["n.c."],
        _ => &[],
    }
}

/// Read-only marker dictionaries. Compiled once into matchers and passed
/// explicitly to whoever needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub acuity_right_markers: Vec<String>,
    pub acuity_left_markers: Vec<String>,
    pub right_eye_words: Vec<String>,
    pub left_eye_words: Vec<String>,
    pub iop_markers: Vec<String>,
    pub date_markers: Vec<String>,
    pub intraocular_lens_markers: Vec<String>,
    pub naked_markers: Vec<String>,
    pub corrected_markers: Vec<String>,
    pub no_correction_markers: Vec<String>,
    pub sphere_labels: Vec<String>,
    pub cylinder_labels: Vec<String>,
    pub axis_labels: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        Vocabulary {
            acuity_right_markers: strings(&["V.d.", "V.d", "Vd"]),
            acuity_left_markers: strings(&["V.s.", "V.s", "Vs"]),
            right_eye_words: strings(&["od", "right", "r", "右"]),
            left_eye_words: strings(&["os", "left", "l", "左"]),
            iop_markers: strings(&["AT", "IOP", "NCT", "眼圧", "EYE PRESSURE"]),
            date_markers: strings(&["DATE", "日付"]),
            intraocular_lens_markers: strings(&["IOL", "lOL", "TOL", "FOL", "EOL", "1OL"]),
            naked_markers: strings(&["裸眼"]),
            corrected_markers: strings(&["矯正", "矯"]),
            no_correction_markers: strings(&["n.c", "n. c", "矯正不能"]),
            sphere_labels: strings(&["sph", "s", "球面"]),
            cylinder_labels: strings(&["cyl", "c", "円柱"]),
            axis_labels: strings(&["axis", "ax", "軸"]),
        }
    }
}

/// Default line windows per cascade family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub visual_acuity: usize,
    pub refraction: usize,
    pub handwritten_iop: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            visual_acuity: 4,
            refraction: 2,
            handwritten_iop: 1,
        }
    }
}

/// Search area around a table anchor, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub pad_left: i32,
    pub pad_right: i32,
    pub pad_up: i32,
    pub pad_down: i32,
    /// Measure `pad_up` from the anchor's bottom edge instead of its top,
    /// so the anchor line itself is excluded.
    pub below_anchor: bool,
}

impl Region {
    pub fn around(&self, anchor: &BoundingBox) -> BoundingBox {
        let reference_top = if self.below_anchor { anchor.bottom } else { anchor.top };
        BoundingBox {
            left: anchor.left - self.pad_left,
            top: reference_top - self.pad_up,
            right: anchor.right + self.pad_right,
            bottom: anchor.bottom + self.pad_down,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableLayout {
    pub band_height: f64,
    pub fallback_band_height: f64,
    /// How many lines below a header may carry row labels.
    pub label_search_lines: usize,
    /// How many lines below an `IOP ... mmHg` header may carry the `Avg` row.
    pub average_search_lines: usize,
    pub min_token_confidence: f64,
    pub rnfl: Region,
    pub disc: Region,
    pub average_iop: Region,
}

impl Default for TableLayout {
    fn default() -> Self {
        TableLayout {
            band_height: 35.0,
            fallback_band_height: 45.0,
            label_search_lines: 8,
            average_search_lines: 20,
            min_token_confidence: 0.0,
            rnfl: Region {
                pad_left: 100,
                pad_right: 750,
                pad_up: 10,
                pad_down: 290,
                below_anchor: true,
            },
            disc: Region {
                pad_left: 190,
                pad_right: 870,
                pad_up: 10,
                pad_down: 330,
                below_anchor: true,
            },
            average_iop: Region {
                pad_left: 300,
                pad_right: 500,
                pad_up: 8,
                pad_down: 24,
                below_anchor: false,
            },
        }
    }
}

/// Everything the extraction pipeline can be tuned with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub vocabulary: Vocabulary,
    pub windows: WindowConfig,
    pub table: TableLayout,
    pub bounds: BTreeMap<FieldKind, Bounds>,
    pub unmarked_iop_search: bool,
}

impl ExtractionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ExtractionError> {
        let config: ExtractionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ExtractionError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ExtractionError> {
        if self.table.band_height <= 0.0 || self.table.fallback_band_height <= 0.0 {
            return Err(ExtractionError::Config(
                "band heights must be positive".to_string(),
            ));
        }
        if self.windows.visual_acuity == 0
            || self.windows.refraction == 0
            || self.windows.handwritten_iop == 0
        {
            return Err(ExtractionError::Config(
                "line windows must span at least one line".to_string(),
            ));
        }
        for (field, bounds) in &self.bounds {
            if bounds.min > bounds.max {
                return Err(ExtractionError::Config(format!(
                    "bounds for {} are inverted ({} > {})",
                    field, bounds.min, bounds.max
                )));
            }
        }
        Ok(())
    }

    /// Effective bounds for a field: override first, then the declared default.
    pub fn bounds_for(&self, field: FieldKind) -> Option<Bounds> {
        self.bounds
            .get(&field)
            .copied()
            .or_else(|| default_bounds(field))
    }
}
