use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One word-level token as reported by the OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub block: u32,
    #[serde(default)]
    pub paragraph: u32,
    #[serde(default)]
    pub line: u32,
}

impl OcrToken {
    pub fn new(text: &str, left: i32, top: i32, width: i32, height: i32) -> Self {
        OcrToken {
            text: text.to_string(),
            left,
            top,
            width,
            height,
            confidence: None,
            block: 0,
            paragraph: 0,
            line: 0,
        }
    }

    pub fn with_grouping(mut self, block: u32, paragraph: u32, line: u32) -> Self {
        self.block = block;
        self.paragraph = paragraph;
        self.line = line;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn right(&self) -> i32 {
        self.left.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.top.saturating_add(self.height)
    }

    pub fn x_center(&self) -> f64 {
        self.left as f64 + self.width as f64 / 2.0
    }

    pub fn y_center(&self) -> f64 {
        self.top as f64 + self.height as f64 / 2.0
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            left: self.left,
            top: self.top,
            right: self.right(),
            bottom: self.bottom(),
        }
    }

    pub fn grouping_key(&self) -> (u32, u32, u32) {
        (self.block, self.paragraph, self.line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.left as f64 + self.right as f64) / 2.0,
            (self.top as f64 + self.bottom as f64) / 2.0,
        )
    }

    /// Squared distance between box centres.
    pub fn center_distance_sq(&self, other: &BoundingBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).powi(2) + (ay - by).powi(2)
    }
}

/// A visual line: tokens sharing one `(block, paragraph, line)` grouping,
/// ordered left to right. Recomputed per OCR pass.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrLine {
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
    pub tokens: Vec<OcrToken>,
}

impl OcrLine {
    pub fn text(&self) -> String {
        self.tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let mut iter = self.tokens.iter();
        let first = iter.next()?.bounding_box();
        Some(iter.fold(first, |acc, t| acc.union(&t.bounding_box())))
    }

    pub fn y_center(&self) -> Option<f64> {
        self.bounding_box().map(|b| b.center().1)
    }
}

/// What the external OCR collaborator hands over for one document.
#[derive(Debug, Clone)]
pub enum OcrInput {
    Text(String),
    Tokens(Vec<OcrToken>),
}

impl OcrInput {
    pub fn is_empty(&self) -> bool {
        match self {
            OcrInput::Text(text) => text.trim().is_empty(),
            OcrInput::Tokens(tokens) => tokens.iter().all(|t| t.text.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Laterality {
    Right,
    Left,
    Both,
}

impl Laterality {
    pub fn covers_right(&self) -> bool {
        matches!(self, Laterality::Right | Laterality::Both)
    }

    pub fn covers_left(&self) -> bool {
        matches!(self, Laterality::Left | Laterality::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    VisualAcuityNaked,
    VisualAcuityCorrected,
    IntraocularLens,
    IntraocularPressure,
    RefractionSphere,
    RefractionCylinder,
    RefractionAxis,
    RnflTotal,
    RnflSuperior,
    RnflInferior,
    RimArea,
    DiscArea,
    CupVolume,
    SignalStrength,
}

impl FieldKind {
    pub const ALL: [FieldKind; 14] = [
        FieldKind::VisualAcuityNaked,
        FieldKind::VisualAcuityCorrected,
        FieldKind::IntraocularLens,
        FieldKind::IntraocularPressure,
        FieldKind::RefractionSphere,
        FieldKind::RefractionCylinder,
        FieldKind::RefractionAxis,
        FieldKind::RnflTotal,
        FieldKind::RnflSuperior,
        FieldKind::RnflInferior,
        FieldKind::RimArea,
        FieldKind::DiscArea,
        FieldKind::CupVolume,
        FieldKind::SignalStrength,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::VisualAcuityNaked => "visual acuity (naked)",
            FieldKind::VisualAcuityCorrected => "visual acuity (corrected)",
            FieldKind::IntraocularLens => "intraocular lens",
            FieldKind::IntraocularPressure => "intraocular pressure",
            FieldKind::RefractionSphere => "refraction sphere",
            FieldKind::RefractionCylinder => "refraction cylinder",
            FieldKind::RefractionAxis => "refraction axis",
            FieldKind::RnflTotal => "RNFL thickness (total)",
            FieldKind::RnflSuperior => "RNFL thickness (superior)",
            FieldKind::RnflInferior => "RNFL thickness (inferior)",
            FieldKind::RimArea => "rim area",
            FieldKind::DiscArea => "disc area",
            FieldKind::CupVolume => "cup volume",
            FieldKind::SignalStrength => "signal strength",
        }
    }

    /// Fields read from OCT disc printouts.
    pub fn is_oct_disc(&self) -> bool {
        matches!(
            self,
            FieldKind::RnflTotal
                | FieldKind::RnflSuperior
                | FieldKind::RnflInferior
                | FieldKind::RimArea
                | FieldKind::DiscArea
                | FieldKind::CupVolume
                | FieldKind::SignalStrength
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// An extracted value. Numbers keep the text they were read from so that
/// report writers can reproduce the printed precision ("-3.00", "0.10").
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number { value: f64, text: String },
    Text(String),
    Flag(bool),
}

impl FieldValue {
    pub fn number(text: &str) -> Option<FieldValue> {
        let value = text.trim().parse::<f64>().ok()?;
        Some(FieldValue::Number {
            value,
            text: text.trim().to_string(),
        })
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Number { text, .. } => write!(f, "{}", text),
            FieldValue::Text(text) => write!(f, "{}", text),
            FieldValue::Flag(flag) => write!(f, "{}", if *flag { "yes" } else { "" }),
        }
    }
}

/// Which strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Automated-instrument average (NCT "Avg" row).
    PositionalAverage,
    /// A labelled rule of a pattern cascade; `order` is its position in the cascade.
    KeywordPattern { rule: &'static str, order: usize },
    /// Table row clustering. `fallback` marks the weaker all-tokens reanalysis.
    PositionalCluster { fallback: bool },
    /// Handwritten chart heuristics; `rule` names the sub-pattern that fired.
    HandwrittenHeuristic { rule: &'static str },
}

impl ExtractionMethod {
    /// Resolver ordering: lower ranks are preferred.
    pub fn rank(&self) -> (u8, usize) {
        match self {
            ExtractionMethod::PositionalAverage => (0, 0),
            ExtractionMethod::KeywordPattern { order, .. } => (1, *order),
            ExtractionMethod::PositionalCluster { fallback: false } => (2, 0),
            ExtractionMethod::HandwrittenHeuristic { .. } => (3, 0),
            ExtractionMethod::PositionalCluster { fallback: true } => (4, 0),
        }
    }

    pub fn base_confidence(&self) -> f32 {
        match self {
            ExtractionMethod::PositionalAverage => 0.9,
            ExtractionMethod::KeywordPattern { .. } => 0.8,
            ExtractionMethod::PositionalCluster { fallback: false } => 0.75,
            ExtractionMethod::HandwrittenHeuristic { .. } => 0.6,
            ExtractionMethod::PositionalCluster { fallback: true } => 0.4,
        }
    }

    pub fn is_handwritten(&self) -> bool {
        matches!(self, ExtractionMethod::HandwrittenHeuristic { .. })
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExtractionMethod::PositionalAverage => write!(f, "positional-average"),
            ExtractionMethod::KeywordPattern { rule, .. } => write!(f, "keyword-pattern:{}", rule),
            ExtractionMethod::PositionalCluster { fallback: false } => write!(f, "positional-cluster"),
            ExtractionMethod::PositionalCluster { fallback: true } => {
                write!(f, "positional-cluster:fallback")
            }
            ExtractionMethod::HandwrittenHeuristic { rule } => write!(f, "handwritten:{}", rule),
        }
    }
}

/// One proposed value for one field, created during extraction and consumed
/// by the resolver. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldCandidate {
    pub field: FieldKind,
    pub value: FieldValue,
    pub laterality: Option<Laterality>,
    pub source: ExtractionMethod,
    pub confidence: f32,
    pub raw_context: String,
}

impl FieldCandidate {
    pub fn new(
        field: FieldKind,
        value: FieldValue,
        laterality: Option<Laterality>,
        source: ExtractionMethod,
        raw_context: &str,
    ) -> Self {
        FieldCandidate {
            field,
            value,
            laterality,
            confidence: source.base_confidence(),
            source,
            raw_context: raw_context.trim().to_string(),
        }
    }

    /// Scales the method's base confidence by the OCR engine's own
    /// confidence (0-100) when one is available.
    pub fn scaled_by_ocr(mut self, ocr_confidence: Option<f64>) -> Self {
        if let Some(conf) = ocr_confidence {
            let factor = (conf / 100.0).clamp(0.0, 1.0) as f32;
            self.confidence *= factor;
        }
        self
    }
}

/// The resolved output for one field of one document.
///
/// `right_value`/`left_value` are either empty or within the field's
/// declared range. `method` names the strategy behind the accepted value
/// (the right eye's when the eyes came from different strategies).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldRecord {
    pub field: FieldKind,
    pub right_value: Option<FieldValue>,
    pub left_value: Option<FieldValue>,
    pub method: Option<ExtractionMethod>,
    pub right_method: Option<ExtractionMethod>,
    pub left_method: Option<ExtractionMethod>,
    pub note: String,
}

impl FieldRecord {
    pub fn not_detected(field: FieldKind, note: &str) -> Self {
        FieldRecord {
            field,
            right_value: None,
            left_value: None,
            method: None,
            right_method: None,
            left_method: None,
            note: note.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.right_value.is_none() && self.left_value.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    OutOfRange,
    NotNumeric,
    AmbiguousLaterality,
}

/// A candidate that was matched but not accepted, kept for debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub field: FieldKind,
    pub reason: DropReason,
    pub value: String,
    pub source: ExtractionMethod,
    pub raw_context: String,
}

impl AuditEntry {
    pub fn dropped(candidate: &FieldCandidate, reason: DropReason) -> Self {
        AuditEntry {
            field: candidate.field,
            reason,
            value: candidate.value.to_string(),
            source: candidate.source,
            raw_context: candidate.raw_context.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    DiscOct,
    MacularOct,
    Chart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentExtraction {
    pub report_kind: ReportKind,
    pub records: Vec<FieldRecord>,
    pub audit: Vec<AuditEntry>,
    pub candidate_count: usize,
}

impl DocumentExtraction {
    pub fn record(&self, field: FieldKind) -> Option<&FieldRecord> {
        self.records.iter().find(|r| r.field == field)
    }

    pub fn detected_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_empty()).count()
    }
}

/// Identifying metadata the batch driver attaches to a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub filename: String,
    pub visit_date: Option<NaiveDate>,
    pub exam_label: String,
}

/// Unit handed to external report writers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReport {
    pub meta: DocumentMeta,
    #[serde(flatten)]
    pub extraction: DocumentExtraction,
}
