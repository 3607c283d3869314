// Spatial extraction of OCT measurement tables from positioned tokens
use crate::models::{
    Bounds, BoundingBox, ExtractionMethod, FieldCandidate, FieldKind, FieldValue, Laterality,
    OcrLine, OcrToken, Region, ReportKind, TableLayout,
};
use crate::processing::clustering::{cluster_rows, Row};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

lazy_static! {
    static ref RNFL_HEADER: Regex =
        Regex::new(r"(?i)Average\s*thickness\s*RNFL").expect("Failed to compile RNFL header regex");
    static ref DISC_HEADER: Regex =
        Regex::new(r"(?i)Disc\s*Topography").expect("Failed to compile disc header regex");
    static ref RNFL_TOTAL_LABEL: Regex =
        Regex::new(r"(?i)\b(?:total|average)\b|平均").expect("Failed to compile total label regex");
    static ref RNFL_SUPERIOR_LABEL: Regex = Regex::new(r"(?i)\bsup(?:erior)?\b|上方|(?:^|\s)上(?:\s|$)")
        .expect("Failed to compile superior label regex");
    static ref RNFL_INFERIOR_LABEL: Regex = Regex::new(r"(?i)\binf(?:erior)?\b|下方|(?:^|\s)下(?:\s|$)")
        .expect("Failed to compile inferior label regex");
    static ref RIM_LABEL: Regex =
        Regex::new(r"(?i)\brim(?:\s*area)?\b").expect("Failed to compile rim label regex");
    static ref DISC_AREA_LABEL: Regex =
        Regex::new(r"(?i)\bdisc\s*area\b").expect("Failed to compile disc area label regex");
    static ref CUP_LABEL: Regex =
        Regex::new(r"(?i)\bcup\s*vol").expect("Failed to compile cup label regex");
    static ref INTEGER_TOKEN: Regex =
        Regex::new(r"^\d{2,3}$").expect("Failed to compile integer token regex");
    static ref DECIMAL_TOKEN: Regex =
        Regex::new(r"^\d{1,2}\.\d{1,2}$").expect("Failed to compile decimal token regex");
    static ref AVERAGE_LABEL: Regex =
        Regex::new(r"(?i)^a[vu]g\.?:?$").expect("Failed to compile average label regex");
    static ref IOP_OR_MMHG: Regex =
        Regex::new(r"(?i)\bIOP\b|mmhg").expect("Failed to compile IOP label regex");
    static ref AVERAGE_READING_TOKEN: Regex =
        Regex::new(r"^\d{1,2}\.\d$").expect("Failed to compile average reading regex");
}

const DISC_KEYWORDS: [&str; 4] = [
    "AVERAGE THICKNESS RNFL",
    "DISC TOPOGRAPHY",
    "RNFL THICKNESS",
    "OPTIC DISC",
];
const MACULAR_KEYWORDS: [&str; 4] = ["THICKNESS MAP", "MACULAR", "FOVEA", "CENTRAL THICKNESS"];

/// Disc OCT, macular OCT or anything else, by counting characteristic
/// headings. Macular reports carry no disc tables.
pub fn classify_report(lines: &[String]) -> ReportKind {
    let text = lines.join(" ").to_uppercase();
    let score = |keywords: &[&str]| keywords.iter().filter(|kw| text.contains(*kw)).count();
    let disc = score(&DISC_KEYWORDS[..]);
    let macular = score(&MACULAR_KEYWORDS[..]);

    if disc > macular {
        ReportKind::DiscOct
    } else if macular > 0 {
        ReportKind::MacularOct
    } else {
        ReportKind::Chart
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
    Rnfl,
    Disc,
}

impl TableKind {
    fn header(&self) -> &'static Regex {
        match self {
            TableKind::Rnfl => &*RNFL_HEADER,
            TableKind::Disc => &*DISC_HEADER,
        }
    }

    fn labels(&self) -> [(FieldKind, &'static Regex); 3] {
        match self {
            TableKind::Rnfl => [
                (FieldKind::RnflTotal, &*RNFL_TOTAL_LABEL),
                (FieldKind::RnflSuperior, &*RNFL_SUPERIOR_LABEL),
                (FieldKind::RnflInferior, &*RNFL_INFERIOR_LABEL),
            ],
            TableKind::Disc => [
                (FieldKind::RimArea, &*RIM_LABEL),
                (FieldKind::DiscArea, &*DISC_AREA_LABEL),
                (FieldKind::CupVolume, &*CUP_LABEL),
            ],
        }
    }

    /// Row filters applied when reanalysing every token below the header.
    fn fallback_rows(&self) -> [(FieldKind, Bounds); 3] {
        match self {
            TableKind::Rnfl => [
                (FieldKind::RnflTotal, Bounds::new(60.0, 150.0)),
                (FieldKind::RnflSuperior, Bounds::new(30.0, 200.0)),
                (FieldKind::RnflInferior, Bounds::new(30.0, 200.0)),
            ],
            TableKind::Disc => [
                (FieldKind::RimArea, Bounds::new(0.0, 4.0)),
                (FieldKind::DiscArea, Bounds::new(0.0, 4.0)),
                (FieldKind::CupVolume, Bounds::new(0.0, 1.5)),
            ],
        }
    }

    fn token_bounds(&self) -> Bounds {
        match self {
            TableKind::Rnfl => Bounds::new(30.0, 200.0),
            TableKind::Disc => Bounds::new(0.0, 4.0),
        }
    }

    /// Numeric reading of a token, or `None` for labels and noise.
    fn parse(&self, text: &str) -> Option<FieldValue> {
        match self {
            TableKind::Rnfl => {
                if INTEGER_TOKEN.is_match(text) {
                    FieldValue::number(text)
                } else {
                    None
                }
            }
            TableKind::Disc => {
                let text = if text.starts_with('.') {
                    format!("0{}", text)
                } else {
                    text.to_string()
                };
                if !DECIMAL_TOKEN.is_match(&text) {
                    return None;
                }
                let value = text.parse::<f64>().ok()?;
                Some(FieldValue::Number {
                    value,
                    text: format!("{:.2}", value),
                })
            }
        }
    }

    fn region<'a>(&self, layout: &'a TableLayout) -> &'a Region {
        match self {
            TableKind::Rnfl => &layout.rnfl,
            TableKind::Disc => &layout.disc,
        }
    }
}

/// A numeric token with its parsed reading.
#[derive(Debug, Clone)]
struct Reading {
    token: OcrToken,
    value: FieldValue,
}

fn contains_center(region: &BoundingBox, token: &OcrToken) -> bool {
    let (x, y) = (token.x_center(), token.y_center());
    x >= region.left as f64
        && x <= region.right as f64
        && y >= region.top as f64
        && y <= region.bottom as f64
}

fn in_bounds(value: &FieldValue, bounds: &Bounds) -> bool {
    value.as_number().map_or(false, |n| bounds.contains(n))
}

/// Reads OCT tables by anchoring on their headers and clustering the
/// numeric tokens below into rows.
pub struct TableExtractor {
    layout: TableLayout,
}

impl TableExtractor {
    pub fn new(layout: TableLayout) -> Self {
        TableExtractor { layout }
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// RNFL thickness (total, superior, inferior) per eye.
    pub fn extract_rnfl(&self, tokens: &[OcrToken], lines: &[OcrLine]) -> Vec<FieldCandidate> {
        self.extract_table(TableKind::Rnfl, tokens, lines)
    }

    /// Rim area, disc area and cup volume per eye.
    pub fn extract_disc_topography(
        &self,
        tokens: &[OcrToken],
        lines: &[OcrLine],
    ) -> Vec<FieldCandidate> {
        self.extract_table(TableKind::Disc, tokens, lines)
    }

    fn extract_table(
        &self,
        kind: TableKind,
        tokens: &[OcrToken],
        lines: &[OcrLine],
    ) -> Vec<FieldCandidate> {
        let (anchor_index, anchor) = match lines
            .iter()
            .enumerate()
            .find(|(_, line)| kind.header().is_match(&line.text()))
            .and_then(|(i, line)| line.bounding_box().map(|b| (i, b)))
        {
            Some(found) => found,
            None => {
                debug!("{:?} header not found", kind);
                return Vec::new();
            }
        };

        let region = kind.region(&self.layout).around(&anchor);
        let readings: Vec<Reading> = tokens
            .iter()
            .filter(|t| contains_center(&region, t))
            .filter_map(|t| {
                kind.parse(&t.text).map(|value| Reading {
                    token: t.clone(),
                    value,
                })
            })
            .collect();

        let labels = self.find_labels(kind, lines, anchor_index, &region);
        let rows = cluster_readings(&readings, self.layout.band_height);
        let assigned = if labels.is_empty() {
            assign_by_position(kind, &rows)
        } else {
            assign_by_labels(&labels, &rows, self.layout.band_height)
        };

        let mut candidates = Vec::new();
        for (field, row) in &assigned {
            candidates.extend(row_candidates(*field, row, None, false));
        }

        if candidates.len() < 6 {
            debug!(
                "{:?} table gave {} value(s), reanalysing all tokens below the header",
                kind,
                candidates.len()
            );
            candidates.extend(self.fallback(kind, tokens, &anchor));
        }
        candidates
    }

    /// Row labels on the lines right below the header, inside the region.
    fn find_labels(
        &self,
        kind: TableKind,
        lines: &[OcrLine],
        anchor_index: usize,
        region: &BoundingBox,
    ) -> Vec<(FieldKind, f64)> {
        let mut labels: Vec<(FieldKind, f64)> = Vec::new();
        for line in lines
            .iter()
            .skip(anchor_index + 1)
            .take(self.layout.label_search_lines)
        {
            let y = match line.y_center() {
                Some(y) if y >= region.top as f64 && y <= region.bottom as f64 => y,
                _ => continue,
            };
            let text = line.text();
            let found = kind
                .labels()
                .iter()
                .find(|(_, pattern)| pattern.is_match(&text))
                .map(|(field, _)| *field);
            if let Some(field) = found {
                if labels.iter().all(|(f, _)| *f != field) {
                    labels.push((field, y));
                }
            }
        }
        labels
    }

    /// Weaker reanalysis over every numeric token below the header,
    /// filtered per expected row.
    fn fallback(&self, kind: TableKind, tokens: &[OcrToken], anchor: &BoundingBox) -> Vec<FieldCandidate> {
        let readings: Vec<Reading> = tokens
            .iter()
            .filter(|t| t.y_center() > anchor.bottom as f64)
            .filter_map(|t| {
                kind.parse(&t.text).map(|value| Reading {
                    token: t.clone(),
                    value,
                })
            })
            .filter(|r| in_bounds(&r.value, &kind.token_bounds()))
            .collect();
        let rows = cluster_readings(&readings, self.layout.fallback_band_height);

        let expected = kind.fallback_rows();
        let mut candidates = Vec::new();
        match kind {
            TableKind::Rnfl => {
                for ((field, bounds), row) in expected.iter().zip(rows.iter()) {
                    candidates.extend(row_candidates(*field, row, Some(bounds), true));
                }
            }
            TableKind::Disc => {
                for ((field, bounds), row) in expected.iter().take(2).zip(rows.iter()) {
                    candidates.extend(row_candidates(*field, row, Some(bounds), true));
                }
                let (cup, cup_bounds) = expected[2];
                if let Some(row) = rows
                    .iter()
                    .skip(2)
                    .find(|row| row.iter().any(|r| in_bounds(&r.value, &cup_bounds)))
                {
                    candidates.extend(row_candidates(cup, row, Some(&cup_bounds), true));
                }
            }
        }
        candidates
    }

    /// NCT average from positioned tokens: the `Avg` token closest to an
    /// `IOP`/`mmHg` label (or the first one when there is no label), then
    /// the decimal readings to its right, OD first.
    pub fn extract_average_iop(&self, tokens: &[OcrToken], lines: &[OcrLine]) -> Vec<FieldCandidate> {
        let averages: Vec<&OcrToken> = tokens
            .iter()
            .filter(|t| AVERAGE_LABEL.is_match(&t.text))
            .collect();
        if averages.is_empty() {
            return Vec::new();
        }

        let labels: Vec<BoundingBox> = lines
            .iter()
            .filter(|line| IOP_OR_MMHG.is_match(&line.text()))
            .filter_map(|line| line.bounding_box())
            .collect();

        let anchor = if labels.is_empty() {
            averages[0]
        } else {
            let distance = |t: &OcrToken| {
                labels
                    .iter()
                    .map(|label| t.bounding_box().center_distance_sq(label))
                    .fold(f64::INFINITY, f64::min)
            };
            match averages
                .iter()
                .min_by(|a, b| distance(**a).total_cmp(&distance(**b)))
            {
                Some(token) => *token,
                None => return Vec::new(),
            }
        };

        let region = self.layout.average_iop.around(&anchor.bounding_box());
        let mut readings: Vec<&OcrToken> = tokens
            .iter()
            .filter(|t| contains_center(&region, t) && AVERAGE_READING_TOKEN.is_match(&t.text))
            .collect();
        readings.sort_by(|a, b| a.x_center().total_cmp(&b.x_center()));

        if readings.len() < 2 {
            debug!("Average IOP row has {} reading(s)", readings.len());
            return Vec::new();
        }

        let context = format!("{} {} {}", anchor.text, readings[0].text, readings[1].text);
        [(readings[0], Laterality::Right), (readings[1], Laterality::Left)]
            .iter()
            .filter_map(|(token, eye)| {
                FieldValue::number(&token.text).map(|value| {
                    FieldCandidate::new(
                        FieldKind::IntraocularPressure,
                        value,
                        Some(*eye),
                        ExtractionMethod::PositionalAverage,
                        &context,
                    )
                    .scaled_by_ocr(token.confidence)
                })
            })
            .collect()
    }
}

/// Rows of readings; the clustering works on tokens, values travel along.
fn cluster_readings(readings: &[Reading], band_height: f64) -> Vec<Vec<Reading>> {
    let tokens: Vec<OcrToken> = readings.iter().map(|r| r.token.clone()).collect();
    cluster_rows(&tokens, band_height)
        .into_iter()
        .map(|row: Row| {
            row.tokens
                .iter()
                .filter_map(|token| readings.iter().find(|r| r.token == *token).cloned())
                .collect()
        })
        .collect()
}

fn assign_by_position(kind: TableKind, rows: &[Vec<Reading>]) -> Vec<(FieldKind, Vec<Reading>)> {
    let fields = kind.fallback_rows();
    match kind {
        TableKind::Rnfl => fields
            .iter()
            .zip(rows.iter())
            .map(|((field, _), row)| (*field, row.clone()))
            .collect(),
        TableKind::Disc => {
            let rows = &rows[..rows.len().min(6)];
            let mut assigned: Vec<(FieldKind, Vec<Reading>)> = fields
                .iter()
                .take(2)
                .zip(rows.iter())
                .map(|((field, _), row)| (*field, row.clone()))
                .collect();
            let (cup, cup_bounds) = fields[2];
            if let Some(row) = rows
                .iter()
                .skip(2)
                .find(|row| row.iter().any(|r| in_bounds(&r.value, &cup_bounds)))
            {
                assigned.push((cup, row.clone()));
            }
            assigned
        }
    }
}

/// Each row takes the nearest label at or above it.
fn assign_by_labels(
    labels: &[(FieldKind, f64)],
    rows: &[Vec<Reading>],
    band_height: f64,
) -> Vec<(FieldKind, Vec<Reading>)> {
    let mut assigned: Vec<(FieldKind, Vec<Reading>)> = Vec::new();
    for row in rows {
        let row_y = match row.first() {
            Some(r) => r.token.y_center(),
            None => continue,
        };
        let label = labels
            .iter()
            .filter(|(_, y)| *y <= row_y + band_height)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(field, _)| *field);
        if let Some(field) = label {
            if assigned.iter().all(|(f, _)| *f != field) {
                assigned.push((field, row.clone()));
            }
        }
    }
    assigned
}

/// OD/OS candidates from one row. With `bounds`, out-of-range readings are
/// skipped before the eyes are assigned.
fn row_candidates(
    field: FieldKind,
    row: &[Reading],
    bounds: Option<&Bounds>,
    fallback: bool,
) -> Vec<FieldCandidate> {
    let context = row
        .iter()
        .map(|r| r.token.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    row.iter()
        .filter(|r| bounds.map_or(true, |b| in_bounds(&r.value, b)))
        .take(2)
        .zip([Laterality::Right, Laterality::Left].iter())
        .map(|(reading, eye)| {
            FieldCandidate::new(
                field,
                reading.value.clone(),
                Some(*eye),
                ExtractionMethod::PositionalCluster { fallback },
                &context,
            )
            .scaled_by_ocr(reading.token.confidence)
        })
        .collect()
}
