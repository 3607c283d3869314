// Field-family drivers for the pattern cascades over normalized text lines
use crate::models::{
    ExtractionConfig, ExtractionMethod, FieldCandidate, FieldKind, FieldValue, Laterality,
};
use crate::processing::cascade::{
    accept_all, within_declared_range, Extracted, MarkerSet, PatternCascade, RuleContext,
    SIGNED_NUMBER,
};
use crate::processing::normalize::{repair_acuity_notation, repair_missing_decimal};
use crate::utils::ExtractionError;
use lazy_static::lazy_static;
use log::debug;
use regex::{Captures, Regex};
use std::collections::HashSet;

lazy_static! {
    static ref ACUITY_NUMBER: Regex =
        Regex::new(r"\b(\d{1,2}(?:\.\d{1,2})?)\b").expect("Failed to compile acuity number regex");
    static ref ACUITY_WITH_CORRECTED: Regex =
        Regex::new(r"\b(\d{1,2}(?:\.\d{1,2})?)[^()]*?\(\s*(\d{1,2}(?:\.\d{1,2})?)")
            .expect("Failed to compile combined acuity regex");
    static ref REFRACTION_TRIPLET: Regex =
        Regex::new(r"([+\-]?\d{1,2}\.\d{2})\s+([+\-]?\d{1,2}\.\d{2})\s+(\d{1,3})\b")
            .expect("Failed to compile numeric triplet regex");
    static ref BARE_READING: Regex =
        Regex::new(r"^\d{1,2}(?:\.\d)?$").expect("Failed to compile bare reading regex");
    static ref ANY_BARE_READING: Regex = Regex::new(r"(?:^|[\s:=])\d{1,2}(?:\.\d)?(?:\s|$)")
        .expect("Failed to compile bare reading gate regex");
    static ref SLASH_PAIR: Regex =
        Regex::new(r"(\d{1,2}(?:\.\d)?)\s*[/|]\s*(\d{1,2}(?:\.\d)?)")
            .expect("Failed to compile slash pair regex");
    static ref LETTER_PAIR: Regex = Regex::new(
        r"(?i)\bR\s*[:=]?\s*(\d{1,2}(?:\.\d)?)\s*[.;]?\s*\bL\s*[:=]?\s*(\d{1,2}(?:\.\d)?)"
    )
    .expect("Failed to compile R/L pair regex");
    static ref KANJI_PAIR: Regex = Regex::new(
        r"右[^\d左]{0,4}(\d{1,2}(?:\.\d)?)\s*[.;]?\s*左[^\d]{0,4}(\d{1,2}(?:\.\d)?)"
    )
    .expect("Failed to compile kanji pair regex");
    static ref UNMARKED_PAIR: Regex =
        Regex::new(r"^\s*(\d{2})\s+(\d{2})\s*$").expect("Failed to compile unmarked pair regex");
    static ref IOP_LABEL: Regex = Regex::new(r"(?i)\bIOP\b").expect("Failed to compile IOP regex");
    static ref MMHG: Regex = Regex::new(r"(?i)mmhg").expect("Failed to compile mmHg regex");
    static ref AVERAGE_LABEL: Regex =
        Regex::new(r"(?i)\ba[vu]g\b").expect("Failed to compile average label regex");
    static ref AVERAGE_READING: Regex =
        Regex::new(r"\b(\d{1,2}\.\d)\b").expect("Failed to compile average reading regex");
    static ref SIGNAL_VALUE: Regex =
        Regex::new(r"\b(\d{2,3})\b").expect("Failed to compile signal value regex");
}

const IOP_MAX: f64 = 80.0;
const UNMARKED_IOP_MIN: f64 = 10.0;
const UNMARKED_IOP_MAX: f64 = 30.0;
const SIGNAL_MIN: f64 = 20.0;
const SIGNAL_MAX: f64 = 100.0;
const SIGNAL_NEIGHBOR_LINES: usize = 2;

/// Which cascade `PatternMatcher::match_field` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFamily {
    /// Naked and corrected acuity, plus the IOL flag.
    VisualAcuity,
    /// Sphere, cylinder and axis.
    Refraction,
    HandwrittenIop,
    /// NCT `Avg` row read from plain text.
    AverageIop,
    SignalStrength,
}

impl FieldFamily {
    pub const ALL: [FieldFamily; 5] = [
        FieldFamily::VisualAcuity,
        FieldFamily::Refraction,
        FieldFamily::HandwrittenIop,
        FieldFamily::AverageIop,
        FieldFamily::SignalStrength,
    ];

    /// Lines per window. For `AverageIop` this is how far below the header
    /// the `Avg` row may sit; for `SignalStrength` how far a split reading
    /// may be completed from.
    pub fn default_window(&self, config: &ExtractionConfig) -> usize {
        match self {
            FieldFamily::VisualAcuity => config.windows.visual_acuity,
            FieldFamily::Refraction => config.windows.refraction,
            FieldFamily::HandwrittenIop => config.windows.handwritten_iop,
            FieldFamily::AverageIop => config.table.average_search_lines,
            FieldFamily::SignalStrength => SIGNAL_NEIGHBOR_LINES,
        }
    }
}

fn acuity_value(text: &str) -> Option<FieldValue> {
    FieldValue::number(repair_missing_decimal(text))
}

fn first_acuity_value(text: &str) -> Option<FieldValue> {
    ACUITY_NUMBER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).and_then(|m| acuity_value(m.as_str())))
        .find(|value| {
            within_declared_range(&Extracted::new(
                FieldKind::VisualAcuityNaked,
                None,
                value.clone(),
            ))
        })
}

fn no_correction(caps: &Captures<'_>, ctx: &RuleContext<'_>) -> Vec<Extracted> {
    let mut values = vec![Extracted::new(
        FieldKind::VisualAcuityCorrected,
        ctx.laterality,
        FieldValue::Text("n.c.".to_string()),
    )];
    if let Some(marker) = caps.get(0) {
        let naked = first_acuity_value(&ctx.text[..marker.start()])
            .or_else(|| first_acuity_value(&ctx.text[marker.end()..]));
        if let Some(value) = naked {
            values.push(Extracted::new(FieldKind::VisualAcuityNaked, ctx.laterality, value));
        }
    }
    values
}

fn naked_with_corrected(caps: &Captures<'_>, ctx: &RuleContext<'_>) -> Vec<Extracted> {
    let mut values = Vec::new();
    if let Some(naked) = caps.get(1).and_then(|m| acuity_value(m.as_str())) {
        values.push(Extracted::new(FieldKind::VisualAcuityNaked, ctx.laterality, naked));
    }
    if let Some(corrected) = caps.get(2).and_then(|m| acuity_value(m.as_str())) {
        values.push(Extracted::new(FieldKind::VisualAcuityCorrected, ctx.laterality, corrected));
    }
    values
}

fn marked_value(caps: &Captures<'_>, ctx: &RuleContext<'_>) -> Vec<Extracted> {
    let field = if ctx.markers.corrected.is_match(ctx.text) && !ctx.markers.naked.is_match(ctx.text)
    {
        FieldKind::VisualAcuityCorrected
    } else {
        FieldKind::VisualAcuityNaked
    };
    caps.get(1)
        .and_then(|m| acuity_value(m.as_str()))
        .map(|value| vec![Extracted::new(field, ctx.laterality, value)])
        .unwrap_or_default()
}

fn refraction_values(caps: &Captures<'_>, laterality: Option<Laterality>) -> Vec<Extracted> {
    let mut values = Vec::new();
    if let Some(sphere) = caps.get(1).and_then(|m| FieldValue::number(m.as_str())) {
        values.push(Extracted::new(FieldKind::RefractionSphere, laterality, sphere));
    }
    if let Some(cylinder) = caps.get(2).and_then(|m| FieldValue::number(m.as_str())) {
        values.push(Extracted::new(FieldKind::RefractionCylinder, laterality, cylinder));
    }
    if let Some(axis) = caps.get(3).and_then(|m| FieldValue::number(m.as_str())) {
        match axis.as_number() {
            Some(degrees) if (0.0..=180.0).contains(&degrees) => {
                values.push(Extracted::new(FieldKind::RefractionAxis, laterality, axis));
            }
            _ => debug!("Discarding refraction axis {} outside 0-180", axis),
        }
    }
    values
}

fn refraction_triplet(caps: &Captures<'_>, ctx: &RuleContext<'_>) -> Vec<Extracted> {
    refraction_values(caps, ctx.laterality)
}

fn refraction_split_labels(caps: &Captures<'_>, ctx: &RuleContext<'_>) -> Vec<Extracted> {
    let cylinder = match ctx.markers.cylinder_value.captures(ctx.text) {
        Some(c) => c,
        None => return Vec::new(),
    };
    let mut values = Vec::new();
    if let Some(sphere) = caps.get(1).and_then(|m| FieldValue::number(m.as_str())) {
        values.push(Extracted::new(FieldKind::RefractionSphere, ctx.laterality, sphere));
    }
    if let Some(cyl) = cylinder.get(1).and_then(|m| FieldValue::number(m.as_str())) {
        values.push(Extracted::new(FieldKind::RefractionCylinder, ctx.laterality, cyl));
    }
    if let Some(axis) = ctx
        .markers
        .axis_value
        .captures(ctx.text)
        .and_then(|a| a.get(1))
        .and_then(|m| FieldValue::number(m.as_str()))
    {
        match axis.as_number() {
            Some(degrees) if (0.0..=180.0).contains(&degrees) => {
                values.push(Extracted::new(FieldKind::RefractionAxis, ctx.laterality, axis));
            }
            _ => debug!("Discarding refraction axis {} outside 0-180", axis),
        }
    }
    values
}

/// Both readings or neither.
fn iop_pair(right: &str, left: &str, max: f64) -> Vec<Extracted> {
    match (FieldValue::number(right), FieldValue::number(left)) {
        (Some(r), Some(l)) => {
            let in_range = |v: &FieldValue| v.as_number().map_or(false, |n| (0.0..=max).contains(&n));
            if in_range(&r) && in_range(&l) {
                vec![
                    Extracted::new(FieldKind::IntraocularPressure, Some(Laterality::Right), r),
                    Extracted::new(FieldKind::IntraocularPressure, Some(Laterality::Left), l),
                ]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

fn bare_pair(_: &Captures<'_>, ctx: &RuleContext<'_>) -> Vec<Extracted> {
    let readings: Vec<&str> = ctx
        .text
        .split(|c: char| c.is_whitespace() || c == ':' || c == '=')
        .filter(|t| BARE_READING.is_match(t))
        .filter(|t| {
            t.parse::<f64>()
                .map_or(false, |n| (0.0..=IOP_MAX).contains(&n))
        })
        .collect();
    if readings.len() < 2 {
        return Vec::new();
    }
    iop_pair(readings[0], readings[1], IOP_MAX)
}

fn captured_pair(caps: &Captures<'_>, _: &RuleContext<'_>) -> Vec<Extracted> {
    match (caps.get(1), caps.get(2)) {
        (Some(r), Some(l)) => iop_pair(r.as_str(), l.as_str(), IOP_MAX),
        _ => Vec::new(),
    }
}

fn signal_in_range(text: &str) -> Option<FieldValue> {
    FieldValue::number(text).filter(|v| {
        v.as_number()
            .map_or(false, |n| (SIGNAL_MIN..=SIGNAL_MAX).contains(&n))
    })
}

fn signal_values_in(text: &str) -> Vec<FieldValue> {
    SIGNAL_VALUE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).and_then(|m| signal_in_range(m.as_str())))
        .collect()
}

/// Two readings on the label line give both eyes. A single reading is only
/// accepted when a nearby line supplies the second one.
fn signal_strength(_: &Captures<'_>, ctx: &RuleContext<'_>) -> Vec<Extracted> {
    let on_line = signal_values_in(ctx.text);
    let (right, left) = match on_line.len() {
        0 => return Vec::new(),
        1 => {
            let nearby = ctx
                .neighbors
                .iter()
                .find_map(|line| signal_values_in(line).into_iter().next());
            match nearby {
                Some(left) => (on_line[0].clone(), left),
                None => return Vec::new(),
            }
        }
        _ => (on_line[0].clone(), on_line[1].clone()),
    };
    vec![
        Extracted::new(FieldKind::SignalStrength, Some(Laterality::Right), right),
        Extracted::new(FieldKind::SignalStrength, Some(Laterality::Left), left),
    ]
}

fn candidates_from(
    values: Vec<Extracted>,
    method: ExtractionMethod,
    context: &str,
) -> Vec<FieldCandidate> {
    values
        .into_iter()
        .map(|e| FieldCandidate::new(e.field, e.value, e.laterality, method, context))
        .collect()
}

/// Runs the per-family pattern cascades over normalized lines.
pub struct PatternMatcher {
    markers: MarkerSet,
    acuity: PatternCascade,
    refraction: PatternCascade,
    handwritten_iop: PatternCascade,
    signal_strength: PatternCascade,
    unmarked_iop_search: bool,
}

impl PatternMatcher {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let markers = MarkerSet::compile(&config.vocabulary)?;

        let acuity = PatternCascade::new("visual-acuity")
            .rule(
                "acuity.no-correction",
                markers.no_correction.clone(),
                no_correction,
                within_declared_range,
            )
            .rule(
                "acuity.naked-with-corrected",
                ACUITY_WITH_CORRECTED.clone(),
                naked_with_corrected,
                within_declared_range,
            )
            .rule(
                "acuity.marked-value",
                ACUITY_NUMBER.clone(),
                marked_value,
                within_declared_range,
            );

        let labelled_triplet = Regex::new(&format!(
            r"(?i){}\s*[:=]?\s*{}\D*?{}\s*[:=]?\s*{}(?:\D*?{}\s*[:=]?\s*(\d{{1,3}}))?",
            markers.sphere_label,
            SIGNED_NUMBER,
            markers.cylinder_label,
            SIGNED_NUMBER,
            markers.axis_label
        ))?;
        let refraction = PatternCascade::new("refraction")
            .rule(
                "refraction.labelled-triplet",
                labelled_triplet,
                refraction_triplet,
                within_declared_range,
            )
            .rule(
                "refraction.split-labels",
                markers.sphere_value.clone(),
                refraction_split_labels,
                within_declared_range,
            )
            .rule(
                "refraction.numeric-triplet",
                REFRACTION_TRIPLET.clone(),
                refraction_triplet,
                within_declared_range,
            );

        let handwritten_iop = PatternCascade::new("handwritten-iop")
            .rule("iop.bare-pair", ANY_BARE_READING.clone(), bare_pair, accept_all)
            .rule("iop.slash-pair", SLASH_PAIR.clone(), captured_pair, accept_all)
            .rule("iop.letter-pair", LETTER_PAIR.clone(), captured_pair, accept_all)
            .rule("iop.kanji-pair", KANJI_PAIR.clone(), captured_pair, accept_all);

        let signal_strength = PatternCascade::new("signal-strength")
            .rule(
                "signal.topq-image-quality",
                Regex::new(r"(?i)TopQ\s*Image\s*Quality")?,
                signal_strength,
                within_declared_range,
            )
            .rule(
                "signal.image-quality",
                Regex::new(r"(?i)\bImage\s*Quality\b")?,
                signal_strength,
                within_declared_range,
            )
            .rule(
                "signal.strength",
                Regex::new(r"(?i)\bSignal\s*Strength\b")?,
                signal_strength,
                within_declared_range,
            )
            .rule("signal.ss", Regex::new(r"\bSS\b")?, signal_strength, within_declared_range)
            .rule(
                "signal.quality-index",
                Regex::new(r"(?i)\bQuality\s*Index\b")?,
                signal_strength,
                within_declared_range,
            )
            .rule("signal.qi", Regex::new(r"\bQI\b")?, signal_strength, within_declared_range);

        Ok(PatternMatcher {
            markers,
            acuity,
            refraction,
            handwritten_iop,
            signal_strength,
            unmarked_iop_search: config.unmarked_iop_search,
        })
    }

    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Candidates for one field family. `window` is the number of lines a
    /// match may span (see `FieldFamily::default_window`).
    pub fn match_field(
        &self,
        lines: &[String],
        family: FieldFamily,
        window: usize,
    ) -> Vec<FieldCandidate> {
        let window = window.max(1);
        let candidates = match family {
            FieldFamily::VisualAcuity => self.match_visual_acuity(lines, window),
            FieldFamily::Refraction => self.match_refraction(lines, window),
            FieldFamily::HandwrittenIop => self.match_handwritten_iop(lines, window),
            FieldFamily::AverageIop => self.match_average_iop(lines, window),
            FieldFamily::SignalStrength => self.match_signal_strength(lines, window),
        };
        debug!("{:?}: {} candidate(s)", family, candidates.len());
        candidates
    }

    fn match_visual_acuity(&self, lines: &[String], window: usize) -> Vec<FieldCandidate> {
        let lines: Vec<String> = lines.iter().map(|l| repair_acuity_notation(l)).collect();
        let has_marker = |line: &str| self.markers.acuity_eye.is_match(line);
        let mut candidates = Vec::new();

        for start in 0..lines.len() {
            if !has_marker(&lines[start]) {
                continue;
            }
            // The window ends before the next line that names an eye.
            let mut end = start + 1;
            while end < lines.len() && end < start + window && !has_marker(&lines[end]) {
                end += 1;
            }
            let text = lines[start..end].join(" ");

            let markers: Vec<(usize, Laterality)> = self
                .markers
                .acuity_eye
                .captures_iter(&text)
                .filter_map(|caps| {
                    let eye = if caps.name("right").is_some() {
                        Laterality::Right
                    } else {
                        Laterality::Left
                    };
                    caps.get(0).map(|m| (m.start(), eye))
                })
                .collect();

            for (i, (_, eye)) in markers.iter().enumerate() {
                let from = if i == 0 { 0 } else { markers[i].0 };
                let to = markers.get(i + 1).map_or(text.len(), |(pos, _)| *pos);
                let segment = &text[from..to];
                let ctx = RuleContext::new(segment, &self.markers).with_laterality(Some(*eye));

                if let Some(hit) = self.acuity.first_match(&ctx) {
                    let method = ExtractionMethod::KeywordPattern {
                        rule: hit.rule,
                        order: hit.order,
                    };
                    candidates.extend(candidates_from(hit.values, method, segment));
                }
                if self.markers.intraocular_lens.is_match(segment) {
                    candidates.push(FieldCandidate::new(
                        FieldKind::IntraocularLens,
                        FieldValue::Flag(true),
                        Some(*eye),
                        ExtractionMethod::KeywordPattern {
                            rule: "acuity.intraocular-lens",
                            order: self.acuity.len(),
                        },
                        segment,
                    ));
                }
            }
        }
        candidates
    }

    fn match_refraction(&self, lines: &[String], window: usize) -> Vec<FieldCandidate> {
        let mut filled: HashSet<Option<Laterality>> = HashSet::new();
        let mut candidates = Vec::new();

        for start in 0..lines.len() {
            let end = (start + window).min(lines.len());
            let text = lines[start..end].join(" ");
            if !(self.markers.sphere_gate.is_match(&text) && self.markers.cylinder_gate.is_match(&text)) {
                continue;
            }

            let laterality = self.markers.laterality_of(&text);
            if filled.contains(&laterality) {
                continue;
            }

            let ctx = RuleContext::new(&text, &self.markers).with_laterality(laterality);
            if let Some(hit) = self.refraction.first_match(&ctx) {
                debug!("Refraction {:?} from rule {}", laterality, hit.rule);
                let method = ExtractionMethod::KeywordPattern {
                    rule: hit.rule,
                    order: hit.order,
                };
                candidates.extend(candidates_from(hit.values, method, &text));
                filled.insert(laterality);
            }
        }
        candidates
    }

    fn match_handwritten_iop(&self, lines: &[String], window: usize) -> Vec<FieldCandidate> {
        for start in 0..lines.len() {
            let end = (start + window).min(lines.len());
            let text = lines[start..end].join(" ");
            if self.markers.date.is_match(&text) {
                debug!("Skipping date-bearing line for handwritten IOP: {}", text);
                continue;
            }
            if !self.markers.iop.is_match(&text) {
                continue;
            }

            let ctx = RuleContext::new(&text, &self.markers);
            if let Some(hit) = self.handwritten_iop.first_match(&ctx) {
                let method = ExtractionMethod::HandwrittenHeuristic { rule: hit.rule };
                return candidates_from(hit.values, method, &text);
            }
        }

        if self.unmarked_iop_search {
            for line in lines {
                if self.markers.date.is_match(line) {
                    continue;
                }
                if let Some(caps) = UNMARKED_PAIR.captures(line) {
                    let values = iop_pair(&caps[1], &caps[2], UNMARKED_IOP_MAX);
                    let plausible = values.iter().all(|e| {
                        e.value.as_number().map_or(false, |n| n >= UNMARKED_IOP_MIN)
                    });
                    if !values.is_empty() && plausible {
                        let method = ExtractionMethod::HandwrittenHeuristic {
                            rule: "iop.unmarked-pair",
                        };
                        return candidates_from(values, method, line);
                    }
                }
            }
        }
        Vec::new()
    }

    /// Finds an `IOP ... mmHg` header and reads the `Avg` row below it: two
    /// readings give both eyes, a single one only the right eye.
    fn match_average_iop(&self, lines: &[String], search_lines: usize) -> Vec<FieldCandidate> {
        let header = match lines
            .iter()
            .position(|l| IOP_LABEL.is_match(l) && MMHG.is_match(l))
        {
            Some(index) => index,
            None => return Vec::new(),
        };

        let end = (header + 1 + search_lines).min(lines.len());
        let average_line = match lines[header + 1..end].iter().find(|l| AVERAGE_LABEL.is_match(l)) {
            Some(line) => line,
            None => return Vec::new(),
        };

        let readings: Vec<FieldValue> = AVERAGE_READING
            .captures_iter(average_line)
            .filter_map(|caps| caps.get(1).and_then(|m| FieldValue::number(m.as_str())))
            .filter(|v| v.as_number().map_or(false, |n| (0.0..=IOP_MAX).contains(&n)))
            .collect();

        let eyes = [Laterality::Right, Laterality::Left];
        readings
            .into_iter()
            .zip(eyes.iter())
            .map(|(value, eye)| {
                FieldCandidate::new(
                    FieldKind::IntraocularPressure,
                    value,
                    Some(*eye),
                    ExtractionMethod::PositionalAverage,
                    average_line,
                )
            })
            .collect()
    }

    /// Label patterns are tried in order across all lines before the next
    /// label is considered.
    fn match_signal_strength(&self, lines: &[String], radius: usize) -> Vec<FieldCandidate> {
        for (order, rule) in self.signal_strength.rules() {
            for (index, line) in lines.iter().enumerate() {
                if !rule.pattern.is_match(line) {
                    continue;
                }
                let from = index.saturating_sub(radius);
                let to = (index + radius + 1).min(lines.len());
                let neighbors: Vec<String> = (from..to)
                    .filter(|i| *i != index)
                    .map(|i| lines[i].clone())
                    .collect();

                let ctx = RuleContext::new(line, &self.markers).with_neighbors(&neighbors);
                if let Some(values) = rule.apply(&ctx) {
                    let method = ExtractionMethod::KeywordPattern {
                        rule: rule.id,
                        order,
                    };
                    return candidates_from(values, method, line);
                }
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::normalize::normalized_lines;

    fn matcher() -> PatternMatcher {
        PatternMatcher::new(&ExtractionConfig::default()).unwrap()
    }

    fn value_of(candidates: &[FieldCandidate], field: FieldKind, eye: Laterality) -> Option<String> {
        candidates
            .iter()
            .find(|c| c.field == field && c.laterality == Some(eye))
            .map(|c| c.value.to_string())
    }

    #[test]
    fn test_handwritten_iop_bare_pair() {
        let lines = normalized_lines("AT: 15 18");
        let candidates = matcher().match_field(&lines, FieldFamily::HandwrittenIop, 1);
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            value_of(&candidates, FieldKind::IntraocularPressure, Laterality::Right),
            Some("15".to_string())
        );
        assert_eq!(
            value_of(&candidates, FieldKind::IntraocularPressure, Laterality::Left),
            Some("18".to_string())
        );
        assert_eq!(
            candidates[0].source,
            ExtractionMethod::HandwrittenHeuristic { rule: "iop.bare-pair" }
        );
    }

    #[test]
    fn test_handwritten_iop_other_shapes() {
        let m = matcher();
        for (text, rule) in [
            ("眼圧 15/18", "iop.slash-pair"),
            ("IOP R15 L18", "iop.letter-pair"),
            ("眼圧 右15 左18", "iop.kanji-pair"),
        ] {
            let lines = normalized_lines(text);
            let candidates = m.match_field(&lines, FieldFamily::HandwrittenIop, 1);
            assert_eq!(candidates.len(), 2, "{}", text);
            assert_eq!(
                candidates[0].source,
                ExtractionMethod::HandwrittenHeuristic { rule },
                "{}",
                text
            );
            assert_eq!(
                value_of(&candidates, FieldKind::IntraocularPressure, Laterality::Left),
                Some("18".to_string())
            );
        }
    }

    #[test]
    fn test_handwritten_iop_skips_out_of_range_reading() {
        let lines = normalized_lines("IOP 95 15 18");
        let candidates = matcher().match_field(&lines, FieldFamily::HandwrittenIop, 1);
        assert_eq!(
            value_of(&candidates, FieldKind::IntraocularPressure, Laterality::Right),
            Some("15".to_string())
        );
        assert_eq!(
            value_of(&candidates, FieldKind::IntraocularPressure, Laterality::Left),
            Some("18".to_string())
        );
    }

    #[test]
    fn test_handwritten_iop_decimal_slash_pair() {
        let lines = normalized_lines("AT 15.5/18.5");
        let candidates = matcher().match_field(&lines, FieldFamily::HandwrittenIop, 1);
        assert_eq!(
            candidates[0].source,
            ExtractionMethod::HandwrittenHeuristic { rule: "iop.slash-pair" }
        );
        assert_eq!(
            value_of(&candidates, FieldKind::IntraocularPressure, Laterality::Right),
            Some("15.5".to_string())
        );
        assert_eq!(
            value_of(&candidates, FieldKind::IntraocularPressure, Laterality::Left),
            Some("18.5".to_string())
        );
    }

    #[test]
    fn test_handwritten_iop_ignores_lowercase_at() {
        let lines = normalized_lines("Seen at 10 12 o'clock");
        assert!(matcher()
            .match_field(&lines, FieldFamily::HandwrittenIop, 1)
            .is_empty());
    }

    #[test]
    fn test_lens_marker_glued_or_misread() {
        let m = matcher();
        for text in ["V.d.=0.1(1.2xIOL)", "V.d.=0.1 (1.2 lOL)"] {
            let candidates = m.match_field(&normalized_lines(text), FieldFamily::VisualAcuity, 4);
            assert_eq!(
                value_of(&candidates, FieldKind::IntraocularLens, Laterality::Right),
                Some("yes".to_string()),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_handwritten_iop_skips_dates() {
        let lines = normalized_lines("2025/03/04 AT 15 18");
        assert!(matcher()
            .match_field(&lines, FieldFamily::HandwrittenIop, 1)
            .is_empty());
    }

    #[test]
    fn test_handwritten_iop_needs_marker_and_range() {
        let m = matcher();
        assert!(m
            .match_field(&normalized_lines("15 18"), FieldFamily::HandwrittenIop, 1)
            .is_empty());
        assert!(m
            .match_field(&normalized_lines("IOP 15 95"), FieldFamily::HandwrittenIop, 1)
            .is_empty());
    }

    #[test]
    fn test_unmarked_iop_search_is_opt_in() {
        let lines = normalized_lines("14 16");
        assert!(matcher()
            .match_field(&lines, FieldFamily::HandwrittenIop, 1)
            .is_empty());

        let config = ExtractionConfig {
            unmarked_iop_search: true,
            ..ExtractionConfig::default()
        };
        let candidates = PatternMatcher::new(&config)
            .unwrap()
            .match_field(&lines, FieldFamily::HandwrittenIop, 1);
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[0].source,
            ExtractionMethod::HandwrittenHeuristic { rule: "iop.unmarked-pair" }
        );
    }

    #[test]
    fn test_combined_acuity_line() {
        let lines = normalized_lines("V.d.=0.1 (1.2×IOL)");
        let candidates = matcher().match_field(&lines, FieldFamily::VisualAcuity, 4);
        assert_eq!(
            value_of(&candidates, FieldKind::VisualAcuityNaked, Laterality::Right),
            Some("0.1".to_string())
        );
        assert_eq!(
            value_of(&candidates, FieldKind::VisualAcuityCorrected, Laterality::Right),
            Some("1.2".to_string())
        );
        assert_eq!(
            value_of(&candidates, FieldKind::IntraocularLens, Laterality::Right),
            Some("yes".to_string())
        );
        let naked = candidates
            .iter()
            .find(|c| c.field == FieldKind::VisualAcuityNaked)
            .unwrap();
        assert_eq!(
            naked.source,
            ExtractionMethod::KeywordPattern {
                rule: "acuity.naked-with-corrected",
                order: 1
            }
        );
    }

    #[test]
    fn test_acuity_both_eyes_and_repairs() {
        let lines = normalized_lines("V.d.=0.7\nV.5.=12");
        let candidates = matcher().match_field(&lines, FieldFamily::VisualAcuity, 4);
        assert_eq!(
            value_of(&candidates, FieldKind::VisualAcuityNaked, Laterality::Right),
            Some("0.7".to_string())
        );
        assert_eq!(
            value_of(&candidates, FieldKind::VisualAcuityNaked, Laterality::Left),
            Some("1.2".to_string())
        );
    }

    #[test]
    fn test_acuity_no_correction() {
        let lines = normalized_lines("V.s.=0.3 (n.c.)");
        let candidates = matcher().match_field(&lines, FieldFamily::VisualAcuity, 4);
        assert_eq!(
            value_of(&candidates, FieldKind::VisualAcuityCorrected, Laterality::Left),
            Some("n.c.".to_string())
        );
        assert_eq!(
            value_of(&candidates, FieldKind::VisualAcuityNaked, Laterality::Left),
            Some("0.3".to_string())
        );
    }

    #[test]
    fn test_acuity_corrected_marker() {
        let lines = normalized_lines("矯正 V.d. 1.0");
        let candidates = matcher().match_field(&lines, FieldFamily::VisualAcuity, 4);
        assert_eq!(
            value_of(&candidates, FieldKind::VisualAcuityCorrected, Laterality::Right),
            Some("1.0".to_string())
        );
        assert!(value_of(&candidates, FieldKind::VisualAcuityNaked, Laterality::Right).is_none());
    }

    #[test]
    fn test_refraction_without_eye_words() {
        let lines = normalized_lines("S: -3.00\nC: -0.75\nAx: 180");
        let candidates = matcher().match_field(&lines, FieldFamily::Refraction, 3);
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|c| c.laterality.is_none()));
        let text = |field: FieldKind| {
            candidates
                .iter()
                .find(|c| c.field == field)
                .map(|c| c.value.to_string())
        };
        assert_eq!(text(FieldKind::RefractionSphere), Some("-3.00".to_string()));
        assert_eq!(text(FieldKind::RefractionCylinder), Some("-0.75".to_string()));
        assert_eq!(text(FieldKind::RefractionAxis), Some("180".to_string()));
    }

    #[test]
    fn test_refraction_per_eye() {
        let lines = normalized_lines("R S-3.00 C-0.75 Ax180\nL S-1.00 C-0.50 Ax90");
        let candidates = matcher().match_field(&lines, FieldFamily::Refraction, 2);
        assert_eq!(
            value_of(&candidates, FieldKind::RefractionSphere, Laterality::Right),
            Some("-3.00".to_string())
        );
        assert_eq!(
            value_of(&candidates, FieldKind::RefractionAxis, Laterality::Left),
            Some("90".to_string())
        );
        assert_eq!(candidates.len(), 6);
    }

    #[test]
    fn test_refraction_labelled_rule_precedes_generic() {
        let lines = normalized_lines("SPH CYL AX\nS: -3.00 C: -0.75 Ax: 90 -1.25 -0.50 45");
        let candidates = matcher().match_field(&lines, FieldFamily::Refraction, 1);
        let sphere = candidates
            .iter()
            .find(|c| c.field == FieldKind::RefractionSphere)
            .unwrap();
        assert_eq!(sphere.value.to_string(), "-3.00");
        assert_eq!(
            sphere.source,
            ExtractionMethod::KeywordPattern {
                rule: "refraction.labelled-triplet",
                order: 0
            }
        );
    }

    #[test]
    fn test_refraction_axis_out_of_range_dropped() {
        let lines = normalized_lines("S: -2.00 C: -0.50 Ax: 200");
        let candidates = matcher().match_field(&lines, FieldFamily::Refraction, 1);
        assert!(candidates.iter().all(|c| c.field != FieldKind::RefractionAxis));
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_text_average_iop() {
        let lines = normalized_lines("NCT IOP (mmHg)\n1 14 15\n2 15 16\nAvg 14.0 15.5");
        let candidates = matcher().match_field(&lines, FieldFamily::AverageIop, 20);
        assert_eq!(candidates.len(), 2);
        assert!(candidates
            .iter()
            .all(|c| c.source == ExtractionMethod::PositionalAverage));
        assert_eq!(
            value_of(&candidates, FieldKind::IntraocularPressure, Laterality::Left),
            Some("15.5".to_string())
        );
    }

    #[test]
    fn test_text_average_single_reading_is_right_eye() {
        let lines = normalized_lines("IOP mmHg\nAug 14.0");
        let candidates = matcher().match_field(&lines, FieldFamily::AverageIop, 20);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].laterality, Some(Laterality::Right));
    }

    #[test]
    fn test_signal_strength_pair_and_neighbor() {
        let m = matcher();
        let lines = normalized_lines("Signal Strength 45 52");
        let candidates = m.match_field(&lines, FieldFamily::SignalStrength, 2);
        assert_eq!(
            value_of(&candidates, FieldKind::SignalStrength, Laterality::Left),
            Some("52".to_string())
        );

        let lines = normalized_lines("TopQ Image Quality 61\nOS\n58");
        let candidates = m.match_field(&lines, FieldFamily::SignalStrength, 2);
        assert_eq!(
            value_of(&candidates, FieldKind::SignalStrength, Laterality::Right),
            Some("61".to_string())
        );
        assert_eq!(
            value_of(&candidates, FieldKind::SignalStrength, Laterality::Left),
            Some("58".to_string())
        );
        assert_eq!(
            candidates[0].source,
            ExtractionMethod::KeywordPattern {
                rule: "signal.topq-image-quality",
                order: 0
            }
        );
    }

    #[test]
    fn test_signal_strength_single_value_without_neighbor() {
        let lines = normalized_lines("SS 45");
        assert!(matcher()
            .match_field(&lines, FieldFamily::SignalStrength, 2)
            .is_empty());
    }
}
