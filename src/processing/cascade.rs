use crate::models::rules::default_bounds;
use crate::models::{FieldKind, FieldValue, Laterality, Vocabulary};
use crate::utils::ExtractionError;
use regex::{Captures, Regex};

/// A value pulled out of a matched text by one rule, before it becomes a
/// `FieldCandidate`.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub field: FieldKind,
    pub laterality: Option<Laterality>,
    pub value: FieldValue,
}

impl Extracted {
    pub fn new(field: FieldKind, laterality: Option<Laterality>, value: FieldValue) -> Self {
        Extracted {
            field,
            laterality,
            value,
        }
    }
}

/// What a rule sees besides its own captures.
pub struct RuleContext<'a> {
    pub text: &'a str,
    /// Lines around `text`, for rules that complete a partial reading from
    /// nearby lines.
    pub neighbors: &'a [String],
    pub laterality: Option<Laterality>,
    pub markers: &'a MarkerSet,
}

impl<'a> RuleContext<'a> {
    pub fn new(text: &'a str, markers: &'a MarkerSet) -> Self {
        RuleContext {
            text,
            neighbors: &[],
            laterality: None,
            markers,
        }
    }

    pub fn with_laterality(mut self, laterality: Option<Laterality>) -> Self {
        self.laterality = laterality;
        self
    }

    pub fn with_neighbors(mut self, neighbors: &'a [String]) -> Self {
        self.neighbors = neighbors;
        self
    }
}

pub type RuleExtractor = fn(&Captures<'_>, &RuleContext<'_>) -> Vec<Extracted>;
pub type RuleValidator = fn(&Extracted) -> bool;

/// One `(pattern, extractor, validator)` entry of a cascade.
pub struct CascadeRule {
    pub id: &'static str,
    pub pattern: Regex,
    extract: RuleExtractor,
    validate: RuleValidator,
}

impl CascadeRule {
    /// Runs the rule over every occurrence of its pattern and returns the
    /// values of the first occurrence that survives the validator.
    pub fn apply(&self, ctx: &RuleContext<'_>) -> Option<Vec<Extracted>> {
        for caps in self.pattern.captures_iter(ctx.text) {
            let values: Vec<Extracted> = (self.extract)(&caps, ctx)
                .into_iter()
                .filter(|value| (self.validate)(value))
                .collect();
            if !values.is_empty() {
                return Some(values);
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeHit {
    pub rule: &'static str,
    pub order: usize,
    pub values: Vec<Extracted>,
}

/// An ordered list of rules. The first rule yielding a structurally valid
/// match wins; later rules are not consulted.
pub struct PatternCascade {
    pub name: &'static str,
    rules: Vec<CascadeRule>,
}

impl PatternCascade {
    pub fn new(name: &'static str) -> Self {
        PatternCascade {
            name,
            rules: Vec::new(),
        }
    }

    pub fn rule(
        mut self,
        id: &'static str,
        pattern: Regex,
        extract: RuleExtractor,
        validate: RuleValidator,
    ) -> Self {
        self.rules.push(CascadeRule {
            id,
            pattern,
            extract,
            validate,
        });
        self
    }

    pub fn rules(&self) -> impl Iterator<Item = (usize, &CascadeRule)> {
        self.rules.iter().enumerate()
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn first_match(&self, ctx: &RuleContext<'_>) -> Option<CascadeHit> {
        self.rules().find_map(|(order, rule)| {
            rule.apply(ctx).map(|values| CascadeHit {
                rule: rule.id,
                order,
                values,
            })
        })
    }
}

/// Structural plausibility against the declared (not configured) bounds.
pub fn within_declared_range(extracted: &Extracted) -> bool {
    match (&extracted.value, default_bounds(extracted.field)) {
        (FieldValue::Number { value, .. }, Some(bounds)) => bounds.contains(*value),
        (FieldValue::Number { .. }, None) => false,
        _ => true,
    }
}

pub fn accept_all(_: &Extracted) -> bool {
    true
}

enum Boundary {
    Both,
    Leading,
    Trailing,
    None,
}

/// Builds an alternation from vocabulary entries, longest first. ASCII
/// entries get word boundaries; CJK entries never do since kanji are word
/// characters to the regex engine.
fn alternation(entries: &[String], boundary: Boundary) -> String {
    let mut sorted: Vec<&String> = entries.iter().filter(|e| !e.trim().is_empty()).collect();
    sorted.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

    let parts: Vec<String> = sorted
        .iter()
        .map(|entry| {
            let escaped = regex::escape(entry);
            let starts_word = entry.chars().next().map_or(false, |c| c.is_ascii_alphanumeric());
            let ends_word = entry.chars().last().map_or(false, |c| c.is_ascii_alphanumeric());
            match boundary {
                Boundary::Both if starts_word && ends_word => format!(r"\b{}\b", escaped),
                Boundary::Both if starts_word => format!(r"\b{}", escaped),
                Boundary::Leading if starts_word => format!(r"\b{}", escaped),
                Boundary::Trailing if ends_word => format!(r"{}\b", escaped),
                _ => escaped,
            }
        })
        .collect();

    if parts.is_empty() {
        // Matches nothing.
        r"(?:\b\B)".to_string()
    } else {
        format!("(?:{})", parts.join("|"))
    }
}

pub const SIGNED_NUMBER: &str = r"([+\-]?\d{1,2}(?:\.\d{1,2})?)";

/// Day/month/year with one separator throughout. The parts must be whole
/// numbers, so decimal pairs like `15.5/18.5` are not dates.
const NUMERIC_DATE: &str = r"(?:^|[^\d.])\d{1,2}(?:/\d{1,2}/|-\d{1,2}-|\.\d{1,2}\.)\d{2,4}(?:$|[^\d.])";

/// Abbreviations such as `AT` that are also everyday words in lower case.
fn is_abbreviation(marker: &str) -> bool {
    marker.chars().count() <= 2 && marker.chars().all(|c| c.is_ascii_uppercase())
}

/// The vocabulary compiled into matchers. Built once per extractor and
/// shared read-only by every document.
pub struct MarkerSet {
    pub acuity_eye: Regex,
    pub right_eye: Regex,
    pub left_eye: Regex,
    pub iop: Regex,
    pub date: Regex,
    pub intraocular_lens: Regex,
    pub naked: Regex,
    pub corrected: Regex,
    pub no_correction: Regex,
    pub sphere_label: String,
    pub cylinder_label: String,
    pub axis_label: String,
    pub sphere_gate: Regex,
    pub cylinder_gate: Regex,
    pub sphere_value: Regex,
    pub cylinder_value: Regex,
    pub axis_value: Regex,
}

impl MarkerSet {
    pub fn compile(vocab: &Vocabulary) -> Result<Self, ExtractionError> {
        let sphere_label = alternation(&vocab.sphere_labels, Boundary::Leading);
        let cylinder_label = alternation(&vocab.cylinder_labels, Boundary::Leading);
        let axis_label = alternation(&vocab.axis_labels, Boundary::Leading);
        let (abbreviations, iop_words): (Vec<String>, Vec<String>) = vocab
            .iop_markers
            .iter()
            .cloned()
            .partition(|marker| is_abbreviation(marker));

        Ok(MarkerSet {
            acuity_eye: Regex::new(&format!(
                "(?P<right>{})|(?P<left>{})",
                alternation(&vocab.acuity_right_markers, Boundary::None),
                alternation(&vocab.acuity_left_markers, Boundary::None)
            ))?,
            right_eye: Regex::new(&format!(
                "(?i){}",
                alternation(&vocab.right_eye_words, Boundary::Both)
            ))?,
            left_eye: Regex::new(&format!(
                "(?i){}",
                alternation(&vocab.left_eye_words, Boundary::Both)
            ))?,
            iop: Regex::new(&format!(
                "(?i:{})|{}",
                alternation(&iop_words, Boundary::Both),
                alternation(&abbreviations, Boundary::Both)
            ))?,
            date: Regex::new(&format!(
                r"(?i){}|(?:19|20)\d{{2}}\s*[/.\-年]\s*\d{{1,2}}|{}|\d{{1,2}}月\s*\d{{1,2}}日",
                alternation(&vocab.date_markers, Boundary::Both),
                NUMERIC_DATE
            ))?,
            // The marker may be glued to the multiplication sign: `1.2xIOL`.
            intraocular_lens: Regex::new(&format!(
                r"(?:\b|[×xX]\s*){}",
                alternation(&vocab.intraocular_lens_markers, Boundary::Trailing)
            ))?,
            naked: Regex::new(&format!("(?i){}", alternation(&vocab.naked_markers, Boundary::Both)))?,
            corrected: Regex::new(&format!(
                "(?i){}",
                alternation(&vocab.corrected_markers, Boundary::Both)
            ))?,
            no_correction: Regex::new(&format!(
                "(?i){}",
                alternation(&vocab.no_correction_markers, Boundary::Leading)
            ))?,
            sphere_gate: Regex::new(&format!("(?i){}", sphere_label))?,
            cylinder_gate: Regex::new(&format!("(?i){}", cylinder_label))?,
            sphere_value: Regex::new(&format!(r"(?i){}\s*[:=]?\s*{}", sphere_label, SIGNED_NUMBER))?,
            cylinder_value: Regex::new(&format!(
                r"(?i){}\s*[:=]?\s*{}",
                cylinder_label, SIGNED_NUMBER
            ))?,
            axis_value: Regex::new(&format!(r"(?i){}\s*[:=]?\s*(\d{{1,3}})", axis_label))?,
            sphere_label,
            cylinder_label,
            axis_label,
        })
    }

    /// Which eye a stretch of text talks about, from explicit right/left
    /// words. When both appear the earlier one wins; when neither appears
    /// the laterality is unknown and must not be guessed.
    pub fn laterality_of(&self, text: &str) -> Option<Laterality> {
        let right = self.right_eye.find(text).map(|m| m.start());
        let left = self.left_eye.find(text).map(|m| m.start());
        match (right, left) {
            (Some(r), Some(l)) if r <= l => Some(Laterality::Right),
            (Some(_), Some(_)) => Some(Laterality::Left),
            (Some(_), None) => Some(Laterality::Right),
            (None, Some(_)) => Some(Laterality::Left),
            (None, None) => None,
        }
    }
}
