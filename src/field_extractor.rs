use crate::models::*;
use crate::processing::*;
use crate::processing::tokens::{line_texts, normalize_tokens};
use crate::utils::ExtractionError;
use crate::validation::RangeValidator;
use log::{debug, info, warn};

/// Everything one OCR pass contributes before validation.
struct PassCandidates {
    report_kind: ReportKind,
    candidates: Vec<FieldCandidate>,
}

/// Turns OCR output for one document into resolved per-field records.
///
/// Compiled matchers and configuration are read-only after construction, so
/// one extractor can serve any number of documents (and threads).
pub struct FieldExtractor {
    config: ExtractionConfig,
    matcher: PatternMatcher,
    tables: TableExtractor,
    validator: RangeValidator,
}

impl FieldExtractor {
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractionError> {
        config.validate()?;
        let matcher = PatternMatcher::new(&config)?;
        let tables = TableExtractor::new(config.table.clone());
        let validator = RangeValidator::new(&config);
        Ok(FieldExtractor {
            config,
            matcher,
            tables,
            validator,
        })
    }

    pub fn with_defaults() -> Result<Self, ExtractionError> {
        Self::new(ExtractionConfig::default())
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extracts from a single OCR pass.
    pub fn extract(&self, input: &OcrInput) -> Result<DocumentExtraction, ExtractionError> {
        self.extract_passes(std::slice::from_ref(input))
    }

    /// Extracts from several OCR passes over the same document (for example
    /// different page segmentation modes). Candidates from all passes compete
    /// in one resolution; earlier passes win ties.
    pub fn extract_passes(&self, passes: &[OcrInput]) -> Result<DocumentExtraction, ExtractionError> {
        let usable: Vec<&OcrInput> = passes.iter().filter(|p| !p.is_empty()).collect();
        if usable.is_empty() {
            return Err(ExtractionError::MalformedInput(
                "OCR returned neither text nor tokens".to_string(),
            ));
        }
        if usable.len() < passes.len() {
            warn!("Skipping {} empty OCR pass(es)", passes.len() - usable.len());
        }

        let mut report_kind = ReportKind::Chart;
        let mut candidates = Vec::new();
        for (index, pass) in usable.iter().enumerate() {
            let found = self.collect(pass);
            debug!(
                "Pass {}: {:?}, {} candidate(s)",
                index,
                found.report_kind,
                found.candidates.len()
            );
            report_kind = more_specific(report_kind, found.report_kind);
            candidates.extend(found.candidates);
        }

        let candidate_count = candidates.len();
        let (accepted, mut audit) = self.validator.filter(candidates);
        let (records, unplaced) = CandidateResolver::resolve_all(&accepted);
        audit.extend(unplaced);

        let extraction = DocumentExtraction {
            report_kind,
            records,
            audit,
            candidate_count,
        };
        info!(
            "Extracted {}/{} fields ({} candidates, {} dropped)",
            extraction.detected_count(),
            FieldKind::ALL.len(),
            candidate_count,
            extraction.audit.len()
        );
        Ok(extraction)
    }

    /// Extraction plus the identifying metadata report writers need.
    pub fn report(
        &self,
        meta: DocumentMeta,
        passes: &[OcrInput],
    ) -> Result<DocumentReport, ExtractionError> {
        let extraction = self.extract_passes(passes)?;
        Ok(DocumentReport { meta, extraction })
    }

    fn collect(&self, input: &OcrInput) -> PassCandidates {
        match input {
            OcrInput::Text(text) => {
                let lines = normalized_lines(text);
                let report_kind = classify_report(&lines);
                let candidates = self.match_lines(&lines, report_kind);
                PassCandidates {
                    report_kind,
                    candidates,
                }
            }
            OcrInput::Tokens(raw) => {
                let min_conf = self.config.table.min_token_confidence;
                let kept: Vec<OcrToken> = raw
                    .iter()
                    .filter(|t| t.confidence.map_or(true, |c| c >= min_conf))
                    .cloned()
                    .collect();
                let tokens = normalize_tokens(&kept);
                let grouped = group_lines(&tokens);
                let lines = line_texts(&grouped);
                let report_kind = classify_report(&lines);

                let mut candidates = self.match_lines(&lines, report_kind);
                candidates.extend(self.tables.extract_average_iop(&tokens, &grouped));
                if report_kind == ReportKind::MacularOct {
                    debug!("Macular report, skipping disc tables");
                } else {
                    candidates.extend(self.tables.extract_rnfl(&tokens, &grouped));
                    candidates.extend(self.tables.extract_disc_topography(&tokens, &grouped));
                }
                PassCandidates {
                    report_kind,
                    candidates,
                }
            }
        }
    }

    fn match_lines(&self, lines: &[String], report_kind: ReportKind) -> Vec<FieldCandidate> {
        FieldFamily::ALL
            .iter()
            .filter(|family| {
                !(report_kind == ReportKind::MacularOct && **family == FieldFamily::SignalStrength)
            })
            .flat_map(|family| {
                self.matcher
                    .match_field(lines, *family, family.default_window(&self.config))
            })
            .collect()
    }
}

fn more_specific(current: ReportKind, next: ReportKind) -> ReportKind {
    match (current, next) {
        (ReportKind::DiscOct, _) | (_, ReportKind::DiscOct) => ReportKind::DiscOct,
        (ReportKind::MacularOct, _) | (_, ReportKind::MacularOct) => ReportKind::MacularOct,
        _ => ReportKind::Chart,
    }
}
