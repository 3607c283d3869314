use crate::models::rules::allowed_sentinels;
use crate::models::{AuditEntry, Bounds, DropReason, ExtractionConfig, FieldCandidate, FieldKind, FieldValue};
use log::debug;
use std::collections::BTreeMap;

/// Rejects physiologically implausible candidates. Values outside a field's
/// bounds are dropped, never clamped.
pub struct RangeValidator {
    bounds: BTreeMap<FieldKind, Bounds>,
}

impl RangeValidator {
    pub fn new(config: &ExtractionConfig) -> Self {
        let bounds = FieldKind::ALL
            .iter()
            .filter_map(|field| config.bounds_for(*field).map(|b| (*field, b)))
            .collect();
        RangeValidator { bounds }
    }

    pub fn bounds(&self, field: FieldKind) -> Option<Bounds> {
        self.bounds.get(&field).copied()
    }

    /// Why a candidate would be dropped, if it would.
    pub fn check(&self, candidate: &FieldCandidate) -> Result<(), DropReason> {
        match (&candidate.value, self.bounds(candidate.field)) {
            (FieldValue::Number { value, .. }, Some(bounds)) => {
                if bounds.contains(*value) {
                    Ok(())
                } else {
                    Err(DropReason::OutOfRange)
                }
            }
            // Flag fields carry no number.
            (FieldValue::Number { .. }, None) => Err(DropReason::NotNumeric),
            (FieldValue::Flag(_), None) => Ok(()),
            (FieldValue::Flag(_), Some(_)) => Err(DropReason::NotNumeric),
            (FieldValue::Text(text), _) => {
                if allowed_sentinels(candidate.field).iter().any(|s| *s == text.as_str()) {
                    Ok(())
                } else {
                    Err(DropReason::NotNumeric)
                }
            }
        }
    }

    pub fn validate(&self, candidate: FieldCandidate) -> Option<FieldCandidate> {
        match self.check(&candidate) {
            Ok(()) => Some(candidate),
            Err(_) => None,
        }
    }

    /// Splits candidates into accepted ones and audit entries for the rest.
    pub fn filter(&self, candidates: Vec<FieldCandidate>) -> (Vec<FieldCandidate>, Vec<AuditEntry>) {
        let mut accepted = Vec::with_capacity(candidates.len());
        let mut audit = Vec::new();
        for candidate in candidates {
            match self.check(&candidate) {
                Ok(()) => accepted.push(candidate),
                Err(reason) => {
                    debug!(
                        "Dropping {} value {} from {}: {:?}",
                        candidate.field, candidate.value, candidate.source, reason
                    );
                    audit.push(AuditEntry::dropped(&candidate, reason));
                }
            }
        }
        (accepted, audit)
    }
}

impl Default for RangeValidator {
    fn default() -> Self {
        Self::new(&ExtractionConfig::default())
    }
}
