use crate::models::{
    AuditEntry, DropReason, ExtractionMethod, FieldCandidate, FieldKind, FieldRecord,
};
use log::debug;

pub const NOT_DETECTED: &str = "not detected";

/// CandidateResolver reconciles the validated candidates of every strategy
/// into one record per field. Eyes are resolved independently; within an
/// eye the best-ranked method wins and ties keep discovery order.
pub struct CandidateResolver;

impl CandidateResolver {
    /// Resolves every field in `FieldKind::ALL` order. Candidates without a
    /// laterality cannot be placed on an eye and go to the audit trail.
    pub fn resolve_all(candidates: &[FieldCandidate]) -> (Vec<FieldRecord>, Vec<AuditEntry>) {
        let mut audit = Vec::new();
        let placed: Vec<FieldCandidate> = candidates
            .iter()
            .filter(|c| {
                if c.laterality.is_none() {
                    debug!("No laterality for {} value {}", c.field, c.value);
                    audit.push(AuditEntry::dropped(c, DropReason::AmbiguousLaterality));
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect();

        let records = FieldKind::ALL
            .iter()
            .map(|field| {
                let for_field: Vec<FieldCandidate> = placed
                    .iter()
                    .filter(|c| c.field == *field)
                    .cloned()
                    .collect();
                Self::resolve(*field, &for_field)
            })
            .collect();
        (records, audit)
    }

    /// Resolves one field. Candidates of other fields and without a
    /// laterality are ignored.
    pub fn resolve(field: FieldKind, candidates: &[FieldCandidate]) -> FieldRecord {
        let mut ranked: Vec<&FieldCandidate> = candidates
            .iter()
            .filter(|c| c.field == field && c.laterality.is_some())
            .collect();
        // Stable: equal ranks keep discovery order.
        ranked.sort_by_key(|c| c.source.rank());

        if field == FieldKind::IntraocularPressure {
            return Self::resolve_pressure(&ranked);
        }
        Self::pick(field, &ranked, "")
    }

    fn pick(field: FieldKind, ranked: &[&FieldCandidate], note: &str) -> FieldRecord {
        let right = ranked
            .iter()
            .find(|c| c.laterality.map_or(false, |l| l.covers_right()));
        let left = ranked
            .iter()
            .find(|c| c.laterality.map_or(false, |l| l.covers_left()));

        if right.is_none() && left.is_none() {
            return FieldRecord::not_detected(field, NOT_DETECTED);
        }

        let right_method = right.map(|c| c.source);
        let left_method = left.map(|c| c.source);
        FieldRecord {
            field,
            right_value: right.map(|c| c.value.clone()),
            left_value: left.map(|c| c.value.clone()),
            method: right_method.or(left_method),
            right_method,
            left_method,
            note: note.to_string(),
        }
    }

    /// A handwritten reading wins only when it covers both eyes; otherwise
    /// the instrument average is used per eye. A lone handwritten eye is
    /// never mixed with an average.
    fn resolve_pressure(ranked: &[&FieldCandidate]) -> FieldRecord {
        let field = FieldKind::IntraocularPressure;
        let (handwritten, automated): (Vec<&FieldCandidate>, Vec<&FieldCandidate>) =
            ranked.iter().copied().partition(|c| c.source.is_handwritten());

        let covers = |set: &[&FieldCandidate], right: bool| {
            set.iter().any(|c| {
                c.laterality
                    .map_or(false, |l| if right { l.covers_right() } else { l.covers_left() })
            })
        };

        if covers(&handwritten[..], true) && covers(&handwritten[..], false) {
            let note = if automated.is_empty() {
                "handwritten reading"
            } else {
                "handwritten reading preferred over instrument average"
            };
            return Self::pick(field, &handwritten, note);
        }

        let averages: Vec<&FieldCandidate> = automated
            .into_iter()
            .filter(|c| c.source == ExtractionMethod::PositionalAverage)
            .collect();
        if !averages.is_empty() {
            let note = if handwritten.is_empty() {
                "instrument average"
            } else {
                "instrument average; single-eye handwritten reading ignored"
            };
            return Self::pick(field, &averages, note);
        }

        if !handwritten.is_empty() {
            debug!("Ignoring single-eye handwritten pressure without an instrument average");
        }
        FieldRecord::not_detected(field, NOT_DETECTED)
    }
}
