//! PII detection and redaction.
//!
//! Pure and deterministic: text in, detection result plus sanitized text
//! out. Nothing here touches storage, and absence of a match is the
//! normal "no PII" result rather than an error. Matching runs over the
//! NFKC-normalized text so decomposed or homograph characters cannot
//! slip a document number past the patterns.

mod checksum;
mod patterns;

pub use patterns::PatternSpec;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// PII categories recognized by the redactor. Closed set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    /// CPF.
    NationalId,
    Phone,
    Email,
    /// RG.
    GovId,
    /// CNS health card.
    HealthCardNumber,
    BirthDate,
    CreditCard,
    Address,
    FullName,
}

/// One redacted span in the normalized input text.
///
/// `raw_value` exists only inside the detection call stack; results are
/// never persisted with it populated.
#[derive(Debug, Clone)]
pub struct PiiPosition {
    pub pii_type: PiiType,
    pub start: usize,
    pub end: usize,
    pub raw_value: String,
    pub replacement: &'static str,
}

/// Outcome of one detection pass. Created fresh per call.
#[derive(Debug, Clone)]
pub struct PiiDetectionResult {
    pub has_pii: bool,
    pub types: BTreeSet<PiiType>,
    pub positions: Vec<PiiPosition>,
    pub sanitized_text: String,
}

/// Table-driven PII redactor. Stateless; safe to share and call from any
/// number of tasks concurrently.
pub struct PiiRedactor {
    patterns: Vec<PatternSpec>,
}

impl PiiRedactor {
    pub fn new() -> Self {
        Self {
            patterns: patterns::build_patterns(),
        }
    }

    /// Detect PII and produce the sanitized text in one pass.
    pub fn detect(&self, text: &str) -> PiiDetectionResult {
        let normalized: String = text.nfkc().collect();
        let mut positions = Vec::new();

        for spec in &self.patterns {
            match spec.capture_group {
                None => {
                    for m in spec.regex.find_iter(&normalized) {
                        self.push_candidate(&mut positions, spec, m.start(), m.end(), m.as_str());
                    }
                }
                Some(group) => {
                    for caps in spec.regex.captures_iter(&normalized) {
                        if let Some(m) = caps.get(group) {
                            self.push_candidate(
                                &mut positions,
                                spec,
                                m.start(),
                                m.end(),
                                m.as_str(),
                            );
                        }
                    }
                }
            }
        }

        // Earlier start wins; on a tie the longer span wins. Pattern
        // table order breaks remaining ties (document numbers first).
        positions.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        let positions = drop_overlaps(positions);

        let mut sanitized = normalized;
        for pos in positions.iter().rev() {
            sanitized.replace_range(pos.start..pos.end, pos.replacement);
        }

        let types: BTreeSet<PiiType> = positions.iter().map(|p| p.pii_type).collect();
        PiiDetectionResult {
            has_pii: !positions.is_empty(),
            types,
            positions,
            sanitized_text: sanitized,
        }
    }

    fn push_candidate(
        &self,
        positions: &mut Vec<PiiPosition>,
        spec: &PatternSpec,
        start: usize,
        end: usize,
        value: &str,
    ) {
        if let Some(validate) = spec.validator {
            if !validate(value) {
                return;
            }
        }
        positions.push(PiiPosition {
            pii_type: spec.pii_type,
            start,
            end,
            raw_value: value.to_string(),
            replacement: spec.replacement,
        });
    }

    /// Sanitized text only, for callers that do not need positions.
    pub fn sanitize(&self, text: &str) -> String {
        self.detect(text).sanitized_text
    }

    /// True when the text carries no detectable PII.
    pub fn is_safe_to_store(&self, text: &str) -> bool {
        !self.detect(text).has_pii
    }

    /// Redact every string leaf of an arbitrary JSON tree in place.
    ///
    /// Used by the audit logger before metadata is buffered; map keys are
    /// left untouched (they are schema, not user content).
    pub fn redact_structured(&self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::String(s) => {
                let sanitized = self.sanitize(s);
                if sanitized != *s {
                    *s = sanitized;
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.redact_structured(item);
                }
            }
            serde_json::Value::Object(map) => {
                for (_, v) in map.iter_mut() {
                    self.redact_structured(v);
                }
            }
            _ => {}
        }
    }
}

impl Default for PiiRedactor {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep the first of any overlapping pair. Input must be sorted by
/// `(start asc, end desc)`.
fn drop_overlaps(positions: Vec<PiiPosition>) -> Vec<PiiPosition> {
    let mut result: Vec<PiiPosition> = Vec::with_capacity(positions.len());
    for pos in positions {
        match result.last() {
            Some(prev) if pos.start < prev.end => continue,
            _ => result.push(pos),
        }
    }
    result
}
