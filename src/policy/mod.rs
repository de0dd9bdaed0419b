//! Content policy engine.
//!
//! Validates raw message text against the community rules. Pure and
//! stateless: detection outcomes are values, never errors, and the
//! engine holds no per-user state (recent history is passed in by the
//! caller). Each detector inspects the text independently and yields at
//! most one violation.

mod rules;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Community-rule categories. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Spam,
    Commercial,
    HateSpeech,
    Harassment,
    Inappropriate,
}

/// How strongly a rule was broken. `High` and `Critical` block the
/// message; `Low` and `Medium` are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One rule hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentViolation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub description: String,
    pub matched_text: Option<String>,
}

/// Outcome of one validation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentValidationResult {
    /// False iff at least one violation is High or Critical.
    pub allowed: bool,
    pub confidence: f32,
    pub violations: Vec<ContentViolation>,
    /// De-duplicated coaching strings, one per distinct violation kind.
    pub suggestions: Vec<String>,
}

/// Table-driven content policy engine.
pub struct ContentPolicy {
    spam_matcher: AhoCorasick,
    commercial_matcher: AhoCorasick,
    url_pattern: Regex,
    hate_patterns: Vec<Regex>,
    harassment_patterns: Vec<Regex>,
    inappropriate_patterns: Vec<Regex>,
    medical_matcher: AhoCorasick,
}

impl ContentPolicy {
    pub fn new() -> Self {
        let build = |keywords: &[&str]| {
            AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .build(keywords)
                .expect("keyword table must build")
        };
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("rule pattern must compile"))
                .collect()
        };

        Self {
            spam_matcher: build(rules::SPAM_KEYWORDS),
            commercial_matcher: build(rules::COMMERCIAL_KEYWORDS),
            url_pattern: Regex::new(rules::URL_PATTERN).expect("rule pattern must compile"),
            hate_patterns: compile(rules::HATE_PATTERNS),
            harassment_patterns: compile(rules::HARASSMENT_PATTERNS),
            inappropriate_patterns: compile(rules::INAPPROPRIATE_PATTERNS),
            medical_matcher: build(rules::MEDICAL_TERMS),
        }
    }

    /// Run all detectors over the raw text.
    ///
    /// `recent_history` holds the user's last few accepted messages and
    /// feeds only the exact-repeat spam heuristic.
    pub fn validate(&self, text: &str, recent_history: &[String]) -> ContentValidationResult {
        let normalized: String = text.nfkc().collect();
        let lower = normalized.to_lowercase();

        let violations: Vec<ContentViolation> = [
            self.check_length(&normalized),
            self.check_spam(&normalized, &lower, recent_history),
            self.check_commercial(&normalized, &lower),
            self.check_patterns(
                &self.hate_patterns,
                &normalized,
                ViolationKind::HateSpeech,
                Severity::Critical,
                "discurso de ódio detectado",
            ),
            self.check_patterns(
                &self.harassment_patterns,
                &normalized,
                ViolationKind::Harassment,
                Severity::High,
                "assédio ou ataque pessoal detectado",
            ),
            self.check_patterns(
                &self.inappropriate_patterns,
                &normalized,
                ViolationKind::Inappropriate,
                Severity::Medium,
                "conteúdo impróprio para este espaço",
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        let allowed = !violations
            .iter()
            .any(|v| v.severity >= Severity::High);
        let confidence = violations
            .iter()
            .map(|v| rules::severity_confidence(v.severity))
            .fold(f32::NAN, f32::max);
        let confidence = if confidence.is_nan() { 1.0 } else { confidence };

        let mut suggestions = Vec::new();
        for violation in &violations {
            let suggestion = rules::suggestion(violation.kind).to_string();
            if !suggestions.contains(&suggestion) {
                suggestions.push(suggestion);
            }
        }

        ContentValidationResult {
            allowed,
            confidence,
            violations,
            suggestions,
        }
    }

    /// Advisory allow-list check: true when the text uses clinical
    /// vocabulary and trips no commercial/hate/harassment rule. Callers
    /// may use it to soften a Low/Medium violation before acting.
    pub fn is_medical_language_only(&self, text: &str) -> bool {
        let normalized: String = text.nfkc().collect();
        let lower = normalized.to_lowercase();

        if !self.medical_matcher.is_match(&lower) {
            return false;
        }
        if self.commercial_matcher.is_match(&lower) || self.url_pattern.is_match(&lower) {
            return false;
        }
        if self.hate_patterns.iter().any(|p| p.is_match(&normalized)) {
            return false;
        }
        !self
            .harassment_patterns
            .iter()
            .any(|p| p.is_match(&normalized))
    }

    fn check_length(&self, text: &str) -> Option<ContentViolation> {
        let chars = text.chars().count();
        if chars < rules::MIN_MESSAGE_CHARS {
            return Some(ContentViolation {
                kind: ViolationKind::Inappropriate,
                severity: Severity::Low,
                description: "mensagem muito curta".to_string(),
                matched_text: None,
            });
        }
        if chars > rules::MAX_MESSAGE_CHARS {
            return Some(ContentViolation {
                kind: ViolationKind::Inappropriate,
                severity: Severity::Medium,
                description: format!("mensagem excede {} caracteres", rules::MAX_MESSAGE_CHARS),
                matched_text: None,
            });
        }
        None
    }

    fn check_spam(
        &self,
        text: &str,
        lower: &str,
        recent_history: &[String],
    ) -> Option<ContentViolation> {
        if let Some(m) = self.spam_matcher.find(lower) {
            return Some(ContentViolation {
                kind: ViolationKind::Spam,
                severity: Severity::Medium,
                description: "linguagem típica de divulgação em massa".to_string(),
                matched_text: Some(lower[m.start()..m.end()].to_string()),
            });
        }

        let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.len() >= rules::CAPS_MIN_LETTERS {
            let upper = letters.iter().filter(|c| c.is_uppercase()).count();
            if upper as f32 / letters.len() as f32 > rules::CAPS_RATIO_THRESHOLD {
                return Some(ContentViolation {
                    kind: ViolationKind::Spam,
                    severity: Severity::Low,
                    description: "mensagem majoritariamente em maiúsculas".to_string(),
                    matched_text: None,
                });
            }
        }

        if let Some(run) = longest_char_run(text) {
            if run.1 >= rules::REPEAT_RUN_LENGTH {
                return Some(ContentViolation {
                    kind: ViolationKind::Spam,
                    severity: Severity::Low,
                    description: "caractere repetido em sequência".to_string(),
                    matched_text: Some(run.0.to_string()),
                });
            }
        }

        if recent_history.iter().any(|previous| previous == text) {
            return Some(ContentViolation {
                kind: ViolationKind::Spam,
                severity: Severity::Medium,
                description: "mensagem idêntica a uma recente".to_string(),
                matched_text: None,
            });
        }

        None
    }

    fn check_commercial(&self, _text: &str, lower: &str) -> Option<ContentViolation> {
        if let Some(m) = self.url_pattern.find(lower) {
            return Some(ContentViolation {
                kind: ViolationKind::Commercial,
                severity: Severity::High,
                description: "link externo em mensagem de apoio".to_string(),
                matched_text: Some(m.as_str().to_string()),
            });
        }
        if let Some(m) = self.commercial_matcher.find(lower) {
            return Some(ContentViolation {
                kind: ViolationKind::Commercial,
                severity: Severity::High,
                description: "oferta comercial detectada".to_string(),
                matched_text: Some(lower[m.start()..m.end()].to_string()),
            });
        }
        None
    }

    fn check_patterns(
        &self,
        patterns: &[Regex],
        text: &str,
        kind: ViolationKind,
        severity: Severity,
        description: &str,
    ) -> Option<ContentViolation> {
        for pattern in patterns {
            if let Some(m) = pattern.find(text) {
                return Some(ContentViolation {
                    kind,
                    severity,
                    description: description.to_string(),
                    matched_text: Some(m.as_str().to_string()),
                });
            }
        }
        None
    }
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest run of one repeated non-space character.
fn longest_char_run(text: &str) -> Option<(char, usize)> {
    let mut best: Option<(char, usize)> = None;
    let mut current: Option<(char, usize)> = None;

    for c in text.chars() {
        current = match current {
            Some((prev, count)) if prev == c => Some((prev, count + 1)),
            _ => Some((c, 1)),
        };
        if let Some((c, count)) = current {
            if !c.is_whitespace() && best.map_or(true, |(_, b)| count > b) {
                best = Some((c, count));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ContentPolicy {
        ContentPolicy::new()
    }

    #[test]
    fn test_normal_message_allowed() {
        let result = policy().validate("hoje o bebê mamou bem e dormiu a tarde toda", &[]);
        assert!(result.allowed);
        assert!(result.violations.is_empty());
        assert!(result.suggestions.is_empty());
    }

    #[test]
    fn test_commercial_url_blocked() {
        let result = policy().validate(
            "compre já, link: http://x.com, promoção imperdível",
            &[],
        );
        assert!(!result.allowed);
        let commercial: Vec<_> = result
            .violations
            .iter()
            .filter(|v| v.kind == ViolationKind::Commercial)
            .collect();
        assert!(!commercial.is_empty());
        assert!(commercial[0]
            .matched_text
            .as_deref()
            .unwrap()
            .contains("http://x.com"));
    }

    #[test]
    fn test_spam_keyword_is_advisory() {
        let result = policy().validate("ganhe dinheiro rápido com essa dica", &[]);
        assert!(result.allowed);
        assert!(result
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::Spam));
    }

    #[test]
    fn test_repeat_in_history_flags_spam() {
        let history = vec!["socorro alguém me responde".to_string()];
        let result = policy().validate("socorro alguém me responde", &history);
        assert!(result
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::Spam));
    }

    #[test]
    fn test_caps_ratio() {
        let result = policy().validate("ME AJUDEM AGORA POR FAVOR GENTE", &[]);
        assert!(result
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::Spam));
    }

    #[test]
    fn test_repeated_characters() {
        let result = policy().validate("aiiiiiiiii que dia", &[]);
        assert!(result
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::Spam));
    }

    #[test]
    fn test_harassment_blocked() {
        let result = policy().validate("cala a boca, sua burra", &[]);
        assert!(!result.allowed);
        assert!(result
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::Harassment && v.severity == Severity::High));
    }

    #[test]
    fn test_length_bounds() {
        let short = policy().validate("a", &[]);
        assert!(short.allowed);
        assert_eq!(short.violations[0].severity, Severity::Low);

        let long = policy().validate(&"palavra ".repeat(700), &[]);
        assert!(long.allowed);
        assert!(long
            .violations
            .iter()
            .any(|v| v.severity == Severity::Medium));
    }

    #[test]
    fn test_confidence_tracks_worst_violation() {
        let result = policy().validate("cala a boca, sua burra", &[]);
        assert!((result.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_medical_language_allowlist() {
        let engine = policy();
        assert!(engine.is_medical_language_only(
            "estou com mastite e o sangramento aumentou depois da cesárea"
        ));
        assert!(!engine.is_medical_language_only("compre já meu catálogo de produtos"));
        assert!(!engine.is_medical_language_only("hoje está um dia bonito"));
    }

    #[test]
    fn test_suggestions_deduplicated() {
        // Two spam heuristics cannot both fire (one violation per
        // detector), but spam + commercial produce two suggestions.
        let result = policy().validate("ganhe dinheiro: www.promo.com", &[]);
        let unique: std::collections::HashSet<_> = result.suggestions.iter().collect();
        assert_eq!(unique.len(), result.suggestions.len());
    }
}
