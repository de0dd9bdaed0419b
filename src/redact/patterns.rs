//! PII pattern table.
//!
//! Each category is data: a compiled pattern, its fixed replacement
//! token, an optional check-digit validator, and an optional capture
//! group when only part of the match is the sensitive value.

use regex::Regex;

use super::checksum;
use super::PiiType;

/// One detection rule.
pub struct PatternSpec {
    pub pii_type: PiiType,
    pub regex: Regex,
    pub replacement: &'static str,
    /// Matches failing this check are discarded as false positives.
    pub validator: Option<fn(&str) -> bool>,
    /// When set, only this capture group is treated as the PII span.
    pub capture_group: Option<usize>,
}

fn spec(
    pii_type: PiiType,
    pattern: &str,
    replacement: &'static str,
    validator: Option<fn(&str) -> bool>,
) -> PatternSpec {
    PatternSpec {
        pii_type,
        regex: Regex::new(pattern).expect("PII pattern must compile"),
        replacement,
        validator,
        capture_group: None,
    }
}

/// Build the ordered rule table.
///
/// Order matters: document numbers come before the looser phone rules so
/// overlap resolution prefers the more specific category.
pub fn build_patterns() -> Vec<PatternSpec> {
    vec![
        // CPF, formatted or bare, gated on the modulo-11 check digits
        spec(
            PiiType::NationalId,
            r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b",
            "[cpf removido]",
            Some(checksum::cpf_is_valid),
        ),
        // CNS health card: 15 digits, weighted-sum checked
        spec(
            PiiType::HealthCardNumber,
            r"\b[1-9]\d{14}\b",
            "[cartão sus removido]",
            Some(checksum::cns_is_valid),
        ),
        // Card numbers, Luhn checked
        spec(
            PiiType::CreditCard,
            r"\b(?:\d{4}[ -]?){3}\d{4}\b",
            "[cartão removido]",
            Some(checksum::luhn_is_valid),
        ),
        // Formatted phone: (11) 98765-4321, 11 98765-4321, 98765-4321
        spec(
            PiiType::Phone,
            r"(?:\+55\s?)?(?:\(\d{2}\)\s?|\b\d{2}\s)?9?\d{4}[-\s]\d{4}\b",
            "[telefone removido]",
            None,
        ),
        // Bare mobile: DDD + leading 9 + eight digits
        spec(
            PiiType::Phone,
            r"\b(?:\+?55)?[1-9]\d9\d{8}\b",
            "[telefone removido]",
            None,
        ),
        spec(
            PiiType::Email,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            "[e-mail removido]",
            None,
        ),
        // RG accepted only fully formatted to limit false positives
        spec(
            PiiType::GovId,
            r"\b\d{2}\.\d{3}\.\d{3}-[\dXx]\b",
            "[rg removido]",
            None,
        ),
        spec(
            PiiType::BirthDate,
            r"\b\d{1,2}/\d{1,2}/(?:19|20)\d{2}\b",
            "[data removida]",
            None,
        ),
        spec(
            PiiType::Address,
            r"(?i)\b(?:rua|av(?:enida)?\.?|travessa|alameda|pra[çc]a|rodovia|estrada)\s+(?:[A-Za-zÀ-ÿ]+,?\s){1,5}?(?:n[º°o]?\.?\s*)?\d{1,5}\b",
            "[endereço removido]",
            None,
        ),
        // Self-introduced full names; group 1 is the name itself
        PatternSpec {
            pii_type: PiiType::FullName,
            regex: Regex::new(
                r"(?:[Mm]eu nome é|[Mm]e chamo)\s+([A-ZÀ-Ö][a-zà-öø-ÿ]+(?:\s+(?:d[aeo]s?\s+)?[A-ZÀ-Ö][a-zà-öø-ÿ]+)+)",
            )
            .expect("PII pattern must compile"),
            replacement: "[nome removido]",
            validator: None,
            capture_group: Some(1),
        },
    ]
}
