//! Community-rule tables for the content policy engine.
//!
//! Every rule category is data (keywords or patterns plus a severity and
//! coaching string) so individual rules are testable and tunable without
//! touching detector code. All keyword lists are lowercase; the engine
//! lowercases input before scanning.

use super::{Severity, ViolationKind};

pub const SPAM_KEYWORDS: &[&str] = &[
    "ganhe dinheiro",
    "renda extra",
    "clique aqui",
    "clique no link",
    "promoção imperdível",
    "oferta imperdível",
    "frete grátis",
    "cupom de desconto",
    "trabalhe em casa",
    "fique rica",
];

pub const COMMERCIAL_KEYWORDS: &[&str] = &[
    "compre já",
    "compre agora",
    "à venda",
    "vendo ",
    "revendedora",
    "catálogo de produtos",
    "preço especial",
    "aceito pix",
    "encomendas abertas",
];

/// URLs inside messages are treated as commercial solicitation.
pub const URL_PATTERN: &str = r"(?:https?://|www\.)[^\s]+";

pub const HATE_PATTERNS: &[&str] = &[
    r"(?i)\braça\s+inferior\b",
    r"(?i)\bseu\s+tipo\s+não\s+merece\b",
    r"(?i)\bnão\s+deveriam?\s+existir\b",
    r"(?i)\bvolta\s+pro\s+seu\s+país\b",
    r"(?i)\bgente\s+como\s+você\s+deveria\s+morrer\b",
];

pub const HARASSMENT_PATTERNS: &[&str] = &[
    r"(?i)\bsua\s+(?:burra|idiota|imbecil|vagabunda)\b",
    r"(?i)\bcala\s+a\s+boca\b",
    r"(?i)\bvocê\s+é\s+uma?\s+(?:lixo|nojo|fracasso)\b",
    r"(?i)\bvou\s+te\s+encontrar\b",
    r"(?i)\bsei\s+onde\s+você\s+mora\b",
    r"(?i)\bmãe\s+horrível\b",
];

pub const INAPPROPRIATE_PATTERNS: &[&str] = &[
    r"(?i)\bconteúdo\s+adulto\b",
    r"(?i)\bfotos?\s+íntimas?\b",
    r"(?i)\bnudes?\b",
    r"(?i)\bpornografia\b",
    r"(?i)\bvenda\s+de\s+remédio\s+controlado\b",
];

/// Clinical and anatomical vocabulary that is always legitimate in a
/// perinatal support space. The allow-list is advisory: it never clears
/// High/Critical violations, only flags that a Low/Medium hit may be
/// clinical language.
pub const MEDICAL_TERMS: &[&str] = &[
    "amamentação",
    "aleitamento",
    "mastite",
    "sangramento",
    "lóquios",
    "cesárea",
    "parto normal",
    "parto humanizado",
    "episiotomia",
    "períneo",
    "útero",
    "cólica",
    "mamilo",
    "mama",
    "vagina",
    "libido",
    "puerpério",
    "pré-natal",
    "amenorreia",
    "ocitocina",
];

/// Message length bounds in characters.
pub const MIN_MESSAGE_CHARS: usize = 2;
pub const MAX_MESSAGE_CHARS: usize = 5000;

/// Caps-ratio spam heuristic: flag when more than this share of letters
/// is uppercase (only applied past a minimum letter count).
pub const CAPS_RATIO_THRESHOLD: f32 = 0.7;
pub const CAPS_MIN_LETTERS: usize = 12;

/// Immediate-repeat heuristic: the same character this many times in a
/// row reads as keyboard mashing.
pub const REPEAT_RUN_LENGTH: usize = 5;

/// Fixed coaching string per violation kind, shown instead of a raw
/// rejection.
pub fn suggestion(kind: ViolationKind) -> &'static str {
    match kind {
        ViolationKind::Spam => {
            "Evite mensagens repetidas ou com aparência de divulgação; conte com suas palavras o que está acontecendo."
        }
        ViolationKind::Commercial => {
            "Este é um espaço de apoio, não de vendas; links e ofertas comerciais não são permitidos."
        }
        ViolationKind::HateSpeech => {
            "Mensagens que atacam grupos de pessoas não são aceitas aqui; reformule com respeito."
        }
        ViolationKind::Harassment => {
            "Fale sobre você e o que sente; ataques a outras pessoas não são permitidos."
        }
        ViolationKind::Inappropriate => {
            "Esse conteúdo não combina com este espaço; se for uma dúvida de saúde, descreva com termos clínicos."
        }
    }
}

/// Severity-to-confidence mapping shared by every detector.
pub fn severity_confidence(severity: Severity) -> f32 {
    match severity {
        Severity::Low => 0.3,
        Severity::Medium => 0.6,
        Severity::High => 0.9,
        Severity::Critical => 1.0,
    }
}
