//! Crisis-signal lexicon.
//!
//! Each category is data: keyword set, score weight, and the minimum
//! number of distinct keyword hits required to fire. Somatic categories
//! (panic, depression) need two distinct hits because single-symptom
//! mentions are too noisy; the remaining categories fire on one hit
//! because a missed signal there is unacceptable.

use super::RiskSignalType;

pub struct LexiconEntry {
    pub signal: RiskSignalType,
    pub keywords: &'static [&'static str],
    pub weight: u8,
    pub min_hits: usize,
}

pub const LEXICON: &[LexiconEntry] = &[
    LexiconEntry {
        signal: RiskSignalType::SuicideIdeation,
        keywords: &[
            "quero morrer",
            "quero desaparecer",
            "quero sumir",
            "não quero mais viver",
            "tirar minha vida",
            "acabar com tudo",
            "me matar",
            "seria melhor sem mim",
            "todo mundo ficaria melhor sem mim",
            "não vejo saída",
        ],
        weight: 40,
        min_hits: 1,
    },
    LexiconEntry {
        signal: RiskSignalType::PostpartumPsychosis,
        keywords: &[
            "ouço vozes",
            "vozes me mandam",
            "o bebê não é meu",
            "trocaram meu bebê",
            "querem roubar meu bebê",
            "estão me vigiando",
            "pensamentos de machucar o bebê",
            "vontade de machucar o bebê",
        ],
        weight: 40,
        min_hits: 1,
    },
    LexiconEntry {
        signal: RiskSignalType::SelfHarm,
        keywords: &[
            "me machucar",
            "me cortar",
            "me cortei",
            "me ferir",
            "me bater",
            "me punir fisicamente",
            "automutilação",
        ],
        weight: 30,
        min_hits: 1,
    },
    LexiconEntry {
        signal: RiskSignalType::AbuseReport,
        keywords: &[
            "ele me bate",
            "ele me bateu",
            "me agrediu",
            "apanhei dele",
            "me ameaça",
            "me ameaçou",
            "tenho medo dele",
            "me força a",
            "violência em casa",
            "ele me trancou",
        ],
        weight: 30,
        min_hits: 1,
    },
    LexiconEntry {
        signal: RiskSignalType::PanicAttack,
        keywords: &[
            "coração disparado",
            "coração acelerado",
            "falta de ar",
            "não consigo respirar",
            "tremendo muito",
            "sensação de sufocamento",
            "vou morrer agora",
            "formigamento",
            "crise de pânico",
            "tontura forte",
        ],
        weight: 20,
        min_hits: 2,
    },
    LexiconEntry {
        signal: RiskSignalType::SevereDepression,
        keywords: &[
            "não aguento mais",
            "sem esperança",
            "me sinto vazia",
            "não consigo levantar da cama",
            "choro o dia inteiro",
            "chorando o dia todo",
            "não sinto nada pelo bebê",
            "sou uma mãe horrível",
            "me sinto um fracasso",
            "culpada o tempo todo",
            "não durmo há dias",
        ],
        weight: 20,
        min_hits: 2,
    },
];
