//! Psychological and medical crisis detection.
//!
//! Pure and stateless. The detector scores lower-cased text against the
//! crisis lexicon and maps the score through a monotonic level ladder;
//! urgency can escalate past the numeric score when specific signal
//! classes are present. This module is the only place where detected
//! risk is allowed to alter the user-visible conversation flow, via
//! [`RiskDetector::compose_safety_response`].

mod lexicon;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use lexicon::LexiconEntry;

/// Crisis signal classes. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSignalType {
    SelfHarm,
    SuicideIdeation,
    PanicAttack,
    SevereDepression,
    PostpartumPsychosis,
    AbuseReport,
}

/// One matched crisis indicator.
///
/// `confidence` is advisory: it is surfaced for moderator triage but is
/// never folded into the numeric score, which counts category hits only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSignal {
    pub signal_type: RiskSignalType,
    /// The lexicon keyword that matched.
    pub indicator: String,
    pub confidence: f32,
    /// Text surrounding the first hit, for reviewer context.
    pub context: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Routine,
    Elevated,
    Urgent,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    None,
    Monitor,
    FlagForReview,
    EscalateToModerator,
    EmergencyContact,
}

/// Outcome of one analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAnalysisResult {
    pub level: RiskLevel,
    /// Clamped weighted sum over fired categories, 0..=100.
    pub score: u8,
    pub signals: Vec<RiskSignal>,
    pub urgency: Urgency,
    pub recommended_action: RecommendedAction,
    pub needs_human_review: bool,
}

/// Fixed response handed to the conversation layer when risk is found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyResponse {
    pub message: String,
    /// True only for Emergency: the normal conversation is suspended.
    pub blocks_interaction: bool,
}

/// Score thresholds for the level ladder. Must be strictly increasing;
/// an inconsistent configuration falls back to the defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low: u8,
    pub medium: u8,
    pub high: u8,
    pub critical: u8,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 20,
            medium: 40,
            high: 60,
            critical: 80,
        }
    }
}

impl RiskThresholds {
    pub fn is_monotonic(&self) -> bool {
        self.low < self.medium && self.medium < self.high && self.high < self.critical
    }
}

/// Direction of a user's risk trajectory over recent messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTrend {
    Improving,
    Stable,
    Worsening,
}

/// Longitudinal view over a message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRiskResult {
    /// Recency-weighted cumulative score, 0..=100.
    pub cumulative_score: u8,
    pub trend: RiskTrend,
    pub per_message_scores: Vec<u8>,
}

struct CompiledEntry {
    entry: &'static LexiconEntry,
    matcher: AhoCorasick,
}

/// Lexicon-driven crisis detector.
pub struct RiskDetector {
    entries: Vec<CompiledEntry>,
    thresholds: RiskThresholds,
}

impl RiskDetector {
    pub fn new(thresholds: RiskThresholds) -> Self {
        let thresholds = if thresholds.is_monotonic() {
            thresholds
        } else {
            tracing::warn!("risk thresholds not monotonic, using defaults");
            RiskThresholds::default()
        };

        let entries = lexicon::LEXICON
            .iter()
            .map(|entry| CompiledEntry {
                entry,
                matcher: AhoCorasickBuilder::new()
                    .build(entry.keywords)
                    .expect("lexicon must build"),
            })
            .collect();

        Self { entries, thresholds }
    }

    /// Analyze one message. Never fails; no signal is the normal result.
    pub fn analyze(&self, text: &str) -> RiskAnalysisResult {
        let normalized: String = text.nfkc().collect();
        let lower = normalized.to_lowercase();

        let mut score: u16 = 0;
        let mut signals = Vec::new();

        for compiled in &self.entries {
            let mut seen = std::collections::HashSet::new();
            let mut hits = Vec::new();
            for m in compiled.matcher.find_iter(&lower) {
                if seen.insert(m.pattern().as_usize()) {
                    hits.push(m);
                }
            }
            if hits.len() < compiled.entry.min_hits {
                continue;
            }

            score += compiled.entry.weight as u16;
            let confidence = (0.5 + 0.15 * hits.len() as f32).min(1.0);
            for m in hits {
                signals.push(RiskSignal {
                    signal_type: compiled.entry.signal,
                    indicator: lower[m.start()..m.end()].to_string(),
                    confidence,
                    context: snippet(&lower, m.start(), m.end()),
                });
            }
        }

        let score = score.min(100) as u8;
        let level = self.level_for(score);
        let urgency = self.urgency_for(level, &signals);
        let recommended_action = recommended_action(level, urgency);
        let needs_human_review = level >= RiskLevel::High || urgency >= Urgency::Urgent;

        RiskAnalysisResult {
            level,
            score,
            signals,
            urgency,
            recommended_action,
            needs_human_review,
        }
    }

    fn level_for(&self, score: u8) -> RiskLevel {
        let t = &self.thresholds;
        if score >= t.critical {
            RiskLevel::Critical
        } else if score >= t.high {
            RiskLevel::High
        } else if score >= t.medium {
            RiskLevel::Medium
        } else if score >= t.low {
            RiskLevel::Low
        } else {
            RiskLevel::None
        }
    }

    fn urgency_for(&self, level: RiskLevel, signals: &[RiskSignal]) -> Urgency {
        let has = |wanted: RiskSignalType| signals.iter().any(|s| s.signal_type == wanted);

        // Ideation and psychosis short-circuit the score entirely.
        if has(RiskSignalType::SuicideIdeation) || has(RiskSignalType::PostpartumPsychosis) {
            return Urgency::Emergency;
        }

        let from_level = match level {
            RiskLevel::Critical => Urgency::Emergency,
            RiskLevel::High => Urgency::Urgent,
            RiskLevel::Medium => Urgency::Elevated,
            RiskLevel::Low | RiskLevel::None => Urgency::Routine,
        };

        if has(RiskSignalType::SelfHarm) || has(RiskSignalType::AbuseReport) {
            return from_level.max(Urgency::Urgent);
        }
        from_level
    }

    /// Fixed emergency-resource block for the conversation layer.
    pub fn compose_safety_response(&self, result: &RiskAnalysisResult) -> SafetyResponse {
        let message = match result.urgency {
            Urgency::Emergency => EMERGENCY_RESOURCES.to_string(),
            Urgency::Urgent => SUPPORT_RESOURCES.to_string(),
            _ => String::new(),
        };
        SafetyResponse {
            message,
            blocks_interaction: result.urgency == Urgency::Emergency,
        }
    }

    /// Longitudinal analysis: recency-weighted cumulative score plus a
    /// three-point trend over the most recent scores.
    pub fn analyze_history(&self, messages: &[String]) -> HistoryRiskResult {
        let scores: Vec<u8> = messages.iter().map(|m| self.analyze(m).score).collect();

        if scores.is_empty() {
            return HistoryRiskResult {
                cumulative_score: 0,
                trend: RiskTrend::Stable,
                per_message_scores: scores,
            };
        }

        // Linear recency weights: the latest message counts n times more
        // than the first.
        let weighted: f64 = scores
            .iter()
            .enumerate()
            .map(|(i, s)| (i + 1) as f64 * *s as f64)
            .sum();
        let weight_sum: f64 = (1..=scores.len()).map(|w| w as f64).sum();
        let cumulative_score = (weighted / weight_sum).round().min(100.0) as u8;

        let trend = if scores.len() >= 3 {
            let latest = scores[scores.len() - 1] as f64;
            let prior_mean =
                (scores[scores.len() - 2] as f64 + scores[scores.len() - 3] as f64) / 2.0;
            if latest > prior_mean + 5.0 {
                RiskTrend::Worsening
            } else if latest < prior_mean - 5.0 {
                RiskTrend::Improving
            } else {
                RiskTrend::Stable
            }
        } else {
            RiskTrend::Stable
        };

        HistoryRiskResult {
            cumulative_score,
            trend,
            per_message_scores: scores,
        }
    }
}

impl Default for RiskDetector {
    fn default() -> Self {
        Self::new(RiskThresholds::default())
    }
}

fn recommended_action(level: RiskLevel, urgency: Urgency) -> RecommendedAction {
    if urgency == Urgency::Emergency {
        RecommendedAction::EmergencyContact
    } else if urgency == Urgency::Urgent {
        RecommendedAction::EscalateToModerator
    } else if level >= RiskLevel::High {
        RecommendedAction::FlagForReview
    } else if level >= RiskLevel::Medium {
        RecommendedAction::Monitor
    } else {
        RecommendedAction::None
    }
}

/// Context window around a match, clamped to char boundaries.
fn snippet(text: &str, start: usize, end: usize) -> String {
    const WINDOW: usize = 30;
    let mut from = start.saturating_sub(WINDOW);
    while from > 0 && !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + WINDOW).min(text.len());
    while to < text.len() && !text.is_char_boundary(to) {
        to += 1;
    }
    text[from..to].to_string()
}

const EMERGENCY_RESOURCES: &str = "\
Sentimos muito que você esteja passando por isso. Você não está sozinha.\n\
\n\
Procure ajuda agora:\n\
• CVV – 188 (ligação gratuita, 24h) ou chat em cvv.org.br\n\
• SAMU – 192\n\
• Emergência – 190\n\
\n\
Se puder, chame alguém de confiança para ficar com você neste momento.";

const SUPPORT_RESOURCES: &str = "\
O que você está sentindo merece atenção e cuidado.\n\
\n\
• CVV – 188 (ligação gratuita, 24h) ou chat em cvv.org.br\n\
• Central de Atendimento à Mulher – 180\n\
\n\
Uma pessoa da nossa equipe de acolhimento vai acompanhar sua conversa.";
