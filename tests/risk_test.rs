//! Integration tests for crisis risk detection.

use materna_guard::risk::{
    RecommendedAction, RiskDetector, RiskLevel, RiskSignalType, RiskThresholds, RiskTrend,
    Urgency,
};

#[test]
fn test_suicide_ideation_scenario() {
    let detector = RiskDetector::default();
    let result = detector.analyze("não aguento mais, quero desaparecer");

    assert!(result
        .signals
        .iter()
        .any(|s| s.signal_type == RiskSignalType::SuicideIdeation));
    assert_eq!(result.urgency, Urgency::Emergency);
    assert_eq!(result.recommended_action, RecommendedAction::EmergencyContact);
    assert!(result.needs_human_review);
}

#[test]
fn test_score_monotonic_under_added_keywords() {
    let detector = RiskDetector::default();
    let phrases = [
        "estou cansada",
        "estou cansada e me sinto vazia",
        "estou cansada, me sinto vazia e sem esperança",
        "estou cansada, me sinto vazia, sem esperança e quero desaparecer",
        "estou cansada, me sinto vazia, sem esperança, quero desaparecer e penso em me cortar",
    ];
    let mut previous = 0u8;
    for phrase in phrases {
        let score = detector.analyze(phrase).score;
        assert!(
            score >= previous,
            "adding keywords must never lower the score ({phrase:?}: {score} < {previous})"
        );
        previous = score;
    }
}

#[test]
fn test_critical_whenever_score_at_least_eighty() {
    let detector = RiskDetector::default();
    let result = detector
        .analyze("quero desaparecer, ouço vozes, ele me bate e penso em me cortar");
    assert!(result.score >= 80);
    assert_eq!(result.level, RiskLevel::Critical);
}

#[test]
fn test_emergency_regardless_of_score() {
    let detector = RiskDetector::default();
    // A single ideation keyword: score stays mid-ladder, urgency does not.
    let result = detector.analyze("às vezes penso que seria melhor sem mim");
    assert!(result.score < 80);
    assert_eq!(result.urgency, Urgency::Emergency);
}

#[test]
fn test_needs_review_invariant() {
    let detector = RiskDetector::default();
    for text in [
        "hoje foi tranquilo",
        "coração disparado e falta de ar",
        "ele me ameaça todos os dias",
        "quero desaparecer e me cortar",
    ] {
        let result = detector.analyze(text);
        let expected =
            result.level >= RiskLevel::High || result.urgency >= Urgency::Urgent;
        assert_eq!(result.needs_human_review, expected, "invariant broken for {text:?}");
    }
}

#[test]
fn test_safety_response_blocks_only_emergency() {
    let detector = RiskDetector::default();

    let emergency = detector.analyze("quero desaparecer");
    let response = detector.compose_safety_response(&emergency);
    assert!(response.blocks_interaction);
    assert!(response.message.contains("CVV"));
    assert!(response.message.contains("188"));

    let routine = detector.analyze("o bebê dormiu a noite toda");
    let response = detector.compose_safety_response(&routine);
    assert!(!response.blocks_interaction);
    assert!(response.message.is_empty());
}

#[test]
fn test_history_weighs_recent_messages_more() {
    let detector = RiskDetector::default();

    let worsening = detector.analyze_history(&[
        "tudo bem por aqui".to_string(),
        "ando muito cansada".to_string(),
        "quero desaparecer".to_string(),
    ]);
    let improving = detector.analyze_history(&[
        "quero desaparecer".to_string(),
        "ando muito cansada".to_string(),
        "tudo bem por aqui".to_string(),
    ]);

    assert!(worsening.cumulative_score > improving.cumulative_score);
    assert_eq!(worsening.trend, RiskTrend::Worsening);
    assert_eq!(improving.trend, RiskTrend::Improving);
}

#[test]
fn test_custom_monotonic_thresholds() {
    let detector = RiskDetector::new(RiskThresholds {
        low: 10,
        medium: 25,
        high: 35,
        critical: 50,
    });
    // AbuseReport weighs 30: Medium under the custom ladder.
    let result = detector.analyze("ele me bateu ontem");
    assert_eq!(result.level, RiskLevel::Medium);
}
