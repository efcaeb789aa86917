use std::sync::Arc;

use flowsieve::config::EngineSettings;
use flowsieve::engine::heuristic;
use flowsieve::events::{Category, ConnectionRecord, DecisionSource, Rule, RuleKind, TrafficLabel};
use flowsieve::rules::{MemoryRuleStore, RuleMatcher};
use flowsieve::synth::SyntheticDataGenerator;
use flowsieve::ClassificationEngine;

fn heuristic_only() -> ClassificationEngine {
    ClassificationEngine::with_model(EngineSettings::default(), None, Arc::new(MemoryRuleStore::default()))
}

#[test]
fn private_video_flow_scores_zero() {
    let conn = ConnectionRecord::new("172.16.0.5", "172.16.0.9", "视频流量", "");
    let s = heuristic::score(&conn);
    assert_eq!((s.base, s.content, s.addresses, s.total()), (10, 0, -10, 0));

    let c = heuristic_only().predict(&conn);
    assert_eq!(c.source, DecisionSource::Heuristic);
    assert_eq!(c.display_label(), "白流量");
}

#[test]
fn inbound_wordpress_scan_scores_61() {
    let conn = ConnectionRecord::new("45.33.32.156", "10.0.0.8", "恶意流量", "/wp-content/a/b/c/d");
    let c = heuristic_only().predict(&conn);
    assert_eq!(c.risk_score, Some(61));
    assert_eq!(c.display_label(), "恶意流量");
}

#[test]
fn cidr_rule_matches_inside_block_only() {
    let rule = Rule::new(1, "lan", RuleKind::Ip, "10.0.0.0/8", 1);
    let m = RuleMatcher::new();
    assert!(m.matches(&rule, &ConnectionRecord::new("10.1.2.3", "8.8.8.8", "TCP", "")));
    assert!(!m.matches(&rule, &ConnectionRecord::new("11.1.2.3", "8.8.8.8", "TCP", "")));
}

#[test]
fn inactive_rules_are_ignored() {
    let mut rule = Rule::new(1, "lan", RuleKind::Ip, "10.0.0.0/8", 1);
    rule.active = false;
    let engine = ClassificationEngine::with_model(
        EngineSettings::default(),
        None,
        Arc::new(MemoryRuleStore::new(vec![rule])),
    );
    let c = engine.predict(&ConnectionRecord::new("10.1.2.3", "8.8.8.8", "TCP", "").for_tenant(1));
    assert_eq!(c.source, DecisionSource::Heuristic);
}

#[test]
fn malformed_pattern_does_not_block_later_patterns() {
    let rule = Rule::new(1, "mixed", RuleKind::Ip, "10.0.0.0/99, 192.168.1.7", 1);
    assert!(rule.validate().is_err());
    let engine = ClassificationEngine::with_model(
        EngineSettings::default(),
        None,
        Arc::new(MemoryRuleStore::new(vec![rule])),
    );
    let c = engine.predict(&ConnectionRecord::new("192.168.1.7", "8.8.8.8", "TCP", "").for_tenant(1));
    assert_eq!(c.category, Category::White);
    assert_eq!(c.matched_rule.as_deref(), Some("mixed"));
}

#[test]
fn generated_table_honours_split_and_rates() {
    for n in [1000usize, 1003, 17] {
        let rows = SyntheticDataGenerator::new(1).generate_dataset(n);
        let normal = n * 7 / 10;
        let per_attack = (n - normal) / 5;
        assert_eq!(rows.len(), normal + 5 * per_attack, "n = {n}");
        assert_eq!(rows.iter().filter(|r| r.label == TrafficLabel::Normal).count(), normal);
        for label in TrafficLabel::ATTACKS {
            assert_eq!(rows.iter().filter(|r| r.label == label).count(), per_attack);
        }
        for r in &rows {
            assert_eq!(r.packets_per_second, r.packet_count as f64 / r.duration.max(0.1));
            assert_eq!(r.bytes_per_packet, r.byte_count as f64 / r.packet_count.max(1) as f64);
            assert_eq!(r.bytes_per_second, r.byte_count as f64 / r.duration.max(0.1));
        }
    }
}
