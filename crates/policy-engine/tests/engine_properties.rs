use std::sync::Arc;
use std::time::Duration;

use policy_engine::{
    loader, score, Context, CounterStore, DecisionEngine, Effect, EngineConfig, FailurePolicy,
    Indicator, InMemoryRuleStore, ManualClock, PolicySet, RiskLevel, RuleHitCounters, RuleStore,
    Severity, TraceNote,
};
use policy_engine::rate_limit::{RateLimitCounter, StoreError};
use policy_engine::telemetry::RuleFinding;
use serde_json::json;

fn policy(yaml: &str) -> PolicySet {
    loader::load_policy_from_str(yaml).expect("test policy should load")
}

fn ctx(value: serde_json::Value) -> Context {
    Context::from_json(value).expect("test context should be an object")
}

fn engine_with_clock(clock: Arc<ManualClock>) -> DecisionEngine {
    DecisionEngine::builder(EngineConfig::default())
        .clock(clock)
        .build()
}

#[test]
fn explicit_deny_beats_earlier_allow() {
    let p = policy(
        r#"
version: "1"
default_effect: challenge
rules:
  - { id: B, priority: 1, effect: allow }
  - { id: A, priority: 5, effect: deny }
"#,
    );
    let d = DecisionEngine::default().evaluate(&p, &Context::default());
    assert_eq!(d.effect, Effect::Deny);
    assert_eq!(d.matched_rule_id.as_deref(), Some("A"));
}

#[test]
fn first_match_wins_among_allows() {
    let p = policy(
        r#"
version: "1"
default_effect: deny
rules:
  - { id: late, priority: 9, effect: allow }
  - { id: early, priority: 2, effect: allow }
"#,
    );
    let d = DecisionEngine::default().evaluate(&p, &Context::default());
    assert_eq!(d.matched_rule_id.as_deref(), Some("early"));
}

#[test]
fn equal_priorities_keep_insertion_order() {
    let p = policy(
        r#"
version: "1"
default_effect: deny
rules:
  - { id: first, priority: 3, effect: challenge }
  - { id: second, priority: 3, effect: allow }
"#,
    );
    let d = DecisionEngine::default().evaluate(&p, &Context::default());
    assert_eq!(d.matched_rule_id.as_deref(), Some("first"));
    assert_eq!(d.effect, Effect::Challenge);
}

#[test]
fn empty_conditions_always_match() {
    let p = policy(
        r#"
version: "1"
default_effect: deny
rules:
  - { id: catch-all, effect: allow }
"#,
    );
    let engine = DecisionEngine::default();
    for c in [json!({}), json!({"x": 1}), json!({"request": {"ip": "::1"}})] {
        assert_eq!(engine.evaluate(&p, &ctx(c)).effect, Effect::Allow);
    }
}

#[test]
fn url_encoded_admin_scenario() {
    let p = policy(
        r#"
version: "1"
default_effect: allow
rules:
  - id: admin-probe
    priority: 1
    effect: deny
    conditions:
      - field: request.uri
        operator: contains
        value: admin
        transforms: [url_decode, lowercase]
"#,
    );
    let flat = Context::builder().insert("request.uri", "/ADM%49N").build();
    let d = DecisionEngine::default().evaluate(&p, &flat);
    assert_eq!(d.effect, Effect::Deny);
    assert_eq!(d.matched_rule_id.as_deref(), Some("admin-probe"));
    assert!(d.trace.is_empty());
}

#[test]
fn malformed_encodings_compare_against_original() {
    let p = policy(
        r#"
version: "1"
default_effect: allow
rules:
  - id: b64
    effect: deny
    conditions:
      - { field: token, operator: equals, value: "!!notbase64", transforms: [base64_decode] }
  - id: url
    effect: challenge
    conditions:
      - { field: path, operator: ends_with, value: "%G1", transforms: [url_decode] }
"#,
    );
    let engine = DecisionEngine::default();

    let d = engine.evaluate(&p, &ctx(json!({"token": "!!notbase64"})));
    assert_eq!(d.effect, Effect::Deny);
    assert!(matches!(d.trace.as_slice(), [TraceNote::DecodeFailure { .. }]));

    let d = engine.evaluate(&p, &ctx(json!({"token": "x", "path": "/a%G1"})));
    assert_eq!(d.effect, Effect::Challenge);
}

#[test]
fn rate_limit_three_per_minute() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine_with_clock(clock.clone());
    let p = policy(
        r#"
version: "1"
default_effect: deny
rules:
  - id: api-quota
    effect: allow
    rate_limit: { limit: 3, windowSeconds: 60, aggregateKey: request.ip }
"#,
    );
    let c = ctx(json!({"request": {"ip": "198.51.100.4"}}));

    for _ in 0..3 {
        assert_eq!(engine.evaluate(&p, &c).effect, Effect::Allow);
    }
    let fourth = engine.evaluate(&p, &c);
    assert_eq!(fourth.effect, Effect::Deny);
    assert!(fourth.is_default());
    assert!(matches!(
        fourth.trace.as_slice(),
        [TraceNote::RateLimited { count: 4, limit: 3, .. }]
    ));

    clock.advance(Duration::from_secs(61));
    assert_eq!(engine.evaluate(&p, &c).effect, Effect::Allow);
}

#[test]
fn deny_above_threshold_with_exceeded_trigger() {
    let clock = Arc::new(ManualClock::new(0));
    let engine = engine_with_clock(clock);
    let p = policy(
        r#"
version: "1"
default_effect: allow
rules:
  - id: login-flood
    effect: deny
    conditions:
      - { field: request.path, operator: equals, value: /login }
    rate_limit: { limit: 2, window_seconds: 30, aggregate_key: request.ip, trigger: exceeded }
"#,
    );
    let c = ctx(json!({"request": {"path": "/login", "ip": "203.0.113.1"}}));
    let effects: Vec<Effect> = (0..4).map(|_| engine.evaluate(&p, &c).effect).collect();
    assert_eq!(effects, vec![Effect::Allow, Effect::Allow, Effect::Deny, Effect::Deny]);
}

struct DownStore;

impl CounterStore for DownStore {
    fn hit(&self, _: &str, _: &str, _: u64, _: u64) -> Result<RateLimitCounter, StoreError> {
        Err(StoreError::Unavailable("redis timeout".into()))
    }

    fn purge_expired(&self, _: u64) -> usize {
        0
    }
}

#[test]
fn store_outage_follows_failure_policy() {
    let p = policy(
        r#"
version: "1"
default_effect: deny
rules:
  - id: quota
    effect: allow
    rate_limit: { limit: 1, window_seconds: 60, aggregate_key: ip }
"#,
    );
    let c = ctx(json!({"ip": "1.2.3.4"}));

    let counters = Arc::new(RuleHitCounters::new());
    let open = DecisionEngine::builder(EngineConfig::default())
        .counter_store(Arc::new(DownStore))
        .telemetry(counters.clone())
        .build();
    let d = open.evaluate(&p, &c);
    assert_eq!(d.effect, Effect::Allow);
    assert!(matches!(
        d.trace.as_slice(),
        [TraceNote::RateLimitStoreUnavailable { treated_as_within: true, .. }]
    ));
    assert_eq!(counters.store_unavailable(), 1);

    let closed = DecisionEngine::builder(EngineConfig {
        failure_policy: FailurePolicy::FailClosed,
        ..EngineConfig::default()
    })
    .counter_store(Arc::new(DownStore))
    .build();
    assert_eq!(closed.evaluate(&p, &c).effect, Effect::Deny);
}

#[test]
fn ip_and_geo_rules() {
    let p = policy(
        r#"
version: "1"
default_effect: allow
rules:
  - id: embargo
    priority: 1
    effect: deny
    conditions:
      - { field: geo.country, operator: in_geo_set, value: [KP, IR] }
  - id: corp-net
    priority: 2
    effect: allow
    conditions:
      - { field: request.ip, operator: ip_in_set, value: ["10.0.0.0/8", "172.16.0.0/12"] }
  - id: everyone-else
    priority: 3
    effect: challenge
"#,
    );
    let engine = DecisionEngine::default();
    let effect = |v| engine.evaluate(&p, &ctx(v)).effect;

    assert_eq!(effect(json!({"geo": {"country": "ir"}, "request": {"ip": "10.1.1.1"}})), Effect::Deny);
    assert_eq!(effect(json!({"geo": {"country": "US"}, "request": {"ip": "172.20.0.9"}})), Effect::Allow);
    assert_eq!(effect(json!({"geo": {"country": "US"}, "request": {"ip": "8.8.8.8"}})), Effect::Challenge);
}

#[test]
fn repeated_evaluation_is_deterministic() {
    let p = policy(
        r#"
version: "1"
default_effect: allow
rules:
  - id: risky
    effect: log
    conditions: [{ field: user.mfa, operator: not_exists }]
    indicators: [{ type: NO_MFA, weight: 0.5, severity: medium }]
  - id: admins
    effect: challenge
    conditions: [{ field: user.role, operator: equals, value: admin, negate: true }]
"#,
    );
    let engine = DecisionEngine::default();
    let contexts: Vec<Context> = (0..50)
        .map(|i| ctx(json!({"user": {"role": if i % 2 == 0 { "admin" } else { "dev" }}})))
        .collect();
    let first = engine.evaluate_batch(&p, &contexts);
    let second = engine.evaluate_batch(&p, &contexts);
    assert_eq!(first, second);
    assert_eq!(first[0].effect, Effect::Allow);
    assert_eq!(first[1].effect, Effect::Challenge);
    assert_eq!(first[1].risk.score, 25);
}

#[test]
fn standalone_score_example() {
    let s = score(&[
        Indicator::new("WILDCARD_PERMISSION", 0.8, Severity::High),
        Indicator::new("NO_MFA", 0.5, Severity::Medium),
    ]);
    assert_eq!(s.score, 85);
    assert_eq!(s.level, RiskLevel::Critical);
}

#[test]
fn snapshot_pins_version_across_publish() {
    let store = InMemoryRuleStore::new();
    store.publish(
        "edge",
        policy("version: \"1\"\ndefault_effect: allow\n"),
    );
    let snapshot = store.fetch_policy_set("edge").unwrap();
    store.publish(
        "edge",
        policy("version: \"2\"\ndefault_effect: deny\n"),
    );

    let engine = DecisionEngine::default();
    let batch = vec![Context::default(); 5];
    let decisions = engine.evaluate_batch(&snapshot.policy, &batch);
    assert!(decisions.iter().all(|d| d.policy_version == "1" && d.effect == Effect::Allow));
}

#[test]
fn hit_counters_feed_optimization_report() {
    let p = policy(
        r#"
version: "9"
default_effect: allow
rules:
  - { id: noisy, priority: 1, effect: log }
  - id: dead
    priority: 2
    effect: deny
    conditions: [{ field: never.present, operator: exists }]
  - id: sometimes
    priority: 3
    effect: count
    conditions: [{ field: n, operator: greater_than, value: 5 }]
  - { id: off, effect: deny, enabled: false }
"#,
    );
    let counters = Arc::new(RuleHitCounters::new());
    let engine = DecisionEngine::builder(EngineConfig::default())
        .telemetry(counters.clone())
        .build();
    for n in 0..10 {
        engine.evaluate(&p, &ctx(json!({"n": n})));
    }

    let report = counters.report(&p, 5);
    assert_eq!(report.policy_version, "9");
    assert_eq!(report.rules.len(), 3, "disabled rules are not reported");
    assert_eq!(report.entry("noisy").unwrap().finding, RuleFinding::AlwaysMatched);
    assert_eq!(report.entry("dead").unwrap().finding, RuleFinding::NeverMatched);
    let sometimes = report.entry("sometimes").unwrap();
    assert_eq!(sometimes.finding, RuleFinding::Active);
    assert_eq!(sometimes.stats.matched, 4);
    assert!(report.entry("off").is_none());
}
