//! # policy-engine
//!
//! Evaluates structured event contexts (HTTP requests, access attempts, API
//! calls) against versioned rule sets and returns a [`Decision`]: an effect,
//! the rule that produced it, and a cumulative risk score.
//!
//! Policies are YAML or JSON documents. They are validated and compiled once
//! (regexes, CIDR lists, country sets) and then shared immutably; the only
//! mutable state at evaluation time is the rate-limit counter table.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use policy_engine::{loader, Context, DecisionEngine, EngineConfig};
//!
//! let policy = loader::load_policy("policies/edge.yaml").unwrap();
//! let engine = DecisionEngine::new(EngineConfig::default());
//! let ctx = Context::builder()
//!     .insert("request.uri", "/ADM%49N")
//!     .insert("request.ip", "203.0.113.9")
//!     .build();
//! let decision = engine.evaluate(&policy, &ctx);
//! println!("{} ({})", decision.effect, decision.reason);
//! ```

mod audit;
mod clock;
mod condition;
mod context;
mod decision;
mod error;
mod evaluator;
mod field;
pub mod loader;
mod matcher;
mod policy;
pub mod rate_limit;
mod resolver;
pub mod risk;
mod schema;
pub mod store;
pub mod telemetry;
mod trace;
pub mod transform;

pub use audit::{AuditRecord, DecisionAudit};
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::Condition;
pub use context::{Context, ContextBuilder};
pub use decision::{Annotation, Decision, Effect};
pub use error::{PolicyError, Result};
pub use evaluator::{DecisionEngine, EngineBuilder, EngineConfig, EngineStats};
pub use field::{resolve as resolve_field, Resolved};
pub use policy::{PolicySet, RateLimit, Rule};
pub use rate_limit::{CounterStore, FailurePolicy, RateLimiter, ShardedCounterStore};
pub use risk::{score, Indicator, RiskLevel, RiskScore, Severity};
pub use schema::{
    ConditionDef, Operator, PolicyDocument, RateLimitDef, RateLimitTrigger, RuleDef, Transform,
};
pub use store::{FileRuleStore, InMemoryRuleStore, PolicySnapshot, RuleStore};
pub use telemetry::{
    FanoutTelemetry, NoopTelemetry, RuleHitCounters, RuleReport, TelemetryEvent, TelemetrySink,
    TracingTelemetry,
};
pub use trace::{EvalLimits, TimeoutStage, TraceNote};
