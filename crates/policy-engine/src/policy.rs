use std::time::Duration;

use crate::condition::Condition;
use crate::decision::Effect;
use crate::error::Result;
use crate::loader;
use crate::risk::Indicator;
use crate::schema::{PolicyDocument, RateLimitTrigger, RuleDef};

/// Rate-limit clause of a compiled rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub window: Duration,
    /// Context path whose resolved value buckets the counter.
    pub aggregate_key: String,
    pub trigger: RateLimitTrigger,
}

/// A validated rule with its conditions compiled.
#[derive(Debug)]
pub struct Rule {
    id: String,
    description: Option<String>,
    priority: i32,
    position: usize,
    effect: Effect,
    conditions: Vec<Condition>,
    rate_limit: Option<RateLimit>,
    enabled: bool,
    indicators: Vec<Indicator>,
}

impl Rule {
    fn compile(def: &RuleDef, position: usize) -> Result<Self> {
        let conditions = def
            .conditions
            .iter()
            .map(|c| Condition::compile(c, &def.id))
            .collect::<Result<Vec<_>>>()?;
        let rate_limit = def.rate_limit.as_ref().map(|rl| RateLimit {
            limit: rl.limit,
            window: Duration::from_secs(rl.window_seconds),
            aggregate_key: rl.aggregate_key.trim().to_string(),
            trigger: rl.trigger,
        });
        Ok(Self {
            id: def.id.clone(),
            description: def.description.clone().filter(|d| !d.trim().is_empty()),
            priority: def.priority,
            position,
            effect: def.effect,
            conditions,
            rate_limit,
            enabled: def.enabled,
            indicators: def.indicators.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Index of the rule in the source document.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn rate_limit(&self) -> Option<&RateLimit> {
        self.rate_limit.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn indicators(&self) -> &[Indicator] {
        &self.indicators
    }
}

/// An immutable, compiled rule set.
///
/// Callers share a `PolicySet` behind an `Arc` for the lifetime of an
/// evaluation batch; nothing in it changes after [`PolicySet::compile`].
#[derive(Debug)]
pub struct PolicySet {
    version: String,
    scope: Option<String>,
    default_effect: Effect,
    rules: Vec<Rule>,
    /// Indices of enabled rules, by priority then document position.
    order: Vec<usize>,
}

impl PolicySet {
    /// Validate `doc` and compile every rule.
    pub fn compile(doc: &PolicyDocument) -> Result<Self> {
        loader::validate(doc)?;

        let rules = doc
            .rules
            .iter()
            .enumerate()
            .map(|(position, def)| Rule::compile(def, position))
            .collect::<Result<Vec<_>>>()?;

        let mut order: Vec<usize> = rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enabled)
            .map(|(idx, _)| idx)
            .collect();
        // Stable: equal priorities keep document order.
        order.sort_by_key(|&idx| rules[idx].priority);

        Ok(Self {
            version: doc.version.clone(),
            scope: doc.scope.clone(),
            default_effect: doc.default_effect,
            rules,
            order,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn default_effect(&self) -> Effect {
        self.default_effect
    }

    /// Every rule, enabled or not, in document order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Enabled rules in the order the resolver visits them.
    pub fn evaluation_order(&self) -> impl Iterator<Item = &Rule> + '_ {
        self.order.iter().map(move |&idx| &self.rules[idx])
    }

    pub fn enabled_count(&self) -> usize {
        self.order.len()
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
