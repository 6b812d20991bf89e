//! Rule stores hand out immutable policy-set snapshots by scope.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{PolicyError, Result};
use crate::loader;
use crate::policy::PolicySet;

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// A policy set pinned for the duration of a batch.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub policy: Arc<PolicySet>,
    pub version: String,
}

impl PolicySnapshot {
    pub fn new(policy: Arc<PolicySet>) -> Self {
        let version = policy.version().to_string();
        Self { policy, version }
    }
}

pub trait RuleStore: Send + Sync {
    fn fetch_policy_set(&self, scope: &str) -> Result<PolicySnapshot>;
}

/// Snapshots published in process, e.g. by an admin API or a test.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    sets: RwLock<HashMap<String, Arc<PolicySet>>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `policy` under `scope`, replacing any previous set.
    /// Snapshots already handed out keep the old version.
    pub fn publish(&self, scope: impl Into<String>, policy: PolicySet) -> PolicySnapshot {
        let policy = Arc::new(policy);
        let scope = scope.into();
        info!(scope = %scope, version = policy.version(), "policy set published");
        self.sets.write().insert(scope, Arc::clone(&policy));
        PolicySnapshot::new(policy)
    }

    pub fn remove(&self, scope: &str) -> bool {
        self.sets.write().remove(scope).is_some()
    }
}

impl RuleStore for InMemoryRuleStore {
    fn fetch_policy_set(&self, scope: &str) -> Result<PolicySnapshot> {
        self.sets
            .read()
            .get(scope)
            .cloned()
            .map(PolicySnapshot::new)
            .ok_or_else(|| PolicyError::ScopeNotFound(scope.to_string()))
    }
}

#[derive(Debug)]
struct CachedSet {
    path: PathBuf,
    modified: Option<SystemTime>,
    policy: Arc<PolicySet>,
}

/// Reads `<dir>/<scope>.yaml` (or `.yml`, `.json`), recompiling only when the
/// file's modification time changes.
#[derive(Debug)]
pub struct FileRuleStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, CachedSet>>,
}

impl FileRuleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scopes with a policy file in the directory, sorted.
    pub fn scopes(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| PolicyError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut scopes: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| EXTENSIONS.contains(&e))
            })
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .filter(|scope| valid_scope(scope))
            .collect();
        scopes.sort();
        scopes.dedup();
        Ok(scopes)
    }

    fn locate(&self, scope: &str) -> Result<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{scope}.{ext}")))
            .find(|path| path.is_file())
            .ok_or_else(|| PolicyError::ScopeNotFound(scope.to_string()))
    }
}

impl RuleStore for FileRuleStore {
    fn fetch_policy_set(&self, scope: &str) -> Result<PolicySnapshot> {
        if !valid_scope(scope) {
            return Err(PolicyError::InvalidScope(scope.to_string()));
        }
        let path = self.locate(scope)?;
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        if let Some(cached) = self.cache.read().get(scope) {
            if cached.path == path && modified.is_some() && cached.modified == modified {
                debug!(scope, version = cached.policy.version(), "policy cache hit");
                return Ok(PolicySnapshot::new(Arc::clone(&cached.policy)));
            }
        }

        let policy = Arc::new(loader::load_policy(&path)?);
        self.cache.write().insert(
            scope.to_string(),
            CachedSet {
                path,
                modified,
                policy: Arc::clone(&policy),
            },
        );
        Ok(PolicySnapshot::new(policy))
    }
}

/// Scope names become file names: ASCII alphanumerics, `-` and `_` only.
fn valid_scope(scope: &str) -> bool {
    !scope.is_empty()
        && scope
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
