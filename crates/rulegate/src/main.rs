mod audit_bridge;
mod cli;
mod config;

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use policy_engine::{
    loader, Context, Decision, DecisionEngine, FanoutTelemetry, FileRuleStore, Indicator,
    PolicySet, RuleHitCounters, RuleStore, TracingTelemetry,
};

use crate::audit_bridge::AuditBridge;
use crate::cli::{Cli, Command, EventArgs};
use crate::config::Config;

const COMPONENT: &str = "rulegate";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;

    if let Some(ref dir) = cli.policy_dir {
        cfg.policy.dir = dir.clone();
    }
    if let Some(ref scope) = cli.scope {
        cfg.policy.default_scope = scope.clone();
    }
    if let Some(ref level) = cli.log_level {
        cfg.logging.level = level.clone();
    }
    if let Some(ref path) = cli.audit_log {
        cfg.logging.audit_log_path = path.clone();
    }
    if cli.no_audit {
        cfg.logging.audit_enabled = false;
    }

    // 3. Init tracing-subscriber with JSON format. Stdout carries results.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Score { input } => score(&input),
        Command::Validate { files } => validate(&files),
        Command::Evaluate(args) => run_events(&cli.config, &cfg, &args, None).await,
        Command::Report {
            events,
            min_samples,
        } => run_events(&cli.config, &cfg, &events, Some(min_samples)).await,
    }
}

fn score(input: &Path) -> Result<()> {
    let text = read_input(input)?;
    let indicators: Vec<Indicator> =
        serde_json::from_str(&text).context("indicators must be a JSON array")?;
    let result = policy_engine::score(&indicators);
    info!(
        indicators = indicators.len(),
        score = result.score,
        level = %result.level,
        "indicators scored"
    );
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn validate(files: &[PathBuf]) -> Result<()> {
    let mut failed = 0usize;
    for path in files {
        match loader::load_policy(path) {
            Ok(policy) => println!(
                "ok\t{}\tversion={}\trules={}\tenabled={}",
                path.display(),
                policy.version(),
                policy.len(),
                policy.enabled_count()
            ),
            Err(err) => {
                failed += 1;
                println!("error\t{}\t{err}", path.display());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} policy file(s) failed validation", files.len());
    }
    Ok(())
}

/// Evaluate a JSON-lines event file. Prints decisions, or the rule report
/// when `report_min_samples` is set.
async fn run_events(
    config_file: &Path,
    cfg: &Config,
    args: &EventArgs,
    report_min_samples: Option<u64>,
) -> Result<()> {
    info!(
        config_file = %config_file.display(),
        policy_dir = %cfg.policy.dir.display(),
        scope = %cfg.policy.default_scope,
        "rulegate starting"
    );

    // 1. Start audit logger.
    let audit = if cfg.logging.audit_enabled {
        let (sink, handle) = AuditSink::start(&cfg.logging.audit_log_path)
            .await
            .context("failed to start audit logger")?;
        sink.log(AuditEntry::new(
            AuditEventType::EngineStarted,
            AuditSource::new(COMPONENT),
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": config_file.display().to_string(),
            }),
        ))
        .await;
        Some((sink, handle))
    } else {
        None
    };
    let sink = audit.as_ref().map(|(sink, _)| sink.clone());

    // 2. Load the policy snapshot.
    let policy = match load_snapshot(cfg, args) {
        Ok(policy) => policy,
        Err(err) => {
            let message = format!("{err:#}");
            error!(error = %message, "policy rejected");
            if let Some(sink) = &sink {
                sink.log(AuditEntry::new(
                    AuditEventType::PolicyRejected,
                    AuditSource::new(COMPONENT).with_scope(cfg.policy.default_scope.as_str()),
                    serde_json::json!({ "error": message }),
                ))
                .await;
            }
            drop(sink);
            shutdown_audit(audit).await;
            return Err(err);
        }
    };
    if let Some(sink) = &sink {
        let mut source = AuditSource::new(COMPONENT);
        if let Some(scope) = policy.scope() {
            source = source.with_scope(scope);
        }
        sink.log(AuditEntry::new(
            AuditEventType::PolicyLoaded,
            source,
            serde_json::json!({
                "version": policy.version(),
                "rules": policy.len(),
                "enabled": policy.enabled_count(),
            }),
        ))
        .await;
    }

    // 3. Build the engine.
    let counters = Arc::new(RuleHitCounters::new());
    let telemetry = FanoutTelemetry::new()
        .with(Arc::new(TracingTelemetry))
        .with(counters.clone());
    let mut builder = DecisionEngine::builder(cfg.engine.clone()).telemetry(Arc::new(telemetry));
    if let Some(sink) = &sink {
        builder = builder.audit(Arc::new(AuditBridge::new(sink.clone(), COMPONENT)));
    }
    let engine = Arc::new(builder.build());

    // 4. Evaluate off the async runtime.
    let contexts = read_contexts(&args.input)?;
    let decisions = {
        let engine = Arc::clone(&engine);
        let policy = Arc::clone(&policy);
        tokio::task::spawn_blocking(move || engine.evaluate_batch(&policy, &contexts))
            .await
            .context("evaluation task failed")?
    };

    let stats = engine.stats();
    info!(
        evaluations = stats.evaluations,
        timeouts = stats.timeouts,
        ?engine,
        "batch evaluated"
    );

    // 5. Emit results on stdout.
    match report_min_samples {
        Some(min_samples) => {
            let report = counters.report(&policy, min_samples);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        None => print_decisions(&decisions)?,
    }

    // 6. Shut down: the engine holds a sink clone through the audit bridge.
    drop(engine);
    if let Some(sink) = &sink {
        sink.log(AuditEntry::new(
            AuditEventType::EngineStopped,
            AuditSource::new(COMPONENT),
            serde_json::json!({
                "evaluations": stats.evaluations,
                "dropped_audit_entries": sink.dropped(),
            }),
        ))
        .await;
    }
    drop(sink);
    shutdown_audit(audit).await;
    Ok(())
}

fn load_snapshot(cfg: &Config, args: &EventArgs) -> Result<Arc<PolicySet>> {
    if let Some(ref path) = args.policy {
        let policy = loader::load_policy(path)
            .with_context(|| format!("failed to load policy file {}", path.display()))?;
        return Ok(Arc::new(policy));
    }
    let store = FileRuleStore::new(&cfg.policy.dir);
    let snapshot = store
        .fetch_policy_set(&cfg.policy.default_scope)
        .with_context(|| {
            let available = store
                .scopes()
                .map(|scopes| scopes.join(", "))
                .unwrap_or_default();
            format!(
                "failed to load scope '{}' from {} (available: [{}])",
                cfg.policy.default_scope,
                cfg.policy.dir.display(),
                available
            )
        })?;
    Ok(snapshot.policy)
}

async fn shutdown_audit(audit: Option<(AuditSink, JoinHandle<u64>)>) {
    if let Some((sink, handle)) = audit {
        let dropped = sink.dropped();
        drop(sink);
        match handle.await {
            Ok(written) => info!(written, dropped, "audit log closed"),
            Err(err) => error!(%err, "audit writer task failed"),
        }
    }
}

fn read_input(path: &Path) -> Result<String> {
    let mut text = String::new();
    if path == Path::new("-") {
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
    } else {
        text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
    }
    Ok(text)
}

/// One JSON object per line; blank lines are ignored and bad lines skipped
/// with a warning.
fn read_contexts(path: &Path) -> Result<Vec<Context>> {
    let reader: Box<dyn BufRead> = if path == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open event file {}", path.display()))?;
        Box::new(BufReader::new(file))
    };
    parse_contexts(reader)
}

fn parse_contexts(reader: impl BufRead) -> Result<Vec<Context>> {
    let mut contexts = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("failed to read event line")?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<serde_json::Value>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|v| Context::from_json(v).map_err(anyhow::Error::from));
        match parsed {
            Ok(ctx) => contexts.push(ctx),
            Err(err) => warn!(line = idx + 1, %err, "skipping malformed event"),
        }
    }
    Ok(contexts)
}

fn print_decisions(decisions: &[Decision]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for decision in decisions {
        serde_json::to_writer(&mut out, decision)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_contexts_skips_bad_lines() {
        let input = "{\"a\": 1}\n\nnot json\n[1, 2]\n{\"request\": {\"ip\": \"10.0.0.1\"}}\n";
        let contexts = parse_contexts(Cursor::new(input)).unwrap();
        assert_eq!(contexts.len(), 2);
        assert!(!contexts[1].get("request.ip").is_missing());
    }

    #[test]
    fn load_snapshot_prefers_explicit_policy_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("adhoc.yaml");
        std::fs::write(&file, "version: \"adhoc\"\ndefault_effect: deny\n").unwrap();
        std::fs::write(
            dir.path().join("default.yaml"),
            "version: \"dir\"\ndefault_effect: allow\n",
        )
        .unwrap();

        let mut cfg = Config::default();
        cfg.policy.dir = dir.path().to_path_buf();

        let from_dir = load_snapshot(
            &cfg,
            &EventArgs {
                input: PathBuf::from("-"),
                policy: None,
            },
        )
        .unwrap();
        assert_eq!(from_dir.version(), "dir");

        let explicit = load_snapshot(
            &cfg,
            &EventArgs {
                input: PathBuf::from("-"),
                policy: Some(file),
            },
        )
        .unwrap();
        assert_eq!(explicit.version(), "adhoc");
    }

    #[test]
    fn missing_scope_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.policy.dir = dir.path().to_path_buf();
        cfg.policy.default_scope = "edge".into();
        for scope in ["default", "admin-api"] {
            std::fs::write(
                dir.path().join(format!("{scope}.yaml")),
                "version: \"1\"\ndefault_effect: allow\n",
            )
            .unwrap();
        }
        let err = load_snapshot(
            &cfg,
            &EventArgs {
                input: PathBuf::from("-"),
                policy: None,
            },
        )
        .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("scope 'edge'"), "{message}");
        assert!(message.contains("available: [admin-api, default]"), "{message}");
    }

    #[test]
    fn validate_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.yaml");
        let bad = dir.path().join("bad.yaml");
        std::fs::write(&good, "version: \"1\"\ndefault_effect: allow\n").unwrap();
        std::fs::write(&bad, "version: \"1\"\ndefault_effect: maybe\n").unwrap();

        assert!(validate(&[good.clone()]).is_ok());
        let err = validate(&[good, bad]).unwrap_err();
        assert!(err.to_string().contains("1 of 2"), "{err}");
    }
}
