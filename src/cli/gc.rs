//! `lakesweep run` command.

use crate::client::ControlPlaneClient;
use crate::config::LakesweepConfig;
use crate::context::RunContext;
use crate::gc::{GcMode, GcRunner, RunOutcome};
use crate::models::{GarbageCollectionRules, MarkId};
use crate::storage::{
    CommitStore, FilesystemManifestStore, InMemoryCommitStore, RemoverClients, build_remover,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Arguments of `lakesweep run`.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Repository snapshot (JSON) to walk.
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Phase(s) to run: mark, sweep or both.
    #[arg(long, default_value = "both", value_parser = parse_mode)]
    pub mode: GcMode,

    /// Mark id to produce or to sweep.
    #[arg(long)]
    pub mark_id: Option<String>,

    /// Retention rules file (control-plane JSON format).
    #[arg(long, conflicts_with = "fetch_rules")]
    pub rules: Option<PathBuf>,

    /// Fetch retention rules from the control plane.
    #[arg(long)]
    pub fetch_rules: bool,

    /// Storage namespace override, e.g. `local:///data/lake`.
    #[arg(long)]
    pub namespace: Option<String>,

    /// Evaluation time (RFC 3339); defaults to now.
    #[arg(long, value_parser = parse_now)]
    pub now: Option<DateTime<Utc>>,
}

fn parse_mode(value: &str) -> std::result::Result<GcMode, String> {
    value.parse().map_err(|e: Error| e.to_string())
}

fn parse_now(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{value}': {e}"))
}

/// Runs one collection and returns its outcome.
///
/// `clients` supplies the S3 and Azure adapters; the binary builds them from
/// the `[s3]` and `[azure]` settings.
///
/// # Errors
///
/// Returns any error of loading the snapshot or rules, or of the run itself.
pub fn execute(
    config: &LakesweepConfig,
    ctx: &RunContext,
    args: &RunArgs,
    clients: &RemoverClients,
) -> Result<RunOutcome> {
    let mut store = InMemoryCommitStore::load(&args.snapshot)?;
    if let Some(namespace) = &args.namespace {
        let mut snapshot = store.to_snapshot();
        snapshot.storage_namespace.clone_from(namespace);
        store = InMemoryCommitStore::from_snapshot(snapshot);
    }
    let commits: Arc<dyn CommitStore> = Arc::new(store);

    let rules = load_rules(config, ctx, args, commits.repository())?;
    let manifests = Arc::new(FilesystemManifestStore::new(&config.gc.manifest_dir));

    let mut runner = GcRunner::new(Arc::clone(&commits), manifests)
        .with_mark_concurrency(config.gc.mark_concurrency)
        .with_sweep_concurrency(config.gc.sweep_concurrency)
        .with_batch_size(config.gc.batch_size);
    if args.mode.sweeps() {
        runner = runner.with_remover(build_remover(commits.storage_namespace(), clients)?);
    }

    let outcome = runner.run(
        ctx,
        args.mode,
        args.mark_id.clone().map(MarkId::new),
        &rules,
        args.now.unwrap_or_else(Utc::now),
    )?;
    if let Some(report) = outcome.report.as_ref().filter(|r| !r.is_converged()) {
        warn!(
            mark_id = %report.mark_id,
            failed = report.hard_failure_count(),
            cancelled = report.cancelled,
            "Sweep left objects behind; re-run sweep with the same mark id"
        );
    }
    Ok(outcome)
}

/// Resolves the rule set. Sweep-only runs never read rules.
fn load_rules(
    config: &LakesweepConfig,
    ctx: &RunContext,
    args: &RunArgs,
    repository: &str,
) -> Result<GarbageCollectionRules> {
    if let Some(path) = &args.rules {
        let json = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_rules".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        return GarbageCollectionRules::from_json(&json);
    }
    if args.fetch_rules {
        return ControlPlaneClient::from_config(&config.control_plane)?.get_gc_rules(ctx, repository);
    }
    if args.mode.marks() {
        return Err(Error::InvalidInput(
            "marking needs retention rules (--rules FILE or --fetch-rules)".to_string(),
        ));
    }
    Ok(GarbageCollectionRules::with_default(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_now() {
        let now = parse_now("2024-06-01T12:00:00+02:00").expect("timestamp");
        assert_eq!(now.to_rfc3339(), "2024-06-01T10:00:00+00:00");
        assert!(parse_now("yesterday").is_err());
    }

    #[test]
    fn test_marking_without_rules_is_rejected() {
        let args = RunArgs {
            snapshot: PathBuf::from("unused.json"),
            mode: GcMode::Mark,
            mark_id: None,
            rules: None,
            fetch_rules: false,
            namespace: None,
            now: None,
        };
        let err = load_rules(&LakesweepConfig::default(), &RunContext::new(), &args, "repo")
            .expect_err("rules required");
        assert!(matches!(err, Error::InvalidInput(_)));

        let sweep = RunArgs {
            mode: GcMode::Sweep,
            ..args
        };
        assert!(load_rules(&LakesweepConfig::default(), &RunContext::new(), &sweep, "repo").is_ok());
    }
}
