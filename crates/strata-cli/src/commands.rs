use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use strata_recovery::{
    digest_bytes, AttemptOutcome, CheckpointScheduler, CheckpointService, NoState, StateRef,
    StateSource, StaticState, StrataConfig, StrataError, TemporalAnchor, Tier, TierAttempt,
};

use crate::cli::*;

const DEFAULT_CONFIG_FILE: &str = "strata.toml";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    if let Command::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let state = state_source(&cli)?;
    let service = CheckpointService::open(config, state)
        .context("failed to open checkpoint service")?;
    let format = cli.format;

    match cli.command {
        Command::Checkpoint(args) => cmd_checkpoint(&service, args, format),
        Command::Rollback(args) => cmd_rollback(&service, args, format),
        Command::Status => cmd_status(&service, format),
        Command::List(args) => cmd_list(&service, args, format),
        Command::Show(args) => cmd_show(&service, args, format),
        Command::Verify(args) => cmd_verify(&service, args, format),
        Command::Run(args) => cmd_run(service, args),
        Command::PurgeGhosts(args) => cmd_purge(&service, args, format),
        Command::Config => Ok(()),
    }
}

/// The file is re-read on every checkpoint so scheduled runs track it.
fn state_source(cli: &Cli) -> anyhow::Result<Arc<dyn StateSource>> {
    if let Some(reference) = &cli.state_ref {
        return Ok(Arc::new(StaticState::new(reference.clone())));
    }
    let Some(path) = cli.state_file.clone() else {
        return Ok(Arc::new(NoState));
    };
    if !path.is_file() {
        bail!("state file not found: {}", path.display());
    }
    Ok(Arc::new(move || match std::fs::read(&path) {
        Ok(bytes) => digest_bytes(&bytes),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "state file unreadable");
            StateRef::none()
        }
    }))
}

fn load_config(cli: &Cli) -> anyhow::Result<StrataConfig> {
    let mut config = match &cli.config {
        Some(path) => StrataConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            StrataConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => StrataConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_anchor(anchor: &TemporalAnchor) -> String {
    match chrono::DateTime::from_timestamp_millis(anchor.physical_ms as i64) {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => anchor.to_string(),
    }
}

fn format_optional(anchor: Option<TemporalAnchor>) -> String {
    anchor.as_ref().map(format_anchor).unwrap_or_else(|| "never".into())
}

fn describe_outcome(outcome: &AttemptOutcome) -> colored::ColoredString {
    match outcome {
        AttemptOutcome::Verified => "verified".green(),
        AttemptOutcome::NotFound => "not found".dimmed(),
        AttemptOutcome::NotNewer => "nothing newer".dimmed(),
        AttemptOutcome::Rejected { reason } => format!("rejected: {reason}").red(),
        AttemptOutcome::Unreadable { reason } => format!("unreadable: {reason}").yellow(),
    }
}

fn print_attempts(attempts: &[TierAttempt]) {
    for attempt in attempts {
        let id = attempt
            .snapshot
            .map(|id| id.short_hex())
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<8} {:<12} {}",
            attempt.tier.as_str(),
            id.dimmed(),
            describe_outcome(&attempt.outcome)
        );
    }
}

fn cmd_checkpoint(
    service: &CheckpointService,
    args: CheckpointArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let receipt = service.create_checkpoint(&args.description)?;
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "id": receipt.snapshot.id,
            "created_at": receipt.snapshot.created_at,
            "signature": receipt.snapshot.signature,
            "receipt": receipt,
        }));
    }

    println!("{} Checkpoint created", "✓".green().bold());
    println!("  Id:        {}", receipt.id().to_hex().yellow());
    println!("  Created:   {}", format_anchor(&receipt.snapshot.created_at));
    println!("  Signature: {}", receipt.snapshot.signature.to_hex().dimmed());
    println!(
        "  Replicas:  {}/{}",
        receipt.replication.success_count(),
        receipt.replication.requested
    );
    for evicted in &receipt.evicted {
        println!("  Evicted:   {}", evicted.short_hex().dimmed());
    }
    for failure in &receipt.tier_failures {
        println!("  {} {}: {}", "!".yellow().bold(), failure.tier, failure.reason);
    }
    Ok(())
}

fn cmd_rollback(
    service: &CheckpointService,
    args: RollbackArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let outcome = match service.rollback(args.id.as_deref()) {
        Ok(outcome) => outcome,
        Err(StrataError::RecoveryExhausted { target, attempts }) if format == OutputFormat::Text => {
            let target = target.map(|t| t.to_hex()).unwrap_or_else(|| "latest".into());
            println!("{} Recovery exhausted for {}", "✗".red().bold(), target.yellow());
            print_attempts(&attempts);
            bail!("no tier holds a verifiable copy");
        }
        Err(e) => return Err(e.into()),
    };

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "restored_id": outcome.restored_id(),
            "safety_snapshot_id": outcome.safety_snapshot_id(),
            "outcome": outcome,
        }));
    }

    println!("{} Rolled back", "✓".green().bold());
    println!("  Restored: {}  {}", outcome.restored_id().to_hex().yellow(), outcome.restored.description);
    println!("  Safety:   {}", outcome.safety_snapshot_id().to_hex().cyan());
    println!("  Source:   {}", outcome.source.as_str().bold());
    if !outcome.repaired.is_empty() {
        let repaired: Vec<&str> = outcome.repaired.iter().map(|t| t.as_str()).collect();
        println!("  Repaired: {}", repaired.join(", "));
    }
    if outcome.source != Tier::Primary {
        print_attempts(&outcome.attempts);
    }
    Ok(())
}

fn cmd_status(service: &CheckpointService, format: OutputFormat) -> anyhow::Result<()> {
    let status = service.status()?;
    if format == OutputFormat::Json {
        return print_json(&status);
    }

    println!("Data dir: {}", service.config().data_dir.display().to_string().bold());
    println!("  Primary: {}/{}", status.primary_count, status.primary_capacity);
    println!("  Hidden:  {}/{}", status.hidden_count, status.hidden_capacity);
    println!("  Ghost:   {}", status.ghost_count);
    for replica in &status.replica_copies {
        let copies = replica
            .copies
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unreadable".red().to_string());
        println!("  Replica {}: {}", replica.node_id.cyan(), copies);
    }
    let active = status
        .active_id
        .map(|id| id.to_hex().yellow().to_string())
        .unwrap_or_else(|| "none".dimmed().to_string());
    println!("Active:          {active}");
    println!("Last checkpoint: {}", format_optional(status.last_checkpoint_at));
    println!("Last rollback:   {}", format_optional(status.last_rollback_at));
    let failures = status.tier_write_failures;
    if failures.replica + failures.hidden + failures.ghost > 0 {
        println!(
            "{} tier write failures: replica {}, hidden {}, ghost {}",
            "!".yellow().bold(),
            failures.replica,
            failures.hidden,
            failures.ghost
        );
    }
    Ok(())
}

fn cmd_list(service: &CheckpointService, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let listed = service.list_checkpoints(args.limit)?;
    if format == OutputFormat::Json {
        return print_json(&listed);
    }
    if listed.is_empty() {
        println!("No checkpoints.");
        return Ok(());
    }
    for entry in &listed {
        let marker = if entry.active { "*".green().bold() } else { " ".normal() };
        let integrity = if entry.verified { "✓".green() } else { "✗".red() };
        let kind = if entry.snapshot.is_safety() { " (safety)".dimmed() } else { "".normal() };
        println!(
            "{marker} {} {integrity} {}  {}{kind}",
            entry.snapshot.id.short_hex().yellow(),
            format_anchor(&entry.snapshot.created_at).dimmed(),
            entry.snapshot.description,
        );
    }
    Ok(())
}

fn cmd_show(service: &CheckpointService, args: IdArgs, format: OutputFormat) -> anyhow::Result<()> {
    let snapshot = service.get_checkpoint(&args.id)?;
    if format == OutputFormat::Json {
        return print_json(&snapshot);
    }
    println!("Checkpoint {}", snapshot.id.to_hex().yellow().bold());
    println!("  Created:     {} ({})", format_anchor(&snapshot.created_at), snapshot.created_at);
    println!("  Description: {}", snapshot.description);
    if !snapshot.state_ref.is_empty() {
        println!("  State:       {}", snapshot.state_ref.as_str().cyan());
    }
    println!("  Signature:   {}", snapshot.signature.to_hex().dimmed());
    if let Some(lineage) = &snapshot.lineage {
        println!("  Lineage:     {lineage:?}");
    }
    Ok(())
}

fn cmd_verify(service: &CheckpointService, args: IdArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = service.verify_checkpoint(&args.id)?;
    if format == OutputFormat::Json {
        print_json(&report)?;
    } else {
        println!("Copies of {}", report.id.to_hex().yellow());
        for copy in &report.copies {
            println!(
                "  {:<8} {:<36} {}",
                copy.tier.as_str(),
                copy.location.as_deref().unwrap_or("-").dimmed(),
                describe_outcome(&copy.outcome)
            );
        }
    }
    if !report.is_recoverable() {
        bail!("no verifiable copy of {}", report.id);
    }
    Ok(())
}

fn cmd_run(service: CheckpointService, args: RunArgs) -> anyhow::Result<()> {
    let interval = match args.interval {
        Some(0) => bail!("--interval must be at least 1 second"),
        Some(secs) => Duration::from_secs(secs),
        None => service
            .config()
            .checkpoint_interval()
            .context("checkpoint_interval_secs is 0; scheduling is disabled")?,
    };
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let scheduler = CheckpointScheduler::spawn(Arc::new(service), interval);
        println!(
            "{} Taking a checkpoint every {}s; Ctrl-C to stop",
            "●".green(),
            interval.as_secs()
        );
        tokio::signal::ctrl_c().await?;
        let taken = scheduler.shutdown().await;
        println!("{} Stopped after {taken} checkpoints", "✓".green().bold());
        Ok::<(), anyhow::Error>(())
    })
}

fn cmd_purge(service: &CheckpointService, args: PurgeArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.id.is_none() && !args.all {
        bail!("pass --id <checkpoint> or --all");
    }
    let removed = service.purge_ghosts(args.id.as_deref())?;
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "removed": removed }));
    }
    println!("{} Removed {removed} ghost records", "✓".green().bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(dir: &Path, args: &[&str]) -> Cli {
        let mut argv = vec!["strata", "--data-dir", dir.to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn checkpoint_then_rollback_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        run_command(cli(dir.path(), &["checkpoint", "first"])).unwrap();
        run_command(cli(dir.path(), &["--format", "json", "rollback"])).unwrap();
        run_command(cli(dir.path(), &["status"])).unwrap();
        run_command(cli(dir.path(), &["list", "-n", "5"])).unwrap();
    }

    #[test]
    fn malformed_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_command(cli(dir.path(), &["show", "not-an-id"])).unwrap_err();
        assert!(err.to_string().contains("validation error"));
    }

    #[test]
    fn purge_requires_a_scope() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_command(cli(dir.path(), &["purge-ghosts"])).is_err());
        run_command(cli(dir.path(), &["purge-ghosts", "--all"])).unwrap();
    }

    #[test]
    fn rollback_with_nothing_stored_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_command(cli(dir.path(), &["rollback"])).is_err());
    }

    #[test]
    fn state_file_is_digested_on_each_read() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.bin");
        std::fs::write(&state_path, b"v1").unwrap();
        let parsed = cli(
            dir.path(),
            &["--state-file", state_path.to_str().unwrap(), "checkpoint"],
        );
        let source = state_source(&parsed).unwrap();
        let first = source.current();
        assert_eq!(first, digest_bytes(b"v1"));
        std::fs::write(&state_path, b"v2").unwrap();
        assert_ne!(source.current(), first);
    }

    #[test]
    fn missing_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = cli(dir.path(), &["--state-file", "/nonexistent/state.bin", "status"]);
        assert!(state_source(&parsed).is_err());
    }
}
