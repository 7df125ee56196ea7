//! Subcommand implementations
//!
//! Each command renders to a `String` so output can be checked in tests.

use anyhow::{bail, Context, Result};
use sentinel_core::guard::{has_unquoted_redirect, is_read_only_command, split_segments};
use sentinel_core::ToolGuard;
use sentinel_foundation::audit::AuditLoggerConfig;
use sentinel_foundation::{
    AccessLevel, RunStore, SentinelConfig, SqliteAuditSink, SqliteRunStore, ToolCheckResult,
};
use sentinel_task::SubagentRun;
use serde_json::{json, Value};
use std::fmt::Write;
use std::path::{Path, PathBuf};

pub fn load_config(path: Option<&Path>) -> Result<SentinelConfig> {
    match path {
        Some(path) => SentinelConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => SentinelConfig::load().context("failed to load sentinel.json"),
    }
}

fn build_guard(config: SentinelConfig) -> Result<ToolGuard> {
    ToolGuard::new(config.guard, config.destructive).context("invalid guard configuration")
}

pub fn check(config: SentinelConfig, tool: &str, level: AccessLevel, args: &str) -> Result<bool> {
    let args: Value = serde_json::from_str(args).context("--args must be valid JSON")?;
    if !args.is_object() {
        bail!("--args must be a JSON object");
    }
    let guard = build_guard(config)?;
    let result = guard.check(tool, level, &args);
    print!("{}", render_check(tool, level, &result));
    Ok(result.allowed)
}

pub fn render_check(tool: &str, level: AccessLevel, result: &ToolCheckResult) -> String {
    let mut out = String::new();
    let verdict = match (result.allowed, result.requires_confirmation) {
        (false, _) => "DENIED",
        (true, true) => "ALLOWED (requires confirmation)",
        (true, false) => "ALLOWED",
    };
    let _ = writeln!(out, "{} [{}]: {}", tool, level, verdict);
    if let Some(reason) = &result.reason {
        let _ = writeln!(out, "  reason:  {}", reason);
    }
    if let Some(warning) = &result.warning {
        let _ = writeln!(out, "  warning: {}", warning);
    }
    out
}

pub fn classify(config: SentinelConfig, command: &str, level: AccessLevel) -> Result<String> {
    let shell_tool = config
        .guard
        .shell_tools
        .first()
        .cloned()
        .unwrap_or_else(|| "bash".to_string());
    let guard = build_guard(config)?;

    let mut out = String::new();
    let _ = writeln!(out, "\nCommand: {}\n", command);
    match split_segments(command) {
        Some(segments) => {
            for (i, segment) in segments.iter().enumerate() {
                let _ = writeln!(out, "  segment {:<3} {}", i + 1, segment);
            }
        }
        None => {
            let _ = writeln!(out, "  segments    (unparseable)");
        }
    }
    let _ = writeln!(out, "  read-only   {}", is_read_only_command(command));
    let _ = writeln!(out, "  redirect    {}", has_unquoted_redirect(command));

    let matches = guard.dangerous_matches(command);
    if matches.is_empty() {
        let _ = writeln!(out, "  dangerous   none");
    } else {
        for (pattern, reason) in matches {
            let _ = writeln!(out, "  dangerous   {} ({})", reason, pattern);
        }
    }

    let result = guard.check(&shell_tool, level, &json!({ "command": command }));
    let _ = writeln!(out);
    out.push_str(&render_check(&shell_tool, level, &result));
    Ok(out)
}

pub fn open_run_store(db: Option<PathBuf>) -> Result<SqliteRunStore> {
    match db {
        Some(path) => SqliteRunStore::open(&path)
            .with_context(|| format!("failed to open run database {}", path.display())),
        None => SqliteRunStore::open_default().context("failed to open run database"),
    }
}

pub fn list_runs(store: &dyn RunStore, days: u32) -> Result<String> {
    let mut runs = store.running()?;
    runs.extend(store.recent(days)?);
    let runs: Vec<SubagentRun> = runs.into_iter().map(SubagentRun::from_record).collect();

    let mut out = String::new();
    if runs.is_empty() {
        let _ = writeln!(out, "No subagent runs in the last {} day(s).", days);
        return Ok(out);
    }

    let _ = writeln!(out, "\nSubagent Runs\n");
    let _ = writeln!(
        out,
        "{:<10} {:<10} {:<6} {:<24} {:<10} {}",
        "ID", "STATUS", "DEPTH", "LABEL", "DURATION", "STARTED"
    );
    let _ = writeln!(out, "{}", "-".repeat(80));
    for run in &runs {
        let duration = run
            .duration_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        let label: String = run.label.chars().take(24).collect();
        let _ = writeln!(
            out,
            "{:<10} {:<10} {:<6} {:<24} {:<10} {}",
            &run.id[..8.min(run.id.len())],
            run.status.as_str(),
            run.spawn_depth,
            label,
            duration,
            run.started_at.format("%Y-%m-%d %H:%M")
        );
        if let Some(error) = &run.error {
            let _ = writeln!(out, "{:<10} error: {}", "", error);
        }
    }
    Ok(out)
}

/// Nothing in this process is running, so every `running` record is an orphan
pub fn recover(store: &dyn RunStore) -> Result<usize> {
    let recovered = store
        .recover_orphans()
        .context("failed to recover orphaned runs")?;
    for record in &recovered {
        tracing::info!(run_id = %record.id, label = %record.label, "recovered orphaned run");
    }
    Ok(recovered.len())
}

pub fn audit(db: Option<PathBuf>, limit: usize) -> Result<String> {
    let mut config = AuditLoggerConfig::default();
    if let Some(path) = db {
        config.db_path = path;
    }
    let sink = SqliteAuditSink::new(config).context("failed to open audit database")?;
    let entries = sink.query_recent(limit)?;

    let mut out = String::new();
    if entries.is_empty() {
        let _ = writeln!(out, "No audit entries.");
    }
    for entry in entries.iter().rev() {
        let _ = writeln!(out, "{}", entry.to_line());
    }
    Ok(out)
}
