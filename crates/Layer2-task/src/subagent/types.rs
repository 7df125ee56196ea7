//! Subagent run type definitions

use chrono::{DateTime, Utc};
use sentinel_foundation::{CallContext, CallerIdentity, DeliveryTarget, RunRecord, RunStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Generate a new run id
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single subagent run
///
/// Created as `running` at spawn time and finalized exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentRun {
    pub id: String,
    pub label: String,
    pub task: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    /// Set when the parent is itself a subagent run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub spawn_depth: u32,
    /// Number of children this run has spawned
    pub children: usize,
    /// Where the completion announcement goes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<DeliveryTarget>,
    pub timeout_secs: u64,
    pub tokens_used: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl SubagentRun {
    pub fn new(params: &SpawnParams, depth: u32, model: Option<String>, timeout_secs: u64) -> Self {
        Self {
            id: new_run_id(),
            label: params.display_label(),
            task: params.task.clone(),
            status: RunStatus::Running,
            result: None,
            error: None,
            model,
            parent_session_id: params.parent_session_id.clone(),
            parent_run_id: params.parent_run_id.clone(),
            spawn_depth: depth,
            children: 0,
            origin: params.origin.clone(),
            timeout_secs,
            tokens_used: 0,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Key used to count siblings against `max_children`
    pub fn parent_key(&self) -> Option<&str> {
        self.parent_run_id
            .as_deref()
            .or(self.parent_session_id.as_deref())
    }

    /// Terminal transition. Returns false if the run was already finalized.
    pub fn finish(
        &mut self,
        status: RunStatus,
        result: Option<String>,
        error: Option<String>,
        tokens_used: u64,
    ) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = status;
        self.result = result;
        self.error = error;
        self.tokens_used = tokens_used;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        true
    }

    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            id: self.id.clone(),
            label: self.label.clone(),
            task: self.task.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            model: self.model.clone(),
            parent_session_id: self.parent_session_id.clone(),
            spawn_depth: self.spawn_depth,
            tokens_used: self.tokens_used,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    /// Rebuild from a persisted record (in-memory only fields are left empty)
    pub fn from_record(record: RunRecord) -> Self {
        let duration_ms = record
            .completed_at
            .map(|done| (done - record.started_at).num_milliseconds().max(0) as u64);
        Self {
            id: record.id,
            label: record.label,
            task: record.task,
            status: record.status,
            result: record.result,
            error: record.error,
            model: record.model,
            parent_session_id: record.parent_session_id,
            parent_run_id: None,
            spawn_depth: record.spawn_depth,
            children: 0,
            origin: None,
            timeout_secs: 0,
            tokens_used: record.tokens_used,
            started_at: record.started_at,
            completed_at: record.completed_at,
            duration_ms,
        }
    }

    /// Compact view returned to the reasoning loop
    pub fn summary(&self) -> Value {
        let mut v = json!({
            "runId": self.id,
            "label": self.label,
            "status": self.status,
            "depth": self.spawn_depth,
        });
        if let Some(result) = &self.result {
            v["result"] = json!(result);
        }
        if let Some(error) = &self.error {
            v["error"] = json!(error);
        }
        if let Some(ms) = self.duration_ms {
            v["durationMs"] = json!(ms);
        }
        v
    }

    /// Completion message pushed to the requester
    pub fn announcement(&self) -> String {
        match self.status {
            RunStatus::Completed => format!(
                "Subagent '{}' completed:\n{}",
                self.label,
                self.result.as_deref().unwrap_or("(no output)")
            ),
            RunStatus::Timeout => format!(
                "Subagent '{}' timed out: {}",
                self.label,
                self.error.as_deref().unwrap_or("deadline elapsed")
            ),
            _ => format!(
                "Subagent '{}' failed: {}",
                self.label,
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Spawn request
#[derive(Debug, Clone, Default)]
pub struct SpawnParams {
    pub task: String,
    pub label: Option<String>,
    pub model: Option<String>,
    /// Overrides the configured timeout
    pub timeout_secs: Option<u64>,
    /// Depth of the requester (0 = top-level session)
    pub parent_depth: u32,
    pub parent_session_id: Option<String>,
    pub parent_run_id: Option<String>,
    /// Caller the child acts on behalf of
    pub identity: Option<CallerIdentity>,
    pub origin: Option<DeliveryTarget>,
    /// Parent cancellation scope; the child run is cancelled with it
    pub parent_cancel: Option<CancellationToken>,
}

impl SpawnParams {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    /// Fill parent fields from the calling tool context
    pub fn from_context(task: impl Into<String>, ctx: &CallContext) -> Self {
        Self {
            task: task.into(),
            parent_depth: ctx.spawn_depth,
            parent_session_id: ctx.identity.as_ref().map(|i| i.session_id.clone()),
            parent_run_id: ctx.run_id.clone(),
            identity: ctx.identity.clone(),
            origin: ctx.delivery_target(),
            parent_cancel: Some(ctx.cancel.clone()),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_parent_depth(mut self, depth: u32) -> Self {
        self.parent_depth = depth;
        self
    }

    pub fn with_parent_run(mut self, run_id: impl Into<String>) -> Self {
        self.parent_run_id = Some(run_id.into());
        self
    }

    pub fn with_origin(mut self, origin: DeliveryTarget) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Label, or the first line of the task
    pub fn display_label(&self) -> String {
        if let Some(label) = self.label.as_deref().filter(|l| !l.trim().is_empty()) {
            return label.trim().to_string();
        }
        let first = self.task.lines().next().unwrap_or("").trim();
        let short: String = first.chars().take(40).collect();
        if short.is_empty() {
            "subagent".to_string()
        } else {
            short
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_foundation::AccessLevel;

    #[test]
    fn test_finish_once() {
        let mut run = SubagentRun::new(&SpawnParams::new("scan logs"), 1, None, 300);
        assert!(run.is_running());
        assert!(run.finish(RunStatus::Completed, Some("ok".into()), None, 42));
        assert!(!run.finish(RunStatus::Failed, None, Some("late".into()), 0));
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.tokens_used, 42);
        assert!(run.duration_ms.is_some());
        assert!(!run.finish(RunStatus::Running, None, None, 0));
    }

    #[test]
    fn test_record_conversion() {
        let mut run = SubagentRun::new(&SpawnParams::new("check disk").with_label("disk"), 1, Some("small".into()), 60);
        run.finish(RunStatus::Timeout, None, Some("timed out after 60s".into()), 0);
        let record = run.to_record();
        assert_eq!(record.status, RunStatus::Timeout);
        assert_eq!(record.label, "disk");
        let back = SubagentRun::from_record(record);
        assert_eq!(back.id, run.id);
        assert_eq!(back.status, RunStatus::Timeout);
        assert_eq!(back.model.as_deref(), Some("small"));
    }

    #[test]
    fn test_display_label() {
        assert_eq!(SpawnParams::new("line one\nline two").display_label(), "line one");
        assert_eq!(SpawnParams::new("x").with_label("  named ").display_label(), "named");
        assert_eq!(SpawnParams::new("").display_label(), "subagent");
    }

    #[test]
    fn test_from_context() {
        let ctx = CallContext::new()
            .with_identity(CallerIdentity::new("s1", "bob", AccessLevel::Admin))
            .with_spawn_depth(1)
            .with_run_id("parent-run");
        let params = SpawnParams::from_context("sub task", &ctx);
        assert_eq!(params.parent_depth, 1);
        assert_eq!(params.parent_run_id.as_deref(), Some("parent-run"));
        assert_eq!(params.parent_session_id.as_deref(), Some("s1"));
        assert_eq!(params.origin.unwrap().caller_jid, "bob");
    }

    #[test]
    fn test_summary_and_announcement() {
        let mut run = SubagentRun::new(&SpawnParams::new("t").with_label("probe"), 1, None, 10);
        run.finish(RunStatus::Failed, None, Some("stopped".into()), 0);
        let v = run.summary();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["error"], "stopped");
        assert_eq!(run.announcement(), "Subagent 'probe' failed: stopped");
    }
}
