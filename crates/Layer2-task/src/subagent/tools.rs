//! Subagent control tools
//!
//! `spawn_subagent`, `wait_subagent`, `stop_subagent`, `list_subagents` are
//! registered into an executor like any other capability. Handlers hold a
//! weak reference so the executor does not keep the manager alive.

use async_trait::async_trait;
use sentinel_core::{ToolArgs, ToolExecutor, ToolHandler, ToolOutput};
use sentinel_foundation::{CallContext, Error, Result, ToolDefinition};
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::manager::SubagentManager;
use super::types::SpawnParams;

/// Default `wait_subagent` deadline
const DEFAULT_WAIT_SECS: u64 = 60;

fn upgrade(manager: &Weak<SubagentManager>) -> Result<Arc<SubagentManager>> {
    manager
        .upgrade()
        .ok_or_else(|| Error::InvalidState("subagent manager is no longer available".to_string()))
}

struct SpawnTool(Weak<SubagentManager>);

#[async_trait]
impl ToolHandler for SpawnTool {
    async fn call(&self, ctx: &CallContext, args: ToolArgs) -> Result<ToolOutput> {
        let manager = upgrade(&self.0)?;
        let mut params = SpawnParams::from_context(args.require_str("task")?, ctx);
        if let Some(label) = args.str("label") {
            params = params.with_label(label);
        }
        if let Some(model) = args.str("model") {
            params = params.with_model(model);
        }
        if let Some(secs) = args.i64("timeout_secs").filter(|s| *s > 0) {
            params = params.with_timeout_secs(secs as u64);
        }

        let run = manager.spawn(params)?;
        Ok(ToolOutput::Json(json!({
            "runId": run.id,
            "label": run.label,
            "status": run.status,
            "depth": run.spawn_depth,
            "message": "subagent started; its result will be announced when it finishes",
        })))
    }
}

struct WaitTool(Weak<SubagentManager>);

#[async_trait]
impl ToolHandler for WaitTool {
    async fn call(&self, _ctx: &CallContext, args: ToolArgs) -> Result<ToolOutput> {
        let manager = upgrade(&self.0)?;
        let run_id = args.require_str("run_id")?;
        let secs = args
            .i64("timeout_secs")
            .filter(|s| *s > 0)
            .map(|s| s as u64)
            .unwrap_or(DEFAULT_WAIT_SECS);
        let run = manager.wait(run_id, Duration::from_secs(secs)).await?;
        Ok(ToolOutput::Json(run.summary()))
    }
}

struct StopTool(Weak<SubagentManager>);

#[async_trait]
impl ToolHandler for StopTool {
    async fn call(&self, _ctx: &CallContext, args: ToolArgs) -> Result<ToolOutput> {
        let manager = upgrade(&self.0)?;
        let run = manager.stop(args.require_str("run_id")?)?;
        Ok(ToolOutput::Json(json!({
            "runId": run.id,
            "status": "stopping",
        })))
    }
}

struct ListTool(Weak<SubagentManager>);

#[async_trait]
impl ToolHandler for ListTool {
    async fn call(&self, ctx: &CallContext, args: ToolArgs) -> Result<ToolOutput> {
        let manager = upgrade(&self.0)?;
        let parent = ctx
            .run_id
            .clone()
            .or_else(|| ctx.identity.as_ref().map(|i| i.session_id.clone()));
        let runs = match (args.bool("all").unwrap_or(false), parent) {
            (false, Some(parent)) => manager.list_children(&parent),
            _ => manager.list(),
        };
        let items: Vec<_> = runs.iter().map(|r| r.summary()).collect();
        Ok(ToolOutput::Json(json!({
            "running": manager.running_count(),
            "runs": items,
        })))
    }
}

/// Tool definitions for the four control tools
pub fn subagent_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "spawn_subagent",
            "Delegate a self-contained task to a background subagent. Returns immediately with a run id.",
            json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string", "description": "Full task description"},
                    "label": {"type": "string", "description": "Short label"},
                    "model": {"type": "string"},
                    "timeout_secs": {"type": "integer"}
                },
                "required": ["task"]
            }),
        ),
        ToolDefinition::new(
            "wait_subagent",
            "Wait for a subagent run to finish, up to a deadline. Returns its current state.",
            json!({
                "type": "object",
                "properties": {
                    "run_id": {"type": "string"},
                    "timeout_secs": {"type": "integer"}
                },
                "required": ["run_id"]
            }),
        ),
        ToolDefinition::new(
            "stop_subagent",
            "Stop a running subagent.",
            json!({
                "type": "object",
                "properties": {"run_id": {"type": "string"}},
                "required": ["run_id"]
            }),
        ),
        ToolDefinition::new(
            "list_subagents",
            "List subagent runs started by this session (all=true for every run).",
            json!({
                "type": "object",
                "properties": {"all": {"type": "boolean"}}
            }),
        ),
    ]
}

/// Register the control tools into `executor`
pub fn register_subagent_tools(
    executor: &ToolExecutor,
    manager: &Arc<SubagentManager>,
) -> Result<()> {
    let weak = Arc::downgrade(manager);
    for def in subagent_tool_definitions() {
        let handler: Arc<dyn ToolHandler> = match def.name.as_str() {
            "spawn_subagent" => Arc::new(SpawnTool(weak.clone())),
            "wait_subagent" => Arc::new(WaitTool(weak.clone())),
            "stop_subagent" => Arc::new(StopTool(weak.clone())),
            _ => Arc::new(ListTool(weak.clone())),
        };
        executor.register_arc(def, handler)?;
    }
    Ok(())
}
