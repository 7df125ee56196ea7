//! Subagent runner contract
//!
//! The manager owns scheduling and lifecycle; the reasoning loop itself is
//! injected through [`AgentLoop`]. Each run gets an isolated
//! [`SubagentSession`] and a filtered child executor.

use async_trait::async_trait;
use sentinel_core::ToolExecutor;
use sentinel_foundation::{CallContext, CallerIdentity, DeliveryTarget, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Isolated session handed to the inner reasoning loop
#[derive(Debug, Clone)]
pub struct SubagentSession {
    /// `subagent:<run id>`
    pub session_id: String,
    pub run_id: String,
    pub depth: u32,
    pub cancel: CancellationToken,
    pub max_turns: u32,
    pub model: Option<String>,
    pub prompt: String,
    pub identity: CallerIdentity,
    pub origin: Option<DeliveryTarget>,
}

impl SubagentSession {
    pub fn session_id_for(run_id: &str) -> String {
        format!("subagent:{}", run_id)
    }

    /// Context for tool calls made by this run
    ///
    /// Nested spawns see this run's depth and id as their parent.
    pub fn call_context(&self) -> CallContext {
        let mut identity = self.identity.clone();
        identity.session_id = self.session_id.clone();

        let mut ctx = CallContext::new()
            .with_identity(identity)
            .with_cancel(self.cancel.child_token())
            .with_spawn_depth(self.depth)
            .with_run_id(self.run_id.clone());
        if let Some(origin) = &self.origin {
            ctx = ctx.with_origin(origin.clone());
        }
        ctx
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Output of a finished reasoning loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentRunOutput {
    pub text: String,
    pub tokens_used: u64,
}

impl AgentRunOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: 0,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }
}

/// Inner reasoning loop driven by the manager
#[async_trait]
pub trait AgentLoop: Send + Sync {
    async fn run(&self, session: SubagentSession, tools: Arc<ToolExecutor>) -> Result<AgentRunOutput>;
}

/// Minimal task-focused prompt for a child run
pub fn build_subagent_prompt(
    task: &str,
    label: &str,
    depth: u32,
    max_depth: u32,
    max_turns: u32,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a subagent working on a single delegated task.\n");
    prompt.push_str(&format!("Task label: {}\n", label));
    prompt.push_str(&format!(
        "Finish within {} turns and reply with a concise final report.\n",
        max_turns
    ));
    if depth < max_depth {
        prompt.push_str(&format!(
            "You may delegate further (depth {} of {}), but only when clearly necessary.\n",
            depth, max_depth
        ));
    } else {
        prompt.push_str("You cannot spawn further subagents.\n");
    }
    prompt.push_str("\n## Task\n");
    prompt.push_str(task.trim());
    prompt.push('\n');
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_foundation::AccessLevel;

    fn session() -> SubagentSession {
        SubagentSession {
            session_id: SubagentSession::session_id_for("r1"),
            run_id: "r1".into(),
            depth: 1,
            cancel: CancellationToken::new(),
            max_turns: 10,
            model: None,
            prompt: String::new(),
            identity: CallerIdentity::new("parent", "alice", AccessLevel::User),
            origin: None,
        }
    }

    #[test]
    fn test_call_context() {
        let s = session();
        let ctx = s.call_context();
        assert_eq!(ctx.spawn_depth, 1);
        assert_eq!(ctx.run_id.as_deref(), Some("r1"));
        let identity = ctx.identity.unwrap();
        assert_eq!(identity.session_id, "subagent:r1");
        assert_eq!(identity.caller_jid, "alice");
        assert_eq!(identity.level, AccessLevel::User);

        s.cancel.cancel();
        assert!(ctx.cancel.is_cancelled());
    }

    #[test]
    fn test_prompt_depth_hint() {
        let leaf = build_subagent_prompt("count files", "count", 1, 1, 25);
        assert!(leaf.contains("cannot spawn"));
        assert!(leaf.ends_with("count files\n"));
        let mid = build_subagent_prompt("x", "x", 1, 2, 25);
        assert!(mid.contains("depth 1 of 2"));
    }
}
