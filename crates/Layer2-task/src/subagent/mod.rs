//! Sub-agent system for delegated tasks
//!
//! Subagents are isolated child runs of the reasoning loop. Each run gets a
//! filtered copy of the parent executor and is bounded by:
//!
//! - **Spawn depth**: child = parent + 1, never above `max_spawn_depth`
//! - **Concurrency**: running count never above `max_concurrent`
//! - **Children**: running children per parent never above `max_children`
//! - **Timeout**: a run past its deadline is finalized as `timeout`
//!
//! Runs are persisted at spawn and at finalization; rows left `running` by a
//! previous process are reclassified as failed on startup.

pub mod manager;
pub mod runner;
pub mod tools;
pub mod types;

pub use manager::{SubagentManager, ADMIN_TOOLS, SPAWN_TOOLS};
pub use runner::{build_subagent_prompt, AgentLoop, AgentRunOutput, SubagentSession};
pub use tools::{register_subagent_tools, subagent_tool_definitions};
pub use types::{new_run_id, SpawnParams, SubagentRun};
