//! # sentinel-task
//!
//! Subagent orchestration for Sentinel.
//!
//! ## Features
//!
//! - Depth- and concurrency-bounded spawning of child reasoning loops
//! - Child tool registries filtered from the parent executor
//! - Run lifecycle persisted through `RunStore` with orphan recovery
//! - Completion announcements pushed to the original requester
//! - `spawn_subagent` / `wait_subagent` / `stop_subagent` / `list_subagents` tools

pub mod subagent;

pub use subagent::{
    build_subagent_prompt, register_subagent_tools, AgentLoop, AgentRunOutput, SpawnParams,
    SubagentManager, SubagentRun, SubagentSession,
};
