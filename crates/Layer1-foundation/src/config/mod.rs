//! Config - 통합 설정 관리
//!
//! - `guard.rs` - Guard / DestructiveTracker 정책
//! - `runtime.rs` - Executor / Subagent / LoopDetector 제한
//! - `sentinel.rs` - SentinelConfig 통합 설정 및 로드
//! - `watcher.rs` - hot-reload 용 변경 감지

mod guard;
mod runtime;
mod sentinel;
mod watcher;

pub use guard::{
    default_protected_paths, default_tool_groups, DestructiveConfig, GuardConfig, PatternRule,
    ProfileConfig, ProtectedPathRule,
};
pub use runtime::{ExecutorConfig, LoopDetectionConfig, SubagentSettings};
pub use sentinel::{merge_json, SentinelConfig, SENTINEL_CONFIG_FILE};
pub use watcher::ConfigWatcher;
