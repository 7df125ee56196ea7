//! sentinel-core: Tool Execution Core
//!
//! Layer2 - 도구 실행 및 안전 정책 레이어
//!
//! # 주요 모듈
//!
//! - `tool`: ToolExecutor, 레지스트리, 인자 검증, 훅
//! - `guard`: ToolGuard (권한 / 셸 명령 분류 / 보호 경로 / SSH 허용 목록 / 프로필)
//! - `loop_detector`: 반복 호출 패턴 감지
//!
//! # 사용 예시
//!
//! ```ignore
//! use sentinel_core::{ToolExecutor, handler_fn, ToolOutput};
//! use sentinel_foundation::{CallContext, CallerIdentity, AccessLevel, SentinelConfig};
//!
//! let executor = ToolExecutor::from_config(&SentinelConfig::load()?)?;
//! executor.register(def, handler_fn(|_ctx, args| async move {
//!     Ok(ToolOutput::Text(format!("{:?}", args)))
//! }))?;
//!
//! let ctx = CallContext::new()
//!     .with_identity(CallerIdentity::new("session-1", "alice", AccessLevel::User));
//! let results = executor.execute(&ctx, &calls).await;
//! ```

pub mod guard;
pub mod loop_detector;
pub mod tool;

// Re-exports: Guard
pub use guard::{
    CommandPolicy, DangerousPattern, DestructiveTracker, DestructiveVerdict, HostAllowlist,
    ProfileSet, ProtectedPaths, ToolGuard,
};

// Re-exports: Loop detection
pub use loop_detector::{LoopCheck, LoopPattern, LoopSeverity, ToolLoopDetector};

// Re-exports: Tool
pub use tool::{
    handler_fn, HookDecision, ToolArgs, ToolExecutor, ToolHandler, ToolHook, ToolOutput,
    ToolRegistry,
};

// Layer1 re-exports
pub use sentinel_foundation::{Error, Result};

/// Layer2 버전
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
