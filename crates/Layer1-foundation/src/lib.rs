//! # sentinel-foundation
//!
//! Foundation layer for Sentinel:
//! - Core: 공유 데이터 모델 (AccessLevel, ToolCall, ToolResult, CallContext)
//! - Config: 통합 설정 (Guard, Executor, Subagent, LoopDetector)
//! - Audit: 감사 싱크 (파일 / SQLite / 메모리)
//! - Storage: SQLite (subagent run), JsonStore (설정 파일)
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  sentinel-cli                                            │
//! │                     │                                   │
//! │  sentinel-task (SubagentManager)                         │
//! │                     │                                   │
//! │  sentinel-core (ToolExecutor, ToolGuard, LoopDetector)   │
//! │                     │                                   │
//! │  sentinel-foundation                                     │
//! │   ├── Error / Result                                    │
//! │   ├── core types + CallContext                          │
//! │   ├── SentinelConfig (hot-reload)                       │
//! │   ├── AuditSink                                         │
//! │   └── RunStore                                          │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod hash;
pub mod storage;
pub mod strings;

// ============================================================================
// Error
// ============================================================================
pub use error::{DenialKind, Error, Result};

// ============================================================================
// Core (핵심 타입)
// ============================================================================
pub use self::core::{
    AbortSignal, AccessLevel, ApprovalHandler, ApprovalRequest, CallContext, CallerIdentity,
    DeliveryTarget, ProgressNotifier, ToolCall, ToolCheckResult, ToolDefinition, ToolPermission,
    ToolResult,
};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    ConfigWatcher, DestructiveConfig, ExecutorConfig, GuardConfig, LoopDetectionConfig,
    PatternRule, ProfileConfig, ProtectedPathRule, SentinelConfig, SubagentSettings,
};

// ============================================================================
// Audit
// ============================================================================
pub use audit::{
    AuditEntry, AuditKind, AuditSink, FileAuditSink, MemoryAuditSink, SqliteAuditSink,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{JsonStore, RunRecord, RunStatus, RunStore, SqliteRunStore};
