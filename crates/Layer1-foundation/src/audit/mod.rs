//! Audit System - 감사 로깅 시스템
//!
//! Guard 판정과 도구 실행 결과를 append-only 싱크에 기록합니다.
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ToolGuard::check ──┐                                        │
//! │                     ├──► AuditEntry ──► dyn AuditSink        │
//! │  ToolExecutor ──────┘     (sanitized)     ├── FileAuditSink  │
//! │                                           ├── SqliteAuditSink│
//! │                                           └── MemoryAuditSink│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! 거부 엔트리는 `DENIED` 로, 허용 엔트리는 `ALLOWED` 로 구분되어 기록된다.

pub mod logger;
pub mod sink;
pub mod types;

// Re-exports
pub use logger::{AuditLoggerConfig, SqliteAuditSink};
pub use sink::{AuditSink, FileAuditSink, MemoryAuditSink};
pub use types::{AuditEntry, AuditId, AuditKind};
