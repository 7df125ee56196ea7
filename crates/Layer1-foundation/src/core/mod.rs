//! Core Module - 핵심 인터페이스 및 타입
//!
//! Sentinel의 도구 실행 / 안전 정책 코어가 공유하는 타입을 정의합니다.
//!
//! ## 타입 계층
//!
//! - `types.rs`: 데이터 타입 (AccessLevel, ToolCall, ToolResult 등)
//! - `context.rs`: 요청 단위 컨텍스트 (호출자, 취소 스코프, 중단 신호)
//! - `traits.rs`: 외부 협력자 인터페이스 (승인, 알림)
//!
//! ## 호출 흐름
//!
//! ```text
//! ┌──────────────┐   calls    ┌───────────────┐
//! │ Agent Loop   │ ─────────▶ │ ToolExecutor  │
//! └──────────────┘            └───────┬───────┘
//!                                     │ CallContext (identity, cancel, abort)
//!                        ┌────────────┼────────────┐
//!                        ▼            ▼            ▼
//!                   ToolGuard     Handlers    ApprovalHandler
//!                        │                         │
//!                        ▼                         ▼
//!                   AuditSink              ProgressNotifier
//! ```

mod context;
mod traits;
mod types;

pub use context::{AbortSignal, CallContext, DeliveryTarget};
pub use traits::{ApprovalHandler, ApprovalRequest, ProgressNotifier};
pub use types::{
    AccessLevel, CallerIdentity, ToolCall, ToolCheckResult, ToolDefinition, ToolPermission,
    ToolResult,
};
