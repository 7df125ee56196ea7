//! Tool System - 도구 등록 / 검증 / 실행
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ToolExecutor                                                │
//! │  ├── execute(calls) - 배치 실행 (순서 보존)                  │
//! │  ├── register(def, handler) - 도구 등록                      │
//! │  └── derive_child(deny) - subagent 용 축소 실행기            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ToolRegistry     이름 정규화 + 조회                         │
//! │  schema           JSON Schema 기반 인자 검증 → ToolArgs      │
//! │  ToolHook         before/after 훅                            │
//! │  output           출력 상한 + 정규화된 에러 JSON             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 사용법
//!
//! ```ignore
//! use sentinel_core::tool::{handler_fn, ToolExecutor, ToolOutput};
//!
//! let executor = ToolExecutor::from_config(&SentinelConfig::load()?)?;
//! executor.register(
//!     ToolDefinition::new("echo", "Echo input", json!({
//!         "type": "object",
//!         "properties": {"text": {"type": "string"}},
//!         "required": ["text"]
//!     })),
//!     handler_fn(|_ctx, args| async move {
//!         Ok(ToolOutput::Text(args.require_str("text")?.to_string()))
//!     }),
//! )?;
//!
//! let results = executor.execute(&ctx, &calls).await;
//! ```

mod executor;
mod handler;
mod hook;
mod output;
mod registry;
mod schema;

pub use executor::ToolExecutor;
pub use handler::{handler_fn, FnHandler, ToolHandler, ToolOutput};
pub use hook::{HookDecision, ToolHook};
pub use output::{render_error, render_output};
pub use registry::{sanitize_tool_name, RegisteredTool, ToolRegistry};
pub use schema::{parse_arguments, validate_args, ArgValue, ToolArgs};
