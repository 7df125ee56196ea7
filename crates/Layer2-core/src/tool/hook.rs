//! Tool Hook - 실행 전/후 훅
//!
//! - `before_tool`: 인자 변경 또는 차단 가능
//! - `after_tool`: 관찰 전용 (문자열화된 결과 + 에러)
//!
//! 훅은 등록 순서대로 실행된다.

use async_trait::async_trait;
use sentinel_foundation::CallContext;

use super::schema::ToolArgs;

/// 실행 전 훅 결정
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    Continue,
    /// 인자 교체 후 계속
    Modify(ToolArgs),
    /// 핸들러를 호출하지 않고 차단
    Block(String),
}

#[async_trait]
pub trait ToolHook: Send + Sync {
    fn name(&self) -> &str;

    async fn before_tool(&self, _ctx: &CallContext, _tool: &str, _args: &ToolArgs) -> HookDecision {
        HookDecision::Continue
    }

    async fn after_tool(
        &self,
        _ctx: &CallContext,
        _tool: &str,
        _args: &ToolArgs,
        _output: &str,
        _error: Option<&str>,
    ) {
    }
}
