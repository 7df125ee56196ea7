//! ToolHandler - 도구 구현 계약
//!
//! 도구 패키지는 `ToolDefinition` 과 함께 핸들러를 등록한다.
//! 핸들러는 요청 단위 `CallContext` 와 검증된 `ToolArgs` 를 받는다.

use async_trait::async_trait;
use sentinel_foundation::{CallContext, Result, ToolResult};
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;

use super::schema::ToolArgs;

/// 핸들러 반환 값
///
/// 문자열 / 바이트는 그대로, JSON 은 직렬화, `Result` 는 그대로 전달된다.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
    /// 실패를 값으로 보고 (핸들러 에러와 동일하게 처리되지 않고 `is_error` 결과가 된다)
    Error(String),
    Result(ToolResult),
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        ToolOutput::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        ToolOutput::Text(s.to_string())
    }
}

impl From<Value> for ToolOutput {
    fn from(v: Value) -> Self {
        ToolOutput::Json(v)
    }
}

impl From<ToolResult> for ToolOutput {
    fn from(r: ToolResult) -> Self {
        ToolOutput::Result(r)
    }
}

/// 도구 핸들러
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: &CallContext, args: ToolArgs) -> Result<ToolOutput>;
}

/// 클로저 기반 핸들러
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F, Fut>
where
    F: Fn(CallContext, ToolArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
{
    async fn call(&self, ctx: &CallContext, args: ToolArgs) -> Result<ToolOutput> {
        (self.f)(ctx.clone(), args).await
    }
}

/// 클로저를 핸들러로 감싼다
///
/// ```ignore
/// executor.register(def, handler_fn(|_ctx, args| async move {
///     Ok(ToolOutput::Text(args.require_str("path")?.to_string()))
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(CallContext, ToolArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}
