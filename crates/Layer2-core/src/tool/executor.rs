//! ToolExecutor - 도구 디스패처
//!
//! 레지스트리와 Guard 를 소유하고 LLM 이 요청한 호출 배치를 실행한다.
//!
//! ## 호출 단위 파이프라인
//!
//! ```text
//! 이름 조회 ─▶ 인자 파싱/검증 ─▶ 호출자 결정 ─▶ 프로필 ─▶ Guard
//!                                                        │
//!                        ┌── 확인 필요 ──▶ 대기 결과 반환 + 백그라운드 승인/실행
//!                        ▼
//!                  before 훅 ─▶ 핸들러 (타임아웃) ─▶ after 훅 ─▶ 감사 ─▶ 결과
//! ```
//!
//! ## 스케줄링
//! - 병렬 비활성 / 호출 1개 이하 / 순서 민감 도구 포함 → 전체 순차 실행
//! - 그 외 `max_parallel` 세마포어로 동시 실행, 결과는 입력 순서 유지

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use sentinel_foundation::{
    AbortSignal, AccessLevel, ApprovalHandler, ApprovalRequest, CallContext, CallerIdentity,
    DeliveryTarget, Error, ExecutorConfig, LoopDetectionConfig, ProgressNotifier, Result,
    SentinelConfig, ToolCall, ToolDefinition, ToolResult,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handler::{ToolHandler, ToolOutput};
use super::hook::{HookDecision, ToolHook};
use super::output::{render_error, render_output};
use super::registry::{RegisteredTool, ToolRegistry};
use super::schema::{parse_arguments, validate_args, ToolArgs};
use crate::guard::ToolGuard;
use crate::loop_detector::{LoopCheck, ToolLoopDetector};

/// 도구 디스패처
pub struct ToolExecutor {
    registry: RwLock<ToolRegistry>,
    definitions: RwLock<Option<Arc<Vec<ToolDefinition>>>>,
    guard: Arc<ToolGuard>,
    hooks: RwLock<Vec<Arc<dyn ToolHook>>>,
    approval: RwLock<Option<Arc<dyn ApprovalHandler>>>,
    notifier: RwLock<Option<Arc<dyn ProgressNotifier>>>,
    config: RwLock<ExecutorConfig>,
    /// 요청 스코프 밖 진입점용 기본 호출자
    default_identity: RwLock<CallerIdentity>,
    active_profile: RwLock<Option<String>>,
    abort: RwLock<AbortSignal>,
    loop_detector: Mutex<ToolLoopDetector>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.registry.read().names())
            .field("config", &*self.config.read())
            .finish()
    }
}

/// 핸들러 1회 실행 (타임아웃 + 취소 스코프)
///
/// 핸들러는 별도 태스크에서 실행되어 패닉도 에러 결과로 변환된다.
async fn run_handler(
    handler: Arc<dyn ToolHandler>,
    ctx: CallContext,
    args: ToolArgs,
    tool: &str,
    timeout: Duration,
) -> Result<ToolOutput> {
    let cancel = ctx.cancel.clone();
    let mut task = tokio::spawn(async move { handler.call(&ctx, args).await });

    tokio::select! {
        joined = &mut task => match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(Error::handler(tool, "handler panicked")),
            Err(_) => Err(Error::Cancelled),
        },
        _ = tokio::time::sleep(timeout) => {
            cancel.cancel();
            task.abort();
            warn!(tool, timeout_secs = timeout.as_secs(), "tool call timed out");
            Err(Error::Timeout {
                tool: tool.to_string(),
                secs: timeout.as_secs(),
            })
        }
        _ = cancel.cancelled() => {
            task.abort();
            Err(Error::Cancelled)
        }
    }
}

fn attach_loop(result: ToolResult, check: &LoopCheck) -> ToolResult {
    if check.is_none() {
        return result;
    }
    match serde_json::to_value(check) {
        Ok(value) => result.with_metadata("loop", value),
        Err(_) => result,
    }
}

impl ToolExecutor {
    pub fn new(
        guard: Arc<ToolGuard>,
        config: ExecutorConfig,
        loop_config: LoopDetectionConfig,
    ) -> Self {
        Self {
            registry: RwLock::new(ToolRegistry::new()),
            definitions: RwLock::new(None),
            guard,
            hooks: RwLock::new(Vec::new()),
            approval: RwLock::new(None),
            notifier: RwLock::new(None),
            config: RwLock::new(config),
            default_identity: RwLock::new(CallerIdentity::new("local", "local", AccessLevel::User)),
            active_profile: RwLock::new(None),
            abort: RwLock::new(AbortSignal::new()),
            loop_detector: Mutex::new(ToolLoopDetector::new(loop_config)),
        }
    }

    /// 통합 설정으로 생성 (Guard 패턴 컴파일 실패 시 에러)
    pub fn from_config(config: &SentinelConfig) -> Result<Self> {
        let guard = ToolGuard::new(config.guard.clone(), config.destructive.clone())?;
        Ok(Self::new(
            Arc::new(guard),
            config.executor.clone(),
            config.loop_detection.clone(),
        ))
    }

    // ========================================================================
    // 등록
    // ========================================================================

    pub fn register<H>(&self, definition: ToolDefinition, handler: H) -> Result<()>
    where
        H: ToolHandler + 'static,
    {
        self.register_arc(definition, Arc::new(handler))
    }

    pub fn register_arc(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        let requested = definition.name.clone();
        let replaced = self.registry.write().register(definition, handler)?;
        *self.definitions.write() = None;
        if replaced {
            info!(tool = %requested, "tool handler replaced");
        } else {
            debug!(tool = %requested, "tool registered");
        }
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.registry.write().remove(name).is_some();
        if removed {
            *self.definitions.write() = None;
        }
        removed
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.registry.read().contains(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.read().names()
    }

    /// LLM 에 노출할 정의 목록 (등록 시까지 캐시)
    pub fn definitions(&self) -> Arc<Vec<ToolDefinition>> {
        if let Some(cached) = self.definitions.read().as_ref() {
            return cached.clone();
        }
        // 등록은 레지스트리 갱신 뒤 캐시를 비우므로 쓰기 락 안에서 계산한다
        let mut cache = self.definitions.write();
        if let Some(cached) = cache.as_ref() {
            return cached.clone();
        }
        let defs = Arc::new(self.registry.read().definitions());
        *cache = Some(defs.clone());
        defs
    }

    // ========================================================================
    // 협력자 / 설정
    // ========================================================================

    pub fn guard(&self) -> &Arc<ToolGuard> {
        &self.guard
    }

    pub fn add_hook(&self, hook: Arc<dyn ToolHook>) {
        debug!(hook = hook.name(), "hook added");
        self.hooks.write().push(hook);
    }

    pub fn set_approval_handler(&self, handler: Arc<dyn ApprovalHandler>) {
        *self.approval.write() = Some(handler);
    }

    pub fn set_notifier(&self, notifier: Arc<dyn ProgressNotifier>) {
        *self.notifier.write() = Some(notifier);
    }

    pub fn notifier(&self) -> Option<Arc<dyn ProgressNotifier>> {
        self.notifier.read().clone()
    }

    pub fn set_default_identity(&self, identity: CallerIdentity) {
        *self.default_identity.write() = identity;
    }

    pub fn set_active_profile(&self, profile: Option<String>) {
        *self.active_profile.write() = profile;
    }

    pub fn config(&self) -> ExecutorConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, config: ExecutorConfig) {
        *self.config.write() = config;
    }

    pub fn update_loop_config(&self, config: LoopDetectionConfig) {
        self.loop_detector.lock().update_config(config);
    }

    /// 진행 중인 모든 핸들러에 중단 요청
    pub fn abort(&self) {
        self.abort.read().raise();
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.read().clone()
    }

    /// 새 에이전트 실행 시작: 새 중단 신호 + 감지기 초기화
    pub fn reset_run(&self) {
        *self.abort.write() = AbortSignal::new();
        self.loop_detector.lock().reset();
    }

    /// 거부 목록을 뺀 자식 실행기
    ///
    /// Guard 는 공유하고, 감지기와 중단 신호는 새로 만든다.
    pub fn derive_child(&self, deny: &HashSet<String>) -> ToolExecutor {
        let loop_config = self.loop_detector.lock().config().clone();
        ToolExecutor {
            registry: RwLock::new(self.registry.read().filtered(deny)),
            definitions: RwLock::new(None),
            guard: self.guard.clone(),
            hooks: RwLock::new(self.hooks.read().clone()),
            approval: RwLock::new(self.approval.read().clone()),
            notifier: RwLock::new(self.notifier.read().clone()),
            config: RwLock::new(self.config.read().clone()),
            default_identity: RwLock::new(self.default_identity.read().clone()),
            active_profile: RwLock::new(self.active_profile.read().clone()),
            abort: RwLock::new(AbortSignal::new()),
            loop_detector: Mutex::new(ToolLoopDetector::new(loop_config)),
        }
    }

    // ========================================================================
    // 실행
    // ========================================================================

    fn is_order_sensitive(&self, name: &str, config: &ExecutorConfig) -> bool {
        config.order_sensitive_tools.iter().any(|t| t == name)
            || self
                .registry
                .read()
                .get(name)
                .map(|t| t.definition.order_sensitive)
                .unwrap_or(false)
    }

    fn timeout_for(&self, name: &str, config: &ExecutorConfig) -> Duration {
        let secs = if config.heavy_tool.as_deref() == Some(name) {
            config.heavy_timeout_secs
        } else if self.guard.is_shell_tool(name) || self.guard.is_remote_tool(name) {
            config.shell_timeout_secs
        } else {
            config.default_timeout_secs
        };
        Duration::from_secs(secs.max(1))
    }

    /// 호출 배치 실행. 결과는 항상 입력 순서다.
    pub async fn execute(&self, ctx: &CallContext, calls: &[ToolCall]) -> Vec<ToolResult> {
        let config = self.config();
        let sequential = !config.parallel
            || calls.len() <= 1
            || calls
                .iter()
                .any(|c| self.is_order_sensitive(&c.name, &config));

        if sequential {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute_single(ctx, call).await);
            }
            return results;
        }

        debug!(
            calls = calls.len(),
            max_parallel = config.max_parallel,
            "executing batch in parallel"
        );
        let semaphore = Semaphore::new(config.max_parallel.max(1));
        let futures = calls.iter().map(|call| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.execute_single(ctx, call).await
            }
        });
        join_all(futures).await
    }

    /// 단일 호출 실행
    pub async fn execute_single(&self, ctx: &CallContext, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let config = self.config();
        let name = call.name.as_str();
        let parsed = parse_arguments(&call.arguments);
        // 파싱 실패 시 원시 페이로드로 해시
        let loop_args = match &parsed {
            Ok(raw) => raw.clone(),
            Err(_) => Value::String(call.arguments.trim().to_string()),
        };
        // 실행 전에 끝난 호출도 감지기를 거친다
        let fail = |e: Error| {
            let result = render_error(name, &e, config.max_error_chars);
            self.finish_early(name, &loop_args, result)
                .with_call_id(&call.id)
        };

        let tool = match self.registry.read().get(name).cloned() {
            Some(tool) => tool,
            None => {
                warn!(tool = name, "unknown tool requested");
                return fail(Error::UnknownTool(name.to_string()));
            }
        };

        let raw = match parsed {
            Ok(raw) => raw,
            Err(e) => return fail(e),
        };
        let args = match validate_args(&tool.definition.parameters, &raw) {
            Ok(args) => args,
            Err(e) => return fail(e),
        };

        let identity = ctx
            .identity
            .clone()
            .unwrap_or_else(|| self.default_identity.read().clone());

        let profile = self.active_profile.read().clone();
        if let Some(profile) = profile {
            if let Err(e) = self.guard.check_profile(&profile, name, &identity, &raw) {
                return fail(e);
            }
        }

        let check = match self.guard.authorize(name, &identity, &raw) {
            Ok(check) => check,
            Err(e) => return fail(e),
        };

        let loop_check = self.observe_call(name, &raw);

        if check.requires_confirmation {
            let pending = self.start_confirmation(ctx, &identity, &tool, args, raw, &config);
            if pending.is_error {
                self.loop_detector.lock().record_result(&pending.content);
            }
            return attach_loop(pending, &loop_check).with_call_id(&call.id);
        }

        let call_ctx = ctx
            .child()
            .with_identity(identity.clone())
            .with_abort(self.abort_signal());

        let hooks = self.hooks.read().clone();
        let mut args = args;
        for hook in &hooks {
            match hook.before_tool(&call_ctx, name, &args).await {
                HookDecision::Continue => {}
                HookDecision::Modify(modified) => {
                    debug!(tool = name, hook = hook.name(), "arguments rewritten by hook");
                    args = modified;
                }
                HookDecision::Block(reason) => {
                    warn!(tool = name, hook = hook.name(), reason = %reason, "tool call blocked by hook");
                    let result =
                        render_error(name, &Error::HookBlocked(reason), config.max_error_chars);
                    self.guard
                        .record_execution(name, &identity, false, &raw, &result.content);
                    self.loop_detector.lock().record_result(&result.content);
                    return attach_loop(result, &loop_check).with_call_id(&call.id);
                }
            }
        }

        let timeout = self.timeout_for(name, &config);
        let outcome = run_handler(
            tool.handler.clone(),
            call_ctx.clone(),
            args.clone(),
            name,
            timeout,
        )
        .await;

        let mut result = match outcome {
            Ok(output) => render_output(name, output, config.max_output_chars),
            Err(e) => render_error(name, &e, config.max_error_chars),
        };

        if !hooks.is_empty() {
            let error = result.is_error.then(|| result.content.clone());
            for hook in &hooks {
                hook.after_tool(&call_ctx, name, &args, &result.content, error.as_deref())
                    .await;
            }
        }

        self.guard
            .record_execution(name, &identity, !result.is_error, &raw, &result.content);
        self.loop_detector.lock().record_result(&result.content);

        if let Some(warning) = check.warning {
            result = result.with_metadata("warning", Value::String(warning));
        }
        debug!(
            tool = name,
            success = !result.is_error,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool call finished"
        );
        attach_loop(result, &loop_check).with_call_id(&call.id)
    }

    /// 호출을 감지기에 기록하고 판정
    fn observe_call(&self, name: &str, args: &Value) -> LoopCheck {
        let destructive = self.guard.is_destructive(name);
        let loop_check = self.loop_detector.lock().check(name, args, destructive);
        if !loop_check.is_none() {
            warn!(
                tool = name,
                severity = ?loop_check.severity,
                pattern = ?loop_check.pattern,
                streak = loop_check.streak,
                "loop detected"
            );
        }
        loop_check
    }

    /// 핸들러까지 가지 못한 호출의 마무리
    fn finish_early(&self, name: &str, args: &Value, result: ToolResult) -> ToolResult {
        let loop_check = self.observe_call(name, args);
        self.loop_detector.lock().record_result(&result.content);
        attach_loop(result, &loop_check)
    }

    /// 확인 흐름 시작. 호출자는 즉시 대기 결과를 받는다.
    fn start_confirmation(
        &self,
        ctx: &CallContext,
        identity: &CallerIdentity,
        tool: &RegisteredTool,
        args: ToolArgs,
        raw: Value,
        config: &ExecutorConfig,
    ) -> ToolResult {
        let name = tool.definition.name.clone();

        let Some(approval) = self.approval.read().clone() else {
            let e = Error::NoApprovalHandler(name.clone());
            warn!(tool = %name, "confirmation required but no approval handler configured");
            let result = render_error(&name, &e, config.max_error_chars);
            self.guard
                .record_execution(&name, identity, false, &raw, &result.content);
            return result;
        };

        let notifier = self.notifier.read().clone();
        let guard = self.guard.clone();
        let handler = tool.handler.clone();
        let identity = identity.clone();
        let target = ctx
            .delivery_target()
            .unwrap_or_else(|| DeliveryTarget::from_identity(&identity));
        let wait = Duration::from_secs(config.confirmation_timeout_secs.max(1));
        let max_output = config.max_output_chars;
        let max_error = config.max_error_chars;

        let mut call_ctx = CallContext::new()
            .with_identity(identity.clone())
            .with_cancel(CancellationToken::new())
            .with_abort(self.abort_signal())
            .with_spawn_depth(ctx.spawn_depth)
            .with_origin(target.clone());
        call_ctx.run_id = ctx.run_id.clone();

        let request = ApprovalRequest {
            session_id: identity.session_id.clone(),
            caller_jid: identity.caller_jid.clone(),
            tool: name.clone(),
            args: raw.clone(),
        };

        info!(tool = %name, caller = %identity.caller_jid, "awaiting approval");
        let task_name = name.clone();
        tokio::spawn(async move {
            let name = task_name;
            let notify = |message: String| {
                let notifier = notifier.clone();
                let target = target.clone();
                async move {
                    if let Some(notifier) = notifier {
                        notifier.notify(&target, &message).await;
                    }
                }
            };

            let denial = match tokio::time::timeout(wait, approval.request_approval(request)).await {
                Ok(Ok(true)) => None,
                Ok(Ok(false)) => Some(Error::ConfirmationDenied(name.clone())),
                Ok(Err(e)) => Some(e),
                Err(_) => Some(Error::ConfirmationTimeout(name.clone())),
            };
            if let Some(e) = denial {
                warn!(tool = %name, reason = %e, "approval not granted");
                guard.record_execution(&name, &identity, false, &raw, &e.to_string());
                notify(format!("{} was not executed: {}", name, e)).await;
                return;
            }

            info!(tool = %name, "approved, executing");
            let result = match run_handler(handler, call_ctx, args, &name, wait).await {
                Ok(output) => render_output(&name, output, max_output),
                Err(e) => render_error(&name, &e, max_error),
            };
            guard.record_execution(&name, &identity, !result.is_error, &raw, &result.content);

            let message = if result.is_error {
                format!("{} failed after approval:\n{}", name, result.user_content())
            } else {
                format!("{} completed:\n{}", name, result.user_content())
            };
            notify(message).await;
        });

        ToolResult::dual(
            json!({"status": "pending_approval", "tool": name}).to_string(),
            format!(
                "{} requires approval; the result will be delivered when it completes",
                name
            ),
        )
        .with_tool(name)
        .asynchronous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::handler::handler_fn;
    use async_trait::async_trait;
    use sentinel_foundation::{
        DestructiveConfig, GuardConfig, MemoryAuditSink, ProfileConfig, ToolPermission,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn executor_with(config: GuardConfig, exec: ExecutorConfig) -> ToolExecutor {
        let guard = ToolGuard::new(config, DestructiveConfig::default()).unwrap();
        ToolExecutor::new(Arc::new(guard), exec, LoopDetectionConfig::default())
    }

    fn executor() -> ToolExecutor {
        executor_with(
            GuardConfig {
                workspace_root: Some("/nonexistent-sentinel-ws".to_string()),
                ..Default::default()
            },
            ExecutorConfig::default(),
        )
    }

    fn user_ctx() -> CallContext {
        CallContext::new().with_identity(CallerIdentity::new("s1", "alice", AccessLevel::User))
    }

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition::new(
            name,
            "test tool",
            json!({"type": "object", "properties": {"ms": {"type": "integer"}}}),
        )
    }

    /// 인자 `ms` 만큼 잠든 뒤 자기 이름 + ms 반환, 동시 실행 수 추적
    fn sleeper(active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> impl ToolHandler {
        handler_fn(move |_ctx, args| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let ms = args.i64("ms").unwrap_or(0) as u64;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(ToolOutput::Text(format!("slept {}", ms)))
            }
        })
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::with_json(id, name, &args)
    }

    #[tokio::test]
    async fn test_parallel_preserves_input_order() {
        let exec = executor();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        exec.register(def("fetch"), sleeper(active.clone(), peak.clone()))
            .unwrap();

        let calls = vec![
            call("1", "fetch", json!({"ms": 80})),
            call("2", "fetch", json!({"ms": 10})),
            call("3", "fetch", json!({"ms": 40})),
        ];
        let results = exec.execute(&user_ctx(), &calls).await;
        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(results[0].content, "slept 80");
        assert_eq!(results[1].content, "slept 10");
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_parallel_bounded_by_max_parallel() {
        let exec = executor_with(
            GuardConfig::default(),
            ExecutorConfig {
                max_parallel: 2,
                ..Default::default()
            },
        );
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        exec.register(def("fetch"), sleeper(active, peak.clone()))
            .unwrap();

        let calls: Vec<ToolCall> = (0..6)
            .map(|i| call(&i.to_string(), "fetch", json!({"ms": 30})))
            .collect();
        exec.execute(&user_ctx(), &calls).await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_order_sensitive_batch_runs_sequentially() {
        let exec = executor();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        exec.register(def("fetch"), sleeper(active.clone(), peak.clone()))
            .unwrap();
        exec.register(
            def("deploy").order_sensitive(),
            sleeper(active.clone(), peak.clone()),
        )
        .unwrap();

        let calls = vec![
            call("1", "fetch", json!({"ms": 20})),
            call("2", "deploy", json!({"ms": 20})),
            call("3", "fetch", json!({"ms": 20})),
        ];
        let results = exec.execute(&user_ctx(), &calls).await;
        assert_eq!(results.len(), 3);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_malformed_args_skip_handler() {
        let exec = executor();
        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = invoked.clone();
        exec.register(
            def("fetch"),
            handler_fn(move |_ctx, _args| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ToolOutput::from("ok"))
                }
            }),
        )
        .unwrap();

        let unknown = exec
            .execute_single(&user_ctx(), &ToolCall::new("a", "nope", "{}"))
            .await;
        assert!(unknown.is_error);
        assert!(unknown.content.contains("unknown tool: nope"));

        let malformed = exec
            .execute_single(&user_ctx(), &ToolCall::new("b", "fetch", "{oops"))
            .await;
        assert!(malformed.is_error);

        let mistyped = exec
            .execute_single(&user_ctx(), &ToolCall::new("c", "fetch", r#"{"ms":"soon"}"#))
            .await;
        assert!(mistyped.is_error);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_is_structured() {
        let mut config = GuardConfig::default();
        config
            .permissions
            .insert("bash".to_string(), ToolPermission::Owner);
        let exec = executor_with(config, ExecutorConfig::default());
        exec.register(
            ToolDefinition::new("bash", "shell", json!({})),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("ran")) }),
        )
        .unwrap();

        let result = exec
            .execute_single(&user_ctx(), &call("1", "bash", json!({"command": "ls"})))
            .await;
        let v: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["tool"], "bash");
        assert_eq!(
            v["error"],
            "access denied: requires owner access (you have user)"
        );
    }

    #[tokio::test]
    async fn test_default_identity_used_without_request_identity() {
        let mut config = GuardConfig::default();
        config
            .permissions
            .insert("admin_tool".to_string(), ToolPermission::Admin);
        let exec = executor_with(config, ExecutorConfig::default());
        exec.register(
            ToolDefinition::new("admin_tool", "", json!({})),
            handler_fn(|ctx: CallContext, _args| async move {
                let caller = ctx.identity.map(|i| i.caller_jid).unwrap_or_default();
                Ok(ToolOutput::Text(caller))
            }),
        )
        .unwrap();

        let denied = exec
            .execute_single(&CallContext::new(), &ToolCall::new("1", "admin_tool", ""))
            .await;
        assert!(denied.is_error);

        exec.set_default_identity(CallerIdentity::new("svc", "cron", AccessLevel::Admin));
        let ok = exec
            .execute_single(&CallContext::new(), &ToolCall::new("2", "admin_tool", ""))
            .await;
        assert_eq!(ok.content, "cron");
    }

    #[tokio::test]
    async fn test_handler_error_and_panic() {
        let exec = executor();
        exec.register(
            def("broken"),
            handler_fn(|_ctx, _args| async { Err(Error::handler("broken", "disk full")) }),
        )
        .unwrap();
        exec.register(
            def("panics"),
            handler_fn(|_ctx, _args| async {
                if true {
                    panic!("boom");
                }
                Ok(ToolOutput::from("unreachable"))
            }),
        )
        .unwrap();

        let broken = exec
            .execute_single(&user_ctx(), &ToolCall::new("1", "broken", ""))
            .await;
        let v: Value = serde_json::from_str(&broken.content).unwrap();
        assert_eq!(v["error"], "broken failed: disk full");

        let panicked = exec
            .execute_single(&user_ctx(), &ToolCall::new("2", "panics", ""))
            .await;
        assert!(panicked.is_error);
        assert!(panicked.content.contains("handler panicked"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let exec = executor_with(
            GuardConfig::default(),
            ExecutorConfig {
                default_timeout_secs: 1,
                ..Default::default()
            },
        );
        let observed = Arc::new(Notify::new());
        let signal = observed.clone();
        exec.register(
            def("slow"),
            handler_fn(move |ctx: CallContext, _args| {
                let signal = signal.clone();
                async move {
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => signal.notify_one(),
                        _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                    }
                    Ok(ToolOutput::from("late"))
                }
            }),
        )
        .unwrap();

        let result = exec
            .execute_single(&user_ctx(), &ToolCall::new("1", "slow", ""))
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("slow timed out after 1s"));
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let exec = executor();
        exec.register(
            def("wait"),
            handler_fn(|_ctx, _args| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ToolOutput::from("done"))
            }),
        )
        .unwrap();

        let ctx = user_ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let result = exec
            .execute_single(&ctx, &ToolCall::new("1", "wait", ""))
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("Cancelled"));
    }

    #[tokio::test]
    async fn test_output_capped() {
        let exec = executor_with(
            GuardConfig::default(),
            ExecutorConfig {
                max_output_chars: 50,
                ..Default::default()
            },
        );
        exec.register(
            def("dump"),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::Text("z".repeat(500))) }),
        )
        .unwrap();
        let result = exec
            .execute_single(&user_ctx(), &ToolCall::new("1", "dump", ""))
            .await;
        assert!(!result.is_error);
        assert!(result
            .content
            .ends_with("[output truncated: showing first 50 of 500 characters]"));
    }

    struct RewriteHook;

    #[async_trait]
    impl ToolHook for RewriteHook {
        fn name(&self) -> &str {
            "rewrite"
        }

        async fn before_tool(&self, _ctx: &CallContext, tool: &str, args: &ToolArgs) -> HookDecision {
            if tool == "dump" {
                return HookDecision::Block("dump disabled".to_string());
            }
            let mut args = args.clone();
            args.insert("ms", 7i64);
            HookDecision::Modify(args)
        }
    }

    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl ToolHook for CountingHook {
        fn name(&self) -> &str {
            "count"
        }

        async fn after_tool(
            &self,
            _ctx: &CallContext,
            _tool: &str,
            _args: &ToolArgs,
            _output: &str,
            _error: Option<&str>,
        ) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_hooks_modify_and_block() {
        let exec = executor();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        exec.register(def("fetch"), sleeper(active, peak)).unwrap();
        exec.register(
            def("dump"),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("dumped")) }),
        )
        .unwrap();
        let counter = Arc::new(CountingHook(AtomicUsize::new(0)));
        exec.add_hook(Arc::new(RewriteHook));
        exec.add_hook(counter.clone());

        let fetched = exec
            .execute_single(&user_ctx(), &call("1", "fetch", json!({"ms": 1})))
            .await;
        assert_eq!(fetched.content, "slept 7");

        let blocked = exec
            .execute_single(&user_ctx(), &ToolCall::new("2", "dump", ""))
            .await;
        assert!(blocked.is_error);
        assert!(blocked.content.contains("blocked by hook: dump disabled"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    struct FixedApproval(bool);

    #[async_trait]
    impl ApprovalHandler for FixedApproval {
        async fn request_approval(&self, _request: ApprovalRequest) -> Result<bool> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<(String, String)>>,
        notify: Notify,
    }

    #[async_trait]
    impl ProgressNotifier for RecordingNotifier {
        async fn notify(&self, target: &DeliveryTarget, message: &str) {
            self.messages
                .lock()
                .push((target.caller_jid.clone(), message.to_string()));
            self.notify.notify_one();
        }
    }

    fn confirming_executor() -> ToolExecutor {
        let mut config = GuardConfig::default();
        config.require_confirmation.push("deploy".to_string());
        let exec = executor_with(config, ExecutorConfig::default());
        exec.register(
            def("deploy"),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("deployed v2")) }),
        )
        .unwrap();
        exec
    }

    #[tokio::test]
    async fn test_confirmation_without_handler_fails_closed() {
        let exec = confirming_executor();
        let result = exec
            .execute_single(&user_ctx(), &ToolCall::new("1", "deploy", ""))
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("no approval handler"));
    }

    #[tokio::test]
    async fn test_confirmation_approved_delivers_result() {
        let exec = confirming_executor();
        let notifier = Arc::new(RecordingNotifier::default());
        exec.set_approval_handler(Arc::new(FixedApproval(true)));
        exec.set_notifier(notifier.clone());

        let pending = exec
            .execute_single(&user_ctx(), &ToolCall::new("1", "deploy", ""))
            .await;
        assert!(pending.is_async);
        assert!(!pending.is_error);
        assert!(pending.llm_content().contains("pending_approval"));

        tokio::time::timeout(Duration::from_secs(5), notifier.notify.notified())
            .await
            .unwrap();
        let messages = notifier.messages.lock().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "alice");
        assert!(messages[0].1.contains("deployed v2"));
    }

    #[tokio::test]
    async fn test_confirmation_denied_notifies() {
        let exec = confirming_executor();
        let notifier = Arc::new(RecordingNotifier::default());
        let sink = Arc::new(MemoryAuditSink::new());
        exec.guard().set_audit_sink(sink.clone());
        exec.set_approval_handler(Arc::new(FixedApproval(false)));
        exec.set_notifier(notifier.clone());

        let pending = exec
            .execute_single(&user_ctx(), &ToolCall::new("1", "deploy", ""))
            .await;
        assert!(pending.is_async);

        tokio::time::timeout(Duration::from_secs(5), notifier.notify.notified())
            .await
            .unwrap();
        let messages = notifier.messages.lock().clone();
        assert!(messages[0].1.contains("confirmation denied for deploy"));
        assert!(sink.entries().iter().any(|e| e.tag() == "FAILED"));
    }

    #[tokio::test]
    async fn test_owner_skips_confirmation() {
        let exec = confirming_executor();
        let ctx = CallContext::new().with_identity(CallerIdentity::new("s", "root", AccessLevel::Owner));
        let result = exec
            .execute_single(&ctx, &ToolCall::new("1", "deploy", ""))
            .await;
        assert!(!result.is_async);
        assert_eq!(result.content, "deployed v2");
    }

    #[tokio::test]
    async fn test_loop_metadata_attached() {
        let exec = executor();
        exec.register(
            def("poll"),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("not yet")) }),
        )
        .unwrap();
        let mut last = ToolResult::default();
        for i in 0..5 {
            last = exec
                .execute_single(&user_ctx(), &ToolCall::new(i.to_string(), "poll", "{}"))
                .await;
        }
        let meta = last.metadata.get("loop").unwrap();
        assert_eq!(meta["severity"], "warning");
        assert_eq!(meta["pattern"], "repeat");

        exec.reset_run();
        let fresh = exec
            .execute_single(&user_ctx(), &ToolCall::new("x", "poll", "{}"))
            .await;
        assert!(fresh.metadata.get("loop").is_none());
    }

    #[tokio::test]
    async fn test_abort_signal_reaches_handler() {
        let exec = executor();
        exec.register(
            def("check_abort"),
            handler_fn(|ctx: CallContext, _args| async move {
                Ok(ToolOutput::Text(ctx.abort.is_raised().to_string()))
            }),
        )
        .unwrap();
        exec.abort();
        let raised = exec
            .execute_single(&user_ctx(), &ToolCall::new("1", "check_abort", ""))
            .await;
        assert_eq!(raised.content, "true");

        exec.reset_run();
        let fresh = exec
            .execute_single(&user_ctx(), &ToolCall::new("2", "check_abort", ""))
            .await;
        assert_eq!(fresh.content, "false");
    }

    #[tokio::test]
    async fn test_derive_child_filters_and_shares_guard() {
        let exec = executor();
        for name in ["read_file", "spawn_subagent"] {
            exec.register(
                ToolDefinition::new(name, "", json!({})),
                handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("ok")) }),
            )
            .unwrap();
        }
        let deny: HashSet<String> = ["spawn_subagent".to_string()].into_iter().collect();
        let child = exec.derive_child(&deny);
        assert_eq!(child.tool_names(), vec!["read_file"]);
        assert!(Arc::ptr_eq(child.guard(), exec.guard()));
        assert_eq!(exec.tool_names().len(), 2);

        let denied = child
            .execute_single(&user_ctx(), &ToolCall::new("1", "spawn_subagent", ""))
            .await;
        assert!(denied.is_error);
    }

    #[tokio::test]
    async fn test_definitions_cache_invalidated() {
        let exec = executor();
        assert!(exec.definitions().is_empty());
        exec.register(
            ToolDefinition::new("a", "", json!({})),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("ok")) }),
        )
        .unwrap();
        assert_eq!(exec.definitions().len(), 1);
        exec.register(
            ToolDefinition::new("a", "updated", json!({})),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("ok")) }),
        )
        .unwrap();
        let defs = exec.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].description, "updated");
    }

    #[test]
    fn test_definitions_current_after_concurrent_registration() {
        let exec = executor();
        std::thread::scope(|scope| {
            for t in 0..4 {
                let exec = &exec;
                scope.spawn(move || {
                    for i in 0..50 {
                        exec.register(
                            ToolDefinition::new(format!("t{}_{}", t, i), "", json!({})),
                            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("ok")) }),
                        )
                        .unwrap();
                        exec.definitions();
                    }
                });
            }
        });
        assert_eq!(exec.definitions().len(), 200);
    }

    #[tokio::test]
    async fn test_profile_denial_audited() {
        let mut config = GuardConfig::default();
        config.profiles.insert(
            "ro".to_string(),
            ProfileConfig {
                allow: vec!["read_file".to_string()],
                deny: vec![],
            },
        );
        let exec = executor_with(config, ExecutorConfig::default());
        let sink = Arc::new(MemoryAuditSink::new());
        exec.guard().set_audit_sink(sink.clone());
        exec.register(
            def("fetch"),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("ran")) }),
        )
        .unwrap();
        exec.set_active_profile(Some("ro".to_string()));

        let result = exec
            .execute_single(&user_ctx(), &call("1", "fetch", json!({})))
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("not allowed by profile ro"));

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tag(), "DENIED");
        assert_eq!(entries[0].tool, "fetch");
    }

    #[tokio::test]
    async fn test_denied_calls_still_detected_as_loop() {
        let mut config = GuardConfig::default();
        config
            .permissions
            .insert("bash".to_string(), ToolPermission::Owner);
        let exec = executor_with(config, ExecutorConfig::default());
        exec.register(
            ToolDefinition::new("bash", "shell", json!({})),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("ran")) }),
        )
        .unwrap();

        let first = exec
            .execute_single(&user_ctx(), &call("0", "bash", json!({"command": "ls"})))
            .await;
        assert!(first.metadata.get("loop").is_none());

        let mut last = first;
        for i in 1..12 {
            last = exec
                .execute_single(&user_ctx(), &call(&i.to_string(), "bash", json!({"command": "ls"})))
                .await;
            assert!(last.is_error);
        }
        let meta = last.metadata.get("loop").unwrap();
        assert_eq!(meta["severity"], "breaker");
        assert_eq!(meta["pattern"], "repeat");
        assert_eq!(meta["streak"], 12);
    }

    #[tokio::test]
    async fn test_malformed_payload_repeats_detected() {
        let exec = executor();
        exec.register(
            def("fetch"),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("ok")) }),
        )
        .unwrap();

        let mut last = ToolResult::default();
        for i in 0..12 {
            last = exec
                .execute_single(&user_ctx(), &ToolCall::new(i.to_string(), "fetch", "{oops"))
                .await;
        }
        assert!(last.is_error);
        let meta = last.metadata.get("loop").unwrap();
        assert_eq!(meta["severity"], "breaker");
        assert_eq!(meta["pattern"], "repeat");
    }

    #[tokio::test]
    async fn test_guard_destructive_tag_drives_batch_breaker() {
        let mut config = GuardConfig::default();
        config.destructive_tools.push("drop_bucket".to_string());
        let exec = executor_with(config, ExecutorConfig::default());
        exec.register(
            ToolDefinition::new("drop_bucket", "", json!({})),
            handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("dropped")) }),
        )
        .unwrap();

        for i in 0..2 {
            let result = exec
                .execute_single(&user_ctx(), &call(&i.to_string(), "drop_bucket", json!({"name": i})))
                .await;
            assert!(result.metadata.get("loop").is_none());
        }
        let third = exec
            .execute_single(&user_ctx(), &call("2", "drop_bucket", json!({"name": 2})))
            .await;
        let meta = third.metadata.get("loop").unwrap();
        assert_eq!(meta["severity"], "breaker");
        assert_eq!(meta["pattern"], "destructive_batch");
    }
}
