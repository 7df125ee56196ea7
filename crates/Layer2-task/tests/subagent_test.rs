//! Subagent 통합 테스트 - spawn 제한, 수명 주기, 영속화
//!
//! `cargo test -p sentinel-task --test subagent_test`

use async_trait::async_trait;
use sentinel_core::{handler_fn, ToolExecutor, ToolGuard, ToolOutput};
use sentinel_foundation::storage::INTERRUPTED_BY_RESTART;
use sentinel_foundation::{
    AccessLevel, CallContext, CallerIdentity, DeliveryTarget, DestructiveConfig, Error,
    ExecutorConfig, GuardConfig, LoopDetectionConfig, ProgressNotifier, Result, RunRecord,
    RunStatus, RunStore, SqliteRunStore, SubagentSettings, ToolCall, ToolDefinition,
};
use sentinel_task::{
    register_subagent_tools, AgentLoop, AgentRunOutput, SpawnParams, SubagentManager,
    SubagentSession,
};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Barrier, Notify};

// ============================================================================
// Fixtures
// ============================================================================

struct FnAgent<F>(F);

#[async_trait]
impl<F, Fut> AgentLoop for FnAgent<F>
where
    F: Fn(SubagentSession, Arc<ToolExecutor>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentRunOutput>> + Send + 'static,
{
    async fn run(&self, session: SubagentSession, tools: Arc<ToolExecutor>) -> Result<AgentRunOutput> {
        (self.0)(session, tools).await
    }
}

fn agent<F, Fut>(f: F) -> Arc<dyn AgentLoop>
where
    F: Fn(SubagentSession, Arc<ToolExecutor>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AgentRunOutput>> + Send + 'static,
{
    Arc::new(FnAgent(f))
}

/// 프롬프트의 작업 내용을 그대로 보고
fn echo_agent() -> Arc<dyn AgentLoop> {
    agent(|session, _tools| async move {
        Ok(AgentRunOutput::new(format!("done: {}", session.prompt.lines().last().unwrap_or(""))).with_tokens(10))
    })
}

/// 취소될 때까지 대기
fn blocking_agent() -> Arc<dyn AgentLoop> {
    agent(|session, _tools| async move {
        session.cancel.cancelled().await;
        Err(Error::Cancelled)
    })
}

/// 자식 레지스트리의 도구 목록 보고
fn listing_agent() -> Arc<dyn AgentLoop> {
    agent(|_session, tools| async move { Ok(AgentRunOutput::new(tools.tool_names().join(","))) })
}

fn executor() -> Arc<ToolExecutor> {
    let guard = ToolGuard::new(GuardConfig::default(), DestructiveConfig::default()).unwrap();
    let executor = ToolExecutor::new(
        Arc::new(guard),
        ExecutorConfig::default(),
        LoopDetectionConfig::default(),
    );
    for name in ["read_file", "bash", "config_update"] {
        executor
            .register(
                ToolDefinition::new(name, "", json!({})),
                handler_fn(|_ctx, _args| async { Ok(ToolOutput::from("ok")) }),
            )
            .unwrap();
    }
    Arc::new(executor)
}

fn manager(agent: Arc<dyn AgentLoop>, settings: SubagentSettings) -> Arc<SubagentManager> {
    let executor = executor();
    let manager = Arc::new(SubagentManager::new(executor.clone(), agent, settings));
    register_subagent_tools(&executor, &manager).unwrap();
    manager
}

#[derive(Default)]
struct RecordingNotifier {
    messages: parking_lot::Mutex<Vec<(DeliveryTarget, String)>>,
    notify: Notify,
}

#[async_trait]
impl ProgressNotifier for RecordingNotifier {
    async fn notify(&self, target: &DeliveryTarget, message: &str) {
        self.messages.lock().push((target.clone(), message.to_string()));
        self.notify.notify_one();
    }
}

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_spawn_and_wait_completes() {
    let manager = manager(echo_agent(), SubagentSettings::default());
    let run = manager
        .spawn(SpawnParams::new("summarize the build log").with_label("summary"))
        .unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.spawn_depth, 1);

    let finished = manager.wait(&run.id, WAIT).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.result.as_deref(), Some("done: summarize the build log"));
    assert_eq!(finished.tokens_used, 10);
    assert!(finished.completed_at.is_some());
    assert_eq!(manager.running_count(), 0);
}

#[tokio::test]
async fn test_wait_deadline_returns_current_state() {
    let manager = manager(blocking_agent(), SubagentSettings::default());
    let run = manager.spawn(SpawnParams::new("watch")).unwrap();

    let snapshot = manager.wait(&run.id, Duration::from_millis(50)).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Running);

    manager.stop(&run.id).unwrap();
    let stopped = manager.wait(&run.id, WAIT).await.unwrap();
    assert_eq!(stopped.status, RunStatus::Failed);
    assert_eq!(stopped.error.as_deref(), Some("stopped"));
}

#[tokio::test]
async fn test_stop_only_while_running() {
    let manager = manager(echo_agent(), SubagentSettings::default());
    let run = manager.spawn(SpawnParams::new("quick")).unwrap();
    manager.wait(&run.id, WAIT).await.unwrap();

    let err = manager.stop(&run.id).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert!(matches!(manager.stop("missing").unwrap_err(), Error::NotFound(_)));
}

#[tokio::test]
async fn test_timeout_finalizes_as_failure() {
    let slow = agent(|_session, _tools| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(AgentRunOutput::new("late"))
    });
    let manager = manager(slow, SubagentSettings::default());
    let run = manager
        .spawn(SpawnParams::new("slow task").with_timeout_secs(1))
        .unwrap();

    let finished = manager.wait(&run.id, WAIT).await.unwrap();
    assert_eq!(finished.status, RunStatus::Timeout);
    assert!(finished.status.is_failure());
    assert_eq!(finished.error.as_deref(), Some("timed out after 1s"));
}

#[tokio::test]
async fn test_agent_error_and_panic() {
    let failing = agent(|_session, _tools| async { Err(Error::Internal("model unavailable".into())) });
    let manager_a = manager(failing, SubagentSettings::default());
    let run = manager_a.spawn(SpawnParams::new("x")).unwrap();
    let finished = manager_a.wait(&run.id, WAIT).await.unwrap();
    assert_eq!(finished.status, RunStatus::Failed);
    assert!(finished.error.unwrap().contains("model unavailable"));

    let panicking = agent(|_session, _tools| async {
        if true {
            panic!("boom");
        }
        Ok(AgentRunOutput::default())
    });
    let manager_b = manager(panicking, SubagentSettings::default());
    let run = manager_b.spawn(SpawnParams::new("y")).unwrap();
    let finished = manager_b.wait(&run.id, WAIT).await.unwrap();
    assert_eq!(finished.status, RunStatus::Failed);
    assert_eq!(finished.error.as_deref(), Some("agent loop panicked"));
}

#[tokio::test]
async fn test_parent_cancellation_stops_run() {
    let manager = manager(blocking_agent(), SubagentSettings::default());
    let ctx = CallContext::new().with_identity(CallerIdentity::new("s1", "alice", AccessLevel::User));
    let run = manager
        .spawn(SpawnParams::from_context("follow parent", &ctx))
        .unwrap();

    ctx.cancel.cancel();
    let finished = manager.wait(&run.id, WAIT).await.unwrap();
    assert_eq!(finished.status, RunStatus::Failed);
}

// ============================================================================
// Limits
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_spawns_admit_exactly_k() {
    let settings = SubagentSettings {
        max_concurrent: 3,
        max_children: 100,
        ..Default::default()
    };
    let manager = manager(blocking_agent(), settings);
    let barrier = Arc::new(Barrier::new(10));

    let mut handles = Vec::new();
    for i in 0..10 {
        let manager = manager.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            manager.spawn(SpawnParams::new(format!("task {}", i)))
        }));
    }

    let mut admitted = Vec::new();
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(run) => admitted.push(run.id),
            Err(Error::ConcurrencyLimitExceeded { max }) => {
                assert_eq!(max, 3);
                rejected += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(admitted.len(), 3);
    assert_eq!(rejected, 7);
    assert_eq!(manager.running_count(), 3);
    assert_eq!(manager.list().len(), 3);

    for id in &admitted {
        manager.stop(id).unwrap();
    }
    for id in &admitted {
        manager.wait(id, WAIT).await.unwrap();
    }
    assert_eq!(manager.running_count(), 0);
    assert!(manager.spawn(SpawnParams::new("after")).is_ok());
}

#[tokio::test]
async fn test_depth_rejected_before_resources() {
    let store = Arc::new(SqliteRunStore::in_memory().unwrap());
    let executor = executor();
    let manager = Arc::new(
        SubagentManager::new(executor, echo_agent(), SubagentSettings::default())
            .with_store(store.clone()),
    );

    let err = manager
        .spawn(SpawnParams::new("nested").with_parent_depth(1))
        .unwrap_err();
    assert!(matches!(err, Error::SpawnDepthExceeded { depth: 2, max: 1 }));
    assert!(manager.list().is_empty());
    assert!(store.running().unwrap().is_empty());
    assert!(store.recent(1).unwrap().is_empty());
}

#[tokio::test]
async fn test_max_children_per_parent() {
    let settings = SubagentSettings {
        max_children: 1,
        ..Default::default()
    };
    let manager = manager(blocking_agent(), settings);
    let ctx = CallContext::new().with_identity(CallerIdentity::new("s1", "alice", AccessLevel::User));

    let first = manager.spawn(SpawnParams::from_context("a", &ctx)).unwrap();
    let err = manager.spawn(SpawnParams::from_context("b", &ctx)).unwrap_err();
    assert!(matches!(err, Error::ChildLimitExceeded { max: 1 }));

    let other = CallContext::new().with_identity(CallerIdentity::new("s2", "bob", AccessLevel::User));
    let second = manager.spawn(SpawnParams::from_context("c", &other)).unwrap();
    assert_eq!(manager.list_children("s1").len(), 1);

    manager.stop(&first.id).unwrap();
    manager.stop(&second.id).unwrap();
}

// ============================================================================
// Child registry
// ============================================================================

#[tokio::test]
async fn test_child_registry_filtered() {
    let settings = SubagentSettings {
        denied_tools: vec!["group:runtime".to_string()],
        ..Default::default()
    };
    let manager = manager(listing_agent(), settings);
    let run = manager.spawn(SpawnParams::new("inspect")).unwrap();
    let finished = manager.wait(&run.id, WAIT).await.unwrap();

    assert_eq!(finished.result.as_deref(), Some("read_file"));
    let parent_tools = manager.executor().tool_names();
    assert!(parent_tools.contains(&"bash".to_string()));
    assert!(parent_tools.contains(&"spawn_subagent".to_string()));
}

#[tokio::test]
async fn test_nested_spawn_within_depth() {
    let nested = agent(|session, tools| async move {
        if session.depth == 1 {
            let ctx = session.call_context();
            let call = ToolCall::with_json("c1", "spawn_subagent", &json!({"task": "leaf work"}));
            let result = tools.execute_single(&ctx, &call).await;
            Ok(AgentRunOutput::new(result.content))
        } else {
            Ok(AgentRunOutput::new(tools.tool_names().join(",")))
        }
    });
    let settings = SubagentSettings {
        max_spawn_depth: 2,
        ..Default::default()
    };
    let manager = manager(nested, settings);
    let run = manager.spawn(SpawnParams::new("delegate")).unwrap();
    let finished = manager.wait(&run.id, WAIT).await.unwrap();

    let spawned: Value = serde_json::from_str(finished.result.as_deref().unwrap()).unwrap();
    assert_eq!(spawned["depth"], 2);
    let child_id = spawned["runId"].as_str().unwrap().to_string();

    let child = manager.wait(&child_id, WAIT).await.unwrap();
    assert_eq!(child.status, RunStatus::Completed);
    assert_eq!(child.parent_run_id.as_deref(), Some(run.id.as_str()));
    let leaf_tools = child.result.unwrap();
    assert!(!leaf_tools.contains("spawn_subagent"));
    assert!(!leaf_tools.contains("config_update"));

    let parent = manager.get(&run.id).unwrap().unwrap();
    assert_eq!(parent.children, 1);
}

// ============================================================================
// Tools / notifications
// ============================================================================

#[tokio::test]
async fn test_spawn_and_wait_via_tools() {
    let executor = executor();
    let manager = Arc::new(SubagentManager::new(
        executor.clone(),
        echo_agent(),
        SubagentSettings::default(),
    ));
    register_subagent_tools(&executor, &manager).unwrap();
    let ctx = CallContext::new().with_identity(CallerIdentity::new("s1", "alice", AccessLevel::User));

    let spawned = executor
        .execute_single(
            &ctx,
            &ToolCall::with_json("1", "spawn_subagent", &json!({"task": "count lines", "label": "lines"})),
        )
        .await;
    assert!(!spawned.is_error, "{}", spawned.content);
    let v: Value = serde_json::from_str(&spawned.content).unwrap();
    assert_eq!(v["status"], "running");
    let run_id = v["runId"].as_str().unwrap();

    let waited = executor
        .execute_single(
            &ctx,
            &ToolCall::with_json("2", "wait_subagent", &json!({"run_id": run_id, "timeout_secs": 5})),
        )
        .await;
    let v: Value = serde_json::from_str(&waited.content).unwrap();
    assert_eq!(v["status"], "completed");
    assert_eq!(v["label"], "lines");

    let listed = executor
        .execute_single(&ctx, &ToolCall::with_json("3", "list_subagents", &json!({})))
        .await;
    let v: Value = serde_json::from_str(&listed.content).unwrap();
    assert_eq!(v["runs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_tools_fail_after_manager_dropped() {
    let executor = executor();
    {
        let manager = Arc::new(SubagentManager::new(
            executor.clone(),
            echo_agent(),
            SubagentSettings::default(),
        ));
        register_subagent_tools(&executor, &manager).unwrap();
    }
    let result = executor
        .execute_single(
            &CallContext::new(),
            &ToolCall::with_json("1", "spawn_subagent", &json!({"task": "orphaned"})),
        )
        .await;
    assert!(result.is_error);
    assert!(result.content.contains("no longer available"));
}

#[tokio::test]
async fn test_completion_announced_to_origin() {
    let notifier = Arc::new(RecordingNotifier::default());
    let executor = executor();
    let manager = Arc::new(
        SubagentManager::new(executor, echo_agent(), SubagentSettings::default())
            .with_notifier(notifier.clone()),
    );
    let ctx = CallContext::new().with_identity(CallerIdentity::new("s9", "carol", AccessLevel::User));
    let run = manager
        .spawn(SpawnParams::from_context("fetch status", &ctx).with_label("status"))
        .unwrap();

    tokio::time::timeout(WAIT, notifier.notify.notified()).await.unwrap();
    let messages = notifier.messages.lock().clone();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0.caller_jid, "carol");
    assert_eq!(messages[0].0.session_id, "s9");
    assert!(messages[0].1.starts_with("Subagent 'status' completed"));

    let finished = manager.get(&run.id).unwrap().unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_lifecycle_persisted() {
    let store = Arc::new(SqliteRunStore::in_memory().unwrap());
    let manager = Arc::new(
        SubagentManager::new(executor(), echo_agent(), SubagentSettings::default())
            .with_store(store.clone()),
    );
    let run = manager.spawn(SpawnParams::new("persist me")).unwrap();
    manager.wait(&run.id, WAIT).await.unwrap();

    let record = store.get(&run.id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.task, "persist me");
    assert!(record.completed_at.is_some());

    assert_eq!(manager.cleanup(Duration::ZERO), 1);
    assert!(manager.list().is_empty());
    let reloaded = manager.get(&run.id).unwrap().unwrap();
    assert_eq!(reloaded.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_orphans_recovered_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    {
        let store = SqliteRunStore::open(&path).unwrap();
        store
            .upsert(&RunRecord {
                id: "orphan-1".to_string(),
                label: "crashed".to_string(),
                task: "long job".to_string(),
                status: RunStatus::Running,
                spawn_depth: 1,
                started_at: chrono::Utc::now(),
                ..Default::default()
            })
            .unwrap();
    }

    let store = Arc::new(SqliteRunStore::open(&path).unwrap());
    let manager = SubagentManager::new(executor(), echo_agent(), SubagentSettings::default())
        .with_store(store.clone());

    let record = store.get("orphan-1").unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error.as_deref(), Some(INTERRUPTED_BY_RESTART));
    assert!(store.running().unwrap().is_empty());

    let run = manager.get("orphan-1").unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(manager.recover_orphans().unwrap(), 0);
}
