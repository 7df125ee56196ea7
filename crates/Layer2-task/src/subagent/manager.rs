//! Sub-agent manager - orchestrates subagent run lifecycle
//!
//! ```text
//! spawn ─▶ depth check ─▶ [lock] running/children check + register [unlock]
//!            │
//!            ▼
//!        persist(running) ─▶ child executor (filtered) ─▶ detached task
//!                                                          │
//!                               slot ─▶ AgentLoop (timeout / stop)
//!                                                          │
//!                              finalize once ─▶ persist ─▶ announce
//! ```

use parking_lot::{Mutex, RwLock};
use sentinel_core::ToolExecutor;
use sentinel_foundation::storage::INTERRUPTED_BY_RESTART;
use sentinel_foundation::{
    AccessLevel, CallerIdentity, Error, ProgressNotifier, Result, RunStatus, RunStore,
    SubagentSettings,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::runner::{build_subagent_prompt, AgentLoop, SubagentSession};
use super::types::{SpawnParams, SubagentRun};

/// Administrative tools never exposed to a child
pub const ADMIN_TOOLS: &[&str] = &[
    "config_update",
    "permissions_update",
    "profile_switch",
    "gateway_restart",
];

/// Spawn-control tools, exposed to a child only while it may still delegate
pub const SPAWN_TOOLS: &[&str] = &[
    "spawn_subagent",
    "wait_subagent",
    "stop_subagent",
    "list_subagents",
];

/// In-memory run slot
struct RunEntry {
    run: SubagentRun,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

/// Sub-agent manager - handles bounded spawning and lifecycle
pub struct SubagentManager {
    /// Parent executor; children are filtered copies of it
    executor: Arc<ToolExecutor>,
    agent: Arc<dyn AgentLoop>,
    store: Option<Arc<dyn RunStore>>,
    settings: RwLock<SubagentSettings>,
    /// Run table; admission check and registration share one critical section
    runs: Mutex<HashMap<String, RunEntry>>,
    /// Execution slots
    slots: Arc<Semaphore>,
    slot_capacity: Mutex<usize>,
    notifier: RwLock<Option<Arc<dyn ProgressNotifier>>>,
}

impl std::fmt::Debug for SubagentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentManager")
            .field("settings", &*self.settings.read())
            .field("runs", &self.runs.lock().len())
            .finish()
    }
}

impl SubagentManager {
    /// Create a new manager without persistence
    pub fn new(
        executor: Arc<ToolExecutor>,
        agent: Arc<dyn AgentLoop>,
        settings: SubagentSettings,
    ) -> Self {
        let capacity = settings.max_concurrent.max(1);
        Self {
            executor,
            agent,
            store: None,
            settings: RwLock::new(settings),
            runs: Mutex::new(HashMap::new()),
            slots: Arc::new(Semaphore::new(capacity)),
            slot_capacity: Mutex::new(capacity),
            notifier: RwLock::new(None),
        }
    }

    /// Attach a run store and reclassify orphaned runs from a previous process
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        if let Err(e) = self.recover_orphans() {
            error!(error = %e, "failed to recover orphaned subagent runs");
        }
        self
    }

    /// Completion announcements (falls back to the executor's notifier)
    pub fn with_notifier(self, notifier: Arc<dyn ProgressNotifier>) -> Self {
        *self.notifier.write() = Some(notifier);
        self
    }

    pub fn set_notifier(&self, notifier: Arc<dyn ProgressNotifier>) {
        *self.notifier.write() = Some(notifier);
    }

    pub fn settings(&self) -> SubagentSettings {
        self.settings.read().clone()
    }

    /// Replace limits. Runs already admitted are not affected.
    pub fn update_settings(&self, settings: SubagentSettings) {
        let target = settings.max_concurrent.max(1);
        {
            let mut capacity = self.slot_capacity.lock();
            if target > *capacity {
                self.slots.add_permits(target - *capacity);
                *capacity = target;
            } else if target < *capacity {
                let removed = self.slots.forget_permits(*capacity - target);
                *capacity -= removed;
            }
        }
        *self.settings.write() = settings;
        info!("subagent settings updated");
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    // ========================================================================
    // Spawn
    // ========================================================================

    /// Spawn a run. Never blocks; the run proceeds on a detached task.
    pub fn spawn(self: &Arc<Self>, params: SpawnParams) -> Result<SubagentRun> {
        let settings = self.settings();
        let depth = params.parent_depth + 1;
        if depth > settings.max_spawn_depth {
            warn!(
                depth,
                max = settings.max_spawn_depth,
                "subagent spawn rejected: depth"
            );
            return Err(Error::SpawnDepthExceeded {
                depth,
                max: settings.max_spawn_depth,
            });
        }

        let timeout_secs = params.timeout_secs.unwrap_or(settings.timeout_secs).max(1);
        let model = params.model.clone().or_else(|| settings.model.clone());
        let run = SubagentRun::new(&params, depth, model, timeout_secs);
        let cancel = params
            .parent_cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let (done, _) = watch::channel(false);

        {
            let mut runs = self.runs.lock();
            let running = runs.values().filter(|e| e.run.is_running()).count();
            if running >= settings.max_concurrent {
                warn!(
                    running,
                    max = settings.max_concurrent,
                    "subagent spawn rejected: concurrency"
                );
                return Err(Error::ConcurrencyLimitExceeded {
                    max: settings.max_concurrent,
                });
            }
            if let Some(parent) = run.parent_key() {
                let siblings = runs
                    .values()
                    .filter(|e| e.run.is_running() && e.run.parent_key() == Some(parent))
                    .count();
                if siblings >= settings.max_children {
                    warn!(parent, siblings, "subagent spawn rejected: children");
                    return Err(Error::ChildLimitExceeded {
                        max: settings.max_children,
                    });
                }
            }
            if let Some(parent_id) = &run.parent_run_id {
                if let Some(parent) = runs.get_mut(parent_id) {
                    parent.run.children += 1;
                }
            }
            runs.insert(
                run.id.clone(),
                RunEntry {
                    run: run.clone(),
                    cancel: cancel.clone(),
                    done,
                },
            );
        }

        self.persist(&run);

        let deny = self.child_deny_set(depth, &settings);
        let tools = Arc::new(self.executor.derive_child(&deny));

        let session_id = SubagentSession::session_id_for(&run.id);
        let identity = params
            .identity
            .clone()
            .unwrap_or_else(|| CallerIdentity::new(session_id.clone(), "subagent", AccessLevel::User));
        let session = SubagentSession {
            session_id,
            run_id: run.id.clone(),
            depth,
            cancel,
            max_turns: settings.max_turns,
            model: run.model.clone(),
            prompt: build_subagent_prompt(
                &run.task,
                &run.label,
                depth,
                settings.max_spawn_depth,
                settings.max_turns,
            ),
            identity,
            origin: run.origin.clone(),
        };

        info!(
            run_id = %run.id,
            label = %run.label,
            depth,
            tools = tools.tool_names().len(),
            "subagent spawned"
        );
        tokio::spawn(Arc::clone(self).drive(session, tools, Duration::from_secs(timeout_secs)));
        Ok(run)
    }

    /// Names removed from a child registry at `depth`
    pub fn child_deny_set(&self, depth: u32, settings: &SubagentSettings) -> HashSet<String> {
        let mut deny: HashSet<String> = ADMIN_TOOLS.iter().map(|s| s.to_string()).collect();
        deny.extend(self.executor.guard().expand_groups(&settings.denied_tools));
        if depth >= settings.max_spawn_depth {
            deny.extend(SPAWN_TOOLS.iter().map(|s| s.to_string()));
        }
        deny
    }

    async fn drive(self: Arc<Self>, session: SubagentSession, tools: Arc<ToolExecutor>, timeout: Duration) {
        let run_id = session.run_id.clone();
        let cancel = session.cancel.clone();

        let permit = tokio::select! {
            permit = self.slots.clone().acquire_owned() => permit.ok(),
            _ = cancel.cancelled() => None,
        };
        let Some(_permit) = permit else {
            self.finalize(&run_id, RunStatus::Failed, None, Some("stopped before start".to_string()), 0)
                .await;
            return;
        };

        debug!(run_id = %run_id, timeout_secs = timeout.as_secs(), "subagent started");
        let agent = self.agent.clone();
        let mut task = tokio::spawn(async move { agent.run(session, tools).await });

        let (status, result, err, tokens) = tokio::select! {
            joined = &mut task => match joined {
                Ok(Ok(output)) => (RunStatus::Completed, Some(output.text), None, output.tokens_used),
                Ok(Err(e)) => (RunStatus::Failed, None, Some(e.to_string()), 0),
                Err(e) if e.is_panic() => {
                    (RunStatus::Failed, None, Some("agent loop panicked".to_string()), 0)
                }
                Err(_) => (RunStatus::Failed, None, Some("stopped".to_string()), 0),
            },
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                task.abort();
                (
                    RunStatus::Timeout,
                    None,
                    Some(format!("timed out after {}s", timeout.as_secs())),
                    0,
                )
            }
            _ = cancel.cancelled() => {
                task.abort();
                (RunStatus::Failed, None, Some("stopped".to_string()), 0)
            }
        };

        self.finalize(&run_id, status, result, err, tokens).await;
    }

    /// Terminal transition, persistence, announcement. Runs at most once per run.
    async fn finalize(
        &self,
        run_id: &str,
        status: RunStatus,
        result: Option<String>,
        err: Option<String>,
        tokens: u64,
    ) {
        let run = {
            let mut runs = self.runs.lock();
            let Some(entry) = runs.get_mut(run_id) else {
                return;
            };
            if !entry.run.finish(status, result, err, tokens) {
                return;
            }
            entry.done.send_replace(true);
            entry.run.clone()
        };

        self.persist(&run);
        match run.status {
            RunStatus::Completed => info!(
                run_id = %run.id,
                duration_ms = run.duration_ms.unwrap_or(0),
                tokens = run.tokens_used,
                "subagent completed"
            ),
            _ => warn!(
                run_id = %run.id,
                status = %run.status,
                error = run.error.as_deref().unwrap_or(""),
                "subagent finished unsuccessfully"
            ),
        }

        let notifier = self.notifier.read().clone().or_else(|| self.executor.notifier());
        if let (Some(notifier), Some(origin)) = (notifier, run.origin.as_ref()) {
            notifier.notify(origin, &run.announcement()).await;
        }
    }

    fn persist(&self, run: &SubagentRun) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert(&run.to_record()) {
                error!(run_id = %run.id, error = %e, "failed to persist subagent run");
            }
        }
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Block until the run finishes or `deadline` elapses.
    ///
    /// Returns the best-known state either way.
    pub async fn wait(&self, run_id: &str, deadline: Duration) -> Result<SubagentRun> {
        let subscribed = {
            let runs = self.runs.lock();
            match runs.get(run_id) {
                Some(entry) if entry.run.status.is_terminal() => return Ok(entry.run.clone()),
                Some(entry) => Some(entry.done.subscribe()),
                None => None,
            }
        };
        let Some(mut done) = subscribed else {
            return self
                .get_persisted(run_id)?
                .ok_or_else(|| Error::NotFound(format!("subagent run {}", run_id)));
        };

        if tokio::time::timeout(deadline, done.wait_for(|finished| *finished))
            .await
            .is_err()
        {
            debug!(run_id, "wait deadline elapsed; returning current state");
        }
        self.get(run_id)?
            .ok_or_else(|| Error::NotFound(format!("subagent run {}", run_id)))
    }

    /// Cancel a running run. The run finalizes as `failed: stopped`.
    pub fn stop(&self, run_id: &str) -> Result<SubagentRun> {
        let runs = self.runs.lock();
        let entry = runs
            .get(run_id)
            .ok_or_else(|| Error::NotFound(format!("subagent run {}", run_id)))?;
        if !entry.run.is_running() {
            return Err(Error::InvalidState(format!(
                "subagent run {} is not running ({})",
                run_id, entry.run.status
            )));
        }
        entry.cancel.cancel();
        info!(run_id, "subagent stop requested");
        Ok(entry.run.clone())
    }

    /// Memory first, then the store
    pub fn get(&self, run_id: &str) -> Result<Option<SubagentRun>> {
        if let Some(entry) = self.runs.lock().get(run_id) {
            return Ok(Some(entry.run.clone()));
        }
        self.get_persisted(run_id)
    }

    fn get_persisted(&self, run_id: &str) -> Result<Option<SubagentRun>> {
        match &self.store {
            Some(store) => Ok(store.get(run_id)?.map(SubagentRun::from_record)),
            None => Ok(None),
        }
    }

    /// In-memory runs, newest first
    pub fn list(&self) -> Vec<SubagentRun> {
        let mut runs: Vec<SubagentRun> = self.runs.lock().values().map(|e| e.run.clone()).collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    /// Runs spawned by a parent run or session
    pub fn list_children(&self, parent: &str) -> Vec<SubagentRun> {
        self.list()
            .into_iter()
            .filter(|r| r.parent_key() == Some(parent))
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.runs.lock().values().filter(|e| e.run.is_running()).count()
    }

    /// Finished runs from the store (falls back to memory without a store)
    pub fn recent(&self, days: u32) -> Result<Vec<SubagentRun>> {
        match &self.store {
            Some(store) => Ok(store
                .recent(days)?
                .into_iter()
                .map(SubagentRun::from_record)
                .collect()),
            None => Ok(self
                .list()
                .into_iter()
                .filter(|r| r.status.is_terminal())
                .collect()),
        }
    }

    /// Evict finished runs older than `max_age` from memory. Persisted rows stay.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = chrono::Utc::now() - max_age;
        let mut runs = self.runs.lock();
        let before = runs.len();
        runs.retain(|_, e| match e.run.completed_at {
            Some(done) => done > cutoff,
            None => true,
        });
        let removed = before - runs.len();
        if removed > 0 {
            debug!(removed, "evicted finished subagent runs");
        }
        removed
    }

    /// Reclassify persisted `running` rows left by a previous process
    pub fn recover_orphans(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let live: HashSet<String> = self.runs.lock().keys().cloned().collect();
        let mut recovered = 0;
        for mut record in store.running()? {
            if live.contains(&record.id) {
                continue;
            }
            record.status = RunStatus::Failed;
            record.error = Some(INTERRUPTED_BY_RESTART.to_string());
            record.completed_at = Some(chrono::Utc::now());
            store.upsert(&record)?;
            recovered += 1;
            warn!(run_id = %record.id, label = %record.label, "orphaned subagent run marked failed");
        }
        if recovered > 0 {
            info!(recovered, "recovered orphaned subagent runs");
        }
        Ok(recovered)
    }
}
