//! Guard - 도구 호출 권한 / 정책 엔진
//!
//! 한 번의 판정은 다음 순서로 진행된다:
//!
//! ```text
//! auto-approve ──▶ 통과
//!      │
//!      ▼
//! DestructiveTracker (쿨다운 / 속도 제한 / 배치 경고)
//!      │
//!      ▼
//! 확인 필요 여부 (owner, 읽기 전용 셸 명령은 생략)
//!      │
//!      ▼
//! 권한 레벨 ──▶ 셸 명령 검사 ──▶ SSH 호스트 ──▶ 보호 경로
//! ```
//!
//! 모든 허용/거부 판정은 AuditSink 에 기록된다.
//! 설정은 `update_config` 로 hot-reload 되며, 패턴 컴파일 실패 시 이전 설정이 유지된다.

mod command;
mod destructive;
mod paths;
mod profile;
mod ssh;

pub use command::{
    has_unquoted_redirect, is_read_only_command, leading_program, split_segments, CommandFlags,
    CommandPolicy, DangerousPattern, READ_ONLY_PROGRAMS,
};
pub use destructive::{DestructiveTracker, DestructiveVerdict};
pub use paths::{expand_home, normalize_path, resolve_path, ProtectedPaths};
pub use profile::ProfileSet;
pub use ssh::{extract_hosts, parse_host_spec, HostAllowlist};

use parking_lot::RwLock;
use sentinel_foundation::{
    AccessLevel, AuditEntry, AuditSink, CallerIdentity, DenialKind, DestructiveConfig, Error,
    GuardConfig, Result, ToolCheckResult,
};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// 셸 명령 인자 키
const COMMAND_KEYS: &[&str] = &["command", "cmd"];

/// 파일 경로 인자 키
const PATH_KEYS: &[&str] = &["path", "file_path", "filePath", "file", "directory"];

/// 컴파일된 Guard 상태 (설정 교체 단위)
#[derive(Debug)]
struct GuardState {
    config: GuardConfig,
    commands: CommandPolicy,
    paths: ProtectedPaths,
    hosts: HostAllowlist,
    profiles: ProfileSet,
}

impl GuardState {
    fn compile(config: GuardConfig) -> Result<Self> {
        Ok(Self {
            commands: CommandPolicy::new(&config.custom_patterns)?,
            paths: ProtectedPaths::new(&config.protected_paths)?,
            hosts: HostAllowlist::new(&config.ssh_allowed_hosts),
            profiles: ProfileSet::new(&config),
            config,
        })
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags {
            allow_destructive: self.config.allow_destructive,
            sudo_owner_only: self.config.sudo_owner_only,
            allow_reboot: self.config.allow_reboot,
        }
    }

    fn workspace_root(&self) -> PathBuf {
        match &self.config.workspace_root {
            Some(root) => expand_home(root),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }
}

fn listed(list: &[String], tool: &str) -> bool {
    list.iter().any(|t| t == tool)
}

fn string_arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// 도구 호출 정책 엔진
pub struct ToolGuard {
    state: RwLock<GuardState>,
    tracker: DestructiveTracker,
    audit: RwLock<Option<Arc<dyn AuditSink>>>,
}

impl std::fmt::Debug for ToolGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGuard")
            .field("enabled", &self.state.read().config.enabled)
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl ToolGuard {
    /// 패턴 컴파일 실패는 치명적 설정 오류
    pub fn new(config: GuardConfig, destructive: DestructiveConfig) -> Result<Self> {
        Ok(Self {
            state: RwLock::new(GuardState::compile(config)?),
            tracker: DestructiveTracker::new(destructive),
            audit: RwLock::new(None),
        })
    }

    pub fn set_audit_sink(&self, sink: Arc<dyn AuditSink>) {
        *self.audit.write() = Some(sink);
    }

    pub fn config(&self) -> GuardConfig {
        self.state.read().config.clone()
    }

    /// 설정 교체. 실패 시 이전 설정 유지
    pub fn update_config(&self, config: GuardConfig) -> Result<()> {
        let compiled = GuardState::compile(config)?;
        *self.state.write() = compiled;
        debug!("guard configuration reloaded");
        Ok(())
    }

    pub fn update_destructive(&self, config: DestructiveConfig) {
        self.tracker.update_config(config);
    }

    pub fn tracker(&self) -> &DestructiveTracker {
        &self.tracker
    }

    // ========================================================================
    // 도구 분류
    // ========================================================================

    pub fn is_enabled(&self) -> bool {
        self.state.read().config.enabled
    }

    pub fn is_shell_tool(&self, tool: &str) -> bool {
        listed(&self.state.read().config.shell_tools, tool)
    }

    pub fn is_remote_tool(&self, tool: &str) -> bool {
        listed(&self.state.read().config.remote_shell_tools, tool)
    }

    pub fn is_destructive(&self, tool: &str) -> bool {
        listed(&self.state.read().config.destructive_tools, tool)
    }

    /// `group:` 매크로 확장
    pub fn expand_groups(&self, names: &[String]) -> HashSet<String> {
        self.state.read().config.expand_groups(names)
    }

    /// 명령에 매칭되는 위험 패턴 (source, reason)
    pub fn dangerous_matches(&self, command: &str) -> Vec<(String, String)> {
        self.state
            .read()
            .commands
            .matching(command)
            .into_iter()
            .map(|p| (p.source.clone(), p.reason.clone()))
            .collect()
    }

    // ========================================================================
    // 판정
    // ========================================================================

    /// 활성 프로필 검사. 거부는 감사 로그에 기록된다.
    pub fn check_profile(
        &self,
        profile: &str,
        tool: &str,
        identity: &CallerIdentity,
        args: &Value,
    ) -> Result<()> {
        let outcome = {
            let state = self.state.read();
            if !state.config.enabled {
                return Ok(());
            }
            state.profiles.check(profile, tool)
        };
        if let Err(e) = &outcome {
            self.audit(AuditEntry::check(tool, identity, false, args));
            warn!(tool, profile, caller = %identity.caller_jid, reason = %e, "tool call denied");
        }
        outcome
    }

    /// 호출 판정. 거부는 `Error::AccessDenied` 로 반환된다.
    pub fn authorize(
        &self,
        tool: &str,
        identity: &CallerIdentity,
        args: &Value,
    ) -> Result<ToolCheckResult> {
        let outcome = {
            let state = self.state.read();
            if !state.config.enabled {
                return Ok(ToolCheckResult::allowed());
            }
            self.evaluate(&state, tool, identity, args)
        };

        let allowed = outcome.is_ok();
        self.audit(AuditEntry::check(tool, identity, allowed, args));

        match &outcome {
            Ok(result) => debug!(
                tool,
                caller = %identity.caller_jid,
                confirm = result.requires_confirmation,
                "tool call allowed"
            ),
            Err(e) => warn!(
                tool,
                caller = %identity.caller_jid,
                level = %identity.level,
                reason = %e,
                "tool call denied"
            ),
        }
        outcome
    }

    /// 레벨만으로 판정 (요청 스코프 밖, CLI 점검용)
    pub fn check(&self, tool: &str, level: AccessLevel, args: &Value) -> ToolCheckResult {
        let identity = CallerIdentity::new("check", "check", level);
        match self.authorize(tool, &identity, args) {
            Ok(result) => result,
            Err(Error::AccessDenied { reason, .. }) => ToolCheckResult::denied(reason),
            Err(e) => ToolCheckResult::denied(e.to_string()),
        }
    }

    fn evaluate(
        &self,
        state: &GuardState,
        tool: &str,
        identity: &CallerIdentity,
        args: &Value,
    ) -> Result<ToolCheckResult> {
        let config = &state.config;
        let level = identity.level;

        let destructive = listed(&config.destructive_tools, tool);
        if !destructive {
            self.tracker.note_call(tool);
        }

        if listed(&config.auto_approve, tool) {
            return Ok(ToolCheckResult::allowed());
        }

        let mut result = ToolCheckResult::allowed();
        result.requires_confirmation = listed(&config.require_confirmation, tool);

        // 권한 거부 여부와 무관하게 시도는 기록된다
        if destructive {
            match self.tracker.check(tool) {
                DestructiveVerdict::Allow => {}
                DestructiveVerdict::Warn {
                    message,
                    requires_confirmation,
                } => {
                    warn!(tool, streak = self.tracker.streak(), "{}", message);
                    result.warning = Some(message);
                    result.requires_confirmation |= requires_confirmation;
                }
                DestructiveVerdict::Deny(reason) => {
                    return Err(Error::denied(DenialKind::RateLimit, reason));
                }
            }
        }

        let is_shell = listed(&config.shell_tools, tool);
        let is_remote = listed(&config.remote_shell_tools, tool);
        let command = string_arg(args, COMMAND_KEYS);

        if result.requires_confirmation {
            let read_only = is_shell && command.map(is_read_only_command).unwrap_or(false);
            if level == AccessLevel::Owner || read_only {
                result.requires_confirmation = false;
            }
        }

        let permission = config
            .permissions
            .get(tool)
            .copied()
            .unwrap_or(config.default_permission);
        if !permission.allows(level) {
            return Err(Error::denied(
                DenialKind::Permission,
                format!(
                    "requires {} access (you have {})",
                    permission.required_level(),
                    level
                ),
            ));
        }

        if is_shell || is_remote {
            if let Some(command) = command {
                state.commands.evaluate(command, level, state.flags())?;
            }
        }

        if is_remote {
            let hosts = extract_hosts(args);
            if hosts.is_empty() {
                return Err(Error::denied(
                    DenialKind::Host,
                    format!("{} call has no recognizable target host", tool),
                ));
            }
            if let Some(host) = hosts.iter().find(|h| !state.hosts.is_allowed(h)) {
                return Err(Error::denied(
                    DenialKind::Host,
                    format!("host {} is not in the SSH allowlist", host),
                ));
            }
        }

        if config.is_file_tool(tool) {
            if let Some(raw) = string_arg(args, PATH_KEYS) {
                let path = resolve_path(raw, &state.workspace_root());
                let write = listed(&config.file_write_tools, tool);
                state.paths.check(&path, level, write)?;
            }
        }

        Ok(result)
    }

    // ========================================================================
    // 감사
    // ========================================================================

    /// 실행 결과 기록
    pub fn record_execution(
        &self,
        tool: &str,
        identity: &CallerIdentity,
        success: bool,
        args: &Value,
        result: &str,
    ) {
        if !self.is_enabled() {
            return;
        }
        self.audit(AuditEntry::execution(tool, identity, success, args, result));
    }

    fn audit(&self, entry: AuditEntry) {
        let sink = self.audit.read().clone();
        if let Some(sink) = sink {
            sink.record(&entry);
        }
    }
}
