//! Guard / DestructiveTracker 설정
//!
//! 전부 hot-reload 가능하다 (`ToolGuard::update_config`).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::core::ToolPermission;

// ============================================================================
// Pattern / Path / Profile 규칙
// ============================================================================

/// 운영자 추가 위험 명령 패턴
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRule {
    /// 정규식
    pub pattern: String,
    /// 거부 사유
    #[serde(default)]
    pub reason: String,
}

impl PatternRule {
    pub fn new(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

/// 보호 경로 규칙
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedPathRule {
    /// 경로 또는 glob (`~` 확장 지원)
    pub pattern: String,
    /// admin 이 읽기는 할 수 있는 경로
    #[serde(default)]
    pub admin_readable: bool,
}

impl ProtectedPathRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            admin_readable: false,
        }
    }

    pub fn admin_readable(mut self) -> Self {
        self.admin_readable = true;
        self
    }
}

/// 이름 붙은 allow/deny 프로필
///
/// 항목은 도구 이름 또는 `group:<name>` 매크로.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

// ============================================================================
// GuardConfig
// ============================================================================

/// Guard 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardConfig {
    pub enabled: bool,

    /// 도구별 요구 권한
    pub permissions: HashMap<String, ToolPermission>,
    /// 목록에 없는 도구의 요구 권한
    pub default_permission: ToolPermission,

    /// owner 가 기본 위험 패턴을 통과할 수 있는지
    pub allow_destructive: bool,
    /// legacy: sudo 를 owner 로 제한 (기본은 admin 이상)
    pub sudo_owner_only: bool,
    /// reboot/shutdown 계열 허용 (owner 한정)
    pub allow_reboot: bool,
    /// 운영자 추가 패턴 (owner 외에는 항상 차단)
    pub custom_patterns: Vec<PatternRule>,

    pub protected_paths: Vec<ProtectedPathRule>,
    /// 상대 경로 해석 기준 (없으면 현재 디렉토리)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,

    /// exact / `*.domain` / `*`
    pub ssh_allowed_hosts: Vec<String>,

    pub profiles: HashMap<String, ProfileConfig>,
    /// `group:<name>` → 멤버 도구
    pub tool_groups: HashMap<String, Vec<String>>,

    /// 모든 검사 우회
    pub auto_approve: Vec<String>,
    /// 실행 전 사용자 확인 필요
    pub require_confirmation: Vec<String>,
    /// DestructiveTracker 대상
    pub destructive_tools: Vec<String>,

    pub shell_tools: Vec<String>,
    pub remote_shell_tools: Vec<String>,
    pub file_read_tools: Vec<String>,
    pub file_write_tools: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// 기본 보호 경로
pub fn default_protected_paths() -> Vec<ProtectedPathRule> {
    vec![
        ProtectedPathRule::new("~/.ssh"),
        ProtectedPathRule::new("~/.gnupg"),
        ProtectedPathRule::new("~/.aws/credentials"),
        ProtectedPathRule::new("~/.config/gcloud"),
        ProtectedPathRule::new("~/.kube/config").admin_readable(),
        ProtectedPathRule::new("~/.docker/config.json"),
        ProtectedPathRule::new("~/.netrc"),
        ProtectedPathRule::new("~/.config/sentinel/secrets"),
        ProtectedPathRule::new("/etc/shadow"),
        ProtectedPathRule::new("/etc/gshadow"),
        ProtectedPathRule::new("/etc/sudoers"),
        ProtectedPathRule::new("/etc/sudoers.d"),
        ProtectedPathRule::new("**/.env").admin_readable(),
        ProtectedPathRule::new("**/*.pem"),
        ProtectedPathRule::new("**/id_rsa*"),
        ProtectedPathRule::new("**/id_ed25519*"),
    ]
}

/// 기본 도구 그룹
pub fn default_tool_groups() -> HashMap<String, Vec<String>> {
    let mut groups = HashMap::new();
    groups.insert(
        "group:fs".to_string(),
        strings(&[
            "read_file",
            "write_file",
            "edit_file",
            "delete_file",
            "list_files",
            "search_files",
        ]),
    );
    groups.insert("group:runtime".to_string(), strings(&["bash", "exec", "shell"]));
    groups.insert("group:remote".to_string(), strings(&["ssh", "scp"]));
    groups.insert(
        "group:subagents".to_string(),
        strings(&[
            "spawn_subagent",
            "wait_subagent",
            "stop_subagent",
            "list_subagents",
        ]),
    );
    groups
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            permissions: HashMap::new(),
            default_permission: ToolPermission::User,
            allow_destructive: false,
            sudo_owner_only: false,
            allow_reboot: false,
            custom_patterns: Vec::new(),
            protected_paths: default_protected_paths(),
            workspace_root: None,
            ssh_allowed_hosts: Vec::new(),
            profiles: HashMap::new(),
            tool_groups: default_tool_groups(),
            auto_approve: Vec::new(),
            require_confirmation: Vec::new(),
            destructive_tools: strings(&["delete_file", "remove_directory"]),
            shell_tools: strings(&["bash", "exec", "shell"]),
            remote_shell_tools: strings(&["ssh", "scp"]),
            file_read_tools: strings(&["read_file", "list_files", "search_files"]),
            file_write_tools: strings(&["write_file", "edit_file", "delete_file"]),
        }
    }
}

impl GuardConfig {
    /// 이름 목록의 `group:` 매크로를 멤버 도구로 확장
    pub fn expand_groups<'a, I>(&self, names: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut out = HashSet::new();
        for name in names {
            match self.tool_groups.get(name) {
                Some(members) => out.extend(members.iter().cloned()),
                None => {
                    out.insert(name.clone());
                }
            }
        }
        out
    }

    pub fn is_file_tool(&self, tool: &str) -> bool {
        self.file_read_tools.iter().any(|t| t == tool)
            || self.file_write_tools.iter().any(|t| t == tool)
    }
}

// ============================================================================
// DestructiveConfig
// ============================================================================

/// 파괴적 도구 보호 임계치
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DestructiveConfig {
    /// 도구별 60초 창 내 최대 호출 수
    pub max_per_minute: usize,
    /// 같은 도구 연속 호출 경고 임계치
    pub batch_threshold: usize,
    /// 파괴적 호출 사이 최소 간격 (초, 모든 도구 공유)
    pub cooldown_secs: u64,
    /// 배치 임계치 도달 시 사용자 확인 요구
    pub batch_requires_confirmation: bool,
}

impl Default for DestructiveConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 10,
            batch_threshold: 3,
            cooldown_secs: 0,
            batch_requires_confirmation: true,
        }
    }
}
