//! Sentinel Config - 통합 설정
//!
//! 글로벌(`~/.config/sentinel/sentinel.json`) 위에 프로젝트(`.sentinel/sentinel.json`)
//! 설정을 JSON 수준에서 깊게 병합한다. 프로젝트 설정이 우선한다.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use super::guard::{DestructiveConfig, GuardConfig};
use super::runtime::{ExecutorConfig, LoopDetectionConfig, SubagentSettings};
use crate::storage::{read_file, JsonStore};
use crate::Result;

/// 설정 파일명
pub const SENTINEL_CONFIG_FILE: &str = "sentinel.json";

/// Sentinel 통합 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentinelConfig {
    #[serde(default)]
    pub guard: GuardConfig,

    #[serde(default)]
    pub destructive: DestructiveConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub subagents: SubagentSettings,

    #[serde(default)]
    pub loop_detection: LoopDetectionConfig,
}

impl SentinelConfig {
    /// 글로벌 + 프로젝트 설정 로드
    pub fn load() -> Result<Self> {
        let mut merged = Value::Object(Default::default());

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(value) = global.load_optional::<Value>(SENTINEL_CONFIG_FILE)? {
                debug!(path = %global.file_path(SENTINEL_CONFIG_FILE).display(), "loaded global config");
                merge_json(&mut merged, value);
            }
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            if let Some(value) = project.load_optional::<Value>(SENTINEL_CONFIG_FILE)? {
                debug!(path = %project.file_path(SENTINEL_CONFIG_FILE).display(), "loaded project config");
                merge_json(&mut merged, value);
            }
        }

        Ok(serde_json::from_value(merged)?)
    }

    /// 단일 파일 로드 (`.json` 또는 `.toml`)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        read_file(path.as_ref())
    }

    /// 프로젝트 설정 저장
    pub fn save_project(&self) -> Result<()> {
        JsonStore::current_project()?.save(SENTINEL_CONFIG_FILE, self)
    }
}

/// `overlay` 를 `base` 에 깊게 병합 (객체는 키 단위, 그 외는 교체)
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolPermission;
    use serde_json::json;

    #[test]
    fn test_merge_json_project_wins() {
        let mut base = json!({
            "guard": {"permissions": {"bash": "admin"}, "sudoOwnerOnly": true},
            "executor": {"maxParallel": 2}
        });
        merge_json(
            &mut base,
            json!({"guard": {"permissions": {"bash": "owner", "ssh": "owner"}}}),
        );
        let config: SentinelConfig = serde_json::from_value(base).unwrap();
        assert_eq!(config.guard.permissions["bash"], ToolPermission::Owner);
        assert_eq!(config.guard.permissions["ssh"], ToolPermission::Owner);
        assert!(config.guard.sudo_owner_only);
        assert_eq!(config.executor.max_parallel, 2);
        assert_eq!(config.subagents.max_spawn_depth, 1);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.toml");
        std::fs::write(
            &path,
            r#"
[guard]
allowDestructive = true
sshAllowedHosts = ["db.internal", "*.prod.example.com"]

[destructive]
maxPerMinute = 2

[subagents]
maxConcurrent = 1
"#,
        )
        .unwrap();

        let config = SentinelConfig::load_from(&path).unwrap();
        assert!(config.guard.allow_destructive);
        assert_eq!(config.guard.ssh_allowed_hosts.len(), 2);
        assert_eq!(config.destructive.max_per_minute, 2);
        assert_eq!(config.destructive.batch_threshold, 3);
        assert_eq!(config.subagents.max_concurrent, 1);
    }
}
