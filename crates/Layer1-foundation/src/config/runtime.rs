//! Executor / Subagent / LoopDetector 설정

use serde::{Deserialize, Serialize};

/// ToolExecutor 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    /// 배치 병렬 실행 허용
    pub parallel: bool,
    /// 동시 실행 핸들러 상한
    pub max_parallel: usize,
    pub default_timeout_secs: u64,
    /// 셸 / 원격 셸 도구
    pub shell_timeout_secs: u64,
    /// 지정된 heavy 도구
    pub heavy_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heavy_tool: Option<String>,
    /// 배치 전체를 순차 실행시키는 도구
    pub order_sensitive_tools: Vec<String>,
    /// 승인 후 재실행 타임아웃
    pub confirmation_timeout_secs: u64,
    pub max_output_chars: usize,
    pub max_error_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_parallel: 4,
            default_timeout_secs: 60,
            shell_timeout_secs: 300,
            heavy_timeout_secs: 1800,
            heavy_tool: None,
            order_sensitive_tools: [
                "bash",
                "exec",
                "shell",
                "ssh",
                "scp",
                "write_file",
                "edit_file",
                "delete_file",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            confirmation_timeout_secs: 300,
            max_output_chars: 400_000,
            max_error_chars: 2000,
        }
    }
}

/// Subagent 제한
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubagentSettings {
    pub max_concurrent: usize,
    pub max_turns: u32,
    pub timeout_secs: u64,
    /// 1 = 최상위 subagent 는 다시 spawn 할 수 없음
    pub max_spawn_depth: u32,
    /// 부모 하나가 동시에 가질 수 있는 실행 중 자식 수
    pub max_children: usize,
    /// 자식 레지스트리에서 제외할 도구 (group 매크로 허용)
    pub denied_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_turns: 25,
            timeout_secs: 300,
            max_spawn_depth: 1,
            max_children: 5,
            denied_tools: Vec::new(),
            model: None,
        }
    }
}

/// ToolLoopDetector 임계치
///
/// 생성 시 `warning < critical < breaker` 가 되도록 위로 정규화된다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopDetectionConfig {
    pub enabled: bool,
    pub history_size: usize,
    pub warning_threshold: usize,
    pub critical_threshold: usize,
    pub breaker_threshold: usize,
    /// 같은 에러 반복 횟수
    pub strategy_threshold: usize,
    /// 같은 파괴적 도구 (Guard 태그 기준) 연속 호출 한도
    pub destructive_batch_threshold: usize,
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_size: 30,
            warning_threshold: 5,
            critical_threshold: 8,
            breaker_threshold: 12,
            strategy_threshold: 3,
            destructive_batch_threshold: 3,
        }
    }
}

impl LoopDetectionConfig {
    /// 임계치 순서 보장 (warning >= 1, critical > warning, breaker > critical)
    pub fn normalized(mut self) -> Self {
        self.history_size = self.history_size.max(1);
        self.warning_threshold = self.warning_threshold.max(1);
        self.critical_threshold = self.critical_threshold.max(self.warning_threshold + 1);
        self.breaker_threshold = self.breaker_threshold.max(self.critical_threshold + 1);
        self.strategy_threshold = self.strategy_threshold.max(1);
        self.destructive_batch_threshold = self.destructive_batch_threshold.max(1);
        self
    }
}
